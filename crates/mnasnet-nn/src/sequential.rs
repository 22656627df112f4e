use crate::layers::{qualified_name, Layer};
use log::trace;
use mnasnet_core::{Float, Tensor, TensorResult};

/// Sequential container: chains layers in order.
///
/// Children are named by their position, so the first layer's weight is
/// reported as `0.weight` (or `<prefix>.0.weight` when nested).
pub struct Sequential<T: Float> {
    layers: Vec<Box<dyn Layer<T>>>,
}

impl<T: Float> Sequential<T> {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the container.
    pub fn add(mut self, layer: Box<dyn Layer<T>>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn push(&mut self, layer: Box<dyn Layer<T>>) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Layer<T>> {
        self.layers.get(index).map(|l| l.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Layer<T>> {
        self.layers.iter().map(|l| l.as_ref())
    }
}

impl<T: Float> Layer<T> for Sequential<T> {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    /// Forward pass through all layers.
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x)?;
            trace!("{} -> {}", layer.name(), x.shape());
        }
        Ok(x)
    }

    fn named_parameters(&self, prefix: &str) -> Vec<(String, &Tensor<T>)> {
        let mut params = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            params.extend(layer.named_parameters(&qualified_name(prefix, &i.to_string())));
        }
        params
    }

    fn named_parameters_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        let mut params = Vec::new();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            params.extend(layer.named_parameters_mut(&qualified_name(prefix, &i.to_string())));
        }
        params
    }

    fn named_buffers(&self, prefix: &str) -> Vec<(String, Tensor<T>)> {
        let mut buffers = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            buffers.extend(layer.named_buffers(&qualified_name(prefix, &i.to_string())));
        }
        buffers
    }

    fn named_buffers_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        let mut buffers = Vec::new();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            buffers.extend(layer.named_buffers_mut(&qualified_name(prefix, &i.to_string())));
        }
        buffers
    }

    fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }
}

impl<T: Float> Default for Sequential<T> {
    fn default() -> Self {
        Self::new()
    }
}
