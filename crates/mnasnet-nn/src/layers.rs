use std::sync::RwLock;

use mnasnet_core::{Float, Initializer, Tensor, TensorError, TensorResult};
use rayon::prelude::*;

/// Trait for a neural network layer.
///
/// Parameters and buffers are reported with dotted names rooted at `prefix`,
/// so nested containers produce paths such as `layers.9.0.layers.1.weight`.
pub trait Layer<T: Float>: Send + Sync {
    /// Short type name, used in logs.
    fn name(&self) -> &'static str;

    /// Forward pass.
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>>;

    /// Trainable parameters with their qualified names.
    fn named_parameters(&self, _prefix: &str) -> Vec<(String, &Tensor<T>)> {
        Vec::new()
    }

    fn named_parameters_mut(&mut self, _prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        Vec::new()
    }

    /// Non-trainable state (batch-norm running statistics), as snapshots.
    fn named_buffers(&self, _prefix: &str) -> Vec<(String, Tensor<T>)> {
        Vec::new()
    }

    fn named_buffers_mut(&mut self, _prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        Vec::new()
    }

    /// Switch between training and inference behaviour.
    fn set_training(&mut self, _training: bool) {}

    fn parameters(&self) -> Vec<&Tensor<T>> {
        self.named_parameters("").into_iter().map(|(_, p)| p).collect()
    }

    /// Total number of trainable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    fn train(&mut self) {
        self.set_training(true);
    }

    fn eval(&mut self) {
        self.set_training(false);
    }
}

/// Join a parent path and a child name with a dot.
pub fn qualified_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Fully connected (dense) layer: y = xW + b.
pub struct Linear<T: Float> {
    pub weight: Tensor<T>, // [in_features, out_features]
    pub bias: Option<Tensor<T>>,
    pub in_features: usize,
    pub out_features: usize,
}

impl<T: Float> Linear<T> {
    /// Create a new linear layer with Xavier-uniform weights and a zero bias.
    pub fn new(in_features: usize, out_features: usize, bias: bool, init: &mut Initializer) -> Self {
        let weight = init.xavier_uniform(vec![in_features, out_features], in_features, out_features);
        let bias = bias.then(|| Tensor::zeros(vec![out_features]));

        Linear {
            weight,
            bias,
            in_features,
            out_features,
        }
    }
}

impl<T: Float> Layer<T> for Linear<T> {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if input.ndim() != 2 || input.shape().dims()[1] != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.shape().dims().first().copied().unwrap_or(0), self.in_features],
                got: input.shape_vec(),
            });
        }
        let mut out = input.matmul(&self.weight)?;
        if let Some(bias) = &self.bias {
            for row in out.data_mut().chunks_mut(self.out_features) {
                for (y, &b) in row.iter_mut().zip(bias.data()) {
                    *y += b;
                }
            }
        }
        Ok(out)
    }

    fn named_parameters(&self, prefix: &str) -> Vec<(String, &Tensor<T>)> {
        let mut params = vec![(qualified_name(prefix, "weight"), &self.weight)];
        if let Some(b) = &self.bias {
            params.push((qualified_name(prefix, "bias"), b));
        }
        params
    }

    fn named_parameters_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        let mut params = vec![(qualified_name(prefix, "weight"), &mut self.weight)];
        if let Some(b) = &mut self.bias {
            params.push((qualified_name(prefix, "bias"), b));
        }
        params
    }
}

/// ReLU activation layer.
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self { ReLU }
}

impl<T: Float> Layer<T> for ReLU {
    fn name(&self) -> &'static str { "ReLU" }
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> { Ok(input.relu()) }
}

impl Default for ReLU {
    fn default() -> Self { Self::new() }
}

/// Flatten layer: reshapes input to [batch_size, features].
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self { Flatten }
}

impl<T: Float> Layer<T> for Flatten {
    fn name(&self) -> &'static str { "Flatten" }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let shape = input.shape_vec();
        if shape.len() <= 2 {
            return Ok(input.clone());
        }
        let batch = shape[0];
        let features: usize = shape[1..].iter().product();
        input.reshape(vec![batch, features])
    }
}

impl Default for Flatten {
    fn default() -> Self { Self::new() }
}

struct RunningStats<T: Float> {
    mean: Tensor<T>,
    var: Tensor<T>,
}

/// Batch Normalization over the channel axis of `[N, C, H, W]` input.
///
/// y = (x - μ) / √(σ² + ε) * γ + β
///
/// In training mode μ and σ² come from the batch (biased variance over N, H, W)
/// and the running statistics move as `running = momentum * running + (1 - momentum) * batch`.
/// In inference mode the running statistics are used.
pub struct BatchNorm2D<T: Float> {
    pub num_features: usize,
    pub momentum: f64,
    pub eps: f64,
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
    stats: RwLock<RunningStats<T>>,
    training: bool,
}

impl<T: Float> BatchNorm2D<T> {
    pub fn new(num_features: usize, momentum: f64, eps: f64) -> TensorResult<Self> {
        if !(0.0..=1.0).contains(&momentum) {
            return Err(TensorError::InvalidOperation(format!(
                "batch norm momentum must lie in [0, 1], got {}",
                momentum
            )));
        }
        if !(eps > 0.0 && eps.is_finite()) {
            return Err(TensorError::InvalidOperation(format!(
                "batch norm epsilon must be positive, got {}",
                eps
            )));
        }
        Ok(BatchNorm2D {
            num_features,
            momentum,
            eps,
            weight: Tensor::ones(vec![num_features]),
            bias: Tensor::zeros(vec![num_features]),
            stats: RwLock::new(RunningStats {
                mean: Tensor::zeros(vec![num_features]),
                var: Tensor::ones(vec![num_features]),
            }),
            training: true,
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Snapshot of the running `(mean, variance)`.
    pub fn running_stats(&self) -> (Tensor<T>, Tensor<T>) {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        (stats.mean.clone(), stats.var.clone())
    }

    /// Per-channel mean and biased variance over batch and spatial axes.
    fn batch_stats(&self, x: &[T], n: usize, c: usize, plane: usize) -> Vec<(T, T)> {
        let count = T::from_usize(n * plane);
        (0..c)
            .into_par_iter()
            .map(|ch| {
                let planes = || (0..n).map(move |b| &x[(b * c + ch) * plane..(b * c + ch + 1) * plane]);
                let mean = planes().flat_map(|p| p.iter().copied()).sum::<T>() / count;
                let var = planes()
                    .flat_map(|p| p.iter().map(move |&v| (v - mean) * (v - mean)))
                    .sum::<T>()
                    / count;
                (mean, var)
            })
            .collect()
    }
}

impl<T: Float> Layer<T> for BatchNorm2D<T> {
    fn name(&self) -> &'static str {
        "BatchNorm2D"
    }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (n, c, h, w) = input.shape().nchw()?;
        if c != self.num_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n, self.num_features, h, w],
                got: input.shape_vec(),
            });
        }
        let plane = h * w;
        let x = input.data();

        let (mean, var): (Vec<T>, Vec<T>) = if self.training {
            // batch statistics of nothing would poison the running ones
            if n * plane == 0 {
                return Err(TensorError::InvalidOperation(format!(
                    "batch norm in training mode needs a non-empty batch, got shape {}",
                    input.shape()
                )));
            }
            let batch = self.batch_stats(x, n, c, plane);
            let mut stats = self.stats.write().map_err(|_| {
                TensorError::InvalidOperation("batch norm statistics lock poisoned".to_string())
            })?;
            let m = T::from_f64(self.momentum);
            let keep = T::from_f64(1.0 - self.momentum);
            for (ch, &(bm, bv)) in batch.iter().enumerate() {
                let rm = &mut stats.mean.data_mut()[ch];
                *rm = m * *rm + keep * bm;
                let rv = &mut stats.var.data_mut()[ch];
                *rv = m * *rv + keep * bv;
            }
            batch.into_iter().unzip()
        } else {
            let stats = self.stats.read().map_err(|_| {
                TensorError::InvalidOperation("batch norm statistics lock poisoned".to_string())
            })?;
            (stats.mean.data().to_vec(), stats.var.data().to_vec())
        };

        let eps = T::from_f64(self.eps);
        let inv_std: Vec<T> = var.iter().map(|&v| T::ONE / (v + eps).sqrt()).collect();
        let gamma = self.weight.data();
        let beta = self.bias.data();

        let mut out = vec![T::ZERO; x.len()];
        out.par_chunks_mut(plane.max(1))
            .zip(x.par_chunks(plane.max(1)))
            .enumerate()
            .for_each(|(idx, (dst, src))| {
                let ch = idx % c;
                let (mu, s, g, b) = (mean[ch], inv_std[ch], gamma[ch], beta[ch]);
                for (y, &v) in dst.iter_mut().zip(src) {
                    *y = (v - mu) * s * g + b;
                }
            });
        Tensor::new(out, input.shape_vec())
    }

    fn named_parameters(&self, prefix: &str) -> Vec<(String, &Tensor<T>)> {
        vec![
            (qualified_name(prefix, "weight"), &self.weight),
            (qualified_name(prefix, "bias"), &self.bias),
        ]
    }

    fn named_parameters_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        vec![
            (qualified_name(prefix, "weight"), &mut self.weight),
            (qualified_name(prefix, "bias"), &mut self.bias),
        ]
    }

    fn named_buffers(&self, prefix: &str) -> Vec<(String, Tensor<T>)> {
        let (mean, var) = self.running_stats();
        vec![
            (qualified_name(prefix, "_mean"), mean),
            (qualified_name(prefix, "_variance"), var),
        ]
    }

    fn named_buffers_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        let stats = self.stats.get_mut().unwrap_or_else(|e| e.into_inner());
        vec![
            (qualified_name(prefix, "_mean"), &mut stats.mean),
            (qualified_name(prefix, "_variance"), &mut stats.var),
        ]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
