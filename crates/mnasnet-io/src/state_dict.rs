use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::{debug, info};
use mnasnet_core::{Float, Tensor};
use mnasnet_nn::Layer;
use serde::{Deserialize, Serialize};

use crate::error::{StateDictError, StateDictResult};

/// One named tensor. Values are widened to `f64` so a dict written from an
/// `f32` network loads back into `f32` without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl TensorEntry {
    pub fn from_tensor<T: Float>(name: &str, tensor: &Tensor<T>) -> Self {
        TensorEntry {
            name: name.to_string(),
            shape: tensor.shape_vec(),
            data: tensor.data().iter().map(|v| v.to_f64()).collect(),
        }
    }

    fn check_len(&self) -> StateDictResult<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(StateDictError::CorruptEntry {
                name: self.name.clone(),
                shape: self.shape.clone(),
                len: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn to_tensor<T: Float>(&self) -> StateDictResult<Tensor<T>> {
        self.check_len()?;
        let data = self.data.iter().map(|&v| T::from_f64(v)).collect();
        Ok(Tensor::new(data, self.shape.clone())?)
    }
}

/// Parameters followed by buffers, in the layer's own traversal order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    pub entries: Vec<TensorEntry>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every parameter and running statistic of `layer`.
    pub fn from_layer<T: Float, L: Layer<T> + ?Sized>(layer: &L) -> Self {
        let mut entries: Vec<TensorEntry> = layer
            .named_parameters("")
            .into_iter()
            .map(|(name, t)| TensorEntry::from_tensor(&name, t))
            .collect();
        entries.extend(
            layer
                .named_buffers("")
                .into_iter()
                .map(|(name, t)| TensorEntry::from_tensor(&name, &t)),
        );
        StateDict { entries }
    }

    pub fn insert<T: Float>(&mut self, name: &str, tensor: &Tensor<T>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => *entry = TensorEntry::from_tensor(name, tensor),
            None => self.entries.push(TensorEntry::from_tensor(name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TensorEntry> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn index(&self) -> StateDictResult<HashMap<&str, &TensorEntry>> {
        let mut index = HashMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            if index.insert(entry.name.as_str(), entry).is_some() {
                return Err(StateDictError::DuplicateKey(entry.name.clone()));
            }
        }
        Ok(index)
    }
}

/// Write `dict` as pretty-printed JSON.
pub fn save_state_dict<P: AsRef<Path>>(dict: &StateDict, path: P) -> StateDictResult<()> {
    let json = serde_json::to_string_pretty(dict)?;
    fs::write(path.as_ref(), json)?;
    info!("saved {} tensors to {}", dict.len(), path.as_ref().display());
    Ok(())
}

pub fn load_state_dict_file<P: AsRef<Path>>(path: P) -> StateDictResult<StateDict> {
    let json = fs::read_to_string(path.as_ref())?;
    let dict: StateDict = serde_json::from_str(&json)?;
    info!("loaded {} tensors from {}", dict.len(), path.as_ref().display());
    Ok(dict)
}

/// Strictly copy `dict` into `layer`.
///
/// Every parameter and buffer of the layer must have an entry of the same
/// shape and the dict may hold nothing else. The whole dict is checked before
/// the first tensor is written, so on error `layer` is unchanged.
pub fn apply_state_dict<T: Float, L: Layer<T> + ?Sized>(layer: &mut L, dict: &StateDict) -> StateDictResult<()> {
    let index = dict.index()?;

    let mut expected: Vec<(String, Vec<usize>)> = layer
        .named_parameters("")
        .into_iter()
        .map(|(name, t)| (name, t.shape_vec()))
        .collect();
    expected.extend(layer.named_buffers("").into_iter().map(|(name, t)| (name, t.shape_vec())));

    let mut seen = HashSet::with_capacity(expected.len());
    for (name, shape) in &expected {
        let entry = index
            .get(name.as_str())
            .ok_or_else(|| StateDictError::MissingKey(name.clone()))?;
        if &entry.shape != shape {
            return Err(StateDictError::ShapeMismatch {
                name: name.clone(),
                expected: shape.clone(),
                got: entry.shape.clone(),
            });
        }
        entry.check_len()?;
        seen.insert(name.as_str());
    }
    if let Some(extra) = dict.keys().find(|k| !seen.contains(k)) {
        return Err(StateDictError::UnexpectedKey(extra.to_string()));
    }

    let written = copy_into(layer.named_parameters_mut(""), &index) + copy_into(layer.named_buffers_mut(""), &index);
    debug!("applied {} tensors", written);
    Ok(())
}

fn copy_into<T: Float>(targets: Vec<(String, &mut Tensor<T>)>, index: &HashMap<&str, &TensorEntry>) -> usize {
    let mut written = 0;
    for (name, target) in targets {
        if let Some(entry) = index.get(name.as_str()) {
            for (dst, &src) in target.data_mut().iter_mut().zip(entry.data.iter()) {
                *dst = T::from_f64(src);
            }
            written += 1;
        }
    }
    written
}
