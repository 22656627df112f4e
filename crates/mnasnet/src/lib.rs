//! # mnasnet
//!
//! MNASNet image classifiers in pure Rust.
//!
//! ## Modules
//!
//! - **core**: Tensor engine: flat row-major tensors, shapes, seeded initializers
//! - **nn**: Layers: Conv2D (grouped/depthwise), BatchNorm2D, ReLU, pooling, Linear, Sequential
//! - **models**: Depth scaling, inverted-residual blocks, `MnasNet`, presets and config
//! - **io**: State dicts: capture, JSON save/load, strict load
//!
//! ```no_run
//! use mnasnet::models::{mnasnet1_0, MnasNet, MnasNetConfig};
//! use mnasnet::nn::Layer;
//! use mnasnet::core::Tensor;
//!
//! let mut net: MnasNet<f32> = mnasnet1_0(false, true, MnasNetConfig::default())?;
//! net.eval();
//! let scores = net.forward(&Tensor::zeros(vec![1, 3, 224, 224]))?;
//! assert_eq!(scores.shape_vec(), vec![1, 1000]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Core tensor engine.
pub use mnasnet_core as core;

/// Neural network layers.
pub use mnasnet_nn as nn;

/// MNASNet architecture.
pub use mnasnet_models as models;

/// State-dict I/O.
pub use mnasnet_io as io;
