use log::debug;
use mnasnet_core::{Float, Initializer, Tensor, TensorResult};
use mnasnet_nn::{qualified_name, BatchNorm2D, Conv2D, Conv2DOptions, Layer, ReLU, Sequential};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Momentum and epsilon shared by every batch norm of a network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormSettings {
    /// Weight kept on the running statistic at each training step.
    pub momentum: f64,
    pub eps: f64,
}

impl BatchNormSettings {
    pub fn validate(&self) -> ModelResult<()> {
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(ModelError::InvalidBatchNorm(format!(
                "momentum must lie in [0, 1], got {}",
                self.momentum
            )));
        }
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(ModelError::InvalidBatchNorm(format!(
                "epsilon must be positive, got {}",
                self.eps
            )));
        }
        Ok(())
    }

    pub(crate) fn build<T: Float>(&self, channels: usize) -> ModelResult<BatchNorm2D<T>> {
        Ok(BatchNorm2D::new(channels, self.momentum, self.eps)?)
    }
}

impl Default for BatchNormSettings {
    fn default() -> Self {
        BatchNormSettings { momentum: 0.9, eps: 1e-5 }
    }
}

/// Whether an inverted-residual block adds its input back to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    /// Input and output shapes agree: `out = body(x) + x`.
    Identity,
    /// Channel count or resolution changes: `out = body(x)`.
    Omitted,
}

impl Shortcut {
    pub fn for_block(in_ch: usize, out_ch: usize, stride: usize) -> Self {
        if in_ch == out_ch && stride == 1 {
            Shortcut::Identity
        } else {
            Shortcut::Omitted
        }
    }
}

/// Shape of a single inverted-residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub in_ch: usize,
    pub out_ch: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub expansion_factor: usize,
}

impl BlockSpec {
    pub fn validate(&self) -> ModelResult<()> {
        if self.kernel_size != 3 && self.kernel_size != 5 {
            return Err(ModelError::InvalidKernelSize(self.kernel_size));
        }
        if self.stride != 1 && self.stride != 2 {
            return Err(ModelError::InvalidStride(self.stride));
        }
        if self.expansion_factor == 0 {
            return Err(ModelError::InvalidExpansionFactor(self.expansion_factor));
        }
        if self.in_ch == 0 || self.out_ch == 0 {
            return Err(ModelError::InvalidChannels { in_ch: self.in_ch, out_ch: self.out_ch });
        }
        Ok(())
    }
}

/// Expand → depthwise filter → project, with an optional identity shortcut.
///
/// Body layout (indices are part of parameter names):
/// 0 pointwise conv, 1 BN, 2 ReLU, 3 depthwise conv, 4 BN, 5 ReLU,
/// 6 pointwise projection, 7 BN. The projection has no activation.
pub struct InvertedResidual<T: Float> {
    pub spec: BlockSpec,
    shortcut: Shortcut,
    layers: Sequential<T>,
}

impl<T: Float> InvertedResidual<T> {
    pub fn new(spec: BlockSpec, bn: BatchNormSettings, init: &mut Initializer) -> ModelResult<Self> {
        spec.validate()?;
        bn.validate()?;

        let mid_ch = spec.in_ch * spec.expansion_factor;
        let pointwise = Conv2DOptions::default().with_bias(false);
        let depthwise = Conv2DOptions::default()
            .with_stride(spec.stride)
            .with_padding(spec.kernel_size / 2)
            .with_groups(mid_ch)
            .with_bias(false);

        let layers = Sequential::new()
            .add(Box::new(Conv2D::<T>::new(spec.in_ch, mid_ch, 1, pointwise, init)?))
            .add(Box::new(bn.build::<T>(mid_ch)?))
            .add(Box::new(ReLU::new()))
            .add(Box::new(Conv2D::<T>::new(mid_ch, mid_ch, spec.kernel_size, depthwise, init)?))
            .add(Box::new(bn.build::<T>(mid_ch)?))
            .add(Box::new(ReLU::new()))
            .add(Box::new(Conv2D::<T>::new(mid_ch, spec.out_ch, 1, pointwise, init)?))
            .add(Box::new(bn.build::<T>(spec.out_ch)?));

        Ok(InvertedResidual {
            spec,
            shortcut: Shortcut::for_block(spec.in_ch, spec.out_ch, spec.stride),
            layers,
        })
    }

    pub fn shortcut(&self) -> Shortcut {
        self.shortcut
    }

    /// The block body without the shortcut.
    pub fn transform(&self) -> &Sequential<T> {
        &self.layers
    }
}

impl<T: Float> Layer<T> for InvertedResidual<T> {
    fn name(&self) -> &'static str {
        "InvertedResidual"
    }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let out = self.layers.forward(input)?;
        match self.shortcut {
            Shortcut::Identity => out.add(input),
            Shortcut::Omitted => Ok(out),
        }
    }

    fn named_parameters(&self, prefix: &str) -> Vec<(String, &Tensor<T>)> {
        self.layers.named_parameters(&qualified_name(prefix, "layers"))
    }

    fn named_parameters_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        self.layers.named_parameters_mut(&qualified_name(prefix, "layers"))
    }

    fn named_buffers(&self, prefix: &str) -> Vec<(String, Tensor<T>)> {
        self.layers.named_buffers(&qualified_name(prefix, "layers"))
    }

    fn named_buffers_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        self.layers.named_buffers_mut(&qualified_name(prefix, "layers"))
    }

    fn set_training(&mut self, training: bool) {
        self.layers.set_training(training);
    }
}

/// One stage of the network: `repeats` inverted residuals at a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub in_ch: usize,
    pub out_ch: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub expansion_factor: usize,
    pub repeats: usize,
}

/// Build a stage. The first block applies the stride and the channel change,
/// so it only keeps a shortcut when neither happens; the remaining blocks are
/// `out_ch -> out_ch` at stride 1 and always keep it.
pub fn stack<T: Float>(
    spec: StageSpec,
    bn: BatchNormSettings,
    init: &mut Initializer,
) -> ModelResult<Sequential<T>> {
    if spec.repeats < 1 {
        return Err(ModelError::InvalidRepeats(spec.repeats));
    }
    let first = BlockSpec {
        in_ch: spec.in_ch,
        out_ch: spec.out_ch,
        kernel_size: spec.kernel_size,
        stride: spec.stride,
        expansion_factor: spec.expansion_factor,
    };
    let rest = BlockSpec { in_ch: spec.out_ch, stride: 1, ..first };
    // reject bad arguments before any block allocates weights
    first.validate()?;
    rest.validate()?;
    bn.validate()?;

    debug!(
        "stack {} -> {} k{} s{} e{} x{}",
        spec.in_ch, spec.out_ch, spec.kernel_size, spec.stride, spec.expansion_factor, spec.repeats
    );

    let mut blocks = Sequential::new();
    blocks.push(Box::new(InvertedResidual::<T>::new(first, bn, init)?));
    for _ in 1..spec.repeats {
        blocks.push(Box::new(InvertedResidual::<T>::new(rest, bn, init)?));
    }
    Ok(blocks)
}
