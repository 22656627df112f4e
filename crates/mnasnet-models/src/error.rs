use mnasnet_core::TensorError;
use thiserror::Error;

/// Errors raised while building an MNASNet.
///
/// Every variant except `Tensor` is a rejected construction argument; none of
/// them is produced after layers have been allocated.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("width multiplier must be finite and > 0, got {0}")]
    InvalidWidthMultiplier(f64),

    #[error("round-up bias must lie strictly between 0 and 1, got {0}")]
    InvalidRoundingBias(f64),

    #[error("rounding divisor must be at least 1")]
    InvalidDivisor,

    #[error("depth to round must be finite and >= 0, got {0}")]
    InvalidDepth(f64),

    #[error("kernel size must be 3 or 5, got {0}")]
    InvalidKernelSize(usize),

    #[error("stride must be 1 or 2, got {0}")]
    InvalidStride(usize),

    #[error("a stack needs at least one block, got {0} repeats")]
    InvalidRepeats(usize),

    #[error("expansion factor must be at least 1, got {0}")]
    InvalidExpansionFactor(usize),

    #[error("channel counts must be positive, got {in_ch} -> {out_ch}")]
    InvalidChannels { in_ch: usize, out_ch: usize },

    #[error("class count must be at least 1")]
    InvalidClassCount,

    #[error("dropout must lie in [0, 1), got {0}")]
    InvalidDropout(f64),

    #[error("invalid batch norm setting: {0}")]
    InvalidBatchNorm(String),

    #[error("no pretrained weights are bundled for {0}; load a state dict with mnasnet-io instead")]
    PretrainedUnavailable(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type ModelResult<T> = Result<T, ModelError>;
