pub mod error;
pub mod depths;
pub mod blocks;
pub mod config;
pub mod mnasnet;
pub mod presets;

pub use error::{ModelError, ModelResult};
pub use depths::{get_depths, round_to_multiple_of, DEFAULT_ROUND_UP_BIAS, REFERENCE_DEPTHS};
pub use blocks::{stack, BatchNormSettings, BlockSpec, InvertedResidual, Shortcut, StageSpec};
pub use config::MnasNetConfig;
pub use mnasnet::MnasNet;
pub use presets::{mnasnet0_5, mnasnet0_75, mnasnet1_0, mnasnet1_3, Preset};
