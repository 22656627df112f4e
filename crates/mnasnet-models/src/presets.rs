//! Named MNASNet variants at the four published width multipliers.
//!
//! Each constructor overrides `config.alpha` with its own width multiplier,
//! whatever the caller put there, and keeps the rest of the configuration.
//! No pretrained weights ship with this crate, so `pretrained = true` is an
//! error rather than a silent random initialization.

use log::{debug, info};
use mnasnet_core::Float;

use crate::config::MnasNetConfig;
use crate::error::{ModelError, ModelResult};
use crate::mnasnet::MnasNet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    Mnasnet0_5,
    Mnasnet0_75,
    Mnasnet1_0,
    Mnasnet1_3,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Mnasnet0_5,
        Preset::Mnasnet0_75,
        Preset::Mnasnet1_0,
        Preset::Mnasnet1_3,
    ];

    pub fn alpha(self) -> f64 {
        match self {
            Preset::Mnasnet0_5 => 0.5,
            Preset::Mnasnet0_75 => 0.75,
            Preset::Mnasnet1_0 => 1.0,
            Preset::Mnasnet1_3 => 1.3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::Mnasnet0_5 => "mnasnet0_5",
            Preset::Mnasnet0_75 => "mnasnet0_75",
            Preset::Mnasnet1_0 => "mnasnet1_0",
            Preset::Mnasnet1_3 => "mnasnet1_3",
        }
    }

    pub fn from_name(name: &str) -> Option<Preset> {
        Preset::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Build the preset from `config` with `config.alpha` replaced by
    /// [`Preset::alpha`]; whatever alpha the caller set is ignored.
    ///
    /// `progress` only controls whether construction is reported at info level.
    pub fn build<T: Float>(self, pretrained: bool, progress: bool, config: MnasNetConfig) -> ModelResult<MnasNet<T>> {
        if pretrained {
            return Err(ModelError::PretrainedUnavailable(self.name()));
        }
        if config.alpha != self.alpha() {
            debug!("{} overrides alpha {} with {}", self.name(), config.alpha, self.alpha());
        }
        let config = MnasNetConfig { alpha: self.alpha(), ..config };
        if progress {
            info!("building {} with {} classes", self.name(), config.num_classes);
        }
        MnasNet::from_config(&config)
    }
}

/// MNASNet at width multiplier 0.5; `config.alpha` is overridden.
pub fn mnasnet0_5<T: Float>(pretrained: bool, progress: bool, config: MnasNetConfig) -> ModelResult<MnasNet<T>> {
    Preset::Mnasnet0_5.build(pretrained, progress, config)
}

/// MNASNet at width multiplier 0.75; `config.alpha` is overridden.
pub fn mnasnet0_75<T: Float>(pretrained: bool, progress: bool, config: MnasNetConfig) -> ModelResult<MnasNet<T>> {
    Preset::Mnasnet0_75.build(pretrained, progress, config)
}

/// MNASNet at width multiplier 1.0; `config.alpha` is overridden.
pub fn mnasnet1_0<T: Float>(pretrained: bool, progress: bool, config: MnasNetConfig) -> ModelResult<MnasNet<T>> {
    Preset::Mnasnet1_0.build(pretrained, progress, config)
}

/// MNASNet at width multiplier 1.3; `config.alpha` is overridden.
pub fn mnasnet1_3<T: Float>(pretrained: bool, progress: bool, config: MnasNetConfig) -> ModelResult<MnasNet<T>> {
    Preset::Mnasnet1_3.build(pretrained, progress, config)
}
