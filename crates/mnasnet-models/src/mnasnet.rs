use log::{info, warn};
use mnasnet_core::{Float, Initializer, Tensor, TensorError, TensorResult};
use mnasnet_nn::{
    qualified_name, AdaptiveAvgPool2D, Conv2D, Conv2DOptions, Flatten, Layer, Linear, ReLU, Sequential,
};

use crate::blocks::{stack, StageSpec};
use crate::config::MnasNetConfig;
use crate::depths::get_depths;
use crate::error::ModelResult;

/// Width of the feature vector fed to the classifier, independent of alpha.
pub const FEATURE_WIDTH: usize = 1280;

const INPUT_CHANNELS: usize = 3;

/// (kernel, stride, expansion factor, repeats) for the six stages.
const STAGES: [(usize, usize, usize, usize); 6] = [
    (3, 2, 3, 3),
    (5, 2, 3, 3),
    (5, 2, 6, 3),
    (3, 1, 6, 2),
    (5, 2, 6, 4),
    (3, 1, 6, 1),
];

/// MNASNet image classifier
/// ("MnasNet: Platform-Aware Neural Architecture Search for Mobile").
///
/// Input `[N, 3, H, W]`, output `[N, num_classes]` unnormalized scores.
/// The overall stride is 32, so `H` and `W` of at least 32 keep every stage
/// non-empty.
pub struct MnasNet<T: Float> {
    config: MnasNetConfig,
    depths: [usize; 8],
    layers: Sequential<T>,
    classifier: Linear<T>,
}

impl<T: Float> MnasNet<T> {
    /// Revision of the layer layout (separable stem ends at 16 channels).
    pub const VERSION: u32 = 2;

    pub fn new(alpha: f64, num_classes: usize, dropout: f64) -> ModelResult<Self> {
        let config = MnasNetConfig::new(alpha)
            .with_num_classes(num_classes)
            .with_dropout(dropout);
        Self::from_config(&config)
    }

    pub fn from_config(config: &MnasNetConfig) -> ModelResult<Self> {
        config.validate()?;
        let d = get_depths(config.alpha)?;
        let bn = config.batch_norm;
        let mut init = Initializer::new(config.seed);

        let conv = Conv2DOptions::default().with_bias(false);
        let mut layers = Sequential::new()
            // regular stride-2 conv
            .add(Box::new(Conv2D::<T>::new(INPUT_CHANNELS, d[0], 3, conv.with_stride(2).with_padding(1), &mut init)?))
            .add(Box::new(bn.build::<T>(d[0])?))
            .add(Box::new(ReLU::new()))
            // depthwise separable, no shortcut
            .add(Box::new(Conv2D::<T>::new(d[0], d[0], 3, conv.with_padding(1).with_groups(d[0]), &mut init)?))
            .add(Box::new(bn.build::<T>(d[0])?))
            .add(Box::new(ReLU::new()))
            .add(Box::new(Conv2D::<T>::new(d[0], d[1], 1, conv, &mut init)?))
            .add(Box::new(bn.build::<T>(d[1])?))
            .add(Box::new(ReLU::new()));

        for (i, &(kernel_size, stride, expansion_factor, repeats)) in STAGES.iter().enumerate() {
            let spec = StageSpec {
                in_ch: d[i + 1],
                out_ch: d[i + 2],
                kernel_size,
                stride,
                expansion_factor,
                repeats,
            };
            layers.push(Box::new(stack::<T>(spec, bn, &mut init)?));
        }

        layers.push(Box::new(Conv2D::<T>::new(d[7], FEATURE_WIDTH, 1, conv, &mut init)?));
        layers.push(Box::new(bn.build::<T>(FEATURE_WIDTH)?));
        layers.push(Box::new(ReLU::new()));
        layers.push(Box::new(AdaptiveAvgPool2D::new(1)?));
        layers.push(Box::new(Flatten::new()));

        let classifier = Linear::new(FEATURE_WIDTH, config.num_classes, true, &mut init);

        if config.dropout > 0.0 {
            warn!("dropout {} is recorded but not applied before the classifier", config.dropout);
        }

        let net = MnasNet {
            config: config.clone(),
            depths: d,
            layers,
            classifier,
        };
        info!(
            "built MNASNet alpha={} classes={} depths={:?} params={}",
            config.alpha,
            config.num_classes,
            d,
            net.num_parameters()
        );
        Ok(net)
    }

    /// Class scores for a `[N, 3, H, W]` batch.
    pub fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (n, c, h, w) = input.shape().nchw()?;
        if c != INPUT_CHANNELS {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n, INPUT_CHANNELS, h, w],
                got: input.shape_vec(),
            });
        }
        let features = self.layers.forward(input)?;
        self.classifier.forward(&features)
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    pub fn dropout(&self) -> f64 {
        self.config.dropout
    }

    pub fn depths(&self) -> [usize; 8] {
        self.depths
    }

    pub fn config(&self) -> &MnasNetConfig {
        &self.config
    }

    /// Everything up to and including the flatten: `[N, 1280]` features.
    pub fn features(&self) -> &Sequential<T> {
        &self.layers
    }

    pub fn classifier(&self) -> &Linear<T> {
        &self.classifier
    }

    /// Set every trainable parameter to `value`. Running statistics are left alone.
    pub fn fill_parameters(&mut self, value: T) {
        for (_, p) in self.named_parameters_mut("") {
            p.fill(value);
        }
    }

    /// Set every parameter and every batch-norm running statistic to `value`.
    pub fn fill_state(&mut self, value: T) {
        self.fill_parameters(value);
        for (_, b) in self.named_buffers_mut("") {
            b.fill(value);
        }
    }
}

impl<T: Float> Layer<T> for MnasNet<T> {
    fn name(&self) -> &'static str {
        "MnasNet"
    }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        MnasNet::forward(self, input)
    }

    fn named_parameters(&self, prefix: &str) -> Vec<(String, &Tensor<T>)> {
        let mut params = self.layers.named_parameters(&qualified_name(prefix, "layers"));
        params.extend(self.classifier.named_parameters(&qualified_name(prefix, "classifier")));
        params
    }

    fn named_parameters_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        let mut params = self.layers.named_parameters_mut(&qualified_name(prefix, "layers"));
        params.extend(self.classifier.named_parameters_mut(&qualified_name(prefix, "classifier")));
        params
    }

    fn named_buffers(&self, prefix: &str) -> Vec<(String, Tensor<T>)> {
        self.layers.named_buffers(&qualified_name(prefix, "layers"))
    }

    fn named_buffers_mut(&mut self, prefix: &str) -> Vec<(String, &mut Tensor<T>)> {
        self.layers.named_buffers_mut(&qualified_name(prefix, "layers"))
    }

    fn set_training(&mut self, training: bool) {
        self.layers.set_training(training);
        self.classifier.set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn constant_net(alpha: f64, num_classes: usize) -> MnasNet<f32> {
        let mut net = MnasNet::new(alpha, num_classes, 0.0).unwrap();
        net.fill_state(0.02);
        net.eval();
        net
    }

    #[test]
    fn test_rejects_bad_arguments_before_building() {
        init_logger();
        assert!(matches!(MnasNet::<f32>::new(0.0, 1000, 0.0), Err(ModelError::InvalidWidthMultiplier(_))));
        assert!(matches!(MnasNet::<f32>::new(-0.5, 1000, 0.0), Err(ModelError::InvalidWidthMultiplier(_))));
        assert!(matches!(MnasNet::<f32>::new(1.0, 0, 0.0), Err(ModelError::InvalidClassCount)));
        assert!(matches!(MnasNet::<f32>::new(1.0, 10, 1.5), Err(ModelError::InvalidDropout(_))));
    }

    #[test]
    fn test_layout_and_names() {
        let net: MnasNet<f32> = MnasNet::new(1.0, 1000, 0.0).unwrap();
        assert_eq!(net.features().len(), 20);
        assert_eq!(net.depths(), [32, 16, 24, 40, 80, 96, 192, 320]);
        assert_eq!(MnasNet::<f32>::VERSION, 2);

        let names: Vec<String> = net.named_parameters("").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.first().map(String::as_str), Some("layers.0.weight"));
        assert_eq!(names.last().map(String::as_str), Some("classifier.bias"));
        assert!(names.contains(&"layers.3.weight".to_string()));
        assert!(names.contains(&"layers.9.2.layers.3.weight".to_string()));
        assert!(names.contains(&"layers.14.0.layers.7.bias".to_string()));
        assert!(names.contains(&"layers.16.weight".to_string()));

        let buffers: Vec<String> = net.named_buffers("").into_iter().map(|(n, _)| n).collect();
        assert!(buffers.contains(&"layers.1._mean".to_string()));
        assert!(buffers.contains(&"layers.13.3.layers.4._variance".to_string()));
        assert!(!names.iter().any(|n| n.contains("running")));
    }

    #[test]
    fn test_stem_shapes() {
        let net: MnasNet<f32> = MnasNet::new(1.0, 1000, 0.0).unwrap();
        let shape = |name: &str| {
            net.named_parameters("")
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| p.shape_vec())
        };
        assert_eq!(shape("layers.0.weight"), Some(vec![32, 3, 3, 3]));
        assert_eq!(shape("layers.3.weight"), Some(vec![32, 1, 3, 3]));
        assert_eq!(shape("layers.6.weight"), Some(vec![16, 32, 1, 1]));
        assert_eq!(shape("layers.15.weight"), Some(vec![1280, 320, 1, 1]));
        assert_eq!(shape("classifier.weight"), Some(vec![1280, 1000]));
    }

    #[test]
    fn test_parameter_counts() {
        let count = |alpha| MnasNet::<f32>::new(alpha, 1000, 0.0).unwrap().num_parameters();
        assert_eq!(count(0.5), 2_218_512);
        assert_eq!(count(0.75), 3_170_208);
        assert_eq!(count(1.0), 4_383_312);
        assert_eq!(count(1.3), 6_282_256);
    }

    #[test]
    fn test_output_shape_small_input() {
        let net: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        let x: Tensor<f32> = Tensor::full(vec![2, 3, 64, 64], 0.01);
        let y = net.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 10]);
        assert!(y.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_output_shape_imagenet_resolution() {
        let mut net: MnasNet<f32> = MnasNet::new(0.5, 1000, 0.0).unwrap();
        net.eval();
        let x: Tensor<f32> = Tensor::full(vec![2, 3, 224, 224], 0.01);
        assert_eq!(net.forward(&x).unwrap().shape_vec(), vec![2, 1000]);
    }

    #[test]
    fn test_rejects_non_rgb_input() {
        let net: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        let gray: Tensor<f32> = Tensor::zeros(vec![1, 1, 32, 32]);
        assert!(matches!(net.forward(&gray), Err(TensorError::ShapeMismatch { .. })));
        let flat: Tensor<f32> = Tensor::zeros(vec![1, 3]);
        assert!(net.forward(&flat).is_err());
    }

    #[test]
    fn test_constant_weights_score_every_class_equally() {
        let net = constant_net(0.5, 7);
        let x: Tensor<f32> = Tensor::full(vec![1, 3, 32, 32], 0.01);
        let y = net.forward(&x).unwrap();
        let first = y.data()[0];
        assert!(y.data().iter().all(|&v| v == first));
    }

    #[test]
    fn test_classifier_is_affine_over_pooled_features() {
        let net = constant_net(0.5, 3);
        let x: Tensor<f32> = Tensor::full(vec![1, 3, 64, 64], 0.01);
        let features = net.features().forward(&x).unwrap();
        assert_eq!(features.shape_vec(), vec![1, FEATURE_WIDTH]);

        let expected = 0.02 * features.sum_all() + 0.02;
        let y = net.forward(&x).unwrap();
        for &v in y.data() {
            approx::assert_relative_eq!(v, expected, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_constant_network_is_bit_reproducible() {
        init_logger();
        let a = constant_net(1.0, 1000);
        let b = constant_net(1.0, 1000);
        let x: Tensor<f32> = Tensor::full(vec![1, 3, 224, 224], 0.01);

        for (name, buffer) in a.named_buffers("") {
            assert!(buffer.data().iter().all(|&v| v == 0.02), "{} was not filled", name);
        }

        let ya = a.forward(&x).unwrap();
        let yb = b.forward(&x).unwrap();
        assert_eq!(ya.shape_vec(), vec![1, 1000]);
        assert!(ya.data().iter().all(|v| v.is_finite()));
        let bits = |t: &Tensor<f32>| t.data().iter().map(|v| v.to_bits()).collect::<Vec<u32>>();
        assert_eq!(bits(&ya), bits(&yb));
    }

    #[test]
    fn test_fill_parameters_keeps_running_stats() {
        let mut net: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        net.fill_parameters(0.02);
        assert!(net.parameters().iter().all(|p| p.data().iter().all(|&v| v == 0.02)));
        let buffers = net.named_buffers("");
        let (_, mean) = &buffers[0];
        let (_, var) = &buffers[1];
        assert_eq!(buffers[0].0, "layers.1._mean");
        assert!(mean.data().iter().all(|&v| v == 0.0));
        assert!(var.data().iter().all(|&v| v == 1.0));

        net.fill_state(0.02);
        assert!(net.named_buffers("").iter().all(|(_, b)| b.data().iter().all(|&v| v == 0.02)));
    }

    #[test]
    fn test_empty_batch_in_training_keeps_running_stats() {
        let mut net: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        let before = net.named_buffers("");
        let empty: Tensor<f32> = Tensor::zeros(vec![0, 3, 32, 32]);
        assert!(matches!(net.forward(&empty), Err(TensorError::InvalidOperation(_))));
        assert_eq!(before, net.named_buffers(""));

        net.eval();
        let x: Tensor<f32> = Tensor::full(vec![1, 3, 32, 32], 0.01);
        assert!(net.forward(&x).unwrap().data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        let b: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        assert_eq!(a.parameters(), b.parameters());

        let c: MnasNet<f32> = MnasNet::from_config(&MnasNetConfig::new(0.5).with_num_classes(10).with_seed(Some(7))).unwrap();
        assert_ne!(a.parameters(), c.parameters());
    }

    #[test]
    fn test_training_mode_updates_running_stats() {
        let mut net: MnasNet<f32> = MnasNet::new(0.5, 10, 0.0).unwrap();
        let before = net.named_buffers("");
        let x: Tensor<f32> = Tensor::full(vec![2, 3, 32, 32], 0.5);
        net.forward(&x).unwrap();
        assert_ne!(before, net.named_buffers(""));

        net.eval();
        let frozen = net.named_buffers("");
        net.forward(&x).unwrap();
        assert_eq!(frozen, net.named_buffers(""));
    }

    #[test]
    fn test_dropout_is_recorded_only() {
        let net: MnasNet<f32> = MnasNet::new(1.0, 10, 0.2).unwrap();
        assert_eq!(net.dropout(), 0.2);
        assert_eq!(net.classifier().in_features, FEATURE_WIDTH);
        assert_eq!(net.alpha(), 1.0);
        assert_eq!(net.num_classes(), 10);
    }
}
