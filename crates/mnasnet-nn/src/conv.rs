use mnasnet_core::{Float, Initializer, Tensor, TensorError, TensorResult};
use rayon::prelude::*;

use super::layers::{qualified_name, Layer};

/// Stride, padding, grouping and bias settings for [`Conv2D`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2DOptions {
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    pub bias: bool,
}

impl Conv2DOptions {
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

impl Default for Conv2DOptions {
    fn default() -> Self {
        Conv2DOptions { stride: 1, padding: 0, groups: 1, bias: true }
    }
}

/// 2D Convolution layer with zero padding and channel groups.
///
/// Input shape:  [batch, in_channels, height, width]
/// Output shape: [batch, out_channels, out_h, out_w]
/// where out_h = (height + 2 * padding - kernel_size) / stride + 1
///
/// `groups == in_channels == out_channels` gives a depthwise convolution;
/// `kernel_size == 1` a pointwise one.
pub struct Conv2D<T: Float> {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    pub weight: Tensor<T>,       // [out_channels, in_channels / groups, kH, kW]
    pub bias: Option<Tensor<T>>, // [out_channels]
}

impl<T: Float> Conv2D<T> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        options: Conv2DOptions,
        init: &mut Initializer,
    ) -> TensorResult<Self> {
        let Conv2DOptions { stride, padding, groups, bias } = options;
        if kernel_size == 0 || stride == 0 || groups == 0 {
            return Err(TensorError::InvalidOperation(format!(
                "Conv2D needs positive kernel size, stride and groups, got k={} s={} g={}",
                kernel_size, stride, groups
            )));
        }
        if in_channels % groups != 0 || out_channels % groups != 0 {
            return Err(TensorError::InvalidOperation(format!(
                "Conv2D channels {} -> {} are not divisible by {} groups",
                in_channels, out_channels, groups
            )));
        }

        let fan_in = in_channels / groups * kernel_size * kernel_size;
        let weight = init.kaiming_uniform(
            vec![out_channels, in_channels / groups, kernel_size, kernel_size],
            fan_in,
        );
        let bias = bias.then(|| Tensor::zeros(vec![out_channels]));

        Ok(Conv2D {
            in_channels, out_channels, kernel_size, stride, padding, groups,
            weight,
            bias,
        })
    }

    /// Compute output spatial dimension.
    fn out_dim(&self, input_dim: usize) -> TensorResult<usize> {
        let padded = input_dim + 2 * self.padding;
        if padded < self.kernel_size {
            return Err(TensorError::InvalidOperation(format!(
                "Conv2D kernel {} does not fit padded input extent {}",
                self.kernel_size, padded
            )));
        }
        Ok((padded - self.kernel_size) / self.stride + 1)
    }
}

impl<T: Float> Layer<T> for Conv2D<T> {
    fn name(&self) -> &'static str {
        "Conv2D"
    }

    /// Direct convolution. Each `(batch, out_channel)` output plane is an
    /// independent rayon task; inside a plane the accumulation order is fixed
    /// (bias, then input channel, kernel row, kernel column), so repeated calls
    /// produce identical bits.
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, in_c, h, w) = input.shape().nchw()?;
        if in_c != self.in_channels {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, self.in_channels, h, w],
                got: input.shape_vec(),
            });
        }
        let out_h = self.out_dim(h)?;
        let out_w = self.out_dim(w)?;
        let out_plane = out_h * out_w;

        let k = self.kernel_size;
        let (stride, pad) = (self.stride, self.padding as isize);
        let in_per_group = self.in_channels / self.groups;
        let out_per_group = self.out_channels / self.groups;
        let out_c = self.out_channels;

        let x = input.data();
        let weight = self.weight.data();
        let bias = self.bias.as_ref().map(|b| b.data());

        let mut output = vec![T::ZERO; batch * out_c * out_plane];
        output
            .par_chunks_mut(out_plane.max(1))
            .enumerate()
            .for_each(|(idx, plane)| {
                let (b, oc) = (idx / out_c, idx % out_c);
                let group = oc / out_per_group;
                if let Some(bias) = bias {
                    plane.iter_mut().for_each(|y| *y = bias[oc]);
                }

                for j in 0..in_per_group {
                    let ic = group * in_per_group + j;
                    let src = &x[(b * in_c + ic) * h * w..(b * in_c + ic + 1) * h * w];
                    let kernel = &weight[(oc * in_per_group + j) * k * k..(oc * in_per_group + j + 1) * k * k];

                    for kh in 0..k {
                        for kw in 0..k {
                            let wv = kernel[kh * k + kw];
                            for oy in 0..out_h {
                                let iy = (oy * stride + kh) as isize - pad;
                                if iy < 0 || iy >= h as isize {
                                    continue;
                                }
                                let row = &src[iy as usize * w..(iy as usize + 1) * w];
                                let dst = &mut plane[oy * out_w..(oy + 1) * out_w];
                                for (ox, y) in dst.iter_mut().enumerate() {
                                    let ix = (ox * stride + kw) as isize - pad;
                                    if ix >= 0 && (ix as usize) < w {
                                        *y += wv * row[ix as usize];
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Tensor::new(output, vec![batch, out_c, out_h, out_w])
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

/// Adaptive Average Pooling 2D.
///
/// Only a 1×1 output (global average pooling) is supported.
pub struct AdaptiveAvgPool2D {
    pub output_size: usize,
}

impl AdaptiveAvgPool2D {
    pub fn new(output_size: usize) -> TensorResult<Self> {
        if output_size != 1 {
            return Err(TensorError::InvalidOperation(format!(
                "AdaptiveAvgPool2D supports output size 1 only, got {}",
                output_size
            )));
        }
        Ok(AdaptiveAvgPool2D { output_size })
    }
}

impl<T: Float> Layer<T> for AdaptiveAvgPool2D {
    fn name(&self) -> &'static str {
        "AdaptiveAvgPool2D"
    }

    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, channels, h, w) = input.shape().nchw()?;
        let area = h * w;
        if area == 0 {
            return Err(TensorError::InvalidOperation(
                "AdaptiveAvgPool2D on an empty spatial extent".to_string(),
            ));
        }
        let denom = T::from_usize(area);
        let output: Vec<T> = input
            .data()
            .par_chunks(area)
            .map(|plane| plane.iter().copied().sum::<T>() / denom)
            .collect();
        Tensor::new(output, vec![batch, channels, 1, 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: Vec<usize>) -> Tensor<f64> {
        let n: usize = shape.iter().product();
        Tensor::new((0..n).map(|i| i as f64).collect(), shape).unwrap()
    }

    #[test]
    fn test_conv2d_shape() {
        let input = ramp(vec![1, 1, 4, 4]);
        let conv: Conv2D<f64> = Conv2D::new(1, 2, 3, Conv2DOptions::default(), &mut Initializer::default()).unwrap();
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 2, 2, 2]); // (4-3)/1+1 = 2
    }

    #[test]
    fn test_conv2d_padding_and_stride() {
        let input = ramp(vec![2, 3, 224, 224]);
        let opts = Conv2DOptions::default().with_stride(2).with_padding(1).with_bias(false);
        let conv: Conv2D<f64> = Conv2D::new(3, 8, 3, opts, &mut Initializer::default()).unwrap();
        assert!(conv.bias.is_none());
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape_vec(), vec![2, 8, 112, 112]);
    }

    #[test]
    fn test_conv2d_known_values() {
        // 3x3 ones kernel with padding 1 over a 3x3 ramp sums each neighbourhood
        let input = ramp(vec![1, 1, 3, 3]);
        let opts = Conv2DOptions::default().with_padding(1).with_bias(false);
        let mut conv: Conv2D<f64> = Conv2D::new(1, 1, 3, opts, &mut Initializer::default()).unwrap();
        conv.weight.fill(1.0);
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.data(), &[8.0, 15.0, 12.0, 21.0, 36.0, 27.0, 20.0, 33.0, 24.0]);
    }

    #[test]
    fn test_depthwise_keeps_channels_independent() {
        let mut data = vec![0.0; 2 * 4 * 4];
        data[16..].iter_mut().for_each(|x| *x = 1.0); // only channel 1 is non-zero
        let input = Tensor::new(data, vec![1, 2, 4, 4]).unwrap();

        let opts = Conv2DOptions::default().with_padding(1).with_groups(2).with_bias(false);
        let mut conv: Conv2D<f64> = Conv2D::new(2, 2, 3, opts, &mut Initializer::default()).unwrap();
        assert_eq!(conv.weight.shape_vec(), vec![2, 1, 3, 3]);
        conv.weight.fill(1.0);

        let out = conv.forward(&input).unwrap();
        assert!(out.data()[..16].iter().all(|&v| v == 0.0));
        assert_eq!(out.get(&[0, 1, 1, 1]).unwrap(), 9.0);
        assert_eq!(out.get(&[0, 1, 0, 0]).unwrap(), 4.0);
    }

    #[test]
    fn test_pointwise_with_bias() {
        let input = Tensor::full(vec![1, 4, 2, 2], 0.5);
        let mut conv: Conv2D<f64> = Conv2D::new(4, 3, 1, Conv2DOptions::default(), &mut Initializer::default()).unwrap();
        conv.weight.fill(1.0);
        conv.bias.as_mut().unwrap().fill(0.25);
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 3, 2, 2]);
        assert!(out.data().iter().all(|&v| v == 2.25));
    }

    #[test]
    fn test_conv2d_validation() {
        let mut init = Initializer::default();
        let bad_groups = Conv2DOptions::default().with_groups(3);
        assert!(Conv2D::<f32>::new(4, 4, 3, bad_groups, &mut init).is_err());

        let conv: Conv2D<f32> = Conv2D::new(3, 4, 3, Conv2DOptions::default(), &mut init).unwrap();
        let wrong_channels: Tensor<f32> = Tensor::ones(vec![1, 4, 8, 8]);
        assert!(matches!(conv.forward(&wrong_channels), Err(TensorError::ShapeMismatch { .. })));
        let too_small: Tensor<f32> = Tensor::ones(vec![1, 3, 2, 2]);
        assert!(conv.forward(&too_small).is_err());
    }

    #[test]
    fn test_conv2d_is_deterministic() {
        let input = ramp(vec![1, 8, 16, 16]).apply(|v| v * 0.01);
        let opts = Conv2DOptions::default().with_padding(2).with_stride(2);
        let conv: Conv2D<f64> = Conv2D::new(8, 16, 5, opts, &mut Initializer::new(Some(3))).unwrap();
        assert_eq!(conv.forward(&input).unwrap(), conv.forward(&input).unwrap());
    }

    #[test]
    fn test_global_avg_pool() {
        let input = ramp(vec![1, 2, 2, 2]);
        let pool = AdaptiveAvgPool2D::new(1).unwrap();
        let out = Layer::<f64>::forward(&pool, &input).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 2, 1, 1]);
        assert_eq!(out.data(), &[1.5, 5.5]);

        assert!(AdaptiveAvgPool2D::new(7).is_err());
    }
}
