use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use serde::{Deserialize, Serialize};

/// N-dimensional tensor, the value every layer consumes and produces.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout.
/// Image batches use `[batch, channels, height, width]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ONE)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Multi-dimensional indexing: compute flat offset from indices.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        if indices.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let strides = self.shape.strides();
        let mut offset = 0;
        for (i, &idx) in indices.iter().enumerate() {
            let dim_size = self.shape.dim(i)?;
            if idx >= dim_size {
                return Err(TensorError::IndexOutOfBounds {
                    index: idx,
                    axis: i,
                    size: dim_size,
                });
            }
            offset += idx * strides[i];
        }
        Ok(self.data[offset])
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Reshape the tensor (data remains the same, only shape changes).
    pub fn reshape(&self, new_shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        self.clone().into_reshaped(new_shape)
    }

    /// Reshape without copying the underlying buffer.
    pub fn into_reshaped(self, new_shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        let ns = Shape::new(new_shape);
        if self.numel() != ns.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: ns.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self.data,
            shape: ns,
        })
    }

    // ─── Element-wise Unary Operations ──────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// ReLU activation: max(0, x).
    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    // ─── Element-wise Binary Operations ─────────────────────────────────────

    fn zip_with<F: Fn(T, T) -> T>(&self, other: &Tensor<T>, op: F) -> TensorResult<Tensor<T>> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        let data: Vec<T> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| op(a, b))
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.zip_with(other, |a, b| a + b)
    }

    // ─── Reduction Operations ───────────────────────────────────────────────

    /// Sum of all elements.
    pub fn sum_all(&self) -> T {
        self.data.iter().copied().sum()
    }

    // ─── Linear Algebra ─────────────────────────────────────────────────────

    /// Matrix multiply of two 2-D tensors: `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(TensorError::InvalidOperation(
                "matmul requires two 2-D tensors".to_string(),
            ));
        }

        let (m, k) = (self.shape.dims()[0], self.shape.dims()[1]);
        let (k2, n) = (other.shape.dims()[0], other.shape.dims()[1]);
        if k != k2 {
            return Err(TensorError::DimensionMismatch(format!(
                "matmul: inner dimensions must match, got {} and {}",
                k, k2
            )));
        }

        let mut data = vec![T::ZERO; m * n];
        for i in 0..m {
            let row = &self.data[i * k..(i + 1) * k];
            let out = &mut data[i * n..(i + 1) * n];
            for (p, &a) in row.iter().enumerate() {
                let b_row = &other.data[p * n..(p + 1) * n];
                for (o, &b) in out.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        }
        Tensor::new(data, vec![m, n])
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let t: Tensor<f64> = Tensor::zeros(vec![1, 3, 4, 4]);
        assert_eq!(t.shape_vec(), vec![1, 3, 4, 4]);
        assert_eq!(t.numel(), 48);
        assert_eq!(t.sum_all(), 0.0);

        let t: Tensor<f32> = Tensor::full(vec![2, 3], 0.5);
        assert_eq!(t.sum_all(), 3.0);

        assert!(Tensor::<f32>::new(vec![1.0, 2.0], vec![3]).is_err());
    }

    #[test]
    fn test_get() {
        let data: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let t = Tensor::new(data, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(t.get(&[0, 1, 2, 3]).unwrap(), 23.0);
        assert_eq!(t.get(&[0, 1, 0, 0]).unwrap(), 12.0);
        assert!(matches!(
            t.get(&[0, 2, 0, 0]),
            Err(TensorError::IndexOutOfBounds { axis: 1, .. })
        ));
        assert!(t.get(&[0, 0]).is_err());
    }

    #[test]
    fn test_fill_and_relu() {
        let mut t = Tensor::new(vec![-1.0f32, 2.0, -3.0, 4.0], vec![2, 2]).unwrap();
        assert_eq!(t.relu().data(), &[0.0, 2.0, 0.0, 4.0]);
        t.fill(0.02);
        assert!(t.data().iter().all(|&x| x == 0.02));
    }

    #[test]
    fn test_add_requires_same_shape() {
        let a: Tensor<f64> = Tensor::ones(vec![1, 8, 4, 4]);
        let b: Tensor<f64> = Tensor::ones(vec![1, 8, 4, 4]);
        let c = a.add(&b).unwrap();
        assert_eq!(c.sum_all(), 256.0);

        let d: Tensor<f64> = Tensor::ones(vec![1, 16, 4, 4]);
        assert!(matches!(a.add(&d), Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reshape() {
        let t: Tensor<f64> = Tensor::ones(vec![2, 1280, 1, 1]);
        let r = t.reshape(vec![2, 1280]).unwrap();
        assert_eq!(r.shape_vec(), vec![2, 1280]);
        assert!(t.reshape(vec![3, 1280]).is_err());
    }

    #[test]
    fn test_matmul() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b = Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], vec![3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape_vec(), vec![2, 2]);
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);

        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_sum_all_accumulates_rounding() {
        // 0.1 is inexact in binary, so the sum is only close to 1
        let t: Tensor<f32> = Tensor::full(vec![10], 0.1);
        approx::assert_relative_eq!(t.sum_all(), 1.0, max_relative = 1e-6);
        let t: Tensor<f64> = Tensor::full(vec![2, 5], 0.1);
        approx::assert_relative_eq!(t.sum_all(), 1.0, epsilon = 1e-12);
    }
}
