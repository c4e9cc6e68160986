//! Dense `f32` tensors passed to and returned from networks.

use std::fmt;

/// An N-dimensional row-major array of `f32`.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor from its shape and flat data.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> anyhow::Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            anyhow::bail!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            );
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Creates a 4-dimensional tensor by invoking `f` with every index, in row-major order.
    pub fn from_shape_fn<F: FnMut([usize; 4]) -> f32>(shape: [usize; 4], mut f: F) -> Self {
        let [a, b, c, d] = shape;
        let mut data = Vec::with_capacity(a * b * c * d);
        for i in 0..a {
            for j in 0..b {
                for k in 0..c {
                    for l in 0..d {
                        data.push(f([i, j, k, l]));
                    }
                }
            }
        }
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{:?}", self.shape)
    }
}
