//! Shape-typed contiguous `f32` buffers: the currency between
//! preprocessing and inference.
//!
//! Layout is always row-major (last axis fastest).  The spatial models
//! consume `[batch, channel, height, width]`; the temporal ejection-fraction
//! model consumes `[batch, channel, frame, height, width]`.
//!
//! Invariant: `data.len() == shape.numel()`.  Constructors enforce it and
//! every accessor bounds-checks, so out-of-range indexing surfaces as
//! [`EngineError::IndexOutOfRange`] instead of a panic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Dimensions of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Product of all dimensions.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied()
    }

    /// Flat row-major offset of `index`, or an error if any coordinate is
    /// out of range or the rank differs.
    pub fn offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.0.len() || index.iter().zip(&self.0).any(|(i, d)| i >= d) {
            return Err(EngineError::IndexOutOfRange {
                index: index.to_vec(),
                shape: self.0.clone(),
            });
        }
        Ok(index
            .iter()
            .zip(&self.0)
            .fold(0usize, |acc, (&i, &d)| acc * d + i))
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

/// A dense `f32` tensor with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl Tensor {
    /// Wrap `data` with `shape`.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShapeMismatch`] when `data.len()` differs from the
    /// product of the dimensions.
    pub fn new(shape: impl Into<TensorShape>, data: Vec<f32>) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != data.len() {
            return Err(EngineError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// A zero-filled tensor.
    pub fn zeros(shape: impl Into<TensorShape>) -> Self {
        let shape = shape.into();
        let data = vec![0.0; shape.numel()];
        Self { shape, data }
    }

    /// A rank-0-like scalar stored as shape `[1]`.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: TensorShape::from([1]),
            data: vec![value],
        }
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<f32> {
        let off = self.shape.offset(index)?;
        Ok(self.data[off])
    }

    /// Overwrite the element at a multi-dimensional index.
    pub fn set(&mut self, index: &[usize], value: f32) -> Result<()> {
        let off = self.shape.offset(index)?;
        self.data[off] = value;
        Ok(())
    }

    /// Reinterpret with a new shape of identical element count.
    pub fn reshape(self, shape: impl Into<TensorShape>) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != self.data.len() {
            return Err(EngineError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                actual: self.shape.dims().to_vec(),
            });
        }
        Ok(Self {
            shape,
            data: self.data,
        })
    }

    /// Require an exact rank, returning `ShapeMismatch` otherwise.
    pub fn expect_rank(&self, rank: usize) -> Result<()> {
        if self.ndim() != rank {
            return Err(EngineError::ShapeMismatch {
                expected: vec![0; rank],
                actual: self.dims().to_vec(),
            });
        }
        Ok(())
    }

    /// First element, if any.  Scalar model heads arrive as `[1]` or `[1, 1]`.
    pub fn first(&self) -> Option<f32> {
        self.data.first().copied()
    }

    /// Copy `src` into the contiguous run starting at `index`.
    pub fn write_run(&mut self, index: &[usize], src: &[f32]) -> Result<()> {
        let off = self.shape.offset(index)?;
        let end = off + src.len();
        if end > self.data.len() {
            return Err(EngineError::IndexOutOfRange {
                index: index.to_vec(),
                shape: self.shape.dims().to_vec(),
            });
        }
        self.data[off..end].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_must_match_shape() {
        assert!(Tensor::new([1, 2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new([1, 2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));
    }

    #[test]
    fn offsets_are_row_major() {
        let shape = TensorShape::from([2, 3, 4]);
        assert_eq!(shape.offset(&[0, 0, 0]).unwrap(), 0);
        assert_eq!(shape.offset(&[0, 0, 3]).unwrap(), 3);
        assert_eq!(shape.offset(&[0, 1, 0]).unwrap(), 4);
        assert_eq!(shape.offset(&[1, 2, 3]).unwrap(), 23);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut t = Tensor::zeros([1, 1, 2, 2]);
        assert!(matches!(
            t.get(&[0, 0, 2, 0]),
            Err(EngineError::IndexOutOfRange { .. })
        ));
        assert!(t.set(&[0, 0, 1], 1.0).is_err());
        t.set(&[0, 0, 1, 1], 0.5).unwrap();
        assert_eq!(t.get(&[0, 0, 1, 1]).unwrap(), 0.5);
    }

    #[test]
    fn reshape_preserves_data() {
        let t = Tensor::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let r = t.reshape([1, 4]).unwrap();
        assert_eq!(r.dims(), &[1, 4]);
        assert_eq!(r.get(&[0, 3]).unwrap(), 4.0);
        assert!(r.reshape([3]).is_err());
    }

    #[test]
    fn display_lists_dimensions() {
        assert_eq!(TensorShape::from([1, 3, 112, 112]).to_string(), "[1, 3, 112, 112]");
    }
}
