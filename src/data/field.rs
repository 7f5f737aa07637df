//! WrappedField: a type-erased view over one application array.
//!
//! The storage is a closed set of scalar variants ([`FieldData`]); code that
//! only moves rows around (packing, compaction, synchronization) works on the
//! byte view and never needs the element type. Typed access goes through
//! [`FieldScalar`] and fails with [`CommPatternError::TypeMismatch`] instead of
//! reinterpreting memory.

use std::fmt::Debug;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::data::typed_buffer::TypedBuffer;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::pattern_error::CommPatternError;

/// Scalar type tag of a field's storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `u64`; the only type allowed for the global-id field.
    Uint,
    /// `i64`
    Int,
    /// `f64`
    Real,
    /// `f32`
    Float,
    /// `u32`
    Index,
}

impl DataType {
    /// Size in bytes of one scalar.
    pub const fn element_size(self) -> usize {
        match self {
            DataType::Uint | DataType::Int | DataType::Real => 8,
            DataType::Float | DataType::Index => 4,
        }
    }
}

/// Backing storage, one variant per supported scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldData {
    Uint(Vec<u64>),
    Int(Vec<i64>),
    Real(Vec<f64>),
    Float(Vec<f32>),
    Index(Vec<u32>),
}

macro_rules! with_vec {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            FieldData::Uint($v) => $body,
            FieldData::Int($v) => $body,
            FieldData::Real($v) => $body,
            FieldData::Float($v) => $body,
            FieldData::Index($v) => $body,
        }
    };
}

impl FieldData {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldData::Uint(_) => DataType::Uint,
            FieldData::Int(_) => DataType::Int,
            FieldData::Real(_) => DataType::Real,
            FieldData::Float(_) => DataType::Float,
            FieldData::Index(_) => DataType::Index,
        }
    }

    /// Number of scalars (not rows).
    pub fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        with_vec!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        with_vec!(self, v => bytemuck::cast_slice_mut(v.as_mut_slice()))
    }

    /// Resize to `len` scalars; new scalars are zero.
    pub fn resize(&mut self, len: usize) {
        with_vec!(self, v => v.resize(len, Default::default()))
    }

    fn retain_rows(&mut self, stride: usize, keep: &[bool]) {
        with_vec!(self, v => retain_rows_vec(v, stride, keep))
    }
}

/// Stable in-place compaction of `stride`-wide rows.
fn retain_rows_vec<T: Copy>(v: &mut Vec<T>, stride: usize, keep: &[bool]) {
    let mut write = 0;
    for (row, _) in keep.iter().enumerate().filter(|(_, k)| **k) {
        if write != row {
            v.copy_within(row * stride..(row + 1) * stride, write * stride);
        }
        write += 1;
    }
    v.truncate(write * stride);
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that can back a [`WrappedField`].
pub trait FieldScalar: Pod + Default + PartialEq + Debug + sealed::Sealed {
    const DATA_TYPE: DataType;
    fn view(data: &FieldData) -> Option<&[Self]>;
    fn view_mut(data: &mut FieldData) -> Option<&mut [Self]>;
    fn wrap(values: Vec<Self>) -> FieldData;
}

macro_rules! field_scalar {
    ($t:ty, $variant:ident) => {
        impl sealed::Sealed for $t {}
        impl FieldScalar for $t {
            const DATA_TYPE: DataType = DataType::$variant;
            #[inline]
            fn view(data: &FieldData) -> Option<&[Self]> {
                match data {
                    FieldData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
            #[inline]
            fn view_mut(data: &mut FieldData) -> Option<&mut [Self]> {
                match data {
                    FieldData::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }
            #[inline]
            fn wrap(values: Vec<Self>) -> FieldData {
                FieldData::$variant(values)
            }
        }
    };
}

field_scalar!(u64, Uint);
field_scalar!(i64, Int);
field_scalar!(f64, Real);
field_scalar!(f32, Float);
field_scalar!(u32, Index);

/// Named per-entity array with a stride and a dirty flag.
#[derive(Clone, Debug, PartialEq)]
pub struct WrappedField {
    name: String,
    stride: usize,
    data: FieldData,
    needs_update: bool,
}

impl WrappedField {
    /// Wrap `values` (row-major, `stride` scalars per entity).
    pub fn new<T: FieldScalar>(
        name: impl Into<String>,
        stride: usize,
        values: Vec<T>,
    ) -> Result<Self, CommPatternError> {
        let name = name.into();
        if stride == 0 || values.len() % stride != 0 {
            return Err(CommPatternError::StrideMismatch {
                found: values.len(),
                expected: stride,
                field: name,
            });
        }
        Ok(Self {
            name,
            stride,
            data: T::wrap(values),
            needs_update: false,
        })
    }

    /// `rows` zero-initialized entities.
    pub fn zeros<T: FieldScalar>(
        name: impl Into<String>,
        stride: usize,
        rows: usize,
    ) -> Result<Self, CommPatternError> {
        Self::new(name, stride, vec![T::default(); rows * stride])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entities (rows).
    pub fn size(&self) -> usize {
        self.data.len() / self.stride
    }

    /// Scalars per entity.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn element_size(&self) -> usize {
        self.data_type().element_size()
    }

    /// Bytes per entity on the wire.
    pub fn row_bytes(&self) -> usize {
        self.stride * self.element_size()
    }

    pub fn is_data_type<T: FieldScalar>(&self) -> bool {
        self.data_type() == T::DATA_TYPE
    }

    pub fn data(&self) -> &FieldData {
        &self.data
    }

    fn type_error<T: FieldScalar>(&self) -> CommPatternError {
        CommPatternError::TypeMismatch {
            field: self.name.clone(),
            expected: T::DATA_TYPE,
            found: self.data_type(),
        }
    }

    fn check_index(&self, lid: usize) -> Result<(), CommPatternError> {
        if lid < self.size() {
            Ok(())
        } else {
            Err(CommPatternError::IndexOutOfBounds {
                index: lid,
                len: self.size(),
            })
        }
    }

    // ----- dirty flag ------------------------------------------------------

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn mark_dirty(&mut self) {
        self.needs_update = true;
    }

    pub fn clear_update(&mut self) {
        self.needs_update = false;
    }

    // ----- typed access ----------------------------------------------------

    pub fn as_slice<T: FieldScalar>(&self) -> Result<&[T], CommPatternError> {
        T::view(&self.data).ok_or_else(|| self.type_error::<T>())
    }

    /// Mutable access to the whole array; marks the field dirty.
    pub fn as_mut_slice<T: FieldScalar>(&mut self) -> Result<&mut [T], CommPatternError> {
        if !self.is_data_type::<T>() {
            return Err(self.type_error::<T>());
        }
        self.needs_update = true;
        T::view_mut(&mut self.data).ok_or_else(|| CommPatternError::InvariantViolation(
            "field variant changed during access".into(),
        ))
    }

    pub fn row<T: FieldScalar>(&self, lid: usize) -> Result<&[T], CommPatternError> {
        self.check_index(lid)?;
        let s = self.stride;
        Ok(&self.as_slice::<T>()?[lid * s..(lid + 1) * s])
    }

    /// Mutable access to one row; marks the field dirty.
    pub fn row_mut<T: FieldScalar>(&mut self, lid: usize) -> Result<&mut [T], CommPatternError> {
        self.check_index(lid)?;
        let s = self.stride;
        Ok(&mut self.as_mut_slice::<T>()?[lid * s..(lid + 1) * s])
    }

    pub fn set_row<T: FieldScalar>(&mut self, lid: usize, values: &[T]) -> Result<(), CommPatternError> {
        if values.len() != self.stride {
            return Err(CommPatternError::StrideMismatch {
                field: self.name.clone(),
                expected: self.stride,
                found: values.len(),
            });
        }
        self.row_mut::<T>(lid)?.copy_from_slice(values);
        Ok(())
    }

    // ----- row movement ----------------------------------------------------

    /// Append the rows at `indices`, in order, to `buf`. Duplicates and any
    /// order are allowed. Nothing is written if an index is out of range.
    pub fn pack_rows(&self, indices: &[usize], buf: &mut TypedBuffer) -> Result<(), CommPatternError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.size()) {
            return Err(CommPatternError::IndexOutOfBounds {
                index: bad,
                len: self.size(),
            });
        }
        let rb = self.row_bytes();
        let bytes = self.data.as_bytes();
        buf.resize(buf.packed_size() + indices.len() * rb);
        for &i in indices {
            buf.extend_from_bytes(&bytes[i * rb..(i + 1) * rb]);
        }
        Ok(())
    }

    /// Scatter consecutive rows from `buf` into `indices`, in order. The
    /// field is left untouched if the buffer is short or an index is invalid.
    pub fn unpack_rows(&mut self, buf: &mut TypedBuffer, indices: &[usize]) -> Result<(), CommPatternError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.size()) {
            return Err(CommPatternError::IndexOutOfBounds {
                index: bad,
                len: self.size(),
            });
        }
        let rb = self.row_bytes();
        let need = indices.len() * rb;
        if need > buf.remaining() {
            return Err(CommPatternError::BufferUnderrun {
                requested: need,
                remaining: buf.remaining(),
            });
        }
        let dst = self.data.as_bytes_mut();
        for &i in indices {
            let src = buf.take_bytes(rb)?;
            dst[i * rb..(i + 1) * rb].copy_from_slice(src);
        }
        Ok(())
    }

    /// Grow or shrink to `rows` entities; new rows are zero.
    pub fn resize(&mut self, rows: usize) {
        self.data.resize(rows * self.stride);
    }

    /// Keep rows whose `keep` flag is set, preserving their relative order.
    pub fn retain_rows(&mut self, keep: &[bool]) -> Result<(), CommPatternError> {
        if keep.len() != self.size() {
            return Err(CommPatternError::FieldSizeMismatch {
                field: self.name.clone(),
                expected: keep.len(),
                found: self.size(),
            });
        }
        self.data.retain_rows(self.stride, keep);
        Ok(())
    }
}

impl DebugInvariants for WrappedField {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "WrappedField");
    }

    fn validate_invariants(&self) -> Result<(), CommPatternError> {
        ensure(self.stride > 0, || format!("field `{}` has zero stride", self.name))?;
        ensure(self.data.len() % self.stride == 0, || {
            format!(
                "field `{}` holds {} scalars, not a multiple of stride {}",
                self.name,
                self.data.len(),
                self.stride
            )
        })
    }
}
