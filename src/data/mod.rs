//! Data module: pack/unpack buffers and type-erased per-entity fields.

pub mod field;
pub mod typed_buffer;

pub use field::{DataType, FieldData, FieldScalar, WrappedField};
pub use typed_buffer::TypedBuffer;
