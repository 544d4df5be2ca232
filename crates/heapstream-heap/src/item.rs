use bytes::{Bytes, BytesMut};

use crate::descriptor::Descriptor;
use crate::dtype::{DType, Element};
use crate::error::{HeapError, Result};
use crate::heap::MAX_IMMEDIATE_SIZE;
use crate::ItemId;

/// A typed, versioned value.
///
/// Values are stored in their wire form: big-endian elements, row-major.
/// The version starts at 0 and increases on every successful assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    descriptor: Descriptor,
    value: Option<Bytes>,
    version: u64,
    allow_immediate: bool,
}

impl Item {
    pub(crate) fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            value: None,
            version: 0,
            allow_immediate: false,
        }
    }

    pub fn id(&self) -> ItemId {
        self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    pub fn shape(&self) -> &[u64] {
        &self.descriptor.shape
    }

    pub fn dtype(&self) -> DType {
        self.descriptor.dtype
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Current raw value, if one has been set.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Byte length the value must have.
    pub fn size_bytes(&self) -> usize {
        self.descriptor.size_bytes()
    }

    /// Whether small values may travel inside their item pointer.
    pub fn allow_immediate(&self) -> bool {
        self.allow_immediate
    }

    /// Let values of up to 5 bytes travel inside their item pointer.
    pub fn set_allow_immediate(&mut self, allow: bool) {
        self.allow_immediate = allow && self.size_bytes() <= MAX_IMMEDIATE_SIZE;
    }

    /// Assign a raw big-endian value.
    pub fn set_value(&mut self, value: impl Into<Bytes>) -> Result<()> {
        let value = value.into();
        let expected = self.size_bytes();
        if value.len() != expected {
            return Err(HeapError::ShapeMismatch {
                id: self.id(),
                expected,
                actual: value.len(),
            });
        }
        self.value = Some(value);
        self.version += 1;
        Ok(())
    }

    /// Assign a single element. The item must hold exactly one element.
    pub fn set_scalar<T: Element>(&mut self, value: T) -> Result<()> {
        self.set_elements(&[value])
    }

    /// Assign all elements, row-major.
    pub fn set_elements<T: Element>(&mut self, values: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        let mut buf = BytesMut::with_capacity(values.len() * T::DTYPE.size());
        for value in values {
            value.put_be(&mut buf);
        }
        self.set_value(buf.freeze())
    }

    /// Read the single element of a scalar item.
    pub fn scalar<T: Element>(&self) -> Result<T> {
        self.check_type::<T>()?;
        let mut raw = self.raw_value()?.clone();
        if raw.len() != T::DTYPE.size() {
            return Err(HeapError::ShapeMismatch {
                id: self.id(),
                expected: T::DTYPE.size(),
                actual: raw.len(),
            });
        }
        Ok(T::get_be(&mut raw))
    }

    /// Read all elements, row-major.
    pub fn elements<T: Element>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let mut raw = self.raw_value()?.clone();
        let mut values = Vec::with_capacity(raw.len() / T::DTYPE.size());
        while raw.len() >= T::DTYPE.size() {
            values.push(T::get_be(&mut raw));
        }
        Ok(values)
    }

    fn raw_value(&self) -> Result<&Bytes> {
        self.value.as_ref().ok_or(HeapError::MissingValue(self.id()))
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype() {
            return Err(HeapError::TypeMismatch {
                id: self.id(),
                actual: self.dtype(),
                requested: T::DTYPE,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(shape: Vec<u64>, dtype: DType) -> Item {
        Item::new(Descriptor::new(0x1000, "test", "", shape, dtype))
    }

    #[test]
    fn set_value_bumps_version() {
        let mut cat = item(vec![], DType::U32);
        assert_eq!(cat.version(), 0);
        assert!(cat.value().is_none());

        cat.set_value(vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(cat.version(), 1);
        assert_eq!(cat.value().unwrap().as_ref(), &[0xDE, 0xAD, 0xBE, 0xEF]);

        cat.set_scalar(7u32).unwrap();
        assert_eq!(cat.version(), 2);
        assert_eq!(cat.scalar::<u32>().unwrap(), 7);
    }

    #[test]
    fn wrong_length_rejected_without_side_effects() {
        let mut cat = item(vec![], DType::U32);
        let err = cat.set_value(vec![1u8, 2, 3]).unwrap_err();

        assert!(matches!(
            err,
            HeapError::ShapeMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
        assert_eq!(cat.version(), 0);
        assert!(cat.value().is_none());
    }

    #[test]
    fn matrix_elements_roundtrip() {
        let mut matrix = item(vec![4, 4], DType::I32);
        let values: Vec<i32> = (-8..8).collect();
        matrix.set_elements(&values).unwrap();

        assert_eq!(matrix.value().unwrap().len(), 64);
        assert_eq!(matrix.elements::<i32>().unwrap(), values);
    }

    #[test]
    fn typed_access_checks_dtype() {
        let mut cat = item(vec![], DType::U32);
        assert!(matches!(
            cat.set_scalar(1.0f32),
            Err(HeapError::TypeMismatch { .. })
        ));
        cat.set_scalar(1u32).unwrap();
        assert!(matches!(
            cat.scalar::<i32>(),
            Err(HeapError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn scalar_on_array_is_shape_mismatch() {
        let mut vector = item(vec![3], DType::U8);
        vector.set_elements(&[1u8, 2, 3]).unwrap();
        assert!(matches!(
            vector.scalar::<u8>(),
            Err(HeapError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reading_unset_value() {
        let cat = item(vec![], DType::F64);
        assert!(matches!(
            cat.scalar::<f64>(),
            Err(HeapError::MissingValue(0x1000))
        ));
    }

    #[test]
    fn immediate_only_for_small_items() {
        let mut small = item(vec![], DType::U32);
        small.set_allow_immediate(true);
        assert!(small.allow_immediate());

        let mut large = item(vec![], DType::U64);
        large.set_allow_immediate(true);
        assert!(!large.allow_immediate());
    }
}
