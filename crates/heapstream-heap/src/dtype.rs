//! Element types and their big-endian encoding.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};

/// Element type of an item value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// All supported element types.
    pub const ALL: [DType; 10] = [
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F32,
        DType::F64,
    ];

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Width of one element in bits, as carried in a descriptor format.
    pub const fn bits(self) -> u32 {
        (self.size() * 8) as u32
    }

    /// Format code carried in a descriptor: `u`, `i` or `f`.
    pub const fn code(self) -> u8 {
        match self {
            DType::U8 | DType::U16 | DType::U32 | DType::U64 => b'u',
            DType::I8 | DType::I16 | DType::I32 | DType::I64 => b'i',
            DType::F32 | DType::F64 => b'f',
        }
    }

    /// Resolve a descriptor format field.
    ///
    /// 8-bit character (`c`) and boolean (`b`) fields are read as `U8`.
    pub fn from_format(code: u8, bits: u32) -> Option<DType> {
        match (code, bits) {
            (b'u', 8) | (b'c', 8) | (b'b', 8) => Some(DType::U8),
            (b'u', 16) => Some(DType::U16),
            (b'u', 32) => Some(DType::U32),
            (b'u', 64) => Some(DType::U64),
            (b'i', 8) => Some(DType::I8),
            (b'i', 16) => Some(DType::I16),
            (b'i', 32) => Some(DType::I32),
            (b'i', 64) => Some(DType::I64),
            (b'f', 32) => Some(DType::F32),
            (b'f', 64) => Some(DType::F64),
            _ => None,
        }
    }

    /// Short lowercase name (`u8`, `f64`, ...).
    pub const fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 | DType::F32 | DType::F64
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        DType::ALL
            .into_iter()
            .find(|dtype| dtype.name() == lower)
            .ok_or_else(|| {
                format!("unknown element type '{s}' (expected one of u8..u64, i8..i64, f32, f64)")
            })
    }
}

/// A Rust scalar type that maps onto a [`DType`].
pub trait Element: Copy + Send + Sync + 'static {
    /// The matching element type.
    const DTYPE: DType;

    /// Append the big-endian encoding of `self`.
    fn put_be(self, dst: &mut impl BufMut);

    /// Read one big-endian element. `src` must hold at least
    /// `Self::DTYPE.size()` bytes.
    fn get_be(src: &mut impl Buf) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident, $put:ident, $get:ident;)*) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn put_be(self, dst: &mut impl BufMut) {
                    dst.$put(self);
                }

                fn get_be(src: &mut impl Buf) -> Self {
                    src.$get()
                }
            }
        )*
    };
}

impl_element! {
    u8 => U8, put_u8, get_u8;
    u16 => U16, put_u16, get_u16;
    u32 => U32, put_u32, get_u32;
    u64 => U64, put_u64, get_u64;
    i8 => I8, put_i8, get_i8;
    i16 => I16, put_i16, get_i16;
    i32 => I32, put_i32, get_i32;
    i64 => I64, put_i64, get_i64;
    f32 => F32, put_f32, get_f32;
    f64 => F64, put_f64, get_f64;
}
