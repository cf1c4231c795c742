//! Backend dispatch: every primitive read routes on the backend tag of the
//! current cursor frame.
//!
//! Each live backend implements the capability contracts below exactly
//! once; [`for_tag`] is the single exhaustive match that yields the backend
//! object, or the support error for the collaborator backends (HDF4, HDF5,
//! CDF, GRIB) whose decoders are not part of this build. A backend that
//! physically cannot represent a read type reports `InvalidType` through
//! the default method bodies.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::{ascii, bin, mem, netcdf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendTag {
    Ascii,
    Binary,
    Memory,
    NetCdf,
    Hdf4,
    Hdf5,
    Cdf,
    Grib,
}

/// Typed destination for bulk array reads; elements are the stored read
/// type, in C order.
pub(crate) enum ArrayDst<'d> {
    Int8(&'d mut [i8]),
    UInt8(&'d mut [u8]),
    Int16(&'d mut [i16]),
    UInt16(&'d mut [u16]),
    Int32(&'d mut [i32]),
    UInt32(&'d mut [u32]),
    Int64(&'d mut [i64]),
    UInt64(&'d mut [u64]),
    Float(&'d mut [f32]),
    Double(&'d mut [f64]),
    Char(&'d mut [u8]),
}

impl ArrayDst<'_> {
    pub(crate) fn len(&self) -> usize {
        match self {
            ArrayDst::Int8(s) => s.len(),
            ArrayDst::UInt8(s) => s.len(),
            ArrayDst::Int16(s) => s.len(),
            ArrayDst::UInt16(s) => s.len(),
            ArrayDst::Int32(s) => s.len(),
            ArrayDst::UInt32(s) => s.len(),
            ArrayDst::Int64(s) => s.len(),
            ArrayDst::UInt64(s) => s.len(),
            ArrayDst::Float(s) => s.len(),
            ArrayDst::Double(s) => s.len(),
            ArrayDst::Char(s) => s.len(),
        }
    }
}

macro_rules! scalar_contract {
    ($($fn_name:ident -> $ty:ty, $type_name:literal;)*) => {
        /// Scalar reads over the resolved location of the current frame.
        pub(crate) trait ScalarReader {
            fn name(&self) -> &'static str;

            $(
                fn $fn_name(&self, _cursor: &Cursor) -> Result<$ty> {
                    Err(Error::InvalidType(format!(
                        "can not read {} data from the {} backend",
                        $type_name,
                        self.name()
                    )))
                }
            )*

            /// Append the text payload of the current node to `dst`.
            fn read_string_into(&self, _cursor: &Cursor, _dst: &mut Vec<u8>) -> Result<()> {
                Err(Error::InvalidType(format!(
                    "can not read string data from the {} backend",
                    self.name()
                )))
            }
        }
    };
}

scalar_contract! {
    read_int8 -> i8, "int8";
    read_uint8 -> u8, "uint8";
    read_int16 -> i16, "int16";
    read_uint16 -> u16, "uint16";
    read_int32 -> i32, "int32";
    read_uint32 -> u32, "uint32";
    read_int64 -> i64, "int64";
    read_uint64 -> u64, "uint64";
    read_float -> f32, "float";
    read_double -> f64, "double";
    read_char -> u8, "char";
}

/// Raw bit/byte access relative to the current frame.
pub(crate) trait BitReader: ScalarReader {
    fn read_bits(
        &self,
        _cursor: &Cursor,
        _bit_offset: i64,
        _bit_length: i64,
        _dst: &mut [u8],
    ) -> Result<()> {
        Err(Error::InvalidType(format!(
            "can not read raw bits from the {} backend",
            self.name()
        )))
    }

    fn read_bytes(
        &self,
        _cursor: &Cursor,
        _offset: i64,
        _length: i64,
        _dst: &mut [u8],
    ) -> Result<()> {
        Err(Error::InvalidType(format!(
            "can not read raw bytes from the {} backend",
            self.name()
        )))
    }
}

/// Whole-array bulk read in C order; the coercion engine widens, converts
/// and transposes afterwards.
pub(crate) trait ArrayReader: ScalarReader {
    fn read_array(&self, cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()>;
}

/// Contiguous partial ("hyperslab") read in C order.
pub(crate) trait PartialArrayReader: ScalarReader {
    fn read_partial_array(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: ArrayDst<'_>,
    ) -> Result<()>;
}

pub(crate) trait Backend: ScalarReader + BitReader + ArrayReader + PartialArrayReader {}

/// The dispatch table. Exhaustive: every tag resolves to a backend or to
/// the error contract for external collaborator backends.
pub(crate) fn for_tag(tag: BackendTag) -> Result<&'static dyn Backend> {
    match tag {
        BackendTag::Ascii => Ok(&ascii::AsciiBackend),
        BackendTag::Binary => Ok(&bin::BinBackend),
        BackendTag::Memory => Ok(&mem::MemBackend),
        BackendTag::NetCdf => Ok(&netcdf::NetCdfBackend),
        BackendTag::Hdf4 => Err(Error::NoHdf4Support),
        BackendTag::Hdf5 => Err(Error::NoHdf5Support),
        BackendTag::Cdf => Err(Error::Product(
            "cdf products are not supported by this build".to_owned(),
        )),
        BackendTag::Grib => Err(Error::Product(
            "grib products are not supported by this build".to_owned(),
        )),
    }
}

fn backend(cursor: &Cursor) -> Result<&'static dyn Backend> {
    for_tag(cursor.backend_tag())
}

macro_rules! scalar_dispatch {
    ($($fn_name:ident -> $ty:ty;)*) => {
        $(
            pub(crate) fn $fn_name(cursor: &Cursor) -> Result<$ty> {
                backend(cursor)?.$fn_name(cursor)
            }
        )*
    };
}

scalar_dispatch! {
    read_int8 -> i8;
    read_uint8 -> u8;
    read_int16 -> i16;
    read_uint16 -> u16;
    read_int32 -> i32;
    read_uint32 -> u32;
    read_int64 -> i64;
    read_uint64 -> u64;
    read_float -> f32;
    read_double -> f64;
    read_char -> u8;
}

pub(crate) fn read_string_into(cursor: &Cursor, dst: &mut Vec<u8>) -> Result<()> {
    backend(cursor)?.read_string_into(cursor, dst)
}

pub(crate) fn read_bits(
    cursor: &Cursor,
    bit_offset: i64,
    bit_length: i64,
    dst: &mut [u8],
) -> Result<()> {
    backend(cursor)?.read_bits(cursor, bit_offset, bit_length, dst)
}

pub(crate) fn read_bytes(cursor: &Cursor, offset: i64, length: i64, dst: &mut [u8]) -> Result<()> {
    backend(cursor)?.read_bytes(cursor, offset, length, dst)
}

pub(crate) fn read_array(cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
    backend(cursor)?.read_array(cursor, dst)
}

pub(crate) fn read_partial_array(
    cursor: &Cursor,
    offset: i64,
    length: i64,
    dst: ArrayDst<'_>,
) -> Result<()> {
    backend(cursor)?.read_partial_array(cursor, offset, length, dst)
}

/// Element-by-element bulk read: move a child cursor over every element
/// and fetch scalars. Backends without a byte-level fast path use this.
pub(crate) fn read_array_by_element(cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
    read_partial_by_element(cursor, 0, dst.len() as i64, dst)
}

/// Element loop over the index window `[offset, offset + length)`.
pub(crate) fn read_partial_by_element(
    cursor: &Cursor,
    offset: i64,
    length: i64,
    dst: ArrayDst<'_>,
) -> Result<()> {
    macro_rules! run {
        ($slice:expr, $read:ident) => {{
            let slice = $slice;
            let mut element = cursor.clone();
            for (i, slot) in slice.iter_mut().enumerate().take(length as usize) {
                if i == 0 {
                    element.goto_array_element_by_index(offset)?;
                } else {
                    element.goto_next_array_element()?;
                }
                *slot = $read(&element)?;
            }
            Ok(())
        }};
    }
    if length == 0 {
        return Ok(());
    }
    match dst {
        ArrayDst::Int8(s) => run!(s, read_int8),
        ArrayDst::UInt8(s) => run!(s, read_uint8),
        ArrayDst::Int16(s) => run!(s, read_int16),
        ArrayDst::UInt16(s) => run!(s, read_uint16),
        ArrayDst::Int32(s) => run!(s, read_int32),
        ArrayDst::UInt32(s) => run!(s, read_uint32),
        ArrayDst::Int64(s) => run!(s, read_int64),
        ArrayDst::UInt64(s) => run!(s, read_uint64),
        ArrayDst::Float(s) => run!(s, read_float),
        ArrayDst::Double(s) => run!(s, read_double),
        ArrayDst::Char(s) => run!(s, read_char),
    }
}
