//! The binary backend: bit-level packed data read directly from the
//! product bytes.
//!
//! Integers occupy 1..=64 bits at arbitrary bit offsets and are packed
//! MSB-first; little-endian numbers occupy a whole number of bytes
//! (enforced when the definition is built).

use crate::backend::{
    self, ArrayDst, ArrayReader, Backend, BitReader, PartialArrayReader, ScalarReader,
};
use crate::bits;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::types::{Endianness, TypeClass};

pub(crate) struct BinBackend;

fn storage_bits(cursor: &Cursor) -> Result<(i64, i64)> {
    let offset = cursor.frame().bit_offset;
    if offset < 0 {
        return Err(Error::InvalidArgument(
            "current node has no file position".to_owned(),
        ));
    }
    Ok((offset, cursor.bit_size()?))
}

pub(crate) fn decode_unsigned(
    data: &[u8],
    bit_offset: i64,
    bit_size: i64,
    endianness: Endianness,
) -> Result<u64> {
    if !(1..=64).contains(&bit_size) {
        return Err(Error::DataDefinition(format!(
            "invalid bit size ({bit_size}) for binary integer"
        )));
    }
    let value = bits::read_u64(data, bit_offset as u64, bit_size as u32)?;
    if endianness == Endianness::Little && bit_size % 8 == 0 {
        let bytes = (bit_size / 8) as u32;
        Ok(value.swap_bytes() >> (8 * (8 - bytes)))
    } else {
        Ok(value)
    }
}

pub(crate) fn decode_signed(
    data: &[u8],
    bit_offset: i64,
    bit_size: i64,
    endianness: Endianness,
) -> Result<i64> {
    let value = decode_unsigned(data, bit_offset, bit_size, endianness)?;
    Ok(bits::sign_extend(value, bit_size as u32))
}

pub(crate) fn decode_float(
    data: &[u8],
    bit_offset: i64,
    endianness: Endianness,
) -> Result<f32> {
    let value = decode_unsigned(data, bit_offset, 32, endianness)? as u32;
    Ok(f32::from_bits(value))
}

pub(crate) fn decode_double(
    data: &[u8],
    bit_offset: i64,
    endianness: Endianness,
) -> Result<f64> {
    let value = decode_unsigned(data, bit_offset, 64, endianness)?;
    Ok(f64::from_bits(value))
}

macro_rules! bin_int_read {
    ($fn_name:ident, $ty:ty, $decode:ident) => {
        fn $fn_name(&self, cursor: &Cursor) -> Result<$ty> {
            let (offset, size) = storage_bits(cursor)?;
            let value = $decode(
                cursor.product().data(),
                offset,
                size,
                cursor.current_type().endianness(),
            )?;
            Ok(value as $ty)
        }
    };
}

impl ScalarReader for BinBackend {
    fn name(&self) -> &'static str {
        "binary"
    }

    bin_int_read!(read_int8, i8, decode_signed);
    bin_int_read!(read_uint8, u8, decode_unsigned);
    bin_int_read!(read_int16, i16, decode_signed);
    bin_int_read!(read_uint16, u16, decode_unsigned);
    bin_int_read!(read_int32, i32, decode_signed);
    bin_int_read!(read_uint32, u32, decode_unsigned);
    bin_int_read!(read_int64, i64, decode_signed);
    bin_int_read!(read_uint64, u64, decode_unsigned);

    fn read_float(&self, cursor: &Cursor) -> Result<f32> {
        let (offset, _) = storage_bits(cursor)?;
        decode_float(
            cursor.product().data(),
            offset,
            cursor.current_type().endianness(),
        )
    }

    fn read_double(&self, cursor: &Cursor) -> Result<f64> {
        let (offset, _) = storage_bits(cursor)?;
        decode_double(
            cursor.product().data(),
            offset,
            cursor.current_type().endianness(),
        )
    }

    fn read_char(&self, cursor: &Cursor) -> Result<u8> {
        let (offset, _) = storage_bits(cursor)?;
        Ok(bits::read_u64(cursor.product().data(), offset as u64, 8)? as u8)
    }

    fn read_string_into(&self, cursor: &Cursor, dst: &mut Vec<u8>) -> Result<()> {
        let (offset, size) = storage_bits(cursor)?;
        if size % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "text size ({size} bits) is not a whole number of bytes"
            )));
        }
        let start = dst.len();
        dst.resize(start + (size / 8) as usize, 0);
        bits::read_into(
            cursor.product().data(),
            offset as u64,
            size as u64,
            &mut dst[start..],
        )
    }
}

impl BitReader for BinBackend {
    fn read_bits(
        &self,
        cursor: &Cursor,
        bit_offset: i64,
        bit_length: i64,
        dst: &mut [u8],
    ) -> Result<()> {
        let start = cursor.frame().bit_offset + bit_offset;
        bits::read_into(cursor.product().data(), start as u64, bit_length as u64, dst)
    }

    fn read_bytes(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: &mut [u8],
    ) -> Result<()> {
        self.read_bits(cursor, offset * 8, length * 8, dst)
    }
}

impl ArrayReader for BinBackend {
    fn read_array(&self, cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
        self.read_partial_array(cursor, 0, dst.len() as i64, dst)
    }
}

impl PartialArrayReader for BinBackend {
    fn read_partial_array(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: ArrayDst<'_>,
    ) -> Result<()> {
        let typ = cursor.current_type();
        let base_id = typ.array_base().ok_or_else(|| {
            Error::InvalidType("cursor does not refer to an array".to_owned())
        })?;
        let base = cursor.product().definition().get(base_id);
        let Some(elem_bits) = base.bit_size() else {
            // variable-size elements need a cursor walk
            return backend::read_partial_by_element(cursor, offset, length, dst);
        };
        if base.class() == TypeClass::Record || base.class() == TypeClass::Array {
            return Err(Error::InvalidType(format!(
                "can not read compound {} data as a numeric array",
                base.class()
            )));
        }
        let data = cursor.product().data();
        let endianness = base.endianness();
        let array_offset = cursor.frame().bit_offset;
        if array_offset < 0 {
            return Err(Error::InvalidArgument(
                "current node has no file position".to_owned(),
            ));
        }
        let start = array_offset + offset * elem_bits;
        decode_elements(data, start, elem_bits, endianness, dst)
    }
}

impl Backend for BinBackend {}

/// Decode `dst.len()` fixed-size elements laid out back to back starting
/// at `start` (in bits).
pub(crate) fn decode_elements(
    data: &[u8],
    start: i64,
    elem_bits: i64,
    endianness: Endianness,
    dst: ArrayDst<'_>,
) -> Result<()> {
    macro_rules! run {
        ($slice:expr, $decode:ident, $ty:ty) => {{
            for (i, slot) in $slice.iter_mut().enumerate() {
                let offset = start + (i as i64) * elem_bits;
                *slot = $decode(data, offset, elem_bits, endianness)? as $ty;
            }
            Ok(())
        }};
    }
    match dst {
        ArrayDst::Int8(s) => run!(s, decode_signed, i8),
        ArrayDst::UInt8(s) => run!(s, decode_unsigned, u8),
        ArrayDst::Int16(s) => run!(s, decode_signed, i16),
        ArrayDst::UInt16(s) => run!(s, decode_unsigned, u16),
        ArrayDst::Int32(s) => run!(s, decode_signed, i32),
        ArrayDst::UInt32(s) => run!(s, decode_unsigned, u32),
        ArrayDst::Int64(s) => run!(s, decode_signed, i64),
        ArrayDst::UInt64(s) => run!(s, decode_unsigned, u64),
        ArrayDst::Float(s) => {
            for (i, slot) in s.iter_mut().enumerate() {
                *slot = decode_float(data, start + (i as i64) * elem_bits, endianness)?;
            }
            Ok(())
        }
        ArrayDst::Double(s) => {
            for (i, slot) in s.iter_mut().enumerate() {
                *slot = decode_double(data, start + (i as i64) * elem_bits, endianness)?;
            }
            Ok(())
        }
        ArrayDst::Char(s) => {
            for (i, slot) in s.iter_mut().enumerate() {
                let offset = start + (i as i64) * elem_bits;
                *slot = bits::read_u64(data, offset as u64, 8)? as u8;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_and_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(
            decode_unsigned(&data, 0, 16, Endianness::Big).unwrap(),
            0x0102
        );
        assert_eq!(
            decode_unsigned(&data, 0, 16, Endianness::Little).unwrap(),
            0x0201
        );
        assert_eq!(
            decode_unsigned(&data, 0, 32, Endianness::Little).unwrap(),
            0x04030201
        );
    }

    #[test]
    fn sub_byte_fields() {
        // 1011 0001 -> 3-bit field at offset 1 = 011
        let data = [0b1011_0001];
        assert_eq!(decode_unsigned(&data, 1, 3, Endianness::Big).unwrap(), 0b011);
        assert_eq!(decode_signed(&data, 0, 4, Endianness::Big).unwrap(), -5);
    }

    #[test]
    fn floats() {
        let bytes = 1.5f32.to_be_bytes();
        assert_eq!(decode_float(&bytes, 0, Endianness::Big).unwrap(), 1.5);
        let bytes = 1.5f32.to_le_bytes();
        assert_eq!(decode_float(&bytes, 0, Endianness::Little).unwrap(), 1.5);
        let bytes = (-0.25f64).to_be_bytes();
        assert_eq!(decode_double(&bytes, 0, Endianness::Big).unwrap(), -0.25);
    }
}
