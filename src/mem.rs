//! The memory backend: values held in dynamic-type nodes (XML content,
//! attribute records, the asciiline view).
//!
//! Numeric data with an ASCII or XML definition is stored as text and
//! parsed on read; other numeric data is stored as big-endian raw bytes.

use crate::ascii;
use crate::backend::{
    self, ArrayDst, ArrayReader, Backend, BitReader, PartialArrayReader, ScalarReader,
};
use crate::bin;
use crate::bits;
use crate::cursor::{Cursor, Pos};
use crate::dynamic::DynNode;
use crate::error::{Error, Result};
use crate::types::{Endianness, Format};

pub(crate) struct MemBackend;

struct Window<'p> {
    data: &'p [u8],
    bit_offset: i64,
    bit_size: i64,
    text: bool,
}

fn window<'p>(cursor: &Cursor<'p>) -> Result<Window<'p>> {
    let typ = cursor.current_type();
    let text = matches!(typ.format(), Format::Ascii | Format::Xml);
    match cursor.frame().pos {
        Pos::Node(id) => match cursor.product().node(id) {
            DynNode::Data { data, .. } => Ok(Window {
                data,
                bit_offset: 0,
                bit_size: 8 * data.len() as i64,
                text,
            }),
            node => Err(Error::InvalidType(format!(
                "can not read {} data as a scalar value",
                cursor
                    .product()
                    .definition()
                    .get(node.type_id())
                    .class()
            ))),
        },
        Pos::NodeElem { node, elem } => match cursor.product().node(node) {
            DynNode::Data { data, .. } => {
                let elem_bits = typ.bit_size().ok_or_else(|| {
                    Error::DataDefinition("array element size is not available".to_owned())
                })?;
                Ok(Window {
                    data,
                    bit_offset: elem * elem_bits,
                    bit_size: elem_bits,
                    text,
                })
            }
            _ => Err(Error::InvalidType(
                "cursor does not refer to element data".to_owned(),
            )),
        },
        Pos::File => Err(Error::InvalidType(
            "cursor does not refer to memory data".to_owned(),
        )),
    }
}

fn byte_window<'p>(cursor: &Cursor<'p>) -> Result<&'p [u8]> {
    let window = window(cursor)?;
    if window.bit_offset % 8 != 0 || window.bit_size % 8 != 0 {
        return Err(Error::InvalidArgument(
            "memory data is not byte aligned".to_owned(),
        ));
    }
    let start = (window.bit_offset / 8) as usize;
    let end = start + (window.bit_size / 8) as usize;
    window.data.get(start..end).ok_or_else(|| {
        Error::OutOfBoundsRead(format!(
            "trying to read {} bytes at offset {start} beyond the end of the value \
             ({} bytes)",
            (window.bit_size / 8),
            window.data.len()
        ))
    })
}

fn read_mem_int(cursor: &Cursor) -> Result<i64> {
    let window = window(cursor)?;
    if window.text {
        ascii::parse_int64(byte_window(cursor)?)
    } else {
        bin::decode_signed(
            window.data,
            window.bit_offset,
            window.bit_size,
            Endianness::Big,
        )
    }
}

fn read_mem_uint(cursor: &Cursor) -> Result<u64> {
    let window = window(cursor)?;
    if window.text {
        ascii::parse_uint64(byte_window(cursor)?)
    } else {
        bin::decode_unsigned(
            window.data,
            window.bit_offset,
            window.bit_size,
            Endianness::Big,
        )
    }
}

macro_rules! mem_int_read {
    ($fn_name:ident, $ty:ty, $reader:ident, $name:literal) => {
        fn $fn_name(&self, cursor: &Cursor) -> Result<$ty> {
            let value = $reader(cursor)?;
            <$ty>::try_from(value).map_err(|_| {
                Error::InvalidFormat(format!(
                    "value ({value}) does not fit in a {} data type",
                    $name
                ))
            })
        }
    };
}

impl ScalarReader for MemBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    mem_int_read!(read_int8, i8, read_mem_int, "int8");
    mem_int_read!(read_uint8, u8, read_mem_uint, "uint8");
    mem_int_read!(read_int16, i16, read_mem_int, "int16");
    mem_int_read!(read_uint16, u16, read_mem_uint, "uint16");
    mem_int_read!(read_int32, i32, read_mem_int, "int32");
    mem_int_read!(read_uint32, u32, read_mem_uint, "uint32");

    fn read_int64(&self, cursor: &Cursor) -> Result<i64> {
        read_mem_int(cursor)
    }

    fn read_uint64(&self, cursor: &Cursor) -> Result<u64> {
        read_mem_uint(cursor)
    }

    fn read_float(&self, cursor: &Cursor) -> Result<f32> {
        let window = window(cursor)?;
        if window.text {
            Ok(ascii::parse_double(byte_window(cursor)?)? as f32)
        } else {
            bin::decode_float(window.data, window.bit_offset, Endianness::Big)
        }
    }

    fn read_double(&self, cursor: &Cursor) -> Result<f64> {
        let window = window(cursor)?;
        if window.text {
            ascii::parse_double(byte_window(cursor)?)
        } else {
            bin::decode_double(window.data, window.bit_offset, Endianness::Big)
        }
    }

    fn read_char(&self, cursor: &Cursor) -> Result<u8> {
        let window = byte_window(cursor)?;
        window.first().copied().ok_or_else(|| {
            Error::OutOfBoundsRead("trying to read a char from an empty value".to_owned())
        })
    }

    fn read_string_into(&self, cursor: &Cursor, dst: &mut Vec<u8>) -> Result<()> {
        dst.extend_from_slice(byte_window(cursor)?);
        Ok(())
    }
}

impl BitReader for MemBackend {
    fn read_bits(
        &self,
        cursor: &Cursor,
        bit_offset: i64,
        bit_length: i64,
        dst: &mut [u8],
    ) -> Result<()> {
        let window = window(cursor)?;
        bits::read_into(
            window.data,
            (window.bit_offset + bit_offset) as u64,
            bit_length as u64,
            dst,
        )
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

impl ArrayReader for MemBackend {
    fn read_array(&self, cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
        self.read_partial_array(cursor, 0, dst.len() as i64, dst)
    }
}

impl PartialArrayReader for MemBackend {
    fn read_partial_array(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: ArrayDst<'_>,
    ) -> Result<()> {
        let Pos::Node(id) = cursor.frame().pos else {
            return Err(Error::InvalidType(
                "cursor does not refer to an array".to_owned(),
            ));
        };
        match cursor.product().node(id) {
            DynNode::Array { .. } => {
                backend::read_partial_by_element(cursor, offset, length, dst)
            }
            DynNode::Data { data, .. } => {
                let typ = cursor.current_type();
                let base = typ.array_base().ok_or_else(|| {
                    Error::InvalidType("cursor does not refer to an array".to_owned())
                })?;
                let base = cursor.product().definition().get(base);
                if matches!(base.format(), Format::Ascii | Format::Xml) {
                    return backend::read_partial_by_element(cursor, offset, length, dst);
                }
                let elem_bits = base.bit_size().ok_or_else(|| {
                    Error::DataDefinition("array element size is not available".to_owned())
                })?;
                bin::decode_elements(data, offset * elem_bits, elem_bits, Endianness::Big, dst)
            }
            node => Err(Error::InvalidType(format!(
                "can not read {} data as an array",
                cursor
                    .product()
                    .definition()
                    .get(node.type_id())
                    .class()
            ))),
        }
    }
}

impl Backend for MemBackend {}
