//! The ASCII backend: numbers and text stored as character data in the
//! product file.

use crate::backend::{
    self, ArrayDst, ArrayReader, Backend, BitReader, PartialArrayReader, ScalarReader,
};
use crate::bits;
use crate::cursor::Cursor;
use crate::dynamic::{DynNode, NodeId};
use crate::error::{Error, Result};
use crate::types::{Definition, Format, SpecialText, Type};

pub(crate) struct AsciiBackend;

/// Parse a signed integer from character data. Leading and trailing
/// spaces are allowed; the digits may be preceded by a sign.
pub(crate) fn parse_int64(buffer: &[u8]) -> Result<i64> {
    let text = trim_spaces(buffer);
    if text.is_empty() {
        return Err(Error::InvalidFormat(
            "invalid format for ascii integer value (no digits)".to_owned(),
        ));
    }
    let (negative, digits) = match text[0] {
        b'+' => (false, &text[1..]),
        b'-' => (true, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() {
        return Err(Error::InvalidFormat(
            "invalid format for ascii integer value (no digits)".to_owned(),
        ));
    }
    let mut value: i64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return Err(Error::InvalidFormat(format!(
                "invalid format for ascii integer value ('{}')",
                String::from_utf8_lossy(buffer)
            )));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(byte - b'0')))
            .ok_or_else(|| {
                Error::InvalidFormat("ascii integer value does not fit in 64 bits".to_owned())
            })?;
    }
    Ok(if negative { -value } else { value })
}

pub(crate) fn parse_uint64(buffer: &[u8]) -> Result<u64> {
    let text = trim_spaces(buffer);
    let digits = match text.first() {
        Some(b'+') => &text[1..],
        _ => text,
    };
    if digits.is_empty() {
        return Err(Error::InvalidFormat(
            "invalid format for ascii integer value (no digits)".to_owned(),
        ));
    }
    let mut value: u64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return Err(Error::InvalidFormat(format!(
                "invalid format for ascii integer value ('{}')",
                String::from_utf8_lossy(buffer)
            )));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(|| {
                Error::InvalidFormat("ascii integer value does not fit in 64 bits".to_owned())
            })?;
    }
    Ok(value)
}

/// Parse a floating point number from character data: optional sign, fixed
/// or exponent notation.
pub(crate) fn parse_double(buffer: &[u8]) -> Result<f64> {
    let text = trim_spaces(buffer);
    if text.is_empty() {
        return Err(Error::InvalidFormat(
            "invalid format for ascii floating point value (no digits)".to_owned(),
        ));
    }
    let text = std::str::from_utf8(text).map_err(|_| {
        Error::InvalidFormat("invalid format for ascii floating point value".to_owned())
    })?;
    let valid = text
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !valid {
        return Err(Error::InvalidFormat(format!(
            "invalid format for ascii floating point value ('{text}')"
        )));
    }
    text.parse().map_err(|_| {
        Error::InvalidFormat(format!(
            "invalid format for ascii floating point value ('{text}')"
        ))
    })
}

fn trim_spaces(buffer: &[u8]) -> &[u8] {
    let start = buffer
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(buffer.len());
    let end = buffer
        .iter()
        .rposition(|&b| b != b' ')
        .map(|p| p + 1)
        .unwrap_or(start);
    &buffer[start..end]
}

/// The byte window of the current frame in the product file.
fn window<'p>(cursor: &Cursor<'p>) -> Result<&'p [u8]> {
    let offset = cursor.frame().bit_offset;
    if offset < 0 || offset % 8 != 0 {
        return Err(Error::InvalidArgument(format!(
            "ascii data does not start at a byte boundary (bit offset {offset})"
        )));
    }
    let bits = cursor.bit_size()?;
    if bits % 8 != 0 {
        return Err(Error::InvalidArgument(format!(
            "ascii data size ({bits} bits) is not a whole number of bytes"
        )));
    }
    bits::read_bytes(cursor.product().data(), (offset / 8) as u64, (bits / 8) as u64)
}

/// Content-determined size: a matching number mapping fixes the size to the
/// mapping text, and the line/whitespace text kinds scan the product.
pub(crate) fn content_bit_size(cursor: &Cursor) -> Result<Option<i64>> {
    let typ = cursor.current_type();
    let data = cursor.product().data();
    let offset = cursor.frame().bit_offset;
    if offset < 0 || offset % 8 != 0 {
        return Ok(None);
    }
    let start = (offset / 8) as usize;
    if let Some(length) = mapping_match_length(typ, data, start) {
        return Ok(Some(8 * length));
    }
    match typ.special_text() {
        SpecialText::Default => Ok(None),
        SpecialText::LineWithEol | SpecialText::LineWithoutEol => {
            let mut end = start;
            while end < data.len() && data[end] != b'\n' {
                end += 1;
            }
            let mut length = end - start;
            if typ.special_text() == SpecialText::LineWithEol && end < data.len() {
                length += 1;
            } else if typ.special_text() == SpecialText::LineWithoutEol
                && length > 0
                && data[end - 1] == b'\r'
            {
                length -= 1;
            }
            Ok(Some(8 * length as i64))
        }
        SpecialText::Whitespace => {
            let mut end = start;
            while end < data.len() && matches!(data[end], b' ' | b'\t') {
                end += 1;
            }
            Ok(Some(8 * (end - start) as i64))
        }
    }
}

fn mapping_match_length(typ: &Type, data: &[u8], start: usize) -> Option<i64> {
    for mapping in typ.int_mappings() {
        let text = mapping.text.as_bytes();
        if data[start.min(data.len())..].starts_with(text) {
            return Some(text.len() as i64);
        }
    }
    for mapping in typ.float_mappings() {
        let text = mapping.text.as_bytes();
        if data[start.min(data.len())..].starts_with(text) {
            return Some(text.len() as i64);
        }
    }
    None
}

fn read_mapped_int(cursor: &Cursor) -> Result<Option<i64>> {
    let typ = cursor.current_type();
    if typ.int_mappings().is_empty() {
        return Ok(None);
    }
    let data = cursor.product().data();
    let offset = cursor.frame().bit_offset;
    let start = (offset / 8) as usize;
    for mapping in typ.int_mappings() {
        if data[start.min(data.len())..].starts_with(mapping.text.as_bytes()) {
            return Ok(Some(mapping.value));
        }
    }
    Ok(None)
}

fn read_mapped_float(cursor: &Cursor) -> Result<Option<f64>> {
    let typ = cursor.current_type();
    if typ.float_mappings().is_empty() {
        return Ok(None);
    }
    let data = cursor.product().data();
    let offset = cursor.frame().bit_offset;
    let start = (offset / 8) as usize;
    for mapping in typ.float_mappings() {
        if data[start.min(data.len())..].starts_with(mapping.text.as_bytes()) {
            return Ok(Some(mapping.value));
        }
    }
    Ok(None)
}

fn read_ascii_int(cursor: &Cursor) -> Result<i64> {
    if let Some(value) = read_mapped_int(cursor)? {
        return Ok(value);
    }
    parse_int64(window(cursor)?)
}

fn read_ascii_uint(cursor: &Cursor) -> Result<u64> {
    if let Some(value) = read_mapped_int(cursor)? {
        return u64::try_from(value).map_err(|_| {
            Error::InvalidFormat(format!("mapped value ({value}) is negative"))
        });
    }
    parse_uint64(window(cursor)?)
}

macro_rules! ranged_int_read {
    ($fn_name:ident, $ty:ty, $reader:ident, $name:literal) => {
        fn $fn_name(&self, cursor: &Cursor) -> Result<$ty> {
            let value = $reader(cursor)?;
            <$ty>::try_from(value).map_err(|_| {
                Error::InvalidFormat(format!(
                    "ascii value ({value}) does not fit in a {} data type",
                    $name
                ))
            })
        }
    };
}

impl ScalarReader for AsciiBackend {
    fn name(&self) -> &'static str {
        "ascii"
    }

    ranged_int_read!(read_int8, i8, read_ascii_int, "int8");
    ranged_int_read!(read_uint8, u8, read_ascii_uint, "uint8");
    ranged_int_read!(read_int16, i16, read_ascii_int, "int16");
    ranged_int_read!(read_uint16, u16, read_ascii_uint, "uint16");
    ranged_int_read!(read_int32, i32, read_ascii_int, "int32");
    ranged_int_read!(read_uint32, u32, read_ascii_uint, "uint32");

    fn read_int64(&self, cursor: &Cursor) -> Result<i64> {
        read_ascii_int(cursor)
    }

    fn read_uint64(&self, cursor: &Cursor) -> Result<u64> {
        read_ascii_uint(cursor)
    }

    fn read_float(&self, cursor: &Cursor) -> Result<f32> {
        Ok(self.read_double(cursor)? as f32)
    }

    fn read_double(&self, cursor: &Cursor) -> Result<f64> {
        if let Some(value) = read_mapped_float(cursor)? {
            return Ok(value);
        }
        parse_double(window(cursor)?)
    }

    fn read_char(&self, cursor: &Cursor) -> Result<u8> {
        let window = window(cursor)?;
        window.first().copied().ok_or_else(|| {
            Error::OutOfBoundsRead("trying to read a char beyond the end of the product".to_owned())
        })
    }

    fn read_string_into(&self, cursor: &Cursor, dst: &mut Vec<u8>) -> Result<()> {
        dst.extend_from_slice(window(cursor)?);
        Ok(())
    }
}

impl BitReader for AsciiBackend {
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

impl ArrayReader for AsciiBackend {
    fn read_array(&self, cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
        backend::read_array_by_element(cursor, dst)
    }
}

impl PartialArrayReader for AsciiBackend {
    fn read_partial_array(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: ArrayDst<'_>,
    ) -> Result<()> {
        backend::read_partial_by_element(cursor, offset, length, dst)
    }
}

impl Backend for AsciiBackend {}

/// Build the synthetic per-line view of an ASCII product: a
/// memory-resident array with one text node per line (line content without
/// the end-of-line sequence).
pub(crate) fn build_asciilines(
    definition: &mut Definition,
    nodes: &mut Vec<DynNode>,
    data: &[u8],
) -> Result<NodeId> {
    let line_type = definition.add(
        Type::text(Format::Ascii).with_special_text(SpecialText::LineWithoutEol),
    )?;
    let array_type = definition.add(
        Type::array(Format::Ascii, line_type).add_dynamic_dimension()?,
    )?;

    let mut elements = Vec::new();
    let mut start = 0usize;
    while start < data.len() {
        let end = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(data.len());
        let mut content_end = end;
        if content_end > start && data[content_end - 1] == b'\r' {
            content_end -= 1;
        }
        let node = NodeId(nodes.len() as u32);
        nodes.push(DynNode::Data {
            type_id: line_type,
            data: data[start..content_end].to_vec(),
            attributes: None,
        });
        elements.push(node);
        start = end + 1;
    }

    let array = NodeId(nodes.len() as u32);
    nodes.push(DynNode::Array {
        type_id: array_type,
        elements,
        attributes: None,
    });
    Ok(array)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_parsing() {
        assert_eq!(parse_int64(b"  123 ").unwrap(), 123);
        assert_eq!(parse_int64(b"-42").unwrap(), -42);
        assert_eq!(parse_int64(b"+7").unwrap(), 7);
        assert!(parse_int64(b"").is_err());
        assert!(parse_int64(b"12a").is_err());
        assert!(parse_int64(b"99999999999999999999").is_err());
    }

    #[test]
    fn float_parsing() {
        assert_eq!(parse_double(b"1.5").unwrap(), 1.5);
        assert_eq!(parse_double(b" -2.5e2 ").unwrap(), -250.0);
        assert_eq!(parse_double(b"123").unwrap(), 123.0);
        assert!(parse_double(b"abc").is_err());
        assert!(parse_double(b"").is_err());
    }

    #[test]
    fn asciilines_split() {
        let mut definition = Definition::new();
        let mut nodes = Vec::new();
        let array = build_asciilines(
            &mut definition,
            &mut nodes,
            b"first\r\nsecond\nlast",
        )
        .unwrap();
        let DynNode::Array { elements, .. } = &nodes[array.0 as usize] else {
            panic!("expected array node");
        };
        assert_eq!(elements.len(), 3);
        let DynNode::Data { data, .. } = &nodes[elements[0].0 as usize] else {
            panic!("expected data node");
        };
        assert_eq!(data, b"first");
        let DynNode::Data { data, .. } = &nodes[elements[2].0 as usize] else {
            panic!("expected data node");
        };
        assert_eq!(data, b"last");
    }
}
