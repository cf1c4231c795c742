//! NetCDF classic products: header parse, schema lift and data reads.
//!
//! The header (v1 or v2, magic `CDF\x01` / `CDF\x02`) lifts to a root
//! record with one field per variable. `char` variables lift to text with
//! the last dimension as string length; `scale_factor`/`add_offset`
//! attribute pairs lift to a numeric conversion. Variable data is read
//! big-endian straight from the file; variables over the unlimited
//! dimension stride by the record size.

use std::io::Read;

use bincode::Options as _;
use num_enum::TryFromPrimitive;

use crate::backend::{
    ArrayDst, ArrayReader, Backend, BitReader, PartialArrayReader, ScalarReader,
};
use crate::bin;
use crate::bits;
use crate::cursor::{Cursor, Pos};
use crate::dynamic::{DynNode, NodeId};
use crate::error::{Error, Result};
use crate::product::Product;
use crate::types::{
    Conversion, Definition, Dim, Field, Format, ReadType, Type, TypeClass, TypeId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
enum NcType {
    Byte = 1,
    Char = 2,
    Short = 3,
    Int = 4,
    Float = 5,
    Double = 6,
}

impl NcType {
    fn byte_size(self) -> i64 {
        match self {
            NcType::Byte | NcType::Char => 1,
            NcType::Short => 2,
            NcType::Int | NcType::Float => 4,
            NcType::Double => 8,
        }
    }
}

const TAG_DIMENSION: u32 = 0x0A;
const TAG_VARIABLE: u32 = 0x0B;
const TAG_ATTRIBUTE: u32 = 0x0C;

pub(crate) struct ParsedNetCdf {
    pub(crate) definition: Definition,
    pub(crate) nodes: Vec<DynNode>,
    pub(crate) root: NodeId,
    pub(crate) record_size: i64,
}

struct Reader<'d> {
    input: &'d [u8],
}

impl Reader<'_> {
    fn u32(&mut self) -> Result<u32> {
        bincode::options()
            .with_big_endian()
            .with_fixint_encoding()
            .deserialize_from(&mut self.input)
            .map_err(|err| Error::Product(format!("netcdf header too short ({err})")))
    }

    fn u64(&mut self) -> Result<u64> {
        bincode::options()
            .with_big_endian()
            .with_fixint_encoding()
            .deserialize_from(&mut self.input)
            .map_err(|err| Error::Product(format!("netcdf header too short ({err})")))
    }

    fn bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0; length];
        self.input
            .read_exact(&mut buffer)
            .map_err(|_| Error::Product("netcdf header too short".to_owned()))?;
        // values are padded to a four byte boundary
        let padding = (4 - length % 4) % 4;
        let mut pad = [0u8; 4];
        self.input
            .read_exact(&mut pad[..padding])
            .map_err(|_| Error::Product("netcdf header too short".to_owned()))?;
        Ok(buffer)
    }

    fn name(&mut self) -> Result<String> {
        let length = self.u32()? as usize;
        let bytes = self.bytes(length)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Product("netcdf name is not valid utf-8".to_owned()))
    }

    fn tagged_count(&mut self, expected_tag: u32) -> Result<u32> {
        let tag = self.u32()?;
        let count = self.u32()?;
        if tag == 0 && count == 0 {
            return Ok(0);
        }
        if tag != expected_tag {
            return Err(Error::Product(format!(
                "invalid netcdf header tag ({tag}, expected {expected_tag})"
            )));
        }
        Ok(count)
    }
}

struct Attribute {
    name: String,
    nc_type: NcType,
    values: Vec<u8>,
    num_values: usize,
}

impl Attribute {
    fn scalar_double(&self) -> Option<f64> {
        if self.num_values != 1 {
            return None;
        }
        let value = bits::read_u64(
            &self.values,
            0,
            (self.nc_type.byte_size() * 8) as u32,
        )
        .ok()?;
        Some(match self.nc_type {
            NcType::Byte => f64::from(bits::sign_extend(value, 8) as i8),
            NcType::Short => f64::from(bits::sign_extend(value, 16) as i16),
            NcType::Int => f64::from(bits::sign_extend(value, 32) as i32),
            NcType::Float => f64::from(f32::from_bits(value as u32)),
            NcType::Double => f64::from_bits(value),
            NcType::Char => return None,
        })
    }
}

fn read_attributes(reader: &mut Reader) -> Result<Vec<Attribute>> {
    let count = reader.tagged_count(TAG_ATTRIBUTE)?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = reader.name()?;
        let nc_type = NcType::try_from(reader.u32()?)
            .map_err(|err| Error::Product(format!("invalid netcdf attribute type ({err})")))?;
        let num_values = reader.u32()? as usize;
        let values = reader.bytes(num_values * nc_type.byte_size() as usize)?;
        attributes.push(Attribute {
            name,
            nc_type,
            values,
            num_values,
        });
    }
    Ok(attributes)
}

fn basic_type(definition: &mut Definition, nc_type: NcType) -> Result<TypeId> {
    let typ = match nc_type {
        NcType::Byte => Type::integer(Format::NetCdf, ReadType::Int8).with_bit_size(8),
        NcType::Short => Type::integer(Format::NetCdf, ReadType::Int16).with_bit_size(16),
        NcType::Int => Type::integer(Format::NetCdf, ReadType::Int32).with_bit_size(32),
        NcType::Float => Type::real(Format::NetCdf, ReadType::Float).with_bit_size(32),
        NcType::Double => Type::real(Format::NetCdf, ReadType::Double).with_bit_size(64),
        NcType::Char => Type::text(Format::NetCdf),
    };
    definition.add(typ)
}

/// Build the attribute record node for `attributes`; `None` when empty.
fn attribute_record(
    definition: &mut Definition,
    nodes: &mut Vec<DynNode>,
    attributes: &[Attribute],
) -> Result<Option<NodeId>> {
    if attributes.is_empty() {
        return Ok(None);
    }
    let mut record = Type::record(Format::NetCdf);
    let mut field_nodes = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        let type_id = match (attribute.nc_type, attribute.num_values) {
            (NcType::Char, _) => {
                definition.add(Type::text(Format::NetCdf).with_byte_size(attribute.values.len() as i64))?
            }
            (_, 1) => basic_type(definition, attribute.nc_type)?,
            (_, n) => {
                let base = basic_type(definition, attribute.nc_type)?;
                definition.add(
                    Type::array(Format::NetCdf, base).add_fixed_dimension(n as i64)?,
                )?
            }
        };
        let name = record
            .record_mut()
            .expect("record type")
            .unique_field_name(&attribute.name);
        record.add_field(Field::new(&name, type_id).with_real_name(&attribute.name))?;
        let node = NodeId(nodes.len() as u32);
        nodes.push(DynNode::Data {
            type_id,
            data: attribute.values.clone(),
            attributes: None,
        });
        field_nodes.push(Some(node));
    }
    let record_id = definition.add(record)?;
    let node = NodeId(nodes.len() as u32);
    nodes.push(DynNode::Record {
        type_id: record_id,
        fields: field_nodes,
        attributes: None,
    });
    Ok(Some(node))
}

fn lift_conversion(attributes: &[Attribute]) -> Option<Conversion> {
    let find = |name: &str| {
        attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(Attribute::scalar_double)
    };
    let scale = find("scale_factor");
    let offset = find("add_offset");
    let invalid = find("missing_value").or_else(|| find("_FillValue"));
    if scale.is_none() && offset.is_none() && invalid.is_none() {
        return None;
    }
    Some(Conversion::new(
        scale.unwrap_or(1.0),
        1.0,
        offset.unwrap_or(0.0),
        invalid.unwrap_or(f64::NAN),
    ))
}

pub(crate) fn parse(data: &[u8]) -> Result<ParsedNetCdf> {
    let mut definition = Definition::new();
    let mut nodes: Vec<DynNode> = Vec::new();
    definition.no_data(Format::NetCdf);
    definition.empty_record(Format::NetCdf);

    let mut reader = Reader { input: data };
    let magic = reader.u32()?;
    let version = match magic {
        0x43444601 => 1,
        0x43444602 => 2,
        _ => return Err(Error::Product("not a netcdf classic product".to_owned())),
    };
    let num_records = reader.u32()? as i64;

    // dimension list
    let num_dims = reader.tagged_count(TAG_DIMENSION)?;
    let mut dim_sizes = Vec::with_capacity(num_dims as usize);
    let mut unlimited_dim: Option<usize> = None;
    for d in 0..num_dims {
        let _name = reader.name()?;
        let size = reader.u32()? as i64;
        if size == 0 {
            unlimited_dim = Some(d as usize);
        }
        dim_sizes.push(size);
    }

    let global_attributes = read_attributes(&mut reader)?;

    // variable list
    let num_vars = reader.tagged_count(TAG_VARIABLE)?;
    let mut root_record = Type::record(Format::NetCdf);
    let mut field_nodes: Vec<Option<NodeId>> = Vec::with_capacity(num_vars as usize);
    let mut record_chunks: Vec<i64> = Vec::new();

    for _ in 0..num_vars {
        let name = reader.name()?;
        let ndims = reader.u32()? as usize;
        let mut dimids = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            dimids.push(reader.u32()? as usize);
        }
        let attributes = read_attributes(&mut reader)?;
        let nc_type = NcType::try_from(reader.u32()?)
            .map_err(|err| Error::Product(format!("invalid netcdf variable type ({err})")))?;
        let _vsize = reader.u32()?;
        let begin = if version == 1 {
            i64::from(reader.u32()?)
        } else {
            reader.u64()? as i64
        };

        let record_var = ndims > 0 && unlimited_dim == Some(dimids[0]);
        let mut extents: Vec<i64> = dimids
            .iter()
            .enumerate()
            .map(|(d, &id)| {
                if record_var && d == 0 {
                    num_records
                } else {
                    dim_sizes.get(id).copied().unwrap_or(0)
                }
            })
            .collect();

        // char variables: the last dimension is the string length
        let mut string_length: i64 = 1;
        if nc_type == NcType::Char && !extents.is_empty() {
            string_length = extents.pop().unwrap_or(1);
        }

        let mut base = match nc_type {
            NcType::Char => definition
                .add(Type::text(Format::NetCdf).with_byte_size(string_length))?,
            _ => basic_type(&mut definition, nc_type)?,
        };
        if let Some(conversion) = lift_conversion(&attributes) {
            let typ = definition.get(base).clone().with_conversion(conversion);
            base = definition.add(typ)?;
        }
        let type_id = if extents.is_empty() {
            base
        } else {
            let mut array = Type::array(Format::NetCdf, base);
            for extent in &extents {
                array = array.add_fixed_dimension(*extent)?;
            }
            definition.add(array)?
        };

        let attr_node = attribute_record(&mut definition, &mut nodes, &attributes)?;
        let node = NodeId(nodes.len() as u32);
        nodes.push(DynNode::NetCdfVar {
            type_id,
            offset: begin,
            record_var,
            attributes: attr_node,
        });
        let elem_bytes = if nc_type == NcType::Char {
            string_length
        } else {
            nc_type.byte_size()
        };
        let chunk: i64 = extents.iter().skip(1).product::<i64>() * elem_bytes;
        if record_var {
            record_chunks.push(chunk.max(elem_bytes));
        }

        let field_name = root_record
            .record_mut()
            .expect("record type")
            .unique_field_name(&name);
        root_record.add_field(Field::new(&field_name, type_id).with_real_name(&name))?;
        field_nodes.push(Some(node));
    }

    // record variables are interleaved per record; a single record
    // variable is packed without padding
    let record_size = if record_chunks.len() == 1 {
        record_chunks[0]
    } else {
        record_chunks.iter().map(|c| (c + 3) / 4 * 4).sum()
    };

    let root_attributes = attribute_record(&mut definition, &mut nodes, &global_attributes)?;
    let root_id = definition.add(root_record)?;
    definition.set_root(root_id);
    let root = NodeId(nodes.len() as u32);
    nodes.push(DynNode::Record {
        type_id: root_id,
        fields: field_nodes,
        attributes: root_attributes,
    });

    Ok(ParsedNetCdf {
        definition,
        nodes,
        root,
        record_size,
    })
}

/// Absolute bit offset of element `index` of a variable.
pub(crate) fn element_bit_offset(
    product: &Product,
    node: NodeId,
    array_type: &Type,
    index: i64,
) -> Result<i64> {
    let &DynNode::NetCdfVar {
        offset, record_var, ..
    } = product.node(node)
    else {
        return Err(Error::InvalidType(
            "cursor does not refer to a netcdf variable".to_owned(),
        ));
    };
    let base = array_type.array_base().ok_or_else(|| {
        Error::InvalidType("cursor does not refer to an array".to_owned())
    })?;
    let elem_bits = product.definition().get(base).bit_size().ok_or_else(|| {
        Error::DataDefinition("variable element size is not available".to_owned())
    })?;
    if !record_var {
        return Ok(offset * 8 + index * elem_bits);
    }
    let mut elems_per_record: i64 = 1;
    for dim in array_type.array_dims().iter().skip(1) {
        if let Dim::Fixed(extent) = dim {
            elems_per_record *= extent;
        }
    }
    let record_size = product.netcdf_record_size.unwrap_or(0);
    let record = index / elems_per_record.max(1);
    let within = index % elems_per_record.max(1);
    Ok(offset * 8 + record * record_size * 8 + within * elem_bits)
}

pub(crate) struct NetCdfBackend;

fn storage_bits(cursor: &Cursor) -> Result<(i64, i64)> {
    let offset = cursor.frame().bit_offset;
    if offset < 0 {
        return Err(Error::InvalidArgument(
            "current node has no file position".to_owned(),
        ));
    }
    let typ = cursor.current_type();
    let size = typ.bit_size().ok_or_else(|| {
        Error::DataDefinition("variable size is not available".to_owned())
    })?;
    Ok((offset, size))
}

macro_rules! netcdf_int_read {
    ($fn_name:ident, $ty:ty) => {
        fn $fn_name(&self, cursor: &Cursor) -> Result<$ty> {
            let (offset, size) = storage_bits(cursor)?;
            let value = bin::decode_signed(
                cursor.product().data(),
                offset,
                size,
                cursor.current_type().endianness(),
            )?;
            Ok(value as $ty)
        }
    };
}

impl ScalarReader for NetCdfBackend {
    fn name(&self) -> &'static str {
        "netcdf"
    }

    netcdf_int_read!(read_int8, i8);
    netcdf_int_read!(read_int16, i16);
    netcdf_int_read!(read_int32, i32);
    netcdf_int_read!(read_int64, i64);

    fn read_float(&self, cursor: &Cursor) -> Result<f32> {
        let (offset, _) = storage_bits(cursor)?;
        bin::decode_float(
            cursor.product().data(),
            offset,
            cursor.current_type().endianness(),
        )
    }

    fn read_double(&self, cursor: &Cursor) -> Result<f64> {
        let (offset, _) = storage_bits(cursor)?;
        bin::decode_double(
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
        let window = bits::read_bytes(
            cursor.product().data(),
            (offset / 8) as u64,
            (size / 8) as u64,
        )?;
        dst.extend_from_slice(window);
        Ok(())
    }
}

impl BitReader for NetCdfBackend {}

impl ArrayReader for NetCdfBackend {
    fn read_array(&self, cursor: &Cursor, dst: ArrayDst<'_>) -> Result<()> {
        self.read_partial_array(cursor, 0, dst.len() as i64, dst)
    }
}

impl PartialArrayReader for NetCdfBackend {
    fn read_partial_array(
        &self,
        cursor: &Cursor,
        offset: i64,
        length: i64,
        dst: ArrayDst<'_>,
    ) -> Result<()> {
        let Pos::Node(node) = cursor.frame().pos else {
            return Err(Error::InvalidType(
                "cursor does not refer to an array".to_owned(),
            ));
        };
        let typ = cursor.current_type();
        if typ.class() != TypeClass::Array {
            return Err(Error::InvalidType(
                "cursor does not refer to an array".to_owned(),
            ));
        }
        let data = cursor.product().data();
        let base_id = typ.array_base().expect("array class");
        let base = cursor.product().definition().get(base_id);
        let elem_bits = base.bit_size().ok_or_else(|| {
            Error::DataDefinition("variable element size is not available".to_owned())
        })?;
        macro_rules! run {
            ($slice:expr, $decode:ident, $ty:ty) => {{
                for (i, slot) in $slice.iter_mut().enumerate() {
                    let elem =
                        element_bit_offset(cursor.product(), node, typ, offset + i as i64)?;
                    *slot = $decode(data, elem, elem_bits, base.endianness())? as $ty;
                }
                Ok(())
            }};
        }
        use bin::{decode_signed, decode_unsigned};
        match dst {
            ArrayDst::Int8(s) => run!(s, decode_signed, i8),
            ArrayDst::Int16(s) => run!(s, decode_signed, i16),
            ArrayDst::Int32(s) => run!(s, decode_signed, i32),
            ArrayDst::Int64(s) => run!(s, decode_signed, i64),
            ArrayDst::Char(s) => run!(s, decode_unsigned, u8),
            ArrayDst::Float(s) => {
                for (i, slot) in s.iter_mut().enumerate() {
                    let elem =
                        element_bit_offset(cursor.product(), node, typ, offset + i as i64)?;
                    *slot = bin::decode_float(data, elem, base.endianness())?;
                }
                Ok(())
            }
            ArrayDst::Double(s) => {
                for (i, slot) in s.iter_mut().enumerate() {
                    let elem =
                        element_bit_offset(cursor.product(), node, typ, offset + i as i64)?;
                    *slot = bin::decode_double(data, elem, base.endianness())?;
                }
                Ok(())
            }
            _ => Err(Error::InvalidType(
                "netcdf variables have no unsigned data".to_owned(),
            )),
        }
    }
}

impl Backend for NetCdfBackend {}

#[cfg(test)]
mod test {
    use super::*;

    fn pad4(bytes: &mut Vec<u8>) {
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
    }

    fn name(bytes: &mut Vec<u8>, text: &str) {
        bytes.extend_from_slice(&(text.len() as u32).to_be_bytes());
        bytes.extend_from_slice(text.as_bytes());
        pad4(bytes);
    }

    /// A minimal v1 file: dimension x=3, variable "t" short[3].
    fn sample_file() -> Vec<u8> {
        let mut h: Vec<u8> = Vec::new();
        h.extend_from_slice(b"CDF\x01");
        h.extend_from_slice(&0u32.to_be_bytes()); // numrecs
        h.extend_from_slice(&TAG_DIMENSION.to_be_bytes());
        h.extend_from_slice(&1u32.to_be_bytes());
        name(&mut h, "x");
        h.extend_from_slice(&3u32.to_be_bytes());
        h.extend_from_slice(&0u32.to_be_bytes()); // no global attributes
        h.extend_from_slice(&0u32.to_be_bytes());
        h.extend_from_slice(&TAG_VARIABLE.to_be_bytes());
        h.extend_from_slice(&1u32.to_be_bytes());
        name(&mut h, "t");
        h.extend_from_slice(&1u32.to_be_bytes()); // ndims
        h.extend_from_slice(&0u32.to_be_bytes()); // dimid 0
        h.extend_from_slice(&0u32.to_be_bytes()); // no attributes
        h.extend_from_slice(&0u32.to_be_bytes());
        h.extend_from_slice(&(NcType::Short as u32).to_be_bytes());
        h.extend_from_slice(&8u32.to_be_bytes()); // vsize (padded)
        let begin = (h.len() + 4) as u32;
        h.extend_from_slice(&begin.to_be_bytes());
        for value in [100i16, -200, 300] {
            h.extend_from_slice(&value.to_be_bytes());
        }
        h
    }

    #[test]
    fn parses_header_and_lifts_schema() {
        let parsed = parse(&sample_file()).unwrap();
        let root = parsed.definition.get(parsed.definition.root().unwrap());
        assert_eq!(root.num_fields(), 1);
        assert_eq!(root.field(0).unwrap().name(), "t");
        let var = parsed.definition.get(root.field(0).unwrap().type_id());
        assert_eq!(var.class(), TypeClass::Array);
        assert_eq!(var.array_fixed_dim(0).unwrap(), Some(3));
    }

    #[test]
    fn rejects_other_magic() {
        assert!(parse(b"CDF\x05____").is_err());
        assert!(parse(b"not netcdf").is_err());
    }
}
