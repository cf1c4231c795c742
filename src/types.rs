//! The type model: immutable descriptions of every logical entity in a
//! product.
//!
//! Types live in a [`Definition`] arena and are addressed by [`TypeId`].
//! A definition is either supplied by the caller (ASCII, binary and memory
//! products) or synthesized while opening a self-describing product (XML,
//! NetCDF). Queries on types never perform I/O; anything that depends on
//! product data (dynamic sizes, union discriminators, availability) is
//! answered through a cursor.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::expr::Expr;

/// Maximum number of array dimensions.
pub const MAX_NUM_DIMS: usize = 8;

/// Maximum length in bytes of the text representation of a number.
pub const MAX_ASCII_NUMBER_LENGTH: i64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Ascii,
    Binary,
    Memory,
    NetCdf,
    Cdf,
    Grib,
    Hdf4,
    Hdf5,
    Xml,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Ascii => "ascii",
            Format::Binary => "binary",
            Format::Memory => "memory",
            Format::NetCdf => "netcdf",
            Format::Cdf => "cdf",
            Format::Grib => "grib",
            Format::Hdf4 => "hdf4",
            Format::Hdf5 => "hdf5",
            Format::Xml => "xml",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Integer,
    Real,
    Text,
    Raw,
    Array,
    Record,
    Special,
}

impl TypeClass {
    pub fn name(self) -> &'static str {
        match self {
            TypeClass::Integer => "integer",
            TypeClass::Real => "real",
            TypeClass::Text => "text",
            TypeClass::Raw => "raw",
            TypeClass::Array => "array",
            TypeClass::Record => "record",
            TypeClass::Special => "special",
        }
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The primitive type a value is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Char,
    String,
    Bytes,
    NotAvailable,
}

impl ReadType {
    pub fn name(self) -> &'static str {
        match self {
            ReadType::Int8 => "int8",
            ReadType::UInt8 => "uint8",
            ReadType::Int16 => "int16",
            ReadType::UInt16 => "uint16",
            ReadType::Int32 => "int32",
            ReadType::UInt32 => "uint32",
            ReadType::Int64 => "int64",
            ReadType::UInt64 => "uint64",
            ReadType::Float => "float",
            ReadType::Double => "double",
            ReadType::Char => "char",
            ReadType::String => "string",
            ReadType::Bytes => "bytes",
            ReadType::NotAvailable => "not available",
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            ReadType::Int8 | ReadType::Int16 | ReadType::Int32 | ReadType::Int64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            ReadType::UInt8 | ReadType::UInt16 | ReadType::UInt32 | ReadType::UInt64
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Time,
    VsfInteger,
    Complex,
    NoData,
}

impl SpecialKind {
    pub fn name(self) -> &'static str {
        match self {
            SpecialKind::Time => "time",
            SpecialKind::VsfInteger => "vsf_integer",
            SpecialKind::Complex => "complex",
            SpecialKind::NoData => "no_data",
        }
    }
}

/// Subkind of a text type; the non-default kinds size themselves from the
/// product content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecialText {
    #[default]
    Default,
    LineWithEol,
    LineWithoutEol,
    Whitespace,
}

/// value = (value * numerator) / denominator + add_offset, with
/// invalid_value mapping to NaN before scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub numerator: f64,
    pub denominator: f64,
    pub add_offset: f64,
    pub invalid_value: f64,
    pub unit: Option<String>,
}

impl Conversion {
    pub fn new(numerator: f64, denominator: f64, add_offset: f64, invalid_value: f64) -> Self {
        Conversion {
            numerator,
            denominator,
            add_offset,
            invalid_value,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_owned());
        self
    }

    pub fn apply(&self, value: f64) -> f64 {
        if value == self.invalid_value {
            f64::NAN
        } else {
            (value * self.numerator) / self.denominator + self.add_offset
        }
    }
}

/// Text override for an ASCII number: when the stored bytes equal `text`
/// the mapped value is produced and `text.len()` bytes are consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiIntegerMapping {
    pub text: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsciiFloatMapping {
    pub text: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dim {
    Fixed(i64),
    Expr(Expr),
    /// Extent only known from the product instance (synthesized XML
    /// arrays, the asciiline view).
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) real_name: Option<String>,
    pub(crate) type_id: TypeId,
    pub(crate) hidden: bool,
    pub(crate) optional: bool,
    pub(crate) available_expr: Option<Expr>,
    /// Offset from the start of the record, when statically known.
    pub(crate) bit_offset: Option<i64>,
    pub(crate) bit_offset_expr: Option<Expr>,
}

impl Field {
    pub fn new(name: &str, type_id: TypeId) -> Self {
        Field {
            name: name.to_owned(),
            real_name: None,
            type_id,
            hidden: false,
            optional: false,
            available_expr: None,
            bit_offset: None,
            bit_offset_expr: None,
        }
    }

    pub fn with_real_name(mut self, real_name: &str) -> Self {
        self.real_name = Some(real_name.to_owned());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_available_expr(mut self, expr: Expr) -> Self {
        self.optional = true;
        self.available_expr = Some(expr);
        self
    }

    pub fn with_bit_offset_expr(mut self, expr: Expr) -> Self {
        self.bit_offset_expr = Some(expr);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name the field has in the product itself (XML element name,
    /// NetCDF variable name); `name` is the identifier-safe version.
    pub fn real_name(&self) -> &str {
        self.real_name.as_deref().unwrap_or(&self.name)
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordType {
    pub(crate) fields: Vec<Field>,
    pub(crate) name_index: HashMap<String, usize>,
    pub(crate) real_name_index: HashMap<String, usize>,
    pub(crate) is_union: bool,
    pub(crate) union_field_expr: Option<Expr>,
    pub(crate) has_hidden_fields: bool,
    pub(crate) has_optional_fields: bool,
}

impl RecordType {
    pub(crate) fn field_index_by_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub(crate) fn field_index_by_real_name(&self, real_name: &str) -> Option<usize> {
        self.real_name_index
            .get(real_name)
            .copied()
            .or_else(|| self.name_index.get(real_name).copied())
    }

    /// Derive a field name that is a valid identifier and unique within
    /// this record. Non-identifier characters map to '_'.
    pub(crate) fn unique_field_name(&self, base: &str) -> String {
        let mut name: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            name.insert(0, '_');
        }
        if !self.name_index.contains_key(&name) {
            return name;
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{name}_{counter}");
            if !self.name_index.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TypeVariant {
    Number {
        unit: Option<String>,
        endianness: Endianness,
        conversion: Option<Conversion>,
        int_mappings: Vec<AsciiIntegerMapping>,
        float_mappings: Vec<AsciiFloatMapping>,
    },
    Text {
        fixed_value: Option<String>,
        special_text: SpecialText,
    },
    Raw {
        fixed_value: Option<Vec<u8>>,
    },
    Array {
        base: TypeId,
        dims: Vec<Dim>,
    },
    Record(RecordType),
    Special {
        kind: SpecialKind,
        base: TypeId,
        unit: Option<String>,
        value_expr: Option<Expr>,
    },
}

/// Size expression of a type whose bit size is dynamic.
#[derive(Debug, Clone)]
pub(crate) struct SizeExpr {
    pub(crate) expr: Expr,
    /// The expression yields bytes instead of bits.
    pub(crate) in_bytes: bool,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub(crate) format: Format,
    pub(crate) class: TypeClass,
    pub(crate) read_type: ReadType,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) bit_size: Option<i64>,
    pub(crate) size_expr: Option<SizeExpr>,
    pub(crate) attributes: Option<TypeId>,
    pub(crate) variant: TypeVariant,
}

impl Type {
    fn new(format: Format, class: TypeClass, read_type: ReadType, variant: TypeVariant) -> Self {
        Type {
            format,
            class,
            read_type,
            name: None,
            description: None,
            bit_size: None,
            size_expr: None,
            attributes: None,
            variant,
        }
    }

    pub fn integer(format: Format, read_type: ReadType) -> Self {
        Type::new(
            format,
            TypeClass::Integer,
            read_type,
            TypeVariant::Number {
                unit: None,
                endianness: Endianness::default(),
                conversion: None,
                int_mappings: Vec::new(),
                float_mappings: Vec::new(),
            },
        )
    }

    pub fn real(format: Format, read_type: ReadType) -> Self {
        Type::new(
            format,
            TypeClass::Real,
            read_type,
            TypeVariant::Number {
                unit: None,
                endianness: Endianness::default(),
                conversion: None,
                int_mappings: Vec::new(),
                float_mappings: Vec::new(),
            },
        )
    }

    pub fn text(format: Format) -> Self {
        Type::new(
            format,
            TypeClass::Text,
            ReadType::String,
            TypeVariant::Text {
                fixed_value: None,
                special_text: SpecialText::Default,
            },
        )
    }

    pub fn raw(format: Format) -> Self {
        Type::new(
            format,
            TypeClass::Raw,
            ReadType::Bytes,
            TypeVariant::Raw { fixed_value: None },
        )
    }

    pub fn array(format: Format, base: TypeId) -> Self {
        Type::new(
            format,
            TypeClass::Array,
            ReadType::NotAvailable,
            TypeVariant::Array {
                base,
                dims: Vec::new(),
            },
        )
    }

    pub fn record(format: Format) -> Self {
        Type::new(
            format,
            TypeClass::Record,
            ReadType::NotAvailable,
            TypeVariant::Record(RecordType::default()),
        )
    }

    pub fn union(format: Format, union_field_expr: Expr) -> Self {
        Type::new(
            format,
            TypeClass::Record,
            ReadType::NotAvailable,
            TypeVariant::Record(RecordType {
                is_union: true,
                union_field_expr: Some(union_field_expr),
                ..RecordType::default()
            }),
        )
    }

    pub fn time(format: Format, base: TypeId, value_expr: Expr) -> Self {
        Type::new(
            format,
            TypeClass::Special,
            ReadType::Double,
            TypeVariant::Special {
                kind: SpecialKind::Time,
                base,
                unit: Some("s since 2000-01-01".to_owned()),
                value_expr: Some(value_expr),
            },
        )
    }

    pub fn vsf_integer(format: Format, base: TypeId) -> Self {
        Type::new(
            format,
            TypeClass::Special,
            ReadType::Double,
            TypeVariant::Special {
                kind: SpecialKind::VsfInteger,
                base,
                unit: None,
                value_expr: None,
            },
        )
    }

    pub fn complex(format: Format, base: TypeId) -> Self {
        Type::new(
            format,
            TypeClass::Special,
            ReadType::NotAvailable,
            TypeVariant::Special {
                kind: SpecialKind::Complex,
                base,
                unit: None,
                value_expr: None,
            },
        )
    }

    pub(crate) fn no_data(format: Format, base: TypeId) -> Self {
        Type::new(
            format,
            TypeClass::Special,
            ReadType::NotAvailable,
            TypeVariant::Special {
                kind: SpecialKind::NoData,
                base,
                unit: None,
                value_expr: None,
            },
        )
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }

    pub fn with_bit_size(mut self, bit_size: i64) -> Self {
        self.bit_size = Some(bit_size);
        self
    }

    pub fn with_byte_size(self, byte_size: i64) -> Self {
        self.with_bit_size(byte_size * 8)
    }

    pub fn with_bit_size_expr(mut self, expr: Expr) -> Self {
        self.size_expr = Some(SizeExpr {
            expr,
            in_bytes: false,
        });
        self.bit_size = None;
        self
    }

    pub fn with_byte_size_expr(mut self, expr: Expr) -> Self {
        self.size_expr = Some(SizeExpr {
            expr,
            in_bytes: true,
        });
        self.bit_size = None;
        self
    }

    pub fn with_attributes(mut self, attributes: TypeId) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        match &mut self.variant {
            TypeVariant::Number { unit: u, .. } | TypeVariant::Special { unit: u, .. } => {
                *u = Some(unit.to_owned());
            }
            _ => {}
        }
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        if let TypeVariant::Number { endianness: e, .. } = &mut self.variant {
            *e = endianness;
        }
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        if let TypeVariant::Number { conversion: c, .. } = &mut self.variant {
            *c = Some(conversion);
        }
        self
    }

    pub fn with_integer_mapping(mut self, text: &str, value: i64) -> Self {
        if let TypeVariant::Number { int_mappings, .. } = &mut self.variant {
            int_mappings.push(AsciiIntegerMapping {
                text: text.to_owned(),
                value,
            });
        }
        self
    }

    pub fn with_float_mapping(mut self, text: &str, value: f64) -> Self {
        if let TypeVariant::Number { float_mappings, .. } = &mut self.variant {
            float_mappings.push(AsciiFloatMapping {
                text: text.to_owned(),
                value,
            });
        }
        self
    }

    pub fn with_fixed_value(mut self, value: &str) -> Self {
        match &mut self.variant {
            TypeVariant::Text { fixed_value, .. } => *fixed_value = Some(value.to_owned()),
            TypeVariant::Raw { fixed_value } => *fixed_value = Some(value.as_bytes().to_vec()),
            _ => {}
        }
        self
    }

    pub fn with_special_text(mut self, kind: SpecialText) -> Self {
        if let TypeVariant::Text { special_text, .. } = &mut self.variant {
            *special_text = kind;
        }
        self
    }

    pub fn with_read_type(mut self, read_type: ReadType) -> Self {
        self.read_type = read_type;
        self
    }

    pub fn add_fixed_dimension(mut self, dim: i64) -> Result<Self> {
        self.push_dim(Dim::Fixed(dim))?;
        Ok(self)
    }

    pub fn add_variable_dimension(mut self, expr: Expr) -> Result<Self> {
        self.push_dim(Dim::Expr(expr))?;
        Ok(self)
    }

    pub fn add_dynamic_dimension(mut self) -> Result<Self> {
        self.push_dim(Dim::Dynamic)?;
        Ok(self)
    }

    fn push_dim(&mut self, dim: Dim) -> Result<()> {
        let TypeVariant::Array { dims, .. } = &mut self.variant else {
            return Err(Error::InvalidArgument(
                "dimensions can only be added to an array type".to_owned(),
            ));
        };
        if dims.len() >= MAX_NUM_DIMS {
            return Err(Error::DataDefinition(format!(
                "maximum number of array dimensions ({MAX_NUM_DIMS}) exceeded"
            )));
        }
        dims.push(dim);
        Ok(())
    }

    pub fn add_field(&mut self, field: Field) -> Result<()> {
        let TypeVariant::Record(record) = &mut self.variant else {
            return Err(Error::InvalidArgument(
                "fields can only be added to a record type".to_owned(),
            ));
        };
        if record.name_index.contains_key(&field.name) {
            return Err(Error::DataDefinition(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }
        let index = record.fields.len();
        record.name_index.insert(field.name.clone(), index);
        record
            .real_name_index
            .insert(field.real_name().to_owned(), index);
        record.has_hidden_fields |= field.hidden;
        record.has_optional_fields |= field.optional;
        record.fields.push(field);
        Ok(())
    }

    // Read-only queries.

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn class(&self) -> TypeClass {
        self.class
    }

    pub fn read_type(&self) -> ReadType {
        self.read_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The statically known bit size, or `None` when the size depends on
    /// product content. Dynamic sizes are answered through a cursor.
    pub fn bit_size(&self) -> Option<i64> {
        self.bit_size
    }

    pub fn attributes(&self) -> Option<TypeId> {
        self.attributes
    }

    pub fn unit(&self) -> Option<&str> {
        match &self.variant {
            TypeVariant::Number { unit, .. } | TypeVariant::Special { unit, .. } => {
                unit.as_deref()
            }
            _ => None,
        }
    }

    pub fn conversion(&self) -> Option<&Conversion> {
        match &self.variant {
            TypeVariant::Number { conversion, .. } => conversion.as_ref(),
            _ => None,
        }
    }

    pub fn endianness(&self) -> Endianness {
        match &self.variant {
            TypeVariant::Number { endianness, .. } => *endianness,
            _ => Endianness::default(),
        }
    }

    pub(crate) fn int_mappings(&self) -> &[AsciiIntegerMapping] {
        match &self.variant {
            TypeVariant::Number { int_mappings, .. } => int_mappings,
            _ => &[],
        }
    }

    pub(crate) fn float_mappings(&self) -> &[AsciiFloatMapping] {
        match &self.variant {
            TypeVariant::Number { float_mappings, .. } => float_mappings,
            _ => &[],
        }
    }

    pub fn fixed_value(&self) -> Option<&str> {
        match &self.variant {
            TypeVariant::Text { fixed_value, .. } => fixed_value.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn special_text(&self) -> SpecialText {
        match &self.variant {
            TypeVariant::Text { special_text, .. } => *special_text,
            _ => SpecialText::Default,
        }
    }

    pub fn num_fields(&self) -> usize {
        match &self.variant {
            TypeVariant::Record(record) => record.fields.len(),
            _ => 0,
        }
    }

    pub fn field(&self, index: usize) -> Result<&Field> {
        let TypeVariant::Record(record) = &self.variant else {
            return Err(Error::InvalidType(format!(
                "current type is {}, not a record",
                self.class
            )));
        };
        record.fields.get(index).ok_or_else(|| {
            Error::InvalidIndex(format!(
                "field index ({index}) is not in the range [0:{})",
                record.fields.len()
            ))
        })
    }

    pub(crate) fn record_ref(&self) -> Option<&RecordType> {
        match &self.variant {
            TypeVariant::Record(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn record_mut(&mut self) -> Option<&mut RecordType> {
        match &mut self.variant {
            TypeVariant::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_union(&self) -> bool {
        self.record_ref().is_some_and(|r| r.is_union)
    }

    pub(crate) fn union_field_expr(&self) -> Option<&Expr> {
        self.record_ref().and_then(|r| r.union_field_expr.as_ref())
    }

    pub fn array_base(&self) -> Option<TypeId> {
        match &self.variant {
            TypeVariant::Array { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub fn array_rank(&self) -> usize {
        match &self.variant {
            TypeVariant::Array { dims, .. } => dims.len(),
            _ => 0,
        }
    }

    pub(crate) fn array_dims(&self) -> &[Dim] {
        match &self.variant {
            TypeVariant::Array { dims, .. } => dims,
            _ => &[],
        }
    }

    /// The fixed extent of dimension `index`, or `None` when the extent is
    /// given by an expression.
    pub fn array_fixed_dim(&self, index: usize) -> Result<Option<i64>> {
        let TypeVariant::Array { dims, .. } = &self.variant else {
            return Err(Error::InvalidType(format!(
                "current type is {}, not an array",
                self.class
            )));
        };
        match dims.get(index) {
            Some(Dim::Fixed(extent)) => Ok(Some(*extent)),
            Some(Dim::Expr(_) | Dim::Dynamic) => Ok(None),
            None => Err(Error::InvalidIndex(format!(
                "dimension index ({index}) is not in the range [0:{})",
                dims.len()
            ))),
        }
    }

    /// The statically known total element count, when every dimension is
    /// fixed.
    pub(crate) fn fixed_num_elements(&self) -> Option<i64> {
        let TypeVariant::Array { dims, .. } = &self.variant else {
            return None;
        };
        let mut total: i64 = 1;
        for dim in dims {
            match dim {
                Dim::Fixed(extent) => total *= extent,
                Dim::Expr(_) | Dim::Dynamic => return None,
            }
        }
        Some(total)
    }

    pub fn special_kind(&self) -> Option<SpecialKind> {
        match &self.variant {
            TypeVariant::Special { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn special_base(&self) -> Option<TypeId> {
        match &self.variant {
            TypeVariant::Special { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub(crate) fn special_value_expr(&self) -> Option<&Expr> {
        match &self.variant {
            TypeVariant::Special { value_expr, .. } => value_expr.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn size_expr(&self) -> Option<&SizeExpr> {
        self.size_expr.as_ref()
    }
}

/// Arena of type descriptions plus the root type of a product definition.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    types: Vec<Type>,
    root: Option<TypeId>,
    no_data: HashMap<Format, TypeId>,
    empty_record: HashMap<Format, TypeId>,
}

impl Definition {
    pub fn new() -> Self {
        Definition::default()
    }

    /// Validate `typ` and move it into the arena.
    pub fn add(&mut self, typ: Type) -> Result<TypeId> {
        self.validate(&typ)?;
        let typ = self.finalize(typ);
        let id = TypeId(self.types.len() as u32);
        self.types.push(typ);
        Ok(id)
    }

    pub fn set_root(&mut self, root: TypeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<TypeId> {
        self.root
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.0 as usize]
    }

    /// The memoized no-data type for `format`, used as the synthetic frame
    /// for unavailable optional fields.
    pub(crate) fn no_data(&mut self, format: Format) -> TypeId {
        if let Some(id) = self.no_data.get(&format) {
            return *id;
        }
        let base = Type::raw(format).with_bit_size(0);
        let base_id = TypeId(self.types.len() as u32);
        self.types.push(base);
        let mut typ = Type::no_data(format, base_id);
        typ.bit_size = Some(0);
        let id = TypeId(self.types.len() as u32);
        self.types.push(typ);
        self.no_data.insert(format, id);
        id
    }

    pub(crate) fn no_data_id(&self, format: Format) -> Option<TypeId> {
        self.no_data.get(&format).copied()
    }

    pub(crate) fn empty_record_id(&self, format: Format) -> Option<TypeId> {
        self.empty_record.get(&format).copied()
    }

    /// The memoized empty record for `format`, used as the attribute record
    /// of nodes without attributes.
    pub(crate) fn empty_record(&mut self, format: Format) -> TypeId {
        if let Some(id) = self.empty_record.get(&format) {
            return *id;
        }
        let mut typ = Type::record(format);
        typ.bit_size = Some(0);
        let id = TypeId(self.types.len() as u32);
        self.types.push(typ);
        self.empty_record.insert(format, id);
        id
    }

    fn validate(&self, typ: &Type) -> Result<()> {
        match &typ.variant {
            TypeVariant::Number { endianness, .. } => {
                let bits = typ.bit_size;
                match typ.class {
                    TypeClass::Integer => {
                        if !typ.read_type.is_integer() {
                            return Err(Error::DataDefinition(format!(
                                "invalid read type ({}) for integer type",
                                typ.read_type
                            )));
                        }
                        if typ.format == Format::Binary {
                            if let Some(bits) = bits {
                                if !(1..=64).contains(&bits) {
                                    return Err(Error::DataDefinition(format!(
                                        "invalid bit size ({bits}) for binary integer type"
                                    )));
                                }
                            }
                        } else if let Some(bits) = bits {
                            if bits % 8 != 0 || bits / 8 > MAX_ASCII_NUMBER_LENGTH {
                                return Err(Error::DataDefinition(format!(
                                    "invalid bit size ({bits}) for {} integer type",
                                    typ.format
                                )));
                            }
                        }
                    }
                    TypeClass::Real => {
                        if !matches!(typ.read_type, ReadType::Float | ReadType::Double) {
                            return Err(Error::DataDefinition(format!(
                                "invalid read type ({}) for real type",
                                typ.read_type
                            )));
                        }
                        if typ.format == Format::Binary {
                            let expected = match typ.read_type {
                                ReadType::Float => 32,
                                _ => 64,
                            };
                            if let Some(bits) = bits {
                                if bits != expected {
                                    return Err(Error::DataDefinition(format!(
                                        "invalid bit size ({bits}) for binary {} type",
                                        typ.read_type
                                    )));
                                }
                            }
                        }
                    }
                    _ => unreachable!(),
                }
                if *endianness == Endianness::Little {
                    if let Some(bits) = bits {
                        if typ.format == Format::Binary && bits % 8 != 0 {
                            return Err(Error::DataDefinition(format!(
                                "little endian binary numbers require a whole number of bytes \
                                 (bit size is {bits})"
                            )));
                        }
                    }
                }
            }
            TypeVariant::Text { fixed_value, .. } => {
                if typ.read_type == ReadType::Char {
                    if typ.bit_size != Some(8) {
                        return Err(Error::DataDefinition(
                            "char text type requires a bit size of 8".to_owned(),
                        ));
                    }
                } else if typ.read_type != ReadType::String {
                    return Err(Error::DataDefinition(format!(
                        "invalid read type ({}) for text type",
                        typ.read_type
                    )));
                }
                if let Some(value) = fixed_value {
                    match typ.bit_size {
                        Some(bits) if bits == 8 * value.len() as i64 => {}
                        Some(bits) => {
                            return Err(Error::DataDefinition(format!(
                                "byte size ({}) of text type does not match length of fixed \
                                 value ({})",
                                bits / 8,
                                value.len()
                            )));
                        }
                        None => {}
                    }
                }
            }
            TypeVariant::Raw { fixed_value } => {
                if let (Some(value), Some(bits)) = (fixed_value, typ.bit_size) {
                    if (bits + 7) / 8 != value.len() as i64 {
                        return Err(Error::DataDefinition(format!(
                            "byte size ({}) of raw type does not match length of fixed value \
                             ({})",
                            (bits + 7) / 8,
                            value.len()
                        )));
                    }
                }
            }
            TypeVariant::Array { base, dims } => {
                self.check_id(*base)?;
                for dim in dims {
                    if let Dim::Fixed(extent) = dim {
                        if *extent < 0 {
                            return Err(Error::DataDefinition(format!(
                                "invalid array dimension ({extent})"
                            )));
                        }
                    }
                }
            }
            TypeVariant::Record(record) => {
                if record.is_union {
                    if record.union_field_expr.is_none() {
                        return Err(Error::DataDefinition(
                            "union record requires a field expression".to_owned(),
                        ));
                    }
                    if record.fields.is_empty() {
                        return Err(Error::DataDefinition(
                            "union record requires at least one field".to_owned(),
                        ));
                    }
                } else if record.union_field_expr.is_some() {
                    return Err(Error::DataDefinition(
                        "only union records can have a field expression".to_owned(),
                    ));
                }
                for field in &record.fields {
                    self.check_id(field.type_id)?;
                }
            }
            TypeVariant::Special { base, kind, .. } => {
                self.check_id(*base)?;
                if *kind == SpecialKind::Time && typ.special_value_expr().is_none() {
                    return Err(Error::DataDefinition(
                        "time type requires a value expression".to_owned(),
                    ));
                }
            }
        }
        if let Some(attributes) = typ.attributes {
            self.check_id(attributes)?;
        }
        Ok(())
    }

    fn check_id(&self, id: TypeId) -> Result<()> {
        if (id.0 as usize) < self.types.len() {
            Ok(())
        } else {
            Err(Error::DataDefinition(format!(
                "reference to unknown type ({})",
                id.0
            )))
        }
    }

    /// Fill in derived size information: running field offsets and the
    /// total bit size of compound types, where statically known.
    fn finalize(&self, mut typ: Type) -> Type {
        match &mut typ.variant {
            TypeVariant::Record(record) if !record.is_union => {
                let mut offset: Option<i64> = Some(0);
                for field in &mut record.fields {
                    if field.bit_offset_expr.is_some() {
                        offset = None;
                    }
                    field.bit_offset = offset;
                    if field.available_expr.is_some() {
                        offset = None;
                    }
                    if let (Some(o), Some(size)) =
                        (offset, self.get(field.type_id).bit_size)
                    {
                        offset = Some(o + size);
                    } else {
                        offset = None;
                    }
                }
                if typ.bit_size.is_none() && typ.size_expr.is_none() {
                    typ.bit_size = offset;
                }
            }
            TypeVariant::Record(record) => {
                // union: every field starts at the record start
                let mut size: Option<i64> = None;
                let mut uniform = true;
                for field in &mut record.fields {
                    field.bit_offset = Some(0);
                    let field_size = self.get(field.type_id).bit_size;
                    match (size, field_size) {
                        (None, Some(s)) => size = Some(s),
                        (Some(prev), Some(s)) if prev == s => {}
                        _ => uniform = false,
                    }
                }
                if typ.bit_size.is_none() && typ.size_expr.is_none() && uniform {
                    typ.bit_size = size;
                }
            }
            TypeVariant::Array { base, dims } => {
                if typ.bit_size.is_none() && typ.size_expr.is_none() {
                    let elem = self.get(*base).bit_size;
                    let mut total = elem;
                    for dim in dims.iter() {
                        match (total, dim) {
                            (Some(t), Dim::Fixed(extent)) => total = Some(t * extent),
                            _ => total = None,
                        }
                    }
                    typ.bit_size = total;
                }
            }
            TypeVariant::Text { fixed_value, .. } => {
                if typ.bit_size.is_none() && typ.size_expr.is_none() {
                    if let Some(value) = fixed_value {
                        typ.bit_size = Some(8 * value.len() as i64);
                    }
                }
            }
            _ => {}
        }
        typ
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_offsets_are_derived() {
        let mut def = Definition::new();
        let a = def
            .add(Type::integer(Format::Binary, ReadType::UInt16).with_bit_size(16))
            .unwrap();
        let b = def
            .add(Type::integer(Format::Binary, ReadType::Int32).with_bit_size(32))
            .unwrap();
        let mut record = Type::record(Format::Binary);
        record.add_field(Field::new("first", a)).unwrap();
        record.add_field(Field::new("second", b)).unwrap();
        let id = def.add(record).unwrap();
        let record = def.get(id);
        assert_eq!(record.bit_size(), Some(48));
        assert_eq!(record.field(0).unwrap().bit_offset, Some(0));
        assert_eq!(record.field(1).unwrap().bit_offset, Some(16));
    }

    #[test]
    fn invalid_bit_sizes_are_rejected() {
        let mut def = Definition::new();
        assert!(matches!(
            def.add(Type::integer(Format::Binary, ReadType::Int8).with_bit_size(0)),
            Err(Error::DataDefinition(_))
        ));
        assert!(matches!(
            def.add(Type::integer(Format::Binary, ReadType::UInt64).with_bit_size(65)),
            Err(Error::DataDefinition(_))
        ));
        assert!(def
            .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(3))
            .is_ok());
    }

    #[test]
    fn fixed_value_text_size_must_match() {
        let mut def = Definition::new();
        assert!(matches!(
            def.add(Type::text(Format::Ascii).with_byte_size(2).with_fixed_value("abc")),
            Err(Error::DataDefinition(_))
        ));
        let id = def
            .add(Type::text(Format::Ascii).with_fixed_value("abc"))
            .unwrap();
        assert_eq!(def.get(id).bit_size(), Some(24));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let mut def = Definition::new();
        let a = def
            .add(Type::integer(Format::Binary, ReadType::UInt8).with_bit_size(8))
            .unwrap();
        let mut record = Type::record(Format::Binary);
        record.add_field(Field::new("value", a)).unwrap();
        assert!(record.add_field(Field::new("value", a)).is_err());
    }

    #[test]
    fn unique_field_names() {
        let mut record = RecordType::default();
        record.name_index.insert("item".to_owned(), 0);
        assert_eq!(record.unique_field_name("item"), "item_2");
        assert_eq!(record.unique_field_name("my-name"), "my_name");
        assert_eq!(record.unique_field_name("2nd"), "_2nd");
    }

    #[test]
    fn array_size_derivation() {
        let mut def = Definition::new();
        let base = def
            .add(Type::integer(Format::Binary, ReadType::Int16).with_bit_size(16))
            .unwrap();
        let array = def
            .add(
                Type::array(Format::Binary, base)
                    .add_fixed_dimension(2)
                    .unwrap()
                    .add_fixed_dimension(3)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(def.get(array).bit_size(), Some(96));
        assert_eq!(def.get(array).fixed_num_elements(), Some(6));
    }
}
