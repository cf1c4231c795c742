//! Cursors: bounded navigation stacks over the logical tree of a product.
//!
//! A cursor is a stack of frames; frame 0 is the product root. Cursors are
//! copy-semantic: `clone()` yields an independent cursor. Navigating to an
//! unavailable optional field yields a synthetic no-data frame instead of
//! failing, so the top frame always carries a valid type.

use crate::backend::BackendTag;
use crate::dynamic::{DynNode, NodeId};
use crate::error::{Error, Result};
use crate::options;
use crate::product::Product;
use crate::types::{
    Dim, Format, SpecialText, Type, TypeClass, TypeId, MAX_NUM_DIMS,
};
use crate::{ascii, netcdf};

/// Maximum navigation depth of a cursor.
pub const MAX_CURSOR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pos {
    /// Schema-described data located at the frame's absolute bit offset.
    File,
    /// The current entity is a dynamic-type node.
    Node(NodeId),
    /// Element `elem` of a data node or NetCDF variable with array type.
    NodeElem { node: NodeId, elem: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) type_id: TypeId,
    pub(crate) pos: Pos,
    /// Index within the parent container (-1 for the root frame).
    pub(crate) index: i64,
    /// Absolute bit offset in the file; -1 when not applicable.
    pub(crate) bit_offset: i64,
}

#[derive(Clone)]
pub struct Cursor<'a> {
    product: &'a Product,
    frames: Vec<Frame>,
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.product, other.product) && self.frames == other.frames
    }
}

impl<'a> Cursor<'a> {
    /// Position a new cursor on the product root.
    pub fn new(product: &'a Product) -> Result<Cursor<'a>> {
        let frame = match product.root_node {
            Some(root) => node_frame(product, root, -1),
            None => Frame {
                type_id: product.root_type,
                pos: Pos::File,
                index: -1,
                bit_offset: 0,
            },
        };
        let mut cursor = Cursor {
            product,
            frames: vec![frame],
        };
        cursor.maybe_bypass_special()?;
        Ok(cursor)
    }

    pub fn product(&self) -> &'a Product {
        self.product
    }

    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().expect("cursor stack is never empty")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("cursor stack is never empty")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Index of the current node within its parent container.
    pub fn index(&self) -> i64 {
        self.frame().index
    }

    pub fn type_id(&self) -> TypeId {
        self.frame().type_id
    }

    pub fn current_type(&self) -> &'a Type {
        self.product.definition.get(self.frame().type_id)
    }

    pub(crate) fn backend_tag(&self) -> BackendTag {
        match self.frame().pos {
            Pos::File => match self.current_type().format() {
                Format::Ascii => BackendTag::Ascii,
                Format::Binary | Format::Memory => BackendTag::Binary,
                Format::NetCdf => BackendTag::NetCdf,
                Format::Xml => BackendTag::Memory,
                Format::Hdf4 => BackendTag::Hdf4,
                Format::Hdf5 => BackendTag::Hdf5,
                Format::Cdf => BackendTag::Cdf,
                Format::Grib => BackendTag::Grib,
            },
            Pos::Node(node) | Pos::NodeElem { node, .. } => {
                match self.product.node(node) {
                    DynNode::NetCdfVar { .. } => BackendTag::NetCdf,
                    _ => BackendTag::Memory,
                }
            }
        }
    }

    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= MAX_CURSOR_DEPTH {
            return Err(Error::InvalidArgument(format!(
                "maximum cursor depth ({MAX_CURSOR_DEPTH}) reached"
            )));
        }
        self.frames.push(frame);
        self.maybe_bypass_special()
    }

    fn maybe_bypass_special(&mut self) -> Result<()> {
        if !options::get().bypass_special_types {
            return Ok(());
        }
        while self.current_type().class() == TypeClass::Special {
            self.use_base_type_of_special_type()?;
        }
        Ok(())
    }

    fn no_data_frame(&self, index: i64, bit_offset: i64) -> Result<Frame> {
        let format = self.current_type().format();
        let type_id = self
            .product
            .definition
            .no_data_id(format)
            .or_else(|| self.product.definition.no_data_id(self.product.format()))
            .ok_or_else(|| {
                Error::DataDefinition(format!("no data singleton missing for {format} format"))
            })?;
        Ok(Frame {
            type_id,
            pos: self.frame().pos,
            index,
            bit_offset,
        })
    }

    // ---- record navigation ----

    fn record_type(&self) -> Result<&'a Type> {
        let typ = self.current_type();
        if typ.class() != TypeClass::Record {
            return Err(Error::InvalidType(format!(
                "cursor does not refer to a record (current type is {})",
                typ.class()
            )));
        }
        Ok(typ)
    }

    pub fn goto_record_field_by_index(&mut self, index: usize) -> Result<()> {
        let typ = self.record_type()?;
        let num_fields = typ.num_fields();
        if index >= num_fields {
            return Err(Error::InvalidIndex(format!(
                "field index ({index}) is not in the range [0:{num_fields})"
            )));
        }
        if typ.is_union() {
            let active = self.available_union_field_index()?;
            if active != index {
                return Err(Error::InvalidType(format!(
                    "field ({index}) is not available in this union (active field is {active})"
                )));
            }
        }
        let field = typ.field(index)?;

        match self.frame().pos {
            Pos::File => {
                let record_offset = self.frame().bit_offset;
                let offset = self.file_field_offset(record_offset, index)?;
                if field.optional {
                    if let Some(expr) = &field.available_expr {
                        if !expr.eval_bool(Some(self))? {
                            let frame = self.no_data_frame(index as i64, offset)?;
                            return self.push_frame(frame);
                        }
                    }
                }
                self.push_frame(Frame {
                    type_id: field.type_id,
                    pos: Pos::File,
                    index: index as i64,
                    bit_offset: offset,
                })
            }
            Pos::Node(node) => match self.product.node(node) {
                DynNode::Record { fields, .. } => match fields.get(index).copied().flatten() {
                    Some(child) => {
                        let frame = node_frame(self.product, child, index as i64);
                        self.push_frame(frame)
                    }
                    None => {
                        let frame = self.no_data_frame(index as i64, -1)?;
                        self.push_frame(frame)
                    }
                },
                _ => Err(Error::InvalidType(
                    "cursor does not refer to a record".to_owned(),
                )),
            },
            Pos::NodeElem { .. } => Err(Error::InvalidType(
                "cursor does not refer to a record".to_owned(),
            )),
        }
    }

    pub fn goto_record_field_by_name(&mut self, name: &str) -> Result<()> {
        let typ = self.record_type()?;
        let record = typ.record_ref().expect("record class");
        let index = record
            .field_index_by_name(name)
            .or_else(|| record.field_index_by_real_name(name))
            .ok_or_else(|| {
                Error::InvalidIndex(format!("record does not contain a field named '{name}'"))
            })?;
        self.goto_record_field_by_index(index)
    }

    pub fn goto_first_record_field(&mut self) -> Result<()> {
        self.goto_record_field_by_index(0)
    }

    pub fn goto_next_record_field(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(Error::InvalidArgument(
                "cursor has no parent record".to_owned(),
            ));
        }
        let index = self.frame().index;
        if index < 0 {
            return Err(Error::InvalidArgument(
                "cursor does not refer to a record field".to_owned(),
            ));
        }
        self.goto_parent()?;
        let result = self.goto_record_field_by_index(index as usize + 1);
        if result.is_err() {
            // restore the cursor on failure
            let _ = self.goto_record_field_by_index(index as usize);
        }
        result
    }

    /// Index of the single active field of the current union record.
    pub fn available_union_field_index(&self) -> Result<usize> {
        let typ = self.record_type()?;
        if !typ.is_union() {
            return Err(Error::InvalidType(
                "cursor does not refer to a union record".to_owned(),
            ));
        }
        let expr = typ.union_field_expr().expect("validated at construction");
        let index = expr.eval_integer(Some(self))?;
        let num_fields = typ.num_fields() as i64;
        if index < 0 || index >= num_fields {
            return Err(Error::InvalidFormat(format!(
                "union field expression yields index ({index}) outside range [0:{num_fields})"
            )));
        }
        Ok(index as usize)
    }

    pub fn goto_available_union_field(&mut self) -> Result<()> {
        let index = self.available_union_field_index()?;
        self.goto_record_field_by_index(index)
    }

    /// Whether field `index` of the current record holds a value.
    pub fn record_field_available_status(&self, index: usize) -> Result<bool> {
        let typ = self.record_type()?;
        let num_fields = typ.num_fields();
        if index >= num_fields {
            return Err(Error::InvalidIndex(format!(
                "field index ({index}) is not in the range [0:{num_fields})"
            )));
        }
        if typ.is_union() {
            return Ok(self.available_union_field_index()? == index);
        }
        let field = typ.field(index)?;
        match self.frame().pos {
            Pos::Node(node) => {
                if let DynNode::Record { fields, .. } = self.product.node(node) {
                    return Ok(fields.get(index).copied().flatten().is_some());
                }
                Ok(true)
            }
            _ => {
                if field.optional {
                    if let Some(expr) = &field.available_expr {
                        return expr.eval_bool(Some(self));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Absolute bit offset of field `index`, honoring explicit offset
    /// expressions and skipping unavailable optional fields.
    fn file_field_offset(&self, record_offset: i64, index: usize) -> Result<i64> {
        let typ = self.record_type()?;
        let record = typ.record_ref().expect("record class");
        if record.is_union {
            return Ok(record_offset);
        }
        let field = &record.fields[index];
        if let Some(expr) = &field.bit_offset_expr {
            return Ok(record_offset + expr.eval_integer(Some(self))?);
        }
        if let Some(offset) = field.bit_offset {
            return Ok(record_offset + offset);
        }
        let mut offset = record_offset;
        for i in 0..index {
            let prev = &record.fields[i];
            if let Some(expr) = &prev.bit_offset_expr {
                offset = record_offset + expr.eval_integer(Some(self))?;
            } else if let Some(fixed) = prev.bit_offset {
                offset = record_offset + fixed;
            }
            if prev.optional {
                if let Some(expr) = &prev.available_expr {
                    if !expr.eval_bool(Some(self))? {
                        continue;
                    }
                }
            }
            let mut scratch = self.clone();
            scratch.push_frame(Frame {
                type_id: prev.type_id,
                pos: Pos::File,
                index: i as i64,
                bit_offset: offset,
            })?;
            offset += scratch.bit_size()?;
        }
        Ok(offset)
    }

    // ---- array navigation ----

    fn array_type(&self) -> Result<&'a Type> {
        let typ = self.current_type();
        if typ.class() != TypeClass::Array {
            return Err(Error::InvalidType(format!(
                "cursor does not refer to an array (current type is {})",
                typ.class()
            )));
        }
        Ok(typ)
    }

    pub fn goto_array_element_by_index(&mut self, index: i64) -> Result<()> {
        let typ = self.array_type()?;
        let base = typ.array_base().expect("array class");
        let check_bounds = options::get().perform_boundary_checks;

        match self.frame().pos {
            Pos::File => {
                if check_bounds {
                    let num_elements = self.num_elements()?;
                    if index < 0 || index >= num_elements {
                        return Err(Error::array_index(index, num_elements));
                    }
                }
                let offset = self.file_element_offset(base, index)?;
                self.push_frame(Frame {
                    type_id: base,
                    pos: Pos::File,
                    index,
                    bit_offset: offset,
                })
            }
            Pos::Node(node) => match self.product.node(node) {
                DynNode::Array { elements, .. } => {
                    let num_elements = elements.len() as i64;
                    if index < 0 || index >= num_elements {
                        return Err(Error::array_index(index, num_elements));
                    }
                    let child = elements[index as usize];
                    let frame = node_frame(self.product, child, index);
                    self.push_frame(frame)
                }
                DynNode::Data { .. } => {
                    if check_bounds {
                        let num_elements = self.num_elements()?;
                        if index < 0 || index >= num_elements {
                            return Err(Error::array_index(index, num_elements));
                        }
                    }
                    self.push_frame(Frame {
                        type_id: base,
                        pos: Pos::NodeElem { node, elem: index },
                        index,
                        bit_offset: -1,
                    })
                }
                DynNode::NetCdfVar { .. } => {
                    if check_bounds {
                        let num_elements = self.num_elements()?;
                        if index < 0 || index >= num_elements {
                            return Err(Error::array_index(index, num_elements));
                        }
                    }
                    let bit_offset =
                        netcdf::element_bit_offset(self.product, node, self.current_type(), index)?;
                    self.push_frame(Frame {
                        type_id: base,
                        pos: Pos::NodeElem { node, elem: index },
                        index,
                        bit_offset,
                    })
                }
                _ => Err(Error::InvalidType(
                    "cursor does not refer to an array".to_owned(),
                )),
            },
            Pos::NodeElem { .. } => Err(Error::InvalidType(
                "cursor does not refer to an array".to_owned(),
            )),
        }
    }

    pub fn goto_array_element(&mut self, subscripts: &[i64]) -> Result<()> {
        let (num_dims, dims) = self.array_dim()?;
        if subscripts.len() != num_dims {
            return Err(Error::ArrayOutOfBounds(format!(
                "number of subscripts ({}) does not match array rank ({num_dims})",
                subscripts.len()
            )));
        }
        let check_bounds = options::get().perform_boundary_checks;
        let mut index: i64 = 0;
        for (d, &sub) in subscripts.iter().enumerate() {
            if check_bounds && (sub < 0 || sub >= dims[d]) {
                return Err(Error::ArrayOutOfBounds(format!(
                    "subscript ({sub}) for dimension {d} exceeds range [0:{})",
                    dims[d]
                )));
            }
            index = index * dims[d] + sub;
        }
        self.goto_array_element_by_index(index)
    }

    pub fn goto_first_array_element(&mut self) -> Result<()> {
        self.goto_array_element_by_index(0)
    }

    pub fn goto_next_array_element(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(Error::InvalidArgument(
                "cursor has no parent array".to_owned(),
            ));
        }
        let index = self.frame().index;
        if index < 0 {
            return Err(Error::InvalidArgument(
                "cursor does not refer to an array element".to_owned(),
            ));
        }
        self.goto_parent()?;
        let result = self.goto_array_element_by_index(index + 1);
        if result.is_err() {
            let _ = self.goto_array_element_by_index(index);
        }
        result
    }

    fn file_element_offset(&self, base: TypeId, index: i64) -> Result<i64> {
        let array_offset = self.frame().bit_offset;
        let base_type = self.product.definition.get(base);
        // a matching mapping or line/whitespace text sizes itself from the
        // content, so elements can only be located by walking
        let content_sized = !base_type.int_mappings().is_empty()
            || !base_type.float_mappings().is_empty()
            || base_type.special_text() != SpecialText::Default;
        if !content_sized {
            if let Some(size) = base_type.bit_size() {
                return Ok(array_offset + index * size);
            }
        }
        let mut offset = array_offset;
        for i in 0..index {
            let mut scratch = self.clone();
            scratch.push_frame(Frame {
                type_id: base,
                pos: Pos::File,
                index: i,
                bit_offset: offset,
            })?;
            offset += scratch.bit_size()?;
        }
        Ok(offset)
    }

    // ---- other navigation ----

    pub fn goto_attributes(&mut self) -> Result<()> {
        let attributes = match self.frame().pos {
            Pos::Node(node) => self.product.node(node).attributes(),
            _ => None,
        };
        match attributes {
            Some(node) => {
                let mut frame = node_frame(self.product, node, -1);
                frame.bit_offset = -1;
                self.push_frame(frame)
            }
            None => {
                let format = self.current_type().format();
                let type_id = self
                    .product
                    .definition
                    .empty_record_id(format)
                    .or_else(|| self.product.definition.empty_record_id(self.product.format()))
                    .ok_or_else(|| {
                        Error::DataDefinition(format!(
                            "empty attribute record missing for {format} format"
                        ))
                    })?;
                self.push_frame(Frame {
                    type_id,
                    pos: self.frame().pos,
                    index: -1,
                    bit_offset: -1,
                })
            }
        }
    }

    pub fn goto_parent(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(Error::InvalidArgument(
                "cursor is already at the product root".to_owned(),
            ));
        }
        self.frames.pop();
        Ok(())
    }

    pub fn goto_root(&mut self) -> Result<()> {
        self.frames.truncate(1);
        Ok(())
    }

    /// Replace the current special-typed frame by its base type. No-op for
    /// non-special types.
    pub fn use_base_type_of_special_type(&mut self) -> Result<()> {
        let typ = self.current_type();
        if typ.class() != TypeClass::Special {
            return Ok(());
        }
        let base = typ.special_base().expect("special class");
        match self.frame().pos {
            Pos::Node(node) => {
                if let DynNode::Special { base: base_node, .. } = self.product.node(node) {
                    let index = self.frame().index;
                    let frame = node_frame(self.product, *base_node, index);
                    *self.frame_mut() = frame;
                    return Ok(());
                }
                self.frame_mut().type_id = base;
                Ok(())
            }
            _ => {
                self.frame_mut().type_id = base;
                Ok(())
            }
        }
    }

    /// Rebase the cursor on the synthetic per-line view of an ASCII
    /// product.
    pub(crate) fn goto_asciilines(&mut self) -> Result<()> {
        let lines = self.product.asciilines.ok_or_else(|| {
            Error::Expression(format!(
                "'asciiline' not allowed for {} files",
                self.product.format()
            ))
        })?;
        self.frames.clear();
        self.frames.push(node_frame(self.product, lines, -1));
        Ok(())
    }

    // ---- queries ----

    /// Element count of the current node: array element total, field count
    /// for records, 1 for leaves.
    pub fn num_elements(&self) -> Result<i64> {
        let typ = self.current_type();
        match typ.class() {
            TypeClass::Array => {
                if let Pos::Node(node) = self.frame().pos {
                    if let DynNode::Array { elements, .. } = self.product.node(node) {
                        return Ok(elements.len() as i64);
                    }
                }
                if let Some(total) = typ.fixed_num_elements() {
                    return Ok(total);
                }
                let (num_dims, dims) = self.array_dim()?;
                Ok(dims[..num_dims].iter().product())
            }
            TypeClass::Record => Ok(typ.num_fields() as i64),
            _ => Ok(1),
        }
    }

    /// Rank and per-dimension extents of the current array.
    pub fn array_dim(&self) -> Result<(usize, [i64; MAX_NUM_DIMS])> {
        let typ = self.array_type()?;
        let mut result = [0i64; MAX_NUM_DIMS];
        let dims = typ.array_dims();
        for (d, dim) in dims.iter().enumerate() {
            result[d] = match dim {
                Dim::Fixed(extent) => *extent,
                Dim::Expr(expr) => expr.eval_integer(Some(self))?,
                Dim::Dynamic => match self.frame().pos {
                    Pos::Node(node) => match self.product.node(node) {
                        DynNode::Array { elements, .. } => elements.len() as i64,
                        _ => {
                            return Err(Error::DataDefinition(
                                "array extent is not available".to_owned(),
                            ));
                        }
                    },
                    _ => {
                        return Err(Error::DataDefinition(
                            "array extent is not available".to_owned(),
                        ));
                    }
                },
            };
        }
        Ok((dims.len(), result))
    }

    /// Size in bits of the current node, resolving dynamic sizes against
    /// the product.
    pub fn bit_size(&self) -> Result<i64> {
        let typ = self.current_type();
        match self.frame().pos {
            Pos::File => self.file_bit_size(typ),
            Pos::Node(node) => self.node_bit_size(node),
            Pos::NodeElem { .. } => typ.bit_size().ok_or_else(|| {
                Error::DataDefinition("array element size is not available".to_owned())
            }),
        }
    }

    fn file_bit_size(&self, typ: &Type) -> Result<i64> {
        // content-determined ASCII sizes (number mappings, line kinds)
        if self.backend_tag() == BackendTag::Ascii {
            if !typ.int_mappings().is_empty()
                || !typ.float_mappings().is_empty()
                || typ.special_text() != SpecialText::Default
            {
                if let Some(size) = ascii::content_bit_size(self)? {
                    return Ok(size);
                }
            }
        }
        if let Some(size_expr) = typ.size_expr() {
            // compound types can fall back to walking their content; for
            // leaf types the expression is the only source of the size
            let required = !matches!(typ.class(), TypeClass::Record | TypeClass::Array);
            if required || options::get().use_fast_size_expressions {
                let value = size_expr.expr.eval_integer(Some(self))?;
                return Ok(if size_expr.in_bytes { value * 8 } else { value });
            }
        }
        if let Some(size) = typ.bit_size() {
            return Ok(size);
        }
        match typ.class() {
            TypeClass::Record => {
                let record_offset = self.frame().bit_offset;
                let end = self.file_field_offset_end(record_offset)?;
                Ok(end - record_offset)
            }
            TypeClass::Array => {
                let base = typ.array_base().expect("array class");
                let num_elements = self.num_elements()?;
                let base_type = self.product.definition.get(base);
                let content_sized = !base_type.int_mappings().is_empty()
                    || !base_type.float_mappings().is_empty()
                    || base_type.special_text() != SpecialText::Default;
                if !content_sized {
                    if let Some(elem) = base_type.bit_size() {
                        return Ok(elem * num_elements);
                    }
                }
                let end = self.file_element_offset(base, num_elements)?;
                Ok(end - self.frame().bit_offset)
            }
            TypeClass::Special => {
                let mut scratch = self.clone();
                scratch.use_base_type_of_special_type()?;
                scratch.bit_size()
            }
            _ => Err(Error::DataDefinition(format!(
                "size of {} type is not available",
                typ.class()
            ))),
        }
    }

    /// Offset one past the last field, used for dynamic record sizes.
    fn file_field_offset_end(&self, record_offset: i64) -> Result<i64> {
        let typ = self.record_type()?;
        let record = typ.record_ref().expect("record class");
        let num_fields = record.fields.len();
        if num_fields == 0 {
            return Ok(record_offset);
        }
        if record.is_union {
            let active = self.available_union_field_index()?;
            let field = &record.fields[active];
            let mut scratch = self.clone();
            scratch.push_frame(Frame {
                type_id: field.type_id,
                pos: Pos::File,
                index: active as i64,
                bit_offset: record_offset,
            })?;
            return Ok(record_offset + scratch.bit_size()?);
        }
        let last = num_fields - 1;
        let offset = self.file_field_offset(record_offset, last)?;
        let field = &record.fields[last];
        if field.optional {
            if let Some(expr) = &field.available_expr {
                if !expr.eval_bool(Some(self))? {
                    return Ok(offset);
                }
            }
        }
        let mut scratch = self.clone();
        scratch.push_frame(Frame {
            type_id: field.type_id,
            pos: Pos::File,
            index: last as i64,
            bit_offset: offset,
        })?;
        Ok(offset + scratch.bit_size()?)
    }

    fn node_bit_size(&self, node: NodeId) -> Result<i64> {
        match self.product.node(node) {
            DynNode::Data { data, .. } => Ok(8 * data.len() as i64),
            DynNode::Record { fields, .. } => {
                let mut total = 0;
                for child in fields.iter().copied().flatten() {
                    total += self.node_bit_size(child)?;
                }
                Ok(total)
            }
            DynNode::Array { elements, .. } => {
                let mut total = 0;
                for &child in elements {
                    total += self.node_bit_size(child)?;
                }
                Ok(total)
            }
            DynNode::Special { base, .. } => self.node_bit_size(*base),
            DynNode::NetCdfVar { type_id, .. } => {
                self.product.definition.get(*type_id).bit_size().ok_or_else(|| {
                    Error::DataDefinition("variable size is not available".to_owned())
                })
            }
        }
    }

    /// Size in whole bytes (rounded up) of the current node.
    pub fn byte_size(&self) -> Result<i64> {
        Ok((self.bit_size()? + 7) / 8)
    }

    /// Absolute bit offset of the current node in the file, or -1 when the
    /// node is memory-resident.
    pub fn file_bit_offset(&self) -> Result<i64> {
        Ok(self.frame().bit_offset)
    }

    /// Absolute byte offset; fails when the node does not start on a byte
    /// boundary.
    pub fn file_byte_offset(&self) -> Result<i64> {
        let offset = self.frame().bit_offset;
        if offset < 0 {
            return Ok(-1);
        }
        if offset % 8 != 0 {
            return Err(Error::InvalidType(
                "current node does not start at a byte boundary".to_owned(),
            ));
        }
        Ok(offset / 8)
    }

    /// Payload byte count of the current text node.
    pub fn string_length(&self) -> Result<i64> {
        let typ = self.current_type();
        if typ.class() != TypeClass::Text && !self.has_ascii_content()? {
            return Err(Error::InvalidType(
                "cursor does not refer to text".to_owned(),
            ));
        }
        let bits = self.bit_size()?;
        if bits & 7 != 0 {
            return Err(Error::InvalidArgument(format!(
                "text size ({bits} bits) is not a whole number of bytes"
            )));
        }
        Ok(bits / 8)
    }

    /// Whether the current node can be read as text.
    pub fn has_ascii_content(&self) -> Result<bool> {
        let typ = self.current_type();
        Ok(typ.class() == TypeClass::Text
            || typ.class() == TypeClass::Raw
            || self.backend_tag() == BackendTag::Ascii)
    }
}

pub(crate) fn node_frame(product: &Product, node: NodeId, index: i64) -> Frame {
    let dyn_node = product.node(node);
    let bit_offset = match dyn_node {
        DynNode::NetCdfVar { offset, .. } => offset * 8,
        _ => -1,
    };
    Frame {
        type_id: dyn_node.type_id(),
        pos: Pos::Node(node),
        index,
        bit_offset,
    }
}
