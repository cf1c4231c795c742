//! The dynamic-type tree: per-product nodes binding type definitions to
//! actual data.
//!
//! Self-describing formats (XML, NetCDF) and attribute records materialize
//! nodes in an arena owned by the product. Schema-described data (ASCII,
//! binary) carries no per-instance nodes at all: a cursor frame holds the
//! static type plus the running absolute bit offset instead.

use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

#[derive(Debug, Clone)]
pub(crate) enum DynNode {
    /// Memory-resident record: one slot per field of the record type;
    /// `None` marks an absent optional field.
    Record {
        type_id: TypeId,
        fields: Vec<Option<NodeId>>,
        attributes: Option<NodeId>,
    },
    /// Memory-resident array with one node per element.
    Array {
        type_id: TypeId,
        elements: Vec<NodeId>,
        attributes: Option<NodeId>,
    },
    /// Memory-resident leaf data. Text and raw data is stored verbatim;
    /// numbers are stored either as text (ASCII content) or as big-endian
    /// raw bytes, matching the read type of the definition. A data node
    /// whose type is an array of fixed-size elements addresses element `k`
    /// at bit offset `k * element_bit_size` within `data`.
    Data {
        type_id: TypeId,
        data: Vec<u8>,
        attributes: Option<NodeId>,
    },
    /// Memory-resident special value (e.g. an XML time element) wrapping
    /// the node of its base type.
    Special {
        type_id: TypeId,
        base: NodeId,
        attributes: Option<NodeId>,
    },
    /// A NetCDF variable: data lives in the file at `offset`. Record
    /// variables store one chunk per record, `record_stride` bytes apart.
    NetCdfVar {
        type_id: TypeId,
        offset: i64,
        record_var: bool,
        attributes: Option<NodeId>,
    },
}

impl DynNode {
    pub(crate) fn type_id(&self) -> TypeId {
        match self {
            DynNode::Record { type_id, .. }
            | DynNode::Array { type_id, .. }
            | DynNode::Data { type_id, .. }
            | DynNode::Special { type_id, .. }
            | DynNode::NetCdfVar { type_id, .. } => *type_id,
        }
    }

    pub(crate) fn attributes(&self) -> Option<NodeId> {
        match self {
            DynNode::Record { attributes, .. }
            | DynNode::Array { attributes, .. }
            | DynNode::Data { attributes, .. }
            | DynNode::Special { attributes, .. }
            | DynNode::NetCdfVar { attributes, .. } => *attributes,
        }
    }
}
