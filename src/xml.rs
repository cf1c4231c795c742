//! The XML parser driver.
//!
//! A streaming reader drives one of two modes. In schema-directed mode a
//! product definition is provided and the document is validated against it:
//! unknown elements or attributes, absent mandatory ones and text inside
//! record elements are product errors. In schema-synthesizing mode the
//! driver starts from an empty root record and grows the definition as the
//! document unfolds: every element starts out as an empty record, a field
//! that recurs within the same parent is promoted to an array, and a record
//! element that receives non-whitespace text is rewritten to a text type
//! (keeping its attributes).
//!
//! Mixed content is rejected in both modes. CDATA is text. Duplicate
//! attributes keep the first occurrence. Namespaces are expanded into the
//! name with an ASCII space separator, and an `xmlns` attribute is
//! synthesized for namespaced elements.

use std::io::BufReader;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::cursor::MAX_CURSOR_DEPTH;
use crate::dynamic::{DynNode, NodeId};
use crate::error::{Error, Result};
use crate::types::{Definition, Field, Format, Type, TypeClass, TypeId, TypeVariant};

const BUFFER_SIZE: usize = 8192;

type XmlReader<'d> = NsReader<BufReader<&'d [u8]>>;

/// One value slot of a record instance being filled.
#[derive(Debug, Clone)]
enum FieldValue {
    Absent,
    Single(NodeId),
    Multiple(Vec<NodeId>),
}

/// Where the definition of an open element is referenced, so that a
/// record-to-text rewrite can rebind it.
#[derive(Debug, Clone, Copy)]
enum Binding {
    Field { record: TypeId, index: usize },
    ArrayBase { array: TypeId },
}

struct Element {
    /// Definition of this element (record until rewritten).
    type_id: TypeId,
    binding: Option<Binding>,
    /// Field index this element instance lands in within the parent.
    parent_index: usize,
    /// Collected field values when this element is a record.
    values: Vec<FieldValue>,
    attributes: Option<NodeId>,
    text: Vec<u8>,
    xml_name: String,
}

struct Driver<'d> {
    synthesize: bool,
    definition: Definition,
    nodes: Vec<DynNode>,
    stack: Vec<Element>,
    data: &'d [u8],
}

fn is_whitespace(text: &[u8]) -> bool {
    text.iter().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
}

fn local_part(name: &str) -> &str {
    match name.split_once(' ') {
        Some((_, local)) => local,
        None => name,
    }
}

/// The predefined entities plus decimal/hex character references.
fn resolve_entity(name: &[u8]) -> Option<Vec<u8>> {
    match name {
        b"amp" => return Some(b"&".to_vec()),
        b"lt" => return Some(b"<".to_vec()),
        b"gt" => return Some(b">".to_vec()),
        b"apos" => return Some(b"'".to_vec()),
        b"quot" => return Some(b"\"".to_vec()),
        _ => {}
    }
    let digits = name.strip_prefix(b"#")?;
    let code = match digits.strip_prefix(b"x").or_else(|| digits.strip_prefix(b"X")) {
        Some(hex) => u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?,
        None => std::str::from_utf8(digits).ok()?.parse().ok()?,
    };
    Some(char::from_u32(code)?.to_string().into_bytes())
}

fn expanded_name(resolved: ResolveResult, local: &[u8]) -> String {
    let local = String::from_utf8_lossy(local).into_owned();
    match resolved {
        ResolveResult::Bound(namespace) => {
            format!("{} {local}", String::from_utf8_lossy(namespace.as_ref()))
        }
        _ => local,
    }
}

/// Parse an XML product. Without a definition the type tree is synthesized
/// from the document.
pub(crate) fn parse(
    definition: Option<Definition>,
    data: &[u8],
) -> Result<(Definition, Vec<DynNode>, NodeId)> {
    let synthesize = definition.is_none();
    let mut definition = match definition {
        Some(definition) => {
            let root = definition.root().ok_or_else(|| {
                Error::DataDefinition("definition has no root type".to_owned())
            })?;
            let root_type = definition.get(root);
            if root_type.class() != TypeClass::Record || root_type.is_union() {
                return Err(Error::DataDefinition(
                    "the root of an xml definition must be a plain record".to_owned(),
                ));
            }
            definition
        }
        None => Definition::new(),
    };
    definition.no_data(Format::Xml);
    definition.empty_record(Format::Xml);

    let root_id = match definition.root() {
        Some(root) => root,
        None => {
            let root = definition.add(Type::record(Format::Xml))?;
            definition.set_root(root);
            root
        }
    };

    let mut driver = Driver {
        synthesize,
        definition,
        nodes: Vec::new(),
        stack: Vec::new(),
        data,
    };
    driver.stack.push(Element {
        type_id: root_id,
        binding: None,
        parent_index: 0,
        values: vec![FieldValue::Absent; driver.definition.get(root_id).num_fields()],
        attributes: None,
        text: Vec::new(),
        xml_name: String::new(),
    });

    let mut reader = NsReader::from_reader(BufReader::with_capacity(BUFFER_SIZE, data));
    let mut buffer = Vec::new();
    loop {
        let position = reader.buffer_position();
        let event = reader.read_event_into(&mut buffer).map_err(|err| {
            Error::Xml(driver.located(position, &format!("xml parse error: {err}")))
        })?;
        match event {
            Event::Start(start) => driver.open_element(&reader, &start, position)?,
            Event::Empty(start) => {
                driver.open_element(&reader, &start, position)?;
                driver.close_element(position)?;
            }
            Event::End(_) => driver.close_element(position)?,
            Event::Text(text) => {
                let decoded = text.decode().map_err(|err| {
                    Error::Xml(driver.located(position, &format!("xml parse error: {err}")))
                })?;
                driver.character_data(decoded.as_bytes(), position)?;
            }
            Event::CData(cdata) => {
                let bytes = cdata.into_inner().into_owned();
                driver.character_data(&bytes, position)?;
            }
            Event::GeneralRef(entity) => {
                let name = entity.to_vec();
                let replacement: Vec<u8> = match resolve_entity(&name) {
                    Some(replacement) => replacement,
                    None => {
                        return Err(Error::Xml(driver.located(
                            position,
                            &format!(
                                "unknown entity reference '&{};'",
                                String::from_utf8_lossy(&name)
                            ),
                        )));
                    }
                };
                driver.character_data(&replacement, position)?;
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buffer.clear();
    }

    if driver.stack.len() != 1 {
        return Err(Error::Xml("xml document ended prematurely".to_owned()));
    }
    let root_element = driver.stack.pop().expect("root frame");
    let root_node = driver.finish_record(root_element)?;
    Ok((driver.definition, driver.nodes, root_node))
}

impl Driver<'_> {
    fn located(&self, position: u64, message: &str) -> String {
        let upto = (position as usize).min(self.data.len());
        let line = 1 + self.data[..upto].iter().filter(|&&b| b == b'\n').count();
        format!("{message} (line: {line}, byte offset: {position})")
    }

    fn product_error(&self, position: u64, message: String) -> Error {
        Error::Product(self.located(position, &message))
    }

    fn open_element(
        &mut self,
        reader: &XmlReader,
        start: &BytesStart,
        position: u64,
    ) -> Result<()> {
        let (resolved, local) = reader.resolve_element(start.name());
        let name = expanded_name(resolved, local.as_ref());

        if self.stack.len() >= MAX_CURSOR_DEPTH {
            return Err(self.product_error(
                position,
                format!(
                    "xml file exceeds maximum supported hierarchical depth \
                     ({MAX_CURSOR_DEPTH})"
                ),
            ));
        }
        let parent = self.stack.last().expect("document frame");
        let parent_record_id = parent.type_id;
        let parent_xml_name = parent.xml_name.clone();
        if self.definition.get(parent_record_id).class() != TypeClass::Record
            || !is_whitespace(&parent.text)
        {
            return Err(self.product_error(
                position,
                format!("mixed content for element '{parent_xml_name}' is not supported"),
            ));
        }

        // locate or create the field for this element
        let record = self
            .definition
            .get(parent_record_id)
            .record_ref()
            .expect("record class");
        let mut index = record
            .field_index_by_real_name(&name)
            .or_else(|| record.field_index_by_real_name(local_part(&name)));
        if index.is_none() {
            if !self.synthesize {
                let message = if self.stack.len() == 1 {
                    format!("xml element '{name}' is not allowed as root element")
                } else {
                    format!(
                        "xml element '{name}' is not allowed within element \
                         '{parent_xml_name}'"
                    )
                };
                return Err(self.product_error(position, message));
            }
            // all xml elements start out as empty records
            let element_type = self.definition.add(Type::record(Format::Xml))?;
            let parent_type = self.definition.get_mut(parent_record_id);
            let record = parent_type.record_mut().expect("record class");
            let field_name = record.unique_field_name(local_part(&name));
            let new_index = record.fields.len();
            parent_type.add_field(Field::new(&field_name, element_type).with_real_name(&name))?;
            self.stack
                .last_mut()
                .expect("document frame")
                .values
                .push(FieldValue::Absent);
            index = Some(new_index);
        }
        let index = index.expect("resolved above");

        let field_type_id = self
            .definition
            .get(parent_record_id)
            .field(index)?
            .type_id();
        let field_type = self.definition.get(field_type_id);

        // an array field means repeated elements: children use the base type
        let is_array_field =
            field_type.class() == TypeClass::Array && field_type.format() == Format::Xml;
        let already_present = !matches!(
            self.stack.last().expect("document frame").values[index],
            FieldValue::Absent
        );

        let (element_type_id, binding) = if is_array_field {
            (
                field_type.array_base().expect("array class"),
                Some(Binding::ArrayBase {
                    array: field_type_id,
                }),
            )
        } else if already_present {
            // a second occurrence of a scalar field promotes it to an array
            if !self.synthesize {
                return Err(self.product_error(
                    position,
                    format!(
                        "xml element '{name}' is not allowed more than once within element \
                         '{parent_xml_name}'"
                    ),
                ));
            }
            let array_type = self
                .definition
                .add(Type::array(Format::Xml, field_type_id).add_dynamic_dimension()?)?;
            let record = self
                .definition
                .get_mut(parent_record_id)
                .record_mut()
                .expect("record class");
            record.fields[index].type_id = array_type;
            let values = &mut self.stack.last_mut().expect("document frame").values[index];
            if let FieldValue::Single(node) = values {
                *values = FieldValue::Multiple(vec![*node]);
            }
            (
                field_type_id,
                Some(Binding::ArrayBase { array: array_type }),
            )
        } else {
            (
                field_type_id,
                Some(Binding::Field {
                    record: parent_record_id,
                    index,
                }),
            )
        };

        let attributes = self.attribute_record(reader, start, element_type_id, &name, position)?;

        let element_type = self.definition.get(element_type_id);
        let values = if element_type.class() == TypeClass::Record {
            vec![FieldValue::Absent; element_type.num_fields()]
        } else {
            Vec::new()
        };
        self.stack.push(Element {
            type_id: element_type_id,
            binding,
            parent_index: index,
            values,
            attributes,
            text: Vec::new(),
            xml_name: name,
        });
        Ok(())
    }

    /// Build the attribute record node for an element, extending or
    /// validating the attribute record type of its definition.
    fn attribute_record(
        &mut self,
        reader: &XmlReader,
        start: &BytesStart,
        element_type: TypeId,
        element_name: &str,
        position: u64,
    ) -> Result<Option<NodeId>> {
        let mut pairs: Vec<(String, Vec<u8>)> = Vec::new();
        // the namespace part of the element name becomes an 'xmlns'
        // attribute
        if let Some((namespace, _)) = element_name.split_once(' ') {
            pairs.push(("xmlns".to_owned(), namespace.as_bytes().to_vec()));
        }
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| {
                self.product_error(position, format!("invalid xml attribute ({err})"))
            })?;
            let raw_key = attribute.key.as_ref();
            if raw_key == b"xmlns" || raw_key.starts_with(b"xmlns:") {
                continue;
            }
            let (resolved, local) = reader.resolve_attribute(attribute.key);
            let local = String::from_utf8_lossy(local.as_ref()).into_owned();
            let name = expanded_name(resolved, local.as_bytes());
            let value = attribute
                .unescape_value()
                .map_err(|err| {
                    self.product_error(position, format!("invalid xml attribute ({err})"))
                })?
                .into_owned()
                .into_bytes();
            // only the first occurrence of an attribute name is kept
            if pairs
                .iter()
                .any(|(existing, _)| local_part(existing) == local_part(&name))
            {
                continue;
            }
            pairs.push((name, value));
        }

        let attr_record_id = self.definition.get(element_type).attributes();
        if pairs.is_empty() && attr_record_id.is_none() {
            return Ok(None);
        }

        let attr_record_id = match attr_record_id {
            Some(id) => id,
            None => {
                if !self.synthesize {
                    return Err(self.product_error(
                        position,
                        format!("xml attribute '{}' is not allowed", pairs[0].0),
                    ));
                }
                let id = self.definition.add(Type::record(Format::Xml))?;
                self.definition.get_mut(element_type).attributes = Some(id);
                id
            }
        };

        let num_fields = self.definition.get(attr_record_id).num_fields();
        let mut field_nodes: Vec<Option<NodeId>> = vec![None; num_fields];
        for (name, value) in &pairs {
            let record = self
                .definition
                .get(attr_record_id)
                .record_ref()
                .expect("record class");
            let mut index = record
                .field_index_by_real_name(name)
                .or_else(|| record.field_index_by_real_name(local_part(name)));
            if index.is_none() {
                if !self.synthesize {
                    return Err(self.product_error(
                        position,
                        format!("xml attribute '{name}' is not allowed"),
                    ));
                }
                let text_type = self.definition.add(Type::text(Format::Xml))?;
                let attr_type = self.definition.get_mut(attr_record_id);
                let record = attr_type.record_mut().expect("record class");
                let field_name = record.unique_field_name(local_part(name));
                let new_index = record.fields.len();
                attr_type.add_field(Field::new(&field_name, text_type).with_real_name(name))?;
                field_nodes.push(None);
                index = Some(new_index);
            }
            let index = index.expect("resolved above");
            if field_nodes[index].is_some() {
                continue;
            }
            let type_id = self.definition.get(attr_record_id).field(index)?.type_id();
            let node = NodeId(self.nodes.len() as u32);
            self.nodes.push(DynNode::Data {
                type_id,
                data: value.clone(),
                attributes: None,
            });
            field_nodes[index] = Some(node);
        }

        // absent attributes make their definition optional (or are errors
        // in schema-directed mode)
        for index in 0..self.definition.get(attr_record_id).num_fields() {
            if field_nodes[index].is_none()
                && !self.definition.get(attr_record_id).field(index)?.is_optional()
            {
                if !self.synthesize {
                    let name = self
                        .definition
                        .get(attr_record_id)
                        .field(index)?
                        .real_name()
                        .to_owned();
                    return Err(self.product_error(
                        position,
                        format!("mandatory xml attribute '{name}' is missing"),
                    ));
                }
                let record = self
                    .definition
                    .get_mut(attr_record_id)
                    .record_mut()
                    .expect("record class");
                record.fields[index].optional = true;
                record.has_optional_fields = true;
            }
        }

        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(DynNode::Record {
            type_id: attr_record_id,
            fields: field_nodes,
            attributes: None,
        });
        Ok(Some(node))
    }

    fn character_data(&mut self, text: &[u8], position: u64) -> Result<()> {
        let type_id = self.stack.last().expect("document frame").type_id;
        let is_record = self.definition.get(type_id).class() == TypeClass::Record;
        if is_record && !self.synthesize && !is_whitespace(text) {
            let name = self.stack.last().expect("document frame").xml_name.clone();
            return Err(self.product_error(
                position,
                format!("non-whitespace character data not allowed for element '{name}'"),
            ));
        }
        self.stack
            .last_mut()
            .expect("document frame")
            .text
            .extend_from_slice(text);
        Ok(())
    }

    fn rebind(&mut self, binding: Option<Binding>, new_type: TypeId) {
        match binding {
            Some(Binding::Field { record, index }) => {
                let record = self
                    .definition
                    .get_mut(record)
                    .record_mut()
                    .expect("record class");
                record.fields[index].type_id = new_type;
            }
            Some(Binding::ArrayBase { array }) => {
                if let TypeVariant::Array { base, .. } =
                    &mut self.definition.get_mut(array).variant
                {
                    *base = new_type;
                }
            }
            None => {}
        }
    }

    fn close_element(&mut self, position: u64) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::Xml("unbalanced xml end tag".to_owned()));
        }
        let mut element = self.stack.pop().expect("open element");
        let class = self.definition.get(element.type_id).class();
        let parent_index = element.parent_index;

        let node = if class == TypeClass::Record {
            if !is_whitespace(&element.text) {
                // synthesis mode: rewrite the record definition to text,
                // unless child fields have already accumulated
                if self.definition.get(element.type_id).num_fields() > 0 {
                    return Err(self.product_error(
                        position,
                        format!(
                            "mixed content for element '{}' is not supported",
                            element.xml_name
                        ),
                    ));
                }
                let attributes = self.definition.get(element.type_id).attributes();
                let mut text_type = Type::text(Format::Xml);
                text_type.attributes = attributes;
                let new_type = self.definition.add(text_type)?;
                self.rebind(element.binding, new_type);
                let node = NodeId(self.nodes.len() as u32);
                self.nodes.push(DynNode::Data {
                    type_id: new_type,
                    data: std::mem::take(&mut element.text),
                    attributes: element.attributes,
                });
                node
            } else {
                self.finish_record(element)?
            }
        } else if class == TypeClass::Special {
            // schema-directed special (e.g. time): wrap the base value
            let base_type = self
                .definition
                .get(element.type_id)
                .special_base()
                .expect("special class");
            let base = NodeId(self.nodes.len() as u32);
            self.nodes.push(DynNode::Data {
                type_id: base_type,
                data: std::mem::take(&mut element.text),
                attributes: None,
            });
            let node = NodeId(self.nodes.len() as u32);
            self.nodes.push(DynNode::Special {
                type_id: element.type_id,
                base,
                attributes: element.attributes,
            });
            node
        } else {
            let node = NodeId(self.nodes.len() as u32);
            self.nodes.push(DynNode::Data {
                type_id: element.type_id,
                data: std::mem::take(&mut element.text),
                attributes: element.attributes,
            });
            node
        };

        // attach to the parent instance
        let index = parent_index;
        let parent = self.stack.last_mut().expect("document frame");
        match &mut parent.values[index] {
            slot @ FieldValue::Absent => *slot = FieldValue::Single(node),
            FieldValue::Single(first) => {
                let first = *first;
                parent.values[index] = FieldValue::Multiple(vec![first, node]);
            }
            FieldValue::Multiple(nodes) => nodes.push(node),
        }
        Ok(())
    }

    /// Turn a completed record element into its node, materializing array
    /// fields and applying end-of-element optionality fixes.
    fn finish_record(&mut self, element: Element) -> Result<NodeId> {
        let mut fields: Vec<Option<NodeId>> = Vec::with_capacity(element.values.len());
        for (index, value) in element.values.into_iter().enumerate() {
            let field_type_id = self.definition.get(element.type_id).field(index)?.type_id();
            let is_array = {
                let field_type = self.definition.get(field_type_id);
                field_type.class() == TypeClass::Array && field_type.format() == Format::Xml
            };
            let slot = match value {
                FieldValue::Absent => {
                    if !self
                        .definition
                        .get(element.type_id)
                        .field(index)?
                        .is_optional()
                    {
                        if !self.synthesize {
                            let name = self
                                .definition
                                .get(element.type_id)
                                .field(index)?
                                .real_name()
                                .to_owned();
                            return Err(Error::Product(format!(
                                "mandatory xml element '{name}' is missing"
                            )));
                        }
                        // an absent field makes its definition optional
                        let record = self
                            .definition
                            .get_mut(element.type_id)
                            .record_mut()
                            .expect("record class");
                        record.fields[index].optional = true;
                        record.has_optional_fields = true;
                    }
                    None
                }
                FieldValue::Single(node) => {
                    if is_array {
                        let array = NodeId(self.nodes.len() as u32);
                        self.nodes.push(DynNode::Array {
                            type_id: field_type_id,
                            elements: vec![node],
                            attributes: None,
                        });
                        Some(array)
                    } else {
                        Some(node)
                    }
                }
                FieldValue::Multiple(elements) => {
                    let array = NodeId(self.nodes.len() as u32);
                    self.nodes.push(DynNode::Array {
                        type_id: field_type_id,
                        elements,
                        attributes: None,
                    });
                    Some(array)
                }
            };
            fields.push(slot);
        }
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(DynNode::Record {
            type_id: element.type_id,
            fields,
            attributes: element.attributes,
        });
        Ok(node)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthesize(data: &[u8]) -> (Definition, Vec<DynNode>, NodeId) {
        parse(None, data).unwrap()
    }

    #[test]
    fn repeated_element_promotes_to_array() {
        let (definition, nodes, root) = synthesize(b"<a><b>1</b><b>2</b></a>");
        let DynNode::Record { type_id, fields, .. } = &nodes[root.0 as usize] else {
            panic!("expected record root");
        };
        let root_type = definition.get(*type_id);
        assert_eq!(root_type.num_fields(), 1);
        assert_eq!(root_type.field(0).unwrap().name(), "a");
        let a_node = fields[0].unwrap();
        let DynNode::Record { type_id, fields, .. } = &nodes[a_node.0 as usize] else {
            panic!("expected record for <a>");
        };
        let a_type = definition.get(*type_id);
        assert_eq!(a_type.num_fields(), 1);
        let b_type = definition.get(a_type.field(0).unwrap().type_id());
        assert_eq!(b_type.class(), TypeClass::Array);
        let DynNode::Array { elements, .. } = &nodes[fields[0].unwrap().0 as usize] else {
            panic!("expected array for <b>");
        };
        assert_eq!(elements.len(), 2);
        let DynNode::Data { data, .. } = &nodes[elements[0].0 as usize] else {
            panic!("expected data node");
        };
        assert_eq!(data, b"1");
    }

    #[test]
    fn record_with_text_becomes_text() {
        let (definition, nodes, root) = synthesize(b"<a attr=\"x\">payload</a>");
        let DynNode::Record { type_id, fields, .. } = &nodes[root.0 as usize] else {
            panic!("expected record root");
        };
        let a_type_id = definition.get(*type_id).field(0).unwrap().type_id();
        assert_eq!(definition.get(a_type_id).class(), TypeClass::Text);
        let DynNode::Data { data, attributes, .. } = &nodes[fields[0].unwrap().0 as usize]
        else {
            panic!("expected data node");
        };
        assert_eq!(data, b"payload");
        assert!(attributes.is_some());
    }

    #[test]
    fn array_elements_rewrite_their_base() {
        let (definition, nodes, root) = synthesize(b"<a><b></b><b>text</b></a>");
        let DynNode::Record { type_id, fields, .. } = &nodes[root.0 as usize] else {
            panic!("expected record root");
        };
        let a_node = fields[0].unwrap();
        let DynNode::Record { type_id: a_type, fields, .. } = &nodes[a_node.0 as usize] else {
            panic!("expected record for <a>");
        };
        let b_field = definition.get(*a_type).field(0).unwrap().type_id();
        let b_type = definition.get(b_field);
        assert_eq!(b_type.class(), TypeClass::Array);
        let base = definition.get(b_type.array_base().unwrap());
        assert_eq!(base.class(), TypeClass::Text);
        let DynNode::Array { elements, .. } = &nodes[fields[0].unwrap().0 as usize] else {
            panic!("expected array for <b>");
        };
        assert_eq!(elements.len(), 2);
        let _ = type_id;
    }

    #[test]
    fn mixed_content_is_rejected() {
        assert!(parse(None, b"<a>text<b>1</b></a>").is_err());
        assert!(parse(None, b"<a><b>1</b>text</a>").is_err());
    }

    #[test]
    fn cdata_is_text() {
        let (_, nodes, root) = synthesize(b"<a><![CDATA[1 < 2]]></a>");
        let DynNode::Record { fields, .. } = &nodes[root.0 as usize] else {
            panic!("expected record root");
        };
        let DynNode::Data { data, .. } = &nodes[fields[0].unwrap().0 as usize] else {
            panic!("expected data node");
        };
        assert_eq!(data, b"1 < 2");
    }

    #[test]
    fn namespaces_expand_with_a_space() {
        let (definition, nodes, root) =
            synthesize(b"<n:a xmlns:n=\"urn:x\"><n:b>1</n:b></n:a>");
        let DynNode::Record { type_id, fields, .. } = &nodes[root.0 as usize] else {
            panic!("expected record root");
        };
        let field = definition.get(*type_id).field(0).unwrap();
        assert_eq!(field.real_name(), "urn:x a");
        assert_eq!(field.name(), "a");
        // the namespace is exposed as a synthesized xmlns attribute
        let DynNode::Record { attributes, .. } = &nodes[fields[0].unwrap().0 as usize] else {
            panic!("expected record for <a>");
        };
        let attr_record = attributes.expect("attributes present");
        let DynNode::Record { fields, type_id, .. } = &nodes[attr_record.0 as usize] else {
            panic!("expected attribute record");
        };
        assert_eq!(definition.get(*type_id).field(0).unwrap().name(), "xmlns");
        let DynNode::Data { data, .. } = &nodes[fields[0].unwrap().0 as usize] else {
            panic!("expected data node");
        };
        assert_eq!(data, b"urn:x");
    }

    #[test]
    fn strict_mode_rejects_unknown_elements() {
        let mut definition = Definition::new();
        let text = definition.add(Type::text(Format::Xml)).unwrap();
        let mut a = Type::record(Format::Xml);
        a.add_field(Field::new("b", text)).unwrap();
        let a_id = definition.add(a).unwrap();
        let mut root = Type::record(Format::Xml);
        root.add_field(Field::new("a", a_id)).unwrap();
        let root_id = definition.add(root).unwrap();
        definition.set_root(root_id);

        assert!(parse(Some(definition.clone()), b"<a><b>ok</b></a>").is_ok());
        assert!(parse(Some(definition.clone()), b"<a><c>bad</c></a>").is_err());
        assert!(parse(Some(definition), b"<a><b>1</b><b>2</b></a>").is_err());
    }

    #[test]
    fn errors_carry_line_and_offset() {
        let err = parse(None, b"<a>\n<b>1</b>\ntext</a>").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line: 3"), "{message}");
        assert!(message.contains("byte offset"), "{message}");
    }
}
