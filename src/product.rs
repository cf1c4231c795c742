//! Product handles: opening, format detection and product-scoped state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::ascii;
use crate::dynamic::{DynNode, NodeId};
use crate::error::{Error, Result};
use crate::netcdf;
use crate::options;
use crate::types::{Definition, Format, TypeId};
use crate::xml;

pub(crate) enum Storage {
    Mmap(Mmap),
    Buffer(Vec<u8>),
}

impl Storage {
    pub(crate) fn data(&self) -> &[u8] {
        match self {
            Storage::Mmap(map) => map,
            Storage::Buffer(buffer) => buffer,
        }
    }
}

/// An open product. A product is not safe to access from multiple threads
/// concurrently; callers must serialize access per handle.
pub struct Product {
    pub(crate) storage: Storage,
    pub(crate) filename: String,
    pub(crate) file_size: i64,
    pub(crate) format: Format,
    pub(crate) definition: Definition,
    pub(crate) nodes: Vec<DynNode>,
    pub(crate) root_node: Option<NodeId>,
    pub(crate) root_type: TypeId,
    pub(crate) product_class: Option<String>,
    pub(crate) product_type: Option<String>,
    pub(crate) product_version: i64,
    pub(crate) variables: RefCell<HashMap<String, Vec<i64>>>,
    pub(crate) asciilines: Option<NodeId>,
    pub(crate) netcdf_record_size: Option<i64>,
}

impl Product {
    /// Open a self-describing product (XML or NetCDF). Products that need
    /// an external definition fail with a `DataDefinition` error; HDF and
    /// CDF/GRIB products are recognized but their decoders are not part of
    /// this build.
    pub fn open(path: impl AsRef<Path>) -> Result<Product> {
        let path = path.as_ref();
        let storage = Self::map_file(path)?;
        Self::from_storage(storage, path.to_string_lossy().into_owned(), None)
    }

    /// Open a product whose layout is given by `definition` (ASCII, binary,
    /// or schema-directed XML).
    pub fn open_with_definition(
        path: impl AsRef<Path>,
        definition: Definition,
    ) -> Result<Product> {
        let path = path.as_ref();
        let storage = Self::map_file(path)?;
        Self::from_storage(
            storage,
            path.to_string_lossy().into_owned(),
            Some(definition),
        )
    }

    /// Open a memory-resident blob as a product using `definition`.
    pub fn open_memory(definition: Definition, data: Vec<u8>) -> Result<Product> {
        Self::from_storage(Storage::Buffer(data), String::new(), Some(definition))
    }

    /// Open a memory-resident self-describing blob (XML or NetCDF).
    pub fn open_memory_self_describing(data: Vec<u8>) -> Result<Product> {
        Self::from_storage(Storage::Buffer(data), String::new(), None)
    }

    fn map_file(path: &Path) -> Result<Storage> {
        let file = File::open(path)?;
        if options::get().use_mmap {
            // SAFETY: the mapping is read-only and the file is expected to
            // stay unmodified for the lifetime of the product handle.
            let map = unsafe { Mmap::map(&file)? };
            Ok(Storage::Mmap(map))
        } else {
            let mut buffer = Vec::new();
            use std::io::Read;
            let mut file = file;
            file.read_to_end(&mut buffer)?;
            Ok(Storage::Buffer(buffer))
        }
    }

    fn from_storage(
        storage: Storage,
        filename: String,
        definition: Option<Definition>,
    ) -> Result<Product> {
        let format = match &definition {
            Some(definition) => {
                let root = definition.root().ok_or_else(|| {
                    Error::DataDefinition("definition has no root type".to_owned())
                })?;
                definition.get(root).format()
            }
            None => detect_format(storage.data())?,
        };

        let file_size = storage.data().len() as i64;
        let mut product = Product {
            storage,
            filename,
            file_size,
            format,
            definition: Definition::new(),
            nodes: Vec::new(),
            root_node: None,
            root_type: TypeId(0),
            product_class: None,
            product_type: None,
            product_version: -1,
            variables: RefCell::new(HashMap::new()),
            asciilines: None,
            netcdf_record_size: None,
        };

        match format {
            Format::Ascii | Format::Binary | Format::Memory => {
                let mut definition = definition.expect("schema-described format");
                let root = definition.root().expect("checked above");
                definition.no_data(format);
                definition.empty_record(format);
                product.root_type = root;
                if format == Format::Ascii {
                    product.asciilines = Some(ascii::build_asciilines(
                        &mut definition,
                        &mut product.nodes,
                        product.storage.data(),
                    )?);
                }
                product.definition = definition;
            }
            Format::Xml => {
                let (definition, nodes, root_node) =
                    xml::parse(definition, product.storage.data())?;
                product.root_type = product_root(&definition)?;
                product.definition = definition;
                product.nodes = nodes;
                product.root_node = Some(root_node);
            }
            Format::NetCdf => {
                let parsed = netcdf::parse(product.storage.data())?;
                product.root_type = product_root(&parsed.definition)?;
                product.definition = parsed.definition;
                product.nodes = parsed.nodes;
                product.root_node = Some(parsed.root);
                product.netcdf_record_size = Some(parsed.record_size);
            }
            Format::Hdf4 => return Err(Error::NoHdf4Support),
            Format::Hdf5 => return Err(Error::NoHdf5Support),
            Format::Cdf | Format::Grib => {
                return Err(Error::Product(format!(
                    "{format} products are not supported by this build"
                )));
            }
        }

        Ok(product)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn root_type(&self) -> TypeId {
        self.root_type
    }

    pub fn product_class(&self) -> Option<&str> {
        self.product_class.as_deref()
    }

    pub fn product_type(&self) -> Option<&str> {
        self.product_type.as_deref()
    }

    pub fn product_version(&self) -> i64 {
        self.product_version
    }

    pub fn set_product_metadata(
        &mut self,
        class: Option<&str>,
        product_type: Option<&str>,
        version: i64,
    ) {
        self.product_class = class.map(str::to_owned);
        self.product_type = product_type.map(str::to_owned);
        self.product_version = version;
    }

    /// Register a product variable: a named mutable integer array scoped to
    /// this product, addressable from expressions as `$name`.
    pub fn add_variable(&mut self, name: &str, size: usize) {
        self.variables
            .borrow_mut()
            .insert(name.to_owned(), vec![0; size]);
    }

    pub(crate) fn variable_value(&self, name: &str, index: i64) -> Result<i64> {
        let variables = self.variables.borrow();
        let values = variables
            .get(name)
            .ok_or_else(|| Error::Expression(format!("unknown product variable '${name}'")))?;
        values
            .get(usize::try_from(index).unwrap_or(usize::MAX))
            .copied()
            .ok_or_else(|| {
                Error::Expression(format!(
                    "index ({index}) for product variable '${name}' exceeds range [0:{})",
                    values.len()
                ))
            })
    }

    pub(crate) fn variable_set(&self, name: &str, index: i64, value: i64) -> Result<()> {
        let mut variables = self.variables.borrow_mut();
        let values = variables
            .get_mut(name)
            .ok_or_else(|| Error::Expression(format!("unknown product variable '${name}'")))?;
        let len = values.len();
        let slot = values
            .get_mut(usize::try_from(index).unwrap_or(usize::MAX))
            .ok_or_else(|| {
                Error::Expression(format!(
                    "index ({index}) for product variable '${name}' exceeds range [0:{len})"
                ))
            })?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn variable_size(&self, name: &str) -> Result<i64> {
        let variables = self.variables.borrow();
        let values = variables
            .get(name)
            .ok_or_else(|| Error::Expression(format!("unknown product variable '${name}'")))?;
        Ok(values.len() as i64)
    }

    pub(crate) fn node(&self, id: NodeId) -> &DynNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.storage.data()
    }
}

fn product_root(definition: &Definition) -> Result<TypeId> {
    definition
        .root()
        .ok_or_else(|| Error::DataDefinition("definition has no root type".to_owned()))
}

fn detect_format(data: &[u8]) -> Result<Format> {
    if data.starts_with(b"\x89HDF\r\n\x1a\n") {
        return Ok(Format::Hdf5);
    }
    if data.starts_with(b"\x0e\x03\x13\x01") {
        return Ok(Format::Hdf4);
    }
    if data.starts_with(b"CDF\x01") || data.starts_with(b"CDF\x02") {
        return Ok(Format::NetCdf);
    }
    if data.starts_with(b"\xcd\xf3\x00\x01") || data.starts_with(b"\xcd\xf2\x60\x02") {
        return Ok(Format::Cdf);
    }
    if data.starts_with(b"GRIB") {
        return Ok(Format::Grib);
    }
    let trimmed = data
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .map(|pos| &data[pos..])
        .unwrap_or(&[]);
    if trimmed.starts_with(b"<") {
        return Ok(Format::Xml);
    }
    Err(Error::DataDefinition(
        "product is not self-describing and no definition was provided".to_owned(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_detection() {
        assert_eq!(
            detect_format(b"\x89HDF\r\n\x1a\nxxxx").unwrap(),
            Format::Hdf5
        );
        assert_eq!(detect_format(b"CDF\x01rest").unwrap(), Format::NetCdf);
        assert_eq!(detect_format(b"GRIB....").unwrap(), Format::Grib);
        assert_eq!(detect_format(b"  <?xml version=\"1.0\"?>").unwrap(), Format::Xml);
        assert!(detect_format(b"plain data").is_err());
    }
}
