//! coral: read-only access to scientific data products.
//!
//! Products in heterogeneous physical formats (ASCII records, bit-packed
//! binary, memory-resident blobs, NetCDF classic, XML) are presented as one
//! logical hierarchical data model. A [`Cursor`] navigates the tree of an
//! open [`Product`]; values are retrieved as typed scalars or
//! multi-dimensional arrays with optional unit/scale conversions.
//!
//! Schema-described products are opened with a caller-supplied
//! [`Definition`]; self-describing products (XML, NetCDF) synthesize their
//! definition while opening. Sizes, offsets, availability and union
//! discriminators may be given by expressions in the definition, evaluated
//! transparently against the product data.
//!
//! ```no_run
//! use coral::{Cursor, Product};
//!
//! # fn main() -> coral::Result<()> {
//! coral::init()?;
//! let product = Product::open("measurements.nc")?;
//! let mut cursor = Cursor::new(&product)?;
//! cursor.goto_record_field_by_name("temperature")?;
//! let mut values = vec![0f64; cursor.num_elements()? as usize];
//! cursor.read_double_array(&mut values, coral::ArrayOrdering::C)?;
//! drop(product);
//! coral::done();
//! # Ok(())
//! # }
//! ```

mod ascii;
mod backend;
mod bin;
mod bits;
pub mod cursor;
mod dynamic;
pub mod error;
pub mod expr;
mod mem;
mod netcdf;
pub mod options;
mod path;
pub mod product;
mod read;
mod time;
pub mod types;
mod xml;

#[cfg(test)]
mod test;

pub use cursor::{Cursor, MAX_CURSOR_DEPTH};
pub use error::{Error, Result};
pub use expr::{Expr, PrintDialect, ResultKind};
pub use options::{
    done, get_option_bypass_special_types, get_option_perform_boundary_checks,
    get_option_perform_conversions, get_option_use_fast_size_expressions,
    get_option_use_mmap, init, set_definition_path, set_definition_path_conditional,
    set_option_bypass_special_types, set_option_perform_boundary_checks,
    set_option_perform_conversions, set_option_use_fast_size_expressions,
    set_option_use_mmap, Options,
};
pub use product::Product;
pub use read::ArrayOrdering;
pub use types::{
    Conversion, Definition, Dim, Endianness, Field, Format, ReadType, SpecialKind,
    SpecialText, Type, TypeClass, TypeId, MAX_NUM_DIMS,
};

/// Version of the library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
