use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation in the library reports one of these codes
/// together with a formatted message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid type: {0}")]
    InvalidType(String),
    #[error("invalid index: {0}")]
    InvalidIndex(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("array index out of bounds: {0}")]
    ArrayOutOfBounds(String),
    #[error("out of bounds read: {0}")]
    OutOfBoundsRead(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("file read error: {0}")]
    FileRead(#[from] io::Error),
    #[error("HDF4 support is not available")]
    NoHdf4Support,
    #[error("HDF5 support is not available")]
    NoHdf5Support,
    #[error("expression error: {0}")]
    Expression(String),
    #[error("data definition error: {0}")]
    DataDefinition(String),
    #[error("product error: {0}")]
    Product(String),
    #[error("xml error: {0}")]
    Xml(String),
}

impl Error {
    pub(crate) fn invalid_read(stored: &str, requested: &str) -> Self {
        Error::InvalidType(format!(
            "can not read {stored} data using a {requested} data type"
        ))
    }

    pub(crate) fn array_index(index: i64, num_elements: i64) -> Self {
        Error::ArrayOutOfBounds(format!(
            "array index ({index}) exceeds array range [0:{num_elements})"
        ))
    }

    /// Annotate a cursor-position error with the failing path.
    pub(crate) fn with_path(self, path: &str) -> Self {
        let annotate = |msg: String| format!("{msg} (at '{path}')");
        match self {
            Error::Expression(msg) => Error::Expression(annotate(msg)),
            Error::InvalidIndex(msg) => Error::InvalidIndex(annotate(msg)),
            Error::InvalidType(msg) => Error::InvalidType(annotate(msg)),
            Error::ArrayOutOfBounds(msg) => Error::ArrayOutOfBounds(annotate(msg)),
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_carry_the_code() {
        let err = Error::invalid_read("uint16", "int16");
        assert_eq!(
            err.to_string(),
            "invalid type: can not read uint16 data using a int16 data type"
        );
        let err = Error::array_index(4, 4);
        assert_eq!(
            err.to_string(),
            "array index out of bounds: array index (4) exceeds array range [0:4)"
        );
    }
}
