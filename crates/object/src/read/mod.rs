//! Binary readers.
//!
//! Format readers register themselves in a [`ReaderRegistry`]; the registry
//! probes each reader's magic check in registration order and dispatches to
//! the first match. The registry built by
//! [`ReaderRegistry::with_default_readers`] knows the TPEF format and the
//! legacy a.out import.

use tpef_errors::diagnostic_error;

use crate::section::ModelError;
use crate::stream::{self, BinaryStream};
use crate::{refs, Binary};

pub mod aout;
pub mod tpef;

diagnostic_error! {
    /// Errors raised while reading a binary.
    pub enum Error {
        [code: E005, help: "The input is neither a TPEF binary nor an OMAGIC a.out object."]
        #[error("no registered reader claims the input stream")]
        InstanceNotFound,

        [code: E009, help: "The input violates the format it claims to be in."]
        #[error("unexpected value while reading: {0}")]
        UnexpectedValue(String),

        [transparent]
        Stream(#[from] stream::Error),

        [transparent]
        Refs(#[from] refs::Error),

        [transparent]
        Model(#[from] ModelError),
    }
}

/// One binary format the toolkit can read.
pub trait FormatReader {
    /// Checks whether the stream holds this reader's format. Must restore
    /// the stream's read position.
    fn is_my_stream_type(&self, stream: &mut BinaryStream) -> Result<bool, stream::Error>;

    /// Reads the whole stream into a binary.
    fn read_data(&self, stream: &mut BinaryStream) -> Result<Binary, Error>;
}

/// The explicit registry of format readers available in this build.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: Vec<Box<dyn FormatReader>>,
}

impl ReaderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry listing the TPEF reader and the a.out reader.
    pub fn with_default_readers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(tpef::TpefReader::new()));
        registry.register(Box::new(aout::AOutReader::new()));

        registry
    }

    /// Registers a format reader. Probing happens in registration order.
    pub fn register(&mut self, reader: Box<dyn FormatReader>) {
        self.readers.push(reader);
    }

    /// Reads a binary with the first reader that claims the stream.
    ///
    /// Fails with [`Error::InstanceNotFound`] if no reader does.
    pub fn read_binary(&self, stream: &mut BinaryStream) -> Result<Binary, Error> {
        for reader in &self.readers {
            if reader.is_my_stream_type(stream)? {
                return reader.read_data(stream);
            }
        }

        Err(Error::InstanceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclaimed_stream() {
        let registry = ReaderRegistry::with_default_readers();
        let mut stream = BinaryStream::from_bytes(vec![0u8; 64]);

        assert!(matches!(registry.read_binary(&mut stream), Err(Error::InstanceNotFound)));
        // Probing restored the position.
        assert_eq!(stream.read_position(), 0);
    }
}
