//! Seekable byte stream with typed big-endian read and write operations.
//!
//! All TPEF integers are big-endian; the stream bakes that in instead of
//! being generic over endianness. The read and write cursors are
//! independent, which the writer uses to patch section header placeholders
//! after the bodies have been emitted.

use std::path::Path;

use tpef_errors::diagnostic_error;
use tpef_file::{FileReader, Picker};

use crate::base::*;

diagnostic_error! {
    /// Errors raised by stream operations.
    pub enum Error {
        [code: E001, help: "The input is truncated or a size field in it is wrong."]
        #[error("end of file reached at offset {0} while reading {1} byte(s)")]
        EndOfFile(FileOffset, usize),

        [transparent]
        Io(#[from] std::io::Error),
    }
}

/// A seekable byte buffer with a read cursor and a write cursor.
///
/// Streams may wrap a file (fully loaded through [`tpef_file`]) or start
/// empty as an in-memory buffer. Writes past the end grow the buffer.
#[derive(Debug, Default)]
pub struct BinaryStream {
    buffer: Vec<u8>,
    read_position: usize,
    write_position: usize,
}

impl BinaryStream {
    /// Creates an empty in-memory stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream over the given bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { buffer: bytes.into(), read_position: 0, write_position: 0 }
    }

    /// Loads a whole file into a stream.
    pub fn from_path<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file = Picker::open(path)?;
        let bytes = file.read_as_bytes()?;

        Ok(Self::from_bytes(&bytes[..]))
    }

    /// Consumes the stream and returns the underlying buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Current read cursor.
    pub fn read_position(&self) -> FileOffset {
        self.read_position as FileOffset
    }

    /// Moves the read cursor.
    pub fn set_read_position(&mut self, position: FileOffset) {
        self.read_position = position as usize;
    }

    /// Current write cursor.
    pub fn write_position(&self) -> FileOffset {
        self.write_position as FileOffset
    }

    /// Moves the write cursor.
    pub fn set_write_position(&mut self, position: FileOffset) {
        self.write_position = position as usize;
    }

    /// Total size of the underlying buffer.
    pub fn size_of_file(&self) -> FileOffset {
        self.buffer.len() as FileOffset
    }

    /// True once the read cursor has consumed the whole buffer.
    pub fn end_of_file(&self) -> bool {
        self.read_position >= self.buffer.len()
    }

    fn read_bytes(&mut self, count: usize) -> Result<&[u8], Error> {
        if self.read_position + count > self.buffer.len() {
            return Err(Error::EndOfFile(self.read_position as FileOffset, count));
        }

        let bytes = &self.buffer[self.read_position..self.read_position + count];
        self.read_position += count;

        Ok(bytes)
    }

    /// Reads one byte.
    pub fn read_byte(&mut self) -> Result<Byte, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a big-endian half-word.
    pub fn read_half_word(&mut self) -> Result<HalfWord, Error> {
        let bytes = self.read_bytes(2)?;

        Ok(HalfWord::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian word.
    pub fn read_word(&mut self) -> Result<Word, Error> {
        let bytes = self.read_bytes(4)?;

        Ok(Word::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a big-endian long word.
    pub fn read_long_word(&mut self) -> Result<LongWord, Error> {
        let high = self.read_word()? as LongWord;
        let low = self.read_word()? as LongWord;

        Ok((high << 32) | low)
    }

    /// Reads a big-endian signed word.
    pub fn read_signed_word(&mut self) -> Result<SWord, Error> {
        Ok(self.read_word()? as SWord)
    }

    /// Reads a big-endian signed long word.
    pub fn read_signed_long_word(&mut self) -> Result<SLongWord, Error> {
        Ok(self.read_long_word()? as SLongWord)
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.write_position + bytes.len();

        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }

        self.buffer[self.write_position..end].copy_from_slice(bytes);
        self.write_position = end;
    }

    /// Writes one byte.
    pub fn write_byte(&mut self, value: Byte) {
        self.write_bytes(&[value]);
    }

    /// Writes a big-endian half-word.
    pub fn write_half_word(&mut self, value: HalfWord) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Writes a big-endian word.
    pub fn write_word(&mut self, value: Word) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Writes a big-endian long word.
    pub fn write_long_word(&mut self, value: LongWord) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Writes a big-endian signed word.
    pub fn write_signed_word(&mut self, value: SWord) {
        self.write_word(value as Word);
    }

    /// Writes a big-endian signed long word.
    pub fn write_signed_long_word(&mut self, value: SLongWord) {
        self.write_long_word(value as LongWord);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reads() {
        #[rustfmt::skip]
        let mut stream = BinaryStream::from_bytes(vec![
            0x12,
            0x34, 0x56,
            0x78, 0x9a, 0xbc, 0xde,
            0xff, 0xff, 0xff, 0xff,
        ]);

        assert_eq!(stream.read_byte().unwrap(), 0x12);
        assert_eq!(stream.read_half_word().unwrap(), 0x3456);
        assert_eq!(stream.read_word().unwrap(), 0x789a_bcde);
        assert_eq!(stream.read_signed_word().unwrap(), -1);
        assert!(stream.end_of_file());
    }

    #[test]
    fn test_long_word_round_trip() {
        let mut stream = BinaryStream::new();
        stream.write_long_word(0x0102_0304_0506_0708);
        stream.write_signed_long_word(-2);

        assert_eq!(stream.read_long_word().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(stream.read_signed_long_word().unwrap(), -2);
    }

    #[test]
    fn test_end_of_file_error() {
        let mut stream = BinaryStream::from_bytes(vec![0x01]);

        assert!(stream.read_word().is_err());
        // A failed read does not advance the cursor.
        assert_eq!(stream.read_position(), 0);
        assert_eq!(stream.read_byte().unwrap(), 0x01);
    }

    #[test]
    fn test_write_cursor_patches_in_place() {
        let mut stream = BinaryStream::new();
        stream.write_word(0);
        stream.write_word(0xdead_beef);

        // Patch the placeholder at offset 0.
        stream.set_write_position(0);
        stream.write_word(0x1234_5678);

        assert_eq!(stream.read_word().unwrap(), 0x1234_5678);
        assert_eq!(stream.read_word().unwrap(), 0xdead_beef);
        assert_eq!(stream.size_of_file(), 8);
    }
}
