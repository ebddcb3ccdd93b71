//! `tpef_file` is a thin crate to read files into byte buffers.
//!
//! The TPEF toolchain is synchronous from end to end, so readers here hand
//! back their bytes directly instead of through futures.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

use std::{io::Result, ops::Deref, path::Path};

#[cfg(all(not(feature = "auto"), not(feature = "fs"), not(feature = "mmap")))]
compile_error!("No feature has been selected, please select at least `auto`");

#[cfg(any(feature = "auto", feature = "fs"))]
pub mod fs;

#[cfg(feature = "mmap")]
pub mod mmap;

/// Define what a file reader should look like.
pub trait FileReader: Sized {
    /// The reader outputs bytes that implement `Deref<[u8]>`.
    type Bytes: Deref<Target = [u8]>;

    /// Open a file.
    fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>;

    /// Read the entire file content.
    fn read_as_bytes(self) -> Result<Self::Bytes>;
}

/// File picker.
///
/// This type opens a file path based on the file reader selected by a Cargo
/// feature (e.g. `fs` or `mmap`).
pub struct Picker;

impl Picker {
    /// Open a file by using [`fs::File`].
    #[cfg(any(feature = "auto", feature = "fs"))]
    pub fn open<P>(path: P) -> Result<fs::File>
    where
        P: AsRef<Path>,
    {
        fs::File::open(path)
    }

    /// Open a file by using [`mmap::Mmap`].
    #[cfg(all(feature = "mmap", not(any(feature = "auto", feature = "fs"))))]
    pub fn open<P>(path: P) -> Result<mmap::Mmap>
    where
        P: AsRef<Path>,
    {
        mmap::Mmap::open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picker() -> Result<()> {
        let file = Picker::open("tests/hello.txt")?;
        let content = file.read_as_bytes()?;

        assert_eq!(*content, b"abcdef"[..]);

        Ok(())
    }
}
