//! `tpef_object` reads, writes and models TPEF binaries, the container
//! format for programs compiled for Transport Triggered Architecture (TTA)
//! processors.
//!
//! The crate is layered leaves-first:
//!
//! 1. [`stream`], a seekable byte stream with typed big-endian I/O,
//! 2. [`refs`], the reference manager decoupling object identity from file
//!    layout,
//! 3. the object model: [`Binary`], [`Section`] and the section-element
//!    taxonomy,
//! 4. the codec: [`read`] (TPEF and legacy a.out readers), [`write`], and
//!    the read-side [`disasm`] helper.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod base;
pub mod stream;

pub mod refs;

mod aspace;
mod binary;
mod format;
mod code;
mod debug;
mod instruction;
mod lineno;
mod reloc;
mod resource;
mod section;
mod symbol;

pub mod disasm;
pub mod read;
pub mod tools;
pub mod write;

pub use aspace::*;
pub use base::*;
pub use binary::*;
pub use code::*;
pub use debug::*;
pub use instruction::*;
pub use lineno::*;
pub use reloc::*;
pub use resource::*;
pub use section::*;
pub use symbol::*;
