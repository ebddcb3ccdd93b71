//! `tpef_asm` compiles TTA assembly source into TPEF binaries.
//!
//! The pipeline: the [`parser`] reads the source into the intermediate
//! forms of [`ast`]; the [`resources`] manager maps symbolic machine
//! references to TPEF resource ids against a [`machine`] description; the
//! [`code`] and [`data`] creators build the program sections; the
//! [`labels`] manager accumulates symbols, globals, procedures and pending
//! relocations and finalizes them against the produced sections. The
//! [`assembler`] driver ties the stages together and reports diagnostics
//! through the [`diagnostics`] store.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod assembler;
pub mod ast;
pub mod code;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod labels;
pub mod machine;
pub mod parser;
pub mod resources;

pub use assembler::Assembler;
pub use error::{CompileError, IllegalMachine};
pub use machine::Machine;
