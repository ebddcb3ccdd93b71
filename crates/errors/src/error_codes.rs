macro_rules! register_diagnostics {
    ( $( $error_code:ident => $diagnostic:expr ),* $(,)* ) => {
        /// An array of `(error_code, diagnostic)`.
        #[cfg(feature = "diagnostics")]
        pub static DIAGNOSTICS: &[(&str, &str)] = &[
            $(
                (stringify!($error_code), concat!("\n", $diagnostic, "\n"))
            ),*
        ];

        /// This type exists only for documentation purposes. It doesn't exist
        /// in the code otherwise.
        ///
        /// Every error code used across the TPEF crates is listed here, with
        /// its long-form diagnostic as the variant documentation.
        pub enum Diagnostics {
            $(
                #[doc = $diagnostic]
                $error_code
            ),*
        }
    };
}

register_diagnostics! {
    E000 => "The given error code is invalid.\n\n\
             Error codes follow the pattern `E[0-9]{3}`, e.g. `E004`. Run \
             `dumptpef --explain E004` to read the diagnostic of `E004`.",
    E001 => "The stream ended in the middle of a read.\n\n\
             Every TPEF structure announces its size up front: the file \
             header carries the section count, each section header carries \
             its body offset and length, and fixed-size elements carry an \
             element size. A read that runs past the end of the stream means \
             the file is truncated or one of those size fields is wrong.",
    E002 => "A cross-reference could not be resolved.\n\n\
             While reading, every reference (symbol names, owning sections, \
             relocation locations, instruction handles) is recorded as a key \
             into the reference manager. After all section bodies are read, \
             each key must name an element that was actually registered, or \
             an offset inside a chunkable section. A leftover key means the \
             binary references an element that does not exist.",
    E003 => "The same key was bound to two different objects.\n\n\
             Section identifiers, element indices and section offsets must \
             be unique within one binary. Registering a second object under \
             an already-bound key would silently redirect every outstanding \
             reference, so it is rejected instead.",
    E004 => "A value did not fit its declared width.\n\n\
             Data sections store values at the granularity of the address \
             space's minimum addressable unit (MAU). A value whose required \
             bits exceed `MAU width * MAU count` cannot be encoded, whether \
             it comes from an assembly init field or a direct `write_value` \
             call.",
    E005 => "No reader claimed the input stream.\n\n\
             Format readers are probed in registration order; each inspects \
             the magic bytes and restores the stream. This input matched \
             neither the TPEF magic (`7F 54 50 46`) nor the a.out OMAGIC \
             (`0107` at bytes 2..4).",
    E006 => "A cross-reference had no registered key at write time.\n\n\
             The writer encodes references as section ids, element indices \
             and section offsets. A reference whose target is absent from \
             the binary being written (for example a symbol pointing into a \
             section that was removed) cannot be encoded.",
    E007 => "The assembly source could not be compiled.\n\n\
             Compile errors carry the source line number and the recovered \
             source line. The assembler rolls its creators back to their \
             pre-call state, so the same pipeline can be retried once the \
             source is fixed.",
    E008 => "A referenced machine component does not exist.\n\n\
             Register, port and operation references in assembly resolve \
             against the target machine description. The referenced bus, \
             register file, function unit, port or address space is absent \
             from the machine, or is of the wrong kind for the request.",
    E009 => "A value violated a structural promise.\n\n\
             Examples: a string chunk with no terminating NUL byte, a symbol \
             table whose first element is not the undefined symbol, or an \
             instruction attribute combination the format does not define.",
    E010 => "The section cannot perform the requested operation.\n\n\
             Chunk handles exist only for chunkable sections (string tables, \
             data, uninitialized data); element operations exist only for \
             element-shaped sections. The operation was attempted on a \
             section of the wrong shape.",
}
