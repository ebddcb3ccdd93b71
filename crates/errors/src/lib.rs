//! `tpef_errors` provides the shared error machinery of the TPEF crates.
//!
//! Two things live here. First, the [`diagnostic_error!`] macro, which
//! declares an `enum` deriving [`thiserror::Error`] and
//! [`miette::Diagnostic`] from a compact table of variants, each with an
//! error code, a display message and a help text. Second, the error-code
//! registry: every code used by the TPEF crates is documented on
//! [`Diagnostics`], and `dumptpef --explain E0xx` resolves the long-form
//! diagnostic through [`Error::explain`].

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod error_codes;

#[cfg(feature = "diagnostics")]
pub use error_codes::DIAGNOSTICS;
pub use error_codes::Diagnostics;
pub use miette::Result;

/// Declare an error `enum` deriving [`thiserror::Error`] and
/// [`miette::Diagnostic`].
///
/// Each variant is written as a small table:
///
/// ```rust
/// use tpef_errors::diagnostic_error;
///
/// diagnostic_error! {
///     /// Errors of some subsystem.
///     pub enum Error {
///         [code: E004, help: "Use a wider field or a smaller value."]
///         #[error("value `{0}` does not fit in {1} bits")]
///         OutOfRange(u64, u32),
///
///         [transparent]
///         Io(#[from] std::io::Error),
///     }
/// }
///
/// # fn main() {
/// use miette::Diagnostic;
///
/// let error = Error::OutOfRange(512, 8);
/// assert_eq!(error.to_string(), "value `512` does not fit in 8 bits");
/// assert_eq!(error.code().map(|c| c.to_string()), Some("E004".to_string()));
/// # }
/// ```
///
/// The `[code: ..., help: ...]` header expands to the matching
/// `#[diagnostic(...)]` attribute; `[transparent]` forwards everything to
/// the inner error, like `#[error(transparent)]` does.
#[macro_export]
macro_rules! diagnostic_error {
    (
        $( #[doc = $doc:expr] )*
        $visibility:vis enum $name:ident {
            $( $variants:tt )*
        }
    ) => {
        $crate::diagnostic_error! {
            @accumulate
            [ $( #[doc = $doc] )* ]
            $visibility $name
            []
            [ ]
            $( $variants )*
        }
    };

    // A variant with an error code and a help text.
    (
        @accumulate
        [ $( $docs:tt )* ]
        $visibility:vis $name:ident
        [ $( $done:tt )* ]
        [ $( $transparent_variant:ident ( $( #[ $transparent_field_meta:meta ] )* $transparent_field:ty ) , )* ]
        [code: $code:ident, help: $help:literal]
        #[error( $( $message:tt )* )]
        $variant:ident $( ( $( $field:ty ),* $(,)? ) )? ,
        $( $tail:tt )*
    ) => {
        $crate::diagnostic_error! {
            @accumulate
            [ $( $docs )* ]
            $visibility $name
            [
                $( $done )*
                #[doc = concat!("Error code `", stringify!($code), "`, see [`tpef_errors::Diagnostics::", stringify!($code), "`].")]
                #[error( $( $message )* )]
                #[diagnostic(code($code), help($help))]
                $variant $( ( $( $field ),* ) )? ,
            ]
            [ $( $transparent_variant ( $( #[ $transparent_field_meta ] )* $transparent_field ) , )* ]
            $( $tail )*
        }
    };

    // A transparent variant forwarding to its single field. Its rendering is
    // deferred to the terminal rule below: writing `#[error(transparent)]`
    // here and threading it through further `$done` accumulation rounds
    // confuses thiserror's parsing of that attribute (a macro_rules/derive
    // hygiene interaction), so only the plain variant/field shape is carried
    // forward and the attribute is emitted fresh, once, at the end.
    (
        @accumulate
        [ $( $docs:tt )* ]
        $visibility:vis $name:ident
        [ $( $done:tt )* ]
        [ $( $transparent_variant:ident ( $( #[ $transparent_field_meta:meta ] )* $transparent_field:ty ) , )* ]
        [transparent]
        $variant:ident ( $( #[ $field_meta:meta ] )* $field:ty ) ,
        $( $tail:tt )*
    ) => {
        $crate::diagnostic_error! {
            @accumulate
            [ $( $docs )* ]
            $visibility $name
            [ $( $done )* ]
            [
                $( $transparent_variant ( $( #[ $transparent_field_meta ] )* $transparent_field ) , )*
                $variant ( $( #[ $field_meta ] )* $field ) ,
            ]
            $( $tail )*
        }
    };

    // Terminal state: emit the item.
    (
        @accumulate
        [ $( $docs:tt )* ]
        $visibility:vis $name:ident
        [ $( $done:tt )* ]
        [ $( $transparent_variant:ident ( $( #[ $transparent_field_meta:meta ] )* $transparent_field:ty ) , )* ]
    ) => {
        $( $docs )*
        #[derive(Debug, thiserror::Error, miette::Diagnostic)]
        $visibility enum $name {
            $( $done )*
            $(
                #[doc = "Transparent wrapper, see the inner error."]
                #[error(transparent)]
                $transparent_variant ( $( #[ $transparent_field_meta ] )* $transparent_field ) ,
            )*
        }
    };
}

// The `diagnostic_error!` macro generates doc links to
// `tpef_errors::Diagnostics::E...`; alias the crate to its own name so the
// links also resolve when the macro expands here.
#[cfg(doc)]
use crate as tpef_errors;

/// Error type of this crate: an invalid error code was given to
/// [`Error::explain`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    /// The requested error code does not exist.
    #[error("`{0}` is not a valid error code")]
    #[diagnostic(
        code(E000),
        help("The pattern is `E[0-9]{{3}}`, i.e. an `E` followed by 3 digits, such as `E004`.")
    )]
    InvalidCode(String),
}

impl Error {
    /// Given an error code, returns the associated long-form diagnostic.
    ///
    /// ```
    /// use tpef_errors::Error;
    ///
    /// # fn main() {
    /// assert!(Error::explain("E001").is_ok());
    /// assert!(Error::explain("oops").is_err());
    /// # }
    /// ```
    #[cfg(feature = "diagnostics")]
    pub fn explain(error_code: &str) -> Result<&'static str, Self> {
        DIAGNOSTICS
            .iter()
            .find_map(|(code, diagnostic)| (*code == error_code).then_some(*diagnostic))
            .ok_or_else(|| Self::InvalidCode(error_code.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use miette::Diagnostic;

    use super::*;

    diagnostic_error! {
        /// A test error.
        pub enum TestError {
            [code: E004, help: "Shrink the value."]
            #[error("value `{0}` is too wide")]
            TooWide(u64),

            [transparent]
            Other(#[from] std::fmt::Error),
        }
    }

    #[test]
    fn test_macro_generates_display_and_code() {
        let error = TestError::TooWide(42);

        assert_eq!(error.to_string(), "value `42` is too wide");
        assert_eq!(error.code().map(|code| code.to_string()), Some("E004".to_string()));
        assert!(error.help().is_some());
    }

    #[test]
    fn test_macro_transparent_variant() {
        let error = TestError::from(std::fmt::Error);

        assert_eq!(error.to_string(), std::fmt::Error.to_string());
    }

    #[cfg(feature = "diagnostics")]
    #[test]
    fn test_explain() {
        assert!(Error::explain("E002").is_ok());
        assert!(Error::explain("E999").is_err());
        assert!(Error::explain("xyz").is_err());
    }
}
