//! `tpef-bin` is the executable of `dumptpef`.
//!
//! `dumptpef` reads a TPEF (or legacy a.out) binary and prints the
//! requested parts of it: file headers, section headers, symbol tables,
//! relocation tables, or the elements of individual sections.

mod dumper;
mod error;

use std::{
    env,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use argh::FromArgs;
use dumper::TpefDumper;
use error::Error;
use tpef_errors::Result;
use tpef_object::read::ReaderRegistry;
use tpef_object::stream::BinaryStream;

/// The `dumptpef` command prints the contents of a TPEF binary: headers,
/// sections, symbols and relocations.
#[derive(Debug, FromArgs)]
struct DumpTpef {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// print file headers.
    #[argh(switch, short = 'f')]
    file_headers: bool,

    /// print section headers.
    #[argh(switch, short = 's')]
    section_headers: bool,

    /// print elements of a section by section index; may be repeated.
    #[argh(option, short = 'j')]
    section: Vec<u32>,

    /// print relocation tables.
    #[argh(switch, short = 'r')]
    reloc: bool,

    /// print symbol tables.
    #[argh(switch, short = 't')]
    syms: bool,

    /// print only logical information, so two dumps can be compared even
    /// when the binaries store their sections in different orders.
    #[argh(switch, short = 'l')]
    logical: bool,

    /// input file.
    #[argh(positional)]
    input_file: Vec<PathBuf>,
}

impl DumpTpef {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        // Collect all arguments.
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        // Check whether `argv` is present.
        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        // Extract the base command from a path.
        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        // Extract all arguments.
        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        // Parse and build `Self`.
        match DumpTpef::from_args(&[command], &arguments) {
            Ok(dump) => Ok(dump),
            Err(early_exit) => match early_exit.status {
                // The command was parsed successfully and the early exit is due to a flag like
                // `--help` causing early exit with output.
                Ok(()) => {
                    println!("{}", early_exit.output);

                    std::process::exit(0);
                }

                // The arguments were not successfully parsed.
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }
}

fn main() -> ExitCode {
    // Install the error report.
    if let Err(error) = Error::install_and_configure() {
        eprintln!("{error}");

        return ExitCode::FAILURE;
    }

    let dump = match DumpTpef::new() {
        Ok(dump) => dump,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));

            return ExitCode::FAILURE;
        }
    };

    // Handle the `--explain` option.
    if let Some(error_code) = &dump.explain {
        return match Error::explain(error_code) {
            Ok(diagnostic) => {
                println!("{diagnostic}");

                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("{:?}", miette::Report::new(error));

                ExitCode::FAILURE
            }
        };
    }

    match run(&dump) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");

            ExitCode::FAILURE
        }
    }
}

fn run(dump: &DumpTpef) -> Result<()> {
    let [input_file] = dump.input_file.as_slice() else {
        return Err(Error::MissingInputFile.into());
    };

    // Load and read the binary with the default format readers.
    let mut stream =
        BinaryStream::from_path(input_file).map_err(|error| miette::Report::new(error))?;

    let registry = ReaderRegistry::with_default_readers();
    let binary =
        registry.read_binary(&mut stream).map_err(|error| miette::Report::new(error))?;

    let stdout = io::stdout();
    let mut dumper = TpefDumper::new(&binary, stdout.lock());

    dumper.set_only_logical(dump.logical);

    let print = |result: io::Result<()>| result.map_err(|error| miette::Report::msg(error));

    if dump.file_headers {
        print(dumper.file_headers())?;
    }

    if dump.section_headers {
        print(dumper.section_headers())?;
    }

    if dump.syms {
        print(dumper.symbol_tables())?;
    }

    if dump.reloc {
        print(dumper.relocation_tables())?;
    }

    for &index in &dump.section {
        dumper.section(index).map_err(|error| miette::Report::msg(error))?;
    }

    Ok(())
}
