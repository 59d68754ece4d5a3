//! Warden: retrofit runtime thread-safety checks onto compiled units.

mod archive;
mod args;
mod error;

use crate::archive::{decode_archive, encode_archive};
use crate::args::WardenArgs;
use crate::error::CliError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warden_bytecode::{decode_unit, disassemble, encode_unit, CompiledUnit};
use warden_instrument::{InstrumentOptions, Instrumenter, RewrittenUnit, UnitRepository};

fn main() {
    let args = match args::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("warden: {}", e);
            eprintln!("{}", args::USAGE);
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", args::USAGE);
        return;
    }
    if let Err(e) = run(&args) {
        eprintln!("warden: {}", e);
        std::process::exit(1);
    }
}

/// One input file and the units it carries.
struct Input {
    path: PathBuf,
    /// True when the file is a `.wba` archive.
    archived: bool,
    units: Vec<CompiledUnit>,
}

fn run(args: &WardenArgs) -> Result<(), CliError> {
    // Load everything first: guard resolution must see every unit of
    // the run, whichever file it came from.
    let mut inputs = Vec::with_capacity(args.inputs.len());
    let repo = UnitRepository::new();
    for path in &args.inputs {
        let input = load_input(path)?;
        for unit in &input.units {
            repo.insert(Arc::new(unit.clone()));
        }
        inputs.push(input);
    }

    // Rewrite everything in memory. Any failure aborts the whole run
    // before a single byte of output exists.
    let driver = Instrumenter::new(
        &repo,
        InstrumentOptions {
            verify: args.verify,
        },
    );
    let mut outputs = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let mut rewritten = Vec::with_capacity(input.units.len());
        for unit in &input.units {
            let out = driver
                .instrument_unit(unit)
                .map_err(|e| CliError::Instrument {
                    unit: unit.name.clone(),
                    source: e,
                })?;
            if args.loud {
                report(&out);
            }
            rewritten.push(out.unit);
        }
        outputs.push(rewritten);
    }

    for (input, units) in inputs.iter().zip(&outputs) {
        let buf = if input.archived {
            encode_archive(units)
        } else {
            encode_unit(&units[0])
        }
        .map_err(|e| CliError::Encode {
            path: input.path.clone(),
            source: e,
        })?;
        let dest = if args.in_place {
            input.path.clone()
        } else {
            sibling_new(&input.path)
        };
        std::fs::write(&dest, buf).map_err(|e| CliError::Io {
            path: dest,
            source: e,
        })?;
    }
    Ok(())
}

fn load_input(path: &Path) -> Result<Input, CliError> {
    let buf = std::fs::read(path).map_err(|e| CliError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let archived = path.extension().is_some_and(|e| e == "wba");
    let units = if archived {
        decode_archive(&buf)
    } else {
        decode_unit(&buf).map(|u| vec![u])
    }
    .map_err(|e| CliError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Input {
        path: path.to_path_buf(),
        archived,
        units,
    })
}

/// `<input>.new`, next to the input.
fn sibling_new(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(".new");
    PathBuf::from(os)
}

/// Echo what changed in a unit, one line per instrumented method, with
/// the rewritten body disassembled.
fn report(out: &RewrittenUnit) {
    for outcome in &out.methods {
        if !outcome.changed {
            continue;
        }
        eprintln!(
            "instrumented {}.{} ({} checks)",
            out.unit.name, outcome.name, outcome.sites
        );
        if let Some(method) = out.unit.method(&outcome.name) {
            eprintln!("{}", disassemble(&out.unit, method));
        }
    }
}
