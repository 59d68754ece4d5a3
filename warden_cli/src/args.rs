//! Command-line argument parser.
//!
//! Hand-rolled: three flags and a list of input paths do not justify a
//! parser framework.

use std::path::PathBuf;

/// Complete set of parsed CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct WardenArgs {
    /// `-loud`: echo each instrumented method, disassembled.
    pub loud: bool,
    /// `--verify`: structurally verify every changed method.
    pub verify: bool,
    /// `--in-place`: overwrite inputs instead of writing `<input>.new`.
    pub in_place: bool,
    /// `-h` / `--help`: print usage and exit.
    pub help: bool,
    /// Unit files (`.wbc`) and unit archives (`.wba`) to rewrite.
    pub inputs: Vec<PathBuf>,
}

/// Error during argument parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// Unknown flag.
    UnknownFlag(String),
    /// No input files given.
    NoInputs,
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::UnknownFlag(flag) => write!(f, "unknown option: {}", flag),
            ArgError::NoInputs => write!(f, "no input files"),
        }
    }
}

impl std::error::Error for ArgError {}

pub const USAGE: &str = "usage: warden [-loud] [--verify] [--in-place] <unit.wbc | units.wba>...

Rewrites compiled units so every shared-state mutation is checked at
run time. Outputs are written next to each input as <input>.new unless
--in-place is given.

  -loud        echo each instrumented method, disassembled
  --verify     structurally verify every changed method
  --in-place   overwrite inputs
  -h, --help   print this message";

/// Parse command-line arguments (program name already skipped).
///
/// Flags may appear anywhere; everything else is an input path. `--`
/// terminates flag parsing.
pub fn parse_args<I, S>(args: I) -> Result<WardenArgs, ArgError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut result = WardenArgs::default();
    let mut flags_done = false;

    for arg in args {
        let arg = arg.into();
        if flags_done {
            result.inputs.push(PathBuf::from(arg));
            continue;
        }
        match arg.as_str() {
            "--" => flags_done = true,
            "-loud" => result.loud = true,
            "--verify" => result.verify = true,
            "--in-place" => result.in_place = true,
            "-h" | "--help" => {
                result.help = true;
                return Ok(result);
            }
            s if s.starts_with('-') => return Err(ArgError::UnknownFlag(arg)),
            _ => result.inputs.push(PathBuf::from(arg)),
        }
    }

    if result.inputs.is_empty() {
        return Err(ArgError::NoInputs);
    }
    Ok(result)
}
