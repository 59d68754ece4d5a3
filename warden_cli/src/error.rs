//! Driver-level failures.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use warden_bytecode::{DecodeError, EncodeError};
use warden_instrument::InstrumentError;

/// Why a run aborted. No output is written once one of these occurs.
#[derive(Debug)]
pub enum CliError {
    /// Reading an input or writing an output failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// An input file is not a valid unit or archive.
    Decode {
        path: PathBuf,
        source: DecodeError,
    },
    /// A rewritten unit no longer fits the wire format.
    Encode {
        path: PathBuf,
        source: EncodeError,
    },
    /// A unit could not be rewritten.
    Instrument {
        unit: Arc<str>,
        source: InstrumentError,
    },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Decode { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Encode { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Instrument { unit, source } => write!(f, "{}: {}", unit, source),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Io { source, .. } => Some(source),
            CliError::Decode { source, .. } => Some(source),
            CliError::Encode { source, .. } => Some(source),
            CliError::Instrument { source, .. } => Some(source),
        }
    }
}
