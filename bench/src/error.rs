use std::io;
use std::path::PathBuf;

use cycler_core::scpi::ReplyError;
use cycler_core::spec::SpecError;
use thiserror::Error;

/// Failures talking to an instrument.
///
/// The power supply and the load share this type so a run can hold both
/// behind one error parameter.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("i/o with {peer}: {source}")]
    Io {
        peer: String,
        #[source]
        source: io::Error,
    },
    #[error("{peer} closed the connection")]
    Closed { peer: String },
    #[error("malformed reply to `{command}`: {reason}")]
    Reply { command: String, reason: ReplyError },
    #[error("unsupported {role} model {model}")]
    Unsupported { role: &'static str, model: String },
    #[error("{what} must not be negative, got {value}")]
    NegativeSetpoint { what: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown profile `{0}`")]
    UnknownProfile(String),
    #[error("[battery] {0} is required when no profile is selected")]
    MissingField(&'static str),
    #[error("channel {0} does not exist; the supply has channels 1 to 3")]
    InvalidChannel(u8),
    #[error("relay and charger cannot share channel {0}")]
    SharedChannel(u8),
    #[error("invalid battery spec: {0}")]
    Spec(SpecError),
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
