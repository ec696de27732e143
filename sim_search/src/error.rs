use std::fmt;

use crate::comparator::ComparatorKind;

#[derive(Debug)]
pub enum Error {
    /// Two comparators of different concrete kinds were compared. This is a
    /// configuration error and aborts the whole run.
    IncompatibleComparators {
        left: ComparatorKind,
        right: ComparatorKind,
    },
    BadFingerprint(String),
    Input(String),
    /// A unit of work failed inside the engine; carries the underlying error.
    WorkUnit(Box<Error>),
    /// The run was cancelled while waiting for unit completions.
    Interrupted,
    /// The worker pool stopped in a way the driver did not ask for.
    Engine(String),
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IncompatibleComparators { left, right } => {
                write!(f, "incompatible comparator kinds: {} vs {}", left, right)
            }
            Error::BadFingerprint(msg) => write!(f, "bad fingerprint: {}", msg),
            Error::Input(msg) => write!(f, "input failure: {}", msg),
            Error::WorkUnit(inner) => write!(f, "work unit failed: {}", inner),
            Error::Interrupted => write!(f, "interrupted while waiting for completions"),
            Error::Engine(msg) => write!(f, "engine failure: {}", msg),
            Error::Config(msg) => write!(f, "bad configuration: {}", msg),
            Error::Io(e) => write!(f, "io failure: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::WorkUnit(inner) => Some(inner),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}
