//! Contains the `Error` and `Result` types that `docstore` uses.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];

/// The result type for all methods that can return an error in the `docstore`
/// crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `docstore` crate. The inner
/// [`ErrorKind`] is wrapped in a `Box` to allow the errors to be passed around
/// cheaply.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn transaction_state(message: impl Into<String>) -> Self {
        ErrorKind::Transaction {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn client_session(message: impl Into<String>) -> Self {
        ErrorKind::ClientSession {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    /// Whether this error is in the network/stream class.
    pub fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(..))
    }

    /// Whether the server responded that the targeted node is no longer the
    /// writable primary.
    pub fn is_notwritableprimary(&self) -> bool {
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) => NOTWRITABLEPRIMARY_CODES.contains(&err.code),
            _ => false,
        }
    }

    /// Whether a failed `commitTransaction` or `abortTransaction` may be
    /// retried once with this error. Only network errors and not-primary
    /// responses qualify.
    pub(crate) fn is_retryable_terminator(&self) -> bool {
        self.is_network_error() || self.is_notwritableprimary()
    }

    /// The error code reported by the server, if this error originated from a
    /// failed command.
    pub fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        ErrorKind::Command(err).into()
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        ErrorKind::BsonSerialization(err).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Io(Arc::new(err)).into()
    }
}

/// The types of errors that can occur.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(bson::ser::Error),

    /// A client session could not be created.
    #[error("{message}")]
    #[non_exhaustive]
    ClientSession { message: String },

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An I/O error occurred while dispatching a command.
    #[error("An I/O error occurred: {0}")]
    Io(Arc<std::io::Error>),

    /// A transaction-related error, such as an illegal state transition.
    #[error("{message}")]
    #[non_exhaustive]
    Transaction { message: String },
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize, Error)]
#[error("(code {code}, {code_name}): {message}")]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,
}

impl CommandError {
    /// Creates a `CommandError` from the given code, code name, and message.
    pub fn new(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }
}
