//! Conditions raised across the runtime boundary and configuration errors
use std::io;

use http::StatusCode;
use thiserror::Error;

/// a condition raised to (or by) interpreted code
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Condition {
    /// the `&nginx-error` condition, carries the status the request should answer
    #[error("{who}: {message} (status {status})")]
    Nginx {
        who: String,
        message: String,
        status: StatusCode,
    },
    #[error("{who}: wrong number of arguments (required {required}, got {got})")]
    WrongNumberOfArguments {
        who: String,
        required: usize,
        got: usize,
    },
    #[error("{who}: {expected} required, but got {got}")]
    WrongTypeOfArgument {
        who: String,
        expected: String,
        got: String,
    },
    #[error("{0}")]
    Error(String),
}

impl Condition {
    pub fn nginx(who: &str, message: &str, status: StatusCode) -> Self {
        Condition::Nginx {
            who: who.to_owned(),
            message: message.to_owned(),
            status,
        }
    }

    pub fn wrong_arity(who: &str, required: usize, got: usize) -> Self {
        Condition::WrongNumberOfArguments {
            who: who.to_owned(),
            required,
            got,
        }
    }

    pub fn wrong_type(who: &str, expected: &str, got: &str) -> Self {
        Condition::WrongTypeOfArgument {
            who: who.to_owned(),
            expected: expected.to_owned(),
            got: got.to_owned(),
        }
    }

    /// the status carried by an `&nginx-error`
    pub fn status(&self) -> Option<StatusCode> {
        match *self {
            Condition::Nginx { status, .. } => Some(status),
            _ => None,
        }
    }

    /// recover a condition smuggled through an `io::Error`
    pub fn from_io(err: &io::Error) -> Option<&Condition> {
        err.get_ref().and_then(|e| e.downcast_ref::<Condition>())
    }
}

impl From<Condition> for io::Error {
    fn from(c: Condition) -> Self {
        io::Error::new(io::ErrorKind::Other, c)
    }
}

/// errors found while handling the location configuration block
#[derive(Debug, PartialEq, Error)]
pub enum ConfError {
    #[error("'library' must be specified")]
    MissingLibrary,
    #[error("'{directive}' takes {expected} (got {got} arguments)")]
    Arguments {
        directive: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("invalid filter order '{0}'")]
    InvalidOrder(String),
    #[error("duplicated location '{0}'")]
    DuplicatedLocation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_survives_io_error() {
        let c = Condition::nginx("put-u8", "no memory", StatusCode::INTERNAL_SERVER_ERROR);
        let err: io::Error = c.clone().into();
        assert_eq!(Condition::from_io(&err), Some(&c));
        assert_eq!(
            Condition::from_io(&err).and_then(Condition::status),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn plain_io_error_has_no_condition() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(Condition::from_io(&err).is_none());
    }
}
