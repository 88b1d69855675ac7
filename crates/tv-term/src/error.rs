// SPDX-License-Identifier: MIT
//
// Errors for the fallible edges of the crate: spawning a child, talking to
// the host tty and parsing configuration. The rendering core never fails.

use std::io;

/// Everything that can go wrong outside the rendering core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open a pseudo-terminal")]
    OpenPty(#[source] io::Error),

    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no command to run")]
    EmptyCommand,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::Spawn {
            command: "nope".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(err.to_string(), "failed to spawn `nope`");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(Error::InvalidArgument("--fps x".into()).to_string(), "invalid argument: --fps x");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::other("boom").into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
