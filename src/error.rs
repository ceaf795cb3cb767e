use std::io;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The command name is not part of the recognized command set.
    #[error("unknown command {0}")]
    UnknownCommand(String),
    /// A command was issued before `connect` completed, or after the session closed.
    #[error("not connected")]
    NotConnected,
    /// A command was issued without a callback to deliver its reply to.
    #[error("missing or invalid result callback")]
    MissingCallback,
    /// The server sent an unknown reply tag or a line that does not parse.
    #[error("protocol error; malformed response, {0}")]
    MalformedResponse(String),
    /// A declared length disagrees with the bytes available on the stream.
    #[error("protocol error; {0}")]
    Protocol(String),
    /// An error reply (`-ERR ...`) sent by the server.
    #[error("{0}")]
    Server(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error leaves the stream in an unknown state. The session is closed after a
    /// fatal error and a fresh `connect` is required.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MalformedResponse(_)
                | Error::Protocol(_)
                | Error::ConnectionClosed
                | Error::Io(_)
        )
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_src: std::string::FromUtf8Error) -> Error {
        Error::MalformedResponse("invalid UTF-8 line".to_string())
    }
}
