// Error kinds and the builder-style error shared by the queue engine and the CLI.
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Open,
    Lock,
    Destroyed,
    Destroying,
    Io,
    Encoding,
    Closed,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    offset: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            offset: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn io(path: &Path, message: &str, err: io::Error) -> Self {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_path(path)
            .with_source(err)
    }

    pub(crate) fn destroyed() -> Self {
        Error::new(ErrorKind::Destroyed).with_message("queue handle was destroyed")
    }

    pub(crate) fn destroying() -> Self {
        Error::new(ErrorKind::Destroying).with_message("queue handle is being destroyed")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Open => 3,
        ErrorKind::Lock => 4,
        ErrorKind::Destroyed | ErrorKind::Destroying => 5,
        ErrorKind::Io => 6,
        ErrorKind::Encoding => 7,
        ErrorKind::Closed => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::error::Error as _;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Open, 3),
            (ErrorKind::Lock, 4),
            (ErrorKind::Destroyed, 5),
            (ErrorKind::Destroying, 5),
            (ErrorKind::Io, 6),
            (ErrorKind::Encoding, 7),
            (ErrorKind::Closed, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Io)
            .with_message("truncate failed")
            .with_path("/tmp/q.fifo")
            .with_offset(16);
        assert_eq!(
            err.to_string(),
            "Io: truncate failed (path: /tmp/q.fifo) (offset: 16)"
        );
    }

    #[test]
    fn io_helper_keeps_source() {
        let source = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let err = Error::io(std::path::Path::new("q.fifo"), "append failed", source);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), Some("append failed"));
        assert!(err.source().is_some());
    }
}
