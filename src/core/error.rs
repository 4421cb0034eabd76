//! Purpose: Define the single error type shared by the resolver, dispatcher, engine and server.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Transport-neutral failure taxonomy; transports map kinds to status codes.
//! Invariants: `Failed` never carries plugin detail to callers; transports render it generically.
//! Invariants: Exit code and wire code tables are stable once published.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    NotImplemented,
    Failed,
    AlreadyExists,
    Busy,
    Io,
}

impl ErrorKind {
    /// Numeric code used on the wire (HTTP status and push error frames).
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Usage => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::NotImplemented => 501,
            ErrorKind::Busy => 503,
            ErrorKind::Failed | ErrorKind::Io | ErrorKind::Internal => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::Usage => "Bad Request",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::AlreadyExists => "Conflict",
            ErrorKind::NotImplemented => "Not Implemented",
            ErrorKind::Busy => "Service Unavailable",
            ErrorKind::Failed | ErrorKind::Io | ErrorKind::Internal => "Internal Server Error",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            source: None,
        }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound).with_message(format!("{what} not found"))
    }

    pub fn not_implemented(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotImplemented).with_message(format!("{what} is not implemented"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Message safe to hand to a remote caller.
    pub fn public_message(&self) -> String {
        match self.kind {
            ErrorKind::Failed | ErrorKind::Internal | ErrorKind::Io => {
                self.kind.reason().to_string()
            }
            _ => match &self.message {
                Some(message) => format!("{}: {message}", self.kind.reason()),
                None => self.kind.reason().to_string(),
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
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
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::Busy => 5,
        ErrorKind::NotImplemented => 6,
        ErrorKind::Failed => 7,
        ErrorKind::Io => 8,
    }
}
