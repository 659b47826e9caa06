//! Error type shared by all strata crates.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Callers (e.g. a statement driver) use this to decide how to report a
/// failure. Nothing inside the engine retries on any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Anything not covered below.
    General,
    /// The query could not be planned: ambiguous or unresolved names,
    /// malformed joins, misplaced aggregates, incompatible operands.
    Planning,
    /// The construct is valid SQL but not supported by the engine.
    Unsupported,
    /// An internal invariant was violated. Indicates a bug in planning or
    /// table composition, never bad user input.
    Precondition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Planning => write!(f, "planning"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Precondition => write!(f, "precondition"),
        }
    }
}

pub struct DbError {
    inner: Box<DbErrorInner>,
}

struct DbErrorInner {
    kind: ErrorKind,
    msg: String,
    fields: Vec<(Cow<'static, str>, String)>,
    source: Option<Box<dyn Error + Send + Sync>>,
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::General, msg)
    }

    pub fn planning(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Planning, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Unsupported, msg)
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Precondition, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                fields: Vec::new(),
                source: None,
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Attach a structured field to the error.
    pub fn with_field(mut self, key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }

    pub fn is_planning(&self) -> bool {
        self.inner.kind == ErrorKind::Planning
    }

    pub fn is_unsupported(&self) -> bool {
        self.inner.kind == ErrorKind::Unsupported
    }

    pub fn is_precondition(&self) -> bool {
        self.inner.kind == ErrorKind::Precondition
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (k, v)) in self.inner.fields.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}: {v}")?;
            }
            write!(f, ")")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {self}", self.inner.kind)?;
        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\n{}", self.inner.backtrace)?;
        }
        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Return early with an "unsupported" error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {
        return Err($crate::DbError::unsupported(format!("Not yet implemented: {}", format!($($arg)+))))
    };
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a static message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a lazily built message.
    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Error if the option is None.
    fn required(self, what: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::new(format!("Missing required value: {what}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = DbError::precondition("Row out of bounds")
            .with_field("row", 5)
            .with_field("row_count", 3);
        assert_eq!("Row out of bounds (row: 5, row_count: 3)", err.to_string());
        assert!(err.is_precondition());
        assert_eq!(Some("5"), err.get_field("row"));
    }

    #[test]
    fn not_implemented_is_unsupported() {
        fn check() -> Result<()> {
            not_implemented!("multi-column {}", "IN")
        }

        let err = check().unwrap_err();
        assert_eq!(ErrorKind::Unsupported, err.kind());
        assert_eq!("Not yet implemented: multi-column IN", err.get_msg());
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("formatting failed").unwrap_err();
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("formatting failed"));
    }

    #[test]
    fn required_on_none() {
        let v: Option<i32> = None;
        assert!(v.required("value").is_err());
        assert_eq!(3, Some(3).required("value").unwrap());
    }
}
