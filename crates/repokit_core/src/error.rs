//! Domain error taxonomy shared by every core boundary.
//!
//! # Responsibility
//! - Classify every core failure into one of nine closed error kinds.
//! - Carry structured context (`code`, `details`) for the wire collaborator.
//! - Preserve the underlying store error as `cause` for local diagnostics.
//!
//! # Invariants
//! - `ErrorKind` is closed; new failure classes map onto an existing kind.
//! - `cause` is reachable through `Error::source` but never serialized.
//! - Store-native "missing row" / "unique violation" signals are recognized by
//!   the `is_*` predicates so callers never need store-specific knowledge.

use rusqlite::ErrorCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type DomainResult<T> = Result<T, DomainError>;

/// Closed failure classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    Internal,
    BadRequest,
    Unavailable,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        Self::NotFound,
        Self::AlreadyExists,
        Self::Validation,
        Self::Unauthorized,
        Self::Forbidden,
        Self::Conflict,
        Self::Internal,
        Self::BadRequest,
        Self::Unavailable,
    ];

    /// Stable snake_case name, also the default error code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::BadRequest => "bad_request",
            Self::Unavailable => "unavailable",
        }
    }

    /// Transport status the wire layer maps this kind to.
    pub fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Conflict => 409,
            Self::Validation | Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::NotFound => "entity not found",
            Self::AlreadyExists => "entity already exists",
            Self::Validation => "validation failed",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Internal => "internal error",
            Self::BadRequest => "bad request",
            Self::Unavailable => "service unavailable",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured domain failure.
///
/// Built from a kind plus optional context:
///
/// ```
/// use repokit_core::{DomainError, ErrorKind};
///
/// let err = DomainError::not_found("widget not found").with_detail("id", "w-1");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.code(), "not_found");
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct DomainError {
    kind: ErrorKind,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    details: BTreeMap<String, Value>,
    #[serde(skip)]
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl DomainError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.as_str().to_string(),
            message: message.into(),
            details: BTreeMap::new(),
            cause: None,
        }
    }

    /// Bare error of the given kind with its default message.
    pub fn sentinel(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Overrides the machine-readable code (defaults to the kind name).
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Prefixes the message with caller context, keeping kind, code,
    /// details and cause.
    ///
    /// ```
    /// use repokit_core::{DomainError, ErrorKind};
    ///
    /// let err = DomainError::not_found("record not found").wrap("load widget w-1");
    /// assert_eq!(err.kind(), ErrorKind::NotFound);
    /// assert_eq!(err.message(), "load widget w-1: record not found");
    /// ```
    #[must_use]
    pub fn wrap(mut self, message: impl Into<String>) -> Self {
        self.message = format!("{}: {}", message.into(), self.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Returns whether this error has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl Display for DomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {} (caused by: {cause})", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl Error for DomainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

impl PartialEq<ErrorKind> for DomainError {
    fn eq(&self, other: &ErrorKind) -> bool {
        self.kind == *other
    }
}

/// Converts `err` into a [`DomainError`] and prefixes its message with
/// `message`. Store failures are classified first, so the kind survives.
pub fn wrap_error(err: impl Into<DomainError>, message: impl Into<String>) -> DomainError {
    err.into().wrap(message)
}

/// Matches a not-found domain error or a store-native missing-row signal
/// anywhere in the source chain.
pub fn is_not_found(err: &(dyn Error + 'static)) -> bool {
    chain_matches(err, |current| {
        if let Some(domain) = current.downcast_ref::<DomainError>() {
            return domain.kind == ErrorKind::NotFound;
        }
        matches!(
            current.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::QueryReturnedNoRows)
        )
    })
}

/// Matches an already-exists domain error or a store-native unique violation.
pub fn is_already_exists(err: &(dyn Error + 'static)) -> bool {
    chain_matches(err, |current| {
        if let Some(domain) = current.downcast_ref::<DomainError>() {
            return domain.kind == ErrorKind::AlreadyExists;
        }
        match current.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            ),
            _ => false,
        }
    })
}

/// Matches a conflict domain error or a store-native lock contention signal.
pub fn is_conflict(err: &(dyn Error + 'static)) -> bool {
    chain_matches(err, |current| {
        if let Some(domain) = current.downcast_ref::<DomainError>() {
            return domain.kind == ErrorKind::Conflict;
        }
        match current.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(failure, _)) => {
                failure.code == ErrorCode::DatabaseLocked
                    || failure.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT
            }
            _ => false,
        }
    })
}

fn chain_matches(
    err: &(dyn Error + 'static),
    predicate: impl Fn(&(dyn Error + 'static)) -> bool,
) -> bool {
    let mut current = Some(err);
    while let Some(candidate) = current {
        if predicate(candidate) {
            return true;
        }
        current = candidate.source();
    }
    false
}
