//! Types for working with errors produced by the buffer and table layers.

use std::borrow::Cow;
use std::collections::TryReserveError;
use std::fmt::{self, Display, Formatter};

use crate::catalog::TablePrivileges;
use crate::types::{CType, SqlType};

/// A specialized `Result` type for exodbc.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Represents all the ways a method can fail within exodbc.
///
/// Nothing is retried automatically. Every failure reaches the immediate caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A method was called in a state where it is not allowed, e.g. binding a buffer twice or
    /// writing through a table that was never opened.
    #[error("precondition violated: {0}")]
    Precondition(Cow<'static, str>),

    /// The driver returned a failure.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A typed access does not match the native type stored in a buffer.
    #[error(transparent)]
    Cast(#[from] CastError),

    /// No native buffer type could be determined for a SQL type.
    #[error("column {column:?}: no usable buffer type for SQL type {sql_type}")]
    UnsupportedType { column: String, sql_type: SqlType },

    /// A lookup (type mapping, column index, column name) found nothing.
    #[error("not found: {0}")]
    NotFound(Cow<'static, str>),

    /// The requested operation has no implementation for the given input.
    #[error("not supported: {0}")]
    NotSupported(Cow<'static, str>),

    /// Allocating storage for a column buffer failed.
    #[error("failed to allocate {bytes} bytes for column {column:?}")]
    OutOfMemory {
        column: String,
        bytes: usize,
        #[source]
        source: TryReserveError,
    },

    /// A write statement succeeded but did not touch any row.
    #[error("{operation} affected no rows")]
    NoRowsAffected { operation: &'static str },

    /// Resolving a table through the catalog returned no match.
    #[error("table {name:?} not found")]
    TableNotFound { name: String },

    /// Resolving a table through the catalog returned more than one match.
    #[error("table {name:?} is ambiguous: {count} tables match")]
    AmbiguousTable { name: String, count: usize },

    /// The current user lacks privileges required by the requested access mode.
    #[error("missing privileges on table {table:?}: {missing:?}")]
    MissingPrivilege {
        table: String,
        missing: TablePrivileges,
    },

    /// Primary key discipline cannot be satisfied for a writable table.
    #[error("table {table:?}: {reason}")]
    MissingPrimaryKey {
        table: String,
        reason: Cow<'static, str>,
    },
}

impl Error {
    #[track_caller]
    pub(crate) fn precondition(message: impl Into<Cow<'static, str>>) -> Self {
        let message = message.into();
        log::error!(
            "precondition violated at {}: {}",
            std::panic::Location::caller(),
            message
        );
        Error::Precondition(message)
    }

    /// The SQLSTATE of the first diagnostic record, if this is a driver error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Driver(e) => e.sqlstate(),
            _ => None,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }
}

/// A single diagnostic record as returned by `SQLGetDiagRec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    /// Five character SQLSTATE.
    pub state: String,
    pub native_error: i32,
    pub message: String,
}

impl DiagRecord {
    pub fn new(state: impl Into<String>, native_error: i32, message: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            native_error,
            message: message.into(),
        }
    }
}

impl Display for DiagRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ({}) {}",
            self.state, self.native_error, self.message
        )
    }
}

/// A failure reported by the driver, with all diagnostic records it produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed{}", format_records(.records))]
pub struct DriverError {
    operation: Cow<'static, str>,
    records: Vec<DiagRecord>,
}

impl DriverError {
    pub fn new(operation: impl Into<Cow<'static, str>>, records: Vec<DiagRecord>) -> Self {
        Self {
            operation: operation.into(),
            records,
        }
    }

    pub fn single(
        operation: impl Into<Cow<'static, str>>,
        state: &str,
        native_error: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            operation,
            vec![DiagRecord::new(state, native_error, message)],
        )
    }

    /// Name of the driver call that failed, e.g. `SQLExecDirect`.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn records(&self) -> &[DiagRecord] {
        &self.records
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.records.first().map(|r| r.state.as_str())
    }

    pub fn native_error(&self) -> Option<i32> {
        self.records.first().map(|r| r.native_error)
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.message.as_str())
    }
}

/// `": rec1; rec2"`, or nothing without records.
fn format_records(records: &[DiagRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = records.iter().map(DiagRecord::to_string).collect();
    format!(": {}", joined.join("; "))
}

/// A typed read or write asked for a type the buffer cannot deliver without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert buffer of type {from} to {to}")]
pub struct CastError {
    /// Native type stored in the buffer (or carried by the value being written).
    pub from: CType,
    /// Native type the caller asked for.
    pub to: CType,
}

impl CastError {
    pub(crate) const fn new(from: CType, to: CType) -> Self {
        Self { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display_lists_every_record() {
        let err = DriverError::new(
            "SQLExecDirect",
            vec![
                DiagRecord::new("42000", 102, "Incorrect syntax near 'bogus'."),
                DiagRecord::new("42000", 8180, "Statement(s) could not be prepared."),
            ],
        );

        assert_eq!(err.sqlstate(), Some("42000"));
        assert_eq!(err.native_error(), Some(102));
        assert_eq!(
            err.to_string(),
            "SQLExecDirect failed: [42000] (102) Incorrect syntax near 'bogus'.; \
             [42000] (8180) Statement(s) could not be prepared."
        );
    }

    #[test]
    fn driver_error_without_records_names_the_call() {
        let err = DriverError::new("SQLFetchScroll", Vec::new());
        assert_eq!(err.to_string(), "SQLFetchScroll failed");
        assert_eq!(err.sqlstate(), None);
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }

    #[test]
    fn sqlstate_is_only_reported_for_driver_errors() {
        let err = Error::from(DriverError::single("SQLFetch", "24000", 0, "Invalid cursor state"));
        assert_eq!(err.sqlstate(), Some("24000"));

        let err = Error::from(CastError::new(CType::SBIGINT, CType::SSHORT));
        assert_eq!(err.sqlstate(), None);
        assert_eq!(
            err.to_string(),
            "cannot convert buffer of type SQL_C_SBIGINT to SQL_C_SSHORT"
        );
    }
}
