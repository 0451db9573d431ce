//! The driver collaborator: connections and statement handles.
//!
//! These traits mirror the ODBC statement API closely. Column and parameter bindings hand raw
//! pointers to the driver, which reads from and writes to them during `execute` and `fetch`, so
//! the binding methods are `unsafe`: the caller guarantees the pointed-to memory stays valid and
//! does not move until the binding is replaced, reset, or the statement is dropped.

use std::ffi::c_void;
use std::ptr;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::types::{CType, SqlType};

/// Where a driver writes a fetched column value.
#[derive(Debug, Clone, Copy)]
pub struct BindTarget {
    pub c_type: CType,
    pub value: *mut c_void,
    /// Byte length of the buffer at `value`.
    pub buffer_len: isize,
    pub indicator: *mut isize,
}

impl BindTarget {
    /// A target that unbinds the column.
    pub fn null(c_type: CType) -> Self {
        Self {
            c_type,
            value: ptr::null_mut(),
            buffer_len: 0,
            indicator: ptr::null_mut(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

/// Where a driver reads an input parameter value from.
#[derive(Debug, Clone, Copy)]
pub struct ParameterTarget {
    pub c_type: CType,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub value: *mut c_void,
    pub buffer_len: isize,
    pub indicator: *mut isize,
}

impl ParameterTarget {
    /// A target that leaves the parameter without data.
    pub fn null(c_type: CType, sql_type: SqlType) -> Self {
        Self {
            c_type,
            sql_type,
            column_size: 0,
            decimal_digits: 0,
            value: ptr::null_mut(),
            buffer_len: 0,
            indicator: ptr::null_mut(),
        }
    }
}

/// The application descriptor a field is set on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Application row descriptor (result columns).
    Row,
    /// Application parameter descriptor (input parameters).
    Parameter,
}

/// A single descriptor record field, see `SQLSetDescField`.
///
/// Drivers interpret `DataPtr` in the light of the fields set before it: setting it triggers
/// the consistency check of the record, so `Type`, `Precision` and `Scale` must come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescField {
    Type(CType),
    Precision(i16),
    Scale(i16),
    DataPtr(*mut c_void),
    IndicatorPtr(*mut isize),
    OctetLengthPtr(*mut isize),
}

/// Cursor movement for `SQLFetchScroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrientation {
    Next,
    Prior,
    First,
    Last,
    /// 1-based row number; negative counts from the end.
    Absolute(isize),
    Relative(isize),
}

/// A statement handle of the driver.
pub trait Statement {
    /// Binds result column `column` (1-based). A target with a null value pointer unbinds it.
    ///
    /// # Safety
    /// The memory behind `target` must stay valid and in place until the column is rebound,
    /// the columns are unbound, or the statement is dropped.
    unsafe fn bind_col(&mut self, column: u16, target: BindTarget) -> Result<()>;

    /// Unbinds every result column (`SQL_UNBIND`).
    fn unbind_cols(&mut self) -> Result<()>;

    /// Binds input parameter `parameter` (1-based).
    ///
    /// # Safety
    /// Same contract as [`bind_col`](Self::bind_col), until the parameters are reset.
    unsafe fn bind_parameter(&mut self, parameter: u16, target: ParameterTarget) -> Result<()>;

    /// Releases every parameter binding (`SQL_RESET_PARAMS`).
    fn reset_parameters(&mut self) -> Result<()>;

    /// Sets one field of record `record` on an application descriptor.
    ///
    /// # Safety
    /// Pointer fields follow the contract of [`bind_col`](Self::bind_col).
    unsafe fn set_desc_field(
        &mut self,
        descriptor: Descriptor,
        record: u16,
        field: DescField,
    ) -> Result<()>;

    fn set_cursor_scrollable(&mut self, scrollable: bool) -> Result<()>;

    fn exec_direct(&mut self, sql: &str) -> Result<()>;

    fn prepare(&mut self, sql: &str) -> Result<()>;

    fn execute(&mut self) -> Result<()>;

    /// Moves the cursor and fills bound columns; `false` if no row is at the new position.
    fn fetch_scroll(&mut self, orientation: FetchOrientation) -> Result<bool>;

    /// Closes an open cursor; a no-op if none is open.
    fn close_cursor(&mut self) -> Result<()>;

    /// Rows affected by the last executed `INSERT`, `UPDATE` or `DELETE`.
    fn row_count(&mut self) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OdbcVersion {
    V3,
    V3_80,
}

/// Facts about an open connection negotiated with the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub dbms_name: String,
    pub odbc_version: OdbcVersion,
    /// Maximum number of active statements; `0` means no limit.
    pub max_concurrent_activities: u16,
}

/// An open connection to a data source.
///
/// Implementations are handles onto shared state; statements they allocate keep that state
/// alive on their own.
pub trait Connection {
    fn allocate_statement(&self) -> Result<Box<dyn Statement>>;

    fn catalog(&self) -> &dyn Catalog;

    fn info(&self) -> &ConnectionInfo;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}
