use std::ptr::{null, null_mut};
use std::rc::Rc;

use log::trace;
use odbc_api::sys::{
    self, CDataType, Desc, FreeStmtOption, HDesc, HStmt, Handle, HandleType, ParamType, Pointer,
    SqlDataType, SqlReturn, StatementAttribute,
};

use super::connection::ConnectionHandle;
use super::{check, wide};
use crate::driver::{
    BindTarget, DescField, Descriptor, FetchOrientation, ParameterTarget, Statement,
};
use crate::error::{DriverError, Result};
use crate::types::{CType, NULL_DATA};

const SCROLLABLE: usize = 1;
const NONSCROLLABLE: usize = 0;

fn c_data_type(operation: &'static str, c_type: CType) -> Result<CDataType> {
    Ok(match c_type {
        CType::SSHORT => CDataType::SShort,
        CType::SLONG => CDataType::SLong,
        CType::SBIGINT => CDataType::SBigInt,
        CType::DOUBLE => CDataType::Double,
        CType::CHAR => CDataType::Char,
        CType::WCHAR => CDataType::WChar,
        CType::NUMERIC => CDataType::Numeric,
        CType::BINARY => CDataType::Binary,
        CType::TYPE_DATE => CDataType::TypeDate,
        CType::TYPE_TIME => CDataType::TypeTime,
        CType::TYPE_TIMESTAMP => CDataType::TypeTimestamp,
        other => {
            return Err(DriverError::single(
                operation,
                "HY003",
                0,
                format!("{} is not supported by this backend", other),
            )
            .into())
        }
    })
}

/// A statement handle allocated on an [`OdbcConnection`](super::OdbcConnection).
pub struct OdbcStatement {
    hstmt: HStmt,
    // freed after the statement
    _conn: Rc<ConnectionHandle>,
}

impl OdbcStatement {
    pub(super) fn allocate(conn: Rc<ConnectionHandle>) -> Result<Self> {
        let mut handle: Handle = null_mut();
        // SAFETY: the connection handle is alive as long as `conn`.
        unsafe {
            let ret = sys::SQLAllocHandle(HandleType::Stmt, conn.as_sys() as Handle, &mut handle);
            check(ret, "SQLAllocHandle", HandleType::Dbc, conn.as_sys() as Handle)?;
        }
        Ok(Self {
            hstmt: handle as HStmt,
            _conn: conn,
        })
    }

    fn check(&self, ret: SqlReturn, operation: &'static str) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        unsafe { check(ret, operation, HandleType::Stmt, self.hstmt as Handle) }
    }

    fn descriptor(&self, descriptor: Descriptor) -> Result<HDesc> {
        let attribute = match descriptor {
            Descriptor::Row => StatementAttribute::AppRowDesc,
            Descriptor::Parameter => StatementAttribute::AppParamDesc,
        };
        let mut hdesc: HDesc = null_mut();
        // SAFETY: descriptor handles are pointer sized.
        let ret = unsafe {
            sys::SQLGetStmtAttr(
                self.hstmt,
                attribute,
                &mut hdesc as *mut HDesc as Pointer,
                0,
                null_mut(),
            )
        };
        self.check(ret, "SQLGetStmtAttr")?;
        Ok(hdesc)
    }

    /// Reads column `column` of the current row as text, `None` for NULL.
    pub(super) fn get_text(&mut self, column: u16) -> Result<Option<String>> {
        let mut text: Vec<u16> = Vec::new();
        let mut chunk = vec![0u16; 256];
        loop {
            let mut indicator: isize = 0;
            // SAFETY: the chunk length is passed in bytes.
            let ret = unsafe {
                sys::SQLGetData(
                    self.hstmt,
                    column,
                    CDataType::WChar,
                    chunk.as_mut_ptr() as Pointer,
                    (chunk.len() * 2) as isize,
                    &mut indicator,
                )
            };
            if ret == SqlReturn::NO_DATA {
                break;
            }
            self.check(ret, "SQLGetData")?;
            if indicator == NULL_DATA {
                return Ok(None);
            }
            // room for the terminator
            let capacity = chunk.len() - 1;
            let len = if indicator < 0 || indicator as usize / 2 > capacity {
                capacity
            } else {
                indicator as usize / 2
            };
            text.extend_from_slice(&chunk[..len]);
            if ret != SqlReturn::SUCCESS_WITH_INFO {
                break;
            }
        }
        Ok(Some(String::from_utf16_lossy(&text)))
    }

    pub(super) fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
        table_type: Option<&str>,
    ) -> Result<()> {
        let (catalog, schema, name, table_type) = (
            catalog.map(wide),
            schema.map(wide),
            wide(name),
            table_type.map(wide),
        );
        // SAFETY: every argument outlives the call.
        let ret = unsafe {
            sys::SQLTablesW(
                self.hstmt,
                catalog.as_ref().map_or(null(), |s| s.as_ptr()),
                catalog.as_ref().map_or(0, |s| s.len() as i16),
                schema.as_ref().map_or(null(), |s| s.as_ptr()),
                schema.as_ref().map_or(0, |s| s.len() as i16),
                name.as_ptr(),
                name.len() as i16,
                table_type.as_ref().map_or(null(), |s| s.as_ptr()),
                table_type.as_ref().map_or(0, |s| s.len() as i16),
            )
        };
        self.check(ret, "SQLTables")
    }

    pub(super) fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let (catalog, schema, name) = (catalog.map(wide), schema.map(wide), wide(name));
        // SAFETY: every argument outlives the call.
        let ret = unsafe {
            sys::SQLColumnsW(
                self.hstmt,
                catalog.as_ref().map_or(null(), |s| s.as_ptr()),
                catalog.as_ref().map_or(0, |s| s.len() as i16),
                schema.as_ref().map_or(null(), |s| s.as_ptr()),
                schema.as_ref().map_or(0, |s| s.len() as i16),
                name.as_ptr(),
                name.len() as i16,
                null(),
                0,
            )
        };
        self.check(ret, "SQLColumns")
    }

    pub(super) fn primary_keys(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let (catalog, schema, name) = (catalog.map(wide), schema.map(wide), wide(name));
        // SAFETY: every argument outlives the call.
        let ret = unsafe {
            sys::SQLPrimaryKeysW(
                self.hstmt,
                catalog.as_ref().map_or(null(), |s| s.as_ptr()),
                catalog.as_ref().map_or(0, |s| s.len() as i16),
                schema.as_ref().map_or(null(), |s| s.as_ptr()),
                schema.as_ref().map_or(0, |s| s.len() as i16),
                name.as_ptr(),
                name.len() as i16,
            )
        };
        self.check(ret, "SQLPrimaryKeys")
    }

    fn free_stmt(&mut self, option: FreeStmtOption, operation: &'static str) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        let ret = unsafe { sys::SQLFreeStmt(self.hstmt, option) };
        self.check(ret, operation)
    }
}

impl Statement for OdbcStatement {
    unsafe fn bind_col(&mut self, column: u16, target: BindTarget) -> Result<()> {
        let c_type = c_data_type("SQLBindCol", target.c_type)?;
        let ret = sys::SQLBindCol(
            self.hstmt,
            column,
            c_type,
            target.value,
            target.buffer_len,
            target.indicator,
        );
        self.check(ret, "SQLBindCol")
    }

    fn unbind_cols(&mut self) -> Result<()> {
        self.free_stmt(FreeStmtOption::Unbind, "SQLFreeStmt")
    }

    unsafe fn bind_parameter(&mut self, parameter: u16, target: ParameterTarget) -> Result<()> {
        let c_type = c_data_type("SQLBindParameter", target.c_type)?;
        let ret = sys::SQLBindParameter(
            self.hstmt,
            parameter,
            ParamType::Input,
            c_type,
            SqlDataType(target.sql_type.0),
            target.column_size,
            target.decimal_digits,
            target.value,
            target.buffer_len,
            target.indicator,
        );
        self.check(ret, "SQLBindParameter")
    }

    fn reset_parameters(&mut self) -> Result<()> {
        self.free_stmt(FreeStmtOption::ResetParams, "SQLFreeStmt")
    }

    unsafe fn set_desc_field(
        &mut self,
        descriptor: Descriptor,
        record: u16,
        field: DescField,
    ) -> Result<()> {
        let hdesc = self.descriptor(descriptor)?;
        let (identifier, value): (Desc, Pointer) = match field {
            DescField::Type(c_type) => (Desc::Type, c_type.0 as isize as Pointer),
            DescField::Precision(precision) => (Desc::Precision, precision as isize as Pointer),
            DescField::Scale(scale) => (Desc::Scale, scale as isize as Pointer),
            DescField::DataPtr(ptr) => (Desc::DataPtr, ptr),
            DescField::IndicatorPtr(ptr) => (Desc::IndicatorPtr, ptr as Pointer),
            DescField::OctetLengthPtr(ptr) => (Desc::OctetLengthPtr, ptr as Pointer),
        };
        trace!("SQLSetDescField {:?} record {} {:?}", descriptor, record, field);
        let ret = sys::SQLSetDescField(hdesc, record as i16, identifier, value, 0);
        check(ret, "SQLSetDescField", HandleType::Desc, hdesc as Handle)
    }

    fn set_cursor_scrollable(&mut self, scrollable: bool) -> Result<()> {
        let value = if scrollable { SCROLLABLE } else { NONSCROLLABLE };
        // SAFETY: integer attributes are passed by value.
        let ret = unsafe {
            sys::SQLSetStmtAttr(
                self.hstmt,
                StatementAttribute::CursorScrollable,
                value as Pointer,
                0,
            )
        };
        self.check(ret, "SQLSetStmtAttr")
    }

    fn exec_direct(&mut self, sql: &str) -> Result<()> {
        trace!("SQLExecDirect: {}", sql);
        let text = wide(sql);
        // SAFETY: the statement text outlives the call.
        let ret = unsafe { sys::SQLExecDirectW(self.hstmt, text.as_ptr(), text.len() as i32) };
        self.check(ret, "SQLExecDirect")
    }

    fn prepare(&mut self, sql: &str) -> Result<()> {
        trace!("SQLPrepare: {}", sql);
        let text = wide(sql);
        // SAFETY: the statement text outlives the call.
        let ret = unsafe { sys::SQLPrepareW(self.hstmt, text.as_ptr(), text.len() as i32) };
        self.check(ret, "SQLPrepare")
    }

    fn execute(&mut self) -> Result<()> {
        // SAFETY: bound parameters are kept valid by the caller.
        let ret = unsafe { sys::SQLExecute(self.hstmt) };
        self.check(ret, "SQLExecute")
    }

    fn fetch_scroll(&mut self, orientation: FetchOrientation) -> Result<bool> {
        let (orientation, offset) = match orientation {
            FetchOrientation::Next => (sys::FetchOrientation::Next, 0),
            FetchOrientation::Prior => (sys::FetchOrientation::Prior, 0),
            FetchOrientation::First => (sys::FetchOrientation::First, 0),
            FetchOrientation::Last => (sys::FetchOrientation::Last, 0),
            FetchOrientation::Absolute(n) => (sys::FetchOrientation::Absolute, n),
            FetchOrientation::Relative(n) => (sys::FetchOrientation::Relative, n),
        };
        // SAFETY: bound columns are kept valid by the caller.
        let ret = unsafe { sys::SQLFetchScroll(self.hstmt, orientation, offset) };
        if ret == SqlReturn::NO_DATA {
            return Ok(false);
        }
        self.check(ret, "SQLFetchScroll")?;
        Ok(true)
    }

    fn close_cursor(&mut self) -> Result<()> {
        self.free_stmt(FreeStmtOption::Close, "SQLFreeStmt")
    }

    fn row_count(&mut self) -> Result<i64> {
        let mut count: isize = 0;
        // SAFETY: `count` is a SQLLEN.
        let ret = unsafe { sys::SQLRowCount(self.hstmt, &mut count) };
        self.check(ret, "SQLRowCount")?;
        Ok(count as i64)
    }
}

impl Drop for OdbcStatement {
    fn drop(&mut self) {
        // SAFETY: the connection handle outlives the statement.
        unsafe {
            sys::SQLFreeHandle(HandleType::Stmt, self.hstmt as Handle);
        }
    }
}
