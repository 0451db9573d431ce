use std::ptr::null_mut;
use std::rc::Rc;

use log::{debug, warn};
use odbc_api::sys::{
    self, AttrOdbcVersion, CompletionType, ConnectionAttribute, DriverConnectOption,
    EnvironmentAttribute, HDbc, HEnv, Handle, HandleType, InfoType, Pointer,
};

use super::statement::OdbcStatement;
use super::{check, wide, OdbcConnectOptions};
use crate::catalog::{
    Catalog, ColumnInfo, Nullability, PrimaryKeyInfo, PrivilegeInfo, TableInfo, TableLookup,
};
use crate::driver::{Connection, ConnectionInfo, FetchOrientation, OdbcVersion, Statement};
use crate::error::Result;
use crate::types::SqlType;

struct Environment(HEnv);

impl Environment {
    fn new(version: OdbcVersion) -> Result<Self> {
        let mut handle: Handle = null_mut();
        // SAFETY: allocating a top level handle needs no input handle.
        unsafe {
            let ret = sys::SQLAllocHandle(HandleType::Env, null_mut(), &mut handle);
            check(ret, "SQLAllocHandle", HandleType::Env, handle)?;
            let env = Environment(handle as HEnv);
            let version = match version {
                OdbcVersion::V3 => AttrOdbcVersion::Odbc3,
                OdbcVersion::V3_80 => AttrOdbcVersion::Odbc3_80,
            };
            let ret = sys::SQLSetEnvAttr(
                env.0,
                EnvironmentAttribute::OdbcVersion,
                version as i32 as usize as Pointer,
                0,
            );
            check(ret, "SQLSetEnvAttr", HandleType::Env, handle)?;
            Ok(env)
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        // SAFETY: every connection holds an `Rc` of the environment, so none is left.
        unsafe {
            sys::SQLFreeHandle(HandleType::Env, self.0 as Handle);
        }
    }
}

/// The connection handle, shared with the statements allocated on it.
pub(super) struct ConnectionHandle {
    hdbc: HDbc,
    connected: bool,
    // dropped after the connection
    _env: Rc<Environment>,
}

impl ConnectionHandle {
    pub(super) fn as_sys(&self) -> HDbc {
        self.hdbc
    }

    fn check(&self, ret: sys::SqlReturn, operation: &'static str) -> Result<()> {
        // SAFETY: the handle is valid for the lifetime of `self`.
        unsafe { check(ret, operation, HandleType::Dbc, self.hdbc as Handle) }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        // SAFETY: statements hold an `Rc` of this handle, so none is left.
        unsafe {
            if self.connected {
                let ret = sys::SQLDisconnect(self.hdbc);
                if let Err(e) = check(ret, "SQLDisconnect", HandleType::Dbc, self.hdbc as Handle) {
                    warn!("failed to disconnect: {}", e);
                }
            }
            sys::SQLFreeHandle(HandleType::Dbc, self.hdbc as Handle);
        }
    }
}

/// A connection opened through the ODBC driver manager.
pub struct OdbcConnection {
    handle: Rc<ConnectionHandle>,
    info: ConnectionInfo,
}

impl OdbcConnection {
    pub fn establish(options: &OdbcConnectOptions) -> Result<Self> {
        let env = Rc::new(Environment::new(options.odbc_version)?);
        let mut hdbc: Handle = null_mut();
        // SAFETY: `env` is a valid environment handle.
        unsafe {
            let ret = sys::SQLAllocHandle(HandleType::Dbc, env.0 as Handle, &mut hdbc);
            check(ret, "SQLAllocHandle", HandleType::Env, env.0 as Handle)?;
        }
        let mut handle = ConnectionHandle {
            hdbc: hdbc as HDbc,
            connected: false,
            _env: env,
        };

        let conn_str = wide(&options.conn_str);
        // SAFETY: the connection string outlives the call; no output buffer is requested.
        let ret = unsafe {
            sys::SQLDriverConnectW(
                handle.hdbc,
                null_mut(),
                conn_str.as_ptr(),
                conn_str.len() as i16,
                null_mut(),
                0,
                null_mut(),
                DriverConnectOption::NoPrompt,
            )
        };
        handle.check(ret, "SQLDriverConnect")?;
        handle.connected = true;

        let conn = OdbcConnection {
            handle: Rc::new(handle),
            info: ConnectionInfo {
                dbms_name: String::new(),
                odbc_version: options.odbc_version,
                max_concurrent_activities: 0,
            },
        };
        conn.set_auto_commit(options.auto_commit)?;
        let info = ConnectionInfo {
            dbms_name: conn.string_info(InfoType::DbmsName)?,
            odbc_version: options.odbc_version,
            max_concurrent_activities: conn.u16_info(InfoType::MaxConcurrentActivities)?,
        };
        debug!("connected to {}", info.dbms_name);
        Ok(OdbcConnection { info, ..conn })
    }

    pub fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        // SAFETY: integer attributes are passed by value.
        let ret = unsafe {
            sys::SQLSetConnectAttrW(
                self.handle.hdbc,
                ConnectionAttribute::AutoCommit,
                usize::from(auto_commit) as Pointer,
                0,
            )
        };
        self.handle.check(ret, "SQLSetConnectAttr")
    }

    fn string_info(&self, info_type: InfoType) -> Result<String> {
        let mut buffer = vec![0u16; 256];
        let mut len: i16 = 0;
        // SAFETY: the buffer length is passed in bytes.
        let ret = unsafe {
            sys::SQLGetInfoW(
                self.handle.hdbc,
                info_type,
                buffer.as_mut_ptr() as Pointer,
                (buffer.len() * 2) as i16,
                &mut len,
            )
        };
        self.handle.check(ret, "SQLGetInfo")?;
        buffer.truncate((len.max(0) as usize / 2).min(buffer.len()));
        Ok(String::from_utf16_lossy(&buffer))
    }

    fn u16_info(&self, info_type: InfoType) -> Result<u16> {
        let mut value: u16 = 0;
        // SAFETY: the value is a SQLUSMALLINT for the requested info types.
        let ret = unsafe {
            sys::SQLGetInfoW(
                self.handle.hdbc,
                info_type,
                &mut value as *mut u16 as Pointer,
                0,
                null_mut(),
            )
        };
        self.handle.check(ret, "SQLGetInfo")?;
        Ok(value)
    }

    fn end_transaction(&self, completion: CompletionType, operation: &'static str) -> Result<()> {
        // SAFETY: the handle is a connected connection handle.
        let ret = unsafe {
            sys::SQLEndTran(HandleType::Dbc, self.handle.hdbc as Handle, completion)
        };
        self.handle.check(ret, operation)
    }

    fn statement(&self) -> Result<OdbcStatement> {
        OdbcStatement::allocate(Rc::clone(&self.handle))
    }
}

impl Connection for OdbcConnection {
    fn allocate_statement(&self) -> Result<Box<dyn Statement>> {
        Ok(Box::new(self.statement()?))
    }

    fn catalog(&self) -> &dyn Catalog {
        self
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn commit(&self) -> Result<()> {
        self.end_transaction(CompletionType::Commit, "SQLEndTran")
    }

    fn rollback(&self) -> Result<()> {
        self.end_transaction(CompletionType::Rollback, "SQLEndTran")
    }
}

/// Reads all rows of a catalog result set as text, `None` for NULL.
fn read_all(stmt: &mut OdbcStatement, columns: &[u16]) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows = Vec::new();
    while stmt.fetch_scroll(FetchOrientation::Next)? {
        let row = columns
            .iter()
            .map(|c| stmt.get_text(*c))
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }
    stmt.close_cursor()?;
    Ok(rows)
}

fn text(row: &mut [Option<String>], index: usize) -> String {
    row.get_mut(index).and_then(Option::take).unwrap_or_default()
}

fn number<T: std::str::FromStr>(row: &[Option<String>], index: usize) -> Option<T> {
    row.get(index)?.as_deref()?.trim().parse().ok()
}

impl Catalog for OdbcConnection {
    fn find_tables(&self, lookup: &TableLookup) -> Result<Vec<TableInfo>> {
        let mut stmt = self.statement()?;
        stmt.tables(
            lookup.catalog.as_deref(),
            lookup.schema.as_deref(),
            &lookup.name,
            lookup.table_type.as_deref(),
        )?;
        Ok(read_all(&mut stmt, &[1, 2, 3, 4, 5])?
            .into_iter()
            .map(|mut row| TableInfo {
                catalog: Some(text(&mut row, 0)).filter(|s| !s.is_empty()),
                schema: Some(text(&mut row, 1)).filter(|s| !s.is_empty()),
                name: text(&mut row, 2),
                table_type: text(&mut row, 3),
                remarks: text(&mut row, 4),
            })
            .collect())
    }

    fn read_columns(&self, table: &TableInfo) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self.statement()?;
        stmt.columns(table.catalog.as_deref(), table.schema.as_deref(), &table.name)?;
        // COLUMN_NAME, DATA_TYPE, TYPE_NAME, COLUMN_SIZE, DECIMAL_DIGITS, NULLABLE,
        // ORDINAL_POSITION
        let mut columns: Vec<ColumnInfo> = read_all(&mut stmt, &[4, 5, 6, 7, 9, 11, 17])?
            .into_iter()
            .enumerate()
            .map(|(i, mut row)| ColumnInfo {
                sql_type: SqlType(number(&row, 1).unwrap_or(0)),
                column_size: number(&row, 3),
                decimal_digits: number(&row, 4),
                nullable: match number::<i16>(&row, 5) {
                    Some(0) => Nullability::NoNulls,
                    Some(1) => Nullability::Nullable,
                    _ => Nullability::Unknown,
                },
                ordinal_position: number(&row, 6).unwrap_or(i as u16 + 1),
                name: text(&mut row, 0),
                type_name: text(&mut row, 2),
            })
            .collect();
        columns.sort_by_key(|c| c.ordinal_position);
        Ok(columns)
    }

    fn read_primary_keys(&self, table: &TableInfo) -> Result<Vec<PrimaryKeyInfo>> {
        let mut stmt = self.statement()?;
        stmt.primary_keys(table.catalog.as_deref(), table.schema.as_deref(), &table.name)?;
        // COLUMN_NAME, KEY_SEQ, PK_NAME
        Ok(read_all(&mut stmt, &[4, 5, 6])?
            .into_iter()
            .map(|mut row| PrimaryKeyInfo {
                key_sequence: number(&row, 1).unwrap_or(0),
                pk_name: row.get_mut(2).and_then(Option::take),
                column_name: text(&mut row, 0),
            })
            .collect())
    }

    fn read_privileges(&self, table: &TableInfo) -> Result<Vec<PrivilegeInfo>> {
        let mut stmt = self.statement()?;
        let mut sql = String::from(
            "SELECT GRANTOR, GRANTEE, PRIVILEGE_TYPE, IS_GRANTABLE \
             FROM INFORMATION_SCHEMA.TABLE_PRIVILEGES WHERE TABLE_NAME = ",
        );
        push_literal(&mut sql, &table.name);
        if let Some(schema) = &table.schema {
            sql.push_str(" AND TABLE_SCHEMA = ");
            push_literal(&mut sql, schema);
        }
        stmt.exec_direct(&sql)?;
        Ok(read_all(&mut stmt, &[1, 2, 3, 4])?
            .into_iter()
            .map(|mut row| PrivilegeInfo {
                grantable: row
                    .get(3)
                    .and_then(|g| g.as_deref())
                    .map(|g| g.eq_ignore_ascii_case("YES")),
                grantor: row.get_mut(0).and_then(Option::take),
                grantee: text(&mut row, 1),
                privilege: text(&mut row, 2),
            })
            .collect())
    }
}

fn push_literal(sql: &mut String, value: &str) {
    sql.push('\'');
    sql.push_str(&value.replace('\'', "''"));
    sql.push('\'');
}
