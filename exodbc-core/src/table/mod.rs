//! The table engine.
//!
//! A [`Table`] owns one [`ColumnBuffer`] per column and a statement handle per operation kind.
//! Opening a table resolves it through the catalog, creates or validates the buffers, binds them
//! to the select statement and, for writable tables, prepares parameterized `INSERT`, `UPDATE`
//! and `DELETE` statements whose parameters are the very same buffers. Writes therefore always
//! use whatever values the buffers currently hold.
//!
//! ```rust
//! use std::rc::Rc;
//! use exodbc_core::catalog::TableLookup;
//! use exodbc_core::mem::{MemColumn, MemConnection, MemTableDef};
//! use exodbc_core::table::{AccessFlags, Table};
//! use exodbc_core::types::SqlType;
//!
//! # fn main() -> exodbc_core::Result<()> {
//! let conn = MemConnection::new();
//! conn.create_table(
//!     MemTableDef::new("people")
//!         .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
//!         .column(MemColumn::new("name", SqlType::VARCHAR).size(40)),
//! )?;
//!
//! let mut table = Table::new(Rc::new(conn), TableLookup::new("people"), AccessFlags::READ | AccessFlags::WRITE)?;
//! table.open()?;
//! table.set_column_value(0, 1i32)?;
//! table.set_column_value(1, "Ada")?;
//! table.insert()?;
//!
//! table.select("")?;
//! assert!(table.select_next()?);
//! assert_eq!(table.column(1)?.as_string()?, "Ada");
//! # Ok(())
//! # }
//! ```

mod flags;
mod options;
mod sql;

use std::cell::RefMut;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use log::{debug, warn};

pub use flags::{AccessFlags, NoRowsPolicy, OpenFlags};
pub use options::TableOptions;

use crate::buffer::{BufferValue, ColumnBuffer, ColumnFlags, ExternalBuffer};
use crate::catalog::{
    Catalog, PrimaryKeyCache, PrimaryKeyInfo, PrivilegeCache, TableInfo, TableLookup,
};
use crate::driver::{Connection, FetchOrientation};
use crate::error::{Error, Result};
use crate::handle::{SharedStatement, StatementHandle};
use crate::types::{CType, SqlType};

/// One statement handle per operation kind. Write handles exist only for the operations the
/// table was opened for.
struct Statements {
    select: SharedStatement,
    count: SharedStatement,
    insert: Option<SharedStatement>,
    update_pk: Option<SharedStatement>,
    update_where: Option<SharedStatement>,
    delete_pk: Option<SharedStatement>,
    delete_where: Option<SharedStatement>,
}

impl Statements {
    fn allocate(conn: &dyn Connection, access: AccessFlags) -> Result<Self> {
        Ok(Self {
            select: allocate(conn, "select")?,
            count: allocate(conn, "count")?,
            insert: allocate_for(conn, access, AccessFlags::INSERT, "insert")?,
            update_pk: allocate_for(conn, access, AccessFlags::UPDATE_PK, "update")?,
            update_where: allocate_for(conn, access, AccessFlags::UPDATE_WHERE, "update where")?,
            delete_pk: allocate_for(conn, access, AccessFlags::DELETE_PK, "delete")?,
            delete_where: allocate_for(conn, access, AccessFlags::DELETE_WHERE, "delete where")?,
        })
    }

    /// Frees write handles no longer needed and allocates missing ones.
    fn reallocate(&mut self, conn: &dyn Connection, access: AccessFlags) -> Result<()> {
        for (slot, flag, name) in [
            (&mut self.insert, AccessFlags::INSERT, "insert"),
            (&mut self.update_pk, AccessFlags::UPDATE_PK, "update"),
            (&mut self.update_where, AccessFlags::UPDATE_WHERE, "update where"),
            (&mut self.delete_pk, AccessFlags::DELETE_PK, "delete"),
            (&mut self.delete_where, AccessFlags::DELETE_WHERE, "delete where"),
        ] {
            match (access.contains(flag), slot.is_some()) {
                (true, false) => *slot = Some(allocate(conn, name)?),
                (false, true) => *slot = None,
                _ => {}
            }
        }
        Ok(())
    }

    fn all(&self) -> impl Iterator<Item = &SharedStatement> {
        [
            Some(&self.select),
            Some(&self.count),
            self.insert.as_ref(),
            self.update_pk.as_ref(),
            self.update_where.as_ref(),
            self.delete_pk.as_ref(),
            self.delete_where.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

fn allocate(conn: &dyn Connection, name: &'static str) -> Result<SharedStatement> {
    Ok(StatementHandle::shared(conn.allocate_statement()?, name))
}

fn allocate_for(
    conn: &dyn Connection,
    access: AccessFlags,
    flag: AccessFlags,
    name: &'static str,
) -> Result<Option<SharedStatement>> {
    if access.contains(flag) {
        allocate(conn, name).map(Some)
    } else {
        Ok(None)
    }
}

fn borrow(handle: &SharedStatement) -> Result<RefMut<'_, StatementHandle>> {
    handle
        .try_borrow_mut()
        .map_err(|_| Error::precondition("statement handle is already in use"))
}

fn find_column(columns: &BTreeMap<usize, ColumnBuffer>, name: &str) -> Option<usize> {
    columns
        .iter()
        .find(|(_, c)| c.query_name().eq_ignore_ascii_case(name))
        .map(|(index, _)| *index)
}

fn affected(operation: &'static str, rows: i64, policy: NoRowsPolicy) -> Result<u64> {
    if rows == 0 && policy == NoRowsPolicy::Fail {
        return Err(Error::NoRowsAffected { operation });
    }
    Ok(rows.max(0) as u64)
}

/// A database table accessed through bound column buffers.
pub struct Table {
    // Buffers go before the statements they are bound to.
    columns: BTreeMap<usize, ColumnBuffer>,
    manual_columns: bool,
    statements: Statements,
    conn: Rc<dyn Connection>,
    lookup: Option<TableLookup>,
    info: Option<TableInfo>,
    access: AccessFlags,
    options: TableOptions,
    primary_keys: PrimaryKeyCache,
    privileges: Option<PrivilegeCache>,
    /// `SET` clause shared by the update statements; `None` without updatable columns.
    assignments: Option<String>,
    open: bool,
}

impl Table {
    /// A table resolved through the catalog when it is opened.
    pub fn new(conn: Rc<dyn Connection>, lookup: TableLookup, access: AccessFlags) -> Result<Self> {
        Self::create(conn, Some(lookup), None, access)
    }

    /// A table whose catalog entry is already known.
    pub fn from_info(conn: Rc<dyn Connection>, info: TableInfo, access: AccessFlags) -> Result<Self> {
        Self::create(conn, None, Some(info), access)
    }

    fn create(
        conn: Rc<dyn Connection>,
        lookup: Option<TableLookup>,
        info: Option<TableInfo>,
        access: AccessFlags,
    ) -> Result<Self> {
        let statements = Statements::allocate(&*conn, access)?;
        Ok(Self {
            columns: BTreeMap::new(),
            manual_columns: false,
            statements,
            conn,
            lookup,
            info,
            access,
            options: TableOptions::default(),
            primary_keys: PrimaryKeyCache::default(),
            privileges: None,
            assignments: None,
            open: false,
        })
    }

    pub fn info(&self) -> Option<&TableInfo> {
        self.info.as_ref()
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: TableOptions) -> Result<()> {
        self.require_closed("change options")?;
        self.options = options;
        Ok(())
    }

    /// Primary key as resolved by the last successful open of a writable table.
    pub fn primary_keys(&self) -> &PrimaryKeyCache {
        &self.primary_keys
    }

    /// Privileges read while opening with [`OpenFlags::CHECK_PRIVILEGES`].
    pub fn privileges(&self) -> Option<&PrivilegeCache> {
        self.privileges.as_ref()
    }

    /// Changes the operations the table is opened for, allocating and freeing write statement
    /// handles accordingly.
    pub fn set_access_flags(&mut self, access: AccessFlags) -> Result<()> {
        self.require_closed("change access flags")?;
        self.statements.reallocate(&*self.conn, access)?;
        self.access = access;
        Ok(())
    }

    fn name(&self) -> String {
        match (&self.info, &self.lookup) {
            (Some(info), _) => info.query_name(),
            (None, Some(lookup)) => lookup.to_string(),
            (None, None) => String::new(),
        }
    }

    fn require_closed(&self, action: &str) -> Result<()> {
        if self.open {
            return Err(Error::precondition(format!(
                "cannot {} while table {} is open",
                action,
                self.name()
            )));
        }
        Ok(())
    }

    /// Name to use in SQL text; fails unless the table is open.
    fn open_name(&self) -> Result<String> {
        match (&self.info, self.open) {
            (Some(info), true) => Ok(info.query_name()),
            _ => Err(Error::precondition(format!(
                "table {} is not open",
                self.name()
            ))),
        }
    }

    fn write_handle<'a>(
        &self,
        handle: &'a Option<SharedStatement>,
        flag: AccessFlags,
    ) -> Result<&'a SharedStatement> {
        handle.as_ref().ok_or_else(|| {
            Error::precondition(format!(
                "table {} is not opened for {:?}",
                self.name(),
                flag
            ))
        })
    }

    // ---- columns ----

    /// Adds a manually defined column at `index` (0-based). Once a column was added manually,
    /// the catalog is no longer asked for columns on open.
    pub fn add_column(&mut self, index: usize, column: ColumnBuffer) -> Result<()> {
        self.require_closed("define columns")?;
        if !self.manual_columns {
            self.columns.clear();
            self.manual_columns = true;
        }
        self.columns.insert(index, column);
        Ok(())
    }

    /// Defines column `index` over caller supplied storage, which the table never frees.
    #[allow(clippy::too_many_arguments)]
    pub fn set_column(
        &mut self,
        index: usize,
        query_name: impl Into<String>,
        buffer: ExternalBuffer,
        sql_type: SqlType,
        column_size: Option<u32>,
        decimal_digits: Option<i16>,
        flags: ColumnFlags,
    ) -> Result<()> {
        let column =
            ColumnBuffer::from_external(query_name, buffer, sql_type, column_size, decimal_digits, flags)?;
        self.add_column(index, column)
    }

    /// Defines column `index` with storage of native type `c_type` owned by the table.
    #[allow(clippy::too_many_arguments)]
    pub fn define_column(
        &mut self,
        index: usize,
        query_name: impl Into<String>,
        sql_type: SqlType,
        c_type: CType,
        column_size: Option<u32>,
        decimal_digits: Option<i16>,
        flags: ColumnFlags,
    ) -> Result<()> {
        let column =
            ColumnBuffer::with_c_type(query_name, sql_type, c_type, column_size, decimal_digits, flags)?;
        self.add_column(index, column)
    }

    pub fn column(&self, index: usize) -> Result<&ColumnBuffer> {
        self.columns
            .get(&index)
            .ok_or_else(|| Error::NotFound(format!("no column at index {}", index).into()))
    }

    pub fn column_mut(&mut self, index: usize) -> Result<&mut ColumnBuffer> {
        self.columns
            .get_mut(&index)
            .ok_or_else(|| Error::NotFound(format!("no column at index {}", index).into()))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the column named `name`, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        find_column(&self.columns, name)
            .ok_or_else(|| Error::NotFound(format!("no column named {:?}", name).into()))
    }

    pub fn columns(&self) -> impl Iterator<Item = (usize, &ColumnBuffer)> {
        self.columns.iter().map(|(index, column)| (*index, column))
    }

    pub fn set_column_value(&mut self, index: usize, value: impl Into<BufferValue>) -> Result<()> {
        self.column_mut(index)?.set_value(value)
    }

    /// The value of column `index`, `None` if it is NULL.
    pub fn column_value(&self, index: usize) -> Result<Option<BufferValue>> {
        self.column(index)?.nullable_value()
    }

    pub fn set_column_null(&mut self, index: usize) -> Result<()> {
        self.column_mut(index)?.set_null()
    }

    pub fn is_column_null(&self, index: usize) -> Result<bool> {
        Ok(self.column(index)?.is_null())
    }

    pub fn set_binary_value(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        self.column_mut(index)?.set_binary_value(bytes)
    }

    pub fn binary_value(&self, index: usize) -> Result<Option<Vec<u8>>> {
        self.column(index)?.binary_value()
    }

    // ---- open / close ----

    /// Opens the table with the open flags of its [`TableOptions`].
    pub fn open(&mut self) -> Result<()> {
        self.open_with(self.options.open_flags)
    }

    /// Opens the table. On failure nothing stays bound and the table remains closed.
    pub fn open_with(&mut self, flags: OpenFlags) -> Result<()> {
        self.require_closed("open")?;
        match self.try_open(flags) {
            Ok(()) => {
                self.open = true;
                debug!(
                    "opened table {} for {:?} with {} columns",
                    self.name(),
                    self.access,
                    self.columns.len()
                );
                Ok(())
            }
            Err(e) => {
                if let Err(release) = self.release() {
                    warn!("failed to release table {} after failed open: {}", self.name(), release);
                }
                Err(e)
            }
        }
    }

    fn try_open(&mut self, flags: OpenFlags) -> Result<()> {
        let conn = Rc::clone(&self.conn);
        let catalog = conn.catalog();
        let info = self.resolve(catalog)?;

        if flags.contains(OpenFlags::CHECK_PRIVILEGES) {
            let privileges = PrivilegeCache::from_catalog(catalog, &info)?;
            let missing = privileges.missing(self.access.required_privileges());
            if !missing.is_empty() {
                return Err(Error::MissingPrivilege {
                    table: info.query_name(),
                    missing,
                });
            }
            self.privileges = Some(privileges);
        }

        if !self.manual_columns {
            self.create_columns(catalog, &info, flags)?;
        }
        if self.columns.is_empty() {
            return Err(Error::NotFound(
                format!("table {} has no columns to bind", info).into(),
            ));
        }

        self.bind_select(flags)?;

        if self.access.is_writable() {
            self.resolve_primary_keys(catalog, &info, flags)?;
            self.prepare_writes(&info)?;
        }
        Ok(())
    }

    fn resolve(&mut self, catalog: &dyn Catalog) -> Result<TableInfo> {
        if let Some(info) = &self.info {
            return Ok(info.clone());
        }
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| Error::precondition("table has neither a lookup nor a catalog entry"))?;
        let mut found = catalog.find_tables(lookup)?;
        match found.len() {
            0 => Err(Error::TableNotFound {
                name: lookup.to_string(),
            }),
            1 => {
                let info = found.remove(0);
                self.info = Some(info.clone());
                Ok(info)
            }
            count => Err(Error::AmbiguousTable {
                name: lookup.to_string(),
                count,
            }),
        }
    }

    fn column_flags(&self) -> ColumnFlags {
        let mut flags = ColumnFlags::SELECT;
        flags.set(ColumnFlags::INSERT, self.access.contains(AccessFlags::INSERT));
        flags.set(ColumnFlags::UPDATE, self.access.intersects(AccessFlags::UPDATE));
        flags
    }

    /// Creates a buffer per catalog column. Skipped columns leave no gap in the indexes.
    fn create_columns(
        &mut self,
        catalog: &dyn Catalog,
        info: &TableInfo,
        flags: OpenFlags,
    ) -> Result<()> {
        let column_flags = self.column_flags();
        let skip = flags.contains(OpenFlags::SKIP_UNSUPPORTED_COLUMNS);
        self.columns.clear();
        for column in catalog.read_columns(info)? {
            match ColumnBuffer::from_column_info(&column, &self.options.type_map, column_flags) {
                Ok(buffer) => {
                    self.columns.insert(self.columns.len(), buffer);
                }
                Err(e @ Error::UnsupportedType { .. }) if skip => {
                    warn!("skipping column {} of table {}: {}", column.name, info, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn bind_select(&mut self, flags: OpenFlags) -> Result<()> {
        let select = &self.statements.select;
        borrow(select)?.set_cursor_scrollable(!flags.contains(OpenFlags::FORWARD_ONLY_CURSORS))?;
        let selected = self
            .columns
            .values_mut()
            .filter(|c| c.has_flags(ColumnFlags::SELECT));
        for (number, column) in (1u16..).zip(selected) {
            column.bind(select, number)?;
        }
        Ok(())
    }

    fn resolve_primary_keys(
        &mut self,
        catalog: &dyn Catalog,
        info: &TableInfo,
        flags: OpenFlags,
    ) -> Result<()> {
        let keys = if flags.contains(OpenFlags::DO_NOT_QUERY_PRIMARY_KEYS) {
            PrimaryKeyCache::from_keys(
                self.columns
                    .values()
                    .filter(|c| c.is_primary_key())
                    .zip(1u16..)
                    .map(|(c, key_sequence)| PrimaryKeyInfo {
                        column_name: c.query_name().to_owned(),
                        key_sequence,
                        pk_name: None,
                    })
                    .collect(),
            )
        } else {
            PrimaryKeyCache::from_catalog(catalog, info)?
        };
        if keys.is_empty() {
            return Err(Error::MissingPrimaryKey {
                table: info.query_name(),
                reason: "no primary key columns found".into(),
            });
        }
        for key in keys.iter() {
            let column = find_column(&self.columns, &key.column_name)
                .and_then(|index| self.columns.get_mut(&index))
                .filter(|c| c.is_bound())
                .ok_or_else(|| Error::MissingPrimaryKey {
                    table: info.query_name(),
                    reason: format!("primary key column {:?} is not bound", key.column_name)
                        .into(),
                })?;
            column.set_flags(column.flags() | ColumnFlags::PRIMARY_KEY)?;
        }
        self.primary_keys = keys;
        Ok(())
    }

    fn prepare_writes(&mut self, info: &TableInfo) -> Result<()> {
        let table = info.query_name();
        let is_assigned =
            |c: &ColumnBuffer| c.has_flags(ColumnFlags::UPDATE) && !c.is_primary_key();

        if let Some(insert) = &self.statements.insert {
            let names: Vec<String> = self
                .columns
                .values()
                .filter(|c| c.has_flags(ColumnFlags::INSERT))
                .map(|c| c.query_name().to_owned())
                .collect();
            if names.is_empty() {
                return Err(Error::precondition(format!(
                    "table {}: no column is flagged for insert",
                    table
                )));
            }
            borrow(insert)?.prepare(&sql::insert(&table, names.iter().map(String::as_str)))?;
            let inserted = self
                .columns
                .values_mut()
                .filter(|c| c.has_flags(ColumnFlags::INSERT));
            for (number, column) in (1u16..).zip(inserted) {
                column.bind_parameter(insert, number)?;
            }
        }

        let assigned: Vec<String> = self
            .columns
            .values()
            .filter(|c| is_assigned(c))
            .map(|c| c.query_name().to_owned())
            .collect();
        self.assignments = if assigned.is_empty() {
            None
        } else {
            Some(sql::assignments(assigned.iter().map(String::as_str)))
        };

        if let (Some(update), Some(assignments)) = (&self.statements.update_pk, &self.assignments) {
            let keys: Vec<String> = self
                .columns
                .values()
                .filter(|c| c.is_primary_key())
                .map(|c| c.query_name().to_owned())
                .collect();
            let predicate = sql::key_predicate(keys.iter().map(String::as_str));
            borrow(update)?.prepare(&sql::update(&table, assignments, &predicate))?;
            // SET parameters first, then the key, both in ordinal order.
            let mut number = 0;
            for column in self.columns.values_mut().filter(|c| is_assigned(c)) {
                number += 1;
                column.bind_parameter(update, number)?;
            }
            for column in self.columns.values_mut().filter(|c| c.is_primary_key()) {
                number += 1;
                column.bind_parameter(update, number)?;
            }
        }

        if let (Some(update), Some(_)) = (&self.statements.update_where, &self.assignments) {
            let assigned = self.columns.values_mut().filter(|c| is_assigned(c));
            for (number, column) in (1u16..).zip(assigned) {
                column.bind_parameter(update, number)?;
            }
        }

        if let Some(delete) = &self.statements.delete_pk {
            // Keys in the order the catalog reported them.
            let keys: Vec<usize> = self
                .primary_keys
                .iter()
                .filter_map(|k| find_column(&self.columns, &k.column_name))
                .collect();
            let predicate = sql::key_predicate(
                keys.iter()
                    .filter_map(|index| self.columns.get(index))
                    .map(|c| c.query_name()),
            );
            borrow(delete)?.prepare(&sql::delete(&table, &predicate))?;
            for (number, index) in (1u16..).zip(&keys) {
                if let Some(column) = self.columns.get_mut(index) {
                    column.bind_parameter(delete, number)?;
                }
            }
        }
        Ok(())
    }

    /// Unbinds everything and forgets what the last open resolved. Continues past failures and
    /// returns the first one.
    fn release(&mut self) -> Result<()> {
        let mut first_error = None;
        for handle in self.statements.all() {
            let steps: [fn(&mut StatementHandle) -> Result<()>; 3] = [
                StatementHandle::close_cursor,
                StatementHandle::reset_params,
                StatementHandle::unbind_columns,
            ];
            for step in steps {
                if let Err(e) = borrow(handle).and_then(|mut h| step(&mut h)) {
                    warn!("releasing statements of table {}: {}", self.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if !self.manual_columns {
            self.columns.clear();
        }
        self.primary_keys = PrimaryKeyCache::default();
        self.privileges = None;
        self.assignments = None;
        self.open = false;
        first_error.map_or(Ok(()), Err)
    }

    /// Closes the table. Buffers created on open are dropped, manually defined ones stay but
    /// are unbound. The table can be opened again.
    pub fn close(&mut self) -> Result<()> {
        self.open_name()?;
        let result = self.release();
        debug!("closed table {}", self.name());
        result
    }

    // ---- select ----

    /// Selects all rows matching `where_clause`; an empty clause selects every row.
    pub fn select(&mut self, where_clause: &str) -> Result<()> {
        self.select_ordered(where_clause, "")
    }

    pub fn select_ordered(&mut self, where_clause: &str, order_by: &str) -> Result<()> {
        let table = self.open_name()?;
        let sql = sql::select(
            &table,
            self.columns
                .values()
                .filter(|c| c.has_flags(ColumnFlags::SELECT))
                .map(|c| c.query_name()),
            where_clause,
            order_by,
        );
        self.select_by_sql(&sql)
    }

    /// Runs a complete `SELECT` whose result columns match the bound columns.
    pub fn select_by_sql(&mut self, sql: &str) -> Result<()> {
        self.open_name()?;
        let mut select = borrow(&self.statements.select)?;
        select.close_cursor()?;
        for column in self.columns.values() {
            column.reset_indicator();
        }
        select.exec_direct(sql, true)
    }

    fn fetch(&mut self, orientation: FetchOrientation) -> Result<bool> {
        self.open_name()?;
        let mut select = borrow(&self.statements.select)?;
        select.fetch(orientation)
    }

    pub fn select_next(&mut self) -> Result<bool> {
        self.fetch(FetchOrientation::Next)
    }

    pub fn select_prev(&mut self) -> Result<bool> {
        self.fetch(FetchOrientation::Prior)
    }

    pub fn select_first(&mut self) -> Result<bool> {
        self.fetch(FetchOrientation::First)
    }

    pub fn select_last(&mut self) -> Result<bool> {
        self.fetch(FetchOrientation::Last)
    }

    /// Fetches row `row` (1-based; negative counts from the end).
    pub fn select_absolute(&mut self, row: isize) -> Result<bool> {
        self.fetch(FetchOrientation::Absolute(row))
    }

    /// Some drivers reject a relative fetch before the cursor was positioned by another fetch.
    pub fn select_relative(&mut self, offset: isize) -> Result<bool> {
        self.fetch(FetchOrientation::Relative(offset))
    }

    pub fn select_close(&mut self) -> Result<()> {
        borrow(&self.statements.select)?.close_cursor()
    }

    pub fn is_select_open(&self) -> bool {
        self.statements
            .select
            .try_borrow()
            .map_or(false, |s| s.is_cursor_open())
    }

    /// Number of rows matching `where_clause`. The count statement is closed again whether
    /// or not counting succeeded.
    pub fn count(&mut self, where_clause: &str) -> Result<u64> {
        let table = self.open_name()?;
        let sql = sql::count(&table, where_clause);
        let mut buffer = ColumnBuffer::with_c_type(
            "COUNT(*)",
            SqlType::BIGINT,
            CType::SBIGINT,
            None,
            None,
            ColumnFlags::SELECT,
        )?;
        buffer.bind(&self.statements.count, 1)?;

        let counted = self.read_count(&buffer, &sql);
        let closed = borrow(&self.statements.count).and_then(|mut h| h.close_cursor());
        let unbound = buffer.unbind();

        let count = counted?;
        closed?;
        unbound?;
        Ok(count)
    }

    fn read_count(&self, buffer: &ColumnBuffer, sql: &str) -> Result<u64> {
        let mut count = borrow(&self.statements.count)?;
        count.exec_direct(sql, true)?;
        if !count.fetch(FetchOrientation::Next)? {
            return Err(Error::NotFound("COUNT(*) returned no row".into()));
        }
        Ok(buffer.as_i64()?.max(0) as u64)
    }

    // ---- writes ----

    /// Inserts a row from the current values of the insertable columns.
    pub fn insert(&mut self) -> Result<()> {
        self.open_name()?;
        let insert = self.write_handle(&self.statements.insert, AccessFlags::INSERT)?;
        borrow(insert)?.execute()
    }

    /// Updates the row identified by the primary key columns with the current values of the
    /// updatable columns, applying the [`NoRowsPolicy`] of the table options.
    pub fn update(&mut self) -> Result<u64> {
        self.update_with(self.options.no_rows)
    }

    pub fn update_with(&mut self, policy: NoRowsPolicy) -> Result<u64> {
        let table = self.open_name()?;
        let update = self.write_handle(&self.statements.update_pk, AccessFlags::UPDATE_PK)?;
        if self.assignments.is_none() {
            return Err(Error::precondition(format!(
                "table {}: no updatable column outside the primary key",
                table
            )));
        }
        let mut update = borrow(update)?;
        update.execute()?;
        affected("update", update.row_count()?, policy)
    }

    /// Updates every row matching `where_clause` with the current values of the updatable
    /// columns. Returns the number of affected rows.
    pub fn update_where(&mut self, where_clause: &str) -> Result<u64> {
        let table = self.open_name()?;
        let update = self.write_handle(&self.statements.update_where, AccessFlags::UPDATE_WHERE)?;
        if where_clause.trim().is_empty() {
            return Err(Error::precondition("update_where needs a where clause"));
        }
        let assignments = self.assignments.as_deref().ok_or_else(|| {
            Error::precondition(format!(
                "table {}: no updatable column outside the primary key",
                table
            ))
        })?;
        let mut update = borrow(update)?;
        update.prepare(&sql::update(&table, assignments, where_clause))?;
        update.execute()?;
        Ok(update.row_count()?.max(0) as u64)
    }

    /// Deletes the row identified by the current values of the primary key columns, applying
    /// the [`NoRowsPolicy`] of the table options.
    pub fn delete(&mut self) -> Result<u64> {
        self.delete_with(self.options.no_rows)
    }

    pub fn delete_with(&mut self, policy: NoRowsPolicy) -> Result<u64> {
        self.open_name()?;
        let delete = self.write_handle(&self.statements.delete_pk, AccessFlags::DELETE_PK)?;
        let mut delete = borrow(delete)?;
        delete.execute()?;
        affected("delete", delete.row_count()?, policy)
    }

    /// Deletes every row matching `where_clause`. Returns the number of affected rows.
    pub fn delete_where(&mut self, where_clause: &str) -> Result<u64> {
        let table = self.open_name()?;
        let delete = self.write_handle(&self.statements.delete_where, AccessFlags::DELETE_WHERE)?;
        if where_clause.trim().is_empty() {
            return Err(Error::precondition("delete_where needs a where clause"));
        }
        let mut delete = borrow(delete)?;
        delete.exec_direct(&sql::delete(&table, where_clause), false)?;
        Ok(delete.row_count()?.max(0) as u64)
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.rollback()
    }
}

impl Debug for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("access", &self.access)
            .field("open", &self.open)
            .field("columns", &self.columns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TablePrivileges;
    use crate::mem::{MemColumn, MemConnection, MemTableDef};

    fn connection() -> MemConnection {
        let _ = env_logger::builder().is_test(true).try_init();
        let conn = MemConnection::new();
        conn.create_table(
            MemTableDef::new("items")
                .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
                .column(MemColumn::new("k", SqlType::SMALLINT).primary_key())
                .column(MemColumn::new("label", SqlType::VARCHAR).size(16))
                .column(MemColumn::new("blob", SqlType::GUID))
                .column(MemColumn::new("price", SqlType::NUMERIC).size(8).scale(2)),
        )
        .unwrap();
        conn
    }

    fn table(conn: &MemConnection, access: AccessFlags) -> Table {
        let mut table =
            Table::new(Rc::new(conn.clone()), TableLookup::new("items"), access).unwrap();
        let mut options = TableOptions::new();
        options.open_flags(OpenFlags::SKIP_UNSUPPORTED_COLUMNS);
        table.set_options(options).unwrap();
        table
    }

    #[test]
    fn skipped_columns_leave_no_gap() {
        let conn = connection();
        let mut table = table(&conn, AccessFlags::READ);
        table.open().unwrap();
        assert_eq!(table.column_count(), 4);
        assert_eq!(table.column_index("price").unwrap(), 3);
        assert_eq!(table.column(3).unwrap().c_type(), CType::NUMERIC);

        table.close().unwrap();
        assert!(table
            .open_with(OpenFlags::empty())
            .unwrap_err()
            .to_string()
            .contains("blob"));
        assert!(!table.is_open());
        assert_eq!(table.column_count(), 0);
    }

    #[test]
    fn failed_open_leaves_nothing_bound() {
        let conn = connection();
        conn.create_table(
            MemTableDef::new("locked")
                .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
                .grant(TablePrivileges::SELECT | TablePrivileges::INSERT),
        )
        .unwrap();
        // inserting alone still needs every write privilege
        let mut table = Table::new(
            Rc::new(conn.clone()),
            TableLookup::new("locked"),
            AccessFlags::READ | AccessFlags::INSERT,
        )
        .unwrap();
        let err = table.open_with(OpenFlags::CHECK_PRIVILEGES).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingPrivilege { missing, .. }
                if missing == TablePrivileges::UPDATE | TablePrivileges::DELETE
        ));
        assert!(!table.is_open());
        assert!(table.select("").unwrap_err().is_precondition());

        table.set_access_flags(AccessFlags::READ).unwrap();
        table.open_with(OpenFlags::CHECK_PRIVILEGES).unwrap();
    }

    #[test]
    fn key_parameters_follow_their_statement_order() {
        let conn = connection();
        let mut table = table(&conn, AccessFlags::READ | AccessFlags::WRITE);
        table.open().unwrap();
        for (id, k, label) in [(1i32, 1i16, "one"), (1, 2, "two"), (2, 1, "three")] {
            table.set_column_value(0, id).unwrap();
            table.set_column_value(1, k).unwrap();
            table.set_column_value(2, label).unwrap();
            table.set_column_null(3).unwrap();
            table.insert().unwrap();
        }

        let update = table.statements.update_pk.clone().unwrap();
        assert!(table.column(2).unwrap().is_bound_parameter(&update, 1));
        assert!(table.column(3).unwrap().is_bound_parameter(&update, 2));
        assert!(table.column(0).unwrap().is_bound_parameter(&update, 3));
        assert!(table.column(1).unwrap().is_bound_parameter(&update, 4));

        table.set_column_value(0, 1i32).unwrap();
        table.set_column_value(1, 2i16).unwrap();
        table.set_column_value(2, "TWO").unwrap();
        assert_eq!(table.update().unwrap(), 1);
        assert_eq!(table.count("label = 'TWO'").unwrap(), 1);

        assert_eq!(table.delete().unwrap(), 1);
        assert!(matches!(
            table.delete().unwrap_err(),
            Error::NoRowsAffected { operation: "delete" }
        ));
        assert_eq!(table.delete_with(NoRowsPolicy::Tolerate).unwrap(), 0);

        table.set_column_value(2, "many").unwrap();
        assert!(table.update_where("id = 1 OR 1").is_err());
        assert_eq!(table.update_where("id >= 1").unwrap(), 2);
        assert_eq!(table.delete_where("label = 'many'").unwrap(), 2);
        assert_eq!(table.count("").unwrap(), 0);
    }

    #[test]
    fn manual_columns_survive_close() {
        let conn = connection();
        let mut table = table(&conn, AccessFlags::READ);
        let shared = ExternalBuffer::allocate(CType::SLONG, 4).unwrap();
        table
            .set_column(0, "id", shared.clone(), SqlType::INTEGER, None, None, ColumnFlags::SELECT)
            .unwrap();
        table
            .define_column(1, "label", SqlType::VARCHAR, CType::WCHAR, Some(16), None, ColumnFlags::SELECT)
            .unwrap();
        conn.execute("INSERT INTO items (id, k, label) VALUES (7, 1, 'seven')")
            .unwrap();

        table.open().unwrap();
        table.select("").unwrap();
        assert!(table.column_value(0).unwrap().is_none());
        assert!(table.select_next().unwrap());
        assert_eq!(shared.borrow().to_i32().unwrap(), 7);
        assert_eq!(table.column(1).unwrap().as_string().unwrap(), "seven");
        assert!(table.is_select_open());
        table.select_close().unwrap();
        assert!(!table.is_select_open());

        table.close().unwrap();
        assert_eq!(table.column_count(), 2);
        assert!(!table.column(0).unwrap().is_bound());
        assert!(table
            .define_column(2, "k", SqlType::SMALLINT, CType::SSHORT, None, None, ColumnFlags::SELECT)
            .is_ok());
    }

    #[test]
    fn forward_only_cursors_cannot_scroll() {
        let conn = connection();
        conn.execute("INSERT INTO items (id, k) VALUES (1, 1)").unwrap();
        let mut table = table(&conn, AccessFlags::READ);
        table
            .open_with(OpenFlags::SKIP_UNSUPPORTED_COLUMNS | OpenFlags::FORWARD_ONLY_CURSORS)
            .unwrap();
        table.select("").unwrap();
        assert_eq!(
            table.select_first().unwrap_err().sqlstate(),
            Some("HY106")
        );
        assert!(table.select_next().unwrap());
        assert!(!table.select_next().unwrap());
    }
}
