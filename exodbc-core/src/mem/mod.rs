//! An in-memory data source.
//!
//! [`MemConnection`] implements [`Connection`] and [`Catalog`] over tables held in process. Its
//! statements understand a small SQL dialect (see [`parser`]) and honor the binding contracts of
//! the ODBC calls they stand in for: bound pointers are read on execute and written on fetch, and
//! failures carry the SQLSTATE a real driver would report.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use crate::catalog::{
    Catalog, ColumnInfo, Nullability, PrimaryKeyInfo, PrivilegeInfo, TableInfo, TableLookup,
    TablePrivileges,
};
use crate::driver::{Connection, ConnectionInfo, OdbcVersion, Statement};
use crate::error::{DriverError, Result};
use crate::types::SqlType;

mod parser;
mod statement;
mod value;

pub use statement::MemStatement;
pub use value::MemValue;

use value::state;

/// A column of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub size: Option<u32>,
    pub scale: Option<i16>,
    pub nullable: bool,
    pub primary_key: bool,
}

impl MemColumn {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size: default_size(sql_type),
            scale: None,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn scale(mut self, scale: i16) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Makes the column part of the primary key, which also makes it `NOT NULL`.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    fn info(&self, ordinal_position: u16) -> ColumnInfo {
        let mut info = ColumnInfo::new(self.name.clone(), self.sql_type);
        info.column_size = self.size;
        info.decimal_digits = self.scale.or_else(|| {
            matches!(self.sql_type, SqlType::NUMERIC | SqlType::DECIMAL).then(|| 0)
        });
        info.nullable = if self.nullable {
            Nullability::Nullable
        } else {
            Nullability::NoNulls
        };
        info.ordinal_position = ordinal_position;
        info
    }
}

/// The column size drivers report for types that have a fixed one.
fn default_size(sql_type: SqlType) -> Option<u32> {
    Some(match sql_type {
        SqlType::SMALLINT => 5,
        SqlType::INTEGER => 10,
        SqlType::BIGINT => 19,
        SqlType::DOUBLE | SqlType::FLOAT => 15,
        SqlType::REAL => 7,
        SqlType::NUMERIC | SqlType::DECIMAL => 18,
        SqlType::TYPE_DATE => 10,
        SqlType::TYPE_TIME => 8,
        SqlType::SS_TIME2 => 16,
        SqlType::TYPE_TIMESTAMP => 23,
        _ => return None,
    })
}

/// Definition of a table to create on a [`MemConnection`].
#[derive(Debug, Clone)]
pub struct MemTableDef {
    info: TableInfo,
    columns: Vec<MemColumn>,
    granted: TablePrivileges,
}

impl MemTableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: TableInfo::new(name),
            columns: Vec::new(),
            granted: TablePrivileges::all(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.info = self.info.with_schema(schema);
        self
    }

    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.info = self.info.with_catalog(catalog);
        self
    }

    pub fn view(mut self) -> Self {
        self.info.table_type = "VIEW".to_owned();
        self
    }

    pub fn column(mut self, column: MemColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Replaces the privileges granted on the table. All privileges are granted by default.
    pub fn grant(mut self, privileges: TablePrivileges) -> Self {
        self.granted = privileges;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MemTable {
    pub info: TableInfo,
    pub columns: Vec<MemColumn>,
    pub rows: Vec<Vec<MemValue>>,
    pub granted: TablePrivileges,
}

impl MemTable {
    pub fn key_indexes(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    fn is_named(&self, name: &str) -> bool {
        self.info.query_name().eq_ignore_ascii_case(name)
            || self.info.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug)]
pub(crate) struct MemDatabase {
    pub tables: Vec<MemTable>,
    pub require_primed_cursor: bool,
    auto_commit: bool,
    /// State at the start of the open transaction, when not in auto-commit mode.
    snapshot: Option<Vec<MemTable>>,
}

impl MemDatabase {
    fn position(&self, name: &str) -> std::result::Result<usize, DriverError> {
        self.tables
            .iter()
            .position(|t| t.is_named(name))
            .ok_or_else(|| {
                state(
                    "SQLExecDirect",
                    "42S02",
                    format!("base table or view not found: {}", name),
                )
            })
    }

    pub fn table(&self, name: &str) -> std::result::Result<&MemTable, DriverError> {
        Ok(&self.tables[self.position(name)?])
    }

    pub fn table_mut(&mut self, name: &str) -> std::result::Result<&mut MemTable, DriverError> {
        let index = self.position(name)?;
        Ok(&mut self.tables[index])
    }

    /// Marks the start of a modification, opening a transaction if none is open.
    pub fn begin_write(&mut self) {
        if !self.auto_commit && self.snapshot.is_none() {
            self.snapshot = Some(self.tables.clone());
        }
    }
}

/// A connection to an in-memory data source.
///
/// Cloning yields another connection to the same data.
#[derive(Debug, Clone)]
pub struct MemConnection {
    db: Rc<RefCell<MemDatabase>>,
    info: ConnectionInfo,
    statements: Rc<Cell<u64>>,
}

impl MemConnection {
    pub fn new() -> Self {
        Self {
            db: Rc::new(RefCell::new(MemDatabase {
                tables: Vec::new(),
                require_primed_cursor: false,
                auto_commit: true,
                snapshot: None,
            })),
            info: ConnectionInfo {
                dbms_name: "exodbc in-memory".to_owned(),
                odbc_version: OdbcVersion::V3_80,
                max_concurrent_activities: 0,
            },
            statements: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn database(&self) -> Rc<RefCell<MemDatabase>> {
        Rc::clone(&self.db)
    }

    pub fn create_table(&self, def: MemTableDef) -> Result<()> {
        let mut db = self.db.borrow_mut();
        if db.tables.iter().any(|t| t.info == def.info) {
            return Err(state(
                "SQLExecDirect",
                "42S01",
                format!("base table or view already exists: {}", def.info),
            )
            .into());
        }
        debug!("creating in-memory table {}", def.info);
        db.tables.push(MemTable {
            info: def.info,
            columns: def.columns,
            rows: Vec::new(),
            granted: def.granted,
        });
        Ok(())
    }

    /// Makes statements reject a relative fetch before any other fetch positioned the cursor,
    /// as some drivers do.
    pub fn set_require_primed_cursor(&self, require: bool) {
        self.db.borrow_mut().require_primed_cursor = require;
    }

    /// Switches auto-commit mode. Turning it back on commits the open transaction.
    pub fn set_auto_commit(&self, auto_commit: bool) {
        let mut db = self.db.borrow_mut();
        db.auto_commit = auto_commit;
        if auto_commit {
            db.snapshot = None;
        }
    }

    /// Runs `sql` on a fresh statement and returns the number of affected rows.
    pub fn execute(&self, sql: &str) -> Result<i64> {
        let mut stmt = self.allocate_statement()?;
        stmt.exec_direct(sql)?;
        stmt.row_count()
    }

    /// Number of statements allocated so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.get()
    }
}

impl Default for MemConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MemConnection {
    fn allocate_statement(&self) -> Result<Box<dyn Statement>> {
        self.statements.set(self.statements.get() + 1);
        Ok(Box::new(MemStatement::new(self.database())))
    }

    fn catalog(&self) -> &dyn Catalog {
        self
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn commit(&self) -> Result<()> {
        self.db.borrow_mut().snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut db = self.db.borrow_mut();
        if let Some(tables) = db.snapshot.take() {
            debug!("rolling back in-memory transaction");
            db.tables = tables;
        }
        Ok(())
    }
}

impl Catalog for MemConnection {
    fn find_tables(&self, lookup: &TableLookup) -> Result<Vec<TableInfo>> {
        Ok(self
            .db
            .borrow()
            .tables
            .iter()
            .filter(|t| lookup.matches(&t.info))
            .map(|t| t.info.clone())
            .collect())
    }

    fn read_columns(&self, table: &TableInfo) -> Result<Vec<ColumnInfo>> {
        let db = self.db.borrow();
        let table = exact(&db, table, "SQLColumns")?;
        Ok(table
            .columns
            .iter()
            .zip(1u16..)
            .map(|(c, ordinal)| c.info(ordinal))
            .collect())
    }

    fn read_primary_keys(&self, table: &TableInfo) -> Result<Vec<PrimaryKeyInfo>> {
        let db = self.db.borrow();
        let table = exact(&db, table, "SQLPrimaryKeys")?;
        let pk_name = format!("PK_{}", table.info.name);
        Ok(table
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .zip(1u16..)
            .map(|(c, key_sequence)| PrimaryKeyInfo {
                column_name: c.name.clone(),
                key_sequence,
                pk_name: Some(pk_name.clone()),
            })
            .collect())
    }

    fn read_privileges(&self, table: &TableInfo) -> Result<Vec<PrivilegeInfo>> {
        let db = self.db.borrow();
        let table = exact(&db, table, "SQLTablePrivileges")?;
        Ok(table
            .granted
            .iter_names()
            .map(|(name, _)| PrivilegeInfo {
                grantor: Some("SYSTEM".to_owned()),
                grantee: "PUBLIC".to_owned(),
                privilege: name.to_owned(),
                grantable: Some(false),
            })
            .collect())
    }
}

fn exact<'a>(
    db: &'a MemDatabase,
    info: &TableInfo,
    operation: &'static str,
) -> std::result::Result<&'a MemTable, DriverError> {
    db.tables
        .iter()
        .find(|t| t.info == *info)
        .ok_or_else(|| state(operation, "42S02", format!("base table or view not found: {}", info)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PrimaryKeyCache, PrivilegeCache};

    fn connection() -> MemConnection {
        let conn = MemConnection::new();
        conn.create_table(
            MemTableDef::new("orders")
                .schema("shop")
                .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
                .column(MemColumn::new("total", SqlType::NUMERIC).size(10).scale(2))
                .grant(TablePrivileges::SELECT | TablePrivileges::INSERT),
        )
        .unwrap();
        conn
    }

    #[test]
    fn catalog_describes_created_tables() {
        let conn = connection();
        let tables = conn.find_tables(&TableLookup::new("ORDERS")).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].query_name(), "shop.orders");

        let columns = conn.read_columns(&tables[0]).unwrap();
        assert_eq!(columns[0].nullable, Nullability::NoNulls);
        assert_eq!(columns[1].ordinal_position, 2);
        assert_eq!((columns[1].column_size, columns[1].decimal_digits), (Some(10), Some(2)));

        let keys = PrimaryKeyCache::from_catalog(&conn, &tables[0]).unwrap();
        assert!(keys.contains("id"));
        let privileges = PrivilegeCache::from_catalog(&conn, &tables[0]).unwrap();
        assert_eq!(
            privileges.missing(TablePrivileges::SELECT | TablePrivileges::UPDATE),
            TablePrivileges::UPDATE
        );
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let conn = connection();
        let err = conn
            .create_table(MemTableDef::new("orders").schema("shop"))
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("42S01"));
    }

    #[test]
    fn rollback_restores_the_transaction_start() {
        let conn = connection();
        conn.execute("INSERT INTO shop.orders (id, total) VALUES (1, 9.99)")
            .unwrap();
        conn.set_auto_commit(false);
        conn.execute("INSERT INTO orders (id, total) VALUES (2, 1.5)").unwrap();
        assert_eq!(conn.execute("DELETE FROM orders WHERE id = 1").unwrap(), 1);
        conn.rollback().unwrap();
        assert_eq!(conn.db.borrow().tables[0].rows.len(), 1);

        conn.execute("INSERT INTO orders (id, total) VALUES (2, 1.5)").unwrap();
        conn.commit().unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.db.borrow().tables[0].rows.len(), 2);
    }
}
