//! Column buffers, SQL/C type mapping and a table engine that reads and writes database tables
//! through bound buffers.
//!
//! A [`Table`] resolves its definition through the catalog of a [`Connection`], keeps one
//! [`ColumnBuffer`] per column and drives `SELECT`, `INSERT`, `UPDATE` and `DELETE` statements
//! whose result columns and parameters are those buffers. The [`mem`] backend runs everything
//! in process; the `odbc` feature adds a backend over the ODBC driver manager.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use exodbc_core::buffer::{self, BufferValue, ColumnBuffer, ColumnFlags};
pub use exodbc_core::catalog::{self, TableInfo, TableLookup};
pub use exodbc_core::driver::{self, Connection};
pub use exodbc_core::error::{self, Error, Result};
pub use exodbc_core::handle;
pub use exodbc_core::mem;
pub use exodbc_core::table::{self, AccessFlags, OpenFlags, Table, TableOptions};
pub use exodbc_core::types::{self, CType, SqlType, TypeMap};

#[cfg(feature = "odbc")]
#[cfg_attr(docsrs, doc(cfg(feature = "odbc")))]
pub use exodbc_core::odbc;
