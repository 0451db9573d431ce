//! Core of exodbc: column buffers, SQL/C type mapping, and a table engine issuing
//! `SELECT`, `INSERT`, `UPDATE` and `DELETE` through bound buffers.
//! Not intended to be used directly.
#![warn(future_incompatible, rust_2018_idioms)]
#![allow(clippy::len_without_is_empty, clippy::new_without_default)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod buffer;
pub mod catalog;
pub mod driver;
pub mod error;
pub mod handle;
pub mod mem;
pub mod table;
pub mod types;

#[cfg(feature = "odbc")]
#[cfg_attr(docsrs, doc(cfg(feature = "odbc")))]
pub mod odbc;

pub use buffer::{BufferValue, ColumnBuffer, ColumnFlags};
pub use error::{Error, Result};
pub use table::{AccessFlags, Table};
