//! Native backend talking to the ODBC driver manager through the `odbc-sys` bindings
//! re-exported by `odbc-api`.
//!
//! Handles are owned by small RAII wrappers; every driver call is checked and failures carry
//! all diagnostic records of the handle.

mod connection;
mod options;
mod statement;

use odbc_api::sys::{self, Handle, HandleType, SqlReturn};
use widestring::U16String;

pub use connection::OdbcConnection;
pub use options::OdbcConnectOptions;
pub use statement::OdbcStatement;

use crate::error::{DiagRecord, DriverError, Result};

/// Reads every diagnostic record of `handle`.
///
/// # Safety
/// `handle` must be a valid handle of type `handle_type`.
unsafe fn diagnostics(handle_type: HandleType, handle: Handle) -> Vec<DiagRecord> {
    let mut records = Vec::new();
    for number in 1..=i16::MAX {
        let mut state = [0u16; 6];
        let mut native_error = 0;
        let mut message = vec![0u16; 1024];
        let mut message_len = 0;
        let ret = sys::SQLGetDiagRecW(
            handle_type,
            handle,
            number,
            state.as_mut_ptr(),
            &mut native_error,
            message.as_mut_ptr(),
            message.len() as i16,
            &mut message_len,
        );
        if ret != SqlReturn::SUCCESS && ret != SqlReturn::SUCCESS_WITH_INFO {
            break;
        }
        message.truncate((message_len.max(0) as usize).min(message.len()));
        records.push(DiagRecord::new(
            U16String::from_vec(state[..5].to_vec()).to_string_lossy(),
            native_error,
            U16String::from_vec(message).to_string_lossy(),
        ));
    }
    records
}

/// Turns the return code of `operation` into a result. `NO_DATA` counts as success; callers
/// that care test for it before checking.
///
/// # Safety
/// See [`diagnostics`].
unsafe fn check(
    ret: SqlReturn,
    operation: &'static str,
    handle_type: HandleType,
    handle: Handle,
) -> Result<()> {
    match ret {
        SqlReturn::SUCCESS | SqlReturn::NO_DATA => Ok(()),
        SqlReturn::SUCCESS_WITH_INFO => {
            for record in diagnostics(handle_type, handle) {
                log::debug!("{}: {}", operation, record);
            }
            Ok(())
        }
        SqlReturn::INVALID_HANDLE => Err(DriverError::single(
            operation,
            "HY000",
            0,
            "invalid handle",
        )
        .into()),
        _ => {
            let mut records = diagnostics(handle_type, handle);
            if records.is_empty() {
                records.push(DiagRecord::new("HY000", 0, format!("return code {:?}", ret)));
            }
            Err(DriverError::new(operation, records).into())
        }
    }
}

fn wide(text: &str) -> U16String {
    U16String::from_str(text)
}
