use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;

use crate::driver::OdbcVersion;
use crate::error::Error;

/// How to reach a data source through the ODBC driver manager.
///
/// ```rust
/// use std::str::FromStr;
/// use exodbc_core::odbc::OdbcConnectOptions;
///
/// let opts = OdbcConnectOptions::from_str("odbc:Inventory")?;
/// assert_eq!(opts.connection_string(), "DSN=Inventory");
/// # Ok::<(), exodbc_core::Error>(())
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct OdbcConnectOptions {
    pub(crate) conn_str: String,
    pub(crate) odbc_version: OdbcVersion,
    pub(crate) auto_commit: bool,
}

impl OdbcConnectOptions {
    pub fn connection_string(&self) -> &str {
        &self.conn_str
    }

    /// Sets the ODBC version requested from the driver manager. Defaults to 3.80.
    pub fn odbc_version(&mut self, version: OdbcVersion) -> &mut Self {
        self.odbc_version = version;
        self
    }

    /// Sets whether every statement commits on its own. Defaults to `true`.
    pub fn auto_commit(&mut self, auto_commit: bool) -> &mut Self {
        self.auto_commit = auto_commit;
        self
    }
}

impl Debug for OdbcConnectOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OdbcConnectOptions")
            .field("conn_str", &"<redacted>")
            .field("odbc_version", &self.odbc_version)
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}

impl FromStr for OdbcConnectOptions {
    type Err = Error;

    /// Accepts `odbc:`-prefixed or plain input: a bare name is a DSN, anything containing `=`
    /// is passed on as a connection string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut t = s.trim();
        if let Some(rest) = t.strip_prefix("odbc:") {
            t = rest.trim();
        }
        if t.is_empty() {
            return Err(Error::precondition("empty ODBC connection string"));
        }
        let conn_str = if t.contains('=') {
            t.to_string()
        } else {
            format!("DSN={}", t)
        };

        Ok(Self {
            conn_str,
            odbc_version: OdbcVersion::V3_80,
            auto_commit: true,
        })
    }
}
