use super::flags::{NoRowsPolicy, OpenFlags};
use crate::types::TypeMap;

/// Settings a [`Table`](super::Table) applies when it is opened and written through.
///
/// ```rust
/// use exodbc_core::table::{NoRowsPolicy, OpenFlags, TableOptions};
/// use exodbc_core::types::TypeMap;
///
/// let mut options = TableOptions::new();
/// options
///     .type_map(TypeMap::char_as_wchar())
///     .open_flags(OpenFlags::SKIP_UNSUPPORTED_COLUMNS)
///     .no_rows(NoRowsPolicy::Tolerate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub(crate) type_map: TypeMap,
    pub(crate) open_flags: OpenFlags,
    pub(crate) no_rows: NoRowsPolicy,
}

impl TableOptions {
    pub fn new() -> Self {
        Self {
            type_map: TypeMap::standard(),
            open_flags: OpenFlags::empty(),
            no_rows: NoRowsPolicy::default(),
        }
    }

    /// Sets the policy choosing native buffer types for columns read from the catalog.
    pub fn type_map(&mut self, type_map: TypeMap) -> &mut Self {
        self.type_map = type_map;
        self
    }

    /// Sets the flags used by [`Table::open`](super::Table::open).
    pub fn open_flags(&mut self, flags: OpenFlags) -> &mut Self {
        self.open_flags = flags;
        self
    }

    /// Sets what [`Table::update`](super::Table::update) and
    /// [`Table::delete`](super::Table::delete) do when no row matched.
    pub fn no_rows(&mut self, policy: NoRowsPolicy) -> &mut Self {
        self.no_rows = policy;
        self
    }

    pub fn get_type_map(&self) -> &TypeMap {
        &self.type_map
    }

    pub fn get_open_flags(&self) -> OpenFlags {
        self.open_flags
    }

    pub fn get_no_rows(&self) -> NoRowsPolicy {
        self.no_rows
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::new()
    }
}
