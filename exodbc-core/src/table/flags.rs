use bitflags::bitflags;

use crate::catalog::TablePrivileges;

bitflags! {
    /// Operations a [`Table`](super::Table) is opened for. Each write operation gets its own
    /// statement handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u8 {
        const SELECT = 0x01;
        const INSERT = 0x02;
        const UPDATE_PK = 0x04;
        const UPDATE_WHERE = 0x08;
        const DELETE_PK = 0x10;
        const DELETE_WHERE = 0x20;

        const UPDATE = Self::UPDATE_PK.bits() | Self::UPDATE_WHERE.bits();
        const DELETE = Self::DELETE_PK.bits() | Self::DELETE_WHERE.bits();
        const READ = Self::SELECT.bits();
        const WRITE = Self::INSERT.bits() | Self::UPDATE.bits() | Self::DELETE.bits();
    }
}

impl AccessFlags {
    pub fn is_writable(self) -> bool {
        self.intersects(AccessFlags::WRITE)
    }

    /// Privileges the current user needs for these operations: `SELECT` always, and `INSERT`,
    /// `UPDATE` and `DELETE` together as soon as any write operation is requested.
    pub fn required_privileges(self) -> TablePrivileges {
        let mut required = TablePrivileges::SELECT;
        if self.is_writable() {
            required |= TablePrivileges::INSERT | TablePrivileges::UPDATE | TablePrivileges::DELETE;
        }
        required
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        AccessFlags::READ
    }
}

bitflags! {
    /// Behavior of [`Table::open`](super::Table::open).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u8 {
        /// Fail unless the catalog grants every privilege the access flags need.
        const CHECK_PRIVILEGES = 0x01;
        /// Leave out columns without a usable buffer type instead of failing.
        const SKIP_UNSUPPORTED_COLUMNS = 0x02;
        /// Take the primary key from columns flagged `PRIMARY_KEY` instead of the catalog.
        const DO_NOT_QUERY_PRIMARY_KEYS = 0x04;
        /// Open the select cursor forward only; only `select_next` works.
        const FORWARD_ONLY_CURSORS = 0x08;
    }
}

/// What a primary key update or delete does when no row matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoRowsPolicy {
    Tolerate,
    #[default]
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_write_access_requires_every_write_privilege() {
        let write = TablePrivileges::SELECT
            | TablePrivileges::INSERT
            | TablePrivileges::UPDATE
            | TablePrivileges::DELETE;
        assert_eq!(AccessFlags::READ.required_privileges(), TablePrivileges::SELECT);
        assert_eq!((AccessFlags::READ | AccessFlags::INSERT).required_privileges(), write);
        assert_eq!(
            (AccessFlags::SELECT | AccessFlags::UPDATE_WHERE).required_privileges(),
            write
        );
        assert_eq!((AccessFlags::READ | AccessFlags::WRITE).required_privileges(), write);
        assert!(!AccessFlags::READ.is_writable());
        assert!(AccessFlags::DELETE_WHERE.is_writable());
    }
}
