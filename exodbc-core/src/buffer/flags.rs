use bitflags::bitflags;

bitflags! {
    /// Roles a column plays in the statements of a table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColumnFlags: u8 {
        const SELECT = 0x01;
        const INSERT = 0x02;
        const UPDATE = 0x04;
        const PRIMARY_KEY = 0x08;
        const NULLABLE = 0x10;
    }
}

impl ColumnFlags {
    /// Every role a column can take in a writable table.
    pub const READ_WRITE: ColumnFlags = ColumnFlags::SELECT
        .union(ColumnFlags::INSERT)
        .union(ColumnFlags::UPDATE);

    /// Write roles without `SELECT` are rejected when flags are assigned.
    pub fn is_consistent(self) -> bool {
        self.contains(ColumnFlags::SELECT)
            || !self.intersects(ColumnFlags::INSERT | ColumnFlags::UPDATE)
    }
}

impl Default for ColumnFlags {
    fn default() -> Self {
        ColumnFlags::SELECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_roles_require_select() {
        assert!(ColumnFlags::READ_WRITE.is_consistent());
        assert!(ColumnFlags::empty().is_consistent());
        assert!((ColumnFlags::SELECT | ColumnFlags::PRIMARY_KEY).is_consistent());
        assert!(!ColumnFlags::INSERT.is_consistent());
        assert!(!(ColumnFlags::UPDATE | ColumnFlags::NULLABLE).is_consistent());
    }
}
