//! Schema facts supplied by the catalog collaborator, and the read-only caches the table engine
//! keeps of them.

use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;

use crate::error::Result;
use crate::types::SqlType;

/// Identifies a table as returned by `SQLTables`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
    pub table_type: String,
    pub remarks: String,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
            table_type: "TABLE".to_owned(),
            remarks: String::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// The name to use in SQL text: `catalog.schema.name`, leaving out empty parts.
    pub fn query_name(&self) -> String {
        [self.catalog.as_deref(), self.schema.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Display for TableInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_name())
    }
}

/// Search terms used to resolve a [`TableInfo`] through the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableLookup {
    pub name: String,
    pub schema: Option<String>,
    pub catalog: Option<String>,
    pub table_type: Option<String>,
}

impl TableLookup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn table_type(mut self, table_type: impl Into<String>) -> Self {
        self.table_type = Some(table_type.into());
        self
    }

    pub fn matches(&self, info: &TableInfo) -> bool {
        fn part_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
            match wanted {
                None => true,
                Some(w) => actual.map_or(w.is_empty(), |a| a.eq_ignore_ascii_case(w)),
            }
        }

        info.name.eq_ignore_ascii_case(&self.name)
            && part_matches(self.schema.as_deref(), info.schema.as_deref())
            && part_matches(self.catalog.as_deref(), info.catalog.as_deref())
            && part_matches(self.table_type.as_deref(), Some(info.table_type.as_str()))
    }
}

impl Display for TableLookup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for part in [self.catalog.as_deref(), self.schema.as_deref()]
            .into_iter()
            .flatten()
        {
            write!(f, "{}.", part)?;
        }
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    NoNulls,
    Nullable,
    Unknown,
}

/// One row of `SQLColumns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
    pub type_name: String,
    /// Declared size: characters for text, precision for numerics.
    pub column_size: Option<u32>,
    /// Scale for exact numerics.
    pub decimal_digits: Option<i16>,
    pub nullable: Nullability,
    /// 1-based position in the table.
    pub ordinal_position: u16,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            type_name: sql_type.name().unwrap_or("UNKNOWN").to_owned(),
            column_size: None,
            decimal_digits: None,
            nullable: Nullability::Nullable,
            ordinal_position: 0,
        }
    }

    pub fn size(mut self, column_size: u32) -> Self {
        self.column_size = Some(column_size);
        self
    }

    pub fn decimal_digits(mut self, decimal_digits: i16) -> Self {
        self.decimal_digits = Some(decimal_digits);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = Nullability::NoNulls;
        self
    }
}

/// One row of `SQLPrimaryKeys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyInfo {
    pub column_name: String,
    /// 1-based position of the column within the key.
    pub key_sequence: u16,
    pub pk_name: Option<String>,
}

/// One row of `SQLTablePrivileges`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeInfo {
    pub grantor: Option<String>,
    pub grantee: String,
    pub privilege: String,
    pub grantable: Option<bool>,
}

bitflags! {
    /// Table level privileges relevant to the table engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TablePrivileges: u8 {
        const SELECT = 0x01;
        const INSERT = 0x02;
        const UPDATE = 0x04;
        const DELETE = 0x08;
        const REFERENCES = 0x10;
    }
}

/// The schema-introspection collaborator.
///
/// Implementations answer questions about the database schema; the table engine treats the
/// answers as facts and never caches them across opens.
pub trait Catalog {
    /// Every table matching `lookup`.
    fn find_tables(&self, lookup: &TableLookup) -> Result<Vec<TableInfo>>;

    /// The columns of `table`, ordered by ordinal position.
    fn read_columns(&self, table: &TableInfo) -> Result<Vec<ColumnInfo>>;

    /// The primary key columns of `table`, in the order the driver reports them.
    fn read_primary_keys(&self, table: &TableInfo) -> Result<Vec<PrimaryKeyInfo>>;

    fn read_privileges(&self, table: &TableInfo) -> Result<Vec<PrivilegeInfo>>;
}

/// Snapshot of the primary key of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryKeyCache {
    keys: Vec<PrimaryKeyInfo>,
}

impl PrimaryKeyCache {
    pub fn from_catalog(catalog: &dyn Catalog, table: &TableInfo) -> Result<Self> {
        Ok(Self::from_keys(catalog.read_primary_keys(table)?))
    }

    pub fn from_keys(keys: Vec<PrimaryKeyInfo>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Keys in the order they were discovered.
    pub fn iter(&self) -> impl Iterator<Item = &PrimaryKeyInfo> {
        self.keys.iter()
    }

    pub fn contains(&self, column_name: &str) -> bool {
        self.keys
            .iter()
            .any(|k| k.column_name.eq_ignore_ascii_case(column_name))
    }
}

/// Snapshot of the privileges granted on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeCache {
    granted: TablePrivileges,
}

impl PrivilegeCache {
    pub fn from_catalog(catalog: &dyn Catalog, table: &TableInfo) -> Result<Self> {
        Ok(Self::from_privileges(&catalog.read_privileges(table)?))
    }

    pub fn from_privileges(privileges: &[PrivilegeInfo]) -> Self {
        let granted = privileges
            .iter()
            .filter_map(|p| privilege_from_name(&p.privilege))
            .fold(TablePrivileges::empty(), |acc, p| acc | p);
        Self { granted }
    }

    pub fn granted(&self) -> TablePrivileges {
        self.granted
    }

    pub fn is_granted(&self, privileges: TablePrivileges) -> bool {
        self.granted.contains(privileges)
    }

    /// The subset of `required` that was not granted.
    pub fn missing(&self, required: TablePrivileges) -> TablePrivileges {
        required - self.granted
    }
}

/// Maps a privilege name as reported by `SQLTablePrivileges`, ignoring case and padding.
fn privilege_from_name(name: &str) -> Option<TablePrivileges> {
    TablePrivileges::from_name(&name.trim().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_names_ignore_case_and_padding() {
        assert_eq!(privilege_from_name(" select "), Some(TablePrivileges::SELECT));
        assert_eq!(privilege_from_name("References"), Some(TablePrivileges::REFERENCES));
        assert_eq!(privilege_from_name("ALTER"), None);
    }

    #[test]
    fn query_name_skips_empty_parts() {
        assert_eq!(TableInfo::new("t").query_name(), "t");
        assert_eq!(
            TableInfo::new("t").with_schema("dbo").with_catalog("").query_name(),
            "dbo.t"
        );
        assert_eq!(
            TableInfo::new("t").with_schema("s").with_catalog("c").query_name(),
            "c.s.t"
        );
    }

    #[test]
    fn lookup_matches_case_insensitively() {
        let info = TableInfo::new("IntTypes").with_schema("exodbc");
        assert!(TableLookup::new("inttypes").matches(&info));
        assert!(TableLookup::new("INTTYPES").schema("EXODBC").matches(&info));
        assert!(!TableLookup::new("inttypes").schema("other").matches(&info));
        assert!(!TableLookup::new("inttypes").table_type("VIEW").matches(&info));
    }

    #[test]
    fn privilege_cache_reports_missing_privileges() {
        let grant = |p: &str| PrivilegeInfo {
            grantor: None,
            grantee: "PUBLIC".to_owned(),
            privilege: p.to_owned(),
            grantable: None,
        };
        let cache = PrivilegeCache::from_privileges(&[grant("select"), grant("INSERT"), grant("ALTER")]);

        assert!(cache.is_granted(TablePrivileges::SELECT | TablePrivileges::INSERT));
        assert_eq!(
            cache.missing(TablePrivileges::all() - TablePrivileges::REFERENCES),
            TablePrivileges::UPDATE | TablePrivileges::DELETE
        );
    }
}
