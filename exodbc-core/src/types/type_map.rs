use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{CType, SqlType};

/// Decides which native buffer type backs a column of a given SQL type.
///
/// A map is built explicitly and handed to the table layer; there is no global registry.
/// Registrations overwrite earlier ones for the same SQL type. If a default is configured it is
/// returned for every SQL type without a registration, which is how "bind everything as text"
/// policies are expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMap {
    types: HashMap<SqlType, CType>,
    default: Option<CType>,
}

impl TypeMap {
    /// An empty map without a default.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            default: None,
        }
    }

    /// Numeric SQL types to matching numeric buffers, character types to char, wide character
    /// types to wide char, date/time types to their structs, binary to a byte buffer and
    /// NUMERIC/DECIMAL to the packed decimal struct.
    pub fn standard() -> Self {
        let mut map = Self::new();
        for (sql_type, c_type) in [
            (SqlType::TINYINT, CType::SSHORT),
            (SqlType::SMALLINT, CType::SSHORT),
            (SqlType::INTEGER, CType::SLONG),
            (SqlType::BIGINT, CType::SBIGINT),
            (SqlType::REAL, CType::DOUBLE),
            (SqlType::FLOAT, CType::DOUBLE),
            (SqlType::DOUBLE, CType::DOUBLE),
            (SqlType::CHAR, CType::CHAR),
            (SqlType::VARCHAR, CType::CHAR),
            (SqlType::LONGVARCHAR, CType::CHAR),
            (SqlType::WCHAR, CType::WCHAR),
            (SqlType::WVARCHAR, CType::WCHAR),
            (SqlType::WLONGVARCHAR, CType::WCHAR),
            (SqlType::TYPE_DATE, CType::TYPE_DATE),
            (SqlType::TYPE_TIME, CType::TYPE_TIME),
            (SqlType::SS_TIME2, CType::SS_TIME2),
            (SqlType::TYPE_TIMESTAMP, CType::TYPE_TIMESTAMP),
            (SqlType::BINARY, CType::BINARY),
            (SqlType::VARBINARY, CType::BINARY),
            (SqlType::LONGVARBINARY, CType::BINARY),
            (SqlType::NUMERIC, CType::NUMERIC),
            (SqlType::DECIMAL, CType::NUMERIC),
        ] {
            map.register_type(sql_type, c_type);
        }
        map
    }

    /// Binds every column as narrow character data.
    pub fn force_char() -> Self {
        let mut map = Self::new();
        map.set_default(CType::CHAR);
        map
    }

    /// Binds every column as wide character data.
    pub fn force_wchar() -> Self {
        let mut map = Self::new();
        map.set_default(CType::WCHAR);
        map
    }

    /// The standard map, but `CHAR`/`VARCHAR` columns are bound as wide character data.
    pub fn char_as_wchar() -> Self {
        let mut map = Self::standard();
        map.register_type(SqlType::CHAR, CType::WCHAR);
        map.register_type(SqlType::VARCHAR, CType::WCHAR);
        map
    }

    /// The standard map, but `WCHAR`/`WVARCHAR` columns are bound as narrow character data.
    pub fn wchar_as_char() -> Self {
        let mut map = Self::standard();
        map.register_type(SqlType::WCHAR, CType::CHAR);
        map.register_type(SqlType::WVARCHAR, CType::CHAR);
        map
    }

    /// Registers `c_type` for `sql_type`, returning the mapping it replaced.
    pub fn register_type(&mut self, sql_type: SqlType, c_type: CType) -> Option<CType> {
        self.types.insert(sql_type, c_type)
    }

    /// Removes a registration, falling back to the default for `sql_type` afterwards.
    pub fn unregister_type(&mut self, sql_type: SqlType) -> Option<CType> {
        self.types.remove(&sql_type)
    }

    /// The buffer type for `sql_type`: its registration, else the default, else
    /// [`Error::NotFound`].
    pub fn buffer_type(&self, sql_type: SqlType) -> Result<CType> {
        self.types
            .get(&sql_type)
            .copied()
            .or(self.default)
            .ok_or_else(|| {
                Error::NotFound(format!("no buffer type registered for {}", sql_type).into())
            })
    }

    pub fn set_default(&mut self, c_type: CType) {
        self.default = Some(c_type);
    }

    pub fn clear_default(&mut self) {
        self.default = None;
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn default_type(&self) -> Option<CType> {
        self.default
    }

    pub fn iter(&self) -> impl Iterator<Item = (SqlType, CType)> + '_ {
        self.types.iter().map(|(s, c)| (*s, *c))
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_registration_replaces_earlier_one() {
        let mut map = TypeMap::new();
        assert_eq!(map.register_type(SqlType::INTEGER, CType::SLONG), None);
        assert_eq!(
            map.register_type(SqlType::INTEGER, CType::SBIGINT),
            Some(CType::SLONG)
        );
        assert_eq!(map.buffer_type(SqlType::INTEGER).unwrap(), CType::SBIGINT);
    }

    #[test]
    fn unmapped_type_without_default_is_not_found() {
        let map = TypeMap::standard();
        assert!(!map.has_default());
        assert!(matches!(
            map.buffer_type(SqlType::GUID),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn default_covers_every_unmapped_type() {
        let mut map = TypeMap::standard();
        map.set_default(CType::CHAR);
        assert_eq!(map.buffer_type(SqlType::GUID).unwrap(), CType::CHAR);
        assert_eq!(map.buffer_type(SqlType::INTEGER).unwrap(), CType::SLONG);

        let forced = TypeMap::force_wchar();
        assert_eq!(forced.buffer_type(SqlType::INTEGER).unwrap(), CType::WCHAR);
        assert_eq!(forced.buffer_type(SqlType::TYPE_DATE).unwrap(), CType::WCHAR);
    }

    #[test]
    fn char_policies_override_two_registrations() {
        let standard = TypeMap::standard();
        let wide = TypeMap::char_as_wchar();
        let narrow = TypeMap::wchar_as_char();

        let changed = |other: &TypeMap| {
            standard
                .iter()
                .filter(|(s, c)| other.buffer_type(*s).unwrap() != *c)
                .count()
        };
        assert_eq!(changed(&wide), 2);
        assert_eq!(changed(&narrow), 2);
        assert_eq!(wide.buffer_type(SqlType::VARCHAR).unwrap(), CType::WCHAR);
        assert_eq!(narrow.buffer_type(SqlType::WCHAR).unwrap(), CType::CHAR);
        assert_eq!(wide.buffer_type(SqlType::LONGVARCHAR).unwrap(), CType::CHAR);
    }
}
