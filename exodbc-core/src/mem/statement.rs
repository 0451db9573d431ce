use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::parser::{self, CmpOp, Condition, Operand, Projection, Sql};
use super::value::{state, MemValue, RawBuffer};
use super::{MemDatabase, MemTable};
use crate::driver::{
    BindTarget, DescField, Descriptor, FetchOrientation, ParameterTarget, Statement,
};
use crate::error::{DriverError, Result};
use crate::types::{CType, SqlNumeric};

type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, Copy)]
struct Record {
    buffer: RawBuffer,
    /// Whether precision was set since the type was last set.
    precision_set: bool,
}

impl Record {
    fn new(c_type: CType) -> Self {
        Self {
            buffer: RawBuffer::new(c_type),
            precision_set: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeStart,
    At(usize),
    AfterEnd,
}

#[derive(Debug)]
struct Cursor {
    rows: Vec<Vec<MemValue>>,
    position: Position,
    fetched: bool,
}

impl Cursor {
    fn absolute(&self, n: isize) -> Position {
        let len = self.rows.len() as isize;
        match n {
            0 => Position::BeforeStart,
            n if n > 0 && n <= len => Position::At((n - 1) as usize),
            n if n > 0 => Position::AfterEnd,
            n if -n <= len => Position::At((len + n) as usize),
            _ => Position::BeforeStart,
        }
    }

    fn target(&self, orientation: FetchOrientation) -> Position {
        let len = self.rows.len() as isize;
        let at = |i: isize| {
            if i < 0 {
                Position::BeforeStart
            } else if i >= len {
                Position::AfterEnd
            } else {
                Position::At(i as usize)
            }
        };
        let current = match self.position {
            Position::BeforeStart => -1,
            Position::At(i) => i as isize,
            Position::AfterEnd => len,
        };
        match orientation {
            FetchOrientation::Next => at(current + 1),
            FetchOrientation::Prior => at(current - 1),
            FetchOrientation::First => at(0),
            FetchOrientation::Last => at(len - 1),
            FetchOrientation::Absolute(n) => self.absolute(n),
            FetchOrientation::Relative(n) => at(current + n),
        }
    }
}

/// A statement handle of the in-memory driver.
pub struct MemStatement {
    db: Rc<RefCell<MemDatabase>>,
    rows: BTreeMap<u16, Record>,
    parameters: BTreeMap<u16, Record>,
    prepared: Option<Sql>,
    cursor: Option<Cursor>,
    scrollable: bool,
    row_count: i64,
}

impl MemStatement {
    pub(crate) fn new(db: Rc<RefCell<MemDatabase>>) -> Self {
        Self {
            db,
            rows: BTreeMap::new(),
            parameters: BTreeMap::new(),
            prepared: None,
            cursor: None,
            scrollable: false,
            row_count: -1,
        }
    }

    fn ensure_no_cursor(&self, operation: &'static str) -> DriverResult<()> {
        if self.cursor.is_some() {
            return Err(state(operation, "24000", "invalid cursor state"));
        }
        Ok(())
    }

    fn parameter_values(&self, sql: &Sql) -> DriverResult<Vec<MemValue>> {
        (1..=sql.parameter_count())
            .map(|n| {
                let record = self.parameters.get(&n).ok_or_else(|| {
                    state(
                        "SQLExecute",
                        "07002",
                        format!("parameter {} is not bound", n),
                    )
                })?;
                // SAFETY: the binding contract of `bind_parameter` / `set_desc_field`.
                unsafe { record.buffer.read() }
            })
            .collect()
    }

    fn run(&mut self, sql: Sql) -> DriverResult<()> {
        let params = self.parameter_values(&sql)?;
        let resolve = |operand: &Operand| match operand {
            Operand::Param(n) => params[usize::from(*n) - 1].clone(),
            Operand::Literal(v) => v.clone(),
        };

        let mut db = self.db.borrow_mut();
        match sql {
            Sql::Select {
                projection,
                table,
                filter,
                order_by,
            } => {
                let table = db.table(&table)?;
                let mut matching = table.filter(&filter, &resolve)?;
                let mut keys = Vec::with_capacity(order_by.len());
                for order in &order_by {
                    keys.push((table.column_index(&order.column)?, order.descending));
                }
                matching.sort_by(|a, b| {
                    keys.iter()
                        .map(|(i, desc)| {
                            let ord = table.rows[*a][*i].sort_cmp(&table.rows[*b][*i]);
                            if *desc {
                                ord.reverse()
                            } else {
                                ord
                            }
                        })
                        .find(|o| o.is_ne())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let rows = match projection {
                    Projection::Count => vec![vec![MemValue::Int(matching.len() as i64)]],
                    Projection::All => matching.iter().map(|r| table.rows[*r].clone()).collect(),
                    Projection::Columns(columns) => {
                        let indexes = columns
                            .iter()
                            .map(|c| table.column_index(c))
                            .collect::<DriverResult<Vec<_>>>()?;
                        matching
                            .iter()
                            .map(|r| indexes.iter().map(|i| table.rows[*r][*i].clone()).collect())
                            .collect()
                    }
                };
                self.cursor = Some(Cursor {
                    rows,
                    position: Position::BeforeStart,
                    fetched: false,
                });
                self.row_count = -1;
            }
            Sql::Insert {
                table,
                columns,
                values,
            } => {
                db.begin_write();
                let table = db.table_mut(&table)?;
                let mut row = vec![MemValue::Null; table.columns.len()];
                for (column, operand) in columns.iter().zip(&values) {
                    let index = table.column_index(column)?;
                    row[index] = table.coerce(index, resolve(operand))?;
                }
                table.check_row(&row, None)?;
                table.rows.push(row);
                self.row_count = 1;
            }
            Sql::Update {
                table,
                assignments,
                filter,
            } => {
                db.begin_write();
                let table = db.table_mut(&table)?;
                let matching = table.filter(&filter, &resolve)?;
                let mut changes = Vec::with_capacity(assignments.len());
                for (column, operand) in &assignments {
                    let index = table.column_index(column)?;
                    changes.push((index, table.coerce(index, resolve(operand))?));
                }
                let mut updated = Vec::with_capacity(matching.len());
                for r in &matching {
                    let mut row = table.rows[*r].clone();
                    for (index, value) in &changes {
                        row[*index] = value.clone();
                    }
                    table.check_row(&row, Some(matching.as_slice()))?;
                    updated.push((*r, row));
                }
                for (r, row) in updated {
                    table.rows[r] = row;
                }
                self.row_count = matching.len() as i64;
            }
            Sql::Delete { table, filter } => {
                db.begin_write();
                let table = db.table_mut(&table)?;
                let matching = table.filter(&filter, &resolve)?;
                let mut index = 0;
                table.rows.retain(|_| {
                    let keep = !matching.contains(&index);
                    index += 1;
                    keep
                });
                self.row_count = matching.len() as i64;
            }
        }
        Ok(())
    }

    fn write_row(&self, row: &[MemValue]) -> DriverResult<()> {
        for (column, record) in &self.rows {
            let value = row.get(usize::from(*column) - 1).ok_or_else(|| {
                state(
                    "SQLFetchScroll",
                    "07009",
                    format!("invalid descriptor index {}", column),
                )
            })?;
            // SAFETY: the binding contract of `bind_col` / `set_desc_field`.
            unsafe { record.buffer.write(value)? };
        }
        Ok(())
    }
}

impl MemTable {
    fn column_index(&self, name: &str) -> DriverResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                state(
                    "SQLExecute",
                    "42S22",
                    format!("invalid column name {:?}", name),
                )
            })
    }

    fn coerce(&self, index: usize, value: MemValue) -> DriverResult<MemValue> {
        let column = &self.columns[index];
        value.coerce(column.sql_type, column.scale, &column.name)
    }

    fn filter(
        &self,
        conditions: &[Condition],
        resolve: &dyn Fn(&Operand) -> MemValue,
    ) -> DriverResult<Vec<usize>> {
        let mut compiled = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match condition {
                Condition::Compare {
                    column,
                    op,
                    operand,
                } => compiled.push((self.column_index(column)?, Some((*op, resolve(operand))), false)),
                Condition::IsNull { column, negated } => {
                    compiled.push((self.column_index(column)?, None, *negated))
                }
            }
        }
        Ok((0..self.rows.len())
            .filter(|r| {
                compiled.iter().all(|(i, compare, negated)| {
                    let value = &self.rows[*r][*i];
                    match compare {
                        None => value.is_null() != *negated,
                        Some((op, operand)) => value.compare(operand).map_or(false, |ord| match op {
                            CmpOp::Eq => ord.is_eq(),
                            CmpOp::Ne => ord.is_ne(),
                            CmpOp::Lt => ord.is_lt(),
                            CmpOp::Le => ord.is_le(),
                            CmpOp::Gt => ord.is_gt(),
                            CmpOp::Ge => ord.is_ge(),
                        }),
                    }
                })
            })
            .collect())
    }

    /// Enforces NOT NULL and primary key uniqueness for `row`. `replacing` lists rows that are
    /// being rewritten and are not compared against.
    fn check_row(&self, row: &[MemValue], replacing: Option<&[usize]>) -> DriverResult<()> {
        for (column, value) in self.columns.iter().zip(row) {
            if !column.nullable && value.is_null() {
                return Err(state(
                    "SQLExecute",
                    "23000",
                    format!("cannot insert NULL into column {}", column.name),
                ));
            }
        }
        let keys: Vec<usize> = self.key_indexes();
        if keys.is_empty() {
            return Ok(());
        }
        let duplicate = self.rows.iter().enumerate().any(|(r, existing)| {
            !replacing.map_or(false, |skip| skip.contains(&r))
                && keys
                    .iter()
                    .all(|k| existing[*k].compare(&row[*k]).map_or(false, |o| o.is_eq()))
        });
        if duplicate {
            return Err(state(
                "SQLExecute",
                "23000",
                format!("violation of primary key constraint on {}", self.info),
            ));
        }
        Ok(())
    }
}

impl Statement for MemStatement {
    unsafe fn bind_col(&mut self, column: u16, target: BindTarget) -> Result<()> {
        if column == 0 {
            return Err(state("SQLBindCol", "07009", "invalid descriptor index 0").into());
        }
        if target.is_null() {
            self.rows.remove(&column);
            return Ok(());
        }
        if !target.c_type.is_supported() {
            return Err(state(
                "SQLBindCol",
                "HY003",
                format!("program type {} out of range", target.c_type),
            )
            .into());
        }
        let mut record = Record::new(target.c_type);
        record.buffer.data = target.value;
        record.buffer.buffer_len = target.buffer_len;
        record.buffer.indicator = target.indicator;
        record.buffer.octet_length = target.indicator;
        if target.c_type == CType::NUMERIC {
            // driver defaults for SQLBindCol
            record.buffer.precision = 38;
            record.precision_set = true;
        }
        self.rows.insert(column, record);
        Ok(())
    }

    fn unbind_cols(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }

    unsafe fn bind_parameter(&mut self, parameter: u16, target: ParameterTarget) -> Result<()> {
        if parameter == 0 {
            return Err(state("SQLBindParameter", "07009", "invalid descriptor index 0").into());
        }
        if target.value.is_null() && target.indicator.is_null() {
            self.parameters.remove(&parameter);
            return Ok(());
        }
        if !target.c_type.is_supported() {
            return Err(state(
                "SQLBindParameter",
                "HY003",
                format!("program type {} out of range", target.c_type),
            )
            .into());
        }
        let mut record = Record::new(target.c_type);
        record.buffer.data = target.value;
        record.buffer.buffer_len = target.buffer_len;
        record.buffer.indicator = target.indicator;
        record.buffer.octet_length = target.indicator;
        record.buffer.precision = target.column_size as i16;
        record.buffer.scale = target.decimal_digits;
        record.precision_set = true;
        self.parameters.insert(parameter, record);
        Ok(())
    }

    fn reset_parameters(&mut self) -> Result<()> {
        self.parameters.clear();
        Ok(())
    }

    unsafe fn set_desc_field(
        &mut self,
        descriptor: Descriptor,
        record: u16,
        field: DescField,
    ) -> Result<()> {
        if record == 0 {
            return Err(state("SQLSetDescField", "07009", "invalid descriptor index 0").into());
        }
        let records = match descriptor {
            Descriptor::Row => &mut self.rows,
            Descriptor::Parameter => &mut self.parameters,
        };
        let entry = records
            .entry(record)
            .or_insert_with(|| Record::new(CType::CHAR));
        match field {
            DescField::Type(c_type) => {
                if !c_type.is_supported() {
                    return Err(state(
                        "SQLSetDescField",
                        "HY021",
                        format!("inconsistent descriptor information: type {}", c_type),
                    )
                    .into());
                }
                // Setting the type resets the remaining fields of the record.
                *entry = Record::new(c_type);
                if let Some(size) = c_type.fixed_size() {
                    entry.buffer.buffer_len = size as isize;
                }
            }
            DescField::Precision(p) => {
                entry.buffer.precision = p;
                entry.precision_set = true;
            }
            DescField::Scale(s) => entry.buffer.scale = s,
            DescField::DataPtr(ptr) => {
                if !ptr.is_null() && entry.buffer.c_type == CType::NUMERIC {
                    let (p, s) = (entry.buffer.precision, entry.buffer.scale);
                    if !entry.precision_set || !(1..=38).contains(&p) || s < 0 || s > p {
                        return Err(state(
                            "SQLSetDescField",
                            "HY021",
                            format!(
                                "inconsistent descriptor information: numeric precision {} scale {}",
                                p, s
                            ),
                        )
                        .into());
                    }
                    entry.buffer.buffer_len = std::mem::size_of::<SqlNumeric>() as isize;
                }
                entry.buffer.data = ptr;
            }
            DescField::IndicatorPtr(ptr) => entry.buffer.indicator = ptr,
            DescField::OctetLengthPtr(ptr) => entry.buffer.octet_length = ptr,
        }
        let cleared = matches!(
            field,
            DescField::DataPtr(_) | DescField::IndicatorPtr(_) | DescField::OctetLengthPtr(_)
        ) && entry.buffer.data.is_null()
            && entry.buffer.indicator.is_null()
            && entry.buffer.octet_length.is_null();
        if cleared {
            records.remove(&record);
        }
        Ok(())
    }

    fn set_cursor_scrollable(&mut self, scrollable: bool) -> Result<()> {
        self.ensure_no_cursor("SQLSetStmtAttr")?;
        self.scrollable = scrollable;
        Ok(())
    }

    fn exec_direct(&mut self, sql: &str) -> Result<()> {
        self.ensure_no_cursor("SQLExecDirect")?;
        let statement = parser::parse(sql)?;
        self.db.borrow().table(statement.table())?;
        self.prepared = None;
        self.run(statement)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<()> {
        self.ensure_no_cursor("SQLPrepare")?;
        let statement = parser::parse(sql)?;
        self.db.borrow().table(statement.table())?;
        self.prepared = Some(statement);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        self.ensure_no_cursor("SQLExecute")?;
        let statement = self
            .prepared
            .clone()
            .ok_or_else(|| state("SQLExecute", "HY010", "function sequence error"))?;
        self.run(statement)?;
        Ok(())
    }

    fn fetch_scroll(&mut self, orientation: FetchOrientation) -> Result<bool> {
        let require_primed = self.db.borrow().require_primed_cursor;
        let cursor = self
            .cursor
            .as_ref()
            .ok_or_else(|| state("SQLFetchScroll", "24000", "invalid cursor state"))?;
        if !self.scrollable && orientation != FetchOrientation::Next {
            return Err(state(
                "SQLFetchScroll",
                "HY106",
                "fetch type out of range: cursor is forward only",
            )
            .into());
        }
        if require_primed && !cursor.fetched && matches!(orientation, FetchOrientation::Relative(_))
        {
            return Err(state(
                "SQLFetchScroll",
                "HY106",
                "fetch type out of range: relative fetch before the first fetch",
            )
            .into());
        }

        let position = cursor.target(orientation);
        if let Position::At(row) = position {
            self.write_row(&cursor.rows[row])?;
        }
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.position = position;
            cursor.fetched = true;
        }
        Ok(matches!(position, Position::At(_)))
    }

    fn close_cursor(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn row_count(&mut self) -> Result<i64> {
        Ok(self.row_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{MemColumn, MemConnection, MemTableDef};
    use crate::types::{SqlType, NULL_DATA};
    use crate::driver::Connection;
    use std::ffi::c_void;

    fn seeded() -> MemConnection {
        let conn = MemConnection::new();
        conn.create_table(
            MemTableDef::new("t")
                .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
                .column(MemColumn::new("name", SqlType::VARCHAR).size(20)),
        )
        .unwrap();
        for (id, name) in [(3, "'c'"), (1, "'a'"), (2, "NULL"), (4, "'d'")] {
            conn.execute(&format!("INSERT INTO t (id, name) VALUES ({}, {})", id, name))
                .unwrap();
        }
        conn
    }

    fn bind_int(stmt: &mut MemStatement, column: u16, value: &mut i32, ind: &mut isize) {
        unsafe {
            stmt.bind_col(
                column,
                BindTarget {
                    c_type: CType::SLONG,
                    value: value as *mut i32 as *mut c_void,
                    buffer_len: 4,
                    indicator: ind,
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn scrolls_in_every_direction() {
        let conn = seeded();
        let mut stmt = MemStatement::new(conn.database());
        stmt.set_cursor_scrollable(true).unwrap();
        let (mut id, mut ind) = (0i32, 0isize);
        bind_int(&mut stmt, 1, &mut id, &mut ind);
        stmt.exec_direct("SELECT id FROM t ORDER BY id").unwrap();

        assert!(stmt.fetch_scroll(FetchOrientation::Absolute(3)).unwrap());
        assert_eq!(id, 3);
        assert!(stmt.fetch_scroll(FetchOrientation::Relative(-1)).unwrap());
        assert_eq!(id, 2);
        assert!(stmt.fetch_scroll(FetchOrientation::Last).unwrap());
        assert_eq!(id, 4);
        assert!(!stmt.fetch_scroll(FetchOrientation::Next).unwrap());
        assert!(stmt.fetch_scroll(FetchOrientation::Prior).unwrap());
        assert_eq!(id, 4);
        assert!(stmt.fetch_scroll(FetchOrientation::Absolute(-4)).unwrap());
        assert_eq!(id, 1);
        assert!(!stmt.fetch_scroll(FetchOrientation::Prior).unwrap());
        assert!(stmt.fetch_scroll(FetchOrientation::First).unwrap());
        assert_eq!((id, ind), (1, 4));
    }

    #[test]
    fn executing_with_an_open_cursor_is_rejected() {
        let conn = seeded();
        let mut stmt = MemStatement::new(conn.database());
        stmt.exec_direct("SELECT id FROM t").unwrap();
        let err = stmt.exec_direct("SELECT id FROM t").unwrap_err();
        assert_eq!(err.sqlstate(), Some("24000"));
        stmt.close_cursor().unwrap();
        stmt.exec_direct("SELECT id FROM t").unwrap();
    }

    #[test]
    fn forward_only_cursors_only_fetch_next() {
        let conn = seeded();
        let mut stmt = MemStatement::new(conn.database());
        stmt.exec_direct("SELECT id FROM t").unwrap();
        let err = stmt.fetch_scroll(FetchOrientation::First).unwrap_err();
        assert_eq!(err.sqlstate(), Some("HY106"));
    }

    #[test]
    fn primed_cursor_mode_rejects_early_relative_fetches() {
        let conn = seeded();
        conn.set_require_primed_cursor(true);
        let mut stmt = MemStatement::new(conn.database());
        stmt.set_cursor_scrollable(true).unwrap();
        stmt.exec_direct("SELECT id FROM t ORDER BY id").unwrap();
        let err = stmt.fetch_scroll(FetchOrientation::Relative(1)).unwrap_err();
        assert_eq!(err.sqlstate(), Some("HY106"));
        assert!(stmt.fetch_scroll(FetchOrientation::Next).unwrap());
        assert!(stmt.fetch_scroll(FetchOrientation::Relative(1)).unwrap());
    }

    #[test]
    fn nulls_need_an_indicator() {
        let conn = seeded();
        let mut stmt = MemStatement::new(conn.database());
        let mut id = 0i32;
        let (mut id_ind, mut name, mut ind) = (0isize, [0u8; 21], 0isize);
        bind_int(&mut stmt, 1, &mut id, &mut id_ind);
        unsafe {
            stmt.bind_col(
                2,
                BindTarget {
                    c_type: CType::CHAR,
                    value: name.as_mut_ptr() as *mut c_void,
                    buffer_len: 21,
                    indicator: &mut ind,
                },
            )
            .unwrap();
        }
        stmt.exec_direct("SELECT id, name FROM t WHERE name IS NULL").unwrap();
        assert!(stmt.fetch_scroll(FetchOrientation::Next).unwrap());
        assert_eq!((id, ind), (2, NULL_DATA));
    }

    #[test]
    fn numeric_data_pointer_requires_precision_first() {
        let conn = seeded();
        let mut stmt = MemStatement::new(conn.database());
        let mut n = SqlNumeric::default();
        let data = &mut n as *mut SqlNumeric as *mut c_void;
        unsafe {
            stmt.set_desc_field(Descriptor::Row, 1, DescField::Type(CType::NUMERIC))
                .unwrap();
            let err = stmt
                .set_desc_field(Descriptor::Row, 1, DescField::DataPtr(data))
                .unwrap_err();
            assert_eq!(err.sqlstate(), Some("HY021"));

            stmt.set_desc_field(Descriptor::Row, 1, DescField::Precision(10))
                .unwrap();
            stmt.set_desc_field(Descriptor::Row, 1, DescField::Scale(2))
                .unwrap();
            stmt.set_desc_field(Descriptor::Row, 1, DescField::DataPtr(data))
                .unwrap();
        }
        stmt.exec_direct("SELECT id FROM t WHERE id = 3").unwrap();
        assert!(stmt.fetch_scroll(FetchOrientation::Next).unwrap());
        assert_eq!(n.unscaled(), Some(300));
        assert_eq!((n.precision, n.scale), (10, 2));
    }

    #[test]
    fn duplicate_keys_and_unknown_tables_fail() {
        let conn = seeded();
        let err = conn
            .execute("INSERT INTO t (id, name) VALUES (1, 'again')")
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("23000"));
        let err = conn.execute("DELETE FROM nowhere").unwrap_err();
        assert_eq!(err.sqlstate(), Some("42S02"));
        assert_eq!(conn.execute("UPDATE t SET name = 'x' WHERE id > 2").unwrap(), 2);
        assert_eq!(conn.execute("DELETE FROM t WHERE name = 'x'").unwrap(), 2);
    }
}
