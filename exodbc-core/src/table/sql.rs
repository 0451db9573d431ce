//! SQL text for the statements a table runs. Values always travel as `?` parameters or as
//! caller supplied clauses; nothing here quotes data.

fn join<'a>(columns: impl IntoIterator<Item = &'a str>, separator: &str, suffix: &str) -> String {
    columns
        .into_iter()
        .map(|c| format!("{}{}", c, suffix))
        .collect::<Vec<_>>()
        .join(separator)
}

fn push_clause(sql: &mut String, keyword: &str, clause: &str) {
    let clause = clause.trim();
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(keyword);
        sql.push(' ');
        sql.push_str(clause);
    }
}

pub(crate) fn select<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a str>,
    where_clause: &str,
    order_by: &str,
) -> String {
    let mut sql = format!("SELECT {} FROM {}", join(columns, ", ", ""), table);
    push_clause(&mut sql, "WHERE", where_clause);
    push_clause(&mut sql, "ORDER BY", order_by);
    sql
}

pub(crate) fn count(table: &str, where_clause: &str) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {}", table);
    push_clause(&mut sql, "WHERE", where_clause);
    sql
}

pub(crate) fn insert<'a>(table: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
    let columns: Vec<&str> = columns.into_iter().collect();
    let markers = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        markers
    )
}

/// `col1 = ?, col2 = ?`
pub(crate) fn assignments<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    join(columns, ", ", " = ?")
}

/// `pk1 = ? AND pk2 = ?`
pub(crate) fn key_predicate<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    join(columns, " AND ", " = ?")
}

pub(crate) fn update(table: &str, assignments: &str, where_clause: &str) -> String {
    let mut sql = format!("UPDATE {} SET {}", table, assignments);
    push_clause(&mut sql, "WHERE", where_clause);
    sql
}

pub(crate) fn delete(table: &str, where_clause: &str) -> String {
    let mut sql = format!("DELETE FROM {}", table);
    push_clause(&mut sql, "WHERE", where_clause);
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_statement_text() {
        assert_eq!(
            select("s.t", ["a", "b"], "", " a DESC "),
            "SELECT a, b FROM s.t ORDER BY a DESC"
        );
        assert_eq!(count("t", "a > 3"), "SELECT COUNT(*) FROM t WHERE a > 3");
        assert_eq!(count("t", "  "), "SELECT COUNT(*) FROM t");
        assert_eq!(
            insert("t", ["id", "a", "b"]),
            "INSERT INTO t (id, a, b) VALUES (?, ?, ?)"
        );
        assert_eq!(
            update("t", &assignments(["a", "b"]), &key_predicate(["id", "k"])),
            "UPDATE t SET a = ?, b = ? WHERE id = ? AND k = ?"
        );
        assert_eq!(delete("t", &key_predicate(["id"])), "DELETE FROM t WHERE id = ?");
    }
}
