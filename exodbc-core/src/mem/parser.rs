//! The SQL dialect understood by the in-memory driver.
//!
//! ```text
//! SELECT { * | COUNT(*) | col [, col]* } FROM table [WHERE pred] [ORDER BY col [ASC|DESC] [, ...]]
//! INSERT INTO table (col [, col]*) VALUES (operand [, operand]*)
//! UPDATE table SET col = operand [, col = operand]* [WHERE pred]
//! DELETE FROM table [WHERE pred]
//!
//! pred    := cond [AND cond]*
//! cond    := col { = | <> | != | < | <= | > | >= } operand | col IS [NOT] NULL
//! operand := ? | number | 'text' | NULL
//! ```
//!
//! Parameters are numbered from 1 in order of appearance.

use std::iter::Peekable;
use std::str::Chars;

use super::value::{parse_decimal, state, MemValue};
use crate::error::DriverError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(String),
    Text(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// 1-based parameter number.
    Param(u16),
    Literal(MemValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Compare {
        column: String,
        op: CmpOp,
        operand: Operand,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Count,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sql {
    Select {
        projection: Projection,
        table: String,
        filter: Vec<Condition>,
        order_by: Vec<OrderBy>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Operand)>,
        filter: Vec<Condition>,
    },
    Delete {
        table: String,
        filter: Vec<Condition>,
    },
}

impl Sql {
    pub fn table(&self) -> &str {
        match self {
            Sql::Select { table, .. }
            | Sql::Insert { table, .. }
            | Sql::Update { table, .. }
            | Sql::Delete { table, .. } => table,
        }
    }

    pub fn parameter_count(&self) -> u16 {
        fn count<'a>(operands: impl Iterator<Item = &'a Operand>) -> u16 {
            operands.filter(|o| matches!(o, Operand::Param(_))).count() as u16
        }
        fn in_filter(filter: &[Condition]) -> impl Iterator<Item = &Operand> {
            filter.iter().filter_map(|c| match c {
                Condition::Compare { operand, .. } => Some(operand),
                Condition::IsNull { .. } => None,
            })
        }
        match self {
            Sql::Select { filter, .. } | Sql::Delete { filter, .. } => count(in_filter(filter)),
            Sql::Insert { values, .. } => count(values.iter()),
            Sql::Update {
                assignments,
                filter,
                ..
            } => count(assignments.iter().map(|(_, o)| o).chain(in_filter(filter))),
        }
    }

    pub fn opens_cursor(&self) -> bool {
        matches!(self, Sql::Select { .. })
    }
}

fn syntax_error(message: impl Into<String>) -> DriverError {
    state("SQLPrepare", "42000", format!("syntax error: {}", message.into()))
}

fn tokenize(sql: &str) -> Result<Vec<Token>, DriverError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<Chars<'_>> = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '"' || c == '[' => {
                tokens.push(Token::Word(read_word(&mut chars)?));
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(number));
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                        None => return Err(syntax_error("unterminated string literal")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            _ => {
                chars.next();
                let next = chars.peek().copied();
                let symbol = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', Some('>')) => "<>",
                    ('!', Some('=')) => "!=",
                    (',', _) => ",",
                    ('(', _) => "(",
                    (')', _) => ")",
                    ('*', _) => "*",
                    ('=', _) => "=",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    ('?', _) => "?",
                    ('-', _) => "-",
                    (';', _) => ";",
                    _ => return Err(syntax_error(format!("unexpected character {:?}", c))),
                };
                if symbol.len() == 2 {
                    chars.next();
                }
                tokens.push(Token::Symbol(symbol));
            }
        }
    }
    Ok(tokens)
}

/// Reads a possibly qualified, possibly quoted identifier such as `exodbc."IntTypes"`.
fn read_word(chars: &mut Peekable<Chars<'_>>) -> Result<String, DriverError> {
    let mut word = String::new();
    loop {
        match chars.peek().copied() {
            Some(open @ ('"' | '[')) => {
                let close = if open == '"' { '"' } else { ']' };
                chars.next();
                loop {
                    match chars.next() {
                        Some(c) if c == close => break,
                        Some(c) => word.push(c),
                        None => return Err(syntax_error("unterminated quoted identifier")),
                    }
                }
            }
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                word.push(c);
                chars.next();
            }
            _ => break,
        }
        if chars.peek() == Some(&'.') {
            word.push('.');
            chars.next();
        } else if !matches!(chars.peek(), Some(c) if c.is_ascii_alphanumeric() || *c == '_') {
            break;
        }
    }
    Ok(word)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: u16,
}

pub(crate) fn parse(sql: &str) -> Result<Sql, DriverError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
        params: 0,
    };
    let statement = parser.statement()?;
    parser.eat_symbol(";");
    match parser.peek() {
        None => Ok(statement),
        Some(t) => Err(syntax_error(format!("unexpected {:?}", t))),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.is_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), DriverError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax_error(format!("expected {}", keyword)))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), DriverError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(syntax_error(format!("expected '{}'", symbol)))
        }
    }

    fn identifier(&mut self) -> Result<String, DriverError> {
        match self.next() {
            Some(Token::Word(w)) if !is_reserved(&w) => Ok(w),
            other => Err(syntax_error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn identifier_list(&mut self) -> Result<Vec<String>, DriverError> {
        let mut list = vec![self.identifier()?];
        while self.eat_symbol(",") {
            list.push(self.identifier()?);
        }
        Ok(list)
    }

    fn statement(&mut self) -> Result<Sql, DriverError> {
        if self.eat_keyword("SELECT") {
            self.select()
        } else if self.eat_keyword("INSERT") {
            self.insert()
        } else if self.eat_keyword("UPDATE") {
            self.update()
        } else if self.eat_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.identifier()?;
            let filter = self.where_clause()?;
            Ok(Sql::Delete { table, filter })
        } else {
            Err(syntax_error("expected SELECT, INSERT, UPDATE or DELETE"))
        }
    }

    fn select(&mut self) -> Result<Sql, DriverError> {
        let projection = if self.eat_symbol("*") {
            Projection::All
        } else if self.eat_keyword("COUNT") {
            self.expect_symbol("(")?;
            self.expect_symbol("*")?;
            self.expect_symbol(")")?;
            Projection::Count
        } else {
            Projection::Columns(self.identifier_list()?)
        };
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;
        let filter = self.where_clause()?;
        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let column = self.identifier()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderBy { column, descending });
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }
        Ok(Sql::Select {
            projection,
            table,
            filter,
            order_by,
        })
    }

    fn insert(&mut self) -> Result<Sql, DriverError> {
        self.expect_keyword("INTO")?;
        let table = self.identifier()?;
        self.expect_symbol("(")?;
        let columns = self.identifier_list()?;
        self.expect_symbol(")")?;
        self.expect_keyword("VALUES")?;
        self.expect_symbol("(")?;
        let mut values = vec![self.operand()?];
        while self.eat_symbol(",") {
            values.push(self.operand()?);
        }
        self.expect_symbol(")")?;
        if values.len() != columns.len() {
            return Err(state(
                "SQLPrepare",
                "21S01",
                "insert value list does not match column list",
            ));
        }
        Ok(Sql::Insert {
            table,
            columns,
            values,
        })
    }

    fn update(&mut self) -> Result<Sql, DriverError> {
        let table = self.identifier()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect_symbol("=")?;
            assignments.push((column, self.operand()?));
            if !self.eat_symbol(",") {
                break;
            }
        }
        let filter = self.where_clause()?;
        Ok(Sql::Update {
            table,
            assignments,
            filter,
        })
    }

    fn where_clause(&mut self) -> Result<Vec<Condition>, DriverError> {
        let mut conditions = Vec::new();
        if !self.eat_keyword("WHERE") {
            return Ok(conditions);
        }
        loop {
            conditions.push(self.condition()?);
            if !self.eat_keyword("AND") {
                break;
            }
        }
        Ok(conditions)
    }

    fn condition(&mut self) -> Result<Condition, DriverError> {
        let column = self.identifier()?;
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Condition::IsNull { column, negated });
        }
        let op = match self.next() {
            Some(Token::Symbol("=")) => CmpOp::Eq,
            Some(Token::Symbol("<>")) | Some(Token::Symbol("!=")) => CmpOp::Ne,
            Some(Token::Symbol("<")) => CmpOp::Lt,
            Some(Token::Symbol("<=")) => CmpOp::Le,
            Some(Token::Symbol(">")) => CmpOp::Gt,
            Some(Token::Symbol(">=")) => CmpOp::Ge,
            other => {
                return Err(syntax_error(format!(
                    "expected comparison operator, found {:?}",
                    other
                )))
            }
        };
        Ok(Condition::Compare {
            column,
            op,
            operand: self.operand()?,
        })
    }

    fn operand(&mut self) -> Result<Operand, DriverError> {
        let negative = self.eat_symbol("-");
        match self.next() {
            Some(Token::Symbol("?")) if !negative => {
                self.params += 1;
                Ok(Operand::Param(self.params))
            }
            Some(Token::Number(n)) => {
                let text = if negative { format!("-{}", n) } else { n };
                number(&text).map(Operand::Literal)
            }
            Some(Token::Text(s)) if !negative => Ok(Operand::Literal(MemValue::Text(s))),
            Some(Token::Word(w)) if !negative && w.eq_ignore_ascii_case("NULL") => {
                Ok(Operand::Literal(MemValue::Null))
            }
            other => Err(syntax_error(format!("expected value, found {:?}", other))),
        }
    }
}

fn number(text: &str) -> Result<MemValue, DriverError> {
    if !text.contains('.') {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(MemValue::Int(v));
        }
    }
    parse_decimal(text)
        .map(|(unscaled, scale)| MemValue::Decimal { unscaled, scale })
        .ok_or_else(|| syntax_error(format!("invalid number {}", text)))
}

fn is_reserved(word: &str) -> bool {
    const RESERVED: &[&str] = &[
        "SELECT", "FROM", "WHERE", "AND", "ORDER", "BY", "INSERT", "INTO", "VALUES", "UPDATE",
        "SET", "DELETE", "IS", "NOT", "NULL", "ASC", "DESC",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_statements_the_table_engine_builds() {
        let sql = parse("INSERT INTO exodbc.IntTypes (id, a, b, c) VALUES (?, ?, ?, ?)").unwrap();
        assert_eq!(sql.table(), "exodbc.IntTypes");
        assert_eq!(sql.parameter_count(), 4);

        let sql = parse("UPDATE t SET a = ?, b = ? WHERE id = ? AND k = ?").unwrap();
        let Sql::Update { assignments, filter, .. } = sql else {
            panic!("not an update");
        };
        assert_eq!(assignments[1], ("b".to_owned(), Operand::Param(2)));
        assert!(matches!(
            &filter[1],
            Condition::Compare { column, operand: Operand::Param(4), .. } if column == "k"
        ));

        let sql = parse("SELECT COUNT(*) FROM t WHERE a IS NOT NULL").unwrap();
        assert!(matches!(sql, Sql::Select { projection: Projection::Count, .. }));
    }

    #[test]
    fn literals_and_ordering() {
        let sql =
            parse("SELECT id, name FROM [dbo].[t] WHERE id >= -5 AND name <> 'it''s' ORDER BY id DESC, name")
                .unwrap();
        let Sql::Select {
            table,
            filter,
            order_by,
            ..
        } = sql
        else {
            panic!("not a select");
        };
        assert_eq!(table, "dbo.t");
        assert_eq!(
            filter[0],
            Condition::Compare {
                column: "id".into(),
                op: CmpOp::Ge,
                operand: Operand::Literal(MemValue::Int(-5)),
            }
        );
        assert_eq!(
            filter[1],
            Condition::Compare {
                column: "name".into(),
                op: CmpOp::Ne,
                operand: Operand::Literal(MemValue::Text("it's".into())),
            }
        );
        assert_eq!(
            order_by,
            vec![
                OrderBy {
                    column: "id".into(),
                    descending: true
                },
                OrderBy {
                    column: "name".into(),
                    descending: false
                }
            ]
        );
    }

    #[test]
    fn garbage_is_a_syntax_error() {
        for sql in [
            "bogus syntax",
            "SELECT COUNT(*) FROM t WHERE bogus syntax",
            "SELECT FROM t",
            "DELETE FROM t WHERE a = 'open",
            "INSERT INTO t (a, b) VALUES (?)",
        ] {
            let err = parse(sql).unwrap_err();
            assert!(
                matches!(err.sqlstate(), Some("42000") | Some("21S01")),
                "{}: {}",
                sql,
                err
            );
        }
    }
}
