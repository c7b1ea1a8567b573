//! A tiny statement interpreter backing the mock driver.
//!
//! It understands just enough SQL to observe commit and rollback:
//!
//! - `SELECT 1 FROM RDB$DATABASE`
//! - `INSERT INTO <table>(<columns>) VALUES (?, ...)`
//! - `SELECT COUNT(*) FROM <table>`
//! - `SELECT * FROM <table>`
//! - `DELETE FROM <table>`
//!
//! Identifiers are case-insensitive. Tables are created by their first
//! insert. Anything else yields an empty result set.

use std::collections::HashMap;

use fb_driver::{DriverError, Value};

/// Rows produced by one statement, before column keys are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    /// Column names as the server reports them (uppercase).
    pub columns: Vec<String>,
    /// Row values.
    pub rows: Vec<Vec<Value>>,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `SELECT 1 FROM RDB$DATABASE`.
    SelectOne,
    /// `INSERT INTO table(columns) VALUES (...)`.
    Insert {
        /// Target table.
        table: String,
        /// Column list.
        columns: Vec<String>,
    },
    /// `SELECT COUNT(*) FROM table`.
    Count {
        /// Source table.
        table: String,
    },
    /// `SELECT * FROM table`.
    SelectAll {
        /// Source table.
        table: String,
    },
    /// `DELETE FROM table`.
    Delete {
        /// Target table.
        table: String,
    },
    /// Anything else.
    Other,
}

impl Statement {
    /// Parse a statement.
    #[must_use]
    pub fn parse(sql: &str) -> Self {
        let normalized = sql
            .trim()
            .trim_end_matches(';')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();

        if normalized == "SELECT 1 FROM RDB$DATABASE" {
            return Self::SelectOne;
        }
        if let Some(rest) = normalized.strip_prefix("INSERT INTO ") {
            return parse_insert(rest).unwrap_or(Self::Other);
        }
        if let Some(table) = normalized.strip_prefix("SELECT COUNT(*) FROM ") {
            return Self::Count {
                table: table.trim().to_owned(),
            };
        }
        if let Some(table) = normalized.strip_prefix("SELECT * FROM ") {
            return Self::SelectAll {
                table: table.trim().to_owned(),
            };
        }
        if let Some(table) = normalized.strip_prefix("DELETE FROM ") {
            return Self::Delete {
                table: table.trim().to_owned(),
            };
        }
        Self::Other
    }

    /// Check if the statement modifies data.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert { .. } | Self::Delete { .. })
    }
}

fn parse_insert(rest: &str) -> Option<Statement> {
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let table = rest[..open].trim();
    if table.is_empty() || !rest[close + 1..].trim_start().starts_with("VALUES") {
        return None;
    }
    let columns = rest[open + 1..close]
        .split(',')
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>();
    Some(Statement::Insert {
        table: table.to_owned(),
        columns,
    })
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// In-memory tables.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    /// Run a parsed statement.
    pub fn apply(&mut self, statement: &Statement, params: &[Value]) -> Result<Output, DriverError> {
        match statement {
            Statement::SelectOne => Ok(Output {
                columns: vec!["CONSTANT".to_owned()],
                rows: vec![vec![Value::Int(1)]],
            }),
            Statement::Insert { table, columns } => {
                if columns.len() != params.len() {
                    return Err(DriverError::Query(format!(
                        "expected {} parameters, got {}",
                        columns.len(),
                        params.len()
                    )));
                }
                let entry = self.tables.entry(table.clone()).or_default();
                if entry.columns.is_empty() {
                    entry.columns.clone_from(columns);
                } else if &entry.columns != columns {
                    return Err(DriverError::Query(format!(
                        "column list does not match table {table}"
                    )));
                }
                entry.rows.push(params.to_vec());
                Ok(Output::default())
            }
            Statement::Count { table } => {
                let count = self.tables.get(table).map_or(0, |t| t.rows.len());
                Ok(Output {
                    columns: vec!["COUNT".to_owned()],
                    rows: vec![vec![Value::Int(i64::try_from(count).unwrap_or(i64::MAX))]],
                })
            }
            Statement::SelectAll { table } => {
                let table = self
                    .tables
                    .get(table)
                    .ok_or_else(|| DriverError::Query(format!("Table unknown: {table}")))?;
                Ok(Output {
                    columns: table.columns.clone(),
                    rows: table.rows.clone(),
                })
            }
            Statement::Delete { table } => {
                if let Some(table) = self.tables.get_mut(table) {
                    table.rows.clear();
                }
                Ok(Output::default())
            }
            Statement::Other => Ok(Output::default()),
        }
    }

    /// Rows currently stored in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.tables
            .get(&table.to_ascii_uppercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statements() {
        assert_eq!(Statement::parse("select 1 from rdb$database"), Statement::SelectOne);
        assert_eq!(
            Statement::parse("INSERT INTO T(x) VALUES (?)"),
            Statement::Insert {
                table: "T".into(),
                columns: vec!["X".into()]
            }
        );
        assert_eq!(
            Statement::parse("SELECT  COUNT(*)  FROM t;"),
            Statement::Count { table: "T".into() }
        );
        assert_eq!(Statement::parse("UPDATE T SET x = 1"), Statement::Other);
        assert!(Statement::parse("DELETE FROM T").is_write());
    }

    #[test]
    fn test_insert_and_count() {
        let mut tables = Tables::default();
        let insert = Statement::parse("INSERT INTO T(x) VALUES (?)");
        tables.apply(&insert, &[Value::Int(5)]).unwrap();
        tables.apply(&insert, &[Value::Int(6)]).unwrap();

        let out = tables
            .apply(&Statement::parse("SELECT COUNT(*) FROM T"), &[])
            .unwrap();
        assert_eq!(out.rows, vec![vec![Value::Int(2)]]);
        assert_eq!(tables.rows("t").len(), 2);
    }

    #[test]
    fn test_insert_parameter_mismatch() {
        let mut tables = Tables::default();
        let insert = Statement::parse("INSERT INTO T(x, y) VALUES (?, ?)");
        assert!(tables.apply(&insert, &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_select_unknown_table() {
        let mut tables = Tables::default();
        assert!(tables.apply(&Statement::parse("SELECT * FROM NOPE"), &[]).is_err());
    }
}
