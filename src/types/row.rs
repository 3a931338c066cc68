use crate::error::{PgDalError, Result};
use crate::types::cell::{ColumnLocator, FromCell};

/// Driver-agnostic raw response to one executed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQueryResult {
    /// The statement produced a tuple set (possibly with zero rows).
    Rows(ResultSet),
    /// The statement produced no tuple set at all (UPDATE, INSERT, ...).
    Command { rows_affected: u64 },
}

impl RawQueryResult {
    pub fn command(rows_affected: u64) -> Self {
        RawQueryResult::Command { rows_affected }
    }
}

/// One cell of a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    /// The driver received a value it has no text rendering for. Reading
    /// the cell fails; the rest of the row is unaffected.
    Unreadable(String),
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => Cell::Text(text),
            None => Cell::Null,
        }
    }
}

/// The tabular answer to one query.
///
/// Every cell is kept in its textual form. The grid is rectangular: each
/// row has exactly `column_count()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    /// Creates a result set from textual cells, `None` marking SQL NULL.
    /// Ragged rows are rejected.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Cell::from).collect())
            .collect();
        Self::from_cells(columns, rows)
    }

    /// Creates a result set from cells, rejecting ragged rows.
    pub fn from_cells(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(PgDalError::QueryFailed(format!(
                "row {} has {} cells, expected {}",
                i,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// A tuple set with the given columns and no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Returns the column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolves a column name to its index.
    ///
    /// Unquoted names are folded to lower case before matching; a
    /// double-quoted name such as `"backendId"` is matched exactly, with
    /// `""` inside the quotes standing for one `"`. The first matching
    /// column wins.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        let wanted = normalize_column_name(name);
        self.columns.iter().position(|c| *c == wanted)
    }

    /// Returns the raw cell, `None` when out of bounds.
    pub fn cell(&self, row: usize, column: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Extracts a typed value from the given row and column.
    ///
    /// SQL NULL decodes to the type's zero value. Unknown column names and
    /// out-of-bounds indices are `OutOfRange` errors.
    pub fn get<'a, T: FromCell>(
        &self,
        row: usize,
        column: impl Into<ColumnLocator<'a>>,
    ) -> Result<T> {
        let column = match column.into() {
            ColumnLocator::Index(i) => i,
            ColumnLocator::Name(name) => self.column_index(name).ok_or_else(|| {
                PgDalError::OutOfRange(format!("column '{}' not found", name))
            })?,
        };

        let cell = self.cell(row, column).ok_or_else(|| {
            PgDalError::OutOfRange(format!(
                "row {} or column {} out of range",
                row, column
            ))
        })?;

        match cell {
            Cell::Null => Ok(T::zero()),
            Cell::Text(text) => T::from_text(text).ok_or_else(|| PgDalError::InvalidValue {
                column,
                value: text.clone(),
                target: T::TYPE_NAME,
            }),
            Cell::Unreadable(reason) => Err(PgDalError::UnreadableCell {
                column,
                reason: reason.clone(),
            }),
        }
    }
}

fn normalize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_quotes = false;
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                in_quotes = !in_quotes;
            }
        } else if in_quotes {
            out.push(c);
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}
