//! Destination table identity, fixed column layout and SQL rendering.
//!
//! Schema and table names are identifiers, not values: they cannot be bound
//! as statement parameters, so they are allowlisted here and always quoted
//! when composed into SQL. Row values only ever travel as parameters.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use snapflow_utils::error::LoadError;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,126}$").expect("identifier pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

/// Column layout of a snapshot table, in [`snapflow_utils::Record`] field order.
pub const SNAPSHOT_COLUMNS: [Column; 3] = [
    Column { name: "country", ty: ColumnType::Text },
    Column { name: "population", ty: ColumnType::Integer },
    Column { name: "area", ty: ColumnType::Float },
];

/// SQL flavour of a warehouse backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn column_type(self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Dialect::Sqlite, ColumnType::Text) => "TEXT",
            (Dialect::Sqlite, ColumnType::Integer) => "INTEGER",
            (Dialect::Sqlite, ColumnType::Float) => "REAL",
            (Dialect::Postgres, ColumnType::Text) => "VARCHAR(255)",
            (Dialect::Postgres, ColumnType::Integer) => "BIGINT",
            (Dialect::Postgres, ColumnType::Float) => "DOUBLE PRECISION",
        }
    }

    /// Positional parameter marker, 1-based.
    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Postgres => format!("${n}"),
        }
    }
}

/// A validated `(schema, table)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: String,
    table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self, LoadError> {
        let schema = validate(schema.into())?;
        let table = validate(table.into())?;
        Ok(Self { schema, table })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote(&self.schema), quote(&self.table))
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified())
    }

    pub fn create_sql(&self, columns: &[Column], dialect: Dialect) -> String {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {} NOT NULL", quote(c.name), dialect.column_type(c.ty)))
            .collect();
        format!("CREATE TABLE {} ({})", self.qualified(), defs.join(", "))
    }

    pub fn insert_sql(&self, columns: &[Column], dialect: Dialect) -> String {
        let names: Vec<String> = columns.iter().map(|c| quote(c.name)).collect();
        let params: Vec<String> = (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(),
            names.join(", "),
            params.join(", ")
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

pub(crate) fn validate(ident: String) -> Result<String, LoadError> {
    if IDENTIFIER.is_match(&ident) {
        Ok(ident)
    } else {
        Err(LoadError::InvalidIdentifier(ident))
    }
}

// Only ever applied to allowlisted identifiers, which cannot contain quotes.
fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}
