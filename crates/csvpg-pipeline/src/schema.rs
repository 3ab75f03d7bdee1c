//! Destination table schemas
//!
//! The three tables loaded by the pipeline are declared statically here. Both
//! the `CREATE TABLE IF NOT EXISTS` directive and the positional insert
//! template are derived from a [`TableSchema`], so the SQL text only ever
//! contains these static identifiers. Row values are always bound as
//! parameters.

use serde::Serialize;
use std::fmt;

/// Column type as declared for the destination store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    /// Stored as `VARCHAR(255)`
    String,
    Date,
    Decimal { precision: u8, scale: u8 },
}

impl ColumnType {
    /// Type as written in DDL
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::String => "VARCHAR(255)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
        }
    }

    /// Cast applied to a text parameter so the store performs the coercion.
    ///
    /// Strings get no cast: an explicit cast to `VARCHAR(255)` would truncate
    /// over-long values instead of rejecting them.
    fn placeholder_cast(&self) -> Option<String> {
        match self {
            ColumnType::String => None,
            other => Some(other.sql()),
        }
    }

    /// Whether an `information_schema.columns.data_type` value is compatible
    pub fn accepts_data_type(&self, data_type: &str) -> bool {
        let data_type = data_type.to_ascii_lowercase();
        match self {
            ColumnType::Integer => matches!(data_type.as_str(), "integer" | "bigint" | "smallint"),
            ColumnType::String => matches!(data_type.as_str(), "character varying" | "text"),
            ColumnType::Date => data_type == "date",
            ColumnType::Decimal { .. } => data_type == "numeric",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub primary_key: bool,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
        }
    }

    pub const fn primary_key(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: true,
        }
    }
}

const MONEY: ColumnType = ColumnType::Decimal {
    precision: 10,
    scale: 2,
};

/// Fixed column list of one destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
}

pub const CUSTOMERS: TableSchema = TableSchema {
    name: "customers",
    columns: &[
        Column::primary_key("customer_id", ColumnType::Integer),
        Column::new("full_name", ColumnType::String),
        Column::new("address", ColumnType::String),
        Column::new("city", ColumnType::String),
        Column::new("zipcode", ColumnType::Integer),
    ],
};

pub const ORDERS: TableSchema = TableSchema {
    name: "orders",
    columns: &[
        Column::primary_key("order_id", ColumnType::Integer),
        Column::new("customer_id", ColumnType::Integer),
        Column::new("order_date", ColumnType::Date),
        Column::new("product_name", ColumnType::String),
        Column::new("quantity", ColumnType::Integer),
        Column::new("unit_price", MONEY),
        Column::new("total_price", MONEY),
    ],
};

pub const ORDER_ITEMS: TableSchema = TableSchema {
    name: "orderitems",
    columns: &[
        Column::primary_key("order_item_id", ColumnType::Integer),
        Column::new("order_id", ColumnType::Integer),
        Column::new("item_name", ColumnType::String),
        Column::new("item_quantity", ColumnType::Integer),
        Column::new("item_unit_price", MONEY),
        Column::new("item_total_price", MONEY),
    ],
};

/// Every table the pipeline loads
pub const ALL_TABLES: [TableSchema; 3] = [CUSTOMERS, ORDERS, ORDER_ITEMS];

impl TableSchema {
    /// Look up one of the built-in tables
    pub fn by_name(name: &str) -> Option<TableSchema> {
        ALL_TABLES
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// `CREATE TABLE IF NOT EXISTS` directive for this table
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("    {} {}", c.name, c.ty.sql());
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect::<Vec<_>>()
            .join(",\n");

        format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", self.name, columns)
    }

    pub fn insert_template(&self) -> InsertTemplate {
        InsertTemplate::for_schema(self)
    }

    /// Reject identifiers that would need quoting in SQL
    pub fn validate(&self) -> Result<(), String> {
        if !is_plain_identifier(self.name) {
            return Err(format!("invalid table name '{}'", self.name));
        }
        if self.columns.is_empty() {
            return Err(format!("table '{}' has no columns", self.name));
        }
        if let Some(col) = self.columns.iter().find(|c| !is_plain_identifier(c.name)) {
            return Err(format!("invalid column name '{}' in '{}'", col.name, self.name));
        }
        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(format!("table '{}' declares more than one primary key", self.name));
        }
        Ok(())
    }

    /// Check a CSV header against the column list (same names, same order)
    pub fn matches_header(&self, header: &[String]) -> bool {
        header.len() == self.columns.len()
            && header
                .iter()
                .zip(self.column_names())
                .all(|(h, c)| h.eq_ignore_ascii_case(c))
    }
}

fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Parameterized insert statement with one positional placeholder per column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTemplate {
    table: &'static str,
    sql: String,
    placeholders: usize,
}

impl InsertTemplate {
    pub fn for_schema(schema: &TableSchema) -> Self {
        let columns = schema.column_names().collect::<Vec<_>>().join(", ");
        let values = schema
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| match c.ty.placeholder_cast() {
                Some(cast) => format!("${}::{}", idx + 1, cast),
                None => format!("${}", idx + 1),
            })
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            table: schema.name,
            sql: format!("INSERT INTO {} ({}) VALUES ({})", schema.name, columns, values),
            placeholders: schema.columns.len(),
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn placeholders(&self) -> usize {
        self.placeholders
    }
}
