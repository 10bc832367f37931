//! Parameterized search over the `test` table.
//!
//! Columns come from a closed set, so they are spliced into the SQL text;
//! every value is bound as a parameter.

use rusqlite::types::Value;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    File,
    Serial,
    Uid,
    Id,
    Zerotime,
    Instrument,
    Flavour,
    Name,
    Elapsed,
    NSamples,
    Comment,
    Verify,
}

impl Column {
    pub const ALL: [Column; 12] = [
        Column::File,
        Column::Serial,
        Column::Uid,
        Column::Id,
        Column::Zerotime,
        Column::Instrument,
        Column::Flavour,
        Column::Name,
        Column::Elapsed,
        Column::NSamples,
        Column::Comment,
        Column::Verify,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::File => "file",
            Column::Serial => "serial",
            Column::Uid => "uid",
            Column::Id => "id",
            Column::Zerotime => "zerotime",
            Column::Instrument => "instrument",
            Column::Flavour => "flavour",
            Column::Name => "name",
            Column::Elapsed => "elapsed",
            Column::NSamples => "nSamples",
            Column::Comment => "comment",
            Column::Verify => "verify",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| StoreError::InvalidQuery(format!("unknown column '{}'", name)))
    }
}

/// How conditions are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    /// Substring conditions, `column LIKE %value%`.
    pub conditions: Vec<(Column, String)>,
    pub combine: Combine,
    pub order_by: Column,
    pub descending: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            combine: Combine::And,
            order_by: Column::Zerotime,
            descending: true,
            limit: 100,
            offset: 0,
        }
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: Column, substring: &str) -> Self {
        self.conditions.push((column, substring.to_string()));
        self
    }

    pub fn any(mut self) -> Self {
        self.combine = Combine::Or;
        self
    }

    pub fn order_by(mut self, column: Column, descending: bool) -> Self {
        self.order_by = column;
        self.descending = descending;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit <= 0 {
            return Err(StoreError::InvalidQuery(format!("limit must be positive, got {}", self.limit)));
        }
        if self.offset < 0 {
            return Err(StoreError::InvalidQuery(format!("offset must not be negative, got {}", self.offset)));
        }
        Ok(())
    }
}

/// Columns selected for a `TestRecord`, in row order.
pub(crate) fn select_columns() -> String {
    Column::ALL
        .iter()
        .map(Column::name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn like_pattern(substring: &str) -> String {
    let mut out = String::with_capacity(substring.len() + 2);
    out.push('%');
    for c in substring.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// SQL text and bound values for `params`.
pub fn build(params: &QueryParams) -> Result<(String, Vec<Value>)> {
    params.validate()?;
    let mut sql = format!("SELECT {} FROM test", select_columns());
    let mut values = Vec::with_capacity(params.conditions.len() + 2);

    if !params.conditions.is_empty() {
        let joiner = match params.combine {
            Combine::And => " AND ",
            Combine::Or => " OR ",
        };
        let clauses: Vec<String> = params
            .conditions
            .iter()
            .map(|(column, substring)| {
                values.push(Value::Text(like_pattern(substring)));
                format!("{} LIKE ?{} ESCAPE '\\'", column.name(), values.len())
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(joiner));
    }

    sql.push_str(&format!(
        " ORDER BY {} {}",
        params.order_by.name(),
        if params.descending { "DESC" } else { "ASC" }
    ));
    values.push(Value::Integer(params.limit));
    sql.push_str(&format!(" LIMIT ?{}", values.len()));
    values.push(Value::Integer(params.offset));
    sql.push_str(&format!(" OFFSET ?{}", values.len()));
    Ok((sql, values))
}
