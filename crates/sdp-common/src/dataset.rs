//! Tabular dataset
//!
//! The in-memory columnar table every pipeline stage hands to the next one.
//! A dataset is an ordered list of named, uniformly typed columns of equal
//! length. It is assembled append-only (through [`DatasetBuilder`] or
//! [`TabularDataset::from_columns`]) and is read-only afterwards.
//!
//! Invariants enforced at construction:
//! - every column has the same number of values
//! - column names are unique
//! - every non-null value matches its column's [`ColumnType`]

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, SdpError};

/// Semantic type shared by every value of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Type of a non-null value; `None` for [`Value::Null`]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(ColumnType::Text),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of integer and float cells
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A named, uniformly typed column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    name: String,
    data_type: ColumnType,
    values: Vec<Value>,
}

impl Column {
    /// Create a column, rejecting values that do not match `data_type`
    pub fn new(
        name: impl Into<String>,
        data_type: ColumnType,
        values: Vec<Value>,
    ) -> Result<Self> {
        let name = name.into();
        for (row, value) in values.iter().enumerate() {
            check_type(&name, data_type, value, row)?;
        }
        Ok(Self {
            name,
            data_type,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ColumnType {
        self.data_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn check_type(column: &str, expected: ColumnType, value: &Value, row: usize) -> Result<()> {
    match value.column_type() {
        None => Ok(()),
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(SdpError::TypeMismatch {
            column: column.to_string(),
            expected,
            actual,
            row,
        }),
    }
}

/// In-memory columnar table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularDataset {
    columns: Vec<Column>,
}

impl TabularDataset {
    /// Dataset with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a dataset from columns, validating length and name invariants
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SdpError::DuplicateColumn(column.name.clone()));
            }
        }

        if let Some(first) = columns.first() {
            let expected = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != expected) {
                return Err(SdpError::ColumnLength {
                    column: bad.name.clone(),
                    expected,
                    actual: bad.len(),
                });
            }
        }

        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the dataset holds no rows (it may still declare columns)
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Cells of one row in column order
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.num_rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.num_rows()).map(move |i| self.columns.iter().map(|c| &c.values[i]).collect())
    }

    /// Build a dataset from a JSON payload.
    ///
    /// Accepts records orientation (`[{"a": 1, "b": "x"}, ...]`) or columns
    /// orientation (`{"a": [1, 2], "b": ["x", "y"]}`). Integer and float cells
    /// in one column promote to float. Scalars, nested values and columns
    /// mixing other types are rejected with [`SdpError::NotTabular`].
    pub fn from_json(payload: &serde_json::Value) -> Result<Self> {
        match payload {
            serde_json::Value::Array(records) => Self::from_json_records(records),
            serde_json::Value::Object(columns) => {
                let mut out = Vec::with_capacity(columns.len());
                for (name, cells) in columns {
                    let cells = cells.as_array().ok_or_else(|| {
                        SdpError::not_tabular(format!("column '{}' is not an array", name))
                    })?;
                    out.push(json_column(name, cells.iter().collect())?);
                }
                Self::from_columns(out)
            },
            other => Err(SdpError::not_tabular(format!(
                "expected an array of records or an object of columns, got {}",
                json_kind(other)
            ))),
        }
    }

    fn from_json_records(records: &[serde_json::Value]) -> Result<Self> {
        let mut names: Vec<&str> = Vec::new();
        let mut objects = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                SdpError::not_tabular(format!("record {} is a {}", i, json_kind(record)))
            })?;
            for key in object.keys() {
                if !names.contains(&key.as_str()) {
                    names.push(key.as_str());
                }
            }
            objects.push(object);
        }

        let columns = names
            .iter()
            .map(|name| {
                let cells = objects
                    .iter()
                    .map(|o| o.get(*name).unwrap_or(&serde_json::Value::Null))
                    .collect();
                json_column(name, cells)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_columns(columns)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn json_column(name: &str, cells: Vec<&serde_json::Value>) -> Result<Column> {
    let mut data_type: Option<ColumnType> = None;

    for cell in &cells {
        let cell_type = match cell {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(_) => ColumnType::Boolean,
            serde_json::Value::String(_) => ColumnType::Text,
            serde_json::Value::Number(n) if n.as_i64().is_some() => ColumnType::Integer,
            serde_json::Value::Number(_) => ColumnType::Float,
            nested => {
                return Err(SdpError::not_tabular(format!(
                    "column '{}' holds a nested {}",
                    name,
                    json_kind(nested)
                )))
            },
        };

        data_type = match (data_type, cell_type) {
            (None, t) => Some(t),
            (Some(a), b) if a == b => Some(a),
            (Some(ColumnType::Integer), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Integer) => Some(ColumnType::Float),
            (Some(a), b) => {
                return Err(SdpError::not_tabular(format!(
                    "column '{}' mixes {} and {} values",
                    name, a, b
                )))
            },
        };
    }

    let data_type = data_type.unwrap_or(ColumnType::Text);
    let values = cells
        .into_iter()
        .map(|cell| match cell {
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Number(n) => match (data_type, n.as_i64()) {
                (ColumnType::Integer, Some(i)) => Value::Integer(i),
                _ => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            _ => Value::Null,
        })
        .collect();

    Column::new(name, data_type, values)
}

/// Append-only dataset construction
///
/// Columns are declared up front; rows are then pushed one at a time.
/// [`DatasetBuilder::snapshot`] materialises the rows accumulated so far
/// without consuming the builder.
#[derive(Debug, Clone, Default)]
pub struct DatasetBuilder {
    schema: Vec<(String, ColumnType)>,
    values: Vec<Vec<Value>>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the next column
    pub fn column(mut self, name: impl Into<String>, data_type: ColumnType) -> Self {
        self.schema.push((name.into(), data_type));
        self.values.push(Vec::new());
        self
    }

    /// Append one row; values must follow column order
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(SdpError::RowArity {
                expected: self.schema.len(),
                actual: row.len(),
            });
        }

        let index = self.num_rows();
        for ((name, data_type), value) in self.schema.iter().zip(&row) {
            check_type(name, *data_type, value, index)?;
        }

        for (column, value) in self.values.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.values.first().map(Vec::len).unwrap_or(0)
    }

    /// Dataset of the rows pushed so far
    pub fn snapshot(&self) -> Result<TabularDataset> {
        self.clone().build()
    }

    pub fn build(self) -> Result<TabularDataset> {
        let columns = self
            .schema
            .into_iter()
            .zip(self.values)
            .map(|((name, data_type), values)| Column {
                name,
                data_type,
                values,
            })
            .collect();
        TabularDataset::from_columns(columns)
    }
}
