//! The `Frame` columnar table type.

use crate::error::FrameError;
use crate::scalar::{infer_dtype, Scalar};
use crate::Result;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use trellis_protocol::DataType;

/// A named, typed column of scalar values.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub dtype: DataType,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        let dtype = infer_dtype(&values);
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn with_dtype(name: impl Into<String>, dtype: DataType, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn distinct_count(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        for v in &self.values {
            seen.insert(v.key());
        }
        seen.len()
    }

    /// Re-infer the dtype after value edits.
    pub fn refresh_dtype(&mut self) {
        self.dtype = infer_dtype(&self.values);
    }
}

/// A columnar table. Value-semantic: operations return new frames.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<Column>,
    height: usize,
}

impl Frame {
    /// An empty frame with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from columns; all columns must share one length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let height = columns.first().map(|c| c.len()).unwrap_or(0);
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if col.len() != height {
                return Err(FrameError::LengthMismatch {
                    column: col.name.clone(),
                    expected: height,
                    actual: col.len(),
                });
            }
            if !seen.insert(col.name.clone()) {
                return Err(FrameError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self { columns, height })
    }

    /// Build a schema-only frame: named columns, zero rows.
    pub fn with_schema(names: &[String]) -> Self {
        let columns = names
            .iter()
            .map(|n| Column::with_dtype(n.clone(), DataType::String, Vec::new()))
            .collect();
        Self { columns, height: 0 }
    }

    /// Build from JSON objects: one row per object, columns are the union of
    /// keys in first-seen order, missing keys become null.
    pub fn from_json_objects(objects: &[&JsonMap<String, JsonValue>]) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for obj in objects {
            for key in obj.keys() {
                if !index.contains_key(key) {
                    index.insert(key.clone(), order.len());
                    order.push(key.clone());
                }
            }
        }

        let mut columns: Vec<Vec<Scalar>> = vec![Vec::with_capacity(objects.len()); order.len()];
        for obj in objects {
            for (i, key) in order.iter().enumerate() {
                let value = obj
                    .get(key)
                    .map(Scalar::from_json)
                    .unwrap_or(Scalar::Null);
                columns[i].push(value);
            }
        }

        let columns = order
            .into_iter()
            .zip(columns)
            .map(|(name, values)| Column::new(name, values))
            .collect();
        // Union construction guarantees equal lengths and unique names.
        Self {
            height: objects.len(),
            columns,
        }
    }

    /// Build a single-row frame from one JSON object.
    pub fn from_single_object(obj: &JsonMap<String, JsonValue>) -> Self {
        Self::from_json_objects(&[obj])
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    fn column_required(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    /// One row rendered as (name, value) pairs in column order.
    pub fn row(&self, idx: usize) -> Vec<(&str, &Scalar)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), &c.values[idx]))
            .collect()
    }

    /// Append a fully-populated column.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.has_column(&column.name) {
            return Err(FrameError::DuplicateColumn(column.name));
        }
        if !self.columns.is_empty() && column.len() != self.height {
            return Err(FrameError::LengthMismatch {
                actual: column.len(),
                column: column.name,
                expected: self.height,
            });
        }
        if self.columns.is_empty() {
            self.height = column.len();
        }
        self.columns.push(column);
        Ok(())
    }

    /// Add a column filled with one repeated value (like a `lit` broadcast).
    /// Existing columns with the same name are left untouched.
    pub fn with_scalar_column(mut self, name: &str, value: Scalar) -> Self {
        if self.has_column(name) {
            return self;
        }
        let values = vec![value; self.height];
        let _ = self.add_column(Column::new(name, values));
        self
    }

    /// Replace a column's values via a per-value mapping, re-inferring dtype.
    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Scalar) -> Scalar) -> Result<()> {
        let col = self
            .column_mut(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        let mapped: Vec<Scalar> = col.values.iter().map(|v| f(v)).collect();
        col.values = mapped;
        col.refresh_dtype();
        Ok(())
    }

    /// Keep the named columns, preserving the requested order.
    pub fn select(&self, names: &[String]) -> Result<Frame> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push(self.column_required(name)?.clone());
        }
        Frame::from_columns(columns)
    }

    /// Keep columns whose names are present; silently skip missing ones.
    pub fn select_existing(&self, names: &[String]) -> Frame {
        let columns: Vec<Column> = names
            .iter()
            .filter_map(|n| self.column(n).cloned())
            .collect();
        Frame {
            height: if columns.is_empty() { 0 } else { self.height },
            columns,
        }
    }

    /// Drop the named columns (missing names are ignored).
    pub fn drop_columns(&self, names: &[String]) -> Frame {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.name))
            .cloned()
            .collect();
        Frame {
            height: if columns.is_empty() { 0 } else { self.height },
            columns,
        }
    }

    /// Rename columns per the map; only present columns are renamed.
    pub fn rename(&self, renames: &HashMap<String, String>) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let name = renames.get(&c.name).cloned().unwrap_or_else(|| c.name.clone());
                Column::with_dtype(name, c.dtype, c.values.clone())
            })
            .collect();
        Frame {
            columns,
            height: self.height,
        }
    }

    /// Keep the rows whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values: Vec<Scalar> = c
                    .values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v.clone())
                    .collect();
                Column::with_dtype(c.name.clone(), c.dtype, values)
            })
            .collect::<Vec<_>>();
        let height = columns.first().map(|c: &Column| c.len()).unwrap_or(0);
        Frame { columns, height }
    }

    /// Keep rows at the given indices, in the given order.
    pub fn take(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values: Vec<Scalar> =
                    indices.iter().map(|&i| c.values[i].clone()).collect();
                Column::with_dtype(c.name.clone(), c.dtype, values)
            })
            .collect();
        Frame {
            columns,
            height: indices.len(),
        }
    }

    pub fn head(&self, n: usize) -> Frame {
        self.slice(0, n)
    }

    pub fn slice(&self, offset: usize, len: usize) -> Frame {
        let end = (offset + len).min(self.height);
        let start = offset.min(end);
        let columns = self
            .columns
            .iter()
            .map(|c| Column::with_dtype(c.name.clone(), c.dtype, c.values[start..end].to_vec()))
            .collect();
        Frame {
            columns,
            height: end - start,
        }
    }

    /// Diagonal concatenation: union of columns in first-seen order, missing
    /// cells null-padded. Row order follows the input frame order.
    pub fn concat_diagonal(frames: &[Frame]) -> Frame {
        let non_empty: Vec<&Frame> = frames.iter().filter(|f| f.width() > 0).collect();
        if non_empty.is_empty() {
            return Frame::empty();
        }

        let mut order: Vec<String> = Vec::new();
        for frame in &non_empty {
            for col in &frame.columns {
                if !order.contains(&col.name) {
                    order.push(col.name.clone());
                }
            }
        }

        let total: usize = non_empty.iter().map(|f| f.height).sum();
        let mut out: Vec<Column> = order
            .iter()
            .map(|n| Column::with_dtype(n.clone(), DataType::Null, Vec::with_capacity(total)))
            .collect();

        for frame in &non_empty {
            for (i, name) in order.iter().enumerate() {
                match frame.column(name) {
                    Some(col) => out[i].values.extend(col.values.iter().cloned()),
                    None => out[i]
                        .values
                        .extend(std::iter::repeat(Scalar::Null).take(frame.height)),
                }
            }
        }

        for col in &mut out {
            col.refresh_dtype();
        }
        Frame {
            columns: out,
            height: total,
        }
    }

    /// Render rows as JSON objects (column order preserved by using an
    /// ordered map per row).
    pub fn to_json_rows(&self) -> Vec<JsonMap<String, JsonValue>> {
        (0..self.height)
            .map(|i| {
                let mut obj = JsonMap::new();
                for col in &self.columns {
                    obj.insert(col.name.clone(), col.values[i].to_json());
                }
                obj
            })
            .collect()
    }
}
