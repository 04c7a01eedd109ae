//! Relational operations over frames: join, unpivot, group-by aggregation,
//! column statistics, and seeded sampling.

use crate::error::FrameError;
use crate::frame::{Column, Frame};
use crate::scalar::Scalar;
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use trellis_protocol::DataType;

/// Relational join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    #[default]
    Left,
    Right,
    Inner,
    Outer,
}

impl JoinHow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Inner => "inner",
            Self::Outer => "outer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "inner" => Some(Self::Inner),
            "outer" | "full" => Some(Self::Outer),
            _ => None,
        }
    }
}

/// Aggregation function for group-by outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Mean,
    Sum,
    Min,
    Max,
    Count,
    Std,
    Median,
    First,
    Last,
}

impl AggFunc {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" => Some(Self::Mean),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "std" => Some(Self::Std),
            "median" => Some(Self::Median),
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Std => "std",
            Self::Median => "median",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Output column name. `first`/`last` keep the source name; everything
    /// else gets a `{col}_{func}` suffix.
    pub fn output_name(&self, col: &str) -> String {
        match self {
            Self::First | Self::Last => col.to_string(),
            other => format!("{}_{}", col, other.as_str()),
        }
    }
}

fn row_key(frame: &Frame, keys: &[String], idx: usize) -> Option<String> {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let col = frame.column(key)?;
        parts.push(col.values[idx].key());
    }
    Some(parts.join("\u{1f}"))
}

impl Frame {
    /// Hash join on equal-named key columns.
    ///
    /// Output carries the left columns followed by the right columns minus
    /// the keys. Unmatched sides are null-padded per `how`. Right rows that
    /// match multiple left rows multiply, preserving left-row order.
    pub fn join(&self, right: &Frame, on: &[String], how: JoinHow) -> Result<Frame> {
        for key in on {
            if !self.has_column(key) {
                return Err(FrameError::ColumnNotFound(key.clone()));
            }
            if !right.has_column(key) {
                return Err(FrameError::ColumnNotFound(key.clone()));
            }
        }
        if on.is_empty() {
            return Err(FrameError::InvalidOperation(
                "join requires at least one key column".to_string(),
            ));
        }

        if let JoinHow::Right = how {
            // A right join is a left join with the operand order flipped and
            // the output columns re-ordered to keep left-first layout.
            let flipped = right.join(self, on, JoinHow::Left)?;
            let mut names: Vec<String> = self
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();
            for col in right.columns() {
                if !names.contains(&col.name) {
                    names.push(col.name.clone());
                }
            }
            return flipped.select(&names);
        }

        // Index right rows by key.
        let mut right_index: HashMap<String, Vec<usize>> = HashMap::new();
        for i in 0..right.height() {
            let key = row_key(right, on, i).expect("keys verified above");
            right_index.entry(key).or_default().push(i);
        }

        let right_extra: Vec<&Column> = right
            .columns()
            .iter()
            .filter(|c| !on.contains(&c.name))
            .collect();

        let mut left_rows: Vec<usize> = Vec::new();
        let mut right_rows: Vec<Option<usize>> = Vec::new();
        let mut matched_right: Vec<bool> = vec![false; right.height()];

        for i in 0..self.height() {
            let key = row_key(self, on, i).expect("keys verified above");
            match right_index.get(&key) {
                Some(matches) => {
                    for &j in matches {
                        left_rows.push(i);
                        right_rows.push(Some(j));
                        matched_right[j] = true;
                    }
                }
                None => {
                    if matches!(how, JoinHow::Left | JoinHow::Outer) {
                        left_rows.push(i);
                        right_rows.push(None);
                    }
                }
            }
        }

        // Outer join appends unmatched right rows after all left rows.
        let mut tail_right: Vec<usize> = Vec::new();
        if matches!(how, JoinHow::Outer) {
            for (j, matched) in matched_right.iter().enumerate() {
                if !matched {
                    tail_right.push(j);
                }
            }
        }

        let out_height = left_rows.len() + tail_right.len();
        let mut columns: Vec<Column> = Vec::with_capacity(self.width() + right_extra.len());

        for col in self.columns() {
            let mut values: Vec<Scalar> = Vec::with_capacity(out_height);
            for &i in &left_rows {
                values.push(col.values[i].clone());
            }
            for &j in &tail_right {
                // Key columns take the right side's value; others are null.
                if on.contains(&col.name) {
                    let rcol = right.column(&col.name).expect("keys verified above");
                    values.push(rcol.values[j].clone());
                } else {
                    values.push(Scalar::Null);
                }
            }
            columns.push(Column::new(col.name.clone(), values));
        }

        for col in &right_extra {
            let mut values: Vec<Scalar> = Vec::with_capacity(out_height);
            for r in &right_rows {
                match r {
                    Some(j) => values.push(col.values[*j].clone()),
                    None => values.push(Scalar::Null),
                }
            }
            for &j in &tail_right {
                values.push(col.values[j].clone());
            }
            columns.push(Column::new(col.name.clone(), values));
        }

        Frame::from_columns(columns)
    }

    /// Wide-to-long unpivot. `id_vars` are carried through; each `value_vars`
    /// column contributes one output row per input row.
    pub fn unpivot(
        &self,
        id_vars: &[String],
        value_vars: &[String],
        var_name: &str,
        value_name: &str,
    ) -> Result<Frame> {
        if value_vars.is_empty() {
            return Err(FrameError::InvalidOperation(
                "unpivot requires at least one value column".to_string(),
            ));
        }
        for name in id_vars.iter().chain(value_vars.iter()) {
            if !self.has_column(name) {
                return Err(FrameError::ColumnNotFound(name.clone()));
            }
        }

        let out_height = self.height() * value_vars.len();
        let mut columns: Vec<Column> = Vec::with_capacity(id_vars.len() + 2);

        for id in id_vars {
            let src = self.column(id).expect("checked above");
            let mut values = Vec::with_capacity(out_height);
            for _ in value_vars {
                values.extend(src.values.iter().cloned());
            }
            columns.push(Column::with_dtype(id.clone(), src.dtype, values));
        }

        let mut var_values = Vec::with_capacity(out_height);
        let mut val_values = Vec::with_capacity(out_height);
        for var in value_vars {
            let src = self.column(var).expect("checked above");
            var_values.extend(std::iter::repeat(Scalar::Str(var.clone())).take(self.height()));
            val_values.extend(src.values.iter().cloned());
        }
        columns.push(Column::with_dtype(
            var_name.to_string(),
            DataType::String,
            var_values,
        ));
        columns.push(Column::new(value_name.to_string(), val_values));

        Frame::from_columns(columns)
    }

    /// Group rows by the key columns and compute one output column per
    /// `(column, function)` pair. Groups appear in first-seen row order.
    pub fn group_by_agg(
        &self,
        group_by: &[String],
        aggs: &[(String, AggFunc)],
    ) -> Result<Frame> {
        for key in group_by {
            if !self.has_column(key) {
                return Err(FrameError::ColumnNotFound(key.clone()));
            }
        }
        if group_by.is_empty() {
            return Err(FrameError::InvalidOperation(
                "group_by requires at least one key column".to_string(),
            ));
        }

        let mut group_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for i in 0..self.height() {
            let key = row_key(self, group_by, i).expect("keys verified above");
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(i);
        }

        let mut columns: Vec<Column> = Vec::new();
        for key_col in group_by {
            let src = self.column(key_col).expect("checked above");
            let values: Vec<Scalar> = group_order
                .iter()
                .map(|k| src.values[groups[k][0]].clone())
                .collect();
            columns.push(Column::with_dtype(key_col.clone(), src.dtype, values));
        }

        for (col_name, func) in aggs {
            let src = match self.column(col_name) {
                Some(c) => c,
                None => continue,
            };
            let values: Vec<Scalar> = group_order
                .iter()
                .map(|k| aggregate(&src.values, &groups[k], *func))
                .collect();
            columns.push(Column::new(func.output_name(col_name), values));
        }

        Frame::from_columns(columns)
    }

    /// Mean of a numeric column, ignoring nulls and non-numerics.
    pub fn column_mean(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        let nums: Vec<f64> = col.values.iter().filter_map(|v| v.as_f64()).collect();
        if nums.is_empty() {
            return None;
        }
        Some(nums.iter().sum::<f64>() / nums.len() as f64)
    }

    /// Sample standard deviation (ddof = 1) of a numeric column.
    pub fn column_std(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        let nums: Vec<f64> = col.values.iter().filter_map(|v| v.as_f64()).collect();
        if nums.len() < 2 {
            return None;
        }
        let mean = nums.iter().sum::<f64>() / nums.len() as f64;
        let var = nums.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (nums.len() - 1) as f64;
        Some(var.sqrt())
    }

    /// Linear-interpolated quantile (q in [0, 1]) over numeric values.
    pub fn column_quantile(&self, name: &str, q: f64) -> Option<f64> {
        let col = self.column(name)?;
        let mut nums: Vec<f64> = col.values.iter().filter_map(|v| v.as_f64()).collect();
        if nums.is_empty() {
            return None;
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let pos = q.clamp(0.0, 1.0) * (nums.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        if lo == hi {
            return Some(nums[lo]);
        }
        let frac = pos - lo as f64;
        Some(nums[lo] * (1.0 - frac) + nums[hi] * frac)
    }

    /// Sample `n` rows without replacement using a seeded generator. The
    /// selected rows keep their source order, so equal seeds yield identical
    /// frames.
    pub fn sample_n(&self, n: usize, seed: u64) -> Frame {
        if n >= self.height() {
            return self.clone();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> =
            rand::seq::index::sample(&mut rng, self.height(), n).into_vec();
        indices.sort_unstable();
        self.take(&indices)
    }
}

fn aggregate(values: &[Scalar], indices: &[usize], func: AggFunc) -> Scalar {
    match func {
        AggFunc::Count => Scalar::Int(
            indices
                .iter()
                .filter(|&&i| !values[i].is_null())
                .count() as i64,
        ),
        AggFunc::First => indices
            .first()
            .map(|&i| values[i].clone())
            .unwrap_or(Scalar::Null),
        AggFunc::Last => indices
            .last()
            .map(|&i| values[i].clone())
            .unwrap_or(Scalar::Null),
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<&Scalar> = None;
            for &i in indices {
                let v = &values[i];
                if v.is_null() {
                    continue;
                }
                best = match best {
                    None => Some(v),
                    Some(b) => match v.compare(b) {
                        Some(std::cmp::Ordering::Less) if func == AggFunc::Min => Some(v),
                        Some(std::cmp::Ordering::Greater) if func == AggFunc::Max => Some(v),
                        _ => Some(b),
                    },
                };
            }
            best.cloned().unwrap_or(Scalar::Null)
        }
        AggFunc::Mean | AggFunc::Sum | AggFunc::Std | AggFunc::Median => {
            let nums: Vec<f64> = indices
                .iter()
                .filter_map(|&i| values[i].as_f64())
                .collect();
            if nums.is_empty() {
                return Scalar::Null;
            }
            match func {
                AggFunc::Sum => Scalar::Float(nums.iter().sum()),
                AggFunc::Mean => Scalar::Float(nums.iter().sum::<f64>() / nums.len() as f64),
                AggFunc::Std => {
                    if nums.len() < 2 {
                        return Scalar::Null;
                    }
                    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
                    let var = nums.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        / (nums.len() - 1) as f64;
                    Scalar::Float(var.sqrt())
                }
                AggFunc::Median => {
                    let mut sorted = nums;
                    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let mid = sorted.len() / 2;
                    if sorted.len() % 2 == 1 {
                        Scalar::Float(sorted[mid])
                    } else {
                        Scalar::Float((sorted[mid - 1] + sorted[mid]) / 2.0)
                    }
                }
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(cols: Vec<(&str, Vec<Scalar>)>) -> Frame {
        Frame::from_columns(
            cols.into_iter()
                .map(|(n, v)| Column::new(n, v))
                .collect(),
        )
        .unwrap()
    }

    fn ints(vals: &[i64]) -> Vec<Scalar> {
        vals.iter().map(|&v| Scalar::Int(v)).collect()
    }

    fn strs(vals: &[&str]) -> Vec<Scalar> {
        vals.iter().map(|&v| Scalar::Str(v.to_string())).collect()
    }

    #[test]
    fn test_left_join_null_pads_missing() {
        let left = frame(vec![("k", ints(&[1, 2, 3])), ("a", strs(&["x", "y", "z"]))]);
        let right = frame(vec![("k", ints(&[1, 3])), ("b", strs(&["p", "q"]))]);
        let out = left.join(&right, &["k".to_string()], JoinHow::Left).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(out.column("b").unwrap().values[1], Scalar::Null);
        assert_eq!(out.column("b").unwrap().values[2], Scalar::Str("q".into()));
    }

    #[test]
    fn test_inner_join_drops_unmatched() {
        let left = frame(vec![("k", ints(&[1, 2]))]);
        let right = frame(vec![("k", ints(&[2, 9])), ("b", ints(&[20, 90]))]);
        let out = left
            .join(&right, &["k".to_string()], JoinHow::Inner)
            .unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(out.column("b").unwrap().values[0], Scalar::Int(20));
    }

    #[test]
    fn test_outer_join_appends_right_tail() {
        let left = frame(vec![("k", ints(&[1])), ("a", strs(&["x"]))]);
        let right = frame(vec![("k", ints(&[2])), ("b", strs(&["y"]))]);
        let out = left
            .join(&right, &["k".to_string()], JoinHow::Outer)
            .unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(out.column("k").unwrap().values[1], Scalar::Int(2));
        assert_eq!(out.column("a").unwrap().values[1], Scalar::Null);
        assert_eq!(out.column("b").unwrap().values[1], Scalar::Str("y".into()));
    }

    #[test]
    fn test_right_join_keeps_left_first_layout() {
        let left = frame(vec![("k", ints(&[1])), ("a", strs(&["x"]))]);
        let right = frame(vec![("k", ints(&[1, 2])), ("b", strs(&["p", "q"]))]);
        let out = left
            .join(&right, &["k".to_string()], JoinHow::Right)
            .unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(out.column_names(), vec!["k", "a", "b"]);
    }

    #[test]
    fn test_unpivot_shape_and_order() {
        let f = frame(vec![
            ("site", strs(&["s1", "s2"])),
            ("cd", ints(&[10, 20])),
            ("depth", ints(&[5, 6])),
        ]);
        let out = f
            .unpivot(
                &["site".to_string()],
                &["cd".to_string(), "depth".to_string()],
                "variable",
                "value",
            )
            .unwrap();
        assert_eq!(out.height(), 4);
        assert_eq!(
            out.column("variable").unwrap().values[0],
            Scalar::Str("cd".into())
        );
        assert_eq!(out.column("value").unwrap().values[3], Scalar::Int(6));
    }

    #[test]
    fn test_group_by_agg_names_and_order() {
        let f = frame(vec![
            ("g", strs(&["a", "b", "a"])),
            ("v", ints(&[1, 10, 3])),
        ]);
        let out = f
            .group_by_agg(
                &["g".to_string()],
                &[
                    ("v".to_string(), AggFunc::Mean),
                    ("v".to_string(), AggFunc::First),
                ],
            )
            .unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(out.column_names(), vec!["g", "v_mean", "v"]);
        // First-seen group order: a then b
        assert_eq!(out.column("g").unwrap().values[0], Scalar::Str("a".into()));
        assert_eq!(out.column("v_mean").unwrap().values[0], Scalar::Float(2.0));
        assert_eq!(out.column("v").unwrap().values[1], Scalar::Int(10));
    }

    #[test]
    fn test_quantile_interpolation() {
        let f = frame(vec![("v", ints(&[1, 2, 3, 4]))]);
        assert_eq!(f.column_quantile("v", 0.5), Some(2.5));
        assert_eq!(f.column_quantile("v", 0.0), Some(1.0));
        assert_eq!(f.column_quantile("v", 1.0), Some(4.0));
    }

    #[test]
    fn test_sample_deterministic_for_seed() {
        let f = frame(vec![("v", ints(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]))]);
        let a = f.sample_n(4, 42);
        let b = f.sample_n(4, 42);
        assert_eq!(a.height(), 4);
        for i in 0..4 {
            assert_eq!(
                a.column("v").unwrap().values[i],
                b.column("v").unwrap().values[i]
            );
        }
    }

    #[test]
    fn test_std_and_mean() {
        let f = frame(vec![("v", ints(&[2, 4, 4, 4, 5, 5, 7, 9]))]);
        assert_eq!(f.column_mean("v"), Some(5.0));
        let std = f.column_std("v").unwrap();
        assert!((std - 2.138_089_935).abs() < 1e-6);
    }
}
