// Copyright (c) 2024-2025 LakeQuery Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Result reshaping and cost statistics
//!
//! The service returns results column-described: the first row carries the column
//! names and every later row carries one optional string per column. [`to_records`]
//! turns that matrix into header-keyed records, and [`compute_statistics`] derives
//! the scan size, cost and timing summary attached to responses.

use crate::service::{ExecutionStatistics, RawResultMatrix, RawRow};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

pub const BYTES_IN_MB: u64 = 1_048_576;
/// USD per scanned megabyte ($5 per TB)
pub const COST_PER_MB: f64 = 0.000004768;
/// Scans at or below this size are billed as this size
pub const MINIMUM_BILLED_MB: u64 = 10;
/// Charge for a query that scanned `MINIMUM_BILLED_MB` or less
pub const MINIMUM_QUERY_COST: f64 = COST_PER_MB * MINIMUM_BILLED_MB as f64;

/// Ordered column names taken from the header row
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    columns: Vec<String>,
    /// (name, position of its last occurrence), in first-occurrence order
    keys: Vec<(String, usize)>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<String>) -> Self {
        let mut keys: Vec<(String, usize)> = Vec::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            // A repeated name keeps its first slot but takes the later value
            match keys.iter_mut().find(|(key, _)| key == name) {
                Some(entry) => entry.1 = index,
                None => keys.push((name.clone(), index)),
            }
        }
        Self { columns, keys }
    }

    /// Column names from a header row; a null header cell becomes `_col<index>`
    pub fn from_header(header: &RawRow) -> Self {
        let columns = (0..header.len())
            .map(|index| match header.cell(index) {
                Some(name) => name.to_string(),
                None => format!("_col{}", index),
            })
            .collect();
        Self::new(columns)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position whose value a record exposes under `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.keys
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, index)| *index)
    }

    fn keys(&self) -> &[(String, usize)] {
        &self.keys
    }
}

/// One data row keyed by column name
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<ColumnSchema>,
    values: Vec<Option<String>>,
}

impl Record {
    /// Read `row` through `schema`: missing cells are null, extra cells dropped
    pub fn from_row(schema: Arc<ColumnSchema>, row: &RawRow) -> Self {
        let values = (0..schema.len())
            .map(|index| row.cell(index).map(str::to_string))
            .collect();
        Self { schema, values }
    }

    /// Value of column `name`; `None` if the column is unknown or the cell is null
    pub fn get(&self, name: &str) -> Option<&str> {
        self.schema
            .position(name)
            .and_then(|index| self.values[index].as_deref())
    }

    /// True if the record has a column called `name`, null or not
    pub fn contains_column(&self, name: &str) -> bool {
        self.schema.position(name).is_some()
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    /// Values in header order
    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// (column, value) pairs as exposed by [`Record::get`], in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> + '_ {
        self.schema
            .keys()
            .iter()
            .map(move |(name, index)| (name.as_str(), self.values[*index].as_deref()))
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.schema.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Turn a header-described matrix into records, one per data row
///
/// An empty matrix yields no records. Row 0 is only ever used as the header.
pub fn to_records(matrix: &RawResultMatrix) -> Vec<Record> {
    let Some((header, rows)) = matrix.split_first() else {
        return Vec::new();
    };

    let schema = Arc::new(ColumnSchema::from_header(header));
    rows.iter()
        .map(|row| Record::from_row(Arc::clone(&schema), row))
        .collect()
}

/// Scan size, cost and timing summary of one query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryStatistics {
    pub data_scanned_in_mb: u64,
    pub query_cost_in_usd: f64,
    pub engine_execution_time_in_millis: Option<u64>,
    pub count: usize,
}

/// Derive the statistics block from execution metadata
pub fn compute_statistics(stats: &ExecutionStatistics, item_count: usize) -> QueryStatistics {
    let data_scanned_in_mb = scanned_megabytes(stats.bytes_scanned);
    QueryStatistics {
        data_scanned_in_mb,
        query_cost_in_usd: query_cost(data_scanned_in_mb),
        engine_execution_time_in_millis: stats.engine_execution_time_ms,
        count: item_count,
    }
}

/// Bytes to whole megabytes, rounding half up
pub fn scanned_megabytes(bytes: u64) -> u64 {
    bytes.saturating_add(BYTES_IN_MB / 2) / BYTES_IN_MB
}

/// Billed cost of a scan; anything up to the minimum is charged as the minimum
pub fn query_cost(scanned_mb: u64) -> f64 {
    if scanned_mb > MINIMUM_BILLED_MB {
        scanned_mb as f64 * COST_PER_MB
    } else {
        MINIMUM_QUERY_COST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Datum;
    use serde_json::json;

    fn matrix(rows: &[&[Option<&str>]]) -> RawResultMatrix {
        rows.iter()
            .map(|row| {
                RawRow::new(
                    row.iter()
                        .map(|cell| match cell {
                            Some(value) => Datum::value(*value),
                            None => Datum::null(),
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_matrix_yields_no_records() {
        assert!(to_records(&Vec::new()).is_empty());
    }

    #[test]
    fn test_header_only_yields_no_records() {
        let m = matrix(&[&[Some("id"), Some("name")]]);
        assert!(to_records(&m).is_empty());
    }

    #[test]
    fn test_every_data_row_is_kept_in_order() {
        let m = matrix(&[
            &[Some("id"), Some("name")],
            &[Some("1"), Some("a")],
            &[Some("2"), Some("b")],
            &[Some("3"), Some("c")],
        ]);
        let records = to_records(&m);
        assert_eq!(records.len(), 3);
        for (record, (id, name)) in records.iter().zip([("1", "a"), ("2", "b"), ("3", "c")]) {
            assert_eq!(record.len(), 2);
            assert_eq!(record.get("id"), Some(id));
            assert_eq!(record.get("name"), Some(name));
        }
    }

    #[test]
    fn test_null_cells_become_null_values() {
        let m = matrix(&[&[Some("id"), Some("email")], &[Some("7"), None]]);
        let records = to_records(&m);
        assert!(records[0].contains_column("email"));
        assert_eq!(records[0].get("email"), None);
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([{"id": "7", "email": null}])
        );
    }

    #[test]
    fn test_row_width_mismatch() {
        let m = matrix(&[
            &[Some("a"), Some("b"), Some("c")],
            &[Some("1")],
            &[Some("1"), Some("2"), Some("3"), Some("4")],
        ]);
        let records = to_records(&m);
        assert_eq!(records[0].values(), &[Some("1".to_string()), None, None]);
        assert_eq!(records[1].len(), 3);
        assert_eq!(records[1].get("c"), Some("3"));
    }

    #[test]
    fn test_null_header_cell_gets_positional_name() {
        let m = matrix(&[&[Some("id"), None], &[Some("1"), Some("x")]]);
        let records = to_records(&m);
        assert_eq!(records[0].get("_col1"), Some("x"));
    }

    #[test]
    fn test_duplicate_column_takes_last_value() {
        let m = matrix(&[
            &[Some("k"), Some("v"), Some("k")],
            &[Some("first"), Some("x"), Some("second")],
        ]);
        let records = to_records(&m);
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[0].get("k"), Some("second"));
        let keys: Vec<&str> = records[0].iter().map(|(name, _)| name).collect();
        assert_eq!(keys, vec!["k", "v"]);
    }

    #[test]
    fn test_serialization_follows_header_order() {
        let m = matrix(&[&[Some("z"), Some("a")], &[Some("1"), Some("2")]]);
        let records = to_records(&m);
        assert_eq!(serde_json::to_string(&records[0]).unwrap(), r#"{"z":"1","a":"2"}"#);
    }

    #[test]
    fn test_scanned_megabytes_rounds_to_nearest() {
        assert_eq!(scanned_megabytes(0), 0);
        assert_eq!(scanned_megabytes(5 * BYTES_IN_MB), 5);
        assert_eq!(scanned_megabytes(BYTES_IN_MB / 2 - 1), 0);
        assert_eq!(scanned_megabytes(BYTES_IN_MB / 2), 1);
        assert_eq!(scanned_megabytes(10 * BYTES_IN_MB + BYTES_IN_MB / 2), 11);
    }

    #[test]
    fn test_cost_minimum_applies_up_to_ten_megabytes() {
        for mb in [0, 1, 5, 10] {
            assert_eq!(query_cost(mb), MINIMUM_QUERY_COST);
        }
        assert!((MINIMUM_QUERY_COST - 0.00004768).abs() < 1e-12);
    }

    #[test]
    fn test_cost_scales_linearly_above_minimum() {
        assert!((query_cost(11) - 11.0 * COST_PER_MB).abs() < 1e-12);
        assert!((query_cost(1024) - 2.0 * query_cost(512)).abs() < 1e-12);
    }

    #[test]
    fn test_compute_statistics() {
        let stats = ExecutionStatistics {
            bytes_scanned: 5_242_880,
            engine_execution_time_ms: Some(1234),
        };
        let summary = compute_statistics(&stats, 1);
        assert_eq!(summary.data_scanned_in_mb, 5);
        assert_eq!(summary.query_cost_in_usd, MINIMUM_QUERY_COST);
        assert_eq!(summary.engine_execution_time_in_millis, Some(1234));
        assert_eq!(summary.count, 1);
    }
}
