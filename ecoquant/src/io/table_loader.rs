// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Loads uploaded CSV datasets into a numeric feature table.

use std::fs::File;
use tract_onnx::prelude::tract_ndarray::{Array2, Axis};

use crate::error::TableError;

/// Column names treated as ground truth in tabular datasets.
const LABEL_COLUMNS: [&str; 2] = ["target", "label"];

/// Numeric rows of a dataset with their column names.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    values: Array2<f32>,
}

impl FeatureTable {
    /// Column names must match the width of `values`.
    pub fn new(columns: Vec<String>, values: Array2<f32>) -> Self {
        debug_assert_eq!(columns.len(), values.ncols());
        FeatureTable { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    /// Index of a column named `target` or `label`, ignoring case.
    pub fn label_column(&self) -> Option<usize> {
        self.columns.iter().position(|name| {
            LABEL_COLUMNS
                .iter()
                .any(|label| name.trim().eq_ignore_ascii_case(label))
        })
    }

    /// Splits one column off, returning the remaining matrix and that column.
    pub fn split_column(&self, index: usize) -> (Array2<f32>, Vec<f32>) {
        let keep: Vec<usize> = (0..self.n_cols()).filter(|&col| col != index).collect();
        let remaining = self.values.select(Axis(1), &keep);
        let column = self.values.column(index).to_vec();
        (remaining, column)
    }
}

/// Reads a CSV file with a header row. Columns that are not numeric in every row are dropped.
pub fn load_table(path: &str) -> Result<FeatureTable, TableError> {
    let file = File::open(path).map_err(|source| TableError::Io {
        path: path.to_string(),
        source,
    })?;
    let malformed = |source: csv::Error| TableError::Malformed {
        path: path.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let headers = reader.headers().map_err(malformed)?.clone();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)?;

    if records.is_empty() {
        return Err(TableError::NoRows(path.to_string()));
    }

    let numeric: Vec<usize> = (0..headers.len())
        .filter(|&col| {
            records.iter().all(|record| {
                record
                    .get(col)
                    .map(|cell| cell.parse::<f64>().is_ok())
                    .unwrap_or(false)
            })
        })
        .collect();

    if numeric.is_empty() {
        return Err(TableError::NoNumericColumns(path.to_string()));
    }

    let mut values = Array2::<f32>::zeros((records.len(), numeric.len()));
    for (row, record) in records.iter().enumerate() {
        for (out_col, &col) in numeric.iter().enumerate() {
            let cell = record.get(col).unwrap_or_default();
            values[[row, out_col]] = cell.parse::<f64>().unwrap_or_default() as f32;
        }
    }
    let columns = numeric.iter().map(|&col| headers[col].to_string()).collect();

    Ok(FeatureTable::new(columns, values))
}
