//! Manifest tables
//!
//! A small column-oriented view over CSV manifests: ordered column names and
//! string cells. Both label files are reshaped through these operations
//! before being turned into [`SampleRecord`]s.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{GradingError, Result, ResultExt};
use crate::{MAX_GRADE, MIN_GRADE};

/// One image with its severity label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Path to the fundus photograph
    pub path: PathBuf,
    /// Severity grade as a regression target
    pub label: f32,
}

impl SampleRecord {
    pub fn new(path: impl Into<PathBuf>, label: f32) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }
}

/// An ordered CSV table with string cells
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ManifestTable {
    /// Build a table from in-memory rows; every row must match the header width
    pub fn from_rows(name: &str, columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(GradingError::Dataset(format!(
                "{}: row {} has {} cells, expected {}",
                name,
                i,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    /// Read a CSV file with a header row
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GradingError::PathNotFound(
                path.to_path_buf(),
                "expected a CSV manifest".to_string(),
            ));
        }

        let file = std::fs::File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Self::from_reader(&name, file)
    }

    /// Parse CSV from any reader
    ///
    /// Header names are normalized the way dataframe exports round-trip them:
    /// a blank header at position `i` becomes `Unnamed: i`, and repeated names
    /// get `.1`, `.2`, ... suffixes.
    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let raw_headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let columns = normalize_headers(&raw_headers);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect());
        }

        Self::from_rows(name, columns, rows)
    }

    /// Table name used in error messages (usually the file name)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Position of a column, or a `MissingColumn` error
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| GradingError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// All values of one column in row order
    pub fn column_values(&self, column: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Derive `target` from `source` cell by cell; appended at the end, or
    /// overwritten in place when `target` already exists
    pub fn derive_column<F>(&mut self, target: &str, source: &str, f: F) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        let src = self.column_index(source)?;
        let values: Vec<String> = self.rows.iter().map(|row| f(&row[src])).collect();
        self.set_column(target, values)
    }

    /// Replace (or append) a whole column; the value count must match the row count
    pub fn set_column(&mut self, column: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(GradingError::Dataset(format!(
                "{}: column '{}' has {} values for {} rows",
                self.name,
                column,
                values.len(),
                self.rows.len()
            )));
        }

        match self.columns.iter().position(|c| c == column) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }

        Ok(())
    }

    /// Drop columns; every named column must exist
    pub fn drop_columns(&mut self, columns: &[&str]) -> Result<()> {
        let mut indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        indices.sort_unstable();
        indices.dedup();

        for &idx in indices.iter().rev() {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }

        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.column_index(from)?;
        if from != to && self.has_column(to) {
            return Err(GradingError::Dataset(format!(
                "{}: cannot rename '{}' to existing column '{}'",
                self.name, from, to
            )));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Shuffle rows in place
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.rows.shuffle(rng);
    }

    /// Write the table as CSV with a header and no index column
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Convert rows into samples, validating labels against the grade range
    pub fn to_samples(&self, path_column: &str, label_column: &str) -> Result<Vec<SampleRecord>> {
        let path_idx = self.column_index(path_column)?;
        let label_idx = self.column_index(label_column)?;

        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let raw = row[label_idx].trim();
                let label: f32 = raw
                    .parse()
                    .with_context(|| format!("{}: invalid label '{}' in row {}", self.name, raw, i))?;

                if !(MIN_GRADE..=MAX_GRADE).contains(&label) {
                    return Err(GradingError::Dataset(format!(
                        "{}: label {} in row {} outside [{}, {}]",
                        self.name, label, i, MIN_GRADE, MAX_GRADE
                    )));
                }

                Ok(SampleRecord::new(&row[path_idx], label))
            })
            .collect()
    }
}

fn normalize_headers(raw: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    raw.iter()
        .enumerate()
        .map(|(i, header)| {
            let base = if header.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                header.clone()
            };

            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base.clone()
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            name
        })
        .collect()
}
