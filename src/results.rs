use crate::process::CrossotopeError;

use colored::*;
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use prettytable::{row, Table};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column names of the results CSV, in order.
pub const RESULT_HEADER: [&str; 4] = ["nrh", "ix", "L", "R"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRow {
    pub nrh: u64,
    pub ix: u64,
    pub left: u64,
    pub right: u64,
}

impl ResultRow {
    fn as_array(&self) -> [u64; 4] {
        [self.nrh, self.ix, self.left, self.right]
    }
}

/// Fixed `n x 4` table of cluster results, one row per sample in draw order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    values: Array2<u64>,
}

impl ResultTable {
    pub fn zeros(rows: usize) -> Self {
        ResultTable {
            values: Array2::zeros((rows, RESULT_HEADER.len())),
        }
    }

    pub fn from_rows(rows: &[ResultRow]) -> Self {
        let mut table = ResultTable::zeros(rows.len());
        for (i, row) in rows.iter().enumerate() {
            table.set_row(i, row);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &Array2<u64> {
        &self.values
    }

    /// Panics if `i` is outside the table.
    pub fn set_row(&mut self, i: usize, row: &ResultRow) {
        for (cell, value) in self.values.row_mut(i).iter_mut().zip(row.as_array()) {
            *cell = value;
        }
    }

    pub fn row(&self, i: usize) -> ResultRow {
        let r = self.values.row(i);
        ResultRow {
            nrh: r[0],
            ix: r[1],
            left: r[2],
            right: r[3],
        }
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        (0..self.len()).map(|i| self.row(i)).collect()
    }

    /// `<output_dir>/<label>_results.csv`
    pub fn output_path(output_dir: &Path, label: &str) -> PathBuf {
        output_dir.join(format!("{}_results.csv", label))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), CrossotopeError> {
        let file = File::create(path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer.write_record(RESULT_HEADER)?;
        for row in self.values.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self, CrossotopeError> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

        let headers = reader.headers()?.clone();
        if headers.iter().ne(RESULT_HEADER.iter().copied()) {
            return Err(CrossotopeError::InputValidation(format!(
                "{} has header {:?}, expected {}",
                path.display(),
                headers.iter().collect::<Vec<_>>(),
                RESULT_HEADER.join(",")
            )));
        }

        let mut flat = Vec::new();
        for (line_num, record) in reader.records().enumerate() {
            let record = record?;
            for field in record.iter() {
                let value = field.trim().parse::<u64>().map_err(|_| {
                    CrossotopeError::InputValidation(format!(
                        "Invalid value '{}' on line {} of {}",
                        field,
                        line_num + 2,
                        path.display()
                    ))
                })?;
                flat.push(value);
            }
        }

        let rows = flat.len() / RESULT_HEADER.len();
        let values = Array2::from_shape_vec((rows, RESULT_HEADER.len()), flat)
            .map_err(|e| CrossotopeError::InputValidation(format!("{}: {}", path.display(), e)))?;
        Ok(ResultTable { values })
    }

    /// Prints up to `limit` rows as a table on stdout.
    pub fn display(&self, limit: usize) -> Result<(), CrossotopeError> {
        let mut output = Vec::new();
        let mut table = Table::new();
        table.add_row(row!["nrh", "ix", "L", "R"]);
        for row in self.rows().iter().take(limit) {
            table.add_row(row![row.nrh, row.ix, row.left, row.right]);
        }
        table.print(&mut output)?;

        let table_string = String::from_utf8_lossy(&output);
        print!("\n{}\n{}", "Cluster results:".green().bold(), table_string);
        if self.len() > limit {
            println!("... and {} more rows.", self.len() - limit);
        }
        std::io::stdout().flush()?;
        Ok(())
    }
}
