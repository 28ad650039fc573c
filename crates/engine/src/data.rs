//! Data sources for data-driven test cases
//!
//! A `DataSet` is a row sequence loaded from a delimited, structured,
//! hierarchical, or spreadsheet file, dispatched on extension. Rows can be
//! mutated in memory, re-validated against an active schema, and written
//! back in the original format.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use testgrid_common::{DataRow, Error, FieldKind, RowSchema, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
    Yaml,
    Spreadsheet,
}

impl DataFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(DataFormat::Csv),
            "json" => Ok(DataFormat::Json),
            "yaml" | "yml" => Ok(DataFormat::Yaml),
            "xlsx" | "xls" => Ok(DataFormat::Spreadsheet),
            other => Err(Error::DataSource(format!(
                "unsupported data source extension: {:?} ({})",
                other,
                path.display()
            ))),
        }
    }
}

pub struct DataSet {
    path: PathBuf,
    format: DataFormat,
    rows: Vec<DataRow>,
    schema: Option<RowSchema>,
}

impl DataSet {
    /// Read all rows from `path`, dispatching on the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::DataSource(format!(
                "data source does not exist: {}",
                path.display()
            )));
        }
        let format = DataFormat::from_path(path)?;
        let rows = match format {
            DataFormat::Csv => read_csv(path)?,
            DataFormat::Json => read_json(path)?,
            DataFormat::Yaml => read_yaml(path)?,
            DataFormat::Spreadsheet => read_spreadsheet(path)?,
        };
        debug!("Loaded {} rows from {}", rows.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            format,
            rows,
            schema: None,
        })
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Activate a schema, validating every current row against it.
    pub fn set_schema(&mut self, schema: RowSchema) -> Result<()> {
        for (index, row) in self.rows.iter().enumerate() {
            validate_row(row, &schema, index)?;
        }
        self.schema = Some(schema);
        Ok(())
    }

    pub fn add(&mut self, row: DataRow) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_row(&row, schema, self.rows.len())?;
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<DataRow> {
        if index >= self.rows.len() {
            return Err(Error::DataSource(format!(
                "row index {} out of bounds ({} rows)",
                index,
                self.rows.len()
            )));
        }
        Ok(self.rows.remove(index))
    }

    pub fn update(&mut self, index: usize, row: DataRow) -> Result<()> {
        if index >= self.rows.len() {
            return Err(Error::DataSource(format!(
                "row index {} out of bounds ({} rows)",
                index,
                self.rows.len()
            )));
        }
        if let Some(schema) = &self.schema {
            validate_row(&row, schema, index)?;
        }
        self.rows[index] = row;
        Ok(())
    }

    /// Write the row sequence back to the original file, in the original
    /// format. Spreadsheet sources are read-only.
    pub fn save(&self) -> Result<()> {
        match self.format {
            DataFormat::Csv => write_csv(&self.path, &self.rows),
            DataFormat::Json => write_json(&self.path, &self.rows),
            DataFormat::Yaml => write_yaml(&self.path, &self.rows),
            DataFormat::Spreadsheet => Err(Error::DataSource(format!(
                "spreadsheet sources are read-only; cannot write {}",
                self.path.display()
            ))),
        }
    }
}

fn validate_row(row: &DataRow, schema: &RowSchema, index: usize) -> Result<()> {
    for field in &schema.fields {
        let value = row.get(&field.name);
        match value {
            None => {
                if field.required {
                    return Err(Error::DataValidation {
                        row: index,
                        reason: format!("missing required field '{}'", field.name),
                    });
                }
            }
            Some(value) => {
                if let Some(kind) = field.kind {
                    let ok = match kind {
                        FieldKind::String => value.is_string(),
                        FieldKind::Number => value.is_number(),
                        FieldKind::Bool => value.is_boolean(),
                    };
                    if !ok {
                        return Err(Error::DataValidation {
                            row: index,
                            reason: format!(
                                "field '{}' has wrong type (expected {:?}, got {})",
                                field.name, kind, value
                            ),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn read_csv(path: &Path) -> Result<Vec<DataRow>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::DataSource(format!("failed to read {}: {}", path.display(), e)))?;
    let headers = reader
        .headers()
        .map_err(|e| Error::DataSource(e.to_string()))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::DataSource(e.to_string()))?;
        let mut row = DataRow::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(field.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn write_csv(path: &Path, rows: &[DataRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::DataSource(format!("failed to write {}: {}", path.display(), e)))?;
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    writer
        .write_record(&headers)
        .map_err(|e| Error::DataSource(e.to_string()))?;
    for row in rows {
        let record: Vec<String> = headers
            .iter()
            .map(|h| match row.get(*h) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| Error::DataSource(e.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_json(path: &Path) -> Result<Vec<DataRow>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::DataSource(format!("failed to parse {}: {}", path.display(), e)))
}

fn write_json(path: &Path, rows: &[DataRow]) -> Result<()> {
    let content = serde_json::to_string_pretty(rows)?;
    std::fs::write(path, content)?;
    Ok(())
}

fn read_yaml(path: &Path) -> Result<Vec<DataRow>> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content)
        .map_err(|e| Error::DataSource(format!("failed to parse {}: {}", path.display(), e)))
}

fn write_yaml(path: &Path, rows: &[DataRow]) -> Result<()> {
    let content = serde_yaml::to_string(rows).map_err(|e| Error::DataSource(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

fn read_spreadsheet(path: &Path) -> Result<Vec<DataRow>> {
    use calamine::{open_workbook_auto, Data, Reader};

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| Error::DataSource(format!("failed to open {}: {}", path.display(), e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::DataSource(format!("{} has no worksheets", path.display())))?
        .map_err(|e| Error::DataSource(e.to_string()))?;

    let mut row_iter = range.rows();
    let headers: Vec<String> = match row_iter.next() {
        Some(header_row) => header_row.iter().map(|c| c.to_string()).collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for cells in row_iter {
        let mut row = DataRow::new();
        for (header, cell) in headers.iter().zip(cells.iter()) {
            let value = match cell {
                Data::Empty => Value::Null,
                Data::String(s) => Value::String(s.clone()),
                Data::Bool(b) => Value::Bool(*b),
                Data::Int(i) => Value::from(*i),
                Data::Float(f) => serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                other => Value::String(other.to_string()),
            };
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}
