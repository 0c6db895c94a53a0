//! Raw record loading from JSON, NDJSON and CSV exports.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::data::fields::RawRecord;
use crate::error::DataError;

/// Supported input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A JSON array of objects (or a single object).
    Json,
    /// One JSON object per line.
    JsonLines,
    /// Comma-separated values with a header row.
    Csv,
}

impl InputFormat {
    /// Guess from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// Guess from the content.
    pub fn sniff(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with('[') {
            return Self::Json;
        }
        if trimmed.starts_with('{') {
            // A single pretty-printed object spans lines; NDJSON has one
            // complete object on the first line.
            let first = trimmed.lines().next().unwrap_or_default().trim();
            if first.ends_with('}') && serde_json::from_str::<Value>(first).is_ok() {
                return Self::JsonLines;
            }
            return Self::Json;
        }
        Self::Csv
    }
}

/// Read and parse a file, detecting its format.
pub async fn load_file(path: &Path) -> Result<Vec<RawRecord>, DataError> {
    let content = tokio::fs::read_to_string(path).await?;
    let format = InputFormat::from_path(path).unwrap_or_else(|| InputFormat::sniff(&content));
    debug!(path = %path.display(), ?format, bytes = content.len(), "Loading input");
    parse_str(&content, format)
}

/// Parse records from a string in a known format.
pub fn parse_str(content: &str, format: InputFormat) -> Result<Vec<RawRecord>, DataError> {
    let records = match format {
        InputFormat::Json => parse_json(content)?,
        InputFormat::JsonLines => parse_json_lines(content)?,
        InputFormat::Csv => parse_csv(content)?,
    };
    if records.is_empty() {
        return Err(DataError::Empty);
    }
    Ok(records)
}

fn parse_json(content: &str) -> Result<Vec<RawRecord>, DataError> {
    let value: Value = serde_json::from_str(content).map_err(|e| DataError::Parse {
        line: e.line(),
        reason: e.to_string(),
    })?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(map),
                _ => Err(DataError::NotAnObject { index }),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        _ => Err(DataError::NotAnObject { index: 0 }),
    }
}

fn parse_json_lines(content: &str) -> Result<Vec<RawRecord>, DataError> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| DataError::Parse {
            line: i + 1,
            reason: e.to_string(),
        })?;
        match value {
            Value::Object(map) => records.push(map),
            _ => return Err(DataError::NotAnObject { index: records.len() }),
        }
    }
    Ok(records)
}

fn parse_csv(content: &str) -> Result<Vec<RawRecord>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| csv_error(&e, 1))?
        .clone();

    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.map_err(|e| csv_error(&e, i + 2))?;
        let mut record = RawRecord::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if header.is_empty() || cell.is_empty() {
                continue;
            }
            record.insert(header.to_string(), Value::String(cell.to_string()));
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

fn csv_error(e: &csv::Error, fallback_line: usize) -> DataError {
    let line = e
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or(fallback_line);
    DataError::Parse {
        line,
        reason: e.to_string(),
    }
}
