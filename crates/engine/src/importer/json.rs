//! Structured-record source: NDJSON or a single top-level array of objects.
//!
//! Both layouts are read one record at a time; an array is never loaded whole.

use super::schema::{classify_json, json_to_value, widen_column, ColumnSpec, ColumnType};
use super::RecordSource;
use crate::error::ImportError;
use duckdb::types::Value;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Counts bytes pulled from the underlying file.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Lines,
    Array,
}

type Record = serde_json::Map<String, serde_json::Value>;

pub struct JsonSource {
    reader: BufReader<CountingReader<File>>,
    layout: Layout,
    columns: Vec<ColumnSpec>,
    // Column position by key.
    index: HashMap<String, usize>,
    sampled: VecDeque<Record>,
    // Array layout: a ',' must precede the next element.
    after_element: bool,
    finished: bool,
    line: u64,
}

impl JsonSource {
    pub fn open(path: &Path, sample_rows: usize) -> Result<Self, ImportError> {
        let file = File::open(path)?;
        let mut src = Self {
            reader: BufReader::new(CountingReader {
                inner: file,
                count: 0,
            }),
            layout: Layout::Lines,
            columns: Vec::new(),
            index: HashMap::new(),
            sampled: VecDeque::new(),
            after_element: false,
            finished: false,
            line: 0,
        };

        src.skip_bom()?;
        src.layout = match src.peek_non_ws()? {
            Some(b'[') => {
                src.reader.consume(1);
                Layout::Array
            }
            Some(b'{') => Layout::Lines,
            Some(other) => {
                return Err(ImportError::Parse(format!(
                    "expected '[' or '{{' at start of {}, found '{}'",
                    path.display(),
                    other as char
                )))
            }
            None => {
                return Err(ImportError::Parse(format!(
                    "{} contains no records",
                    path.display()
                )))
            }
        };

        let mut order: Vec<String> = Vec::new();
        let mut types: HashMap<String, Option<ColumnType>> = HashMap::new();
        while src.sampled.len() < sample_rows {
            let Some(record) = src.next_record()? else {
                break;
            };
            for (key, value) in &record {
                let slot = types.entry(key.clone()).or_insert_with(|| {
                    order.push(key.clone());
                    None
                });
                if let Some(seen) = classify_json(value) {
                    *slot = Some(ColumnType::widen(*slot, seen));
                }
            }
            src.sampled.push_back(record);
        }
        if order.is_empty() {
            return Err(ImportError::Parse(format!(
                "{} contains no record fields",
                path.display()
            )));
        }

        src.columns = order
            .into_iter()
            .map(|name| {
                let ty = types.get(&name).copied().flatten().unwrap_or(ColumnType::Varchar);
                ColumnSpec { name, ty }
            })
            .collect();
        src.index = src
            .columns
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name.clone(), idx))
            .collect();
        tracing::debug!(layout = ?src.layout, columns = src.columns.len(), "json source opened");
        Ok(src)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn skip_bom(&mut self) -> io::Result<()> {
        if self.reader.fill_buf()?.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.reader.consume(3);
        }
        Ok(())
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek_non_ws(&mut self) -> io::Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(pos) => {
                    let byte = buf[pos];
                    self.reader.consume(pos);
                    return Ok(Some(byte));
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>, ImportError> {
        if self.finished {
            return Ok(None);
        }
        let value = match self.layout {
            Layout::Lines => self.next_line_value()?,
            Layout::Array => self.next_array_value()?,
        };
        match value {
            None => {
                self.finished = true;
                Ok(None)
            }
            Some(serde_json::Value::Object(record)) => Ok(Some(record)),
            Some(other) => Err(ImportError::Parse(format!(
                "record {}: expected a JSON object, found {}",
                self.line,
                kind_of(&other)
            ))),
        }
    }

    fn next_line_value(&mut self) -> Result<Option<serde_json::Value>, ImportError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| ImportError::Parse(format!("line {}: {}", self.line, e)));
        }
    }

    fn next_array_value(&mut self) -> Result<Option<serde_json::Value>, ImportError> {
        match self.peek_non_ws()? {
            None => return Err(ImportError::Parse("unterminated JSON array".into())),
            Some(b']') => {
                self.reader.consume(1);
                return Ok(None);
            }
            Some(b',') if self.after_element => {
                self.reader.consume(1);
            }
            Some(other) if self.after_element => {
                return Err(ImportError::Parse(format!(
                    "record {}: expected ',' or ']', found '{}'",
                    self.line, other as char
                )))
            }
            Some(_) => {}
        }
        self.line += 1;
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let value = serde_json::Value::deserialize(&mut de)
            .map_err(|e| ImportError::Parse(format!("record {}: {}", self.line, e)))?;
        self.after_element = true;
        Ok(Some(value))
    }

    /// Widen known columns to fit `record` and append a column for each key
    /// first seen past the sample.
    fn observe(&mut self, record: &Record) {
        for (key, value) in record {
            let seen = classify_json(value);
            match self.index.get(key).copied() {
                Some(idx) => {
                    widen_column(&mut self.columns[idx], seen);
                }
                None => {
                    tracing::debug!(column = %key, record = self.line, "new field past the sample");
                    self.index.insert(key.clone(), self.columns.len());
                    self.columns.push(ColumnSpec {
                        name: key.clone(),
                        ty: seen.unwrap_or(ColumnType::Varchar),
                    });
                }
            }
        }
    }

    fn convert(&self, record: &Record) -> Result<Vec<Value>, ImportError> {
        self.columns
            .iter()
            .map(|col| {
                let raw = record.get(&col.name).unwrap_or(&serde_json::Value::Null);
                json_to_value(col.ty, raw).map_err(|msg| {
                    ImportError::Parse(format!("field '{}': {}", col.name, msg))
                })
            })
            .collect()
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl RecordSource for JsonSource {
    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Reads the whole chunk first so widened and added columns cover every row in it.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>, ImportError> {
        let mut records = Vec::new();
        while records.len() < max_rows {
            if let Some(buffered) = self.sampled.pop_front() {
                records.push(buffered);
                continue;
            }
            let Some(record) = self.next_record()? else {
                break;
            };
            self.observe(&record);
            records.push(record);
        }
        records.iter().map(|r| self.convert(r)).collect()
    }

    fn bytes_read(&self) -> u64 {
        self.reader.get_ref().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(content: &str, sample_rows: usize) -> Result<JsonSource, ImportError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        // The source keeps its own handle; the temp file must outlive only `open`.
        let src = JsonSource::open(file.path(), sample_rows);
        drop(file);
        src
    }

    #[test]
    fn test_ndjson_records() {
        let mut src = source(
            "{\"id\": 1, \"name\": \"a\"}\n\n{\"id\": 2, \"name\": null, \"extra\": true}\n",
            100,
        )
        .unwrap();
        assert_eq!(src.layout(), Layout::Lines);
        let names: Vec<&str> = src.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "extra"]);
        let rows = src.next_chunk(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::BigInt(1), Value::Text("a".into()), Value::Null]);
        assert_eq!(rows[1][2], Value::Boolean(true));
    }

    #[test]
    fn test_array_records_streamed_past_sample() {
        let mut src = source(
            " [ {\"x\": 1, \"tags\": [1,2]},\n {\"x\": 2.5},\n {\"x\": 3} ] ",
            1,
        )
        .unwrap();
        assert_eq!(src.layout(), Layout::Array);
        assert_eq!(src.columns()[0].ty, ColumnType::BigInt);
        assert_eq!(src.columns()[1].ty, ColumnType::Varchar);

        let first = src.next_chunk(1).unwrap();
        assert_eq!(first[0], vec![Value::BigInt(1), Value::Text("[1,2]".into())]);
        // 2.5 was not in the sample; x widens to DOUBLE for the whole chunk.
        let rest = src.next_chunk(5).unwrap();
        assert_eq!(rest, vec![
            vec![Value::Double(2.5), Value::Null],
            vec![Value::Double(3.0), Value::Null],
        ]);
        assert_eq!(src.columns()[0].ty, ColumnType::Double);
    }

    #[test]
    fn test_keys_past_sample_become_columns() {
        let mut src = source("{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3, \"b\": \"important\"}\n", 2).unwrap();
        assert_eq!(src.columns().len(), 1);

        let rows = src.next_chunk(10).unwrap();
        let names: Vec<&str> = src.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(src.columns()[1].ty, ColumnType::Varchar);
        assert_eq!(rows[0], vec![Value::BigInt(1), Value::Null]);
        assert_eq!(rows[2], vec![Value::BigInt(3), Value::Text("important".into())]);
    }

    #[test]
    fn test_array_full_read() {
        let mut src = source("[{\"a\": 1}, {\"a\": 2}, {\"a\": 3}]", 100).unwrap();
        let rows = src.next_chunk(2).unwrap();
        assert_eq!(rows.len(), 2);
        let rows = src.next_chunk(2).unwrap();
        assert_eq!(rows, vec![vec![Value::BigInt(3)]]);
        assert!(src.next_chunk(2).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_object_input() {
        assert!(matches!(source("42", 10), Err(ImportError::Parse(_))));
        assert!(matches!(source("[1, 2]", 10), Err(ImportError::Parse(_))));
        assert!(matches!(source("   ", 10), Err(ImportError::Parse(_))));
        assert!(matches!(source("[{\"a\": 1} {\"a\": 2}]", 10), Err(ImportError::Parse(_))));
    }
}
