//! Delimited-text source: delimiter sniffing, header handling, typed rows.

use super::schema::{
    classify_text, text_to_value, unique_column_names, widen_column, ColumnSpec, ColumnType,
};
use super::RecordSource;
use crate::error::ImportError;
use duckdb::types::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];
const SNIFF_MAX_BYTES: usize = 64 * 1024;

/// Pick the delimiter whose field count is most consistent across the header
/// and the first data lines. Ties go to the earlier candidate; a file where no
/// candidate splits the header is treated as single-column comma text.
pub fn sniff_delimiter(sample: &[u8], max_lines: usize) -> u8 {
    let mut best: Option<(usize, usize, u8)> = None;
    for delim in CANDIDATES {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delim)
            .has_headers(false)
            .flexible(true)
            .from_reader(sample);
        let counts: Vec<usize> = reader
            .records()
            .take(max_lines)
            .map_while(Result::ok)
            .map(|r| r.len())
            .collect();
        let Some(&header) = counts.first() else {
            continue;
        };
        if header < 2 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == header).count();
        let better = match best {
            None => true,
            Some((c, h, _)) => (consistent, header) > (c, h),
        };
        if better {
            best = Some((consistent, header, delim));
        }
    }
    best.map(|(_, _, d)| d).unwrap_or(b',')
}

/// Leading lines of the file, capped in count and size.
fn read_sniff_sample(path: &Path, max_lines: usize) -> Result<Vec<u8>, ImportError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut sample = Vec::new();
    for _ in 0..max_lines {
        if reader.read_until(b'\n', &mut sample)? == 0 || sample.len() >= SNIFF_MAX_BYTES {
            break;
        }
    }
    // A final partial line would skew the field counts.
    if sample.len() >= SNIFF_MAX_BYTES {
        if let Some(pos) = sample.iter().rposition(|&b| b == b'\n') {
            sample.truncate(pos + 1);
        }
    }
    Ok(sample)
}

pub struct CsvSource {
    reader: csv::Reader<BufReader<File>>,
    columns: Vec<ColumnSpec>,
    sampled: VecDeque<csv::StringRecord>,
    delimiter: u8,
}

impl CsvSource {
    pub fn open(path: &Path, sniff_lines: usize, sample_rows: usize) -> Result<Self, ImportError> {
        let sample = read_sniff_sample(path, sniff_lines)?;
        if sample.contains(&0) {
            return Err(ImportError::UnsupportedFormat(format!(
                "{} does not look like delimited text",
                path.display()
            )));
        }
        let delimiter = sniff_delimiter(&sample, sniff_lines);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(BufReader::new(File::open(path)?));

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(ImportError::Parse(format!(
                "{} has no header row",
                path.display()
            )));
        }
        let names = unique_column_names(headers.iter());

        let mut sampled = VecDeque::new();
        let mut types: Vec<Option<ColumnType>> = vec![None; names.len()];
        for record in reader.records().take(sample_rows) {
            let record = record?;
            for (ty, field) in types.iter_mut().zip(record.iter()) {
                if let Some(seen) = classify_text(field) {
                    *ty = Some(ColumnType::widen(*ty, seen));
                }
            }
            sampled.push_back(record);
        }

        let columns = names
            .into_iter()
            .zip(types)
            .map(|(name, ty)| ColumnSpec {
                name,
                ty: ty.unwrap_or(ColumnType::Varchar),
            })
            .collect();

        tracing::debug!(
            delimiter = %(delimiter as char).escape_default(),
            sampled = sampled.len(),
            "csv source opened"
        );
        Ok(Self {
            reader,
            columns,
            sampled,
            delimiter,
        })
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    fn convert(&self, record: &csv::StringRecord) -> Result<Vec<Value>, ImportError> {
        self.columns
            .iter()
            .zip(record.iter())
            .map(|(col, field)| {
                text_to_value(col.ty, field).map_err(|msg| {
                    let line = record.position().map(|p| p.line()).unwrap_or(0);
                    ImportError::Parse(format!("line {}, column '{}': {}", line, col.name, msg))
                })
            })
            .collect()
    }
}

impl RecordSource for CsvSource {
    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Reads the whole chunk first so a widened column types every row in it.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>, ImportError> {
        let mut records = Vec::new();
        while records.len() < max_rows {
            if let Some(buffered) = self.sampled.pop_front() {
                records.push(buffered);
                continue;
            }
            let mut record = csv::StringRecord::new();
            if !self.reader.read_record(&mut record)? {
                break;
            }
            for (col, field) in self.columns.iter_mut().zip(record.iter()) {
                widen_column(col, classify_text(field));
            }
            records.push(record);
        }
        records.iter().map(|r| self.convert(r)).collect()
    }

    fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }
}
