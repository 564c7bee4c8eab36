//! CSV adapters between files/pipes and [`Record`]s.

use std::io::{Read, Write};

use serde_json::Value;
use sfpipe_bulk::Record;

use crate::error::Result;

/// Records read from CSV with a header row. All values are strings.
pub struct CsvRecords<R> {
    headers: csv::StringRecord,
    rows: csv::StringRecordsIntoIter<R>,
}

/// Read CSV with a header row. The header is read eagerly.
pub fn csv_records<R: Read>(reader: R) -> Result<CsvRecords<R>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader.headers()?.clone();
    Ok(CsvRecords {
        headers,
        rows: reader.into_records(),
    })
}

impl<R: Read> CsvRecords<R> {
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }
}

impl<R: Read> Iterator for CsvRecords<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };
        let record = self
            .headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        Some(Ok(record))
    }
}

/// Writes records as CSV. The header comes from the first record's keys.
pub struct CsvRecordWriter<W: Write> {
    writer: csv::Writer<W>,
    headers: Option<Vec<String>>,
    rows: usize,
}

impl<W: Write> CsvRecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            headers: None,
            rows: 0,
        }
    }

    /// Rows written, excluding the header.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.headers.is_none() {
            let headers: Vec<String> = record.keys().cloned().collect();
            self.writer.write_record(&headers)?;
            self.headers = Some(headers);
        }
        let headers = self.headers.as_deref().unwrap_or_default();
        let row: Vec<String> = headers.iter().map(|name| cell(record.get(name))).collect();
        self.writer.write_record(&row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        // Relationship fields and other nested values keep their JSON form
        Some(other) => other.to_string(),
    }
}
