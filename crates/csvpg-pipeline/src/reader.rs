//! Delimited-record reader
//!
//! Reads a comma-separated file with a header row into [`Record`]s. Field
//! values are kept as raw strings; the destination store coerces them when the
//! parameterized insert runs.
//!
//! The sequence is lazy and restartable: every call to
//! [`DelimitedReader::records`] reopens the file at the first data row.

use crate::error::{IngestError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One data row, positionally aligned to the header columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: u64,
    columns: Arc<[String]>,
    fields: Vec<String>,
}

impl Record {
    /// 1-based line of the row in its source file
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw value of the named column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.fields.get(idx))
            .map(String::as_str)
    }

    /// (column, value) pairs in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.fields.iter().map(String::as_str))
    }
}

/// Reader over one CSV source file
#[derive(Debug, Clone)]
pub struct DelimitedReader {
    path: PathBuf,
    columns: Arc<[String]>,
}

impl DelimitedReader {
    /// Open `path` and read its header row
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = Self::csv_reader(&path)?;

        let header = reader
            .headers()
            .map_err(|e| csv_error(&path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        if header.is_empty() || header.iter().all(String::is_empty) {
            return Err(IngestError::parse(&path, 1, "missing header row"));
        }

        Ok(Self {
            path,
            columns: header.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names from the header, trimmed
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Start a fresh pass over the data rows
    pub fn records(&self) -> Result<Records> {
        Ok(Records {
            inner: Self::csv_reader(&self.path)?.into_records(),
            path: self.path.clone(),
            columns: Arc::clone(&self.columns),
        })
    }

    /// Read every data row into memory, stopping at the first bad row
    pub fn read_all(&self) -> Result<Vec<Record>> {
        self.records()?.collect()
    }

    fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
        let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(file))
    }
}

/// Lazy iterator over the data rows of one pass
pub struct Records {
    inner: csv::StringRecordsIntoIter<File>,
    path: PathBuf,
    columns: Arc<[String]>,
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(csv_error(&self.path, e))),
        };

        let line = row.position().map(|p| p.line()).unwrap_or_default();
        Some(Ok(Record {
            line,
            columns: Arc::clone(&self.columns),
            fields: row.iter().map(str::to_string).collect(),
        }))
    }
}

fn csv_error(path: &Path, err: csv::Error) -> IngestError {
    let line = err.position().map(|p| p.line()).unwrap_or_default();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => IngestError::io(path, e),
        csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => IngestError::parse(
            path,
            pos.map(|p| p.line()).unwrap_or(line),
            format!("expected {} fields, found {}", expected_len, len),
        ),
        csv::ErrorKind::Utf8 { pos, err } => IngestError::parse(
            path,
            pos.map(|p| p.line()).unwrap_or(line),
            format!("invalid UTF-8: {}", err),
        ),
        other => IngestError::parse(path, line, format!("{:?}", other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_header_and_rows() {
        let file = csv_file(
            "customer_id, full_name,address,city,zipcode\n\
             1,Alice,1 Main St,Springfield,12345\n\
             2,Bob,2 Oak Ave,Shelbyville,54321\n",
        );
        let reader = DelimitedReader::open(file.path()).unwrap();
        assert_eq!(
            reader.columns(),
            ["customer_id", "full_name", "address", "city", "zipcode"]
        );

        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("full_name"), Some("Alice"));
        assert_eq!(records[1].get("zipcode"), Some("54321"));
        assert_eq!(records[0].line(), 2);
        assert_eq!(records[1].line(), 3);
    }

    #[test]
    fn test_quoted_fields_keep_commas() {
        let file = csv_file("id,name\n7,\"Doe, Jane\"\n");
        let records = DelimitedReader::open(file.path()).unwrap().read_all().unwrap();
        assert_eq!(records[0].fields(), ["7", "Doe, Jane"]);
    }

    #[test]
    fn test_blank_fields_are_kept_as_empty_strings() {
        let file = csv_file("id,name,city\n1,,Springfield\n");
        let records = DelimitedReader::open(file.path()).unwrap().read_all().unwrap();
        assert_eq!(records[0].get("name"), Some(""));
        assert_eq!(records[0].len(), 3);
    }

    #[test]
    fn test_field_count_mismatch_is_parse_error() {
        let file = csv_file("id,name\n1,Alice\n2,Bob,extra\n");
        let err = DelimitedReader::open(file.path())
            .unwrap()
            .read_all()
            .unwrap_err();
        match err {
            IngestError::Parse { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("expected 2 fields, found 3"), "{}", message);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DelimitedReader::open("/nonexistent/customers.csv").unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let file = csv_file("");
        let err = DelimitedReader::open(file.path()).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_records_restart_from_first_row() {
        let file = csv_file("id\n1\n2\n3\n");
        let reader = DelimitedReader::open(file.path()).unwrap();

        let first: Vec<_> = reader.records().unwrap().take(2).collect::<Result<_>>().unwrap();
        let second = reader.read_all().unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        assert_eq!(first[0], second[0]);
    }

    #[test]
    fn test_iter_pairs_columns_with_values() {
        let file = csv_file("a,b\nx,y\n");
        let records = DelimitedReader::open(file.path()).unwrap().read_all().unwrap();
        let pairs: Vec<_> = records[0].iter().collect();
        assert_eq!(pairs, vec![("a", "x"), ("b", "y")]);
    }
}
