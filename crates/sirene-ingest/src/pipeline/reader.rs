//! Chunked CSV reader
//!
//! The file is never loaded whole: each [`RawSource::next_chunk`] call reads
//! at most one chunk of records on the blocking pool. Restart happens by
//! opening a new reader and seeking to the byte position of a checkpoint.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{ColumnMap, RawChunk, RawRecord, RawSource, SourceOpener, SourcePosition};
use crate::error::{IngestError, RecordError, Result};
use crate::sirene::SireneRecord;

/// Supported spelling of the only accepted encoding
const UTF8_NAMES: &[&str] = &["utf-8", "utf8"];

/// How the source file is laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub delimiter: u8,
    /// `None` disables quoting entirely
    pub quote: Option<u8>,
    /// Line N is the header, lines before it are preamble. 0 means no header.
    pub header_lines: usize,
    pub encoding: String,
    /// Canonical column name -> column name used by this file
    pub column_overrides: HashMap<String, String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: Some(b'"'),
            header_lines: 1,
            encoding: "utf-8".to_string(),
            column_overrides: HashMap::new(),
        }
    }
}

impl ReaderOptions {
    pub fn validate(&self) -> Result<()> {
        if !is_utf8(&self.encoding) {
            return Err(IngestError::config(format!(
                "unsupported source encoding '{}', only UTF-8 is accepted",
                self.encoding
            )));
        }

        if !matches!(self.delimiter, b',' | b';' | b'\t' | b'|') {
            return Err(IngestError::config(format!(
                "unsupported delimiter '{}'",
                self.delimiter.escape_ascii()
            )));
        }

        if self.quote == Some(self.delimiter) {
            return Err(IngestError::config("quote and delimiter must differ"));
        }

        Ok(())
    }

    fn csv_reader(&self, file: File) -> csv::Reader<File> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter);

        match self.quote {
            Some(quote) => builder.quote(quote),
            None => builder.quoting(false),
        };

        builder.from_reader(file)
    }
}

fn is_utf8(encoding: &str) -> bool {
    UTF8_NAMES.contains(&encoding.trim().to_lowercase().as_str())
}

/// [`SourceOpener`] over a delimited file on disk
#[derive(Debug, Clone)]
pub struct CsvSourceOpener {
    path: PathBuf,
    options: ReaderOptions,
    canonical: &'static [&'static str],
    missing_key: fn(&ColumnMap) -> Option<&'static str>,
}

impl CsvSourceOpener {
    /// Opener resolving the columns of entity `E`
    pub fn for_entity<E: SireneRecord>(path: impl Into<PathBuf>, options: ReaderOptions) -> Self {
        Self {
            path: path.into(),
            options,
            canonical: E::SOURCE_COLUMNS,
            missing_key: E::missing_key_column,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_blocking(&self, resume_from: Option<SourcePosition>) -> Result<CsvSource> {
        self.options.validate()?;

        let file = File::open(&self.path)?;
        let mut reader = self.options.csv_reader(file);
        let source_path = self.path.display().to_string();

        let columns = if self.options.header_lines == 0 {
            ColumnMap::positional(self.canonical)
        } else {
            let mut preamble = csv::ByteRecord::new();
            for _ in 1..self.options.header_lines {
                if !reader.read_byte_record(&mut preamble)? {
                    return Err(IngestError::config(format!(
                        "{source_path} ends before its header line"
                    )));
                }
            }

            let mut header = csv::StringRecord::new();
            if !reader.read_record(&mut header)? {
                return Err(IngestError::config(format!(
                    "{source_path} ends before its header line"
                )));
            }
            ColumnMap::from_header(header.iter(), self.canonical, &self.options.column_overrides)
        };

        if let Some(column) = (self.missing_key)(&columns) {
            return Err(IngestError::MissingKeyColumn {
                column: column.to_string(),
                path: source_path,
            });
        }

        let missing = columns.missing(self.canonical);
        if !missing.is_empty() {
            warn!(
                path = %source_path,
                missing = ?missing,
                "Source lacks expected columns; they will be stored as null"
            );
        }

        let mut next_row = 0;
        if let Some(position) = resume_from {
            let mut seek_to = csv::Position::new();
            seek_to
                .set_byte(position.byte)
                .set_line(position.line)
                .set_record(position.row_offset + self.options.header_lines as u64);
            reader.seek(seek_to)?;
            next_row = position.row_offset;

            info!(
                path = %source_path,
                offset = position.row_offset,
                byte = position.byte,
                "Resuming source"
            );
        }

        debug!(path = %source_path, columns = columns.width(), "Opened source");

        Ok(CsvSource {
            reader: Some(reader),
            columns: Arc::new(columns),
            next_row,
            exhausted: false,
        })
    }
}

#[async_trait]
impl SourceOpener for CsvSourceOpener {
    async fn open(&self, resume_from: Option<SourcePosition>) -> Result<Box<dyn RawSource>> {
        let opener = self.clone();
        let source = tokio::task::spawn_blocking(move || opener.open_blocking(resume_from)).await??;
        Ok(Box::new(source))
    }

    fn source_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// An opened CSV file
pub struct CsvSource {
    /// Lent to the blocking pool while a chunk is read
    reader: Option<csv::Reader<File>>,
    columns: Arc<ColumnMap>,
    next_row: u64,
    exhausted: bool,
}

#[async_trait]
impl RawSource for CsvSource {
    async fn next_chunk(&mut self, max: usize) -> Result<Option<RawChunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| IngestError::config("source reader lost after a failed read"))?;
        let columns = Arc::clone(&self.columns);
        let first_row = self.next_row;

        let (reader, batch) =
            tokio::task::spawn_blocking(move || {
                let batch = read_batch(&mut reader, &columns, first_row, max);
                (reader, batch)
            })
            .await?;
        self.reader = Some(reader);

        let batch = batch?;
        self.next_row = batch.end.row_offset;
        self.exhausted = batch.exhausted;

        if batch.rows.is_empty() {
            return Ok(None);
        }

        Ok(Some(RawChunk {
            rows: batch.rows,
            end: batch.end,
        }))
    }
}

struct Batch {
    rows: Vec<std::result::Result<RawRecord, RecordError>>,
    end: SourcePosition,
    exhausted: bool,
}

fn read_batch(
    reader: &mut csv::Reader<File>,
    columns: &Arc<ColumnMap>,
    first_row: u64,
    max: usize,
) -> Result<Batch> {
    let mut rows = Vec::with_capacity(max);
    let mut row = first_row;
    let mut exhausted = false;

    while rows.len() < max {
        let mut record = csv::StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(false) => {
                exhausted = true;
                break;
            }
            Ok(true) if record.len() < columns.width() => {
                rows.push(Err(RecordError::Malformed {
                    row,
                    reason: format!(
                        "expected {} columns, found {}",
                        columns.width(),
                        record.len()
                    ),
                }));
            }
            Ok(true) => rows.push(Ok(RawRecord::new(row, Arc::clone(columns), record))),
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                rows.push(Err(RecordError::Malformed {
                    row,
                    reason: e.to_string(),
                }));
            }
            Err(e) => return Err(e.into()),
        }
        row += 1;
    }

    let position = reader.position();
    Ok(Batch {
        rows,
        end: SourcePosition {
            row_offset: row,
            byte: position.byte(),
            line: position.line(),
        },
        exhausted,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sirene::{Establishment, LegalUnit};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    async fn drain(source: &mut Box<dyn RawSource>, max: usize) -> Vec<RawChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.next_chunk(max).await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_reads_rows_in_chunks() {
        let file = source_file(
            b"siren,denominationUniteLegale\n552100554,RENAULT\n542065479,PEUGEOT\n775665019,\"EDF, SA\"\n",
        );
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());
        let mut source = opener.open(None).await.unwrap();

        let chunks = drain(&mut source, 2).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].rows.len(), 2);
        assert_eq!(chunks[0].end.row_offset, 2);
        assert_eq!(chunks[1].end.row_offset, 3);

        let last = chunks[1].rows[0].as_ref().unwrap();
        assert_eq!(last.row(), 2);
        assert_eq!(last.get("siren"), Some("775665019"));
        assert_eq!(last.get("denominationUniteLegale"), Some("EDF, SA"));
    }

    #[tokio::test]
    async fn test_short_row_is_malformed_and_extra_cells_ignored() {
        let file = source_file(b"siren,nomUniteLegale\n552100554\n542065479,DUPONT,extra\n");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());
        let mut source = opener.open(None).await.unwrap();

        let chunk = source.next_chunk(10).await.unwrap().unwrap();
        assert!(matches!(chunk.rows[0], Err(RecordError::Malformed { row: 0, .. })));
        let ok = chunk.rows[1].as_ref().unwrap();
        assert_eq!(ok.get("nomUniteLegale"), Some("DUPONT"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_row_is_malformed() {
        let file = source_file(b"siren,nomUniteLegale\n552100554,\xff\xfe\n542065479,DUPONT\n");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());
        let mut source = opener.open(None).await.unwrap();

        let chunk = source.next_chunk(10).await.unwrap().unwrap();
        assert_eq!(chunk.rows.len(), 2);
        assert!(matches!(chunk.rows[0], Err(RecordError::Malformed { row: 0, .. })));
        assert!(chunk.rows[1].is_ok());
    }

    #[tokio::test]
    async fn test_preamble_bom_delimiter_and_overrides() {
        let file = source_file(
            "export du 2024-03-01\n\u{feff}SIREN;nom\n552100554;DUPONT\n".as_bytes(),
        );
        let options = ReaderOptions {
            delimiter: b';',
            header_lines: 2,
            column_overrides: HashMap::from([
                ("siren".to_string(), "SIREN".to_string()),
                ("nomUniteLegale".to_string(), "nom".to_string()),
            ]),
            ..ReaderOptions::default()
        };
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), options);
        let mut source = opener.open(None).await.unwrap();

        let chunk = source.next_chunk(10).await.unwrap().unwrap();
        let row = chunk.rows[0].as_ref().unwrap();
        assert_eq!(row.get("siren"), Some("552100554"));
        assert_eq!(row.get("nomUniteLegale"), Some("DUPONT"));
    }

    #[tokio::test]
    async fn test_headerless_file_is_positional() {
        let file = source_file(b"552100554,00013,55210055400013\n");
        let options = ReaderOptions {
            header_lines: 0,
            ..ReaderOptions::default()
        };
        let opener = CsvSourceOpener::for_entity::<Establishment>(file.path(), options);
        let mut source = opener.open(None).await.unwrap();

        let chunk = source.next_chunk(10).await.unwrap().unwrap();
        // Fewer cells than the canonical layout
        assert!(matches!(chunk.rows[0], Err(RecordError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_missing_key_column_is_fatal() {
        let file = source_file(b"nomUniteLegale\nDUPONT\n");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());

        let err = opener.open(None).await.err().unwrap();
        let expected_path = file.path().display().to_string();
        assert!(matches!(
            err,
            IngestError::MissingKeyColumn { ref column, ref path }
                if column == "siren" && *path == expected_path
        ));
    }

    #[tokio::test]
    async fn test_missing_optional_columns_only_warn() {
        let file = source_file(b"siren,nomUniteLegale\n552100554,DUPONT\n");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());

        let mut source = opener.open(None).await.unwrap();
        let chunk = source.next_chunk(10).await.unwrap().unwrap();
        let row = chunk.rows[0].as_ref().unwrap();
        assert_eq!(row.get("nomUniteLegale"), Some("DUPONT"));
        assert_eq!(row.get("sigleUniteLegale"), None);
    }

    #[tokio::test]
    async fn test_empty_file_is_config_error() {
        let file = source_file(b"");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());
        assert!(matches!(opener.open(None).await.err().unwrap(), IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_unsupported_encoding_is_rejected() {
        let file = source_file(b"siren\n552100554\n");
        let options = ReaderOptions {
            encoding: "latin1".into(),
            ..ReaderOptions::default()
        };
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), options);
        assert!(matches!(opener.open(None).await.err().unwrap(), IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_resume_from_position_skips_committed_rows() {
        let file = source_file(b"siren\n552100554\n542065479\n775665019\n");
        let opener = CsvSourceOpener::for_entity::<LegalUnit>(file.path(), ReaderOptions::default());

        let mut source = opener.open(None).await.unwrap();
        let first = source.next_chunk(2).await.unwrap().unwrap();

        let mut resumed = opener.open(Some(first.end)).await.unwrap();
        let rest = drain(&mut resumed, 10).await;
        assert_eq!(rest.len(), 1);

        let row = rest[0].rows[0].as_ref().unwrap();
        assert_eq!(row.row(), 2);
        assert_eq!(row.get("siren"), Some("775665019"));
        assert_eq!(rest[0].end.row_offset, 3);
    }

    #[test]
    fn test_options_validation() {
        assert!(ReaderOptions::default().validate().is_ok());
        assert!(ReaderOptions {
            encoding: "UTF8".into(),
            ..ReaderOptions::default()
        }
        .validate()
        .is_ok());
        assert!(ReaderOptions {
            delimiter: b'"',
            ..ReaderOptions::default()
        }
        .validate()
        .is_err());
        assert!(ReaderOptions {
            delimiter: b';',
            quote: Some(b';'),
            ..ReaderOptions::default()
        }
        .validate()
        .is_err());
    }
}
