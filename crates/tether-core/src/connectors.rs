//! Source adapter and record publisher traits and implementations
//!
//! Sources and publishers are adapters for external systems. The runtime only
//! ever talks to them through [`SourceAdapter`] and [`RecordPublisher`]; new
//! systems are added by implementing these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{Error, Result};
use crate::record::{PositionIndex, ReadOutcome, Record};

/// Trait for resumable sources
#[async_trait]
pub trait SourceAdapter: Send {
    /// Acquire the underlying source handle
    async fn open(&mut self) -> Result<()>;

    /// Position the source so the next read returns the record after `index`.
    ///
    /// Must accept any value previously returned by [`current_index`](Self::current_index).
    async fn seek(&mut self, index: &PositionIndex) -> Result<()>;

    /// Read the next record, or report that no data is currently available
    async fn read(&mut self) -> Result<ReadOutcome>;

    /// Index denoting the cursor after the most recently read record
    fn current_index(&self) -> PositionIndex;

    /// Index of a source that has not been read at all
    fn beginning(&self) -> PositionIndex;

    /// Release the underlying source handle
    async fn close(&mut self) -> Result<()>;
}

/// Trait for record publishers (sinks)
#[async_trait]
pub trait RecordPublisher: Send {
    /// Hand a record to the publisher. May buffer.
    async fn publish(&mut self, record: &Record) -> Result<()>;

    /// Block until every outstanding publish is durably accepted
    async fn flush(&mut self) -> Result<()>;

    /// Release publisher resources
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source configuration from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// JSON-lines file
    File(FileSourceConfig),
}

impl SourceConfig {
    /// Build the configured source adapter
    pub fn build(&self) -> Box<dyn SourceAdapter> {
        match self {
            SourceConfig::File(config) => Box::new(FileSource::new(config.clone())),
        }
    }

    pub(crate) fn resolve_paths(&mut self, base: &std::path::Path) {
        match self {
            SourceConfig::File(config) => config.path = resolve(base, &config.path),
        }
    }
}

/// Publisher configuration from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherConfig {
    /// JSON-lines file
    File(FilePublisherConfig),
}

impl PublisherConfig {
    /// Build the configured publisher
    pub fn build(&self) -> Box<dyn RecordPublisher> {
        match self {
            PublisherConfig::File(config) => Box::new(FilePublisher::new(config.clone())),
        }
    }

    pub(crate) fn resolve_paths(&mut self, base: &std::path::Path) {
        match self {
            PublisherConfig::File(config) => config.path = resolve(base, &config.path),
        }
    }
}

pub(crate) fn resolve(base: &std::path::Path, path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// File source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// File of `{"key": .., "value": ..}` lines
    pub path: PathBuf,
}

/// File publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePublisherConfig {
    /// Output file; records are appended
    pub path: PathBuf,

    /// fsync on every flush
    #[serde(default = "default_sync")]
    pub sync: bool,
}

fn default_sync() -> bool {
    true
}

// ============================================================================
// File Source
// ============================================================================

/// Source reading JSON-lines records from a file.
///
/// The position index is the byte offset just past the last consumed line.
pub struct FileSource {
    config: FileSourceConfig,
    reader: Option<BufReader<tokio::fs::File>>,
    position: u64,
}

impl FileSource {
    /// Create a new file source
    pub fn new(config: FileSourceConfig) -> Self {
        Self {
            config,
            reader: None,
            position: 0,
        }
    }

    fn reader(&mut self) -> Result<&mut BufReader<tokio::fs::File>> {
        self.reader.as_mut().ok_or_else(|| Error::Read {
            message: format!("source '{}' is not open", self.config.path.display()),
            transient: false,
        })
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    async fn open(&mut self) -> Result<()> {
        tracing::info!("Opening file \"{}\" for reading", self.config.path.display());
        let file = tokio::fs::File::open(&self.config.path)
            .await
            .map_err(|e| Error::Open {
                location: self.config.path.display().to_string(),
                message: e.to_string(),
            })?;
        self.reader = Some(BufReader::new(file));
        self.position = 0;
        Ok(())
    }

    async fn seek(&mut self, index: &PositionIndex) -> Result<()> {
        let offset = index.as_u64().ok_or_else(|| Error::Seek {
            index: index.to_string(),
            message: "file positions are non-negative byte offsets".to_string(),
        })?;

        let reader = self.reader()?;
        let len = reader
            .get_ref()
            .metadata()
            .await
            .map_err(|e| Error::Seek {
                index: index.to_string(),
                message: e.to_string(),
            })?
            .len();
        if offset > len {
            return Err(Error::Seek {
                index: index.to_string(),
                message: format!("file is only {len} bytes long"),
            });
        }

        tracing::info!("Seeking to position {}", offset);
        reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::Seek {
                index: index.to_string(),
                message: e.to_string(),
            })?;
        self.position = offset;
        Ok(())
    }

    async fn read(&mut self) -> Result<ReadOutcome> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let reader = self.reader()?;
            let bytes_read = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(Error::read_io)?;
            if bytes_read == 0 {
                return Ok(ReadOutcome::EndOfData);
            }
            if !line.ends_with(b"\n") {
                // writer has not finished this line yet; pick it up on a later read
                let position = self.position;
                self.reader()?
                    .seek(SeekFrom::Start(position))
                    .await
                    .map_err(Error::read_io)?;
                return Ok(ReadOutcome::EndOfData);
            }

            let start = self.position;
            self.position += bytes_read as u64;
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            tracing::debug!(
                "Read line at byte {}: {:?}",
                start,
                String::from_utf8_lossy(trimmed)
            );
            let record: Record = serde_json::from_slice(trimmed).map_err(|e| Error::Read {
                message: format!("invalid record at byte {start}: {e}"),
                transient: false,
            })?;
            return Ok(ReadOutcome::Record(record));
        }
    }

    fn current_index(&self) -> PositionIndex {
        PositionIndex::from(self.position)
    }

    fn beginning(&self) -> PositionIndex {
        PositionIndex::from(0)
    }

    async fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            tracing::info!("Closing file \"{}\"", self.config.path.display());
        }
        Ok(())
    }
}

// ============================================================================
// File Publisher
// ============================================================================

/// Publisher appending JSON-lines records to a file
pub struct FilePublisher {
    config: FilePublisherConfig,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl FilePublisher {
    /// Create a new file publisher
    pub fn new(config: FilePublisherConfig) -> Self {
        Self {
            config,
            writer: None,
        }
    }

    async fn ensure_writer(&mut self) -> Result<&mut BufWriter<tokio::fs::File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.config.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(Error::publish_io)?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.config.path)
                .await
                .map_err(Error::publish_io)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer.as_mut().ok_or_else(|| Error::Publish {
            message: "writer unavailable".to_string(),
            transient: false,
        })
    }
}

#[async_trait]
impl RecordPublisher for FilePublisher {
    async fn publish(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let writer = self.ensure_writer().await?;
        writer.write_all(&line).await.map_err(Error::publish_io)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let sync = self.config.sync;
        if let Some(writer) = self.writer.as_mut() {
            let flush_err = |e: std::io::Error| Error::Flush {
                message: e.to_string(),
            };
            writer.flush().await.map_err(flush_err)?;
            if sync {
                writer.get_ref().sync_data().await.map_err(flush_err)?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.writer = None;
        Ok(())
    }
}

// ============================================================================
// In-memory adapters (embedding and tests)
// ============================================================================

/// Source replaying a fixed list of records.
///
/// The index is the number of records consumed so far.
pub struct MemorySource {
    records: Vec<Record>,
    cursor: usize,
    open: bool,
}

impl MemorySource {
    /// Create a source over `records`
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            cursor: 0,
            open: false,
        }
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    async fn open(&mut self) -> Result<()> {
        self.open = true;
        self.cursor = 0;
        Ok(())
    }

    async fn seek(&mut self, index: &PositionIndex) -> Result<()> {
        let cursor = index
            .as_u64()
            .map(|c| c as usize)
            .filter(|c| *c <= self.records.len())
            .ok_or_else(|| Error::Seek {
                index: index.to_string(),
                message: format!("source holds {} records", self.records.len()),
            })?;
        self.cursor = cursor;
        Ok(())
    }

    async fn read(&mut self) -> Result<ReadOutcome> {
        if !self.open {
            return Err(Error::Read {
                message: "memory source is not open".to_string(),
                transient: false,
            });
        }
        match self.records.get(self.cursor) {
            Some(record) => {
                self.cursor += 1;
                Ok(ReadOutcome::Record(record.clone()))
            }
            None => Ok(ReadOutcome::EndOfData),
        }
    }

    fn current_index(&self) -> PositionIndex {
        PositionIndex::from(self.cursor as u64)
    }

    fn beginning(&self) -> PositionIndex {
        PositionIndex::from(0)
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Records durably accepted by a [`MemoryPublisher`], shared with observers
#[derive(Debug, Clone, Default)]
pub struct Delivered(Arc<Mutex<Vec<Record>>>);

impl Delivered {
    /// Snapshot of everything delivered so far, in delivery order
    pub fn records(&self) -> Vec<Record> {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of delivered records
    pub fn len(&self) -> usize {
        self.0.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Whether nothing was delivered yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publisher buffering records in memory until `flush` delivers them
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    pending: Vec<Record>,
    delivered: Delivered,
}

impl MemoryPublisher {
    /// Create a publisher with its own delivery log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher appending to an existing delivery log
    pub fn with_delivered(delivered: Delivered) -> Self {
        Self {
            pending: Vec::new(),
            delivered,
        }
    }

    /// Handle to the delivery log
    pub fn delivered(&self) -> Delivered {
        self.delivered.clone()
    }

    /// Records published but not yet flushed
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }
}

#[async_trait]
impl RecordPublisher for MemoryPublisher {
    async fn publish(&mut self, record: &Record) -> Result<()> {
        self.pending.push(record.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let mut delivered = self.delivered.0.lock().map_err(|_| Error::Flush {
            message: "delivery log poisoned".to_string(),
        })?;
        delivered.append(&mut self.pending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_source(dir: &TempDir, contents: &str) -> FileSourceConfig {
        let path = dir.path().join("source.jsonl");
        std::fs::write(&path, contents).unwrap();
        FileSourceConfig { path }
    }

    async fn read_record(source: &mut dyn SourceAdapter) -> Record {
        match source.read().await.unwrap() {
            ReadOutcome::Record(record) => record,
            ReadOutcome::EndOfData => panic!("Expected a record"),
        }
    }

    #[test]
    fn test_parse_file_source() {
        let yaml = r#"
type: file
path: "./data/input.jsonl"
"#;
        let config: SourceConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            SourceConfig::File(f) => assert_eq!(f.path, PathBuf::from("./data/input.jsonl")),
        }
    }

    #[test]
    fn test_parse_file_publisher_default_sync() {
        let yaml = r#"
type: file
path: "./data/output.jsonl"
"#;
        let config: PublisherConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            PublisherConfig::File(f) => {
                assert_eq!(f.path, PathBuf::from("./data/output.jsonl"));
                assert!(f.sync); // default
            }
        }
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let yaml = "type: socket\npath: /tmp/x\n";
        assert!(serde_yaml::from_str::<SourceConfig>(yaml).is_err());
    }

    #[tokio::test]
    async fn test_file_source_reads_records_and_offsets() {
        let dir = TempDir::new().unwrap();
        let line1 = r#"{"key": 1, "value": "a"}"#;
        let line2 = r#"{"key": 2, "value": "b"}"#;
        let config = write_source(&dir, &format!("{line1}\n{line2}\n"));
        let mut source = FileSource::new(config);
        source.open().await.unwrap();
        assert_eq!(source.current_index(), source.beginning());

        let first = read_record(&mut source).await;
        assert_eq!(first, Record::new(1, "a"));
        assert_eq!(source.current_index().as_u64(), Some(line1.len() as u64 + 1));

        let second = read_record(&mut source).await;
        assert_eq!(second.key, json!(2));
        assert_eq!(source.read().await.unwrap(), ReadOutcome::EndOfData);
    }

    #[tokio::test]
    async fn test_file_source_seek_resumes_after_record() {
        let dir = TempDir::new().unwrap();
        let config = write_source(
            &dir,
            "{\"key\":1,\"value\":1}\n{\"key\":2,\"value\":2}\n{\"key\":3,\"value\":3}\n",
        );

        let mut first = FileSource::new(config.clone());
        first.open().await.unwrap();
        read_record(&mut first).await;
        let index = first.current_index();
        first.close().await.unwrap();

        let mut resumed = FileSource::new(config);
        resumed.open().await.unwrap();
        resumed.seek(&index).await.unwrap();
        assert_eq!(read_record(&mut resumed).await, Record::new(2, 2));
    }

    #[tokio::test]
    async fn test_file_source_seek_to_beginning() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "{\"key\":1,\"value\":1}\n");
        let mut source = FileSource::new(config);
        source.open().await.unwrap();
        read_record(&mut source).await;
        let beginning = source.beginning();
        source.seek(&beginning).await.unwrap();
        assert_eq!(read_record(&mut source).await, Record::new(1, 1));
    }

    #[tokio::test]
    async fn test_file_source_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "{\"key\":1,\"value\":1}\n\n{\"key\":2,\"value\":2}\n");
        let mut source = FileSource::new(config);
        source.open().await.unwrap();
        read_record(&mut source).await;
        assert_eq!(read_record(&mut source).await.key, json!(2));
        assert_eq!(source.current_index().as_u64(), Some(41));
    }

    #[tokio::test]
    async fn test_file_source_waits_for_partial_line() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "{\"key\":1,\"value\":1}\n{\"key\":2,");
        let mut source = FileSource::new(config.clone());
        source.open().await.unwrap();
        read_record(&mut source).await;
        let after_first = source.current_index();

        assert_eq!(source.read().await.unwrap(), ReadOutcome::EndOfData);
        assert_eq!(source.current_index(), after_first);

        let mut file = std::fs::OpenOptions::new().append(true).open(&config.path).unwrap();
        std::io::Write::write_all(&mut file, b"\"value\":2}\n").unwrap();

        assert_eq!(read_record(&mut source).await, Record::new(2, 2));
    }

    #[tokio::test]
    async fn test_file_source_waits_for_split_multibyte_char() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.jsonl");
        // second line stops after the first byte of "é"
        let mut contents = b"{\"key\":1,\"value\":1}\n{\"key\":2,\"value\":\"".to_vec();
        contents.push(0xC3);
        std::fs::write(&path, &contents).unwrap();

        let mut source = FileSource::new(FileSourceConfig { path: path.clone() });
        source.open().await.unwrap();
        read_record(&mut source).await;
        let after_first = source.current_index();

        assert_eq!(source.read().await.unwrap(), ReadOutcome::EndOfData);
        assert_eq!(source.current_index(), after_first);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, &[0xA9, b'"', b'}', b'\n']).unwrap();

        assert_eq!(read_record(&mut source).await, Record::new(2, "é"));
        assert_eq!(
            source.current_index(),
            PositionIndex::from(contents.len() as u64 + 4)
        );
    }

    #[tokio::test]
    async fn test_file_source_invalid_json_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "not json\n");
        let mut source = FileSource::new(config);
        source.open().await.unwrap();
        let err = source.read().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("byte 0"));
    }

    #[tokio::test]
    async fn test_file_source_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut source = FileSource::new(FileSourceConfig {
            path: dir.path().join("missing.jsonl"),
        });
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[tokio::test]
    async fn test_file_source_rejects_bad_seek() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "{\"key\":1,\"value\":1}\n");
        let mut source = FileSource::new(config);
        source.open().await.unwrap();

        let past_end = source.seek(&PositionIndex::from(10_000)).await.unwrap_err();
        assert!(matches!(past_end, Error::Seek { .. }));

        let not_offset = source.seek(&PositionIndex::new("abc")).await.unwrap_err();
        assert!(matches!(not_offset, Error::Seek { .. }));
    }

    #[tokio::test]
    async fn test_file_source_read_before_open() {
        let dir = TempDir::new().unwrap();
        let config = write_source(&dir, "");
        let mut source = FileSource::new(config);
        assert!(source.read().await.is_err());
    }

    #[tokio::test]
    async fn test_file_publisher_appends_on_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/records.jsonl");
        let mut publisher = FilePublisher::new(FilePublisherConfig {
            path: path.clone(),
            sync: true,
        });

        publisher.publish(&Record::new(1, 1)).await.unwrap();
        publisher.publish(&Record::new(2, json!({"x": 2}))).await.unwrap();
        publisher.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<Record> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records, vec![Record::new(1, 1), Record::new(2, json!({"x": 2}))]);

        publisher.close().await.unwrap();
        let mut reopened = FilePublisher::new(FilePublisherConfig { path: path.clone(), sync: false });
        reopened.publish(&Record::new(3, 3)).await.unwrap();
        reopened.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_file_publisher_flush_without_publish() {
        let dir = TempDir::new().unwrap();
        let mut publisher = FilePublisher::new(FilePublisherConfig {
            path: dir.path().join("never.jsonl"),
            sync: true,
        });
        publisher.flush().await.unwrap();
        assert!(!dir.path().join("never.jsonl").exists());
    }

    #[tokio::test]
    async fn test_memory_source_resume() {
        let mut source = MemorySource::new(vec![Record::new(-1, -1), Record::new(4, 4)]);
        source.open().await.unwrap();
        source.seek(&PositionIndex::from(1)).await.unwrap();
        assert_eq!(read_record(&mut source).await, Record::new(4, 4));
        assert_eq!(source.current_index().as_u64(), Some(2));
        assert_eq!(source.read().await.unwrap(), ReadOutcome::EndOfData);
        assert!(source.seek(&PositionIndex::from(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_publisher_delivers_on_flush() {
        let mut publisher = MemoryPublisher::new();
        let delivered = publisher.delivered();

        publisher.publish(&Record::new(1, 1)).await.unwrap();
        assert_eq!(publisher.pending().len(), 1);
        assert!(delivered.is_empty());

        publisher.flush().await.unwrap();
        assert!(publisher.pending().is_empty());
        assert_eq!(delivered.records(), vec![Record::new(1, 1)]);
    }
}
