//! Append-only log file and a sequential entry scanner.
//!
//! The log is a single file of concatenated entry frames. [`AppendLog`] only
//! ever appends; it never seeks, truncates or rewrites. Callers are expected
//! to serialize `append` calls so frames cannot interleave.

use crate::entry::{CorruptEntry, Entry};
use bytes::{Buf, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Corrupt entry at offset {offset}: {source}")]
    Corrupt { offset: u64, source: CorruptEntry },
}

/// Append-only handle to the pending log file.
#[derive(Debug)]
pub struct AppendLog {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

impl AppendLog {
    /// Opens the log for appending, creating it if absent.
    ///
    /// Existing contents are kept; new frames land after them.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(&path).await?;
        let bytes_written = file.metadata().await?.len();

        Ok(Self {
            file,
            path,
            bytes_written,
        })
    }

    /// Appends one encoded frame.
    ///
    /// Returns once the frame has been handed to the OS, so a failed write is
    /// reported by the call that made it.
    pub async fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame).await?;
        self.file.flush().await?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    /// Blocks until everything appended so far is on stable storage.
    pub async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Flushes, syncs data and metadata, and releases the handle.
    pub async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical end of the log, including bytes present before open.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Reads entries from a log file front to back.
///
/// Used for inspection; it does not rebuild any in-memory state.
pub struct EntryScanner {
    file: File,
    buf: BytesMut,
    offset: u64,
    eof: bool,
}

impl EntryScanner {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self {
            file,
            buf: BytesMut::with_capacity(READ_CHUNK),
            offset: 0,
            eof: false,
        })
    }

    /// Byte offset of the next frame to be decoded.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decodes the next entry, or returns `None` at a clean end of file.
    ///
    /// A frame cut short by the end of file is reported as corruption at the
    /// frame's offset.
    pub async fn next_entry(&mut self) -> Result<Option<Entry>, ScanError> {
        loop {
            if !self.buf.is_empty() {
                match Entry::decode(&self.buf) {
                    Ok((entry, size)) => {
                        self.buf.advance(size);
                        self.offset += size as u64;
                        return Ok(Some(entry));
                    }
                    Err(CorruptEntry::Incomplete) if !self.eof => {}
                    Err(source) => {
                        return Err(ScanError::Corrupt {
                            offset: self.offset,
                            source,
                        })
                    }
                }
            } else if self.eof {
                return Ok(None);
            }

            self.buf.reserve(READ_CHUNK);
            if self.file.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Drains the scanner into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<Entry>, ScanError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Reads every entry in the log at `path`.
pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<Entry>, ScanError> {
    EntryScanner::open(path).await?.collect_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");

        let log = AppendLog::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(log.bytes_written(), 0);
        assert_eq!(log.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_open_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("tx.log");

        let err = AppendLog::open(&path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(AppendLog::open(temp_dir.path()).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");
        AppendLog::open(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[tokio::test]
    async fn test_append_sync_and_scan() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");

        let entries = vec![
            Entry::add(1, 100, 0, b"first".as_slice()),
            Entry::add(2, 101, 2, b"second".as_slice()),
            Entry::commit(1, 102),
        ];

        let mut log = AppendLog::open(&path).await.unwrap();
        let mut expected_len = 0;
        for entry in &entries {
            let frame = entry.encode().unwrap();
            expected_len += frame.len() as u64;
            log.append(&frame).await.unwrap();
        }
        log.sync().await.unwrap();
        assert_eq!(log.bytes_written(), expected_len);

        let read = read_entries(&path).await.unwrap();
        assert_eq!(read, entries);
    }

    #[tokio::test]
    async fn test_reopen_appends_after_existing_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");

        {
            let mut log = AppendLog::open(&path).await.unwrap();
            log.append(&Entry::add(1, 0, 0, b"a".as_slice()).encode().unwrap())
                .await
                .unwrap();
            log.close().await.unwrap();
        }

        let mut log = AppendLog::open(&path).await.unwrap();
        assert!(log.bytes_written() > 0);
        log.append(&Entry::commit(1, 1).encode().unwrap())
            .await
            .unwrap();
        log.close().await.unwrap();

        let read = read_entries(&path).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1], Entry::commit(1, 1));
    }

    #[tokio::test]
    async fn test_scan_reports_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");

        let first = Entry::add(1, 0, 0, b"whole".as_slice()).encode().unwrap();
        let second = Entry::add(2, 0, 0, b"torn".as_slice()).encode().unwrap();

        let mut log = AppendLog::open(&path).await.unwrap();
        log.append(&first).await.unwrap();
        log.append(&second[..second.len() - 2]).await.unwrap();
        log.close().await.unwrap();

        let mut scanner = EntryScanner::open(&path).await.unwrap();
        assert_eq!(scanner.next_entry().await.unwrap().unwrap().id, 1);
        assert_eq!(scanner.offset(), first.len() as u64);

        match scanner.next_entry().await {
            Err(ScanError::Corrupt { offset, source }) => {
                assert_eq!(offset, first.len() as u64);
                assert_eq!(source, CorruptEntry::Incomplete);
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");
        AppendLog::open(&path).await.unwrap();

        assert!(read_entries(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_spans_read_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.log");

        let mut log = AppendLog::open(&path).await.unwrap();
        let payload = vec![0xABu8; 10_000];
        for id in 0..20 {
            let frame = Entry::add(id, 0, 0, payload.clone()).encode().unwrap();
            log.append(&frame).await.unwrap();
        }
        log.close().await.unwrap();

        let read = read_entries(&path).await.unwrap();
        assert_eq!(read.len(), 20);
        assert!(read.iter().enumerate().all(|(i, e)| e.id == i as i64));
        assert!(read.iter().all(|e| e.payload.len() == 10_000));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_append_error_reaches_each_caller() {
        // Every write to /dev/full fails with ENOSPC.
        let mut log = AppendLog::open("/dev/full").await.unwrap();
        let frame = Entry::add(1, 0, 0, b"x".as_slice()).encode().unwrap();

        for _ in 0..3 {
            let err = log.append(&frame).await.unwrap_err();
            assert_eq!(err.raw_os_error(), Some(28));
        }
        assert_eq!(log.bytes_written(), 0);
    }
}
