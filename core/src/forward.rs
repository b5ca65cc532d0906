//! Forward database: an append-only log of `{gameId}{count}{hash...}` records.
//!
//! No header, no record count. The end of the log is the first record whose
//! leading length prefix cannot be read.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::codec;
use crate::error::CodecError;
use crate::persist::create_file;
use crate::PositionHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRecord {
    pub game_id: String,
    /// Sorted, distinct.
    pub positions: Vec<PositionHash>,
}

impl ForwardRecord {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(
            codec::INT_BYTES * 2 + self.game_id.len() + self.positions.len() * codec::LONG_BYTES,
        );
        codec::write_string(&mut buf, &self.game_id)?;
        codec::write_full_i64_array(&mut buf, &self.positions)?;
        Ok(buf)
    }
}

/// Shared append handle. Each record goes out in a single locked write.
pub struct ForwardDbWriter {
    path: PathBuf,
    out: Mutex<Option<BufWriter<File>>>,
}

impl ForwardDbWriter {
    /// Replaces any existing file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = create_file(path)?;
        tracing::info!(path = %path.display(), "forward database opened for writing");
        Ok(Self { path: path.to_path_buf(), out: Mutex::new(Some(BufWriter::new(file))) })
    }

    pub fn append(&self, record: &ForwardRecord) -> Result<()> {
        let bytes = record.encode()?;
        let mut out = self.out.lock();
        let w = out
            .as_mut()
            .with_context(|| format!("{} is already closed", self.path.display()))?;
        w.write_all(&bytes)
            .with_context(|| format!("appending {} to {}", record.game_id, self.path.display()))?;
        Ok(())
    }

    /// Flushes and closes the file. Later calls are no-ops.
    pub fn finish(&self) -> Result<()> {
        if let Some(mut w) = self.out.lock().take() {
            w.flush()?;
            w.get_ref().sync_all()?;
            tracing::info!(path = %self.path.display(), "forward database closed");
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ForwardDbWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!(path = %self.path.display(), "closing forward database: {e:#}");
        }
    }
}

/// Streams records back in file order.
pub struct ForwardDbReader<R: Read> {
    inner: R,
    records: u64,
    done: bool,
}

impl ForwardDbReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> ForwardDbReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, records: 0, done: false }
    }

    /// Records read so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    fn read_record(&mut self) -> Result<Option<ForwardRecord>, CodecError> {
        let game_id = match codec::read_string(&mut self.inner) {
            Ok(id) => id,
            Err(e) if e.is_clean_eof() => return Ok(None),
            Err(e) => return Err(e),
        };
        let positions = codec::read_full_i64_array(&mut self.inner)?;
        Ok(Some(ForwardRecord { game_id, positions }))
    }
}

impl<R: Read> Iterator for ForwardDbReader<R> {
    type Item = Result<ForwardRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => {
                self.records += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) if e.is_truncated() => {
                // a record cut short by an interrupted build; everything before it is intact
                tracing::warn!(records = self.records, "forward database ends with a torn record: {e}");
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(anyhow::Error::new(e).context("reading forward database")))
            }
        }
    }
}
