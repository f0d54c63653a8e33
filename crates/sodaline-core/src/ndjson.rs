//! Newline-delimited JSON output: per-batch temp files and the append-only
//! main stream.
//!
//! Every record becomes exactly one line. `serde_json` escapes control
//! characters inside strings and leaves non-ASCII text as-is, so a line never
//! spans two records and accented text stays readable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

/// Buffer size for writing and scanning NDJSON files (256KB)
const BUF_SIZE: usize = 256 * 1024;

fn write_records<W: Write>(out: W, records: &[Value]) -> io::Result<W> {
    let mut out = BufWriter::with_capacity(BUF_SIZE, out);
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(io::Error::other)?;
        out.write_all(b"\n")?;
    }
    out.into_inner().map_err(|e| e.into_error())
}

/// Write `records` to a fresh file at `path` (truncating), one per line, and
/// sync it to disk.
pub fn write_batch_file(path: &Path, records: &[Value]) -> io::Result<()> {
    let file = write_records(File::create(path)?, records)?;
    file.sync_all()
}

/// What [`NdjsonOutput::repair_tail`] found at the end of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailRepair {
    /// Line count matches the committed records
    Clean,
    /// Uncommitted lines (and possibly a torn final line) were cut off
    Trimmed { lines: u64, bytes: u64 },
    /// Fewer lines than committed; nothing can be done here
    Short { found: u64 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    /// Complete (newline-terminated) lines seen
    lines: u64,
    /// Byte offset just past the last newline seen
    end: u64,
    /// Bytes read
    len: u64,
}

/// The append-only main output stream.
#[derive(Debug, Clone)]
pub struct NdjsonOutput {
    path: PathBuf,
}

impl NdjsonOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file empty if it does not exist; never truncates.
    pub fn ensure_exists(&self) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
    }

    /// Append `records`, one JSON line each, and sync before returning.
    pub fn append(&self, records: &[Value]) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let file = write_records(file, records)?;
        file.sync_data()
    }

    /// Size in bytes (0 when absent)
    pub fn len(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of complete lines in the stream
    pub fn count_lines(&self) -> io::Result<u64> {
        Ok(self.scan(None)?.lines)
    }

    /// Read up to `stop_after` lines (all when `None`)
    fn scan(&self, stop_after: Option<u64>) -> io::Result<Scan> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Scan::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::with_capacity(BUF_SIZE, file);
        let mut scan = Scan::default();
        if stop_after == Some(0) {
            return Ok(scan);
        }
        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(scan);
            }
            let n = buf.len();
            for (i, _) in buf.iter().enumerate().filter(|(_, b)| **b == b'\n') {
                scan.lines += 1;
                scan.end = scan.len + i as u64 + 1;
                if stop_after == Some(scan.lines) {
                    scan.len = scan.end;
                    return Ok(scan);
                }
            }
            scan.len += n as u64;
            reader.consume(n);
        }
    }

    /// Cut the stream back to its first `committed` lines.
    ///
    /// Lines past `committed` were appended by a batch whose ledger update
    /// never landed; the batch is still pending and will append them again,
    /// so they are removed. A trailing partial line is removed too.
    pub fn repair_tail(&self, committed: u64) -> io::Result<TailRepair> {
        let full = self.scan(None)?;
        if full.lines < committed {
            return Ok(TailRepair::Short { found: full.lines });
        }
        if full.lines == committed && full.end == full.len {
            return Ok(TailRepair::Clean);
        }

        let keep = self.scan(Some(committed))?.end;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(keep)?;
        file.sync_all()?;
        Ok(TailRepair::Trimmed {
            lines: full.lines - committed,
            bytes: full.len - keep,
        })
    }
}
