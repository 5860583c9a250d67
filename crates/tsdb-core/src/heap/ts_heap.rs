//! Append-only heap of fixed-length time series (spec 4.1).
//!
//! Grounded on `original_source/tsdb/heaps.py`'s `TSHeap` (4-byte length
//! header, `struct.pack`/`unpack` of `2*L` doubles per record) and on the
//! teacher's `db/message_log.rs` for the Rust idiom of a single append-only
//! file with an explicit write pointer and `#[tracing::instrument]`-ed I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::HeapError;
use crate::types::TimeSeries;

const HEADER_BYTES: u64 = 4;

pub struct TsHeap {
    file: File,
    path: PathBuf,
    l: u32,
    write_offset: u64,
}

impl TsHeap {
    /// Opens (or creates) the heap at `path`, enforcing that the series
    /// length matches what's already on disk.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display(), l))]
    pub fn open(path: impl AsRef<Path>, l: u32) -> Result<Self, HeapError> {
        let path = path.as_ref().to_path_buf();
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("opening ts heap at {}", path.display()))
            .map_err(|source| HeapError::Open {
                path: path.clone(),
                source,
            })?;

        if is_new {
            file.write_all(&l.to_le_bytes())?;
            file.flush()?;
        } else {
            let mut header = [0u8; HEADER_BYTES as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            let stored = u32::from_le_bytes(header);
            if stored != l {
                return Err(HeapError::LengthMismatch {
                    expected: stored,
                    actual: l,
                });
            }
        }

        let write_offset = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            path,
            l,
            write_offset,
        })
    }

    pub fn series_length(&self) -> u32 {
        self.l
    }

    fn record_bytes(&self) -> u64 {
        2 * self.l as u64 * 8
    }

    /// Appends `ts` to the heap, returning the byte offset of the new
    /// record.
    #[tracing::instrument(skip_all)]
    pub fn write(&mut self, ts: &TimeSeries) -> Result<u64, HeapError> {
        if ts.timestamps.len() != self.l as usize || ts.values.len() != self.l as usize {
            return Err(HeapError::WrongSeriesLength {
                expected: self.l,
                actual: ts.values.len(),
            });
        }

        let offset = self.write_offset;
        self.file.seek(SeekFrom::Start(offset))?;
        for t in &ts.timestamps {
            self.file.write_all(&t.to_le_bytes())?;
        }
        for v in &ts.values {
            self.file.write_all(&v.to_le_bytes())?;
        }
        self.file.flush()?;
        self.write_offset = offset + self.record_bytes();
        Ok(offset)
    }

    /// Reads the record at `offset`, decoding `2*L` little-endian doubles.
    #[tracing::instrument(skip_all)]
    pub fn read(&self, offset: u64) -> Result<TimeSeries, HeapError> {
        let record_bytes = self.record_bytes() as usize;
        let mut buf = vec![0u8; record_bytes];
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let read = read_as_much_as_possible(&mut file, &mut buf)?;
        if read != record_bytes {
            return Err(HeapError::ShortRead {
                offset,
                expected: record_bytes,
                actual: read,
            });
        }

        let l = self.l as usize;
        let mut timestamps = Vec::with_capacity(l);
        let mut values = Vec::with_capacity(l);
        for chunk in buf[..l * 8].chunks_exact(8) {
            timestamps.push(f64::from_le_bytes(chunk.try_into().unwrap()));
        }
        for chunk in buf[l * 8..].chunks_exact(8) {
            values.push(f64::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(TimeSeries::new(timestamps, values))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<(), HeapError> {
        self.file.flush()?;
        Ok(())
    }

    pub fn sync_all(&mut self) -> Result<(), HeapError> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn read_as_much_as_possible(file: &mut File, buf: &mut [u8]) -> Result<usize, HeapError> {
    let mut total = 0;
    loop {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if total == buf.len() {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ts(l: usize, seed: f64) -> TimeSeries {
        let timestamps = (0..l).map(|i| i as f64).collect();
        let values = (0..l).map(|i| i as f64 + seed).collect();
        TimeSeries::new(timestamps, values)
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heap_ts");
        let mut heap = TsHeap::open(&path, 4).unwrap();
        let a = ts(4, 0.0);
        let b = ts(4, 100.0);
        let off_a = heap.write(&a).unwrap();
        let off_b = heap.write(&b).unwrap();
        assert_ne!(off_a, off_b);
        assert_eq!(heap.read(off_a).unwrap(), a);
        assert_eq!(heap.read(off_b).unwrap(), b);
    }

    #[test]
    fn reopen_enforces_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heap_ts");
        {
            let _heap = TsHeap::open(&path, 4).unwrap();
        }
        let err = TsHeap::open(&path, 8).unwrap_err();
        assert!(matches!(err, HeapError::LengthMismatch { expected: 4, actual: 8 }));
    }

    #[test]
    fn reopen_reads_existing_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heap_ts");
        let off = {
            let mut heap = TsHeap::open(&path, 4).unwrap();
            heap.write(&ts(4, 7.0)).unwrap()
        };
        let heap = TsHeap::open(&path, 4).unwrap();
        assert_eq!(heap.read(off).unwrap(), ts(4, 7.0));
    }

    #[test]
    fn short_read_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heap_ts");
        let mut heap = TsHeap::open(&path, 4).unwrap();
        heap.write(&ts(4, 0.0)).unwrap();
        let err = heap.read(1_000_000).unwrap_err();
        assert!(matches!(err, HeapError::ShortRead { .. }));
    }
}
