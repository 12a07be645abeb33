use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Digest helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn digest_file(path: &Path) -> Result<String, TransferError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// One run of bytes read from a source, positioned within the whole.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

enum SourceInner {
    File(fs::File),
    Memory(Vec<u8>),
}

/// Reads an upload source in fixed-size chunks from a seekable offset.
///
/// Sources are either a local file or an in-memory byte buffer; both
/// support seeking to a resume offset so previously accepted bytes are
/// never re-read.
pub struct ChunkSource {
    inner: SourceInner,
    chunk_size: usize,
    offset: u64,
    len: u64,
}

impl ChunkSource {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = fs::File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: SourceInner::File(file),
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
            len,
        })
    }

    /// Wraps an in-memory buffer for chunked reading.
    pub fn from_bytes(data: Vec<u8>, chunk_size: usize) -> Self {
        let len = data.len() as u64;
        Self {
            inner: SourceInner::Memory(data),
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
            len,
        }
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if let SourceInner::File(file) = &mut self.inner {
            file.seek(SeekFrom::Start(offset))?;
        }
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at the end of the source.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.offset >= self.len {
            return Ok(None);
        }

        let want = (self.len - self.offset).min(self.chunk_size as u64) as usize;
        let data = match &mut self.inner {
            SourceInner::File(file) => {
                let mut buf = vec![0u8; want];
                let mut read = 0;
                while read < want {
                    let n = file.read(&mut buf[read..])?;
                    if n == 0 {
                        break;
                    }
                    read += n;
                }
                buf.truncate(read);
                buf
            }
            SourceInner::Memory(bytes) => {
                let start = self.offset as usize;
                bytes[start..start + want].to_vec()
            }
        };

        if data.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            offset: self.offset,
            data,
        };
        self.offset += chunk.data.len() as u64;
        Ok(Some(chunk))
    }

    /// Total source length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.len - self.offset.min(self.len)
    }
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// PartSink
// ---------------------------------------------------------------------------

/// Returns the in-progress sibling path for a download destination.
pub fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Writes downloaded byte runs into a `.part` sibling of the destination,
/// then atomically renames it into place on [`finalize`](Self::finalize).
///
/// Other readers never observe a partially written file under the final
/// name.
pub struct PartSink {
    final_path: PathBuf,
    part_path: PathBuf,
    file: fs::File,
}

impl PartSink {
    /// Opens (or creates) the part file for `dest`, keeping any existing
    /// partial data. Returns the sink and the current part length, which
    /// callers use as the verified-contiguous resume offset.
    pub fn open(dest: &Path) -> Result<(Self, u64), TransferError> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let part_path = part_path_for(dest);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&part_path)?;
        let existing = file.metadata()?.len();

        Ok((
            Self {
                final_path: dest.to_path_buf(),
                part_path,
                file,
            },
            existing,
        ))
    }

    /// Writes `data` at the exact byte offset.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Truncates the part file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> Result<(), TransferError> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Syncs and atomically renames the part file to the final path.
    pub fn finalize(self) -> Result<PathBuf, TransferError> {
        self.file.sync_all()?;
        drop(self.file);
        fs::rename(&self.part_path, &self.final_path)?;
        Ok(self.final_path)
    }

    /// Flushes buffered writes to disk without finalizing.
    pub fn sync(&mut self) -> Result<(), TransferError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Removes the part file, abandoning the partial data.
    pub fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.part_path);
    }

    /// Path of the in-progress part file.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest_bytes(b"hello"), digest_bytes(b"hello"));
        assert_ne!(digest_bytes(b"hello"), digest_bytes(b"world"));
        assert_eq!(digest_bytes(b"x").len(), 64);
    }

    #[test]
    fn digest_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"digest me";
        let path = write_file(dir.path(), "f.bin", data);
        assert_eq!(digest_file(&path).unwrap(), digest_bytes(data));
    }

    #[test]
    fn file_source_reads_all_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "f.bin", b"0123456789");

        let mut source = ChunkSource::open(&path, 4).unwrap();
        assert_eq!(source.len(), 10);

        let c1 = source.next_chunk().unwrap().unwrap();
        assert_eq!((c1.offset, c1.data.as_slice()), (0, b"0123".as_slice()));
        let c2 = source.next_chunk().unwrap().unwrap();
        assert_eq!((c2.offset, c2.data.as_slice()), (4, b"4567".as_slice()));
        let c3 = source.next_chunk().unwrap().unwrap();
        assert_eq!((c3.offset, c3.data.as_slice()), (8, b"89".as_slice()));
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn file_source_seek_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "f.bin", b"0123456789");

        let mut source = ChunkSource::open(&path, 4).unwrap();
        source.seek_to(6).unwrap();
        assert_eq!(source.remaining(), 4);

        let c = source.next_chunk().unwrap().unwrap();
        assert_eq!((c.offset, c.data.as_slice()), (6, b"6789".as_slice()));
    }

    #[test]
    fn memory_source_chunks_and_seeks() {
        let mut source = ChunkSource::from_bytes(b"abcdef".to_vec(), 4);
        source.seek_to(2).unwrap();

        let c1 = source.next_chunk().unwrap().unwrap();
        assert_eq!((c1.offset, c1.data.as_slice()), (2, b"cdef".as_slice()));
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn zero_chunk_size_uses_default() {
        let source = ChunkSource::from_bytes(vec![1], 0);
        assert_eq!(source.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path_for(Path::new("/tmp/out/movie.mp4")),
            Path::new("/tmp/out/movie.mp4.part")
        );
    }

    #[test]
    fn sink_writes_at_offsets_and_finalizes_atomically() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");

        let (mut sink, existing) = PartSink::open(&dest).unwrap();
        assert_eq!(existing, 0);

        sink.write_at(0, b"Hello").unwrap();
        sink.write_at(5, b" World").unwrap();

        // Final name must not exist before finalize.
        assert!(!dest.exists());
        assert!(sink.part_path().exists());

        let final_path = sink.finalize().unwrap();
        assert_eq!(final_path, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"Hello World");
        assert!(!part_path_for(&dest).exists());
    }

    #[test]
    fn sink_reopen_reports_existing_length() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");

        let (mut sink, _) = PartSink::open(&dest).unwrap();
        sink.write_at(0, b"partial").unwrap();
        sink.sync().unwrap();
        drop(sink);

        let (_, existing) = PartSink::open(&dest).unwrap();
        assert_eq!(existing, 7);
    }

    #[test]
    fn sink_discard_removes_part_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");

        let (mut sink, _) = PartSink::open(&dest).unwrap();
        sink.write_at(0, b"junk").unwrap();
        sink.discard();

        assert!(!part_path_for(&dest).exists());
        assert!(!dest.exists());
    }

    #[test]
    fn sink_creates_missing_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a/b/out.bin");

        let (mut sink, _) = PartSink::open(&dest).unwrap();
        sink.write_at(0, b"x").unwrap();
        sink.finalize().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"x");
    }

    #[test]
    fn source_to_sink_roundtrip() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let src = write_file(dir.path(), "src.txt", original);
        let dest = dir.path().join("dst.txt");

        let mut source = ChunkSource::open(&src, 10).unwrap();
        let (mut sink, _) = PartSink::open(&dest).unwrap();
        while let Some(chunk) = source.next_chunk().unwrap() {
            sink.write_at(chunk.offset, &chunk.data).unwrap();
        }
        sink.finalize().unwrap();

        assert_eq!(fs::read(&dest).unwrap(), original);
        assert_eq!(digest_file(&dest).unwrap(), digest_bytes(original));
    }
}
