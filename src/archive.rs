// src/archive.rs

//! Streaming tar generator for build contexts
//!
//! The build endpoint expects the whole context as a tar upload. Instead of
//! assembling the archive in memory, [`TarStream`] produces it chunk by chunk:
//! a header block, the entry content in bounded pieces, zero padding up to
//! the next 512-byte boundary, and finally the two zero blocks that end an
//! archive. [`TarReader`] adapts the chunks to [`Read`] for the HTTP upload.
//!
//! Output is deterministic: entries keep their input order, and headers carry
//! a fixed mtime and root ownership, so identical inputs give identical bytes.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Tar block size
pub const BLOCK_SIZE: usize = 512;

/// Upper bound on a content chunk
const CHUNK_SIZE: usize = 64 * 1024;

/// Where an entry's content comes from
#[derive(Debug, Clone)]
pub enum EntrySource {
    /// Generated content held in memory
    Bytes { data: Vec<u8>, mode: u32 },
    /// A file on disk, opened only when the entry is reached
    File(PathBuf),
}

/// One archive member
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub source: EntrySource,
}

impl ArchiveEntry {
    /// In-memory entry with mode 0644
    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::bytes_with_mode(name, data, 0o644)
    }

    pub fn bytes_with_mode(name: impl Into<String>, data: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Bytes {
                data: data.into(),
                mode,
            },
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::File(path.into()),
        }
    }
}

/// Entry currently being streamed
enum Current {
    Memory { data: Vec<u8>, offset: usize },
    Disk { file: File, left: u64 },
}

/// Pull-based tar archive generator
pub struct TarStream {
    pending: VecDeque<ArchiveEntry>,
    current: Option<(Current, u64)>,
    finished: bool,
}

impl TarStream {
    pub fn new(entries: impl IntoIterator<Item = ArchiveEntry>) -> Self {
        Self {
            pending: entries.into_iter().collect(),
            current: None,
            finished: false,
        }
    }

    /// Adapt the generator to [`Read`]
    pub fn into_reader(self) -> TarReader {
        TarReader::new(self)
    }

    fn start_entry(&mut self, entry: ArchiveEntry) -> io::Result<Vec<u8>> {
        let (current, size, mode) = match entry.source {
            EntrySource::Bytes { data, mode } => {
                let size = data.len() as u64;
                (Current::Memory { data, offset: 0 }, size, mode)
            }
            EntrySource::File(path) => {
                let file = File::open(&path).map_err(|e| {
                    io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
                })?;
                let metadata = file.metadata()?;
                let mode = if metadata.permissions().mode() & 0o111 != 0 {
                    0o755
                } else {
                    0o644
                };
                let size = metadata.len();
                (Current::Disk { file, left: size }, size, mode)
            }
        };

        let header = header_block(&entry.name, size, mode)?;
        self.current = Some((current, size));
        Ok(header)
    }

    fn next_content(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some((current, size)) = self.current.as_mut() else {
            return Ok(None);
        };

        let chunk = match current {
            Current::Memory { data, offset } => {
                if *offset < data.len() {
                    let end = (*offset + CHUNK_SIZE).min(data.len());
                    let chunk = data[*offset..end].to_vec();
                    *offset = end;
                    Some(chunk)
                } else {
                    None
                }
            }
            Current::Disk { file, left } => {
                if *left > 0 {
                    let want = (*left).min(CHUNK_SIZE as u64) as usize;
                    let mut chunk = vec![0u8; want];
                    let mut filled = 0;
                    while filled < want {
                        let n = file.read(&mut chunk[filled..])?;
                        if n == 0 {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "file shrank while being archived",
                            ));
                        }
                        filled += n;
                    }
                    *left -= want as u64;
                    Some(chunk)
                } else {
                    None
                }
            }
        };

        if chunk.is_some() {
            return Ok(chunk);
        }

        // Content done: pad to the block boundary and move on
        let padding = padding_for(*size);
        self.current = None;
        if padding > 0 {
            Ok(Some(vec![0u8; padding]))
        } else {
            self.next_content()
        }
    }
}

impl Iterator for TarStream {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_content() {
            Ok(Some(chunk)) => return Some(Ok(chunk)),
            Ok(None) => {}
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        }

        match self.pending.pop_front() {
            Some(entry) => {
                let result = self.start_entry(entry);
                if result.is_err() {
                    self.finished = true;
                }
                Some(result)
            }
            None => {
                self.finished = true;
                Some(Ok(vec![0u8; BLOCK_SIZE * 2]))
            }
        }
    }
}

/// [`Read`] adapter over a [`TarStream`]
pub struct TarReader {
    stream: TarStream,
    buffer: Vec<u8>,
    offset: usize,
}

impl TarReader {
    pub fn new(stream: TarStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for TarReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.buffer.len() {
            match self.stream.next() {
                Some(chunk) => {
                    self.buffer = chunk?;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.buffer.len() - self.offset);
        buf[..n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

fn padding_for(size: u64) -> usize {
    let rem = (size % BLOCK_SIZE as u64) as usize;
    if rem == 0 { 0 } else { BLOCK_SIZE - rem }
}

/// Name given to the GNU extension header carrying a long member name
const LONG_LINK: &[u8] = b"././@LongLink";

/// Header block(s) for a member
///
/// Names that do not fit the 100-byte header field are preceded by a GNU
/// long name entry holding the full name; the real header keeps a truncated
/// copy.
fn header_block(name: &str, size: u64, mode: u32) -> io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    let mut out = Vec::with_capacity(BLOCK_SIZE);
    let field_len = header.as_old().name.len();
    if name.len() < field_len {
        header.set_path(name)?;
    } else {
        out.extend_from_slice(&long_name_blocks(name.as_bytes()));
        let field = &mut header.as_old_mut().name;
        field.copy_from_slice(&name.as_bytes()[..field_len]);
    }
    header.set_cksum();
    out.extend_from_slice(header.as_bytes());
    Ok(out)
}

/// A `././@LongLink` header followed by the NUL-terminated name, padded
fn long_name_blocks(name: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..LONG_LINK.len()].copy_from_slice(LONG_LINK);
    header.set_entry_type(tar::EntryType::GNULongName);
    header.set_size(name.len() as u64 + 1);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();

    let mut out = header.as_bytes().to_vec();
    out.extend_from_slice(name);
    out.push(0);
    out.resize(out.len() + padding_for(name.len() as u64 + 1), 0);
    out
}
