use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::err::{FormatError, FormatResult};

// Inspired by https://github.com/mitsuhiko/unbox/src/formats/cab.rs
pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

/// A randomly addressable, immutable byte source (the hive file contents).
///
/// Every read carries its own offset, so a single source can be shared between concurrent
/// traversals without a shared cursor.
pub trait ReadAt: Send + Sync {
    /// Read into `buf` starting at `offset`, returning how many bytes were read.
    ///
    /// Reading at or past the end returns `Ok(0)`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_at_slice(data: &[u8], offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let Ok(start) = usize::try_from(offset) else {
        return Ok(0);
    };
    let Some(available) = data.get(start..) else {
        return Ok(0);
    };

    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    Ok(n)
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_at_slice(self, offset, buf)
    }

    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }
}

impl ReadAt for &[u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_at_slice(self, offset, buf)
    }

    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }
}

impl ReadAt for File {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn len(&self) -> u64 {
        self.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

/// Adapts any `Read + Seek` stream to [`ReadAt`].
///
/// The stream has a single cursor, so every positioned read takes a lock for its seek+read pair.
pub struct SeekSource<R: ReadSeek> {
    inner: Mutex<R>,
    len: u64,
}

impl<R: ReadSeek> SeekSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        Ok(SeekSource {
            inner: Mutex::new(inner),
            len,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<R: ReadSeek + Send> ReadAt for SeekSource<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Fill as much of `buf` as the source holds at `offset`.
///
/// Fails with `OffsetOutOfRange` only when `offset` itself is past the end; a short read near the
/// end of the source returns the number of bytes actually available.
pub(crate) fn read_available<S: ReadAt + ?Sized>(
    source: &S,
    offset: u64,
    buf: &mut [u8],
) -> FormatResult<usize> {
    if offset >= source.len() {
        return Err(FormatError::OffsetOutOfRange {
            offset,
            len: source.len(),
        });
    }

    let mut filled = 0;
    while filled < buf.len() {
        let n = source
            .read_at(offset + filled as u64, &mut buf[filled..])
            .map_err(|e| FormatError::FailedToRead { offset, source: e })?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read exactly `buf.len()` bytes at `offset`.
pub(crate) fn read_exact_at<S: ReadAt + ?Sized>(
    source: &S,
    offset: u64,
    buf: &mut [u8],
    what: &'static str,
) -> FormatResult<()> {
    let n = read_available(source, offset, buf)?;
    if n < buf.len() {
        return Err(FormatError::TruncatedRecord {
            what,
            offset,
            need: buf.len(),
            have: n,
        });
    }
    Ok(())
}
