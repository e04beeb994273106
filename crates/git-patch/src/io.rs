//! Random-access line reading for patch application.
//!
//! The applier needs whole lines at arbitrary line numbers from the original
//! content. [`LineReaderAt`] builds a newline-offset index lazily over any
//! [`ReadAt`] source, extending it only as far as each request requires.

use std::io;

use bstr::BString;

/// Positioned reads from an immutable byte source, like `pread(2)`.
pub trait ReadAt {
    /// Read bytes starting at `offset`, filling as much of `buf` as possible.
    ///
    /// Returns the number of bytes read. A return value smaller than
    /// `buf.len()` means the end of the source was reached.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = (offset as usize).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        let mut read = 0;
        while read < buf.len() {
            let n = FileExt::read_at(self, &mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }
}

#[cfg(windows)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;

        let mut read = 0;
        while read < buf.len() {
            let n = self.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }
}

/// Reads whole lines at arbitrary zero-indexed line offsets.
///
/// The index stores the byte offset just past each line and grows on demand;
/// each lookup extends it until the requested line is indexed or the source
/// ends. The source must not change between reads.
pub struct LineReaderAt<R> {
    src: R,
    index: Vec<u64>,
    eof: bool,
}

impl<R: ReadAt> LineReaderAt<R> {
    pub fn new(src: R) -> Self {
        LineReaderAt {
            src,
            index: Vec::new(),
            eof: false,
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &R {
        &self.src
    }

    /// Read up to `count` lines starting at zero-indexed line `offset`.
    ///
    /// Each line includes its terminating newline. The returned flag is true
    /// when the read hit the end of the source: fewer lines were available
    /// than requested, or the last line has no trailing newline.
    pub fn read_lines_at(&mut self, count: usize, offset: u64) -> io::Result<(Vec<BString>, bool)> {
        if count == 0 {
            return Ok((Vec::new(), false));
        }

        let end_line = offset + count as u64;
        if end_line > self.index.len() as u64 && !self.eof {
            self.index_to(end_line)?;
        }
        if offset >= self.index.len() as u64 {
            return Ok((Vec::new(), true));
        }

        let (size, read_offset) = lookup_lines(&self.index, offset, count as u64);

        let mut buf = vec![0u8; size as usize];
        let n = self.src.read_at(&mut buf, read_offset)?;
        if n < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt line index or changed source data",
            ));
        }

        let mut lines = Vec::new();
        while lines.len() < count && offset + (lines.len() as u64) < self.index.len() as u64 {
            let i = offset as usize + lines.len();
            let start = if i > 0 { self.index[i - 1] } else { read_offset };
            let end = self.index[i];
            lines.push(BString::from(
                &buf[(start - read_offset) as usize..(end - read_offset) as usize],
            ));
        }

        let eof = lines.len() < count || buf.last() != Some(&b'\n');
        Ok((lines, eof))
    }

    /// Extend the line index until `line` lines are indexed or the source
    /// ends.
    fn index_to(&mut self, line: u64) -> io::Result<()> {
        let mut buf = [0u8; 1024];
        let mut offset = self.index.last().copied().unwrap_or(0);

        while (self.index.len() as u64) < line {
            let n = self.src.read_at(&mut buf, offset)?;
            for &b in &buf[..n] {
                offset += 1;
                if b == b'\n' {
                    self.index.push(offset);
                }
            }
            if n < buf.len() {
                // a final unterminated line still gets an index entry
                if offset > self.index.last().copied().unwrap_or(0) {
                    self.index.push(offset);
                }
                self.eof = true;
                break;
            }
        }
        Ok(())
    }
}

/// Byte size and start offset of `n` lines beginning at line `start`, from an
/// index whose entry `i` is the offset of the first byte after line `i`.
fn lookup_lines(index: &[u64], start: u64, n: u64) -> (u64, u64) {
    let last = index.last().copied().unwrap_or(0);

    let offset = if start > index.len() as u64 {
        last
    } else if start > 0 {
        index[start as usize - 1]
    } else {
        0
    };

    let size = if n == 0 {
        0
    } else if start + n > index.len() as u64 {
        last - offset
    } else {
        index[(start + n) as usize - 1] - offset
    };

    (size, offset)
}
