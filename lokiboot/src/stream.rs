// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Seek, SeekFrom};

use memchr::memmem;
use num_traits::ToPrimitive;

/// Size of the sliding window used by [`PatternSearcher`].
const SEARCH_BUF_SIZE: usize = 8192;

/// Extensions for readers to read fixed-size buffers.
pub trait ReadFixedSizeExt {
    /// Read fixed-size array.
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]>;

    /// Read fixed-sized [`Vec`].
    fn read_vec_exact(&mut self, size: usize) -> io::Result<Vec<u8>>;
}

impl<R: Read> ReadFixedSizeExt for R {
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_vec_exact(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Read until `buf` is full or the reader reaches EOF. Unlike
/// [`Read::read_exact`], a short result is not an error.
pub fn read_up_to(mut reader: impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }

        filled += n;
    }

    Ok(filled)
}

/// Streaming substring search over a seekable reader.
///
/// The searcher tracks its own file position and seeks before every window
/// read, so the caller is free to move the stream between
/// [`PatternSearcher::next_match`] calls, eg. to inspect bytes around a
/// match.
pub struct PatternSearcher<'n> {
    finder: memmem::Finder<'n>,
    pos: u64,
    end: u64,
    buf: Vec<u8>,
}

impl<'n> PatternSearcher<'n> {
    /// Search for `needle` within `[start, end)`. Pass [`u64::MAX`] as the
    /// end bound to search to EOF.
    pub fn new(needle: &'n [u8], start: u64, end: u64) -> Self {
        Self {
            finder: memmem::Finder::new(needle),
            pos: start,
            end,
            buf: vec![0u8; SEARCH_BUF_SIZE],
        }
    }

    /// Find the next match at or after the current position. Matches do not
    /// overlap: the search resumes past the end of a reported match.
    pub fn next_match(&mut self, mut file: impl Read + Seek) -> io::Result<Option<u64>> {
        let needle_len = self.finder.needle().len();
        if needle_len == 0 || needle_len > self.buf.len() {
            return Ok(None);
        }

        loop {
            if self.pos >= self.end || self.end - self.pos < needle_len as u64 {
                return Ok(None);
            }

            file.seek(SeekFrom::Start(self.pos))?;

            let window = (self.end - self.pos).min(self.buf.len() as u64) as usize;
            let n = read_up_to(&mut file, &mut self.buf[..window])?;
            if n < needle_len {
                return Ok(None);
            }

            if let Some(index) = self.finder.find(&self.buf[..n]) {
                let offset = self.pos + index as u64;
                self.pos = offset + needle_len as u64;
                return Ok(Some(offset));
            }

            if n < window {
                // EOF
                return Ok(None);
            }

            // Overlap the windows so a match spanning the boundary is still
            // found.
            self.pos += (n - (needle_len - 1)) as u64;
        }
    }
}

/// A reader wrapper that only allows reading a specific section of a file.
pub struct SectionReader<R> {
    inner: R,
    start: u64,
    size: u64,
    pos: u64,
}

impl<R: Read + Seek> SectionReader<R> {
    pub fn new(mut inner: R, start: u64, size: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;

        Ok(Self {
            inner,
            start,
            size,
            pos: 0,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SectionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = self.size.saturating_sub(self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..to_read])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SectionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(o) => o,
            SeekFrom::End(o) => self
                .size
                .to_i64()
                .and_then(|s| s.checked_add(o))
                .and_then(|s| s.to_u64())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Offset would be before the start of the file",
                    )
                })?,
            SeekFrom::Current(o) => self
                .pos
                .to_i64()
                .and_then(|s| s.checked_add(o))
                .and_then(|s| s.to_u64())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Offset would be before the start of the file",
                    )
                })?,
        };

        let raw_pos = self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(raw_pos - self.start)
    }
}
