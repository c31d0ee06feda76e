// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;

use crate::{
    entry::{Entry, EntryType},
    stream,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("No {0:?} entry in image")]
    MissingEntry(EntryType),
    #[error("No entry is currently open for reading")]
    NoOpenEntry,
    #[error("Unexpected EOF in {0:?} entry")]
    UnexpectedEof(EntryType),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy)]
struct SegmentEntry {
    kind: EntryType,
    offset: u64,
    size: u32,
    /// Whether the segment may be shorter than its stored size because the
    /// image was truncated. Reads from such a segment clamp at EOF instead
    /// of failing.
    optional: bool,
}

/// Table of the segments in a parsed image, plus the cursor state for
/// reading them.
///
/// The table never trusts the stream position: every operation seeks to
/// wherever it needs to be.
#[derive(Default)]
pub struct SegmentTable {
    entries: Vec<SegmentEntry>,
    /// Index of the open entry and the read position within it.
    state: Option<(usize, u64)>,
}

impl SegmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.state = None;
    }

    /// Append a segment. Segments must be added in layout order and each
    /// type may appear only once.
    pub fn add(&mut self, kind: EntryType, offset: u64, size: u32, optional: bool) {
        debug_assert!(self.entries.iter().all(|e| e.kind != kind));
        debug_assert!(self.entries.last().is_none_or(|e| e.offset <= offset));

        self.entries.push(SegmentEntry {
            kind,
            offset,
            size,
            optional,
        });
    }

    /// Advance to the next segment and seek the stream to its start.
    /// Returns `None` once all segments have been visited.
    pub fn read_entry(&mut self, mut file: impl Seek) -> Result<Option<Entry>> {
        let next = match self.state {
            None => 0,
            Some((index, _)) => index + 1,
        };

        let Some(entry) = self.entries.get(next) else {
            self.state = Some((self.entries.len(), 0));
            return Ok(None);
        };

        file.seek(SeekFrom::Start(entry.offset))?;
        self.state = Some((next, 0));

        Ok(Some(Entry {
            kind: entry.kind,
            offset: entry.offset,
            size: entry.size,
        }))
    }

    /// Jump to the segment of the given type and seek the stream to its
    /// start.
    pub fn go_to_entry(&mut self, mut file: impl Seek, kind: EntryType) -> Result<Entry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.kind == kind)
            .ok_or(Error::MissingEntry(kind))?;
        let entry = self.entries[index];

        file.seek(SeekFrom::Start(entry.offset))?;
        self.state = Some((index, 0));

        Ok(Entry {
            kind: entry.kind,
            offset: entry.offset,
            size: entry.size,
        })
    }

    /// Read from the open segment, clamped to the bytes remaining in it.
    /// Returns 0 at the end of the segment, which is distinct from the end
    /// of the stream: a stream that ends inside a required segment is an
    /// error.
    pub fn read_data(&mut self, mut file: impl Read + Seek, buf: &mut [u8]) -> Result<usize> {
        let Some((index, pos)) = self.state else {
            return Err(Error::NoOpenEntry);
        };
        let Some(entry) = self.entries.get(index) else {
            return Err(Error::NoOpenEntry);
        };

        let to_read = (u64::from(entry.size) - pos).min(buf.len() as u64) as usize;
        if to_read == 0 {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(entry.offset + pos))?;

        let n = stream::read_up_to(&mut file, &mut buf[..to_read])?;
        if n < to_read && !entry.optional {
            return Err(Error::UnexpectedEof(entry.kind));
        }

        self.state = Some((index, pos + n as u64));

        Ok(n)
    }

    /// The segment the table is currently positioned in, if any.
    pub fn current_entry(&self) -> Option<Entry> {
        let (index, _) = self.state?;
        let entry = self.entries.get(index)?;

        Some(Entry {
            kind: entry.kind,
            offset: entry.offset,
            size: entry.size,
        })
    }
}
