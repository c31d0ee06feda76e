// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Seek};

use thiserror::Error;

use crate::{
    entry::{Entry, EntryType},
    format::{android, loki, segment},
    header::Header,
    stream::SectionReader,
};

/// Lifecycle state of a [`Reader`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    New,
    Header,
    Entries,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown boot image format")]
    UnknownFormat,
    #[error("No boot image formats are enabled")]
    NoFormatsEnabled,
    #[error("Operation requires state {expected:?}, but reader is in state {actual:?}")]
    InvalidState { expected: State, actual: State },
    #[error("Loki format error")]
    Loki(#[from] loki::Error),
    #[error("Android header error")]
    Android(#[from] android::Error),
    #[error("Segment error")]
    Segment(#[from] segment::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One boot image format known to a [`Reader`].
///
/// A format caches whatever it learns while bidding so the read phase does
/// not repeat the scans.
pub trait FormatReader<R: Read + Seek> {
    /// Short name of the format, used to force a format by name.
    fn name(&self) -> &'static str;

    /// Weigh in on whether the stream is this format. Returns the number of
    /// matched magic bits, `Some(0)` for a miss, or `None` to decline when
    /// `best_bid` is already out of reach.
    fn bid(&mut self, file: &mut R, best_bid: u32) -> Result<Option<u32>>;

    /// Reconstruct the image header and populate the segment table.
    fn read_header(&mut self, file: &mut R) -> Result<Header>;

    /// Advance to the next segment.
    fn read_entry(&mut self, file: &mut R) -> Result<Option<Entry>>;

    /// Jump to the segment of the given type.
    fn go_to_entry(&mut self, file: &mut R, kind: EntryType) -> Result<Entry>;

    /// Read from the current segment. Returns 0 at the end of the segment.
    fn read_data(&mut self, file: &mut R, buf: &mut [u8]) -> Result<usize>;

    /// The segment the format is currently positioned in, if any.
    fn current_entry(&self) -> Option<Entry>;
}

/// Multiplexing boot image reader. Enabled formats place bids on the stream
/// and the best bidder parses it.
///
/// The reader owns the stream, but never assumes its position is preserved
/// across calls: every operation seeks to what it needs.
pub struct Reader<R: Read + Seek> {
    file: R,
    formats: Vec<Box<dyn FormatReader<R>>>,
    state: State,
    selected: Option<usize>,
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(file: R) -> Self {
        Self {
            file,
            formats: vec![],
            state: State::New,
            selected: None,
        }
    }

    /// Enable support for the Loki format.
    pub fn enable_format_loki(&mut self) {
        self.formats.push(Box::new(loki::LokiFormat::new()));
    }

    /// Force an enabled format by name, skipping the bid round.
    pub fn force_format(&mut self, name: &str) -> Result<()> {
        let index = self
            .formats
            .iter()
            .position(|f| f.name() == name)
            .ok_or(Error::UnknownFormat)?;

        self.selected = Some(index);

        Ok(())
    }

    /// Parse the image header. Unless a format was forced, each enabled
    /// format bids on the stream first and the highest nonzero bid wins.
    pub fn read_header(&mut self) -> Result<Header> {
        if self.state != State::New {
            return Err(Error::InvalidState {
                expected: State::New,
                actual: self.state,
            });
        }
        if self.formats.is_empty() {
            return Err(Error::NoFormatsEnabled);
        }

        let index = match self.selected {
            Some(index) => index,
            None => self.bid_round()?,
        };

        let header = self.formats[index].read_header(&mut self.file)?;

        self.selected = Some(index);
        self.state = State::Header;

        Ok(header)
    }

    fn bid_round(&mut self) -> Result<usize> {
        let mut best: Option<(usize, u32)> = None;

        for (index, format) in self.formats.iter_mut().enumerate() {
            let best_bid = best.map_or(0, |(_, bits)| bits);

            match format.bid(&mut self.file, best_bid)? {
                Some(bits) if bits > best_bid => best = Some((index, bits)),
                _ => {}
            }
        }

        match best {
            Some((index, bits)) if bits > 0 => Ok(index),
            _ => Err(Error::UnknownFormat),
        }
    }

    /// Advance to the next segment. Returns `None` once all segments have
    /// been visited.
    pub fn read_entry(&mut self) -> Result<Option<Entry>> {
        let index = self.require_header()?;

        let entry = self.formats[index].read_entry(&mut self.file)?;
        self.state = State::Entries;

        Ok(entry)
    }

    /// Jump to the segment of the given type.
    pub fn go_to_entry(&mut self, kind: EntryType) -> Result<Entry> {
        let index = self.require_header()?;

        let entry = self.formats[index].go_to_entry(&mut self.file, kind)?;
        self.state = State::Entries;

        Ok(entry)
    }

    /// Read from the current segment, clamped to the bytes remaining in it.
    /// Returns 0 at the end of the segment.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let index = self.require_entries()?;

        self.formats[index].read_data(&mut self.file, buf)
    }

    /// A substream over the current segment, bounded by its offset and size.
    pub fn entry_reader(&mut self) -> Result<SectionReader<&mut R>> {
        let index = self.require_entries()?;

        let entry = self.formats[index]
            .current_entry()
            .ok_or(Error::Segment(segment::Error::NoOpenEntry))?;

        Ok(SectionReader::new(
            &mut self.file,
            entry.offset,
            u64::from(entry.size),
        )?)
    }

    pub fn into_inner(self) -> R {
        self.file
    }

    fn require_header(&self) -> Result<usize> {
        match self.selected {
            Some(index) if self.state != State::New => Ok(index),
            _ => Err(Error::InvalidState {
                expected: State::Header,
                actual: self.state,
            }),
        }
    }

    fn require_entries(&self) -> Result<usize> {
        match self.selected {
            Some(index) if self.state == State::Entries => Ok(index),
            _ => Err(Error::InvalidState {
                expected: State::Entries,
                actual: self.state,
            }),
        }
    }
}
