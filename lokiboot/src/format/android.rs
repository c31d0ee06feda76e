// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use bstr::ByteSlice;
use thiserror::Error;
use zerocopy::{FromBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{format::padding::ZeroPadding, stream::PatternSearcher};

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_MAGIC_SIZE: usize = 8;
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;

/// Maximum offset the Android magic may appear at.
pub const MAX_HEADER_OFFSET: u64 = 512;

/// Default kernel load address offset from the image base.
pub const DEFAULT_KERNEL_OFFSET: u32 = 0x0000_8000;
/// Default kernel tags address offset from the image base.
pub const DEFAULT_TAGS_OFFSET: u32 = 0x0000_0100;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Android magic not found in first {0} bytes")]
    MagicNotFound(u64),
    #[error("Too small to be Android image")]
    Truncated,
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout of the Samsung-era boot image header, which stores the
/// device tree size in the field AOSP later reused for the header version.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    magic: [u8; 8],
    kernel_size: little_endian::U32,
    kernel_addr: little_endian::U32,
    ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
    second_size: little_endian::U32,
    second_addr: little_endian::U32,
    tags_addr: little_endian::U32,
    page_size: little_endian::U32,
    dt_size: little_endian::U32,
    unused: little_endian::U32,
    name: [u8; BOOT_NAME_SIZE],
    cmdline: [u8; BOOT_ARGS_SIZE],
    id: [little_endian::U32; 8],
}

/// Android boot image header fields with integers in host byte order.
#[derive(Clone)]
pub struct AndroidHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub dt_size: u32,
    pub name: [u8; BOOT_NAME_SIZE],
    pub cmdline: [u8; BOOT_ARGS_SIZE],
}

impl fmt::Debug for AndroidHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AndroidHeader")
            .field("kernel_size", &self.kernel_size)
            .field("kernel_addr", &self.kernel_addr)
            .field("ramdisk_size", &self.ramdisk_size)
            .field("ramdisk_addr", &self.ramdisk_addr)
            .field("second_size", &self.second_size)
            .field("second_addr", &self.second_addr)
            .field("tags_addr", &self.tags_addr)
            .field("page_size", &self.page_size)
            .field("dt_size", &self.dt_size)
            .field("name", &self.name.trim_nul_terminated().as_bstr())
            .field("cmdline", &self.cmdline.trim_nul_terminated().as_bstr())
            .finish()
    }
}

impl From<RawHeader> for AndroidHeader {
    fn from(raw: RawHeader) -> Self {
        Self {
            kernel_size: raw.kernel_size.get(),
            kernel_addr: raw.kernel_addr.get(),
            ramdisk_size: raw.ramdisk_size.get(),
            ramdisk_addr: raw.ramdisk_addr.get(),
            second_size: raw.second_size.get(),
            second_addr: raw.second_addr.get(),
            tags_addr: raw.tags_addr.get(),
            page_size: raw.page_size.get(),
            dt_size: raw.dt_size.get(),
            name: raw.name,
            cmdline: raw.cmdline,
        }
    }
}

/// Find and decode the Android boot image header. The magic must begin
/// within the first `max_offset` bytes of the stream. Returns the header and
/// its byte offset.
pub fn find_header(
    mut file: impl Read + Seek,
    max_offset: u64,
) -> Result<(AndroidHeader, u64)> {
    let mut searcher = PatternSearcher::new(&BOOT_MAGIC, 0, max_offset + BOOT_MAGIC.len() as u64);

    let Some(offset) = searcher.next_match(&mut file)? else {
        return Err(Error::MagicNotFound(max_offset));
    };

    file.seek(SeekFrom::Start(offset))?;

    let raw = match RawHeader::read_from_io(&mut file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::Truncated),
        Err(e) => return Err(e.into()),
    };

    Ok((raw.into(), offset))
}
