// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Reader for Loki-patched boot images.
//!
//! Loki patching is lossy. Newer patchers at least record the original
//! kernel and ramdisk sizes in their own header and stash the original
//! ramdisk load address inside the injected shellcode. Older patchers record
//! nothing, so the original values have to be dug out of whatever survives:
//! the zImage size field, the gzip magic of the ramdisk, and the aboot copy
//! at the end of the file.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
    str::{self, Utf8Error},
};

use bstr::ByteSlice;
use num_traits::ToPrimitive;
use thiserror::Error;
use tracing::{debug, trace};
use zerocopy::{FromBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    entry::{Entry, EntryType},
    format::{
        android::{self, AndroidHeader},
        padding::{self, ZeroPadding},
        segment::SegmentTable,
    },
    header::{Header, HeaderFields, UnsupportedField},
    reader::{self, FormatReader},
    stream::{PatternSearcher, ReadFixedSizeExt},
};

pub const LOKI_MAGIC: [u8; 4] = *b"LOKI";
pub const LOKI_MAGIC_OFFSET: u64 = 0x400;
pub const LOKI_MAGIC_SIZE: usize = 4;

/// Maximum offset the Android magic may appear at in a Loki image. Loki
/// never relocates the Android header, so the bidder scans a much narrower
/// range than [`android::MAX_HEADER_OFFSET`].
pub const LOKI_MAX_HEADER_OFFSET: u64 = 32;

pub const LOKI_BUILD_SIZE: usize = 128;

/// Thumb-2 stub the Loki patcher injects into the image. The trailing 9
/// bytes are the slot where the patcher writes the original ramdisk address
/// plus padding, so only the leading bytes survive patching unchanged.
pub const LOKI_SHELLCODE: [u8; 64] = [
    0xfe, 0xb5, 0x0d, 0x4d, 0xd5, 0xf8, 0x88, 0x04, //
    0xab, 0x68, 0x98, 0x42, 0x12, 0xd0, 0xd5, 0xf8, //
    0x90, 0x64, 0x0a, 0x4c, 0xd5, 0xf8, 0x8c, 0x74, //
    0x07, 0xf5, 0x80, 0x57, 0x0f, 0xce, 0x0f, 0xc6, //
    0x10, 0x3f, 0xfb, 0xdc, 0xd5, 0xf8, 0x88, 0x04, //
    0x04, 0x49, 0xd5, 0xf8, 0x8c, 0x24, 0xa8, 0x60, //
    0x69, 0x61, 0x2a, 0x61, 0x00, 0x20, 0x02, 0xb0, //
    0xfe, 0xbd, 0xff, 0xff, 0xff, 0xff, 0xee, 0xee, //
];

/// Number of leading shellcode bytes usable for matching.
const SHELLCODE_MATCH_SIZE: usize = LOKI_SHELLCODE.len() - 9;
/// Offset of the patched-in ramdisk address within the shellcode. The
/// address sits in the last 4 bytes of the slot before the final pad byte,
/// not at the start of the slot.
const SHELLCODE_ADDR_OFFSET: u64 = LOKI_SHELLCODE.len() as u64 - 5;

/// Bytes Loki reserves at the end of the image for its copy of aboot. LG
/// devices reserve a full page instead.
const ABOOT_STASH_SIZE: u32 = 0x200;

/// Delta between the kernel and ramdisk load addresses in the Galaxy S4
/// (jflte) layout (`- 0x00008000 + 0x02000000`), used when nothing better
/// survives in the image.
const JFLTE_RAMDISK_DELTA: u32 = 0x01ff_8000;

/// Offset of the size field in the ARM zImage header.
const ZIMAGE_SIZE_OFFSET: u64 = 0x2c;

/// gzip magic plus the deflate compression method byte.
const GZIP_DEFLATE_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
/// gzip FNAME flag; set when the archive records an original filename.
const GZIP_FLAG_NAME: u8 = 0x08;

const SUPPORTED_FIELDS: HeaderFields = HeaderFields::BOARD_NAME
    .union(HeaderFields::KERNEL_CMDLINE)
    .union(HeaderFields::PAGE_SIZE)
    .union(HeaderFields::KERNEL_ADDRESS)
    .union(HeaderFields::RAMDISK_ADDRESS)
    .union(HeaderFields::SECONDBOOT_ADDRESS)
    .union(HeaderFields::KERNEL_TAGS_ADDRESS);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid loki magic")]
    MagicNotFound,
    #[error("Too small to be Loki image")]
    Truncated,
    #[error("Loki shellcode not found")]
    ShellcodeNotFound,
    #[error("No gzip headers found")]
    NoGzipHeaders,
    #[error("Ramdisk offset {ramdisk:#x} is greater than aboot offset {aboot:#x}")]
    RamdiskPastAboot { ramdisk: u64, aboot: u64 },
    #[error("{0:?} field: invalid value: {1}")]
    InvalidFieldValue(&'static str, u32),
    #[error("{0:?} field is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("{0:?} field is not UTF-8 encoded: {data:?}", data = .1.as_bstr())]
    StringNotUtf8(&'static str, Vec<u8>, #[source] Utf8Error),
    #[error("Failed to read {0:?} field")]
    ReadFieldError(&'static str, #[source] io::Error),
    #[error("Header field rejected")]
    Unsupported(#[from] UnsupportedField),
    #[error("Android header error")]
    Android(#[from] android::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout of the record Loki writes at [`LOKI_MAGIC_OFFSET`].
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawLokiHeader {
    /// Magic value. This should be equal to [`LOKI_MAGIC`].
    magic: [u8; 4],
    /// Nonzero if the image is a recovery image.
    recovery: little_endian::U32,
    build: [u8; LOKI_BUILD_SIZE],
    orig_kernel_size: little_endian::U32,
    orig_ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
}

/// Loki metadata with integers in host byte order.
#[derive(Clone)]
pub struct LokiHeader {
    pub recovery: u32,
    pub build: [u8; LOKI_BUILD_SIZE],
    pub orig_kernel_size: u32,
    pub orig_ramdisk_size: u32,
    pub ramdisk_addr: u32,
}

impl fmt::Debug for LokiHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LokiHeader")
            .field("recovery", &self.recovery)
            .field("build", &self.build.trim_nul_terminated().as_bstr())
            .field("orig_kernel_size", &self.orig_kernel_size)
            .field("orig_ramdisk_size", &self.orig_ramdisk_size)
            .field("ramdisk_addr", &self.ramdisk_addr)
            .finish()
    }
}

impl From<RawLokiHeader> for LokiHeader {
    fn from(raw: RawLokiHeader) -> Self {
        Self {
            recovery: raw.recovery.get(),
            build: raw.build,
            orig_kernel_size: raw.orig_kernel_size.get(),
            orig_ramdisk_size: raw.orig_ramdisk_size.get(),
            ramdisk_addr: raw.ramdisk_addr.get(),
        }
    }
}

/// Which patcher generation produced an image. New-style patchers record the
/// original kernel and ramdisk sizes and a ramdisk address hint in the Loki
/// header; old-style patchers leave all three fields zero. The decision is
/// made once here and nowhere else.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PatchEra {
    Old,
    New,
}

impl PatchEra {
    fn detect(header: &LokiHeader) -> Self {
        if header.orig_kernel_size != 0
            && header.orig_ramdisk_size != 0
            && header.ramdisk_addr != 0
        {
            Self::New
        } else {
            Self::Old
        }
    }
}

/// Whether a ramdisk load address belongs to the LG device family. LG boot
/// loaders map the ramdisk into the upper half of the address space, unlike
/// the Samsung layouts. New device families belong here, not in the header
/// reconstruction code.
fn is_lg_ramdisk_address(address: u32) -> bool {
    address >= 0x8000_0000
}

/// Find and read the Loki header at its fixed offset. Integral fields are
/// converted to host byte order.
fn find_loki_header(mut file: impl Read + Seek) -> Result<(LokiHeader, u64)> {
    file.seek(SeekFrom::Start(LOKI_MAGIC_OFFSET))?;

    let raw = match RawLokiHeader::read_from_io(&mut file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::Truncated),
        Err(e) => return Err(e.into()),
    };

    if raw.magic != LOKI_MAGIC {
        return Err(Error::MagicNotFound);
    }

    Ok((raw.into(), LOKI_MAGIC_OFFSET))
}

/// Recover the pre-patch ramdisk load address.
///
/// Images from newer patchers carry the address inside the injected
/// shellcode, whose trailing slot bytes differ per image and are excluded
/// from the match. Older images carry nothing, so the jflte layout is
/// assumed.
fn find_ramdisk_address(
    mut file: impl Read + Seek,
    hdr: &AndroidHeader,
    loki_hdr: &LokiHeader,
) -> Result<u32> {
    if loki_hdr.ramdisk_addr != 0 {
        let mut searcher =
            PatternSearcher::new(&LOKI_SHELLCODE[..SHELLCODE_MATCH_SIZE], 0, u64::MAX);

        let Some(offset) = searcher.next_match(&mut file)? else {
            return Err(Error::ShellcodeNotFound);
        };

        trace!("Found Loki shellcode at offset {offset:#x}");

        file.seek(SeekFrom::Start(offset + SHELLCODE_ADDR_OFFSET))?;

        let addr = file
            .read_array_exact::<4>()
            .map_err(|e| Error::ReadFieldError("ramdisk_addr", e))?;

        Ok(u32::from_le_bytes(addr))
    } else {
        let Some(addr) = hdr.kernel_addr.checked_add(JFLTE_RAMDISK_DELTA) else {
            return Err(Error::InvalidFieldValue("kernel_addr", hdr.kernel_addr));
        };

        Ok(addr)
    }
}

/// Find the gzip ramdisk offset in an old-style image.
///
/// Scans for deflate gzip headers with a flags byte of 0x00 or 0x08. If both
/// occur, the 0x08 one wins: it means the original filename field is set,
/// which is what the `gzip` command line tool produces and what most Loki'd
/// ramdisks were packed with.
fn find_gzip_offset(mut file: impl Read + Seek, start_offset: u64) -> Result<u64> {
    let mut searcher = PatternSearcher::new(&GZIP_DEFLATE_MAGIC, start_offset, u64::MAX);

    let mut plain: Option<u64> = None;
    let mut named: Option<u64> = None;

    while !(plain.is_some() && named.is_some()) {
        let Some(offset) = searcher.next_match(&mut file)? else {
            break;
        };

        file.seek(SeekFrom::Start(offset + GZIP_DEFLATE_MAGIC.len() as u64))?;

        let mut flags = [0u8; 1];
        match file.read_exact(&mut flags) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        match flags[0] {
            0x00 if plain.is_none() => plain = Some(offset),
            GZIP_FLAG_NAME if named.is_none() => named = Some(offset),
            _ => {}
        }
    }

    let offset = named.or(plain).ok_or(Error::NoGzipHeaders)?;

    debug!("Old-style ramdisk gzip header at offset {offset:#x}");

    Ok(offset)
}

/// Guess the kernel size from the size field of the zImage header. Old-style
/// patchers store the original size nowhere else.
///
/// <http://www.simtec.co.uk/products/SWLINUX/files/booting_article.html#d0e309>
fn find_linux_kernel_size(mut file: impl Read + Seek, kernel_offset: u64) -> Result<u32> {
    file.seek(SeekFrom::Start(kernel_offset + ZIMAGE_SIZE_OFFSET))?;

    let size = file
        .read_array_exact::<4>()
        .map_err(|e| Error::ReadFieldError("kernel_size", e))?;

    Ok(u32::from_le_bytes(size))
}

/// Guess the ramdisk size of an old-style image. The ramdisk runs from the
/// gzip header to the aboot stash at the end of the file.
fn find_old_ramdisk_size(
    mut file: impl Read + Seek,
    hdr: &AndroidHeader,
    ramdisk_offset: u64,
) -> Result<u32> {
    let aboot_size = if is_lg_ramdisk_address(hdr.ramdisk_addr) {
        i64::from(hdr.page_size)
    } else {
        i64::from(ABOOT_STASH_SIZE)
    };

    let aboot_offset = file.seek(SeekFrom::End(-aboot_size))?;

    if ramdisk_offset > aboot_offset {
        return Err(Error::RamdiskPastAboot {
            ramdisk: ramdisk_offset,
            aboot: aboot_offset,
        });
    }

    // The gap may end with zero padding. Do not try to strip it; the
    // trailing zeros can be real ramdisk bytes.
    (aboot_offset - ramdisk_offset)
        .to_u32()
        .ok_or(Error::FieldOutOfBounds("ramdisk_size"))
}

struct ImageLayout {
    header: Header,
    kernel_offset: u64,
    kernel_size: u32,
    ramdisk_offset: u64,
    ramdisk_size: u32,
    dt_offset: Option<u64>,
}

fn build_header(hdr: &AndroidHeader, ramdisk_addr: u32, tags_addr: u32) -> Result<Header> {
    let name = hdr.name.trim_nul_terminated();
    let name =
        str::from_utf8(name).map_err(|e| Error::StringNotUtf8("name", name.to_vec(), e))?;

    let cmdline = hdr.cmdline.trim_nul_terminated();
    let cmdline = str::from_utf8(cmdline)
        .map_err(|e| Error::StringNotUtf8("cmdline", cmdline.to_vec(), e))?;

    let mut header = Header::with_supported_fields(SUPPORTED_FIELDS);
    header.set_board_name(name.to_owned())?;
    header.set_kernel_cmdline(cmdline.to_owned())?;
    header.set_page_size(hdr.page_size)?;
    header.set_kernel_address(hdr.kernel_addr)?;
    header.set_ramdisk_address(ramdisk_addr)?;
    header.set_secondboot_address(hdr.second_addr)?;
    header.set_kernel_tags_address(tags_addr)?;

    Ok(header)
}

/// Reconstruct the header and layout of an old-style image. Nothing about
/// the original layout survives directly; every value is recovered from a
/// different residue of the patching.
fn read_old_header(
    mut file: impl Read + Seek,
    hdr: &AndroidHeader,
    loki_hdr: &LokiHeader,
) -> Result<ImageLayout> {
    if hdr.page_size == 0 {
        return Err(Error::InvalidFieldValue("page_size", 0));
    }

    let page_size = u64::from(hdr.page_size);

    // The kernel tags address was destroyed by the patching; synthesize it
    // from the jflte defaults.
    let tags_addr = hdr
        .kernel_addr
        .wrapping_sub(android::DEFAULT_KERNEL_OFFSET)
        .wrapping_add(android::DEFAULT_TAGS_OFFSET);

    let kernel_size = find_linux_kernel_size(&mut file, page_size)?;

    let mut pos = page_size + u64::from(kernel_size);
    pos += padding::calc(pos, page_size);

    let gzip_offset = find_gzip_offset(&mut file, pos)?;

    let ramdisk_size = find_old_ramdisk_size(&mut file, hdr, gzip_offset)?;

    let ramdisk_addr = find_ramdisk_address(&mut file, hdr, loki_hdr)?;

    let header = build_header(hdr, ramdisk_addr, tags_addr)?;

    Ok(ImageLayout {
        header,
        kernel_offset: page_size,
        kernel_size,
        ramdisk_offset: gzip_offset,
        ramdisk_size,
        dt_offset: None,
    })
}

/// Reconstruct the header and layout of a new-style image. The original
/// sizes come straight from the Loki header; only the ramdisk address needs
/// a scan.
fn read_new_header(
    mut file: impl Read + Seek,
    hdr: &AndroidHeader,
    loki_hdr: &LokiHeader,
) -> Result<ImageLayout> {
    if hdr.page_size == 0 {
        return Err(Error::InvalidFieldValue("page_size", 0));
    }

    let page_size = u64::from(hdr.page_size);

    // Size of the fake block the patcher inserts ahead of the device tree.
    let fake_size = if is_lg_ramdisk_address(hdr.ramdisk_addr) {
        page_size
    } else {
        u64::from(ABOOT_STASH_SIZE)
    };

    let ramdisk_addr = find_ramdisk_address(&mut file, hdr, loki_hdr)?;

    let header = build_header(hdr, ramdisk_addr, hdr.tags_addr)?;

    // All additions are u64; adding a few u32-sized terms cannot overflow.
    let mut pos = page_size;

    let kernel_offset = pos;
    pos += u64::from(loki_hdr.orig_kernel_size);
    pos += padding::calc(pos, page_size);

    let ramdisk_offset = pos;
    pos += u64::from(loki_hdr.orig_ramdisk_size);
    pos += padding::calc(pos, page_size);

    let dt_offset = if hdr.dt_size != 0 {
        Some(pos + fake_size)
    } else {
        None
    };

    Ok(ImageLayout {
        header,
        kernel_offset,
        kernel_size: loki_hdr.orig_kernel_size,
        ramdisk_offset,
        ramdisk_size: loki_hdr.orig_ramdisk_size,
        dt_offset,
    })
}

/// Reader for the Loki format. Holds everything learned about one image,
/// starting with whatever the bid phase already found.
#[derive(Default)]
pub struct LokiFormat {
    loki: Option<(LokiHeader, u64)>,
    android: Option<(AndroidHeader, u64)>,
    segments: SegmentTable,
}

impl LokiFormat {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Read + Seek> FormatReader<R> for LokiFormat {
    fn name(&self) -> &'static str {
        "loki"
    }

    fn bid(&mut self, file: &mut R, best_bid: u32) -> reader::Result<Option<u32>> {
        if best_bid >= ((LOKI_MAGIC_SIZE + android::BOOT_MAGIC_SIZE) * 8) as u32 {
            // A bid we cannot win.
            return Ok(None);
        }

        let mut bid = 0;

        // Find the Loki header.
        match find_loki_header(&mut *file) {
            Ok(found) => {
                bid += (LOKI_MAGIC_SIZE * 8) as u32;
                self.loki = Some(found);
            }
            // Not a Loki boot image.
            Err(Error::MagicNotFound | Error::Truncated) => return Ok(Some(0)),
            Err(e) => return Err(e.into()),
        }

        // Find the Android header.
        match android::find_header(&mut *file, LOKI_MAX_HEADER_OFFSET) {
            Ok(found) => {
                bid += (android::BOOT_MAGIC_SIZE * 8) as u32;
                self.android = Some(found);
            }
            // Not an Android boot image.
            Err(android::Error::MagicNotFound(_) | android::Error::Truncated) => {
                return Ok(Some(0));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(bid))
    }

    fn read_header(&mut self, file: &mut R) -> reader::Result<Header> {
        // The bid phase is skipped when the caller forces this format, so
        // repeat its work here if needed, with the wider Android scan range.
        let loki_hdr = match &self.loki {
            Some((header, _)) => header.clone(),
            None => {
                let (header, offset) = find_loki_header(&mut *file)?;
                self.loki = Some((header.clone(), offset));
                header
            }
        };
        let hdr = match &self.android {
            Some((header, _)) => header.clone(),
            None => {
                let (header, offset) =
                    android::find_header(&mut *file, android::MAX_HEADER_OFFSET)?;
                self.android = Some((header.clone(), offset));
                header
            }
        };

        let era = PatchEra::detect(&loki_hdr);

        debug!("Image was patched with {era:?}-style Loki");

        let layout = match era {
            PatchEra::New => read_new_header(&mut *file, &hdr, &loki_hdr)?,
            PatchEra::Old => read_old_header(&mut *file, &hdr, &loki_hdr)?,
        };

        self.segments.clear();
        self.segments.add(
            EntryType::Kernel,
            layout.kernel_offset,
            layout.kernel_size,
            false,
        );
        self.segments.add(
            EntryType::Ramdisk,
            layout.ramdisk_offset,
            layout.ramdisk_size,
            false,
        );
        if let Some(dt_offset) = layout.dt_offset {
            self.segments
                .add(EntryType::DeviceTree, dt_offset, hdr.dt_size, false);
        }

        Ok(layout.header)
    }

    fn read_entry(&mut self, file: &mut R) -> reader::Result<Option<Entry>> {
        Ok(self.segments.read_entry(file)?)
    }

    fn go_to_entry(&mut self, file: &mut R, kind: EntryType) -> reader::Result<Entry> {
        Ok(self.segments.go_to_entry(file, kind)?)
    }

    fn read_data(&mut self, file: &mut R, buf: &mut [u8]) -> reader::Result<usize> {
        Ok(self.segments.read_data(file, buf)?)
    }

    fn current_entry(&self) -> Option<Entry> {
        self.segments.current_entry()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::{
        Error, GZIP_DEFLATE_MAGIC, LOKI_SHELLCODE, LokiFormat, find_gzip_offset,
        is_lg_ramdisk_address,
    };
    use crate::{
        entry::EntryType,
        reader::{self, FormatReader},
    };

    const PAGE_SIZE: u32 = 2048;
    const SHELLCODE_OFFSET: usize = 0x500;

    fn put_le32(data: &mut [u8], offset: usize, value: u32) {
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    struct AndroidFields {
        kernel_addr: u32,
        ramdisk_addr: u32,
        tags_addr: u32,
        page_size: u32,
        dt_size: u32,
    }

    fn write_android_header(data: &mut [u8], fields: &AndroidFields) {
        data[..8].copy_from_slice(b"ANDROID!");
        put_le32(data, 12, fields.kernel_addr);
        put_le32(data, 20, fields.ramdisk_addr);
        put_le32(data, 32, fields.tags_addr);
        put_le32(data, 36, fields.page_size);
        put_le32(data, 40, fields.dt_size);
        data[48..53].copy_from_slice(b"jflte");
        data[64..79].copy_from_slice(b"console=ttyHSL0");
    }

    fn write_loki_header(
        data: &mut [u8],
        orig_kernel_size: u32,
        orig_ramdisk_size: u32,
        ramdisk_addr: u32,
    ) {
        data[0x400..0x404].copy_from_slice(b"LOKI");
        put_le32(data, 0x488, orig_kernel_size);
        put_le32(data, 0x48c, orig_ramdisk_size);
        put_le32(data, 0x490, ramdisk_addr);
    }

    fn write_shellcode(data: &mut [u8], ramdisk_addr: u32) {
        data[SHELLCODE_OFFSET..SHELLCODE_OFFSET + 55].copy_from_slice(&LOKI_SHELLCODE[..55]);
        put_le32(data, SHELLCODE_OFFSET + 59, ramdisk_addr);
    }

    /// Old-style jflte image: all three Loki discriminator fields are zero,
    /// so every original value must be recovered from the image itself.
    fn old_jflte_image() -> Vec<u8> {
        let mut data = vec![0u8; 0x10_0000];
        write_android_header(
            &mut data,
            &AndroidFields {
                kernel_addr: 0x1000_8000,
                ramdisk_addr: 0x1100_0000,
                tags_addr: 0,
                page_size: PAGE_SIZE,
                dt_size: 0,
            },
        );
        write_loki_header(&mut data, 0, 0, 0);
        // zImage header size field.
        put_le32(&mut data, 0x800 + 0x2c, 0x3000);
        // gzip'd ramdisk with the FNAME flag set.
        data[0x4000..0x4004].copy_from_slice(&[0x1f, 0x8b, 0x08, 0x08]);
        data
    }

    /// New-style LG image: the Loki header carries the original sizes and
    /// the shellcode carries the original ramdisk address.
    fn new_lg_image() -> Vec<u8> {
        let mut data = vec![0u8; 0x61_1000];
        write_android_header(
            &mut data,
            &AndroidFields {
                kernel_addr: 0x1000_8000,
                ramdisk_addr: 0x8100_0000,
                tags_addr: 0x1000_0100,
                page_size: PAGE_SIZE,
                dt_size: 0x1_0000,
            },
        );
        write_loki_header(&mut data, 0x40_0000, 0x20_0000, 0x8200_0000);
        write_shellcode(&mut data, 0x81f0_0000);
        data
    }

    #[test]
    fn lg_ramdisk_addresses() {
        assert!(is_lg_ramdisk_address(0x8100_0000));
        assert!(is_lg_ramdisk_address(0xf800_0000));
        assert!(!is_lg_ramdisk_address(0x1100_0000));
        assert!(!is_lg_ramdisk_address(0x4000_0000));
    }

    #[test]
    fn bid_zero_for_non_loki() {
        let mut file = Cursor::new(vec![0u8; 0x2000]);
        let mut loki = LokiFormat::new();

        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(0));

        // A forced read surfaces the failure instead.
        let mut loki = LokiFormat::new();
        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::MagicNotFound))
        );
    }

    #[test]
    fn bid_zero_for_truncated_loki() {
        let mut data = vec![0u8; 0x404];
        data[0x400..0x404].copy_from_slice(b"LOKI");
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(0));
    }

    #[test]
    fn bid_matches_both_magics() {
        let mut file = Cursor::new(old_jflte_image());
        let mut loki = LokiFormat::new();
        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(96));

        let mut file = Cursor::new(new_lg_image());
        let mut loki = LokiFormat::new();
        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(96));
    }

    #[test]
    fn bid_declines_when_it_cannot_win() {
        let mut file = Cursor::new(new_lg_image());
        let mut loki = LokiFormat::new();

        assert_eq!(loki.bid(&mut file, 96).unwrap(), None);
    }

    #[test]
    fn read_old_style_image() {
        let mut file = Cursor::new(old_jflte_image());
        let mut loki = LokiFormat::new();

        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(96));

        let header = loki.read_header(&mut file).unwrap();
        assert_eq!(header.board_name(), Some("jflte"));
        assert_eq!(header.kernel_cmdline(), Some("console=ttyHSL0"));
        assert_eq!(header.page_size(), Some(PAGE_SIZE));
        assert_eq!(header.kernel_address(), Some(0x1000_8000));
        // jflte fallback: kernel address + 0x01ff8000.
        assert_eq!(header.ramdisk_address(), Some(0x1200_0000));
        // Synthesized from the jflte defaults.
        assert_eq!(header.kernel_tags_address(), Some(0x1000_0100));

        let kernel = loki.read_entry(&mut file).unwrap().unwrap();
        assert_eq!(
            (kernel.kind, kernel.offset, kernel.size),
            (EntryType::Kernel, 0x800, 0x3000)
        );

        // Aboot stash is 0x200 for non-LG images.
        let ramdisk = loki.read_entry(&mut file).unwrap().unwrap();
        assert_eq!(
            (ramdisk.kind, ramdisk.offset, ramdisk.size),
            (EntryType::Ramdisk, 0x4000, 0xf_be00)
        );

        assert_matches!(loki.read_entry(&mut file), Ok(None));
    }

    #[test]
    fn read_new_style_lg_image() {
        let mut file = Cursor::new(new_lg_image());
        let mut loki = LokiFormat::new();

        assert_eq!(loki.bid(&mut file, 0).unwrap(), Some(96));

        let header = loki.read_header(&mut file).unwrap();
        assert_eq!(header.page_size(), Some(PAGE_SIZE));
        // Recovered from the shellcode slot, not the patched header field.
        assert_eq!(header.ramdisk_address(), Some(0x81f0_0000));
        // Inherited from the Android header, unlike old-style images.
        assert_eq!(header.kernel_tags_address(), Some(0x1000_0100));

        let kernel = loki.read_entry(&mut file).unwrap().unwrap();
        assert_eq!(
            (kernel.kind, kernel.offset, kernel.size),
            (EntryType::Kernel, 0x800, 0x40_0000)
        );

        let ramdisk = loki.read_entry(&mut file).unwrap().unwrap();
        assert_eq!(
            (ramdisk.kind, ramdisk.offset, ramdisk.size),
            (EntryType::Ramdisk, 0x40_0800, 0x20_0000)
        );

        // The fake block ahead of the device tree is page-sized on LG.
        let dt = loki.read_entry(&mut file).unwrap().unwrap();
        assert_eq!(
            (dt.kind, dt.offset, dt.size),
            (EntryType::DeviceTree, 0x60_1000, 0x1_0000)
        );

        assert_matches!(loki.read_entry(&mut file), Ok(None));
    }

    #[test]
    fn new_style_non_lg_fake_block() {
        let mut data = new_lg_image();
        // Samsung-range ramdisk address: the fake block shrinks to 0x200.
        put_le32(&mut data, 20, 0x1100_0000);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        loki.read_header(&mut file).unwrap();
        let dt = loki.go_to_entry(&mut file, EntryType::DeviceTree).unwrap();
        assert_eq!(dt.offset, 0x60_0800 + 0x200);
    }

    #[test]
    fn old_style_lg_aboot_stash() {
        let mut data = old_jflte_image();
        // LG-range ramdisk address: the aboot stash grows to a full page.
        put_le32(&mut data, 20, 0x8100_0000);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        loki.read_header(&mut file).unwrap();
        let ramdisk = loki.go_to_entry(&mut file, EntryType::Ramdisk).unwrap();
        assert_eq!(ramdisk.size, 0x10_0000 - 0x800 - 0x4000);
    }

    #[test]
    fn old_style_with_shellcode_hint_stays_old() {
        // Only some of the discriminator fields are set: still an old-style
        // image, but the ramdisk address comes from the shellcode.
        let mut data = old_jflte_image();
        write_loki_header(&mut data, 0x40_0000, 0, 0x8200_0000);
        write_shellcode(&mut data, 0x1234_5678);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        let header = loki.read_header(&mut file).unwrap();
        assert_eq!(header.ramdisk_address(), Some(0x1234_5678));

        // Kernel size still comes from the zImage header, not the Loki
        // header.
        let kernel = loki.go_to_entry(&mut file, EntryType::Kernel).unwrap();
        assert_eq!(kernel.size, 0x3000);
    }

    #[test]
    fn missing_shellcode() {
        let mut data = new_lg_image();
        data[SHELLCODE_OFFSET..SHELLCODE_OFFSET + 64].fill(0);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::ShellcodeNotFound))
        );
    }

    #[test]
    fn zero_page_size() {
        let mut data = new_lg_image();
        put_le32(&mut data, 36, 0);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::InvalidFieldValue("page_size", 0)))
        );

        let mut data = old_jflte_image();
        put_le32(&mut data, 36, 0);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::InvalidFieldValue("page_size", 0)))
        );
    }

    #[test]
    fn jflte_fallback_overflow() {
        let mut data = old_jflte_image();
        put_le32(&mut data, 12, 0xffff_ffff);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::InvalidFieldValue(
                "kernel_addr",
                0xffff_ffff
            )))
        );
    }

    #[test]
    fn ramdisk_past_aboot_stash() {
        let mut data = old_jflte_image();
        // Move the only gzip header past the aboot stash.
        data[0x4000..0x4004].fill(0);
        let len = data.len();
        data[len - 0x80..len - 0x7c].copy_from_slice(&[0x1f, 0x8b, 0x08, 0x08]);
        let mut file = Cursor::new(data);
        let mut loki = LokiFormat::new();

        assert_matches!(
            loki.read_header(&mut file),
            Err(reader::Error::Loki(Error::RamdiskPastAboot { .. }))
        );
    }

    #[test]
    fn gzip_prefers_filename_flag() {
        // Plain header first.
        let mut data = vec![0u8; 0x1000];
        data[0x100..0x103].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x103] = 0x00;
        data[0x800..0x803].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x803] = 0x08;
        let mut file = Cursor::new(data);
        assert_eq!(find_gzip_offset(&mut file, 0).unwrap(), 0x800);

        // FNAME header first.
        let mut data = vec![0u8; 0x1000];
        data[0x100..0x103].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x103] = 0x08;
        data[0x800..0x803].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x803] = 0x00;
        let mut file = Cursor::new(data);
        assert_eq!(find_gzip_offset(&mut file, 0).unwrap(), 0x100);
    }

    #[test]
    fn gzip_ignores_other_flags() {
        let mut data = vec![0u8; 0x1000];
        data[0x100..0x103].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x103] = 0x02;
        let mut file = Cursor::new(data);
        assert_matches!(find_gzip_offset(&mut file, 0), Err(Error::NoGzipHeaders));

        // An ignored candidate does not shadow a later valid one.
        let mut data = vec![0u8; 0x1000];
        data[0x100..0x103].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x103] = 0x02;
        data[0x800..0x803].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x803] = 0x00;
        let mut file = Cursor::new(data);
        assert_eq!(find_gzip_offset(&mut file, 0).unwrap(), 0x800);
    }

    #[test]
    fn gzip_respects_start_offset() {
        let mut data = vec![0u8; 0x1000];
        data[0x100..0x103].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x103] = 0x08;
        data[0x800..0x803].copy_from_slice(&GZIP_DEFLATE_MAGIC);
        data[0x803] = 0x08;
        let mut file = Cursor::new(data);

        assert_eq!(find_gzip_offset(&mut file, 0x200).unwrap(), 0x800);
    }
}
