// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    /// Fields a format reader is able to report in a reconstructed
    /// [`Header`].
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct HeaderFields: u32 {
        const BOARD_NAME = 1 << 0;
        const KERNEL_CMDLINE = 1 << 1;
        const PAGE_SIZE = 1 << 2;
        const KERNEL_ADDRESS = 1 << 3;
        const RAMDISK_ADDRESS = 1 << 4;
        const SECONDBOOT_ADDRESS = 1 << 5;
        const KERNEL_TAGS_ADDRESS = 1 << 6;
    }
}

/// Error returned when a setter targets a field outside the supported set.
#[derive(Debug, Error)]
#[error("Unsupported field: {0:?}")]
pub struct UnsupportedField(pub &'static str);

/// Boot image header values recovered by a format reader.
///
/// Each format supports a subset of the fields; setters for fields outside
/// that subset are rejected so a reader cannot silently report values it did
/// not actually reconstruct.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Header {
    #[serde(skip)]
    supported: HeaderFields,
    board_name: Option<String>,
    cmdline: Option<String>,
    page_size: Option<u32>,
    kernel_addr: Option<u32>,
    ramdisk_addr: Option<u32>,
    second_addr: Option<u32>,
    tags_addr: Option<u32>,
}

impl Header {
    pub fn with_supported_fields(supported: HeaderFields) -> Self {
        Self {
            supported,
            ..Self::default()
        }
    }

    pub fn supported_fields(&self) -> HeaderFields {
        self.supported
    }

    fn check(&self, field: HeaderFields, name: &'static str) -> Result<(), UnsupportedField> {
        if !self.supported.contains(field) {
            return Err(UnsupportedField(name));
        }

        Ok(())
    }

    pub fn board_name(&self) -> Option<&str> {
        self.board_name.as_deref()
    }

    pub fn set_board_name(&mut self, value: String) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::BOARD_NAME, "board_name")?;
        self.board_name = Some(value);
        Ok(())
    }

    pub fn kernel_cmdline(&self) -> Option<&str> {
        self.cmdline.as_deref()
    }

    pub fn set_kernel_cmdline(&mut self, value: String) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::KERNEL_CMDLINE, "cmdline")?;
        self.cmdline = Some(value);
        Ok(())
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    pub fn set_page_size(&mut self, value: u32) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::PAGE_SIZE, "page_size")?;
        self.page_size = Some(value);
        Ok(())
    }

    pub fn kernel_address(&self) -> Option<u32> {
        self.kernel_addr
    }

    pub fn set_kernel_address(&mut self, value: u32) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::KERNEL_ADDRESS, "kernel_addr")?;
        self.kernel_addr = Some(value);
        Ok(())
    }

    pub fn ramdisk_address(&self) -> Option<u32> {
        self.ramdisk_addr
    }

    pub fn set_ramdisk_address(&mut self, value: u32) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::RAMDISK_ADDRESS, "ramdisk_addr")?;
        self.ramdisk_addr = Some(value);
        Ok(())
    }

    pub fn secondboot_address(&self) -> Option<u32> {
        self.second_addr
    }

    pub fn set_secondboot_address(&mut self, value: u32) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::SECONDBOOT_ADDRESS, "second_addr")?;
        self.second_addr = Some(value);
        Ok(())
    }

    pub fn kernel_tags_address(&self) -> Option<u32> {
        self.tags_addr
    }

    pub fn set_kernel_tags_address(&mut self, value: u32) -> Result<(), UnsupportedField> {
        self.check(HeaderFields::KERNEL_TAGS_ADDRESS, "tags_addr")?;
        self.tags_addr = Some(value);
        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Boot image header:")?;

        if let Some(v) = &self.board_name {
            write!(f, "\n- Board name:           {v:?}")?;
        }
        if let Some(v) = &self.cmdline {
            write!(f, "\n- Kernel cmdline:       {v:?}")?;
        }
        if let Some(v) = self.page_size {
            write!(f, "\n- Page size:            {v}")?;
        }
        if let Some(v) = self.kernel_addr {
            write!(f, "\n- Kernel address:       {v:#x}")?;
        }
        if let Some(v) = self.ramdisk_addr {
            write!(f, "\n- Ramdisk address:      {v:#x}")?;
        }
        if let Some(v) = self.second_addr {
            write!(f, "\n- Second stage address: {v:#x}")?;
        }
        if let Some(v) = self.tags_addr {
            write!(f, "\n- Kernel tags address:  {v:#x}")?;
        }

        Ok(())
    }
}
