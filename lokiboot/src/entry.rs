// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Type of a boot image segment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum EntryType {
    Kernel,
    Ramdisk,
    DeviceTree,
}

/// Descriptor for one segment of a parsed boot image.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Entry {
    pub kind: EntryType,
    /// Byte offset of the segment within the image.
    pub offset: u64,
    /// Stored size of the segment.
    pub size: u32,
}
