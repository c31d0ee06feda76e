// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use num_traits::PrimInt;

/// Calculate the amount of padding that needs to be added to align the
/// specified offset to a page boundary.
pub fn calc<N: PrimInt>(offset: N, page_size: N) -> N {
    let r = offset % page_size;
    if r == N::zero() {
        N::zero()
    } else {
        page_size - r
    }
}

pub trait ZeroPadding {
    /// The prefix up to, but not including, the first NUL byte. The entire
    /// slice if there is none.
    fn trim_nul_terminated(&self) -> &[u8];
}

impl ZeroPadding for [u8] {
    fn trim_nul_terminated(&self) -> &[u8] {
        let end = self.iter().position(|b| *b == 0).unwrap_or(self.len());

        &self[..end]
    }
}
