// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

pub mod android;
pub mod loki;
pub mod padding;
pub mod segment;
