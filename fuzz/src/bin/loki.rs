// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use std::io::Cursor;

    use honggfuzz::fuzz;
    use lokiboot::reader::Reader;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let mut reader = Reader::new(Cursor::new(data));
                reader.enable_format_loki();

                if reader.read_header().is_ok() {
                    let mut buf = [0u8; 4096];

                    while let Ok(Some(_)) = reader.read_entry() {
                        while matches!(reader.read_data(&mut buf), Ok(n) if n > 0) {}
                    }
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
