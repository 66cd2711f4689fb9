// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// CRC-32C polynomial in reversed bit order.
const CRC32C_POLY: u32 = 0x82F63B78;

const fn generate_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc & 1) != 0 { (crc >> 1) ^ CRC32C_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC32C_TABLE: [u32; 256] = generate_table();

/// CRC-32C (Castagnoli) checksum, as used in the SCTP common header.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#appendix-A>. Outbound packets are small
/// (bounded by the path MTU), so a byte-at-a-time table lookup is sufficient.
pub(crate) struct Crc32c(u32);

impl Crc32c {
    pub fn new() -> Self {
        Self(!0)
    }

    pub fn digest(&mut self, data: &[u8]) {
        self.0 = data.iter().fold(self.0, |crc, &byte| {
            CRC32C_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
        });
    }

    /// Returns the checksum. Note that it's written to the packet in little-endian byte order.
    pub fn value(&self) -> u32 {
        !self.0
    }
}
