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

use crate::math::round_up_to_4;
use crate::packet::ChunkParseError;
use crate::packet::ChunkType;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::ensure;
use crate::packet::read_u16_be;
use crate::packet::write_u16_be;

/// Intermediate representation of a chunk for which the type hasn't been fully discriminated, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Chunk Type   |  Chunk Flags  |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                          Chunk Value                          /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The outqueue never receives packets, but reads back what it produced when verifying built
/// packets and generated FORWARD-TSN chunks.
#[derive(Debug)]
pub(crate) struct RawChunk<'a> {
    pub(crate) typ: ChunkType,
    pub(crate) flags: u8,
    pub(crate) value: &'a [u8],
}

impl<'a> RawChunk<'a> {
    /// Reads a chunk from `bytes` and returns it, together with the data that follows it (after
    /// padding).
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), ChunkParseError> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);

        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);

        let end_offset = round_up_to_4!(length).min(bytes.len());
        Ok((
            Self {
                typ: ChunkType::from(bytes[0]),
                flags: bytes[1],
                value: &bytes[TLV_HEADER_SIZE..length],
            },
            &bytes[end_offset..],
        ))
    }

    /// Splits a sequence of chunks, e.g. the part of a packet after the common header.
    pub(crate) fn split_all(mut bytes: &'a [u8]) -> Result<Vec<Self>, ChunkParseError> {
        let mut chunks = Vec::new();
        while !bytes.is_empty() {
            let (chunk, remaining) = Self::from_bytes(bytes)?;
            chunks.push(chunk);
            bytes = remaining;
        }
        Ok(chunks)
    }
}

/// Writes a chunk header with the provided arguments and returns the remaining part of the chunk
/// (its value) that may be filled in by the caller with additional data.
#[inline]
pub(crate) fn write_chunk_header(
    typ: ChunkType,
    flags: u8,
    value_size: usize,
    output: &mut [u8],
) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    debug_assert!(output.len() >= serialized_size);
    output[0] = typ.into();
    output[1] = flags;
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_header() {
        let mut buf = vec![0; 8];
        let value = write_chunk_header(ChunkType::CookieEcho, 0x01, 3, &mut buf);
        value.copy_from_slice(&[7, 8, 9]);
        assert_eq!(buf, &[10, 0x01, 0, 7, 7, 8, 9, 0]);

        let (raw, remaining) = RawChunk::from_bytes(&buf).unwrap();
        assert_eq!(raw.typ, ChunkType::CookieEcho);
        assert_eq!(raw.flags, 0x01);
        assert_eq!(raw.value, &[7, 8, 9]);
        assert!(remaining.is_empty());
    }

    #[test]
    fn splits_padded_chunks() {
        // A 5 byte HEARTBEAT-ACK (padded to 8) followed by a COOKIE-ACK.
        let bytes: &[u8] = &[5, 0, 0, 5, 42, 0, 0, 0, 11, 0, 0, 4];
        let chunks = RawChunk::split_all(bytes).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].typ, ChunkType::HeartbeatAck);
        assert_eq!(chunks[0].value, &[42]);
        assert_eq!(chunks[1].typ, ChunkType::CookieAck);
    }

    #[test]
    fn rejects_truncated_chunk() {
        let bytes: &[u8] = &[5, 0, 0, 12, 42, 0, 0, 0];
        assert_eq!(RawChunk::from_bytes(bytes).unwrap_err(), ChunkParseError::InvalidLength);
        assert_eq!(RawChunk::from_bytes(&[1, 2]).unwrap_err(), ChunkParseError::InvalidLength);
    }
}
