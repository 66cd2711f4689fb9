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

use std::fmt;
use thiserror::Error;

pub(crate) mod chunk;
pub(crate) mod crc32c;
pub(crate) mod data;
pub(crate) mod data_chunk;
pub(crate) mod forward_tsn_chunk;
pub(crate) mod sack_chunk;
pub(crate) mod sctp_packet;

/// Size of the Type-Length-Value header, used by chunks, parameters and error causes.
pub(crate) const TLV_HEADER_SIZE: usize = 4;

macro_rules! ensure {
    ($cond: expr, $err: expr) => {
        if !$cond {
            return Err($err.into());
        }
    };
}

macro_rules! read_u16_be {
    ($buf: expr) => {
        u16::from_be_bytes([$buf[0], $buf[1]])
    };
}

macro_rules! read_u32_be {
    ($buf: expr) => {
        u32::from_be_bytes([$buf[0], $buf[1], $buf[2], $buf[3]])
    };
}

macro_rules! write_u16_be {
    ($buf: expr, $n: expr) => {
        $buf[..2].copy_from_slice(&($n as u16).to_be_bytes());
    };
}

macro_rules! write_u32_be {
    ($buf: expr, $n: expr) => {
        $buf[..4].copy_from_slice(&($n as u32).to_be_bytes());
    };
}

pub(crate) use ensure;
pub(crate) use read_u16_be;
pub(crate) use read_u32_be;
pub(crate) use write_u16_be;
pub(crate) use write_u32_be;

/// Chunk types, as carried in the first byte of every chunk.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2> and the extensions
/// (RFC 3758, RFC 5061, RFC 6525) whose chunks may pass through the outqueue.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChunkType {
    Data,
    Init,
    InitAck,
    Sack,
    Heartbeat,
    HeartbeatAck,
    Abort,
    Shutdown,
    ShutdownAck,
    Error,
    CookieEcho,
    CookieAck,
    Ecne,
    Cwr,
    ShutdownComplete,
    AsconfAck,
    ReConfig,
    ForwardTsn,
    Asconf,
    Unknown(u8),
}

impl From<u8> for ChunkType {
    fn from(value: u8) -> Self {
        match value {
            0 => ChunkType::Data,
            1 => ChunkType::Init,
            2 => ChunkType::InitAck,
            3 => ChunkType::Sack,
            4 => ChunkType::Heartbeat,
            5 => ChunkType::HeartbeatAck,
            6 => ChunkType::Abort,
            7 => ChunkType::Shutdown,
            8 => ChunkType::ShutdownAck,
            9 => ChunkType::Error,
            10 => ChunkType::CookieEcho,
            11 => ChunkType::CookieAck,
            12 => ChunkType::Ecne,
            13 => ChunkType::Cwr,
            14 => ChunkType::ShutdownComplete,
            0x80 => ChunkType::AsconfAck,
            130 => ChunkType::ReConfig,
            192 => ChunkType::ForwardTsn,
            0xc1 => ChunkType::Asconf,
            other => ChunkType::Unknown(other),
        }
    }
}

impl From<ChunkType> for u8 {
    fn from(value: ChunkType) -> Self {
        match value {
            ChunkType::Data => 0,
            ChunkType::Init => 1,
            ChunkType::InitAck => 2,
            ChunkType::Sack => 3,
            ChunkType::Heartbeat => 4,
            ChunkType::HeartbeatAck => 5,
            ChunkType::Abort => 6,
            ChunkType::Shutdown => 7,
            ChunkType::ShutdownAck => 8,
            ChunkType::Error => 9,
            ChunkType::CookieEcho => 10,
            ChunkType::CookieAck => 11,
            ChunkType::Ecne => 12,
            ChunkType::Cwr => 13,
            ChunkType::ShutdownComplete => 14,
            ChunkType::AsconfAck => 0x80,
            ChunkType::ReConfig => 130,
            ChunkType::ForwardTsn => 192,
            ChunkType::Asconf => 0xc1,
            ChunkType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkType::Data => "DATA",
            ChunkType::Init => "INIT",
            ChunkType::InitAck => "INIT-ACK",
            ChunkType::Sack => "SACK",
            ChunkType::Heartbeat => "HEARTBEAT",
            ChunkType::HeartbeatAck => "HEARTBEAT-ACK",
            ChunkType::Abort => "ABORT",
            ChunkType::Shutdown => "SHUTDOWN",
            ChunkType::ShutdownAck => "SHUTDOWN-ACK",
            ChunkType::Error => "ERROR",
            ChunkType::CookieEcho => "COOKIE-ECHO",
            ChunkType::CookieAck => "COOKIE-ACK",
            ChunkType::Ecne => "ECNE",
            ChunkType::Cwr => "CWR",
            ChunkType::ShutdownComplete => "SHUTDOWN-COMPLETE",
            ChunkType::AsconfAck => "ASCONF-ACK",
            ChunkType::ReConfig => "RE-CONFIG",
            ChunkType::ForwardTsn => "FORWARD-TSN",
            ChunkType::Asconf => "ASCONF",
            ChunkType::Unknown(typ) => return write!(f, "UNKNOWN({typ})"),
        };
        f.write_str(name)
    }
}

/// Trait for serialization of TLV data types (chunks, parameters, error causes) that share the
/// same framing.
pub(crate) trait SerializableTlv {
    /// Serializes this TLV object to a byte array. Callers are expected to call
    /// [`Self::serialized_size`] prior to calling this method, to ensure that `output` is large
    /// enough.
    fn serialize_to(&self, output: &mut [u8]);

    /// Returns how many bytes of value payload this TLV object has, which together with the TLV
    /// header size becomes the full serialized size.
    fn value_size(&self) -> usize;

    /// Returns the number of bytes this TLV object serializes to, excluding padding.
    fn serialized_size(&self) -> usize {
        TLV_HEADER_SIZE + self.value_size()
    }
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ChunkParseError {
    #[error("The TLV data has an invalid length field, or payload size")]
    InvalidLength,

    #[error("Unexpected TLV type")]
    InvalidType,

    #[error("Invalid value")]
    InvalidValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_round_trips_through_u8() {
        for typ in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 0x80, 130, 192, 0xc1, 77] {
            assert_eq!(u8::from(ChunkType::from(typ)), typ);
        }
        assert_eq!(ChunkType::from(77), ChunkType::Unknown(77));
        assert_eq!(ChunkType::from(192), ChunkType::ForwardTsn);
    }

    #[test]
    fn chunk_type_display() {
        assert_eq!(ChunkType::CookieEcho.to_string(), "COOKIE-ECHO");
        assert_eq!(ChunkType::Unknown(99).to_string(), "UNKNOWN(99)");
    }

    #[test]
    fn read_and_write_big_endian() {
        let mut a: Vec<u8> = vec![0; 6];
        write_u16_be!(&mut a, 0xcafe);
        write_u32_be!(&mut a[2..], 0xdeadbeef_u32);
        assert_eq!(a, &[0xca, 0xfe, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(read_u16_be!(&a), 0xcafe);
        assert_eq!(read_u32_be!(&a[2..]), 0xdeadbeef);
    }
}
