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

use crate::EventSink;
use crate::api::ErrorKind;
use crate::api::OutQueueEvent;
use crate::api::TransportId;
use crate::math::is_divisible_by_4;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::ChunkType;
use crate::packet::crc32c::Crc32c;
use crate::packet::data_chunk;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::tx::chunk_record::ChunkRecord;
use crate::tx::chunk_record::FastRetransmit;
use std::cell::RefCell;
use std::rc::Rc;

pub const COMMON_HEADER_SIZE: usize = 12;

/// The outcome of trying to add a chunk to a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendStatus {
    Ok,
    /// The chunk doesn't fit in the remaining space of the packet.
    PmtuFull,
    /// The peer's receiver window, or the congestion window, doesn't allow more data.
    RwndFull,
    /// The chunk is held back to be bundled with more data later (Nagle's algorithm).
    NagleDelay,
}

/// The counters that decide if a DATA chunk may be sent, snapshotted by the outqueue for each
/// append.
#[derive(Clone, Copy, Debug, Default)]
pub struct SendWindow {
    /// The peer's receiver window, as last advertised minus what has been sent since.
    pub peer_rwnd: usize,
    /// Bytes sent and not yet acknowledged, over all destinations.
    pub outstanding_bytes: usize,
    /// Bytes in flight to the destination of this packet.
    pub flight_size: usize,
    /// Congestion window of the destination of this packet.
    pub cwnd: usize,
    /// Bytes still queued in the outqueue, not counting the chunk being appended.
    pub queued_bytes: usize,
    pub nodelay: bool,
    /// If the association is established. Nagle's algorithm only applies then.
    pub established: bool,
}

/// A packet being built for a single destination, to which chunks are appended until it's
/// transmitted.
pub trait OutboundPacket {
    /// Prepares the packet to be filled. The verification tag is only changed if the packet is
    /// empty.
    fn configure(&mut self, verification_tag: u32);

    /// Overrides the verification tag of the packet being built.
    fn set_verification_tag(&mut self, verification_tag: u32);

    /// Tries to add `chunk` to the packet. DATA chunks are also checked against `window`.
    fn append_chunk(&mut self, chunk: &ChunkRecord, window: &SendWindow) -> AppendStatus;

    /// Sends the packet, if it's not empty, and resets it.
    fn transmit(&mut self) -> Result<(), ErrorKind>;

    /// Sends `chunk` alone, in a packet of its own with the provided verification tag, without
    /// affecting the packet being built.
    fn send_singleton(&mut self, chunk: &ChunkRecord, verification_tag: u32)
    -> Result<(), ErrorKind>;

    fn is_empty(&self) -> bool;

    /// If any DATA chunk has been added to the packet.
    fn has_data(&self) -> bool;

    /// If a COOKIE-ECHO chunk has been added to the packet.
    fn has_cookie_echo(&self) -> bool;
}

/// Builds SCTP packets (RFC 9260 section 3) for a destination, and emits them as
/// [`OutQueueEvent::SendPacket`] events when transmitted.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Source Port Number       |    Destination Port Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Verification Tag                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Checksum                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub struct SctpPacketBuilder {
    transport: TransportId,
    verification_tag: u32,
    source_port: u16,
    dest_port: u16,
    max_packet_size: usize,
    data: Vec<u8>,
    has_data: bool,
    has_cookie_echo: bool,
    events: Rc<RefCell<dyn EventSink>>,
}

impl SctpPacketBuilder {
    pub fn new(
        transport: TransportId,
        source_port: u16,
        dest_port: u16,
        max_packet_size: usize,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        Self {
            transport,
            verification_tag: 0,
            source_port,
            dest_port,
            max_packet_size: round_down_to_4!(max_packet_size),
            data: vec![],
            has_data: false,
            has_cookie_echo: false,
            events,
        }
    }

    fn write_common_header(&self, out: &mut Vec<u8>, verification_tag: u32) {
        out.reserve(self.max_packet_size);
        out.resize(COMMON_HEADER_SIZE, 0);
        write_u16_be!(&mut out[0..2], self.source_port);
        write_u16_be!(&mut out[2..4], self.dest_port);
        write_u32_be!(&mut out[4..8], verification_tag);
        // Checksum is at offset 8 - written when the packet is finalized.
    }

    fn add(out: &mut Vec<u8>, chunk: &ChunkRecord) {
        debug_assert!(is_divisible_by_4!(out.len()));
        let offset = out.len();
        let size = chunk.serialized_size();
        out.resize(round_up_to_4!(offset + size), 0);
        chunk.serialize_to(&mut out[offset..offset + size]);
    }

    /// Writes the checksum into a completed packet. Note that the CRC-32C value is stored in the
    /// packet in little endian byte order.
    fn finalize(mut out: Vec<u8>) -> Vec<u8> {
        let mut crc = Crc32c::new();
        crc.digest(&out);
        out[8..12].copy_from_slice(&crc.value().to_le_bytes());
        out
    }

    /// Checks if a DATA chunk may be sent now.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.1>.
    fn can_append_data(&self, chunk: &ChunkRecord, window: &SendWindow) -> AppendStatus {
        let size = chunk.data_size();

        // Rule A: the receiver window may be exceeded only to probe it, when nothing is in flight.
        if size > window.peer_rwnd && window.outstanding_bytes > 0 {
            return AppendStatus::RwndFull;
        }

        // Rule B: the congestion window, except for fast retransmissions.
        if chunk.fast_retransmit() != FastRetransmit::NeedFrtx && window.flight_size >= window.cwnd
        {
            return AppendStatus::RwndFull;
        }

        if window.nodelay || window.outstanding_bytes == 0 {
            return AppendStatus::Ok;
        }
        if !self.is_empty() || !window.established {
            return AppendStatus::Ok;
        }
        let max_data_size = self.max_packet_size - COMMON_HEADER_SIZE - data_chunk::HEADER_SIZE;
        if chunk.serialized_size() + window.queued_bytes > max_data_size {
            return AppendStatus::Ok;
        }
        AppendStatus::NagleDelay
    }
}

impl OutboundPacket for SctpPacketBuilder {
    fn configure(&mut self, verification_tag: u32) {
        if self.is_empty() {
            self.verification_tag = verification_tag;
        }
    }

    fn set_verification_tag(&mut self, verification_tag: u32) {
        self.verification_tag = verification_tag;
        if !self.data.is_empty() {
            write_u32_be!(&mut self.data[4..8], verification_tag);
        }
    }

    fn append_chunk(&mut self, chunk: &ChunkRecord, window: &SendWindow) -> AppendStatus {
        if chunk.is_data() {
            let status = self.can_append_data(chunk, window);
            if status != AppendStatus::Ok {
                return status;
            }
        }

        // An empty packet always accepts a chunk, which is then left to be fragmented at the IP
        // layer.
        let size = round_up_to_4!(chunk.serialized_size());
        if !self.is_empty() && self.data.len() + size > self.max_packet_size {
            return AppendStatus::PmtuFull;
        }

        if self.data.is_empty() {
            let mut data = std::mem::take(&mut self.data);
            self.write_common_header(&mut data, self.verification_tag);
            self.data = data;
        }
        Self::add(&mut self.data, chunk);

        match chunk.chunk_type() {
            ChunkType::Data => self.has_data = true,
            ChunkType::CookieEcho => self.has_cookie_echo = true,
            _ => {}
        }
        AppendStatus::Ok
    }

    fn transmit(&mut self) -> Result<(), ErrorKind> {
        if self.data.is_empty() {
            return Ok(());
        }
        let packet = Self::finalize(std::mem::take(&mut self.data));
        self.has_data = false;
        self.has_cookie_echo = false;
        let transport = self.transport;
        self.events.borrow_mut().add(OutQueueEvent::SendPacket { transport, packet });
        Ok(())
    }

    fn send_singleton(
        &mut self,
        chunk: &ChunkRecord,
        verification_tag: u32,
    ) -> Result<(), ErrorKind> {
        let mut data = vec![];
        self.write_common_header(&mut data, verification_tag);
        Self::add(&mut data, chunk);
        let packet = Self::finalize(data);
        let transport = self.transport;
        self.events.borrow_mut().add(OutQueueEvent::SendPacket { transport, packet });
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn has_data(&self) -> bool {
        self.has_data
    }

    fn has_cookie_echo(&self) -> bool {
        self.has_cookie_echo
    }
}
