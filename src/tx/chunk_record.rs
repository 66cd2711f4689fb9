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

use crate::api::SocketTime;
use crate::api::StreamId;
use crate::api::TransportId;
use crate::packet::ChunkType;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::chunk::write_chunk_header;
use crate::packet::data::Data;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::types::Tsn;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::ops::Index;
use std::ops::IndexMut;

/// The T-bit of the ABORT and SHUTDOWN-COMPLETE chunks: the verification tag is reflected.
pub(crate) const FLAG_T_BIT: u8 = 0x01;

/// Stable handle of a chunk owned by the outqueue.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChunkId(u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fast retransmit state of a DATA chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastRetransmit {
    /// Eligible for fast retransmit: missing reports are counted.
    CanFrtx,
    /// Selected for the next fast retransmit pass.
    NeedFrtx,
    /// Already fast retransmitted. Only a T3-rtx timeout may retransmit it again.
    DontFrtx,
}

/// Partial reliability policy of a DATA chunk.
///
/// See <https://datatracker.ietf.org/doc/html/rfc3758#section-3.1> and
/// <https://datatracker.ietf.org/doc/html/rfc7496#section-3>.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrPolicy {
    /// Fully reliable.
    Reliable,
    /// Abandoned once the lifetime has expired, at the given time.
    Ttl(SocketTime),
    /// Abandoned once it has been retransmitted more than the given number of times.
    Rtx(u16),
}

/// The list a chunk is currently in. Every chunk owned by the outqueue is in exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Location {
    /// Not yet handed to the outqueue.
    Unqueued,
    /// The pending DATA FIFO.
    Pending,
    /// The pending control chunk FIFO.
    Control,
    /// The transmitted list of a transport.
    Transmitted(TransportId),
    Retransmit,
    Sacked,
    Abandoned,
}

#[derive(Debug)]
pub(crate) struct ControlChunk {
    pub typ: ChunkType,
    pub flags: u8,
    pub value: Vec<u8>,
    pub destination: Option<SocketAddr>,
}

#[derive(Debug)]
pub(crate) enum ChunkBody {
    Data(Data),
    Control(ControlChunk),
}

/// An outbound chunk, together with its transmission and acknowledgement state.
#[derive(Debug)]
pub struct ChunkRecord {
    body: ChunkBody,

    /// Assigned when the chunk is first accepted into a packet.
    pub(crate) tsn: Option<Tsn>,

    /// The transport the chunk is bound to. Set by the producer to select a destination, or by
    /// the outqueue to the transport it was last sent on. Cleared when that transport is removed.
    pub(crate) transport: Option<TransportId>,

    pub(crate) tsn_gap_acked: bool,
    pub(crate) tsn_missing_report: u32,
    pub(crate) fast_retransmit: FastRetransmit,

    /// This chunk is the one used to take the round-trip time sample of its transport.
    pub(crate) rtt_in_progress: bool,

    /// Set when the chunk is marked for retransmission. Retransmitted chunks never provide RTT
    /// samples (Karn's algorithm).
    pub(crate) resent: bool,

    /// Sets the I-bit ("SACK immediately") when the chunk is written to a packet.
    pub(crate) immediate_ack: bool,

    pub(crate) sent_at: Option<SocketTime>,
    pub(crate) sent_count: u32,

    abandoned: bool,
    pr_policy: PrPolicy,

    pub(crate) location: Location,
}

impl ChunkRecord {
    fn new(body: ChunkBody) -> Self {
        Self {
            body,
            tsn: None,
            transport: None,
            tsn_gap_acked: false,
            tsn_missing_report: 0,
            fast_retransmit: FastRetransmit::CanFrtx,
            rtt_in_progress: false,
            resent: false,
            immediate_ack: false,
            sent_at: None,
            sent_count: 0,
            abandoned: false,
            pr_policy: PrPolicy::Reliable,
            location: Location::Unqueued,
        }
    }

    /// Creates a DATA chunk. Its TSN is assigned when it's sent.
    pub fn data(data: Data) -> Self {
        Self::new(ChunkBody::Data(data))
    }

    /// Creates a control chunk of type `typ`, with an already encoded chunk value (excluding the
    /// chunk header).
    pub fn control(typ: ChunkType, flags: u8, value: Vec<u8>) -> Self {
        debug_assert!(typ != ChunkType::Data);
        Self::new(ChunkBody::Control(ControlChunk { typ, flags, value, destination: None }))
    }

    /// Binds the chunk to a transport, which will be used as destination when it's active.
    pub fn with_transport(mut self, transport: TransportId) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Requests a control chunk to be sent to a specific peer address.
    pub fn with_destination(mut self, destination: SocketAddr) -> Self {
        if let ChunkBody::Control(control) = &mut self.body {
            control.destination = Some(destination);
        }
        self
    }

    pub fn with_pr_policy(mut self, policy: PrPolicy) -> Self {
        self.pr_policy = policy;
        self
    }

    pub fn chunk_type(&self) -> ChunkType {
        match &self.body {
            ChunkBody::Data(_) => ChunkType::Data,
            ChunkBody::Control(control) => control.typ,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.body, ChunkBody::Data(_))
    }

    pub fn data_payload(&self) -> Option<&Data> {
        match &self.body {
            ChunkBody::Data(data) => Some(data),
            ChunkBody::Control(_) => None,
        }
    }

    pub(crate) fn control_chunk(&self) -> Option<&ControlChunk> {
        match &self.body {
            ChunkBody::Data(_) => None,
            ChunkBody::Control(control) => Some(control),
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.data_payload().map(|d| d.stream_key.id())
    }

    pub fn tsn(&self) -> Option<Tsn> {
        self.tsn
    }

    pub fn transport(&self) -> Option<TransportId> {
        self.transport
    }

    pub fn flags(&self) -> u8 {
        match &self.body {
            ChunkBody::Data(_) => 0,
            ChunkBody::Control(control) => control.flags,
        }
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.control_chunk().and_then(|c| c.destination)
    }

    /// Size of the user data, which is what counts towards flight size, outstanding bytes and the
    /// peer's receiver window. Zero for control chunks.
    pub fn data_size(&self) -> usize {
        self.data_payload().map_or(0, |d| d.payload.len())
    }

    /// Serialized size, excluding padding.
    pub fn serialized_size(&self) -> usize {
        match &self.body {
            ChunkBody::Data(data) => data_chunk::HEADER_SIZE + data.payload.len(),
            ChunkBody::Control(control) => TLV_HEADER_SIZE + control.value.len(),
        }
    }

    pub fn is_gap_acked(&self) -> bool {
        self.tsn_gap_acked
    }

    pub fn missing_reports(&self) -> u32 {
        self.tsn_missing_report
    }

    pub fn fast_retransmit(&self) -> FastRetransmit {
        self.fast_retransmit
    }

    pub fn is_resent(&self) -> bool {
        self.resent
    }

    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    /// Marks the chunk as abandoned, e.g. by a partial reliability policy evaluated outside the
    /// outqueue. Only has an effect when partial reliability has been negotiated.
    pub fn mark_abandoned(&mut self) {
        self.abandoned = true;
    }

    /// Indicates if the chunk should be given up on, by its marker or by its policy.
    pub fn is_abandoned(&self, now: SocketTime) -> bool {
        if !self.is_data() {
            return false;
        }
        self.abandoned
            || match self.pr_policy {
                PrPolicy::Reliable => false,
                PrPolicy::Ttl(expires_at) => now >= expires_at,
                PrPolicy::Rtx(max_retransmissions) => self.sent_count > max_retransmissions as u32,
            }
    }

    /// Takes the user payload of a DATA chunk that is being discarded.
    pub(crate) fn into_payload(self) -> Vec<u8> {
        match self.body {
            ChunkBody::Data(data) => data.payload,
            ChunkBody::Control(_) => vec![],
        }
    }

    /// Moves the chunk between lists. The source is asserted to catch bookkeeping errors.
    pub(crate) fn relocate(&mut self, from: Location, to: Location) {
        debug_assert_eq!(self.location, from, "chunk tsn={:?} is in unexpected list", self.tsn);
        self.location = to;
    }

    /// Writes the chunk, which must fit in `output`. A DATA chunk must have a TSN.
    pub(crate) fn serialize_to(&self, output: &mut [u8]) {
        match &self.body {
            ChunkBody::Data(data) => {
                debug_assert!(self.tsn.is_some());
                DataChunk {
                    tsn: self.tsn.unwrap_or_default(),
                    immediate_ack: self.immediate_ack,
                    data: Cow::Borrowed(data),
                }
                .serialize_to(output);
            }
            ChunkBody::Control(control) => {
                let value =
                    write_chunk_header(control.typ, control.flags, control.value.len(), output);
                value.copy_from_slice(&control.value);
            }
        }
    }
}

/// Owner of all chunks in the outqueue. Lists reference chunks by [`ChunkId`].
#[derive(Default)]
pub(crate) struct ChunkArena {
    chunks: HashMap<ChunkId, ChunkRecord>,
    next_id: u64,
}

impl ChunkArena {
    pub fn insert(&mut self, chunk: ChunkRecord) -> ChunkId {
        let id = ChunkId(self.next_id);
        self.next_id += 1;
        self.chunks.insert(id, chunk);
        id
    }

    pub fn get(&self, id: ChunkId) -> Option<&ChunkRecord> {
        self.chunks.get(&id)
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut ChunkRecord> {
        self.chunks.get_mut(&id)
    }

    pub fn remove(&mut self, id: ChunkId) -> Option<ChunkRecord> {
        self.chunks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ChunkId, &mut ChunkRecord)> {
        self.chunks.iter_mut().map(|(id, chunk)| (*id, chunk))
    }
}

impl Index<ChunkId> for ChunkArena {
    type Output = ChunkRecord;

    fn index(&self, id: ChunkId) -> &ChunkRecord {
        &self.chunks[&id]
    }
}

impl IndexMut<ChunkId> for ChunkArena {
    fn index_mut(&mut self, id: ChunkId) -> &mut ChunkRecord {
        match self.chunks.get_mut(&id) {
            Some(chunk) => chunk,
            None => panic!("no chunk {id} in arena"),
        }
    }
}
