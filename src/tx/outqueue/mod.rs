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

use crate::api::ErrorKind;
use crate::api::OutQueueEvent;
use crate::api::SocketTime;
use crate::association::Association;
use crate::association::AssociationState;
use crate::association::transport::TransportId;
use crate::tx::chunk_record::ChunkArena;
use crate::tx::chunk_record::ChunkId;
use crate::tx::chunk_record::ChunkRecord;
use crate::tx::chunk_record::FastRetransmit;
use crate::tx::chunk_record::Location;
use std::collections::VecDeque;

mod flush;
mod forward_tsn;
mod retransmit;
mod sack;


pub use retransmit::RetransmitReason;

/// The outbound queue of an association.
///
/// Owns every chunk from the moment it's enqueued until it's acknowledged, abandoned or failed.
/// Chunks move between these lists:
///
/// ```txt
///              enqueue
///                 |
///                 v
///    +--------------------------+   flush    +--------------------------+
///    | pending data / control   | ---------> | transmitted (per dest.)  |
///    +--------------------------+            +--------------------------+
///                                   flush_rtx    ^   |       |     |
///                  +-----------------------------+   |       |     | SACK (<= cum ack)
///                  |            retransmit_mark      |       |     v
///    +--------------------------+ <------------------+       |  +--------+
///    | retransmit (TSN order)   |                            |  | sacked |
///    +--------------------------+                            |  +--------+
///                  |               abandoned by PR policy    v
///                  +-------------------------------> +-----------+
///                                                     | abandoned |
///                                                     +-----------+
/// ```
///
/// Operations that need the association's state take it as a parameter, as the association (and
/// its transports) and the queue are owned side by side.
pub struct OutQueue {
    chunks: ChunkArena,

    /// DATA chunks waiting for their first transmission, in FIFO order.
    out_chunk_list: VecDeque<ChunkId>,
    control_chunk_list: VecDeque<ChunkId>,

    /// DATA chunks marked for retransmission, ordered by TSN.
    retransmit: VecDeque<ChunkId>,

    /// DATA chunks acknowledged by the cumulative TSN ack, waiting to be freed.
    sacked: Vec<ChunkId>,

    /// DATA chunks given up on, ordered by TSN, until the peer has been told to skip them.
    abandoned: VecDeque<ChunkId>,

    /// Bytes of DATA in any transmitted list that have not been acknowledged.
    outstanding_bytes: usize,

    /// Serialized size of the chunks waiting in the pending data and control lists.
    out_qlen: usize,

    empty: bool,
    cork: bool,

    /// The next pass over the retransmit queue only sends chunks marked for fast retransmit.
    fast_rtx: bool,

    /// Reported for the chunks that are failed when the queue is torn down.
    error: ErrorKind,
}

impl Default for OutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutQueue {
    pub fn new() -> Self {
        Self {
            chunks: ChunkArena::default(),
            out_chunk_list: VecDeque::new(),
            control_chunk_list: VecDeque::new(),
            retransmit: VecDeque::new(),
            sacked: Vec::new(),
            abandoned: VecDeque::new(),
            outstanding_bytes: 0,
            out_qlen: 0,
            empty: true,
            cork: false,
            fast_rtx: false,
            error: ErrorKind::NoError,
        }
    }

    /// Queues a chunk for transmission, and sends it right away unless the queue is corked.
    ///
    /// DATA chunks are rejected while the association is closed or shutting down. Control chunks
    /// are always accepted.
    pub fn enqueue(
        &mut self,
        assoc: &mut Association,
        chunk: ChunkRecord,
        now: SocketTime,
    ) -> Result<ChunkId, ErrorKind> {
        let id = if chunk.is_data() {
            if assoc.state == AssociationState::Closed || assoc.state.is_shutting_down() {
                log::debug!("rejecting DATA in state {:?}", assoc.state);
                report_failed(assoc, chunk, ErrorKind::Shutdown);
                return Err(ErrorKind::Shutdown);
            }
            if chunk.data_payload().is_some_and(|d| d.stream_key.is_unordered()) {
                assoc.stats.out_unordered_chunks += 1;
            } else {
                assoc.stats.out_ordered_chunks += 1;
            }
            self.empty = false;
            let id = self.chunks.insert(chunk);
            self.push_back_pending(id);
            id
        } else {
            self.push_control(chunk)
        };

        if !self.cork {
            self.flush(assoc, false, now)?;
        }
        Ok(id)
    }

    /// Holds back transmission on enqueue, to bundle multiple chunks.
    pub fn cork(&mut self) {
        self.cork = true;
    }

    /// Releases the cork and sends what has been queued.
    pub fn uncork(&mut self, assoc: &mut Association, now: SocketTime) -> Result<(), ErrorKind> {
        self.cork = false;
        self.flush(assoc, false, now)
    }

    /// Fails every DATA chunk still owned by the queue with the error set by [`Self::set_error`],
    /// frees all chunks and resets the queue.
    pub fn teardown(&mut self, assoc: &mut Association) {
        let error = self.error;
        log::debug!("tearing down outqueue, error={:?}", error);

        let transports: Vec<TransportId> = assoc.transports.keys().copied().collect();
        for tid in transports {
            let Some(transport) = assoc.transport_mut(tid) else {
                continue;
            };
            let transmitted = std::mem::take(&mut transport.transmitted);
            transport.flight_size = 0;
            transport.rto_pending = false;
            transport.stop_t3();
            for id in transmitted {
                self.fail(assoc, id, error);
            }
        }

        let failed: Vec<ChunkId> = self
            .sacked
            .drain(..)
            .chain(self.retransmit.drain(..))
            .chain(self.abandoned.drain(..))
            .chain(self.out_chunk_list.drain(..))
            .collect();
        for id in failed {
            self.fail(assoc, id, error);
        }
        for id in std::mem::take(&mut self.control_chunk_list) {
            self.chunks.remove(id);
        }
        debug_assert_eq!(self.chunks.len(), 0);

        self.outstanding_bytes = 0;
        self.out_qlen = 0;
        self.empty = true;
        self.cork = false;
        self.fast_rtx = false;
        self.error = ErrorKind::NoError;
    }

    /// Removes a destination from the association.
    ///
    /// Chunks in flight to it are moved to the active path. They are no longer bound to any
    /// transport, so when they are acknowledged no flight size is reduced for them.
    pub fn remove_transport(&mut self, assoc: &mut Association, id: TransportId, now: SocketTime) {
        let Some(mut removed) = assoc.detach_transport(id) else {
            return;
        };
        log::debug!("removing {}", id);
        for (_, chunk) in self.chunks.iter_mut() {
            if chunk.transport == Some(id) {
                chunk.transport = None;
                chunk.rtt_in_progress = false;
            }
        }

        let moved = std::mem::take(&mut removed.transmitted);
        if moved.is_empty() {
            return;
        }
        let from = Location::Transmitted(id);
        match assoc.active_path.and_then(|tid| assoc.transports.get_mut(&tid)) {
            Some(transport) => {
                let to = Location::Transmitted(transport.id());
                for cid in &moved {
                    self.chunks[*cid].relocate(from, to);
                }
                transport.transmitted.extend(moved);
                transport.reset_timers(now);
            }
            None => {
                // No destination left to keep them in flight on.
                for cid in moved {
                    let chunk = &mut self.chunks[cid];
                    if !chunk.tsn_gap_acked {
                        self.outstanding_bytes -= chunk.data_size();
                        assoc.peer_rwnd += chunk.data_size();
                    }
                    chunk.resent = true;
                    chunk.tsn_missing_report = 0;
                    chunk.relocate(from, Location::Retransmit);
                    insert_by_tsn(&self.chunks, &mut self.retransmit, cid);
                }
            }
        }
    }

    /// If nothing is queued, in flight or waiting to be retransmitted, as of the last SACK.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    pub fn out_qlen(&self) -> usize {
        self.out_qlen
    }

    pub fn error(&self) -> ErrorKind {
        self.error
    }

    /// Sets the error reported for chunks failed by a later [`Self::teardown`].
    pub fn set_error(&mut self, error: ErrorKind) {
        self.error = error;
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&ChunkRecord> {
        self.chunks.get(id)
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut ChunkRecord> {
        self.chunks.get_mut(id)
    }

    /// Chunks waiting to be retransmitted, in TSN order.
    pub fn retransmit_queue(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.retransmit.iter().copied()
    }

    /// Verifies the queue's bookkeeping against the chunks it holds. Mismatches are logged.
    pub fn is_consistent(&self, assoc: &Association) -> bool {
        let mut problems: Vec<String> = Vec::new();

        let queued: usize = self
            .out_chunk_list
            .iter()
            .chain(&self.control_chunk_list)
            .filter_map(|id| self.chunks.get(*id))
            .map(|c| c.serialized_size())
            .sum();
        if queued != self.out_qlen {
            problems.push(format!("out_qlen={}, queued={}", self.out_qlen, queued));
        }

        let mut expected: Vec<(ChunkId, Location)> = Vec::new();
        expected.extend(self.out_chunk_list.iter().map(|id| (*id, Location::Pending)));
        expected.extend(self.control_chunk_list.iter().map(|id| (*id, Location::Control)));
        expected.extend(self.retransmit.iter().map(|id| (*id, Location::Retransmit)));
        expected.extend(self.sacked.iter().map(|id| (*id, Location::Sacked)));
        expected.extend(self.abandoned.iter().map(|id| (*id, Location::Abandoned)));
        for transport in assoc.transports.values() {
            let location = Location::Transmitted(transport.id());
            expected.extend(transport.transmitted.iter().map(|id| (*id, location)));
        }
        for (id, location) in &expected {
            if self.chunks.get(*id).is_none_or(|c| c.location != *location) {
                problems.push(format!("chunk {} is not in {:?}", id, location));
            }
        }
        if expected.len() != self.chunks.len() {
            let owned = self.chunks.len();
            problems.push(format!("{} chunks in lists, {} owned", expected.len(), owned));
        }

        for (name, list) in [("retransmit", &self.retransmit), ("abandoned", &self.abandoned)] {
            if !list.iter().map(|id| self.chunks.get(*id).and_then(|c| c.tsn)).is_sorted() {
                problems.push(format!("{} list is not ordered by TSN", name));
            }
        }

        let mut outstanding = 0;
        for transport in assoc.transports.values() {
            let in_flight = transport
                .transmitted
                .iter()
                .filter_map(|id| self.chunks.get(*id))
                .filter(|c| !c.tsn_gap_acked);
            let mut flight_size = 0;
            for chunk in in_flight {
                outstanding += chunk.data_size();
                if chunk.transport.is_some() {
                    flight_size += chunk.data_size();
                }
            }
            if flight_size != transport.flight_size {
                problems.push(format!(
                    "{}: flight_size={}, in flight={}",
                    transport.id(),
                    transport.flight_size,
                    flight_size
                ));
            }
        }
        for transport in assoc.transports.values() {
            let sampling = transport
                .transmitted
                .iter()
                .filter_map(|id| self.chunks.get(*id))
                .filter(|c| c.rtt_in_progress)
                .count();
            if sampling > 1 || (sampling == 1) != transport.rto_pending {
                problems.push(format!(
                    "{}: rto_pending={}, {} chunks measuring the round-trip time",
                    transport.id(),
                    transport.rto_pending,
                    sampling
                ));
            }
        }
        if outstanding != self.outstanding_bytes {
            problems.push(format!(
                "outstanding_bytes={}, outstanding={}",
                self.outstanding_bytes, outstanding
            ));
        }

        for problem in &problems {
            log::warn!("inconsistent outqueue: {}", problem);
        }
        problems.is_empty()
    }

    fn push_back_pending(&mut self, id: ChunkId) {
        let chunk = &mut self.chunks[id];
        chunk.relocate(Location::Unqueued, Location::Pending);
        self.out_qlen += chunk.serialized_size();
        self.out_chunk_list.push_back(id);
    }

    /// Returns a chunk taken from the pending data list to its head.
    fn push_front_pending(&mut self, id: ChunkId) {
        self.out_qlen += self.chunks[id].serialized_size();
        self.out_chunk_list.push_front(id);
    }

    /// Takes the chunk at the head of the pending data list.
    fn pop_pending(&mut self) -> Option<ChunkId> {
        let id = self.out_chunk_list.pop_front()?;
        self.out_qlen -= self.chunks[id].serialized_size();
        Some(id)
    }

    fn push_control(&mut self, chunk: ChunkRecord) -> ChunkId {
        let id = self.chunks.insert(chunk);
        let chunk = &mut self.chunks[id];
        chunk.relocate(Location::Unqueued, Location::Control);
        self.out_qlen += chunk.serialized_size();
        self.control_chunk_list.push_back(id);
        id
    }

    /// Frees a control chunk that has left the control list.
    fn free_control(&mut self, id: ChunkId) {
        if let Some(chunk) = self.chunks.remove(id) {
            self.out_qlen -= chunk.serialized_size();
        }
    }

    /// Frees a chunk, reporting it to the user as failed if it's DATA.
    fn fail(&mut self, assoc: &Association, id: ChunkId, error: ErrorKind) {
        if let Some(chunk) = self.chunks.remove(id) {
            report_failed(assoc, chunk, error);
        }
    }

    /// Demotes the chunks selected for fast retransmit that couldn't be sent in this pass.
    fn demote_fast_retransmit(&mut self) {
        for id in &self.retransmit {
            let chunk = &mut self.chunks[*id];
            if chunk.fast_retransmit == FastRetransmit::NeedFrtx {
                chunk.fast_retransmit = FastRetransmit::DontFrtx;
            }
        }
    }
}

fn report_failed(assoc: &Association, chunk: ChunkRecord, error: ErrorKind) {
    let Some(stream_id) = chunk.stream_id() else {
        return;
    };
    let tsn = chunk.tsn();
    log::debug!("failed chunk tsn={:?}, stream={}: {:?}", tsn, stream_id, error);
    assoc.events.borrow_mut().add(OutQueueEvent::ChunkFailed {
        tsn,
        stream_id,
        error,
        payload: chunk.into_payload(),
    });
}

/// Inserts a chunk into a list that is kept ordered by TSN.
fn insert_by_tsn(chunks: &ChunkArena, list: &mut VecDeque<ChunkId>, id: ChunkId) {
    let tsn = chunks[id].tsn;
    let index = list.partition_point(|other| chunks[*other].tsn <= tsn);
    list.insert(index, id);
}
