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
use crate::api::SocketTime;
use crate::association::Association;
use crate::association::AssociationState;
use crate::association::transport::TransportId;
use crate::tx::chunk_record::FastRetransmit;
use crate::tx::chunk_record::Location;
use crate::tx::congestion::LowerCwndReason;
use crate::tx::outqueue::OutQueue;
use crate::tx::outqueue::insert_by_tsn;

/// Why chunks sent to a transport are retransmitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmitReason {
    /// The T3-rtx timer of the transport expired.
    T3Rtx,
    /// Chunks were reported missing by enough SACKs.
    FastRtx,
    /// The path MTU decreased.
    Pmtud,
    /// The T1-init timer expired.
    T1Rtx,
}

impl OutQueue {
    /// Marks the chunks sent to `tid` for retransmission, and sends them unless `reason` is
    /// fast retransmit, where the caller flushes after having processed the whole SACK.
    pub fn retransmit(
        &mut self,
        assoc: &mut Association,
        tid: TransportId,
        reason: RetransmitReason,
        now: SocketTime,
    ) -> Result<(), ErrorKind> {
        self.prepare_retransmit(assoc, tid, reason, now);
        if reason == RetransmitReason::FastRtx {
            return Ok(());
        }
        self.flush(assoc, true, now)
    }

    pub(crate) fn prepare_retransmit(
        &mut self,
        assoc: &mut Association,
        tid: TransportId,
        reason: RetransmitReason,
        now: SocketTime,
    ) {
        let Some(transport) = assoc.transports.get_mut(&tid) else {
            return;
        };
        match reason {
            RetransmitReason::T3Rtx => {
                assoc.stats.t3_retransmits += 1;
                assoc.congestion.lower_cwnd(
                    &mut transport.window,
                    &mut assoc.fast_recovery,
                    LowerCwndReason::T3Rtx,
                    assoc.next_tsn,
                );
                if assoc.retran_path == Some(tid) {
                    assoc.update_retran_path();
                }
                assoc.stats.rtx_data_chunks += u64::from(assoc.unack_data);
            }
            RetransmitReason::FastRtx => {
                assoc.stats.fast_retransmits += 1;
                assoc.congestion.lower_cwnd(
                    &mut transport.window,
                    &mut assoc.fast_recovery,
                    LowerCwndReason::FastRtx,
                    assoc.next_tsn,
                );
                self.fast_rtx = true;
            }
            RetransmitReason::Pmtud => {
                assoc.stats.pmtud_retransmits += 1;
            }
            RetransmitReason::T1Rtx => {
                assoc.stats.t1_retransmits += 1;
                assoc.init_retries += 1;
            }
        }

        self.retransmit_mark(assoc, tid, reason, now);

        // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5-2.10.1>:
        //
        //   A5) Any time the T3-rtx timer expires, on any destination, the sender SHOULD try to
        //   advance the "Advanced.Peer.Ack.Point" by following the procedures outlined in C2 -
        //   C5.
        if reason == RetransmitReason::T3Rtx {
            let ctsn_ack_point = assoc.ctsn_ack_point;
            self.generate_fwdtsn(assoc, ctsn_ack_point);
        }
    }

    /// Moves the chunks sent to `tid` that should be retransmitted to the retransmit queue, and
    /// the ones that are abandoned to the abandoned list. Their bytes are no longer in flight.
    ///
    /// For fast retransmit, only the chunks marked for it are moved. Otherwise, every chunk that
    /// hasn't been acknowledged by a gap ack block is.
    pub fn retransmit_mark(
        &mut self,
        assoc: &mut Association,
        tid: TransportId,
        reason: RetransmitReason,
        now: SocketTime,
    ) {
        let partial_reliability = assoc.capabilities.partial_reliability;
        let Some(transport) = assoc.transports.get_mut(&tid) else {
            return;
        };
        let from = Location::Transmitted(tid);
        let mut kept = Vec::with_capacity(transport.transmitted.len());
        let mut marked = 0;
        for id in std::mem::take(&mut transport.transmitted) {
            let chunk = &mut self.chunks[id];
            let size = chunk.data_size();

            if partial_reliability && chunk.is_abandoned(now) {
                if chunk.rtt_in_progress {
                    chunk.rtt_in_progress = false;
                    transport.rto_pending = false;
                }
                // The peer will consider it lost.
                if !chunk.tsn_gap_acked {
                    if chunk.transport.is_some() {
                        transport.flight_size -= size;
                    }
                    self.outstanding_bytes -= size;
                    assoc.peer_rwnd += size;
                }
                chunk.relocate(from, Location::Abandoned);
                insert_by_tsn(&self.chunks, &mut self.abandoned, id);
                continue;
            }

            let selected = match reason {
                RetransmitReason::FastRtx => chunk.fast_retransmit == FastRetransmit::NeedFrtx,
                _ => !chunk.tsn_gap_acked,
            };
            if !selected {
                kept.push(id);
                continue;
            }

            if !chunk.tsn_gap_acked {
                assoc.peer_rwnd += size;
                self.outstanding_bytes -= size;
                if chunk.transport.is_some() {
                    transport.flight_size -= size;
                }
            }
            // A chunk that's retransmitted can't be used to measure the round-trip time.
            if chunk.rtt_in_progress {
                chunk.rtt_in_progress = false;
                transport.rto_pending = false;
            }
            chunk.tsn_missing_report = 0;
            chunk.resent = true;
            chunk.relocate(from, Location::Retransmit);
            insert_by_tsn(&self.chunks, &mut self.retransmit, id);
            marked += 1;
        }
        transport.transmitted = kept.into();
        log::debug!(
            "{}: marked {} chunks for retransmission ({:?}), flight_size={}, outstanding={}",
            tid,
            marked,
            reason,
            transport.flight_size,
            self.outstanding_bytes
        );
    }

    /// Handles expired timers: retransmits on each destination whose T3-rtx timer expired, and
    /// aborts the association when the shutdown guard timer expired.
    pub fn handle_timeout(
        &mut self,
        assoc: &mut Association,
        now: SocketTime,
    ) -> Result<(), ErrorKind> {
        if assoc.shutdown_guard.expire(now) {
            log::info!("shutdown guard timer expired, aborting association");
            self.error = ErrorKind::Aborted;
            self.teardown(assoc);
            assoc.set_state(AssociationState::Closed, now);
            return Err(ErrorKind::Aborted);
        }

        let expired: Vec<TransportId> = assoc
            .transports
            .values_mut()
            .filter_map(|t| t.t3_rtx.expire(now).then_some(t.id()))
            .collect();

        let mut result = Ok(());
        for tid in expired {
            if let Some(transport) = assoc.transport_mut(tid) {
                transport.error_count += 1;
                log::info!("{}: T3-rtx expired, error_count={}", tid, transport.error_count);
            }
            assoc.overall_error_count += 1;

            let r = self.retransmit(assoc, tid, RetransmitReason::T3Rtx, now);
            if result.is_ok() {
                result = r;
            }

            // The timer keeps running only while there is something to retransmit on it.
            if let Some(transport) = assoc.transport_mut(tid).filter(|t| t.transmitted.is_empty()) {
                transport.stop_t3();
            }
        }
        result
    }
}
