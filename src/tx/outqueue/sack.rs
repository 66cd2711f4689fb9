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
use crate::association::Association;
use crate::association::AssociationState;
use crate::association::transport::Transport;
use crate::association::transport::TransportId;
use crate::association::transport::TransportState;
use crate::packet::sack_chunk::SackChunk;
use crate::tx::chunk_record::FastRetransmit;
use crate::tx::chunk_record::Location;
use crate::tx::outqueue::OutQueue;
use crate::tx::outqueue::RetransmitReason;
use crate::tx::outqueue::insert_by_tsn;
use crate::types::Tsn;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of missing reports after which a chunk is fast retransmitted.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4-2>.
const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// Returns true if `tsn` is acknowledged by the SACK, by its cumulative TSN ack or by a gap ack
/// block.
pub(crate) fn acked(sack: &SackChunk, tsn: Tsn) -> bool {
    let ctsn = sack.cumulative_tsn_ack;
    if tsn <= ctsn {
        return true;
    }
    // Gap ack block offsets are 16 bits.
    let offset = tsn.offset_from(ctsn) as u16;
    sack.gap_ack_blocks.iter().any(|block| block.start <= offset && offset <= block.end)
}

/// Returns true if a missing report for `tsn`, sent to `transport`, should not be counted, as the
/// TSN may only look missing because the primary path was changed while data was in flight.
///
/// See <https://datatracker.ietf.org/doc/html/draft-iyengar-sctp-cacc-03#section-4>.
pub(crate) fn cacc_skip(
    primary: Option<&Transport>,
    transport: &Transport,
    count_of_newacks: usize,
    tsn: Tsn,
) -> bool {
    let Some(primary) = primary else {
        return false;
    };
    if !primary.cacc.changeover_active {
        return false;
    }
    if !primary.cacc.cycling_changeover {
        // 3.1 d) Only the new primary may see newly acknowledged data from multiple
        // destinations, anything else was sent before the changeover.
        if count_of_newacks >= 2 && transport.id() != primary.id() {
            return true;
        }
        // 3.1 f) With new acks from at most one destination, only count misses on it.
        if count_of_newacks < 2 && !transport.cacc.cacc_saw_newack {
            return true;
        }
    }
    // 3.2) When cycling back, TSNs sent before the changeover were sent on the old paths.
    primary.cacc.cycling_changeover && tsn < primary.cacc.next_tsn_at_change
}

impl OutQueue {
    /// Processes a SACK chunk from the peer. Returns true if there's nothing left to send,
    /// retransmit or have acknowledged.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2.1>.
    pub fn sack(&mut self, assoc: &mut Association, sack: &SackChunk, now: SocketTime) -> bool {
        let sack_ctsn = sack.cumulative_tsn_ack;
        if sack_ctsn < assoc.ctsn_ack_point {
            log::debug!("ignoring stale {}, ctsn_ack_point={}", sack, assoc.ctsn_ack_point);
            return self.empty;
        }
        log::trace!("received {}", sack);
        let has_gaps = !sack.gap_ack_blocks.is_empty();

        let changeover_active = assoc
            .primary_path
            .and_then(|p| assoc.transports.get_mut(&p))
            .filter(|p| p.cacc.changeover_active)
            .map(|primary| {
                let passed = primary.cacc.next_tsn_at_change <= sack_ctsn;
                if passed {
                    primary.cacc.changeover_active = false;
                }
                passed
            });
        if let Some(clear_cycling) = changeover_active {
            for transport in assoc.transports.values_mut() {
                if clear_cycling {
                    transport.cacc.cycling_changeover = false;
                }
                if has_gaps {
                    transport.cacc.cacc_saw_newack = false;
                }
            }
        }

        let highest_tsn = sack.highest_tsn();
        if assoc.highest_sacked < highest_tsn {
            assoc.highest_sacked = highest_tsn;
        }

        let mut highest_new_tsn = sack_ctsn;
        self.check_transmitted(assoc, None, sack, &mut highest_new_tsn, now);
        let transports: Vec<TransportId> = assoc.transports.keys().copied().collect();
        let mut count_of_newacks = 0;
        for tid in &transports {
            self.check_transmitted(assoc, Some(*tid), sack, &mut highest_new_tsn, now);
            if assoc.transport(*tid).is_some_and(|t| t.cacc.cacc_saw_newack) {
                count_of_newacks += 1;
            }
        }

        let accum_moved = assoc.ctsn_ack_point < sack_ctsn;
        if accum_moved {
            assoc.ctsn_ack_point = sack_ctsn;
        }

        if has_gaps {
            if assoc.fast_recovery.is_active() && accum_moved {
                highest_new_tsn = highest_tsn;
            }
            for tid in &transports {
                self.mark_missing(assoc, *tid, highest_new_tsn, count_of_newacks, now);
            }
        }

        let gap_acked: u32 = sack.gap_ack_blocks.iter().map(|b| b.tsn_count()).sum();
        assoc.unack_data = assoc
            .next_tsn
            .offset_from(assoc.ctsn_ack_point)
            .saturating_sub(1)
            .saturating_sub(gap_acked);

        let ctsn = assoc.ctsn_ack_point;
        let chunks = &mut self.chunks;
        self.sacked.retain(|id| {
            let done = chunks[*id].tsn.is_some_and(|tsn| tsn <= ctsn);
            if done {
                chunks.remove(*id);
            }
            !done
        });

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2.1-5.2.1>:
        //
        //   Set rwnd equal to the newly received a_rwnd minus the number of bytes still
        //   outstanding after processing the Cumulative TSN Ack and the Gap Ack Blocks.
        assoc.peer_rwnd = (sack.a_rwnd as usize).saturating_sub(self.outstanding_bytes);

        self.generate_fwdtsn(assoc, sack_ctsn);

        self.empty = self.out_chunk_list.is_empty()
            && self.retransmit.is_empty()
            && assoc.transports.values().all(|t| t.transmitted.is_empty());
        self.empty
    }

    /// Applies the SACK to the transmitted list of `tid`, or to the retransmit queue when `tid` is
    /// None.
    ///
    /// Chunks acknowledged by the cumulative TSN ack move to the sacked list, chunks in gap ack
    /// blocks are marked, and chunks that were marked but no longer are (reneged) are unmarked.
    /// The highest newly acknowledged TSN is tracked in `highest_new_tsn`.
    fn check_transmitted(
        &mut self,
        assoc: &mut Association,
        tid: Option<TransportId>,
        sack: &SackChunk,
        highest_new_tsn: &mut Tsn,
        now: SocketTime,
    ) {
        let sack_ctsn = sack.cumulative_tsn_ack;
        let has_gaps = !sack.gap_ack_blocks.is_empty();
        let changeover_active = assoc
            .primary_path
            .and_then(|p| assoc.transport(p))
            .is_some_and(|p| p.cacc.changeover_active);

        let (location, list) = match tid {
            Some(tid) => match assoc.transports.get_mut(&tid) {
                Some(transport) => {
                    (Location::Transmitted(tid), std::mem::take(&mut transport.transmitted))
                }
                None => return,
            },
            None => (Location::Retransmit, std::mem::take(&mut self.retransmit)),
        };

        let mut kept = VecDeque::with_capacity(list.len());
        let mut restart_timer = false;
        let mut saw_newack = false;
        let mut rtt: Option<Duration> = None;
        // Signed, as a renege cancels an acknowledgement in the same SACK.
        let mut bytes_acked: isize = 0;
        let mut newly_acked = 0;
        let mut migrate_bytes: isize = 0;
        let mut abandoned_flight = 0;
        let mut rtt_cancelled = false;

        for id in list {
            let chunk = &mut self.chunks[id];
            let size = chunk.data_size();

            if assoc.is_abandoned(chunk, now) {
                if chunk.rtt_in_progress {
                    chunk.rtt_in_progress = false;
                    rtt_cancelled = true;
                }
                // Chunks in the retransmit queue are already out of flight.
                if tid.is_some() && !chunk.tsn_gap_acked {
                    if chunk.transport.is_some() {
                        abandoned_flight += size;
                    }
                    self.outstanding_bytes -= size;
                }
                chunk.relocate(location, Location::Abandoned);
                insert_by_tsn(&self.chunks, &mut self.abandoned, id);
                continue;
            }

            let Some(tsn) = chunk.tsn else {
                debug_assert!(false, "sent chunk without TSN");
                kept.push_back(id);
                continue;
            };

            if acked(sack, tsn) {
                if tid.is_some() && !chunk.tsn_gap_acked {
                    // Karn's algorithm: only chunks that were sent once are measured.
                    if !chunk.resent && chunk.rtt_in_progress {
                        chunk.rtt_in_progress = false;
                        rtt = chunk.sent_at.map(|sent_at| now.saturating_duration_since(sent_at));
                    }
                    if tsn <= sack_ctsn && has_gaps && changeover_active {
                        saw_newack = true;
                    }
                }

                if !chunk.tsn_gap_acked {
                    chunk.tsn_gap_acked = true;
                    if *highest_new_tsn < tsn {
                        *highest_new_tsn = tsn;
                    }
                    bytes_acked += size as isize;
                    newly_acked += size;
                    if chunk.transport.is_none() {
                        migrate_bytes += size as isize;
                    }
                }

                if tsn <= sack_ctsn {
                    // R3: the earliest outstanding TSN was acknowledged.
                    restart_timer = true;
                    chunk.relocate(location, Location::Sacked);
                    self.sacked.push(id);
                } else {
                    kept.push_back(id);
                }
            } else {
                if chunk.tsn_gap_acked {
                    log::debug!("peer reneged on tsn={}", tsn);
                    chunk.tsn_gap_acked = false;
                    bytes_acked -= size as isize;
                    if chunk.transport.is_none() {
                        migrate_bytes -= size as isize;
                    }
                    // R4: start T3-rtx for a TSN that was acknowledged but no longer is.
                    restart_timer = true;
                }
                kept.push_back(id);
            }
        }

        let Some(tid) = tid else {
            self.retransmit = kept;
            return;
        };

        let zero_window_probe = assoc.peer_rwnd == 0
            && !kept.is_empty()
            && sack_ctsn + 2 == assoc.next_tsn
            && assoc.state < AssociationState::ShutdownPending;
        let ctsn_ack_point = assoc.ctsn_ack_point;
        let Some(transport) = assoc.transports.get_mut(&tid) else {
            return;
        };
        transport.transmitted = kept;
        transport.flight_size -= abandoned_flight;
        if rtt_cancelled {
            transport.rto_pending = false;
        }
        if let Some(rtt) = rtt {
            transport.update_rto(rtt);
        }
        if saw_newack {
            transport.cacc.cacc_saw_newack = true;
        }

        let mut clear_errors = false;
        let mut mark_up = false;
        if newly_acked > 0 {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.2-2>:
            //
            //   When an outstanding TSN is acknowledged [...], the endpoint SHOULD clear the
            //   error counter of the destination transport address to which the DATA chunk was
            //   last sent [...]. The association's overall error counter is also cleared.
            clear_errors = true;
            if assoc.state == AssociationState::ShutdownPending {
                assoc.shutdown_guard.stop();
            }
            mark_up = transport.state != TransportState::Active;
        } else if zero_window_probe {
            // The peer keeps responding while its window is closed, which must not count as
            // failures.
            log::debug!("SACK for zero window probe, cum_ack_tsn={}", sack_ctsn);
            clear_errors = true;
        }

        if bytes_acked != 0 {
            // Migrated chunks were never sent on this transport.
            let credited = bytes_acked - migrate_bytes;
            if credited > 0 {
                assoc.congestion.raise_cwnd(
                    &mut transport.window,
                    &mut assoc.fast_recovery,
                    transport.flight_size,
                    ctsn_ack_point,
                    sack_ctsn,
                    credited as usize,
                );
            }
            transport.flight_size = transport.flight_size.saturating_add_signed(-credited);
            if transport.flight_size == 0 {
                transport.window.partial_bytes_acked = 0;
            }
            self.outstanding_bytes = self.outstanding_bytes.saturating_add_signed(-bytes_acked);
        }

        if transport.flight_size == 0 {
            transport.stop_t3();
        } else if restart_timer {
            transport.restart_t3(now);
        }

        if clear_errors {
            assoc.clear_errors(tid);
        }
        if mark_up {
            assoc.mark_transport_up(tid);
        }
    }

    /// Counts missing reports for the chunks sent to `tid` that are below the highest newly
    /// acknowledged TSN, and starts fast retransmit for those reported missing often enough.
    fn mark_missing(
        &mut self,
        assoc: &mut Association,
        tid: TransportId,
        highest_new_tsn: Tsn,
        count_of_newacks: usize,
        now: SocketTime,
    ) {
        let Some(transport) = assoc.transport(tid) else {
            return;
        };
        let primary = assoc.primary_path.and_then(|p| assoc.transport(p));
        let mut do_fast_retransmit = false;
        for id in &transport.transmitted {
            let chunk = &mut self.chunks[*id];
            let Some(tsn) = chunk.tsn else {
                continue;
            };
            if chunk.fast_retransmit == FastRetransmit::CanFrtx
                && !chunk.tsn_gap_acked
                && tsn < highest_new_tsn
            {
                let sent_on = chunk.transport.and_then(|t| assoc.transport(t)).unwrap_or(transport);
                if !cacc_skip(primary, sent_on, count_of_newacks, tsn) {
                    chunk.tsn_missing_report += 1;
                    log::trace!("tsn={} missing, count={}", tsn, chunk.tsn_missing_report);
                }
            }
            if chunk.tsn_missing_report >= FAST_RETRANSMIT_THRESHOLD {
                if chunk.fast_retransmit != FastRetransmit::NeedFrtx {
                    log::debug!("marking tsn={} for fast retransmit", tsn);
                }
                chunk.fast_retransmit = FastRetransmit::NeedFrtx;
                do_fast_retransmit = true;
            }
        }

        if do_fast_retransmit {
            self.prepare_retransmit(assoc, tid, RetransmitReason::FastRtx, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Options;
    use crate::packet::sack_chunk::GapAckBlock;
    use crate::testing::make_association;
    use crate::testing::peer_address;

    fn sack(ctsn: u32, blocks: &[(u16, u16)]) -> SackChunk {
        let blocks = blocks.iter().map(|(start, end)| GapAckBlock::new(*start, *end)).collect();
        SackChunk::new(Tsn(ctsn), 100_000, blocks)
    }

    #[test]
    fn acked_by_cumulative_ack() {
        let sack = sack(10, &[]);
        assert!(acked(&sack, Tsn(9)));
        assert!(acked(&sack, Tsn(10)));
        assert!(!acked(&sack, Tsn(11)));
    }

    #[test]
    fn acked_by_gap_ack_blocks() {
        let sack = sack(10, &[(2, 3), (5, 5)]);
        assert!(!acked(&sack, Tsn(11)));
        assert!(acked(&sack, Tsn(12)));
        assert!(acked(&sack, Tsn(13)));
        assert!(!acked(&sack, Tsn(14)));
        assert!(acked(&sack, Tsn(15)));
        assert!(!acked(&sack, Tsn(16)));
    }

    #[test]
    fn acked_across_tsn_wraparound() {
        let sack = sack(u32::MAX - 1, &[(2, 2)]);
        assert!(acked(&sack, Tsn(u32::MAX - 5)));
        assert!(!acked(&sack, Tsn(u32::MAX)));
        assert!(acked(&sack, Tsn(0)));
        assert!(!acked(&sack, Tsn(1)));
    }

    #[test]
    fn gap_offsets_are_16_bits() {
        // 65536 + 2 beyond the cumulative ack truncates to an offset of 2.
        let sack = sack(10, &[(2, 2)]);
        assert!(acked(&sack, Tsn(10 + 65536 + 2)));
    }

    fn two_transports() -> (Association, TransportId, TransportId) {
        let (mut assoc, _) = make_association(&Options::default());
        let primary = assoc.primary_path().unwrap();
        let other = assoc.add_transport(peer_address(2), TransportState::Active);
        (assoc, primary, other)
    }

    #[test]
    fn cacc_never_skips_without_changeover() {
        let (assoc, primary, other) = two_transports();
        let p = assoc.transport(primary);
        let t = assoc.transport(other).unwrap();
        assert!(!cacc_skip(p, t, 0, Tsn(100)));
        assert!(!cacc_skip(p, t, 2, Tsn(100)));
        assert!(!cacc_skip(None, t, 2, Tsn(100)));
    }

    #[test]
    fn cacc_rule_3_1_d_skips_other_destinations() {
        let (mut assoc, primary, other) = two_transports();
        assoc.transport_mut(primary).unwrap().cacc.changeover_active = true;
        let p = assoc.transport(primary);
        assert!(cacc_skip(p, assoc.transport(other).unwrap(), 2, Tsn(100)));
        assert!(!cacc_skip(p, assoc.transport(primary).unwrap(), 2, Tsn(100)));
    }

    #[test]
    fn cacc_rule_3_1_f_requires_newack_on_destination() {
        let (mut assoc, primary, other) = two_transports();
        assoc.transport_mut(primary).unwrap().cacc.changeover_active = true;
        assert!(cacc_skip(
            assoc.transport(primary),
            assoc.transport(other).unwrap(),
            1,
            Tsn(100)
        ));

        assoc.transport_mut(other).unwrap().cacc.cacc_saw_newack = true;
        assert!(!cacc_skip(
            assoc.transport(primary),
            assoc.transport(other).unwrap(),
            1,
            Tsn(100)
        ));
    }

    #[test]
    fn cacc_rule_3_2_skips_tsns_before_cycling_changeover() {
        let (mut assoc, primary, other) = two_transports();
        {
            let cacc = &mut assoc.transport_mut(primary).unwrap().cacc;
            cacc.changeover_active = true;
            cacc.cycling_changeover = true;
            cacc.next_tsn_at_change = Tsn(200);
        }
        let p = assoc.transport(primary);
        let t = assoc.transport(other).unwrap();
        // Rule 3.1 doesn't apply while cycling.
        assert!(!cacc_skip(p, t, 2, Tsn(200)));
        assert!(cacc_skip(p, t, 2, Tsn(199)));
    }
}
