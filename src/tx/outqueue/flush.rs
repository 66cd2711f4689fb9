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
use crate::association::transport::TransportState;
use crate::packet::ChunkType;
use crate::packet::sctp_packet::AppendStatus;
use crate::packet::sctp_packet::OutboundPacket;
use crate::packet::sctp_packet::SendWindow;
use crate::tx::chunk_record::ChunkId;
use crate::tx::chunk_record::ChunkRecord;
use crate::tx::chunk_record::FLAG_T_BIT;
use crate::tx::chunk_record::FastRetransmit;
use crate::tx::chunk_record::Location;
use crate::tx::outqueue::OutQueue;
use crate::tx::outqueue::insert_by_tsn;
use std::collections::VecDeque;

/// State of a single flush.
#[derive(Default)]
struct FlushContext {
    /// The transport whose packet is being filled.
    transport: Option<TransportId>,

    /// Transports whose packet has been used, in the order they were first used.
    touched: Vec<TransportId>,

    /// The first transmit error.
    error: Option<ErrorKind>,
}

impl FlushContext {
    fn record(&mut self, result: Result<(), ErrorKind>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Makes `tid` the current transport. Returns false if it doesn't exist.
    fn switch_to(&mut self, assoc: &mut Association, tid: TransportId, burst_limit: bool) -> bool {
        let Some(transport) = assoc.transports.get_mut(&tid) else {
            return false;
        };
        if self.transport == Some(tid) {
            return true;
        }
        self.transport = Some(tid);
        if !self.touched.contains(&tid) {
            self.touched.push(tid);
        }
        transport.packet.configure(assoc.peer_verification_tag);
        if burst_limit {
            transport.burst_limited(assoc.options.max_burst, assoc.options.mtu);
        }
        true
    }
}

/// Control chunks that must not be bundled with chunks that didn't fit in the same packet.
fn is_one_packet(typ: ChunkType) -> bool {
    matches!(
        typ,
        ChunkType::Abort
            | ChunkType::HeartbeatAck
            | ChunkType::ShutdownAck
            | ChunkType::CookieAck
            | ChunkType::CookieEcho
            | ChunkType::Error
            | ChunkType::Cwr
            | ChunkType::AsconfAck
    )
}

/// Appends a chunk to the packet. If the packet is full, it's sent and (unless `one_packet`) the
/// chunk is appended to the next one.
fn transmit_chunk(
    packet: &mut dyn OutboundPacket,
    chunk: &ChunkRecord,
    window: &SendWindow,
    one_packet: bool,
    ctx: &mut FlushContext,
) -> AppendStatus {
    let status = packet.append_chunk(chunk, window);
    if status != AppendStatus::PmtuFull || packet.has_cookie_echo() {
        return status;
    }
    ctx.record(packet.transmit());
    if one_packet {
        status
    } else {
        packet.append_chunk(chunk, window)
    }
}

impl OutQueue {
    /// Sends what can be sent: pending control chunks, then chunks to retransmit, then new DATA
    /// chunks. `rtx_timeout` is set when flushing after a retransmission timeout.
    ///
    /// Returns the first transmit error. Chunks that were moved before it are not moved back.
    pub fn flush(
        &mut self,
        assoc: &mut Association,
        rtx_timeout: bool,
        now: SocketTime,
    ) -> Result<(), ErrorKind> {
        let mut ctx = FlushContext::default();
        self.flush_ctrl(assoc, &mut ctx, now);
        self.flush_data(assoc, &mut ctx, rtx_timeout, now);
        self.flush_transports(assoc, &mut ctx);
        ctx.error.map_or(Ok(()), Err)
    }

    fn send_window(&self, assoc: &Association, tid: TransportId) -> SendWindow {
        let (flight_size, cwnd) =
            assoc.transport(tid).map_or((0, 0), |t| (t.flight_size, t.window.cwnd));
        SendWindow {
            peer_rwnd: assoc.peer_rwnd,
            outstanding_bytes: self.outstanding_bytes,
            flight_size,
            cwnd,
            queued_bytes: self.out_qlen,
            nodelay: assoc.options.nodelay,
            established: assoc.state == AssociationState::Established,
        }
    }

    fn control_destination(
        &self,
        assoc: &Association,
        ctx: &FlushContext,
        chunk: &ChunkRecord,
    ) -> Option<TransportId> {
        if let Some(transport) = chunk.transport().and_then(|t| assoc.transport(t)) {
            // Heartbeats are how an inactive or unconfirmed destination becomes usable.
            let probes = matches!(
                chunk.chunk_type(),
                ChunkType::Heartbeat | ChunkType::HeartbeatAck | ChunkType::AsconfAck
            );
            if transport.is_usable() || probes {
                return Some(transport.id());
            }
            return assoc.active_path;
        }
        if let Some(address) = chunk.destination() {
            let current = ctx
                .transport
                .filter(|t| assoc.transport(*t).is_some_and(|t| t.address() == address));
            if let Some(tid) = current.or_else(|| assoc.lookup_transport(address)) {
                return Some(tid);
            }
        }
        assoc.active_path
    }

    fn flush_ctrl(&mut self, assoc: &mut Association, ctx: &mut FlushContext, now: SocketTime) {
        let mut deferred = VecDeque::new();
        while let Some(id) = self.control_chunk_list.pop_front() {
            let chunk = &self.chunks[id];
            let typ = chunk.chunk_type();
            let destination = self.control_destination(assoc, ctx, chunk);
            let Some(tid) = destination.filter(|tid| ctx.switch_to(assoc, *tid, true)) else {
                deferred.push_back(id);
                continue;
            };
            let window = self.send_window(assoc, tid);
            let Some(transport) = assoc.transports.get_mut(&tid) else {
                deferred.push_back(id);
                continue;
            };
            let chunk = &self.chunks[id];

            match typ {
                ChunkType::Init | ChunkType::InitAck | ChunkType::ShutdownComplete => {
                    let verification_tag =
                        if typ == ChunkType::Init { 0 } else { assoc.peer_verification_tag };
                    let result = transport.packet.send_singleton(chunk, verification_tag);
                    self.free_control(id);
                    if let Err(e) = result {
                        log::warn!("failed to send {:?}: {:?}", typ, e);
                        ctx.record(Err(e));
                        break;
                    }
                    assoc.stats.out_ctrl_chunks += 1;
                }
                _ => {
                    if typ == ChunkType::Abort && chunk.flags() & FLAG_T_BIT != 0 {
                        transport.packet.set_verification_tag(assoc.my_verification_tag);
                    }
                    let status = transmit_chunk(
                        transport.packet.as_mut(),
                        chunk,
                        &window,
                        is_one_packet(typ),
                        ctx,
                    );
                    if status != AppendStatus::Ok {
                        deferred.push_back(id);
                        continue;
                    }
                    if typ == ChunkType::ForwardTsn {
                        transport.reset_timers(now);
                    }
                    assoc.stats.out_ctrl_chunks += 1;
                    self.free_control(id);
                }
            }
        }

        // Chunks that couldn't be sent go first the next time.
        while let Some(id) = deferred.pop_back() {
            self.control_chunk_list.push_front(id);
        }
    }

    fn flush_data(
        &mut self,
        assoc: &mut Association,
        ctx: &mut FlushContext,
        rtx_timeout: bool,
        now: SocketTime,
    ) {
        match assoc.state {
            AssociationState::Established
            | AssociationState::ShutdownPending
            | AssociationState::ShutdownReceived => {}
            AssociationState::CookieEchoed => {
                // DATA may only be bundled with the COOKIE-ECHO chunk.
                let has_cookie_echo = ctx
                    .transport
                    .and_then(|t| assoc.transport(t))
                    .is_some_and(|t| t.packet.has_cookie_echo());
                if !has_cookie_echo {
                    return;
                }
            }
            _ => return,
        }

        if !self.retransmit.is_empty() && !self.flush_rtx(assoc, ctx, rtx_timeout, now) {
            return;
        }

        if let Some(transport) = ctx.transport.and_then(|t| assoc.transports.get_mut(&t)) {
            transport.burst_limited(assoc.options.max_burst, assoc.options.mtu);
        }

        while let Some(id) = self.pop_pending() {
            let chunk = &self.chunks[id];
            let max_streams = assoc.capabilities.negotiated_maximum_outgoing_streams;
            if chunk.stream_id().is_some_and(|s| s.0 >= max_streams) {
                self.fail(assoc, id, ErrorKind::InvalidStream);
                continue;
            }
            if assoc.is_abandoned(chunk, now) {
                self.fail(assoc, id, ErrorKind::Abandoned);
                continue;
            }

            let bound = chunk
                .transport()
                .filter(|t| assoc.transport(*t).is_some_and(|t| t.is_usable()));
            let destination = bound.or(assoc.active_path).filter(|t| {
                assoc.transport(*t).is_some_and(|t| t.state() != TransportState::Unconfirmed)
            });
            let Some(tid) = destination.filter(|tid| ctx.switch_to(assoc, *tid, true)) else {
                self.push_front_pending(id);
                break;
            };

            let window = self.send_window(assoc, tid);
            let chunk = &mut self.chunks[id];
            let assigned_tsn = chunk.tsn.is_none();
            if assigned_tsn {
                chunk.tsn = Some(assoc.next_tsn);
            }
            // From <https://datatracker.ietf.org/doc/html/rfc7053#section-4.1>.
            chunk.immediate_ack = assoc.state == AssociationState::ShutdownPending;

            let Some(transport) = assoc.transports.get_mut(&tid) else {
                break;
            };
            let status = transmit_chunk(transport.packet.as_mut(), chunk, &window, false, ctx);
            if status != AppendStatus::Ok {
                if assigned_tsn {
                    self.chunks[id].tsn = None;
                }
                self.push_front_pending(id);
                break;
            }
            let has_cookie_echo = transport.packet.has_cookie_echo();
            if assigned_tsn {
                assoc.next_tsn += 1;
            }
            self.on_data_sent(assoc, id, tid, Location::Pending, now);

            if has_cookie_echo {
                break;
            }
        }
    }

    /// Sends chunks from the retransmit queue on the retransmission path.
    ///
    /// Returns true if new DATA may be sent after it in this flush.
    fn flush_rtx(
        &mut self,
        assoc: &mut Association,
        ctx: &mut FlushContext,
        rtx_timeout: bool,
        now: SocketTime,
    ) -> bool {
        let Some(tid) = assoc.retran_path else {
            return false;
        };
        if assoc.transport(tid).is_none_or(|t| t.state() == TransportState::Unconfirmed) {
            return false;
        }
        ctx.switch_to(assoc, tid, false);

        let fast_rtx = self.fast_rtx;
        let mut queue = std::mem::take(&mut self.retransmit);
        let mut remaining = VecDeque::new();
        let mut done = false;
        while let Some(id) = queue.pop_front() {
            let chunk = &mut self.chunks[id];
            if assoc.is_abandoned(chunk, now) {
                chunk.relocate(Location::Retransmit, Location::Abandoned);
                insert_by_tsn(&self.chunks, &mut self.abandoned, id);
                continue;
            }

            // Acknowledged since it was marked, so it's not sent again.
            if chunk.tsn_gap_acked {
                chunk.relocate(Location::Retransmit, Location::Transmitted(tid));
                if chunk.transport.is_some() {
                    chunk.transport = Some(tid);
                }
                if let Some(transport) = assoc.transport_mut(tid) {
                    transport.transmitted.push_back(id);
                }
                continue;
            }

            if fast_rtx && chunk.fast_retransmit != FastRetransmit::NeedFrtx {
                remaining.push_back(id);
                continue;
            }

            let mut retried = false;
            let sent = loop {
                let window = self.send_window(assoc, tid);
                let Some(transport) = assoc.transports.get_mut(&tid) else {
                    break false;
                };
                let packet = transport.packet.as_mut();
                match packet.append_chunk(&self.chunks[id], &window) {
                    AppendStatus::Ok => break true,
                    AppendStatus::PmtuFull if retried => {
                        done = true;
                        break false;
                    }
                    AppendStatus::PmtuFull => {
                        retried = true;
                        if !packet.has_data() && !packet.has_cookie_echo() {
                            // Only control chunks are in the way.
                            ctx.record(packet.transmit());
                            continue;
                        }
                        ctx.record(packet.transmit());
                        // After a timeout or for fast retransmit, only one packet is sent.
                        if rtx_timeout || fast_rtx {
                            done = true;
                            break false;
                        }
                    }
                    AppendStatus::RwndFull | AppendStatus::NagleDelay => {
                        ctx.record(packet.transmit());
                        done = true;
                        break false;
                    }
                }
            };

            if !sent {
                remaining.push_back(id);
                if done {
                    break;
                }
                continue;
            }
            let chunk = &mut self.chunks[id];
            if chunk.fast_retransmit == FastRetransmit::NeedFrtx {
                chunk.fast_retransmit = FastRetransmit::DontFrtx;
            }
            log::trace!("retransmitted tsn={:?} on {}", chunk.tsn, tid);
            self.on_data_sent(assoc, id, tid, Location::Retransmit, now);
        }
        remaining.extend(queue);
        self.retransmit = remaining;

        if rtx_timeout || fast_rtx {
            self.demote_fast_retransmit();
        }
        self.fast_rtx = false;

        // Only one DATA chunk may be bundled with a COOKIE-ECHO.
        let has_cookie_echo = assoc.transport(tid).is_some_and(|t| t.packet.has_cookie_echo());
        !has_cookie_echo && self.retransmit.is_empty()
    }

    /// Accounts for a DATA chunk that has been added to the packet of `tid`, and moves it to the
    /// transport's transmitted list.
    fn on_data_sent(
        &mut self,
        assoc: &mut Association,
        id: ChunkId,
        tid: TransportId,
        from: Location,
        now: SocketTime,
    ) {
        let Some(transport) = assoc.transports.get_mut(&tid) else {
            return;
        };
        let chunk = &mut self.chunks[id];
        let size = chunk.data_size();
        transport.flight_size += size;
        self.outstanding_bytes += size;
        assoc.peer_rwnd = assoc.peer_rwnd.saturating_sub(size);

        // Karn's algorithm: only chunks sent once are used for round-trip time measurements.
        if !chunk.resent && !transport.rto_pending {
            chunk.rtt_in_progress = true;
            transport.rto_pending = true;
        }
        chunk.sent_at = Some(now);
        chunk.sent_count += 1;
        chunk.transport = Some(tid);
        chunk.relocate(from, Location::Transmitted(tid));
        transport.transmitted.push_back(id);
        transport.reset_timers(now);
        self.empty = false;
    }

    fn flush_transports(&mut self, assoc: &mut Association, ctx: &mut FlushContext) {
        for tid in std::mem::take(&mut ctx.touched) {
            let Some(transport) = assoc.transports.get_mut(&tid) else {
                continue;
            };
            if !transport.packet.is_empty() {
                ctx.record(transport.packet.transmit());
            }
            transport.burst_reset();
        }
    }
}
