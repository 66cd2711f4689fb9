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

use crate::api::Options;
use crate::api::SocketTime;
use crate::packet::sctp_packet::OutboundPacket;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::tx::chunk_record::ChunkId;
use crate::tx::congestion::CongestionWindow;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::types::Tsn;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Identifies a destination transport address of the peer within an association.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TransportId(pub usize);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Active,
    Inactive,
    /// Not yet confirmed by a heartbeat. Only heartbeats may be sent to it.
    Unconfirmed,
}

/// Split Fast Retransmit, Changeover Aware Congestion Control (SFR-CACC) state of a destination.
///
/// After the primary destination changes, reordering between the old and new paths would look
/// like loss. These variables allow the SACK processing to not count missing reports that are
/// explained by the changeover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cacc {
    /// Set on the new primary destination when the primary changed while data was in flight.
    pub changeover_active: bool,
    /// Set when the primary destination switched back to a destination that was already in a
    /// changeover.
    pub cycling_changeover: bool,
    /// The next TSN to be assigned when the changeover happened.
    pub next_tsn_at_change: Tsn,
    /// If a SACK acknowledged new data sent to this destination.
    pub cacc_saw_newack: bool,
}

/// A destination transport address of the peer, and the per-destination transmission state.
pub struct Transport {
    id: TransportId,
    address: SocketAddr,
    pub(crate) state: TransportState,

    /// Bytes sent to this destination that are neither acknowledged nor marked for
    /// retransmission.
    pub(crate) flight_size: usize,

    pub(crate) window: CongestionWindow,

    /// The congestion window saved while a burst limit is applied.
    burst_limited: Option<usize>,

    pub(crate) rto: RetransmissionTimeout,
    pub(crate) t3_rtx: Timer,

    /// A round-trip time measurement is ongoing, using one chunk sent to this destination.
    pub(crate) rto_pending: bool,

    /// Consecutive retransmission timeouts without the destination acknowledging anything.
    pub(crate) error_count: u32,

    pub(crate) cacc: Cacc,

    /// Chunks sent to this destination, in transmission order.
    pub(crate) transmitted: VecDeque<ChunkId>,

    /// The packet being built for this destination.
    pub(crate) packet: Box<dyn OutboundPacket>,
}

impl Transport {
    pub(crate) fn new(
        id: TransportId,
        address: SocketAddr,
        state: TransportState,
        window: CongestionWindow,
        options: &Options,
        packet: Box<dyn OutboundPacket>,
    ) -> Self {
        let max_backoff =
            options.max_timer_backoff_duration.map_or(options.rto_max, |d| d.min(options.rto_max));
        Self {
            id,
            address,
            state,
            flight_size: 0,
            window,
            burst_limited: None,
            rto: RetransmissionTimeout::new(options),
            t3_rtx: Timer::new(
                options.rto_initial,
                BackoffAlgorithm::Exponential,
                None,
                Some(max_backoff),
            ),
            rto_pending: false,
            error_count: 0,
            cacc: Cacc::default(),
            transmitted: VecDeque::new(),
            packet,
        }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// If chunks may be sent to this destination without it being explicitly requested.
    pub fn is_usable(&self) -> bool {
        self.state == TransportState::Active
    }

    pub fn flight_size(&self) -> usize {
        self.flight_size
    }

    pub fn window(&self) -> CongestionWindow {
        self.window
    }

    pub fn cacc(&self) -> Cacc {
        self.cacc
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn rto(&self) -> Duration {
        self.rto.rto()
    }

    /// When the T3-rtx timer expires, if it's running.
    pub fn t3_rtx_expiry(&self) -> Option<SocketTime> {
        self.t3_rtx.next_expiry()
    }

    pub fn transmitted(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.transmitted.iter().copied()
    }

    /// Limits the congestion window so that at most `max_burst` packets can be sent in one go.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.1-11.3.1>.
    pub(crate) fn burst_limited(&mut self, max_burst: usize, mtu: usize) {
        if self.burst_limited.is_some() || max_burst == 0 {
            return;
        }
        let max_burst_bytes = self.flight_size + max_burst * mtu;
        if max_burst_bytes < self.window.cwnd {
            log::trace!(
                "{}: burst limited cwnd={} ({})",
                self.id,
                max_burst_bytes,
                self.window.cwnd
            );
            self.burst_limited = Some(self.window.cwnd);
            self.window.cwnd = max_burst_bytes;
        }
    }

    /// Restores the congestion window after a burst.
    pub(crate) fn burst_reset(&mut self) {
        if let Some(cwnd) = self.burst_limited.take() {
            self.window.cwnd = cwnd;
        }
    }

    /// Starts the T3-rtx timer unless it's already running.
    ///
    /// From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.2-2.1.1>:
    ///
    ///   Every time a DATA chunk is sent to any address (including a retransmission), if the
    ///   T3-rtx timer of that address is not running, start it running so that it will expire
    ///   after the RTO of that address.
    pub(crate) fn reset_timers(&mut self, now: SocketTime) {
        if !self.t3_rtx.is_running() {
            self.t3_rtx.set_duration(self.rto.rto());
            self.t3_rtx.start(now);
        }
    }

    /// Restarts the T3-rtx timer, to expire one RTO from now.
    pub(crate) fn restart_t3(&mut self, now: SocketTime) {
        self.t3_rtx.set_duration(self.rto.rto());
        self.t3_rtx.start(now);
    }

    pub(crate) fn stop_t3(&mut self) {
        self.t3_rtx.stop();
    }

    /// Feeds a round-trip time measurement into the RTO estimator, and ends the measurement.
    pub(crate) fn update_rto(&mut self, rtt: Duration) {
        self.rto.observe_rtt(rtt);
        self.rto_pending = false;
        log::debug!("{}: rtt={:?}, rto={:?}", self.id, rtt, self.rto.rto());
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("flight_size", &self.flight_size)
            .field("window", &self.window)
            .field("cacc", &self.cacc)
            .field("transmitted", &self.transmitted.len())
            .finish()
    }
}
