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
use crate::api::Options;
use crate::api::OutQueueEvent;
use crate::api::SocketTime;
use crate::association::capabilities::Capabilities;
use crate::association::transport::Transport;
use crate::association::transport::TransportId;
use crate::association::transport::TransportState;
use crate::packet::sctp_packet::OutboundPacket;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::tx::chunk_record::ChunkRecord;
use crate::tx::congestion::CongestionControl;
use crate::tx::congestion::FastRecovery;
use crate::tx::congestion::Rfc9260CongestionControl;
use crate::tx::outqueue::OutQueue;
use crate::types::Tsn;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::rc::Rc;

pub mod capabilities;
pub mod transport;

/// Association states, see <https://datatracker.ietf.org/doc/html/rfc9260#section-4>.
///
/// The order is significant: every state from `ShutdownPending` on is a shutdown state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssociationState {
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

impl AssociationState {
    pub fn is_shutting_down(self) -> bool {
        self >= AssociationState::ShutdownPending
    }
}

/// Transmission statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub t3_retransmits: u64,
    pub fast_retransmits: u64,
    pub pmtud_retransmits: u64,
    pub t1_retransmits: u64,
    /// Outstanding DATA chunks at the time of each T3-rtx expiry, summed.
    pub rtx_data_chunks: u64,
    pub out_ctrl_chunks: u64,
    pub out_ordered_chunks: u64,
    pub out_unordered_chunks: u64,
}

/// The association state that the outqueue reads and updates: acknowledgement points, the peer's
/// receiver window, negotiated capabilities and the peer's destination transports.
pub struct Association {
    pub(crate) state: AssociationState,
    pub(crate) my_verification_tag: u32,
    pub(crate) peer_verification_tag: u32,

    /// The cumulative TSN acknowledged by the peer.
    pub(crate) ctsn_ack_point: Tsn,
    /// The TSN up to which the peer may advance its cumulative TSN, skipping abandoned chunks.
    pub(crate) adv_peer_ack_point: Tsn,
    pub(crate) highest_sacked: Tsn,
    pub(crate) next_tsn: Tsn,
    /// The number of DATA chunks not acknowledged (cumulatively or by gap ack blocks).
    pub(crate) unack_data: u32,
    pub(crate) overall_error_count: u32,
    pub(crate) peer_rwnd: usize,

    pub(crate) capabilities: Capabilities,
    pub(crate) fast_recovery: FastRecovery,
    pub(crate) init_retries: u32,
    pub(crate) shutdown_guard: Timer,
    pub(crate) stats: Stats,

    pub(crate) transports: BTreeMap<TransportId, Transport>,
    pub(crate) active_path: Option<TransportId>,
    pub(crate) retran_path: Option<TransportId>,
    pub(crate) primary_path: Option<TransportId>,
    next_transport_id: usize,

    pub(crate) congestion: Box<dyn CongestionControl>,
    pub(crate) options: Options,
    pub(crate) events: Rc<RefCell<dyn EventSink>>,
}

impl Association {
    pub fn new(
        options: &Options,
        my_verification_tag: u32,
        peer_verification_tag: u32,
        initial_tsn: Tsn,
        a_rwnd: u32,
        capabilities: Capabilities,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        let capabilities = Capabilities {
            partial_reliability: capabilities.partial_reliability
                && options.enable_partial_reliability,
            ..capabilities
        };
        Self {
            state: AssociationState::Closed,
            my_verification_tag,
            peer_verification_tag,
            ctsn_ack_point: initial_tsn - 1,
            adv_peer_ack_point: initial_tsn - 1,
            highest_sacked: initial_tsn - 1,
            next_tsn: initial_tsn,
            unack_data: 0,
            overall_error_count: 0,
            peer_rwnd: a_rwnd as usize,
            capabilities,
            fast_recovery: FastRecovery::default(),
            init_retries: 0,
            shutdown_guard: Timer::new(
                options.shutdown_guard_timeout,
                BackoffAlgorithm::Fixed,
                Some(0),
                None,
            ),
            stats: Stats::default(),
            transports: BTreeMap::new(),
            active_path: None,
            retran_path: None,
            primary_path: None,
            next_transport_id: 1,
            congestion: Box::new(Rfc9260CongestionControl::new(options)),
            options: options.clone(),
            events,
        }
    }

    /// Replaces the congestion control algorithm.
    pub fn with_congestion_control(mut self, congestion: Box<dyn CongestionControl>) -> Self {
        self.congestion = congestion;
        self
    }

    /// Adds a destination address of the peer, with packets built by [`SctpPacketBuilder`].
    pub fn add_transport(&mut self, address: SocketAddr, state: TransportState) -> TransportId {
        let events = Rc::clone(&self.events);
        let (local_port, remote_port, mtu) =
            (self.options.local_port, self.options.remote_port, self.options.mtu);
        self.add_transport_with_packet(address, state, |id| {
            Box::new(SctpPacketBuilder::new(id, local_port, remote_port, mtu, events))
        })
    }

    /// Adds a destination address of the peer, with packets built by the provided
    /// [`OutboundPacket`]. The first destination added becomes the primary path.
    pub fn add_transport_with_packet(
        &mut self,
        address: SocketAddr,
        state: TransportState,
        make_packet: impl FnOnce(TransportId) -> Box<dyn OutboundPacket>,
    ) -> TransportId {
        let id = TransportId(self.next_transport_id);
        self.next_transport_id += 1;
        let window = self.congestion.initial_window();
        let transport =
            Transport::new(id, address, state, window, &self.options, make_packet(id));
        self.transports.insert(id, transport);

        if self.primary_path.is_none() {
            self.primary_path = Some(id);
            self.active_path = Some(id);
            self.retran_path = Some(id);
        }
        log::debug!("added {} ({}, {:?})", id, address, state);
        id
    }

    /// Removes a destination from the transport set. Chunks in flight to it must have been moved
    /// elsewhere; see [`OutQueue::remove_transport`].
    pub(crate) fn detach_transport(&mut self, id: TransportId) -> Option<Transport> {
        let transport = self.transports.remove(&id)?;
        let fallback = self.first_usable().or_else(|| self.transports.keys().next().copied());
        for path in [&mut self.active_path, &mut self.retran_path, &mut self.primary_path] {
            if *path == Some(id) {
                *path = fallback;
            }
        }
        Some(transport)
    }

    fn first_usable(&self) -> Option<TransportId> {
        self.transports.values().find(|t| t.is_usable()).map(|t| t.id())
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Moves to `state`. Entering the SHUTDOWN-PENDING state starts the T5-shutdown-guard timer.
    pub fn set_state(&mut self, state: AssociationState, now: SocketTime) {
        if state == AssociationState::ShutdownPending && self.state != state {
            self.shutdown_guard.start(now);
        }
        log::debug!("association state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn ctsn_ack_point(&self) -> Tsn {
        self.ctsn_ack_point
    }

    pub fn adv_peer_ack_point(&self) -> Tsn {
        self.adv_peer_ack_point
    }

    pub fn highest_sacked(&self) -> Tsn {
        self.highest_sacked
    }

    pub fn next_tsn(&self) -> Tsn {
        self.next_tsn
    }

    pub fn unack_data(&self) -> u32 {
        self.unack_data
    }

    pub fn overall_error_count(&self) -> u32 {
        self.overall_error_count
    }

    pub fn peer_rwnd(&self) -> usize {
        self.peer_rwnd
    }

    pub fn fast_recovery(&self) -> FastRecovery {
        self.fast_recovery
    }

    pub fn init_retries(&self) -> u32 {
        self.init_retries
    }

    pub fn is_shutdown_guard_running(&self) -> bool {
        self.shutdown_guard.is_running()
    }

    pub fn active_path(&self) -> Option<TransportId> {
        self.active_path
    }

    pub fn retran_path(&self) -> Option<TransportId> {
        self.retran_path
    }

    pub fn primary_path(&self) -> Option<TransportId> {
        self.primary_path
    }

    pub fn transport(&self, id: TransportId) -> Option<&Transport> {
        self.transports.get(&id)
    }

    pub(crate) fn transport_mut(&mut self, id: TransportId) -> Option<&mut Transport> {
        self.transports.get_mut(&id)
    }

    pub fn transports(&self) -> impl Iterator<Item = &Transport> {
        self.transports.values()
    }

    /// Finds the destination transport with the exact address `address`.
    pub fn lookup_transport(&self, address: SocketAddr) -> Option<TransportId> {
        self.transports.values().find(|t| t.address() == address).map(|t| t.id())
    }

    /// If `chunk` should be given up on. Never true unless partial reliability was negotiated.
    pub fn is_abandoned(&self, chunk: &ChunkRecord, now: SocketTime) -> bool {
        self.capabilities.partial_reliability && chunk.is_abandoned(now)
    }

    /// Selects the next destination, after the current one, to send retransmissions to.
    ///
    /// Destinations are tried round-robin: an active one is preferred, then any confirmed one.
    /// If neither exists, the retransmission path is left unchanged.
    pub fn update_retran_path(&mut self) {
        let Some(current) = self.retran_path else {
            self.retran_path = self.first_usable();
            return;
        };
        let candidates: Vec<&Transport> = self
            .transports
            .range(current..)
            .skip(1)
            .chain(self.transports.range(..current))
            .map(|(_, t)| t)
            .collect();

        let next = candidates
            .iter()
            .find(|t| t.state() == TransportState::Active)
            .or_else(|| candidates.iter().find(|t| t.state() != TransportState::Unconfirmed))
            .map(|t| t.id());
        if let Some(next) = next {
            log::debug!("retransmission path {} -> {}", current, next);
            self.retran_path = Some(next);
        }
    }

    /// Changes the primary destination, which also becomes the active path if it's active.
    ///
    /// Implements the SFR-CACC changeover rules: when data is queued or in flight, the new
    /// primary is marked as being in a changeover, so that reordering between the paths isn't
    /// mistaken for loss.
    pub fn set_primary_path(&mut self, id: TransportId, outqueue: &OutQueue) {
        if !self.transports.contains_key(&id) {
            log::warn!("set_primary_path: unknown {}", id);
            return;
        }
        let changeover = self.primary_path.is_some_and(|primary| primary != id);
        self.primary_path = Some(id);

        let next_tsn = self.next_tsn;
        let Some(transport) = self.transports.get_mut(&id) else {
            return;
        };
        if transport.state == TransportState::Active {
            self.active_path = Some(id);
        }

        if outqueue.outstanding_bytes() == 0 && outqueue.out_qlen() == 0 {
            return;
        }

        // 1) If CHANGEOVER_ACTIVE is set, then there was a switch to this destination address
        //    earlier. The sender MUST set CYCLING_CHANGEOVER to indicate that this switch is a
        //    double switch to the same destination address.
        if transport.cacc.changeover_active {
            transport.cacc.cycling_changeover = changeover;
        }
        // 2) The sender MUST set CHANGEOVER_ACTIVE to indicate that a changeover has occurred.
        transport.cacc.changeover_active = changeover;
        // 3) The sender MUST store the next TSN to be sent in next_tsn_at_change.
        transport.cacc.next_tsn_at_change = next_tsn;
        log::debug!("primary path changed to {}, cacc={:?}", id, transport.cacc);
    }

    /// Marks a destination as reachable. Returns to the primary path if it's the one that came
    /// back up.
    pub fn mark_transport_up(&mut self, id: TransportId) {
        let Some(transport) = self.transports.get_mut(&id) else {
            return;
        };
        if transport.state == TransportState::Active {
            return;
        }
        transport.state = TransportState::Active;
        transport.error_count = 0;

        let active_is_usable =
            self.active_path.and_then(|a| self.transports.get(&a)).is_some_and(|t| t.is_usable());
        if self.primary_path == Some(id) || !active_is_usable {
            self.active_path = Some(id);
        }
        log::info!("{} is up", id);
        self.events.borrow_mut().add(OutQueueEvent::TransportUp(id));
    }

    /// Marks a destination as unreachable. Traffic moves to another active destination.
    pub fn mark_transport_down(&mut self, id: TransportId) {
        let Some(transport) = self.transports.get_mut(&id) else {
            return;
        };
        transport.state = TransportState::Inactive;
        if self.active_path == Some(id) {
            self.active_path = self.first_usable().or(Some(id));
        }
        if self.retran_path == Some(id) {
            self.update_retran_path();
        }
        log::info!("{} is down", id);
    }

    /// The next time [`OutQueue::handle_timeout`] needs to be called.
    pub fn next_timeout(&self) -> Option<SocketTime> {
        self.transports
            .values()
            .filter_map(|t| t.t3_rtx_expiry())
            .chain(self.shutdown_guard.next_expiry())
            .min()
    }

    /// Resets the error counters after the peer has shown to be alive.
    pub(crate) fn clear_errors(&mut self, transport: TransportId) {
        self.overall_error_count = 0;
        if let Some(t) = self.transports.get_mut(&transport) {
            t.error_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Events;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_transport_up;
    use crate::testing::make_association;
    use std::time::Duration;

    fn addr(n: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n], 5000))
    }

    fn new_association() -> (Association, Rc<RefCell<Events>>) {
        let events = Rc::new(RefCell::new(Events::new()));
        let assoc = Association::new(
            &Options::default(),
            1,
            2,
            Tsn(100),
            100_000,
            Capabilities { partial_reliability: true, ..Default::default() },
            events.clone(),
        );
        (assoc, events)
    }

    #[test]
    fn initial_ack_points() {
        let (assoc, _) = new_association();
        assert_eq!(assoc.state(), AssociationState::Closed);
        assert_eq!(assoc.ctsn_ack_point(), Tsn(99));
        assert_eq!(assoc.adv_peer_ack_point(), Tsn(99));
        assert_eq!(assoc.next_tsn(), Tsn(100));
        assert_eq!(assoc.peer_rwnd(), 100_000);
        assert!(assoc.capabilities().partial_reliability);
    }

    #[test]
    fn partial_reliability_requires_local_support() {
        let events: Rc<RefCell<dyn EventSink>> = Rc::new(RefCell::new(Events::new()));
        let assoc = Association::new(
            &Options { enable_partial_reliability: false, ..Default::default() },
            1,
            2,
            Tsn(100),
            100_000,
            Capabilities { partial_reliability: true, ..Default::default() },
            events,
        );
        assert!(!assoc.capabilities().partial_reliability);
    }

    #[test]
    fn shutdown_states_are_ordered() {
        assert!(!AssociationState::Established.is_shutting_down());
        assert!(AssociationState::ShutdownPending.is_shutting_down());
        assert!(AssociationState::ShutdownAckSent.is_shutting_down());
        assert!(AssociationState::CookieEchoed < AssociationState::Established);
    }

    #[test]
    fn shutdown_pending_starts_guard_timer() {
        let (mut assoc, _) = new_association();
        assoc.set_state(AssociationState::Established, SocketTime::zero());
        assert!(!assoc.is_shutdown_guard_running());
        assoc.set_state(AssociationState::ShutdownPending, SocketTime::zero());
        assert!(assoc.is_shutdown_guard_running());
        assert_eq!(
            assoc.next_timeout(),
            Some(SocketTime::zero() + Options::default().shutdown_guard_timeout)
        );
    }

    #[test]
    fn first_transport_is_primary() {
        let (mut assoc, _) = new_association();
        let t1 = assoc.add_transport(addr(1), TransportState::Active);
        let t2 = assoc.add_transport(addr(2), TransportState::Active);
        assert_ne!(t1, t2);
        assert_eq!(assoc.primary_path(), Some(t1));
        assert_eq!(assoc.active_path(), Some(t1));
        assert_eq!(assoc.retran_path(), Some(t1));
        assert_eq!(assoc.lookup_transport(addr(2)), Some(t2));
        assert_eq!(assoc.lookup_transport(addr(3)), None);
    }

    #[test]
    fn retran_path_round_robins_over_active_transports() {
        let (mut assoc, _) = new_association();
        let t1 = assoc.add_transport(addr(1), TransportState::Active);
        let t2 = assoc.add_transport(addr(2), TransportState::Unconfirmed);
        let t3 = assoc.add_transport(addr(3), TransportState::Active);
        let t4 = assoc.add_transport(addr(4), TransportState::Inactive);

        assoc.update_retran_path();
        assert_eq!(assoc.retran_path(), Some(t3));
        assoc.update_retran_path();
        assert_eq!(assoc.retran_path(), Some(t1));

        assoc.mark_transport_down(t1);
        assert_eq!(assoc.retran_path(), Some(t3));
        assoc.mark_transport_down(t3);
        // Only inactive ones left. The unconfirmed one is never chosen.
        assert_eq!(assoc.retran_path(), Some(t4));
        assoc.update_retran_path();
        assert_eq!(assoc.retran_path(), Some(t1));
        assert_ne!(assoc.retran_path(), Some(t2));
    }

    #[test]
    fn mark_transport_up_restores_primary() {
        let (mut assoc, events) = new_association();
        let t1 = assoc.add_transport(addr(1), TransportState::Active);
        let t2 = assoc.add_transport(addr(2), TransportState::Active);

        assoc.mark_transport_down(t1);
        assert_eq!(assoc.active_path(), Some(t2));

        assoc.mark_transport_up(t1);
        assert_eq!(assoc.active_path(), Some(t1));
        assert_eq!(expect_transport_up!(events.borrow_mut().next_event()), t1);

        // Already up.
        assoc.mark_transport_up(t1);
        expect_no_event!(events.borrow_mut().next_event());
    }

    #[test]
    fn changeover_is_only_tracked_with_data_in_flight() {
        let (mut assoc, _) = make_association(&Options::default());
        let t1 = assoc.primary_path().unwrap();
        let t2 = assoc.add_transport(addr(9), TransportState::Active);
        let outqueue = OutQueue::new();

        assoc.set_primary_path(t2, &outqueue);
        assert_eq!(assoc.primary_path(), Some(t2));
        assert_eq!(assoc.active_path(), Some(t2));
        assert!(!assoc.transport(t2).unwrap().cacc().changeover_active);

        assoc.set_primary_path(t1, &outqueue);
        assert_eq!(assoc.active_path(), Some(t1));
    }

    #[test]
    fn next_timeout_is_earliest_timer() {
        let (mut assoc, _) = new_association();
        let t1 = assoc.add_transport(addr(1), TransportState::Active);
        let t2 = assoc.add_transport(addr(2), TransportState::Active);
        assert_eq!(assoc.next_timeout(), None);

        assoc.transport_mut(t2).unwrap().reset_timers(SocketTime::zero());
        assoc
            .transport_mut(t1)
            .unwrap()
            .reset_timers(SocketTime::zero() + Duration::from_millis(10));
        assert_eq!(
            assoc.next_timeout(),
            Some(SocketTime::zero() + Options::default().rto_initial)
        );
    }
}
