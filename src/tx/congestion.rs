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
use crate::types::Tsn;
use std::cmp::max;
use std::cmp::min;

/// Congestion control variables of a destination.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2>.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CongestionWindow {
    pub cwnd: usize,
    pub ssthresh: usize,
    pub partial_bytes_acked: usize,
}

/// Association-wide Fast Recovery state, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4>.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FastRecovery {
    /// The highest TSN outstanding when Fast Recovery was entered. Set while in Fast Recovery.
    pub exit_point: Option<Tsn>,
}

impl FastRecovery {
    pub fn is_active(&self) -> bool {
        self.exit_point.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LowerCwndReason {
    /// The T3-rtx timer of the destination expired.
    T3Rtx,
    /// Chunks sent to the destination were reported missing, and will be fast retransmitted.
    FastRtx,
}

/// Congestion window management, called when data is acknowledged or considered lost.
pub trait CongestionControl {
    /// The window of a new destination.
    fn initial_window(&self) -> CongestionWindow;

    /// Called when `bytes_acked` bytes sent to a destination have been newly acknowledged by a
    /// SACK with the cumulative TSN ack `sack_ctsn`. `ctsn_ack_point` is the cumulative ack point
    /// before that SACK, and `flight_size` is the destination's flight size before that SACK.
    fn raise_cwnd(
        &self,
        window: &mut CongestionWindow,
        recovery: &mut FastRecovery,
        flight_size: usize,
        ctsn_ack_point: Tsn,
        sack_ctsn: Tsn,
        bytes_acked: usize,
    );

    /// Called when loss has been detected for a destination. `next_tsn` is the TSN that will be
    /// assigned to the next new DATA chunk.
    fn lower_cwnd(
        &self,
        window: &mut CongestionWindow,
        recovery: &mut FastRecovery,
        reason: LowerCwndReason,
        next_tsn: Tsn,
    );
}

/// The congestion control algorithm of RFC 9260 section 7.2.
pub struct Rfc9260CongestionControl {
    mtu: usize,
    cwnd_mtus_initial: usize,
    cwnd_mtus_min: usize,
}

impl Rfc9260CongestionControl {
    pub fn new(options: &Options) -> Self {
        Self {
            mtu: options.mtu,
            cwnd_mtus_initial: options.cwnd_mtus_initial,
            cwnd_mtus_min: options.cwnd_mtus_min,
        }
    }
}

impl CongestionControl for Rfc9260CongestionControl {
    fn initial_window(&self) -> CongestionWindow {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.1>:
        //
        //   The initial value of ssthresh SHOULD be arbitrarily high (e.g., the size of the
        //   largest possible advertised window).
        CongestionWindow {
            cwnd: self.cwnd_mtus_initial * self.mtu,
            ssthresh: usize::MAX,
            partial_bytes_acked: 0,
        }
    }

    fn raise_cwnd(
        &self,
        window: &mut CongestionWindow,
        recovery: &mut FastRecovery,
        flight_size: usize,
        ctsn_ack_point: Tsn,
        sack_ctsn: Tsn,
        bytes_acked: usize,
    ) {
        if recovery.exit_point.is_some_and(|exit_point| exit_point <= sack_ctsn) {
            log::debug!("exiting fast recovery at cum_ack_tsn={}", sack_ctsn);
            recovery.exit_point = None;
        }

        let old_cwnd = window.cwnd;
        if window.cwnd <= window.ssthresh {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.1>:
            //
            //   When cwnd is less than or equal to ssthresh, an SCTP endpoint MUST use the
            //   slow-start algorithm to increase cwnd only if the current congestion window is
            //   being fully utilized and the data sender is not in Fast Recovery. Only when these
            //   two conditions are met can the cwnd be increased; otherwise, the cwnd MUST NOT be
            //   increased. If these conditions are met, then cwnd MUST be increased by, at most,
            //   the lesser of (1) the total size of the previously outstanding DATA chunk(s)
            //   acknowledged and (2) L times the destination's PMTU.
            if recovery.is_active() || sack_ctsn <= ctsn_ack_point || flight_size < window.cwnd {
                return;
            }
            window.cwnd += min(bytes_acked, self.mtu);
            log::debug!("SS increase cwnd={} ({})", window.cwnd, old_cwnd);
        } else {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.2>:
            //
            //   Whenever cwnd is greater than ssthresh, upon each SACK arrival, increase
            //   partial_bytes_acked by the total number of bytes of all new chunks acknowledged in
            //   that SACK, including chunks acknowledged by the new Cumulative TSN Ack, by Gap Ack
            //   Blocks, and by the number of bytes of duplicated chunks reported in Duplicate TSNs.
            //
            //   When partial_bytes_acked is greater than cwnd and before the arrival of the SACK
            //   the sender had less than cwnd bytes of data outstanding (i.e., before the arrival
            //   of the SACK, flight size was less than cwnd), reset partial_bytes_acked to cwnd.
            let old_pba = window.partial_bytes_acked;
            window.partial_bytes_acked += bytes_acked;
            if window.partial_bytes_acked > window.cwnd && flight_size < window.cwnd {
                window.partial_bytes_acked = window.cwnd;
            }
            if window.partial_bytes_acked >= window.cwnd && flight_size >= window.cwnd {
                window.partial_bytes_acked -= window.cwnd;
                window.cwnd += self.mtu;
            }
            log::debug!(
                "CA cwnd={} ({}), ssthresh={}, pba={} ({})",
                window.cwnd,
                old_cwnd,
                window.ssthresh,
                window.partial_bytes_acked,
                old_pba
            );
        }
    }

    fn lower_cwnd(
        &self,
        window: &mut CongestionWindow,
        recovery: &mut FastRecovery,
        reason: LowerCwndReason,
        next_tsn: Tsn,
    ) {
        let old_cwnd = window.cwnd;
        match reason {
            LowerCwndReason::T3Rtx => {
                // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.3>:
                //
                //   When the T3-rtx timer expires on an address, SCTP SHOULD perform slow start by
                //   ssthresh = max(cwnd/2, 4*MTU) and cwnd = 1*MTU.
                window.ssthresh = max(window.cwnd / 2, self.cwnd_mtus_min * self.mtu);
                window.cwnd = self.mtu;
                recovery.exit_point = None;
            }
            LowerCwndReason::FastRtx => {
                // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4-5.6.1>:
                //
                //   While in Fast Recovery, the ssthresh and cwnd SHOULD NOT change for any
                //   destinations due to a subsequent Fast Recovery event (i.e., one SHOULD NOT
                //   reduce the cwnd further due to a subsequent Fast Retransmit).
                if recovery.is_active() {
                    log::debug!("packet loss detected (fast recovery). No changes.");
                    return;
                }
                //   If not in Fast Recovery, enter Fast Recovery and mark the highest outstanding
                //   TSN as the Fast Recovery exit point.
                recovery.exit_point = Some(next_tsn - 1);
                window.ssthresh = max(window.cwnd / 2, self.cwnd_mtus_min * self.mtu);
                window.cwnd = window.ssthresh;
            }
        }
        // Errata: <https://datatracker.ietf.org/doc/html/rfc8540#section-3.11>
        window.partial_bytes_acked = 0;
        log::debug!(
            "lowered cwnd ({:?}): cwnd={} ({}), ssthresh={}",
            reason,
            window.cwnd,
            old_cwnd,
            window.ssthresh
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTU: usize = 1000;

    fn make_cc() -> Rfc9260CongestionControl {
        Rfc9260CongestionControl::new(&Options {
            mtu: MTU,
            cwnd_mtus_initial: 10,
            cwnd_mtus_min: 4,
            ..Default::default()
        })
    }

    #[test]
    fn initial_window() {
        let window = make_cc().initial_window();
        assert_eq!(window.cwnd, 10 * MTU);
        assert_eq!(window.ssthresh, usize::MAX);
        assert_eq!(window.partial_bytes_acked, 0);
    }

    #[test]
    fn slow_start_requires_full_window_and_advancing_cum_ack() {
        let cc = make_cc();
        let mut window = cc.initial_window();
        let mut recovery = FastRecovery::default();

        // Not fully utilized.
        cc.raise_cwnd(&mut window, &mut recovery, 5 * MTU, Tsn(10), Tsn(12), 2 * MTU);
        assert_eq!(window.cwnd, 10 * MTU);

        // Cumulative ack didn't advance.
        cc.raise_cwnd(&mut window, &mut recovery, 10 * MTU, Tsn(12), Tsn(12), 2 * MTU);
        assert_eq!(window.cwnd, 10 * MTU);

        // Increased by at most one MTU.
        cc.raise_cwnd(&mut window, &mut recovery, 10 * MTU, Tsn(12), Tsn(14), 2 * MTU);
        assert_eq!(window.cwnd, 11 * MTU);
        cc.raise_cwnd(&mut window, &mut recovery, 11 * MTU, Tsn(14), Tsn(15), 300);
        assert_eq!(window.cwnd, 11 * MTU + 300);
    }

    #[test]
    fn congestion_avoidance_grows_by_mtu_per_window() {
        let cc = make_cc();
        let mut window =
            CongestionWindow { cwnd: 4 * MTU, ssthresh: 2 * MTU, partial_bytes_acked: 0 };
        let mut recovery = FastRecovery::default();

        cc.raise_cwnd(&mut window, &mut recovery, 4 * MTU, Tsn(1), Tsn(3), 2 * MTU);
        assert_eq!(window.cwnd, 4 * MTU);
        assert_eq!(window.partial_bytes_acked, 2 * MTU);

        cc.raise_cwnd(&mut window, &mut recovery, 4 * MTU, Tsn(3), Tsn(6), 3 * MTU);
        assert_eq!(window.cwnd, 5 * MTU);
        assert_eq!(window.partial_bytes_acked, MTU);
    }

    #[test]
    fn congestion_avoidance_caps_pba_when_not_fully_utilized() {
        let cc = make_cc();
        let mut window =
            CongestionWindow { cwnd: 4 * MTU, ssthresh: 2 * MTU, partial_bytes_acked: 0 };
        let mut recovery = FastRecovery::default();

        cc.raise_cwnd(&mut window, &mut recovery, 2 * MTU, Tsn(1), Tsn(9), 6 * MTU);
        assert_eq!(window.cwnd, 4 * MTU);
        assert_eq!(window.partial_bytes_acked, 4 * MTU);
    }

    #[test]
    fn t3_rtx_collapses_window() {
        let cc = make_cc();
        let mut window =
            CongestionWindow { cwnd: 20 * MTU, ssthresh: 100 * MTU, partial_bytes_acked: 7 };
        let mut recovery = FastRecovery { exit_point: Some(Tsn(5)) };

        cc.lower_cwnd(&mut window, &mut recovery, LowerCwndReason::T3Rtx, Tsn(10));
        assert_eq!(window.cwnd, MTU);
        assert_eq!(window.ssthresh, 10 * MTU);
        assert_eq!(window.partial_bytes_acked, 0);
        assert!(!recovery.is_active());

        // Bounded below by the minimum window.
        cc.lower_cwnd(&mut window, &mut recovery, LowerCwndReason::T3Rtx, Tsn(10));
        assert_eq!(window.ssthresh, 4 * MTU);
    }

    #[test]
    fn fast_rtx_enters_fast_recovery_once() {
        let cc = make_cc();
        let mut window =
            CongestionWindow { cwnd: 20 * MTU, ssthresh: 100 * MTU, partial_bytes_acked: 0 };
        let mut recovery = FastRecovery::default();

        cc.lower_cwnd(&mut window, &mut recovery, LowerCwndReason::FastRtx, Tsn(50));
        assert_eq!(recovery.exit_point, Some(Tsn(49)));
        assert_eq!(window.cwnd, 10 * MTU);
        assert_eq!(window.ssthresh, 10 * MTU);

        // A second loss in fast recovery doesn't lower the window further.
        cc.lower_cwnd(&mut window, &mut recovery, LowerCwndReason::FastRtx, Tsn(60));
        assert_eq!(recovery.exit_point, Some(Tsn(49)));
        assert_eq!(window.cwnd, 10 * MTU);
    }

    #[test]
    fn fast_recovery_blocks_slow_start_until_exit_point_acked() {
        let cc = make_cc();
        let mut window =
            CongestionWindow { cwnd: 4 * MTU, ssthresh: 8 * MTU, partial_bytes_acked: 0 };
        let mut recovery = FastRecovery { exit_point: Some(Tsn(20)) };

        cc.raise_cwnd(&mut window, &mut recovery, 4 * MTU, Tsn(10), Tsn(15), MTU);
        assert_eq!(window.cwnd, 4 * MTU);
        assert!(recovery.is_active());

        cc.raise_cwnd(&mut window, &mut recovery, 4 * MTU, Tsn(15), Tsn(20), MTU);
        assert!(!recovery.is_active());
        assert_eq!(window.cwnd, 5 * MTU);
    }
}
