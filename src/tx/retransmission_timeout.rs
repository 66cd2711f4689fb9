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
use std::time::Duration;

/// The inverse of RTO.Alpha (1/8).
const RTO_ALPHA_INV: u32 = 8;
/// The inverse of RTO.Beta (1/4).
const RTO_BETA_INV: u32 = 4;

/// Retransmission timeout estimation of a destination, from round-trip time samples.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.1>. Values are kept as
/// [`Duration`]s, with the smoothing factors applied as integer divisions.
#[derive(Debug)]
pub struct RetransmissionTimeout {
    min_rto: Duration,
    max_rto: Duration,
    max_rtt: Duration,
    min_rtt_variance: Duration,
    srtt: Option<Duration>,
    rtt_var: Duration,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min,
            max_rto: options.rto_max,
            max_rtt: options.rtt_max,
            min_rtt_variance: options.min_rtt_variance,
            srtt: None,
            rtt_var: Duration::ZERO,
            rto: options.rto_initial,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round-trip time, if any sample has been taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Updates the RTO from a new round-trip time measurement.
    pub fn observe_rtt(&mut self, rtt: Duration) {
        // Values beyond what's plausible are discarded, as they would take a long time to
        // recover from.
        if rtt > self.max_rtt {
            log::debug!("discarding rtt sample {:?}", rtt);
            return;
        }

        let srtt = match self.srtt {
            // C2: RTTVAR <- (1 - RTO.Beta) * RTTVAR + RTO.Beta * |SRTT - R'|
            //     SRTT <- (1 - RTO.Alpha) * SRTT + RTO.Alpha * R'
            Some(srtt) => {
                let delta = srtt.abs_diff(rtt);
                self.rtt_var =
                    self.rtt_var - self.rtt_var / RTO_BETA_INV + delta / RTO_BETA_INV;
                srtt - srtt / RTO_ALPHA_INV + rtt / RTO_ALPHA_INV
            }
            // C1: SRTT <- R, RTTVAR <- R/2
            None => {
                self.rtt_var = rtt / 2;
                rtt
            }
        };
        self.srtt = Some(srtt);
        self.rtt_var = self.rtt_var.max(self.min_rtt_variance);

        // C3: RTO <- SRTT + 4 * RTTVAR, then C6/C7 clamping.
        self.rto = (srtt + self.rtt_var * 4).clamp(self.min_rto, self.max_rto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL_RTO: Duration = Duration::from_millis(200);
    const MAX_RTT: Duration = Duration::from_millis(8_000);
    const MAX_RTO: Duration = Duration::from_millis(800);
    const MIN_RTO: Duration = Duration::from_millis(120);

    fn make_options() -> Options {
        Options {
            rtt_max: MAX_RTT,
            rto_initial: INITIAL_RTO,
            rto_max: MAX_RTO,
            rto_min: MIN_RTO,
            min_rtt_variance: Duration::from_millis(20),
            ..Options::default()
        }
    }

    #[test]
    fn has_initial_rto_and_no_srtt() {
        let rto = RetransmissionTimeout::new(&make_options());
        assert_eq!(rto.rto(), INITIAL_RTO);
        assert_eq!(rto.srtt(), None);
    }

    #[test]
    fn first_measurement() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(100));
        assert_eq!(rto.srtt(), Some(Duration::from_millis(100)));
        // 100 + 4 * 50
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn subsequent_measurement_is_smoothed() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(100));
        rto.observe_rtt(Duration::from_millis(180));
        // rtt_var = 50 - 12.5 + 20 = 57.5, srtt = 100 - 12.5 + 22.5 = 110
        assert_eq!(rto.srtt(), Some(Duration::from_millis(110)));
        assert_eq!(rto.rto(), Duration::from_millis(340));
    }

    #[test]
    fn too_large_values_do_not_affect_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(MAX_RTT + Duration::from_millis(100));
        assert_eq!(rto.rto(), INITIAL_RTO);
        assert_eq!(rto.srtt(), None);

        rto.observe_rtt(Duration::from_millis(100));
        rto.observe_rtt(MAX_RTT + Duration::from_millis(100));
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn will_never_go_below_minimum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(1));
        }
        assert_eq!(rto.rto(), MIN_RTO);
    }

    #[test]
    fn will_never_go_above_maximum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(MAX_RTT - Duration::from_millis(100));
        }
        assert_eq!(rto.rto(), MAX_RTO);
    }

    #[test]
    fn variance_is_bounded_below() {
        let mut rto = RetransmissionTimeout::new(&Options {
            rto_min: Duration::ZERO,
            ..make_options()
        });
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(124));
        }
        // srtt converges to the sample, and the variance is kept at 20ms.
        assert_eq!(rto.rto(), Duration::from_millis(124 + 80));
    }
}
