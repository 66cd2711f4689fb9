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

//! The transmit side of an SCTP association: queueing of outbound chunks, bundling them into
//! packets per destination, and processing of selective acknowledgements (SACK), including fast
//! retransmit, changeover-aware congestion control (CACC) and FORWARD-TSN generation for
//! partially reliable delivery.
//!
//! The entry point is [`api::OutQueue`], which operates on an [`api::Association`] that holds the
//! association and per-destination ([`api::Transport`]) state.

pub mod api;

pub(crate) mod association;
pub(crate) mod events;
pub(crate) mod packet;
pub(crate) mod timer;
pub(crate) mod tx;
pub(crate) mod types;

/// Receiver of [`api::OutQueueEvent`]s generated while sending and acknowledging chunks.
pub trait EventSink {
    fn add(&mut self, event: api::OutQueueEvent);
    fn next_event(&mut self) -> Option<api::OutQueueEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub(crate) mod math {
    macro_rules! round_up_to_4 {
        ($a: expr) => {
            ($a + 3) & !3
        };
    }

    macro_rules! round_down_to_4 {
        ($a: expr) => {
            $a & !3
        };
    }

    macro_rules! is_divisible_by_4 {
        ($a: expr) => {
            ($a % 4) == 0
        };
    }

    pub(crate) use is_divisible_by_4;
    pub(crate) use round_down_to_4;
    pub(crate) use round_up_to_4;
}
