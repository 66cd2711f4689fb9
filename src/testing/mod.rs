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

pub mod data_generator;
pub mod event_helpers;
pub mod fake_packet;

use crate::EventSink;
use crate::api::Options;
use crate::api::SocketTime;
use crate::association::Association;
use crate::association::AssociationState;
use crate::association::capabilities::Capabilities;
use crate::association::transport::TransportState;
use crate::events::Events;
use crate::types::Tsn;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

pub const INITIAL_TSN: Tsn = Tsn(100);
pub const MY_VERIFICATION_TAG: u32 = 0x1234_5678;
pub const PEER_VERIFICATION_TAG: u32 = 0x0bad_cafe;
pub const PEER_A_RWND: u32 = 100_000;

pub fn peer_address(n: u8) -> SocketAddr {
    SocketAddr::from(([192, 168, 0, n], 5000))
}

/// An established association, with partial reliability, and a single active destination whose
/// packets are built by the real packet builder.
pub fn make_association(options: &Options) -> (Association, Rc<RefCell<Events>>) {
    let events = Rc::new(RefCell::new(Events::new()));
    let sink: Rc<RefCell<dyn EventSink>> = events.clone();
    let mut assoc = Association::new(
        options,
        MY_VERIFICATION_TAG,
        PEER_VERIFICATION_TAG,
        INITIAL_TSN,
        PEER_A_RWND,
        Capabilities { partial_reliability: true, ..Default::default() },
        sink,
    );
    assoc.add_transport(peer_address(1), TransportState::Active);
    assoc.set_state(AssociationState::Established, SocketTime::zero());
    (assoc, events)
}
