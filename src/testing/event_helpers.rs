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

macro_rules! expect_send_packet {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::OutQueueEvent::SendPacket { transport, packet } => (transport, packet),
                _ => panic!("Expected SendPacket, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_chunk_failed {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::OutQueueEvent::ChunkFailed { tsn, stream_id, error, .. } => {
                    (tsn, stream_id, error)
                }
                _ => panic!("Expected ChunkFailed, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_transport_up {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                $crate::api::OutQueueEvent::TransportUp(transport) => transport,
                _ => panic!("Expected TransportUp, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

pub(crate) use expect_chunk_failed;
pub(crate) use expect_no_event;
pub(crate) use expect_send_packet;
pub(crate) use expect_transport_up;
