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

use crate::api::PpId;
use crate::api::StreamId;
use crate::types::Ssn;
use crate::types::StreamKey;

/// User data carried by an outbound DATA chunk.
///
/// This is the DATA chunk without its transmission sequence number (TSN), which is assigned late,
/// when the chunk is first accepted into a packet. Fragmentation of messages into chunks is done
/// before data reaches the outqueue, so `is_beginning` and `is_end` are already known.
#[derive(Clone, Debug, PartialEq)]
pub struct Data {
    pub stream_key: StreamKey,
    pub ssn: Ssn,
    pub ppid: PpId,
    pub payload: Vec<u8>,
    pub is_beginning: bool,
    pub is_end: bool,
}

impl Data {
    /// Creates an ordered, unfragmented message.
    pub fn new(stream_id: StreamId, ssn: Ssn, ppid: PpId, payload: Vec<u8>) -> Self {
        Self {
            stream_key: StreamKey::Ordered(stream_id),
            ssn,
            ppid,
            payload,
            is_beginning: true,
            is_end: true,
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Self {
            stream_key: StreamKey::Ordered(StreamId(0)),
            ssn: Ssn(0),
            ppid: PpId(0),
            payload: Default::default(),
            is_beginning: false,
            is_end: false,
        }
    }
}
