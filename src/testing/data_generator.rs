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
use crate::packet::data::Data;
use crate::types::Ssn;
use crate::types::StreamKey;

/// Generates the user data of consecutive messages on a stream.
pub struct DataGenerator {
    stream_id: StreamId,
    ssn: Ssn,
}

impl DataGenerator {
    pub fn new(stream_id: StreamId) -> Self {
        DataGenerator { stream_id, ssn: Ssn(0) }
    }

    /// An ordered fragment. `flags` may contain "B" and "E" for the first and last fragment. The
    /// SSN is advanced after the last fragment of a message.
    pub fn ordered(&mut self, payload: &str, flags: &str) -> Data {
        let is_end = flags.contains("E");
        let data = Data {
            stream_key: StreamKey::Ordered(self.stream_id),
            ssn: self.ssn,
            ppid: PpId(53),
            payload: payload.as_bytes().to_vec(),
            is_beginning: flags.contains("B"),
            is_end,
        };
        if is_end {
            self.ssn = Ssn(self.ssn.0.wrapping_add(1));
        }
        data
    }

    pub fn unordered(&mut self, payload: &str, flags: &str) -> Data {
        Data {
            stream_key: StreamKey::Unordered(self.stream_id),
            ssn: Ssn(0),
            ppid: PpId(53),
            payload: payload.as_bytes().to_vec(),
            is_beginning: flags.contains("B"),
            is_end: flags.contains("E"),
        }
    }

    /// A complete ordered message with `size` bytes of payload.
    pub fn message(&mut self, size: usize) -> Data {
        self.ordered(&"x".repeat(size), "BE")
    }
}
