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
use crate::api::StreamId;
use crate::association::Association;
use crate::packet::ChunkType;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::tx::chunk_record::ChunkRecord;
use crate::tx::outqueue::OutQueue;
use crate::types::Ssn;
use crate::types::Tsn;
use std::collections::VecDeque;

/// The maximum number of streams listed in a generated FORWARD-TSN chunk.
const MAX_SKIPPED_STREAMS: usize = 10;

fn skip_stream(skipped: &mut Vec<SkippedStream>, stream_id: StreamId, ssn: Ssn) {
    match skipped.iter_mut().find(|s| s.stream_id == stream_id) {
        Some(entry) => entry.ssn = ssn,
        None => skipped.push(SkippedStream { stream_id, ssn }),
    }
}

impl OutQueue {
    /// Advances the Advanced.Peer.Ack.Point over abandoned chunks, and queues a FORWARD-TSN
    /// chunk if it's now beyond `ctsn`, the peer's cumulative TSN ack. Abandoned chunks that the
    /// peer has acknowledged are freed.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5>, rules C1 to C5.
    pub(crate) fn generate_fwdtsn(&mut self, assoc: &mut Association, ctsn: Tsn) {
        if !assoc.capabilities.partial_reliability {
            return;
        }

        // C1) Let SackCumAck be the Cumulative TSN ACK carried in the received SACK chunk. If
        // SackCumAck is greater than the Advanced.Peer.Ack.Point, update it to SackCumAck.
        if assoc.adv_peer_ack_point < ctsn {
            assoc.adv_peer_ack_point = ctsn;
        }

        // C2) Try to further advance the point locally, over the abandoned TSNs that follow it.
        let mut skipped: Vec<SkippedStream> = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.abandoned.len());
        let mut advancing = true;
        for id in std::mem::take(&mut self.abandoned) {
            let chunk = &self.chunks[id];
            let Some(tsn) = chunk.tsn else {
                remaining.push_back(id);
                continue;
            };
            if tsn <= ctsn {
                self.fail(assoc, id, ErrorKind::Abandoned);
                continue;
            }
            remaining.push_back(id);
            if !advancing {
                continue;
            }
            if tsn > assoc.adv_peer_ack_point + 1 {
                advancing = false;
                continue;
            }
            if assoc.adv_peer_ack_point < tsn {
                assoc.adv_peer_ack_point = tsn;
            }
            if let Some(data) = chunk.data_payload().filter(|d| !d.stream_key.is_unordered()) {
                skip_stream(&mut skipped, data.stream_key.id(), data.ssn);
                // The chunk only holds as many streams as fit in one packet.
                if skipped.len() >= MAX_SKIPPED_STREAMS {
                    advancing = false;
                }
            }
        }
        self.abandoned = remaining;

        // C3) If, after step C1 and C2, the Advanced.Peer.Ack.Point is greater than the
        // Cumulative TSN ACK carried in the received SACK, the data sender MUST send the data
        // receiver a FORWARD TSN chunk containing the latest value of the
        // Advanced.Peer.Ack.Point.
        if assoc.adv_peer_ack_point > ctsn {
            let forward_tsn = ForwardTsnChunk {
                new_cumulative_tsn: assoc.adv_peer_ack_point,
                skipped_streams: skipped,
            };
            log::debug!("generated {}", forward_tsn);
            let mut serialized = vec![0; forward_tsn.serialized_size()];
            forward_tsn.serialize_to(&mut serialized);
            let value = serialized.split_off(TLV_HEADER_SIZE);

            // A queued FORWARD-TSN that hasn't been sent yet is superseded by this one.
            let chunks = &self.chunks;
            let mut superseded = Vec::new();
            self.control_chunk_list.retain(|id| {
                let is_forward_tsn =
                    chunks.get(*id).is_some_and(|c| c.chunk_type() == ChunkType::ForwardTsn);
                if is_forward_tsn {
                    superseded.push(*id);
                }
                !is_forward_tsn
            });
            for id in superseded {
                self.free_control(id);
            }
            self.push_control(ChunkRecord::control(ChunkType::ForwardTsn, 0, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_streams_keep_latest_ssn() {
        let mut skipped = Vec::new();
        skip_stream(&mut skipped, StreamId(1), Ssn(3));
        skip_stream(&mut skipped, StreamId(2), Ssn(7));
        skip_stream(&mut skipped, StreamId(1), Ssn(4));
        assert_eq!(
            skipped,
            vec![
                SkippedStream { stream_id: StreamId(1), ssn: Ssn(4) },
                SkippedStream { stream_id: StreamId(2), ssn: Ssn(7) },
            ]
        );
    }
}
