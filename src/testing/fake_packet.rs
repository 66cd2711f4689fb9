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
use crate::packet::ChunkType;
use crate::packet::sctp_packet::AppendStatus;
use crate::packet::sctp_packet::OutboundPacket;
use crate::packet::sctp_packet::SendWindow;
use crate::tx::chunk_record::ChunkRecord;
use crate::types::Tsn;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A chunk as seen by the packet: its type and, for DATA, its TSN.
pub type SentChunk = (ChunkType, Option<Tsn>);

/// State of a [`FakePacket`], shared with the test that inspects and scripts it.
#[derive(Default)]
pub struct FakePacketState {
    /// Chunks in the packet being built.
    pub current: Vec<SentChunk>,
    pub verification_tag: u32,

    /// Chunks of each transmitted packet, with its verification tag.
    pub transmitted: Vec<(u32, Vec<SentChunk>)>,
    pub singletons: Vec<(u32, SentChunk)>,

    /// Number of `append_chunk` calls.
    pub append_attempts: usize,
    /// Number of `transmit` calls, including those of empty packets.
    pub transmit_calls: usize,

    /// Results of the next `append_chunk` calls. When empty, chunks are accepted.
    pub scripted: VecDeque<AppendStatus>,
    /// Maximum number of chunks per packet, after which `PmtuFull` is returned.
    pub max_chunks: Option<usize>,
    /// Results of the next `transmit` and `send_singleton` calls. When empty, they succeed.
    pub transmit_results: VecDeque<Result<(), ErrorKind>>,
}

impl FakePacketState {
    /// TSNs of all transmitted DATA chunks, in order.
    pub fn transmitted_tsns(&self) -> Vec<Tsn> {
        self.transmitted
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().filter_map(|(_, tsn)| *tsn))
            .collect()
    }

    /// Types of all transmitted chunks, in order.
    pub fn transmitted_types(&self) -> Vec<ChunkType> {
        self.transmitted.iter().flat_map(|(_, chunks)| chunks.iter().map(|(t, _)| *t)).collect()
    }
}

/// An [`OutboundPacket`] that records what is sent through it. Admission is scripted by the test
/// rather than computed from the send window.
pub struct FakePacket {
    state: Rc<RefCell<FakePacketState>>,
}

impl FakePacket {
    pub fn new() -> Self {
        Self { state: Rc::new(RefCell::new(FakePacketState::default())) }
    }

    pub fn state(&self) -> Rc<RefCell<FakePacketState>> {
        Rc::clone(&self.state)
    }
}

impl OutboundPacket for FakePacket {
    fn configure(&mut self, verification_tag: u32) {
        let mut state = self.state.borrow_mut();
        if state.current.is_empty() {
            state.verification_tag = verification_tag;
        }
    }

    fn set_verification_tag(&mut self, verification_tag: u32) {
        self.state.borrow_mut().verification_tag = verification_tag;
    }

    fn append_chunk(&mut self, chunk: &ChunkRecord, _window: &SendWindow) -> AppendStatus {
        let mut state = self.state.borrow_mut();
        state.append_attempts += 1;
        let is_full = state.max_chunks.is_some_and(|max| state.current.len() >= max);
        let status = match state.scripted.pop_front() {
            Some(status) => status,
            None if is_full => AppendStatus::PmtuFull,
            None => AppendStatus::Ok,
        };
        if status == AppendStatus::Ok {
            state.current.push((chunk.chunk_type(), chunk.tsn()));
        }
        status
    }

    fn transmit(&mut self) -> Result<(), ErrorKind> {
        let mut state = self.state.borrow_mut();
        state.transmit_calls += 1;
        let result = state.transmit_results.pop_front().unwrap_or(Ok(()));
        if !state.current.is_empty() {
            let chunks = std::mem::take(&mut state.current);
            if result.is_ok() {
                let tag = state.verification_tag;
                state.transmitted.push((tag, chunks));
            }
        }
        result
    }

    fn send_singleton(
        &mut self,
        chunk: &ChunkRecord,
        verification_tag: u32,
    ) -> Result<(), ErrorKind> {
        let mut state = self.state.borrow_mut();
        let result = state.transmit_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.singletons.push((verification_tag, (chunk.chunk_type(), chunk.tsn())));
        }
        result
    }

    fn is_empty(&self) -> bool {
        self.state.borrow().current.is_empty()
    }

    fn has_data(&self) -> bool {
        self.state.borrow().current.iter().any(|(typ, _)| *typ == ChunkType::Data)
    }

    fn has_cookie_echo(&self) -> bool {
        self.state.borrow().current.iter().any(|(typ, _)| *typ == ChunkType::CookieEcho)
    }
}
