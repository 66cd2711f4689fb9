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
use crate::api::OutQueueEvent;
use std::collections::VecDeque;

/// A FIFO of generated events, to be drained by the owner of the association.
#[derive(Default)]
pub struct Events {
    events: VecDeque<OutQueueEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for Events {
    fn add(&mut self, event: OutQueueEvent) {
        self.events.push_back(event);
    }

    fn next_event(&mut self) -> Option<OutQueueEvent> {
        self.events.pop_front()
    }
}
