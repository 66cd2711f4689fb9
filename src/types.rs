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

use crate::api::StreamId;
use std::cmp::Ordering;
use std::fmt;

/// Ordered/Unordered stream identifiers.
///
/// A DATA chunk is sent on either the ordered or the unordered part of a stream, as indicated by
/// its U-bit. Only ordered streams carry meaningful stream sequence numbers, which matters when
/// announcing skipped messages in a FORWARD-TSN chunk.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StreamKey {
    Ordered(StreamId),
    Unordered(StreamId),
}

impl StreamKey {
    pub fn from(is_unordered: bool, id: StreamId) -> Self {
        if is_unordered { Self::Unordered(id) } else { Self::Ordered(id) }
    }

    pub fn id(&self) -> StreamId {
        match *self {
            StreamKey::Ordered(id) | StreamKey::Unordered(id) => id,
        }
    }

    pub fn is_unordered(&self) -> bool {
        matches!(self, Self::Unordered(_))
    }
}

/// See <https://datatracker.ietf.org/doc/html/rfc1982#section-3.2>.
fn cmp_rfc1982_u32(a: u32, b: u32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if (a < b && (b - a) < (1 << 31)) || (a > b && (a - b) > (1 << 31)) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn cmp_rfc1982_u16(a: u16, b: u16) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if (a < b && (b - a) < (1 << 15)) || (a > b && (a - b) > (1 << 15)) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Stream Sequence Number (SSN)
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Ssn(pub u16);

impl fmt::Debug for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::cmp::PartialOrd for Ssn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Ssn {
    fn cmp(&self, other: &Self) -> Ordering {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-1.6>:
        //
        //   Any arithmetic done on Stream Sequence Numbers SHOULD use Serial Number Arithmetic, as
        //   defined in [RFC1982] [...]
        cmp_rfc1982_u16(self.0, other.0)
    }
}

impl std::ops::Add<u16> for Ssn {
    type Output = Ssn;

    #[inline]
    fn add(self, rhs: u16) -> Ssn {
        Ssn(self.0.wrapping_add(rhs))
    }
}

/// Transmission Sequence Number (TSN)
///
/// All comparisons are done with serial number arithmetic, so that `Tsn(0) > Tsn(u32::MAX)`.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Tsn(pub u32);

impl fmt::Debug for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::cmp::PartialOrd for Tsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Tsn {
    fn cmp(&self, other: &Self) -> Ordering {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-1.6-2>:
        //
        //   Comparisons and arithmetic on TSNs in this document SHOULD use Serial Number
        //   Arithmetic, as defined in [RFC1982] [...]
        cmp_rfc1982_u32(self.0, other.0)
    }
}

impl std::ops::Add<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn add(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn sub(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::AddAssign<u32> for Tsn {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Tsn {
    /// Returns how far ahead of `base` this TSN is, modulo 2^32. Gap ack block offsets are
    /// computed from this value, truncated to 16 bits.
    pub fn offset_from(self, base: Tsn) -> u32 {
        self.0.wrapping_sub(base.0)
    }
}
