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

use std::fmt;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;
use thiserror::Error;

pub use crate::association::Association;
pub use crate::association::AssociationState;
pub use crate::association::Stats;
pub use crate::association::capabilities::Capabilities;
pub use crate::association::transport::Cacc;
pub use crate::association::transport::Transport;
pub use crate::association::transport::TransportId;
pub use crate::association::transport::TransportState;
pub use crate::events::Events;
pub use crate::packet::ChunkType;
pub use crate::packet::data::Data;
pub use crate::packet::sack_chunk::GapAckBlock;
pub use crate::packet::sack_chunk::SackChunk;
pub use crate::packet::sctp_packet::AppendStatus;
pub use crate::packet::sctp_packet::OutboundPacket;
pub use crate::packet::sctp_packet::SctpPacketBuilder;
pub use crate::packet::sctp_packet::SendWindow;
pub use crate::tx::chunk_record::ChunkId;
pub use crate::tx::chunk_record::ChunkRecord;
pub use crate::tx::chunk_record::FastRetransmit;
pub use crate::tx::chunk_record::PrPolicy;
pub use crate::tx::congestion::CongestionControl;
pub use crate::tx::congestion::CongestionWindow;
pub use crate::tx::congestion::FastRecovery;
pub use crate::tx::congestion::LowerCwndReason;
pub use crate::tx::congestion::Rfc9260CongestionControl;
pub use crate::tx::outqueue::OutQueue;
pub use crate::tx::outqueue::RetransmitReason;
pub use crate::types::Ssn;
pub use crate::types::StreamKey;
pub use crate::types::Tsn;

/// Represents a point in time relative to the creation of the association.
///
/// All operations that start, restart or evaluate timers, or that take round-trip time samples,
/// are given the current time explicitly as a `SocketTime`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SocketTime(Duration);

impl SocketTime {
    /// The moment the association was created (t=0).
    pub const fn zero() -> SocketTime {
        SocketTime(Duration::ZERO)
    }
    pub const fn infinite_future() -> SocketTime {
        SocketTime(Duration::MAX)
    }

    /// Returns the elapsed time since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: SocketTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for SocketTime {
    type Output = SocketTime;
    fn add(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for SocketTime {
    type Output = SocketTime;
    fn sub(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<SocketTime> for SocketTime {
    type Output = Duration;
    fn sub(self, rhs: SocketTime) -> Duration {
        self.0 - rhs.0
    }
}

impl From<Duration> for SocketTime {
    fn from(value: Duration) -> Self {
        SocketTime(value)
    }
}

impl From<SocketTime> for Duration {
    fn from(value: SocketTime) -> Self {
        value.0
    }
}

/// Stream Identifier
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Debug for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the category of an error that has occurred.
///
/// Returned from fallible [`OutQueue`] operations and carried by
/// [`OutQueueEvent::ChunkFailed`] when a chunk is discarded without having been delivered.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// Indicates that no error has occurred.
    #[error("no error")]
    NoError,

    /// User data can't be queued as the association is closed or shutting down.
    #[error("the association is closed or shutting down")]
    Shutdown,

    /// The chunk's stream identifier is not below the negotiated number of outbound streams.
    #[error("invalid stream identifier")]
    InvalidStream,

    /// The chunk was abandoned by its partial reliability policy before being delivered.
    #[error("the chunk was abandoned")]
    Abandoned,

    /// The lower layer refused to send a packet.
    #[error("failed to transmit packet")]
    TransmitFailed,

    /// The association was aborted, by either the local endpoint or by the peer.
    #[error("the association was aborted")]
    Aborted,

    /// The association was closed because of too many retransmissions or timeouts.
    #[error("too many retransmissions")]
    TooManyRetries,
}

/// User configurable options.
#[derive(Clone, Debug)]
pub struct Options {
    /// The local port, written as source port of all generated packets.
    pub local_port: u16,

    /// The remote port, written as destination port of all generated packets.
    pub remote_port: u16,

    /// Maximum SCTP packet size. The packet builder will limit the size of generated packets to be
    /// less than or equal to this number, unless a single chunk doesn't fit by itself.
    pub mtu: usize,

    /// Maximum number of packets that may be sent in a burst on a single destination. Enforced by
    /// temporarily limiting the congestion window to `flight_size + max_burst * mtu`.
    pub max_burst: usize,

    /// Maximum allowed RTT value. When the RTT is measured and it's found to be larger than this
    /// value, it will be discarded and not used for e.g. any RTO calculation.
    pub rtt_max: Duration,

    /// Initial RTO value.
    pub rto_initial: Duration,

    /// Maximum RTO value.
    pub rto_max: Duration,

    /// Minimum RTO value. This must be larger than an expected peer delayed ack timeout.
    pub rto_min: Duration,

    /// The minimum limit for the measured RTT variance.
    ///
    /// Setting this below the expected delayed ack timeout of the peer may cause unnecessary
    /// retransmissions.
    pub min_rtt_variance: Duration,

    /// The maximum time when a timer is backed off by exponential backoff. `None` means no limit.
    pub max_timer_backoff_duration: Option<Duration>,

    /// Initial congestion window, in number of MTUs.
    pub cwnd_mtus_initial: usize,

    /// Minimum congestion window, in number of MTUs. Used as lower bound when the slow start
    /// threshold is reduced on packet loss.
    pub cwnd_mtus_min: usize,

    /// Duration of the T5-shutdown-guard timer, which bounds the total time spent shutting down.
    pub shutdown_guard_timeout: Duration,

    /// Disables the Nagle algorithm, so that DATA chunks are sent even when they would make up a
    /// small packet while other data is still outstanding.
    pub nodelay: bool,

    /// Whether the local endpoint supports Partial Reliability (RFC 3758). The feature is only
    /// used if the peer supports it as well.
    pub enable_partial_reliability: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            local_port: 5000,
            remote_port: 5000,

            // Derived from the minimum guaranteed IPv6 MTU (1280 bytes), minus conservative
            // estimates for IPv6, UDP, DTLS and TURN overhead.
            mtu: 1191,

            max_burst: 4,
            rtt_max: Duration::from_secs(60),
            rto_initial: Duration::from_millis(500),
            rto_max: Duration::from_secs(60),
            rto_min: Duration::from_millis(400),
            min_rtt_variance: Duration::from_millis(220),
            max_timer_backoff_duration: None,
            cwnd_mtus_initial: 10,
            cwnd_mtus_min: 4,

            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>:
            //
            //   The suggested value for the T5-shutdown-guard timer is 5 times 'RTO.Max'.
            shutdown_guard_timeout: Duration::from_secs(5 * 60),

            nodelay: false,
            enable_partial_reliability: true,
        }
    }
}

/// Events generated by the outqueue.
#[derive(Debug)]
pub enum OutQueueEvent {
    /// A packet has been built and should be sent to the destination address of `transport`.
    SendPacket { transport: TransportId, packet: Vec<u8> },

    /// A DATA chunk was discarded without having been (fully) delivered to the peer.
    ChunkFailed { tsn: Option<Tsn>, stream_id: StreamId, error: ErrorKind, payload: Vec<u8> },

    /// A destination that was inactive or unconfirmed has acknowledged data and is now
    /// considered active.
    TransportUp(TransportId),
}
