use std::io;

use thiserror::Error;

use crate::resolve::AddressStyle;

/// Hostname lookup failures. Fatal for the session that requested them.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to look up {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("no {style} address found for {host}")]
    NoUsableAddress { host: String, style: AddressStyle },
    #[error("resolver task failed: {0}")]
    Background(String),
}

/// Raw socket creation failures. Typically `PermissionDenied`, since raw
/// ICMP sockets require elevated privilege on most platforms.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("failed to open raw ICMP socket: {0}")]
    Io(#[from] io::Error),
}

/// Per-attempt send failures; the session retries these up to its limit.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to send packet: {0}")]
    Io(#[from] io::Error),
    #[error("short send: wrote {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },
    #[error("channel is closed")]
    Closed,
}

/// Reasons an inbound datagram is not the echo reply we are waiting for.
/// Non-fatal; the session records these as unexpected replies.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ParseRejection {
    #[error("datagram too short to hold the expected headers")]
    Truncated,
    #[error("IPv4 datagram does not carry ICMP")]
    NotIcmp,
    #[error("not an echo reply (type {0})")]
    NotEchoReply(u8),
    #[error("unexpected ICMP code {0}")]
    BadCode(u8),
    #[error("checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch { computed: u16, received: u16 },
    #[error("identifier mismatch (got {0:#06x})")]
    IdentifierMismatch(u16),
    #[error("sequence number {0} was not recently sent")]
    StaleSequence(u16),
}
