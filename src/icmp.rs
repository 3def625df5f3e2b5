use bytes::{BufMut, BytesMut};

use crate::error::ParseRejection;

/// ICMP message types
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// type(1) + code(1) + checksum(2) + identifier(2) + sequence(2)
pub const ICMP_HEADER_LEN: usize = 8;
pub const IPV4_HEADER_MIN: usize = 20;
pub const DEFAULT_PAYLOAD_LEN: usize = 56;

const IPPROTO_ICMP: u8 = 1;

/// A validated echo reply, stripped down to what the session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub sequence: u16,
    /// TTL from the IPv4 header; the hop limit is not visible for IPv6.
    pub time_to_live: Option<u8>,
    /// Length of the ICMP message after any IP header has been stripped.
    pub byte_len: usize,
}

/// The classic 56-byte filler, making a conventional 64-byte ICMPv4 packet
/// once the header is added.
pub fn default_payload(sequence: u16) -> Vec<u8> {
    let bottles = 99 - (sequence % 100);
    format!("{:>28} bottles of beer on the wall", bottles).into_bytes()
}

/// Serialize an echo request. IPv6 checksums are left to the kernel, which
/// owns the pseudo-header.
pub fn build_echo_request(
    identifier: u16,
    sequence: u16,
    payload: Option<&[u8]>,
    is_ipv6: bool,
) -> Vec<u8> {
    let filler;
    let payload = match payload {
        Some(data) => data,
        None => {
            filler = default_payload(sequence);
            &filler[..]
        }
    };

    let icmp_type = if is_ipv6 {
        ICMPV6_ECHO_REQUEST
    } else {
        ICMP_ECHO_REQUEST
    };

    let mut packet = BytesMut::with_capacity(ICMP_HEADER_LEN + payload.len());
    packet.put_u8(icmp_type);
    packet.put_u8(0); // code
    packet.put_u16(0); // checksum placeholder
    packet.put_u16(identifier);
    packet.put_u16(sequence);
    packet.extend_from_slice(payload);

    let mut bytes = packet.to_vec();
    if !is_ipv6 {
        let checksum = internet_checksum(&bytes);
        bytes[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    bytes
}

/// Validate an inbound datagram as the echo reply for `expected_identifier`,
/// with `seq_ok` deciding whether a sequence number is one we recently sent.
///
/// For IPv4 the datagram still carries its IP header; for IPv6 the OS strips
/// it before delivery. Everything is bounds-checked slice reads, so arbitrary
/// garbage cannot cause a panic.
pub fn parse_echo_reply(
    datagram: &[u8],
    is_ipv6: bool,
    expected_identifier: u16,
    seq_ok: impl Fn(u16) -> bool,
) -> Result<EchoReply, ParseRejection> {
    let (icmp, time_to_live) = if is_ipv6 {
        (datagram, None)
    } else {
        let (offset, ttl) = icmp_offset_in_ipv4(datagram)?;
        (&datagram[offset..], Some(ttl))
    };

    if icmp.len() < ICMP_HEADER_LEN {
        return Err(ParseRejection::Truncated);
    }

    if !is_ipv6 {
        // Re-verify the checksum: zero the field, recompute, compare.
        let received = u16::from_be_bytes([icmp[2], icmp[3]]);
        let mut scratch = icmp.to_vec();
        scratch[2] = 0;
        scratch[3] = 0;
        let computed = internet_checksum(&scratch);
        if computed != received {
            return Err(ParseRejection::ChecksumMismatch { computed, received });
        }
    }

    let expected_type = if is_ipv6 {
        ICMPV6_ECHO_REPLY
    } else {
        ICMP_ECHO_REPLY
    };
    if icmp[0] != expected_type {
        return Err(ParseRejection::NotEchoReply(icmp[0]));
    }
    if icmp[1] != 0 {
        return Err(ParseRejection::BadCode(icmp[1]));
    }

    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    if identifier != expected_identifier {
        return Err(ParseRejection::IdentifierMismatch(identifier));
    }

    let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
    if !seq_ok(sequence) {
        return Err(ParseRejection::StaleSequence(sequence));
    }

    Ok(EchoReply {
        sequence,
        time_to_live,
        byte_len: icmp.len(),
    })
}

/// Offset of the ICMP header within an IPv4 datagram, plus the TTL field.
fn icmp_offset_in_ipv4(datagram: &[u8]) -> Result<(usize, u8), ParseRejection> {
    if datagram.len() < IPV4_HEADER_MIN + ICMP_HEADER_LEN {
        return Err(ParseRejection::Truncated);
    }
    if datagram[0] >> 4 != 4 || datagram[9] != IPPROTO_ICMP {
        return Err(ParseRejection::NotIcmp);
    }
    let header_len = ((datagram[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_HEADER_MIN || datagram.len() < header_len + ICMP_HEADER_LEN {
        return Err(ParseRejection::Truncated);
    }
    Ok((header_len, datagram[8]))
}

/// Internet checksum (RFC 1071): one's-complement sum of 16-bit words with
/// folded carries, inverted. An odd trailing byte is padded with a zero low
/// byte.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]]) as u32
        } else {
            (chunk[0] as u32) << 8
        };
        sum += word;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
