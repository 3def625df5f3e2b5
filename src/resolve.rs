use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::ResolveError;

/// Which address family a session is willing to ping over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressStyle {
    /// Use the first IPv4 or IPv6 address found; the default.
    #[default]
    Any,
    /// Use the first IPv4 address found.
    Icmpv4,
    /// Use the first IPv6 address found.
    Icmpv6,
}

impl fmt::Display for AddressStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressStyle::Any => write!(f, "IPv4 or IPv6"),
            AddressStyle::Icmpv4 => write!(f, "IPv4"),
            AddressStyle::Icmpv6 => write!(f, "IPv6"),
        }
    }
}

/// One address chosen for the session, plus its printable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub addr: SocketAddr,
    pub ip_text: String,
}

impl ResolvedHost {
    fn new(addr: SocketAddr) -> Self {
        Self {
            ip_text: addr.ip().to_string(),
            addr,
        }
    }
}

fn style_accepts(style: AddressStyle, ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => style != AddressStyle::Icmpv6,
        IpAddr::V6(_) => style != AddressStyle::Icmpv4,
    }
}

/// Walk the resolver's candidates in order and take the first one the style
/// constraint allows.
pub fn select_address(
    candidates: impl IntoIterator<Item = SocketAddr>,
    style: AddressStyle,
) -> Option<SocketAddr> {
    candidates
        .into_iter()
        .find(|addr| style_accepts(style, addr.ip()))
}

/// Resolve `hostname` to a single address usable for raw ICMP sends.
///
/// Literal IPs short-circuit OS resolution but still have to satisfy the
/// style constraint. Retry policy belongs to the session, not here.
pub async fn resolve(hostname: &str, style: AddressStyle) -> Result<ResolvedHost, ResolveError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        if !style_accepts(style, ip) {
            return Err(ResolveError::NoUsableAddress {
                host: hostname.to_string(),
                style,
            });
        }
        return Ok(ResolvedHost::new(SocketAddr::new(ip, 0)));
    }

    let host = hostname.to_string();
    let candidates = tokio::task::spawn_blocking({
        let host = host.clone();
        move || {
            (host.as_str(), 0)
                .to_socket_addrs()
                .map(|iter| iter.collect::<Vec<_>>())
        }
    })
    .await
    .map_err(|e| ResolveError::Background(e.to_string()))?
    .map_err(|source| ResolveError::Lookup {
        host: host.clone(),
        source,
    })?;

    debug!("{} resolved to {} candidate(s)", host, candidates.len());

    select_address(candidates, style)
        .map(ResolvedHost::new)
        .ok_or(ResolveError::NoUsableAddress { host, style })
}
