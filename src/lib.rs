//! An asynchronous ICMP echo ("ping") engine.
//!
//! The heavy lifting lives in four pieces: the packet codec ([`icmp`]),
//! the hostname resolver ([`resolve`]), the raw socket channel
//! ([`channel`]), and the session state machine that drives them
//! ([`session`]). A session reports every attempt transition to its caller
//! and keeps an ordered attempt log that [`stats`] summarizes on demand.
//!
//! Raw ICMP sockets need elevated privilege on most platforms, so expect
//! [`error::OpenError`] with `PermissionDenied` when running unprivileged.

pub mod channel;
pub mod error;
pub mod icmp;
pub mod resolve;
pub mod session;
pub mod stats;

pub use error::{OpenError, ParseRejection, ResolveError, SendError};
pub use resolve::{AddressStyle, ResolvedHost};
pub use session::{
    start_ping, AttemptReport, AttemptStatus, PingAttempt, PingOptions, SessionCore,
    SessionHandle,
};
pub use stats::SessionStats;
