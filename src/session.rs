use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::RawChannel;
use crate::error::{OpenError, ResolveError, SendError};
use crate::icmp;
use crate::resolve::{self, AddressStyle, ResolvedHost};
use crate::stats::{self, SessionStats};

/// How many sequence numbers back a reply may lag once the 16-bit counter
/// has wrapped. At one packet per second this is two minutes, the usual
/// upper bound on how long a packet bounces around the Internet.
const SEQUENCE_WINDOW: u16 = 120;

/// Where one logical attempt (or the whole session) ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Started,
    PacketSendFailed,
    ReplyReceived,
    UnexpectedReply,
    TimedOut,
    Errored,
    Finished,
}

/// One record in the session's attempt log. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct PingAttempt {
    pub sequence_number: u16,
    pub target: Option<String>,
    pub ip_address: Option<String>,
    pub byte_length: usize,
    pub round_trip_ms: Option<f64>,
    pub time_to_live: Option<u8>,
    pub status: AttemptStatus,
}

impl fmt::Display for PingAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self.ip_address.as_deref().unwrap_or("<unresolved>");
        let target = self.target.as_deref().unwrap_or(ip);
        match self.status {
            AttemptStatus::Started => {
                write!(f, "PING {} ({}): {} data bytes", target, ip, self.byte_length)
            }
            AttemptStatus::ReplyReceived => write!(
                f,
                "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                self.byte_length,
                ip,
                self.sequence_number,
                self.time_to_live.unwrap_or(0),
                self.round_trip_ms.unwrap_or(0.0)
            ),
            AttemptStatus::TimedOut => write!(
                f,
                "Request timeout for icmp_seq {}, ttl = {}",
                self.sequence_number,
                self.time_to_live.unwrap_or(0)
            ),
            AttemptStatus::PacketSendFailed => write!(
                f,
                "Fail to send packet: icmp_seq={}",
                self.sequence_number
            ),
            AttemptStatus::UnexpectedReply => write!(
                f,
                "Receive unexpected packet: icmp_seq={}",
                self.sequence_number
            ),
            AttemptStatus::Errored => write!(f, "Cannot ping {}", target),
            AttemptStatus::Finished => write!(f, "ping session finished"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PingOptions {
    pub timeout_millis: u64,
    pub max_attempts: u32,
    pub address_style: AddressStyle,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            timeout_millis: 500,
            max_attempts: 100,
            address_style: AddressStyle::default(),
        }
    }
}

/// Delivered to the caller once per attempt-level transition. The final
/// report of a session always carries `AttemptStatus::Finished`.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt: PingAttempt,
    pub log: Vec<PingAttempt>,
}

/// External happenings fed into the session core. Exactly one source can
/// terminate a given attempt; everything arriving after that is ignored.
#[derive(Debug)]
pub enum SessionEvent {
    ResolveCompleted(Result<ResolvedHost, ResolveError>),
    ChannelOpened(Result<(), OpenError>),
    SendFinished(Result<usize, SendError>),
    DatagramArrived { data: Vec<u8>, elapsed: Duration },
    TimeoutFired,
    RetryDue,
    ChannelFailed(io::Error),
    CancelRequested,
}

/// What the core wants the driver to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    ResolveHost { host: String, style: AddressStyle },
    OpenChannel(SocketAddr),
    SendPacket { packet: Vec<u8>, dest: SocketAddr },
    ArmTimeout(Duration),
    ScheduleRetry(Duration),
    Report(PingAttempt),
    CloseChannel,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Resolving,
    Opening,
    Sending,
    AwaitingReply,
    Waiting,
    Finished,
}

/// The session state machine. Pure: every transition is
/// `(event) -> effects`, so the whole lifecycle is testable without a
/// socket, a timer, or a resolver.
pub struct SessionCore {
    host: String,
    options: PingOptions,
    identifier: u16,
    next_sequence_number: u16,
    sequence_has_wrapped: bool,
    in_flight_sequence: u16,
    retry_count: u32,
    resolved: Option<ResolvedHost>,
    log: Vec<PingAttempt>,
    phase: Phase,
}

impl SessionCore {
    pub fn new(host: String, options: PingOptions) -> Self {
        let identifier = rand::thread_rng().gen::<u16>();
        Self::with_identifier(host, options, identifier)
    }

    /// Deterministic construction for callers that manage identifiers
    /// themselves.
    pub fn with_identifier(host: String, options: PingOptions, identifier: u16) -> Self {
        Self {
            host,
            options,
            identifier,
            next_sequence_number: 0,
            sequence_has_wrapped: false,
            in_flight_sequence: 0,
            retry_count: 0,
            resolved: None,
            log: Vec::new(),
            phase: Phase::Idle,
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn log(&self) -> &[PingAttempt] {
        &self.log
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn statistics(&self) -> SessionStats {
        stats::compute(&self.log)
    }

    /// Kick off the session: `Idle -> Resolving`.
    pub fn start(&mut self) -> Vec<SessionEffect> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        self.phase = Phase::Resolving;
        vec![SessionEffect::ResolveHost {
            host: self.host.clone(),
            style: self.options.address_style,
        }]
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        if self.phase == Phase::Finished {
            // Terminal: the losing side of any timer-vs-socket race lands
            // here and must be a no-op.
            return Vec::new();
        }
        match event {
            SessionEvent::CancelRequested => self.finish(),
            SessionEvent::ResolveCompleted(result) => self.resolve_completed(result),
            SessionEvent::ChannelOpened(result) => self.channel_opened(result),
            SessionEvent::SendFinished(result) => self.send_finished(result),
            SessionEvent::DatagramArrived { data, elapsed } => {
                self.datagram_arrived(&data, elapsed)
            }
            SessionEvent::TimeoutFired => self.timeout_fired(),
            SessionEvent::RetryDue => self.retry_due(),
            SessionEvent::ChannelFailed(e) => {
                warn!("receive path failed: {}", e);
                self.fail_session()
            }
        }
    }

    fn resolve_completed(
        &mut self,
        result: Result<ResolvedHost, ResolveError>,
    ) -> Vec<SessionEffect> {
        if self.phase != Phase::Resolving {
            return Vec::new();
        }
        match result {
            Ok(resolved) => {
                debug!("{} resolved to {}", self.host, resolved.ip_text);
                let addr = resolved.addr;
                self.resolved = Some(resolved);
                self.phase = Phase::Opening;
                vec![SessionEffect::OpenChannel(addr)]
            }
            Err(e) => {
                warn!("resolution of {} failed: {}", self.host, e);
                self.fail_session()
            }
        }
    }

    fn channel_opened(&mut self, result: Result<(), OpenError>) -> Vec<SessionEffect> {
        if self.phase != Phase::Opening {
            return Vec::new();
        }
        match result {
            Ok(()) => {
                let started = PingAttempt {
                    sequence_number: self.next_sequence_number,
                    target: Some(self.host.clone()),
                    ip_address: self.resolved_ip(),
                    byte_length: icmp::DEFAULT_PAYLOAD_LEN,
                    round_trip_ms: None,
                    time_to_live: None,
                    status: AttemptStatus::Started,
                };
                self.phase = Phase::Sending;
                vec![SessionEffect::Report(started), self.send_effect()]
            }
            Err(e) => {
                warn!("cannot open raw socket: {}", e);
                self.fail_session()
            }
        }
    }

    fn send_finished(&mut self, result: Result<usize, SendError>) -> Vec<SessionEffect> {
        if self.phase != Phase::Sending {
            return Vec::new();
        }

        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        if self.next_sequence_number == 0 {
            self.sequence_has_wrapped = true;
        }

        match result {
            Ok(_) => {
                self.phase = Phase::AwaitingReply;
                vec![SessionEffect::ArmTimeout(self.timeout())]
            }
            Err(e) => {
                warn!(
                    "send of icmp_seq {} failed: {}",
                    self.in_flight_sequence, e
                );
                let attempt = self.bare_attempt(AttemptStatus::PacketSendFailed);
                self.conclude_attempt(attempt)
            }
        }
    }

    fn datagram_arrived(&mut self, data: &[u8], elapsed: Duration) -> Vec<SessionEffect> {
        if self.phase != Phase::AwaitingReply {
            return Vec::new();
        }

        let is_ipv6 = self
            .resolved
            .as_ref()
            .map(|r| r.addr.is_ipv6())
            .unwrap_or(false);

        let parsed = icmp::parse_echo_reply(data, is_ipv6, self.identifier, |s| {
            self.validate_sequence(s)
        });

        let attempt = match parsed {
            Ok(reply) => PingAttempt {
                sequence_number: reply.sequence,
                target: Some(self.host.clone()),
                ip_address: self.resolved_ip(),
                byte_length: reply.byte_len,
                round_trip_ms: Some(elapsed.as_secs_f64() * 1000.0),
                time_to_live: reply.time_to_live,
                status: AttemptStatus::ReplyReceived,
            },
            Err(rejection) => {
                debug!("discarding inbound datagram: {}", rejection);
                self.bare_attempt(AttemptStatus::UnexpectedReply)
            }
        };
        self.conclude_attempt(attempt)
    }

    fn timeout_fired(&mut self) -> Vec<SessionEffect> {
        if self.phase != Phase::AwaitingReply {
            return Vec::new();
        }
        let attempt = self.bare_attempt(AttemptStatus::TimedOut);
        self.conclude_attempt(attempt)
    }

    fn retry_due(&mut self) -> Vec<SessionEffect> {
        if self.phase != Phase::Waiting {
            return Vec::new();
        }
        self.phase = Phase::Sending;
        vec![self.send_effect()]
    }

    /// Record a per-attempt terminal status and either schedule the next
    /// attempt or wind the session down.
    fn conclude_attempt(&mut self, attempt: PingAttempt) -> Vec<SessionEffect> {
        self.log.push(attempt.clone());
        let mut effects = vec![SessionEffect::Report(attempt)];
        if self.retry_count < self.options.max_attempts.saturating_sub(1) {
            self.retry_count += 1;
            self.phase = Phase::Waiting;
            effects.push(SessionEffect::ScheduleRetry(self.timeout()));
        } else {
            effects.extend(self.finish());
        }
        effects
    }

    /// Session-fatal path: report `Errored`, then close out.
    fn fail_session(&mut self) -> Vec<SessionEffect> {
        let errored = self.bare_attempt(AttemptStatus::Errored);
        self.log.push(errored.clone());
        let mut effects = vec![SessionEffect::Report(errored)];
        effects.extend(self.finish());
        effects
    }

    /// Close out with the single final `Finished` report. Also the whole of
    /// cancellation.
    fn finish(&mut self) -> Vec<SessionEffect> {
        self.phase = Phase::Finished;
        let finished = self.bare_attempt(AttemptStatus::Finished);
        self.log.push(finished.clone());
        vec![
            SessionEffect::CloseChannel,
            SessionEffect::Report(finished),
            SessionEffect::Stop,
        ]
    }

    fn send_effect(&mut self) -> SessionEffect {
        self.in_flight_sequence = self.next_sequence_number;
        let is_ipv6 = self
            .resolved
            .as_ref()
            .map(|r| r.addr.is_ipv6())
            .unwrap_or(false);
        let packet =
            icmp::build_echo_request(self.identifier, self.in_flight_sequence, None, is_ipv6);
        let dest = self
            .resolved
            .as_ref()
            .map(|r| r.addr)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        SessionEffect::SendPacket { packet, dest }
    }

    fn bare_attempt(&self, status: AttemptStatus) -> PingAttempt {
        PingAttempt {
            sequence_number: self.in_flight_sequence,
            target: Some(self.host.clone()),
            ip_address: None,
            byte_length: 0,
            round_trip_ms: None,
            time_to_live: None,
            status,
        }
    }

    fn resolved_ip(&self) -> Option<String> {
        self.resolved.as_ref().map(|r| r.ip_text.clone())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_millis)
    }

    /// Is `sequence` one we recently sent? Before the counter wraps a plain
    /// comparison suffices; afterwards we accept anything within the last
    /// `SEQUENCE_WINDOW` sends, with the u16 subtraction wrapping for us.
    fn validate_sequence(&self, sequence: u16) -> bool {
        if self.sequence_has_wrapped {
            self.next_sequence_number.wrapping_sub(sequence) < SEQUENCE_WINDOW
        } else {
            sequence < self.next_sequence_number
        }
    }
}

/// Controls a running session. Dropping the handle does not cancel the
/// session; call [`SessionHandle::cancel`] for that.
pub struct SessionHandle {
    cancel_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Cooperative cancellation: the session stops sending, closes its
    /// socket, and delivers one final `Finished` report.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// Wait for the session task to wind down.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

/// Start pinging `hostname`. Reports arrive on the returned receiver, one
/// per attempt transition, ending with a `Finished` report.
pub fn start_ping(
    hostname: impl Into<String>,
    options: PingOptions,
) -> (SessionHandle, mpsc::UnboundedReceiver<AttemptReport>) {
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
    let core = SessionCore::new(hostname.into(), options);
    let task = tokio::spawn(run(core, report_tx, cancel_rx));
    (SessionHandle { cancel_tx, task }, report_rx)
}

/// The driver: executes effects, feeds the resulting events back into the
/// core, and when the effect queue drains, awaits exactly the sources the
/// current phase armed.
async fn run(
    mut core: SessionCore,
    report_tx: mpsc::UnboundedSender<AttemptReport>,
    mut cancel_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut channel: Option<RawChannel> = None;
    let mut sent_at = Instant::now();
    let mut timeout_deadline: Option<tokio::time::Instant> = None;
    let mut retry_deadline: Option<tokio::time::Instant> = None;
    let mut pending: VecDeque<SessionEffect> = core.start().into();

    loop {
        while let Some(effect) = pending.pop_front() {
            match effect {
                SessionEffect::ResolveHost { host, style } => {
                    let event = tokio::select! {
                        _ = cancel_rx.recv() => SessionEvent::CancelRequested,
                        result = resolve::resolve(&host, style) => {
                            SessionEvent::ResolveCompleted(result)
                        }
                    };
                    pending.extend(core.handle(event));
                }
                SessionEffect::OpenChannel(addr) => {
                    let event = match RawChannel::open(addr.ip()) {
                        Ok(ch) => {
                            channel = Some(ch);
                            SessionEvent::ChannelOpened(Ok(()))
                        }
                        Err(e) => SessionEvent::ChannelOpened(Err(e)),
                    };
                    pending.extend(core.handle(event));
                }
                SessionEffect::SendPacket { packet, dest } => {
                    sent_at = Instant::now();
                    let result = match channel.as_ref() {
                        Some(ch) => ch.send(&packet, dest),
                        None => Err(SendError::Closed),
                    };
                    pending.extend(core.handle(SessionEvent::SendFinished(result)));
                }
                SessionEffect::ArmTimeout(duration) => {
                    timeout_deadline = Some(tokio::time::Instant::now() + duration);
                }
                SessionEffect::ScheduleRetry(duration) => {
                    retry_deadline = Some(tokio::time::Instant::now() + duration);
                }
                SessionEffect::Report(attempt) => {
                    let _ = report_tx.send(AttemptReport {
                        attempt,
                        log: core.log().to_vec(),
                    });
                }
                SessionEffect::CloseChannel => {
                    if let Some(ch) = channel.as_mut() {
                        ch.close();
                    }
                }
                SessionEffect::Stop => return,
            }
        }

        let event = if let Some(deadline) = timeout_deadline.take() {
            match channel.as_ref() {
                Some(ch) => tokio::select! {
                    _ = cancel_rx.recv() => SessionEvent::CancelRequested,
                    _ = tokio::time::sleep_until(deadline) => SessionEvent::TimeoutFired,
                    received = ch.receive() => match received {
                        Ok(data) => SessionEvent::DatagramArrived {
                            data,
                            elapsed: sent_at.elapsed(),
                        },
                        Err(e) => SessionEvent::ChannelFailed(e),
                    },
                },
                None => SessionEvent::ChannelFailed(io::Error::from(io::ErrorKind::NotConnected)),
            }
        } else if let Some(deadline) = retry_deadline.take() {
            tokio::select! {
                _ = cancel_rx.recv() => SessionEvent::CancelRequested,
                _ = tokio::time::sleep_until(deadline) => SessionEvent::RetryDue,
            }
        } else {
            // Nothing armed and no Stop emitted; the session cannot make
            // further progress.
            return;
        };
        pending.extend(core.handle(event));
    }
}
