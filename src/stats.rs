use crate::session::{AttemptStatus, PingAttempt};

/// Aggregate figures over a session's attempt log. Always derived on demand
/// from the log itself, never cached alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub transmitted: usize,
    pub received: usize,
    pub loss_percent: f64,
    pub min_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub max_rtt_ms: f64,
}

pub fn compute(log: &[PingAttempt]) -> SessionStats {
    let mut transmitted = 0usize;
    let mut received = 0usize;
    let mut min = f64::INFINITY;
    let mut max = 0.0f64;
    let mut total = 0.0f64;

    for attempt in log {
        match attempt.status {
            AttemptStatus::Finished | AttemptStatus::Errored => continue,
            _ => transmitted += 1,
        }
        if attempt.status == AttemptStatus::ReplyReceived {
            received += 1;
            if let Some(rtt) = attempt.round_trip_ms {
                if rtt < min {
                    min = rtt;
                }
                if rtt > max {
                    max = rtt;
                }
                total += rtt;
            }
        }
    }

    let loss_percent =
        (transmitted as f64 - received as f64) / (transmitted.max(1) as f64) * 100.0;

    SessionStats {
        transmitted,
        received,
        loss_percent: loss_percent.max(0.0),
        min_rtt_ms: if received == 0 { 0.0 } else { min },
        avg_rtt_ms: if received == 0 {
            0.0
        } else {
            total / received as f64
        },
        max_rtt_ms: max,
    }
}

/// The classic closing block ping prints when a run ends.
pub fn summary(host: &str, log: &[PingAttempt]) -> String {
    let stats = compute(log);
    let mut out = format!("--- {} ping statistics ---\n", host);
    out.push_str(&format!(
        "{} packets transmitted, {} packets received, {:.1}% packet loss\n",
        stats.transmitted, stats.received, stats.loss_percent
    ));
    if stats.received > 0 {
        out.push_str(&format!(
            "round-trip min/avg/max = {:.3}/{:.3}/{:.3} ms\n",
            stats.min_rtt_ms, stats.avg_rtt_ms, stats.max_rtt_ms
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(sequence: u16, rtt_ms: f64) -> PingAttempt {
        PingAttempt {
            sequence_number: sequence,
            target: Some("example.com".to_string()),
            ip_address: Some("192.0.2.1".to_string()),
            byte_length: 64,
            round_trip_ms: Some(rtt_ms),
            time_to_live: Some(56),
            status: AttemptStatus::ReplyReceived,
        }
    }

    fn with_status(sequence: u16, status: AttemptStatus) -> PingAttempt {
        PingAttempt {
            sequence_number: sequence,
            target: None,
            ip_address: None,
            byte_length: 0,
            round_trip_ms: None,
            time_to_live: None,
            status,
        }
    }

    #[test]
    fn five_attempts_four_replies_one_timeout() {
        let log = vec![
            reply(0, 10.0),
            reply(1, 12.0),
            reply(2, 11.0),
            with_status(3, AttemptStatus::TimedOut),
            reply(4, 13.0),
            with_status(4, AttemptStatus::Finished),
        ];
        let stats = compute(&log);
        assert_eq!(stats.transmitted, 5);
        assert_eq!(stats.received, 4);
        assert!((stats.loss_percent - 20.0).abs() < f64::EPSILON);
        assert!((stats.avg_rtt_ms - 11.5).abs() < f64::EPSILON);
        assert!((stats.min_rtt_ms - 10.0).abs() < f64::EPSILON);
        assert!((stats.max_rtt_ms - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_log_divides_by_one_not_zero() {
        let stats = compute(&[]);
        assert_eq!(stats.transmitted, 0);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.loss_percent, 0.0);
        assert_eq!(stats.avg_rtt_ms, 0.0);
    }

    #[test]
    fn terminal_records_do_not_count_as_transmitted() {
        let log = vec![
            with_status(0, AttemptStatus::Errored),
            with_status(0, AttemptStatus::Finished),
        ];
        let stats = compute(&log);
        assert_eq!(stats.transmitted, 0);
        assert_eq!(stats.loss_percent, 0.0);
    }

    #[test]
    fn send_failures_count_as_transmitted() {
        let log = vec![
            with_status(0, AttemptStatus::PacketSendFailed),
            reply(1, 8.0),
        ];
        let stats = compute(&log);
        assert_eq!(stats.transmitted, 2);
        assert_eq!(stats.received, 1);
        assert!((stats.loss_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_block_reads_like_ping() {
        let log = vec![reply(0, 10.0), with_status(1, AttemptStatus::TimedOut)];
        let text = summary("example.com", &log);
        assert!(text.starts_with("--- example.com ping statistics ---\n"));
        assert!(text.contains("2 packets transmitted, 1 packets received, 50.0% packet loss"));
        assert!(text.contains("round-trip min/avg/max"));
    }
}
