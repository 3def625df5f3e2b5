use anyhow::Result;
use clap::Parser;

use pingkit::session::{start_ping, AttemptStatus, PingOptions};
use pingkit::stats;
use pingkit::AddressStyle;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target hostname or IP address to ping
    target: String,

    /// Per-attempt timeout and inter-attempt delay, in milliseconds
    #[arg(short = 't', long, default_value_t = 500)]
    timeout_ms: u64,

    /// Number of attempts before the session finishes
    #[arg(short = 'c', long, default_value_t = 100)]
    count: u32,

    /// Only ping over IPv4
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only ping over IPv6
    #[arg(short = '6')]
    ipv6: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let style = if args.ipv4 {
        AddressStyle::Icmpv4
    } else if args.ipv6 {
        AddressStyle::Icmpv6
    } else {
        AddressStyle::Any
    };

    let options = PingOptions {
        timeout_millis: args.timeout_ms,
        max_attempts: args.count,
        address_style: style,
    };

    let (handle, mut reports) = start_ping(args.target.clone(), options);

    let mut saw_error = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                // Keep draining so the final Finished report still prints.
            }
            report = reports.recv() => {
                let Some(report) = report else { break };
                let now = chrono::Local::now();
                println!("[{}] {}", now.format("%H:%M:%S"), report.attempt);
                match report.attempt.status {
                    AttemptStatus::Errored => saw_error = true,
                    AttemptStatus::Finished => {
                        print!("{}", stats::summary(&args.target, &report.log));
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.finished().await;

    if saw_error {
        eprintln!(
            "Ping session failed. Raw ICMP sockets usually require elevated \
             privilege (run as root, or as Administrator on Windows)."
        );
        anyhow::bail!("ping {} failed", args.target);
    }

    Ok(())
}
