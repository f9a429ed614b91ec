use proxydash_core::{NamedTraffic, Traffic};

use super::Session;
use crate::client::TrafficSource;
use crate::output;
use crate::poller::{PollEvent, PollSchedule, Poller};
use crate::units::{fmt_bytes, fmt_duration, fmt_speed, fmt_unix_time, now_unix, truncate};

pub fn run(profile: Option<&str>, watch: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(profile, watch))
}

async fn run_async(profile: Option<&str>, watch: bool) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::open(profile)?;

    if !watch {
        let traffic = output::with_spinner_async(
            format!("Fetching traffic from {}", session.profile.name),
            session.client.traffic(),
        )
        .await?;
        print_traffic(&session.profile.name, &traffic, now_unix());
        return Ok(());
    }

    let interval = session.settings.traffic_interval();
    if interval.is_zero() {
        return Err("dashboard.traffic_interval_ms is 0; --watch needs a refresh interval".into());
    }

    let (poller, mut events) = Poller::start(
        TrafficSource(session.client.clone()),
        PollSchedule::new(interval, true),
    );
    let term = console::Term::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PollEvent::Fetched(traffic) => {
                        if term.is_term() {
                            let _ = term.clear_screen();
                        }
                        print_traffic(&session.profile.name, &traffic, now_unix());
                        output::muted(&format!(
                            "Refreshing every {} (Ctrl+c to stop)",
                            fmt_duration(interval)
                        ));
                    }
                    PollEvent::Failed(e) => {
                        output::warning(&format!("Refresh failed, showing last data: {}", e));
                    }
                }
            }
        }
    }

    poller.stop().await;
    Ok(())
}

fn print_traffic(profile_name: &str, traffic: &Traffic, now: f64) {
    output::section(&format!("Traffic · {}", profile_name));
    println!("{:<12} {}", "Started", fmt_unix_time(traffic.start_time));
    println!("{:<12} {}", "Uptime", fmt_duration(traffic.uptime(now)));

    let interfaces = traffic.sorted_interfaces();
    if !interfaces.is_empty() {
        output::section("Interfaces");
        print_traffic_table(&interfaces);
    }

    let connectors = traffic.sorted_connectors();
    if !connectors.is_empty() {
        output::section("Policies");
        print_traffic_table(&connectors);
    }
}

fn print_traffic_table(rows: &[NamedTraffic]) {
    println!("{}", traffic_header());
    for row in rows {
        println!("{}", traffic_row(row));
    }
}

fn traffic_header() -> String {
    format!(
        "{:<24} {:>11} {:>11} {:>13} {:>13} {:>13} {:>13}",
        "NAME", "DOWNLOAD", "UPLOAD", "↓ SPEED", "↑ SPEED", "↓ PEAK", "↑ PEAK"
    )
}

fn traffic_row(row: &NamedTraffic) -> String {
    let t = &row.traffic;
    format!(
        "{:<24} {:>11} {:>11} {:>13} {:>13} {:>13} {:>13}",
        truncate(&row.name, 24),
        fmt_bytes(t.in_bytes),
        fmt_bytes(t.out_bytes),
        fmt_speed(t.in_current_speed),
        fmt_speed(t.out_current_speed),
        fmt_speed(t.in_max_speed),
        fmt_speed(t.out_max_speed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxydash_core::ConnectorTraffic;

    #[test]
    fn traffic_row_formats_counters() {
        let row = NamedTraffic {
            name: "DIRECT".to_string(),
            traffic: ConnectorTraffic {
                in_bytes: 2048,
                out_bytes: 100,
                in_current_speed: 1024,
                ..Default::default()
            },
        };
        let line = traffic_row(&row);
        assert!(line.starts_with("DIRECT"));
        assert!(line.contains("2.0 KB"));
        assert!(line.contains("100 B"));
        assert!(line.contains("1.0 KB/s"));
    }
}
