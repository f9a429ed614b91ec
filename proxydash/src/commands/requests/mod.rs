mod tui;

use proxydash_core::{FeedState, MergeSummary, RequestRecord};

use super::Session;
use crate::client::RecentRequestsSource;
use crate::output;
use crate::poller::{PollEvent, PollSchedule, Poller};
use crate::units::{fmt_bytes, truncate};

pub fn run(
    profile: Option<&str>,
    no_tui: bool,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(profile, no_tui, once))
}

async fn run_async(
    profile: Option<&str>,
    no_tui: bool,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::open(profile)?;

    if once {
        return print_once(&session).await;
    }

    if !no_tui && output::is_interactive() {
        return tui::run_requests_tui(&session).await;
    }

    stream(&session).await
}

async fn print_once(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let batch = output::with_spinner_async(
        format!("Fetching recent requests from {}", session.profile.name),
        session.client.recent_requests(),
    )
    .await?;

    let mut feed = FeedState::new(session.settings.feed_capacity);
    feed.apply(&batch);

    if feed.is_empty() {
        output::muted("No recent requests");
        return Ok(());
    }

    println!("{}", request_header());
    for record in feed.iter() {
        println!("{}", request_row(record));
    }
    Ok(())
}

/// Non-interactive follow mode: prints rows as they appear or change.
async fn stream(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let (poller, mut events) = Poller::start(
        RecentRequestsSource(session.client.clone()),
        PollSchedule::new(session.settings.requests_interval(), true),
    );
    let follow = poller.is_auto_refresh();
    let mut feed = FeedState::new(session.settings.feed_capacity);

    output::section(&format!("Requests · {}", session.profile.name));
    if follow {
        output::muted("Following new requests (Ctrl+c to stop)");
    }
    println!("{}", request_header());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PollEvent::Fetched(batch) => {
                        let summary = feed.apply(&batch);
                        for line in changed_rows(&feed, &summary) {
                            println!("{}", line);
                        }
                    }
                    PollEvent::Failed(e) => {
                        output::warning(&format!("Refresh failed: {}", e));
                    }
                }
                if !follow {
                    break;
                }
            }
        }
    }

    poller.stop().await;
    Ok(())
}

/// Rows touched by a merge, oldest first so a scrolling terminal reads
/// top to bottom in arrival order.
fn changed_rows(feed: &FeedState, summary: &MergeSummary) -> Vec<String> {
    feed.iter()
        .rev()
        .filter_map(|record| {
            if summary.inserted.contains(&record.id) {
                Some(format!("+ {}", request_row(record)))
            } else if summary.updated.contains(&record.id) {
                Some(format!("~ {}", request_row(record)))
            } else {
                None
            }
        })
        .collect()
}

/// Short lifecycle label shown in the state column.
pub(crate) fn request_state(record: &RequestRecord) -> String {
    if record.is_failed() {
        return "Failed".to_string();
    }
    if let Some(status) = record.status()
        && !status.is_empty()
    {
        return status.to_string();
    }
    if record.is_completed() {
        "Completed".to_string()
    } else {
        "Active".to_string()
    }
}

/// URL when the proxy reported one, otherwise the remote host.
pub(crate) fn request_target(record: &RequestRecord) -> &str {
    record
        .url()
        .or_else(|| record.remote_host())
        .unwrap_or("-")
}

fn request_header() -> String {
    format!(
        "  {:>7} {:<10} {:<7} {:<18} {:>10} {:>10}  {}",
        "ID", "STATE", "METHOD", "POLICY", "DOWN", "UP", "TARGET"
    )
}

fn request_row(record: &RequestRecord) -> String {
    format!(
        "{:>7} {:<10} {:<7} {:<18} {:>10} {:>10}  {}",
        record.id,
        truncate(&request_state(record), 10),
        truncate(record.method().unwrap_or("-"), 7),
        truncate(record.policy_name().unwrap_or("-"), 18),
        fmt_bytes(record.in_bytes()),
        fmt_bytes(record.out_bytes()),
        request_target(record),
    )
}
