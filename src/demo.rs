//! Synthetic call events for demo mode

use chrono::Local;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::callstatus::StatusPublisher;
use crate::constants::{DEMO_INTERVAL_MAX_SECS, DEMO_INTERVAL_MIN_SECS};
use crate::event::{CallEvent, CallEventKind};
use crate::listener::NoticeSender;

/// Destination used when no extension is configured.
const FALLBACK_DESTINATION: &str = "100";

/// Generate synthetic call traffic until cancelled.
///
/// Events are spaced 10-30 seconds apart and run through the same filter
/// and publishing path as live traffic, so nothing downstream can tell demo
/// mode from a real PBX. With no extension configured the filter matches
/// nothing; the generator therefore dials the configured extension (or its
/// fallback) so matches actually occur.
pub(crate) async fn run(
    token: CancellationToken,
    extension: String,
    publisher: StatusPublisher,
    notices: NoticeSender,
) {
    info!("[DEMO] Generating synthetic call events");
    loop {
        let interval = next_interval();
        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(interval) => {}
        }

        let event = synth_event(&extension);
        debug!("[DEMO] Synthesized {}", event);
        if event.concerns(&extension) {
            notices.call(event.clone());
            publisher
                .apply(&event)
                .await;
        }
    }
}

fn next_interval() -> Duration {
    let secs = rand::rng().random_range(DEMO_INTERVAL_MIN_SECS..=DEMO_INTERVAL_MAX_SECS);
    Duration::from_secs(secs)
}

/// One synthetic event: random national-format caller, the configured
/// extension (or the fallback) as destination, trunk-style channel.
pub(crate) fn synth_event(extension: &str) -> CallEvent {
    let mut rng = rand::rng();
    let kind = if rng.random_bool(0.5) {
        CallEventKind::DialBegin
    } else {
        CallEventKind::Hangup
    };
    let destination = if extension.is_empty() {
        FALLBACK_DESTINATION.to_string()
    } else {
        extension.to_string()
    };
    CallEvent {
        kind,
        caller_id: format!("0{}", rng.random_range(100_000_000..=999_999_999u64)),
        destination,
        channel: format!("SIP/trunk-{}", rng.random_range(1000..=9999)),
        unique_id: rng
            .random_range(1_000_000..=9_999_999)
            .to_string(),
        timestamp: Local::now(),
    }
}
