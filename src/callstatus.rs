//! Status file publishing and the auto-clear timer

use chrono::{DateTime, Local};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::ListenerError;
use crate::event::{CallEvent, CallEventKind};
use crate::listener::NoticeSender;

/// Publishes call records to the status file consumed by the CRM.
///
/// Per matched event:
/// - `DialBegin` writes a record and arms a delayed clear;
/// - `Hangup` cancels any pending clear and empties the file at once;
/// - an expired timer empties the file on its own.
///
/// At most one clear timer is pending at any time; arming replaces the
/// previous one. File failures are reported through the notice channel and
/// never take the engine down.
#[derive(Clone)]
pub(crate) struct StatusPublisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    path: PathBuf,
    clear_delay: Duration,
    /// Serializes writers. Readers are protected by the rename in
    /// [`replace_file`](Self::replace_file), not by this lock.
    write_lock: StdMutex<()>,
    /// Single slot for the pending delayed-clear task.
    pending_clear: Mutex<Option<JoinHandle<()>>>,
    notices: NoticeSender,
}

impl StatusPublisher {
    pub(crate) fn new(agent: &AgentConfig, notices: NoticeSender) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                path: agent
                    .status_file
                    .clone(),
                clear_delay: agent.clear_delay(),
                write_lock: StdMutex::new(()),
                pending_clear: Mutex::new(None),
                notices,
            }),
        }
    }

    /// Apply one matched call event to the file.
    pub(crate) async fn apply(&self, event: &CallEvent) {
        match event.kind {
            CallEventKind::DialBegin => {
                self.on_dial_begin(event)
                    .await
            }
            CallEventKind::Hangup => {
                self.on_hangup()
                    .await
            }
            // Bridges reach the application but leave the file alone
            _ => {}
        }
    }

    async fn on_dial_begin(&self, event: &CallEvent) {
        // The old timer must be fully gone before the new record goes down,
        // or its clear could land on top of this call's record.
        self.cancel_pending_clear()
            .await;

        match self
            .inner
            .write_record(event)
        {
            Ok(()) => debug!("[STATUS] Wrote call record for {}", event.caller_id),
            Err(err) => {
                warn!("[STATUS] {}", err);
                self.inner
                    .notices
                    .error(err);
                return;
            }
        }
        self.arm_clear()
            .await;
    }

    async fn on_hangup(&self) {
        self.cancel_pending_clear()
            .await;
        match self
            .inner
            .clear_file()
        {
            Ok(()) => debug!("[STATUS] Cleared call record on hangup"),
            Err(err) => {
                warn!("[STATUS] {}", err);
                self.inner
                    .notices
                    .error(err);
            }
        }
    }

    /// Cancel the armed clear timer, if any, and wait until its task is done.
    ///
    /// Abort can only land at an await point. The truncation inside the task
    /// is synchronous, so a clear that has begun always completes — and this
    /// method does not return until it has. After return, no clear from
    /// before this call can touch the file.
    pub(crate) async fn cancel_pending_clear(&self) {
        let pending = self
            .inner
            .pending_clear
            .lock()
            .await
            .take();
        if let Some(handle) = pending {
            handle.abort();
            // JoinError::Cancelled when the abort landed in the sleep;
            // Ok(()) when the task had already finished. Either is fine.
            let _ = handle.await;
        }
    }

    async fn arm_clear(&self) {
        let inner = self
            .inner
            .clone();
        let handle = tokio::spawn(async move {
            sleep(inner.clear_delay).await;
            // No awaits below: once the sleep is over the clear runs to
            // completion even if an abort arrives concurrently.
            debug!("[STATUS] Auto-clear timer fired");
            if let Err(err) = inner.clear_file() {
                warn!("[STATUS] {}", err);
                inner
                    .notices
                    .error(err);
            }
        });

        let mut slot = self
            .inner
            .pending_clear
            .lock()
            .await;
        // Slot is normally empty here; dial-begin cancels before arming.
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Wind down. No clear may fire after this returns.
    pub(crate) async fn shutdown(&self) {
        self.cancel_pending_clear()
            .await;
    }
}

impl PublisherInner {
    fn write_record(&self, event: &CallEvent) -> Result<(), ListenerError> {
        let body = render_record(&event.caller_id, &event.destination, Local::now());
        self.replace_file(body.as_bytes())
            .map_err(ListenerError::FileWrite)
    }

    fn clear_file(&self) -> Result<(), ListenerError> {
        self.replace_file(b"")
            .map_err(ListenerError::FileClear)
    }

    /// Atomically replace the file contents: write a sibling temp file and
    /// rename it over the target. A reader sees the old record or the new
    /// one, never a torn write. The parent directory is created on demand.
    fn replace_file(&self, bytes: &[u8]) -> io::Result<()> {
        let _guard = match self
            .write_lock
            .lock()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(parent) = self
            .path
            .parent()
        {
            if !parent
                .as_os_str()
                .is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self
            .path
            .with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)
    }
}

/// Render one call record the way the CRM expects it: fixed template, no
/// XML declaration, no trailing newline. Date and time are the moment of
/// writing, not the event timestamp.
pub(crate) fn render_record(caller_id: &str, destination: &str, at: DateTime<Local>) -> String {
    format!(
        r#"<CRM>
    <callRecord>
        <CallerID>{caller}</CallerID>
        <DDI>{ddi}</DDI>
        <Date>{date}</Date>
        <Time>{time}</Time>
    </callRecord>
</CRM>"#,
        caller = caller_id,
        ddi = destination,
        date = at.format("%d-%m-%Y"),
        time = at.format("%H:%M:%S"),
    )
}
