//! Listener lifecycle: the public handle, the notice stream, and the engine task

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callstatus::StatusPublisher;
use crate::config::ListenerConfig;
use crate::connection;
use crate::constants::{MAX_NOTICE_QUEUE_SIZE, RETRY_DELAY_SECS};
use crate::demo;
use crate::error::ListenerError;
use crate::event::CallEvent;

/// Listener lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ListenerState {
    /// Not started, or stopped.
    Idle,
    /// Attempting to reach the PBX.
    Connecting,
    /// Logged in and streaming call events.
    Connected,
    /// Generating synthetic traffic instead of talking to a PBX.
    DemoMode,
    /// The last attempt failed; a retry follows after a fixed delay.
    Error(String),
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Idle => write!(f, "idle"),
            ListenerState::Connecting => write!(f, "connecting"),
            ListenerState::Connected => write!(f, "connected"),
            ListenerState::DemoMode => write!(f, "demo mode"),
            ListenerState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Notification delivered to the application via [`ListenerEventStream`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ListenerEvent {
    /// The listener moved to a new state.
    StatusChanged(ListenerState),
    /// A call event passed the extension filter.
    Call(CallEvent),
    /// A non-fatal error occurred; the listener keeps running.
    Error(ListenerError),
}

/// Sends notices to the application without ever blocking the engine.
#[derive(Clone)]
pub(crate) struct NoticeSender {
    tx: mpsc::Sender<ListenerEvent>,
    status_tx: watch::Sender<ListenerState>,
    dropped: Arc<AtomicU64>,
}

impl NoticeSender {
    pub(crate) fn new(
        tx: mpsc::Sender<ListenerEvent>,
        status_tx: watch::Sender<ListenerState>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            status_tx,
            dropped,
        }
    }

    /// Publish a state change on the watch mirror and as a notice.
    pub(crate) fn set_state(&self, state: ListenerState) {
        debug!("Listener state: {}", state);
        let _ = self
            .status_tx
            .send(state.clone());
        self.dispatch(ListenerEvent::StatusChanged(state));
    }

    pub(crate) fn call(&self, event: CallEvent) {
        self.dispatch(ListenerEvent::Call(event));
    }

    pub(crate) fn error(&self, error: ListenerError) {
        self.dispatch(ListenerEvent::Error(error));
    }

    /// Deliver without blocking. A full queue drops the notice and counts it;
    /// a closed queue means nobody is listening, which is fine.
    fn dispatch(&self, notice: ListenerEvent) {
        match self
            .tx
            .try_send(notice)
        {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Notice queue full, dropping notice");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

struct EngineHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    fn is_finished(&self) -> bool {
        self.task
            .is_finished()
    }
}

struct ListenerShared {
    engine: StdMutex<Option<EngineHandle>>,
    notice_tx: mpsc::Sender<ListenerEvent>,
    status_tx: watch::Sender<ListenerState>,
    status_rx: watch::Receiver<ListenerState>,
    dropped: Arc<AtomicU64>,
}

impl ListenerShared {
    fn notices(&self) -> NoticeSender {
        let tx = self
            .notice_tx
            .clone();
        let status_tx = self
            .status_tx
            .clone();
        let dropped = self
            .dropped
            .clone();
        NoticeSender::new(tx, status_tx, dropped)
    }
}

impl Drop for ListenerShared {
    fn drop(&mut self) {
        // Don't leave a detached engine running after the last handle is gone
        let engine = match self
            .engine
            .get_mut()
        {
            Ok(engine) => engine,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = engine.take() {
            handle
                .token
                .cancel();
        }
    }
}

/// Handle for starting and stopping the monitoring engine (Clone + Send).
///
/// The engine runs as a background task. It either maintains a PBX session
/// with automatic reconnection, or generates synthetic traffic when the PBX
/// is disabled in the configuration.
#[derive(Clone)]
pub struct CallListener {
    inner: Arc<ListenerShared>,
}

impl std::fmt::Debug for CallListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallListener")
            .field("state", &self.state())
            .finish()
    }
}

/// Notice stream paired with a [`CallListener`] (!Clone).
///
/// Notices arrive in the order the engine produced them. If the application
/// stops draining the stream, excess notices are dropped rather than blocking
/// the engine; [`CallListener::dropped_notice_count`] reports how many.
pub struct ListenerEventStream {
    rx: mpsc::Receiver<ListenerEvent>,
    status_rx: watch::Receiver<ListenerState>,
}

impl std::fmt::Debug for ListenerEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEventStream")
            .field("state", &self.state())
            .finish()
    }
}

impl CallListener {
    /// Create a listener and the stream its notices arrive on.
    ///
    /// The listener starts idle; call [`start`](Self::start) to bring the
    /// engine up.
    pub fn new() -> (CallListener, ListenerEventStream) {
        let (notice_tx, notice_rx) = mpsc::channel(MAX_NOTICE_QUEUE_SIZE);
        let (status_tx, status_rx) = watch::channel(ListenerState::Idle);
        let stream_status_rx = status_tx.subscribe();

        let listener = CallListener {
            inner: Arc::new(ListenerShared {
                engine: StdMutex::new(None),
                notice_tx,
                status_tx,
                status_rx,
                dropped: Arc::new(AtomicU64::new(0)),
            }),
        };
        let stream = ListenerEventStream {
            rx: notice_rx,
            status_rx: stream_status_rx,
        };
        (listener, stream)
    }

    /// Start the engine if it is not already running.
    ///
    /// Returns as soon as the engine task is spawned, before any connection
    /// is attempted. Calling start on a running listener does nothing. Must
    /// be called from within a Tokio runtime.
    pub fn start(&self, config: ListenerConfig) {
        let mut engine = self
            .inner
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let running = engine
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if running {
            debug!("Listener already running, ignoring start");
            return;
        }

        let token = CancellationToken::new();
        let notices = self
            .inner
            .notices();
        let task = tokio::spawn(engine_loop(token.clone(), config, notices));
        *engine = Some(EngineHandle { token, task });
    }

    /// Stop the engine and wait for it to finish.
    ///
    /// Any pending auto-clear of the status file is cancelled before this
    /// returns. Stopping an idle listener does nothing.
    pub async fn stop(&self) {
        let handle = {
            let mut engine = self
                .inner
                .engine
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            engine.take()
        };

        match handle {
            Some(handle) => {
                info!("Stopping listener");
                handle
                    .token
                    .cancel();
                let _ = handle
                    .task
                    .await;
                debug!("Listener stopped");
            }
            None => {
                debug!("Stop requested but listener is not running");
            }
        }
    }

    /// Whether the engine task is currently running.
    pub fn is_running(&self) -> bool {
        let engine = self
            .inner
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Current listener state snapshot.
    pub fn state(&self) -> ListenerState {
        self.inner
            .status_rx
            .borrow()
            .clone()
    }

    /// Number of notices dropped because the queue was full.
    pub fn dropped_notice_count(&self) -> u64 {
        self.inner
            .dropped
            .load(Ordering::Relaxed)
    }
}

impl ListenerEventStream {
    /// Receive the next notice.
    ///
    /// Returns `None` once every [`CallListener`] handle is gone and the
    /// engine has finished.
    pub async fn recv(&mut self) -> Option<ListenerEvent> {
        self.rx
            .recv()
            .await
    }

    /// Current listener state snapshot.
    pub fn state(&self) -> ListenerState {
        self.status_rx
            .borrow()
            .clone()
    }
}

impl futures_util::Stream for ListenerEventStream {
    type Item = ListenerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}

/// Engine task entry point. A panic anywhere in the engine surfaces as an
/// error state instead of a silently dead task.
async fn engine_loop(token: CancellationToken, config: ListenerConfig, notices: NoticeSender) {
    let inner = AssertUnwindSafe(engine_loop_inner(token, config, notices.clone()));
    if futures_util::FutureExt::catch_unwind(inner)
        .await
        .is_err()
    {
        error!("Engine task panicked");
        notices.set_state(ListenerState::Error("engine task panicked".to_string()));
    }
}

async fn engine_loop_inner(
    token: CancellationToken,
    config: ListenerConfig,
    notices: NoticeSender,
) {
    let publisher = StatusPublisher::new(&config.agent, notices.clone());
    let extension = config
        .agent
        .extension
        .clone();
    info!("Monitoring extension {}", extension);

    if config.demo_mode() {
        info!("PBX connection disabled or host empty, running in demo mode");
        notices.set_state(ListenerState::DemoMode);
        demo::run(token, extension, publisher.clone(), notices.clone()).await;
    } else {
        loop {
            notices.set_state(ListenerState::Connecting);
            let result = connection::run_session(
                &token,
                &config.pbx,
                &extension,
                &publisher,
                &notices,
            )
            .await;
            match result {
                Ok(()) => break,
                Err(err) => {
                    warn!("Session ended: {}", err);
                    notices.set_state(ListenerState::Error(err.to_string()));
                    notices.error(err);
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(Duration::from_secs(RETRY_DELAY_SECS)) => {}
            }
        }
    }

    publisher
        .shutdown()
        .await;
    notices.set_state(ListenerState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, PbxConfig};
    use crate::demo::synth_event;

    #[test]
    fn test_state_display() {
        assert_eq!(ListenerState::Idle.to_string(), "idle");
        assert_eq!(ListenerState::Connecting.to_string(), "connecting");
        assert_eq!(ListenerState::Connected.to_string(), "connected");
        assert_eq!(ListenerState::DemoMode.to_string(), "demo mode");
        assert_eq!(
            ListenerState::Error("no route".to_string()).to_string(),
            "error: no route"
        );
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = watch::channel(ListenerState::Idle);
        let dropped = Arc::new(AtomicU64::new(0));
        let notices = NoticeSender::new(tx, status_tx, dropped.clone());

        notices.call(synth_event("100"));
        notices.call(synth_event("100"));
        notices.call(synth_event("100"));

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        let notice = rx
            .try_recv()
            .unwrap();
        assert!(matches!(notice, ListenerEvent::Call(_)));
        assert!(rx
            .try_recv()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_demo_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = ListenerConfig {
            pbx: PbxConfig::default(),
            agent: AgentConfig {
                extension: "5000".to_string(),
                status_file: dir
                    .path()
                    .join("CaCallstatus.dat"),
                auto_clear_delay: 3,
            },
        };
        assert!(config.demo_mode());

        let (listener, mut stream) = CallListener::new();
        assert!(!listener.is_running());
        assert_eq!(listener.state(), ListenerState::Idle);

        listener.start(config.clone());
        assert!(listener.is_running());
        match stream
            .recv()
            .await
        {
            Some(ListenerEvent::StatusChanged(ListenerState::DemoMode)) => {}
            other => panic!("expected demo mode notice, got {:?}", other),
        }

        // Second start is a no-op while the engine is running
        listener.start(config);
        assert!(listener.is_running());

        listener
            .stop()
            .await;
        assert!(!listener.is_running());
        assert_eq!(listener.state(), ListenerState::Idle);

        // The idle notice is queued before stop() returns; synthetic call
        // notices may precede it
        loop {
            match stream
                .recv()
                .await
            {
                Some(ListenerEvent::StatusChanged(ListenerState::Idle)) => break,
                Some(_) => {}
                None => panic!("stream closed before the idle notice"),
            }
        }

        // Stopping again is a no-op
        listener
            .stop()
            .await;
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let (listener, _stream) = CallListener::new();
        listener
            .stop()
            .await;
        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(listener.dropped_notice_count(), 0);
    }
}
