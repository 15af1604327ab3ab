use crate::backend::{TriggerBackend, TriggerError};
use crate::transport::{SnapshotSource, Transport, TransportError, TransportEvent};
use std::sync::Arc;
use swarm_core::{
    AggregateSnapshot, Notice, NoticeKind, ProcessState, ProgressView, Reconciled, Reconciler,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a batch is already processing")]
    AlreadyProcessing,
    #[error("push channel generation {generation} is still open")]
    TransportAlreadyOpen { generation: u64 },
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Which step of starting a batch produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            SessionError::Trigger(err) => err
                .endpoint()
                .map(|endpoint| endpoint.as_str())
                .unwrap_or("client"),
            SessionError::Transport(_) | SessionError::TransportAlreadyOpen { .. } => {
                "push_channel"
            }
            SessionError::AlreadyProcessing => "session",
        }
    }
}

/// Transitions reported back to the event loop after handling a transport
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Completed,
    TransportLost,
}

pub fn event_channel() -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

/// Owns the process lifecycle for one monitor session.
///
/// All methods run on the task that owns the controller; transport readers
/// only forward events through the channel handed to [`SessionController::new`].
pub struct SessionController<B, S> {
    backend: B,
    source: S,
    reconciler: Reconciler,
    state: ProcessState,
    transport: Option<Transport>,
    generation: u64,
    notice: Option<Notice>,
    events: mpsc::Sender<TransportEvent>,
}

impl<B, S> SessionController<B, S>
where
    B: TriggerBackend,
    S: SnapshotSource,
{
    pub fn new(backend: B, source: S, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            backend,
            source,
            reconciler: Reconciler::new(),
            state: ProcessState::Idle,
            transport: None,
            generation: 0,
            notice: None,
            events,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn transport_open(&self) -> bool {
        self.transport
            .as_ref()
            .map(Transport::is_open)
            .unwrap_or(false)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregateSnapshot>> {
        self.reconciler.subscribe()
    }

    pub fn view(&self) -> ProgressView {
        ProgressView::project(
            self.reconciler.snapshot(),
            self.state,
            self.notice.as_ref(),
        )
    }

    /// Begins a new batch: reset, then start, then open the push channel.
    ///
    /// Rejected while a batch is processing. Any failure rolls back to idle
    /// with no channel left open and raises a notice for the operator.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !self.state.accepts_start() {
            warn!(event = "start_rejected", state = %self.state);
            return Err(SessionError::AlreadyProcessing);
        }
        if let Some(transport) = self.transport.as_ref().filter(|t| t.is_open()) {
            return Err(SessionError::TransportAlreadyOpen {
                generation: transport.generation(),
            });
        }
        self.close_transport();

        match self.begin_batch().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.notice = None;
                self.set_state(ProcessState::Processing);
                Ok(())
            }
            Err(err) => {
                error!(event = "start_failed", stage = err.stage(), error = %err);
                self.close_transport();
                self.notice = Some(Notice::new(
                    NoticeKind::TriggerFailed,
                    format!("start failed at {}: {err}", err.stage()),
                ));
                self.set_state(ProcessState::Idle);
                Err(err)
            }
        }
    }

    async fn begin_batch(&mut self) -> Result<Transport, SessionError> {
        self.backend.reset().await?;
        self.backend.start().await?;
        self.reconciler.clear();
        self.generation += 1;
        let transport = Transport::open(&self.source, self.generation, self.events.clone()).await?;
        Ok(transport)
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Option<SessionSignal> {
        let open_generation = self
            .transport
            .as_ref()
            .filter(|transport| transport.is_open())
            .map(Transport::generation);
        if open_generation != Some(event.generation()) {
            debug!(
                event = "transport_event_ignored",
                generation = event.generation(),
                open_generation = ?open_generation
            );
            return None;
        }

        match event {
            TransportEvent::Snapshot { snapshot, .. } => match self.reconciler.reconcile(snapshot) {
                Reconciled::Done => {
                    self.close_transport();
                    self.set_state(ProcessState::Completed);
                    Some(SessionSignal::Completed)
                }
                Reconciled::Updated | Reconciled::Stale => None,
            },
            TransportEvent::Failed { error, .. } => {
                self.transport_lost(format!("push channel failed: {error}"));
                Some(SessionSignal::TransportLost)
            }
            TransportEvent::Closed { .. } => {
                self.transport_lost("push channel closed by backend".to_string());
                Some(SessionSignal::TransportLost)
            }
        }
    }

    /// Operator cancel. A processing batch returns to idle; the last snapshot
    /// stays visible. The backend is not told to stop.
    pub fn cancel(&mut self) {
        self.close_transport();
        if self.state == ProcessState::Processing {
            self.set_state(ProcessState::Idle);
            self.notice = Some(Notice::new(
                NoticeKind::Info,
                "monitoring cancelled; the backend batch may still be running",
            ));
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub fn teardown(&mut self) {
        self.close_transport();
        info!(event = "session_teardown", state = %self.state);
    }

    fn transport_lost(&mut self, message: String) {
        warn!(event = "transport_lost", state = %self.state, message = %message);
        self.close_transport();
        self.notice = Some(Notice::new(NoticeKind::TransportFailed, message));
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    fn set_state(&mut self, next: ProcessState) {
        if self.state != next {
            info!(event = "process_state", from = %self.state, to = %next);
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameStream;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;
    use swarm_core::encode_snapshot;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<&'static str>>,
        fail_reset: bool,
        fail_start: bool,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn record(&self, call: &'static str) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    #[async_trait]
    impl TriggerBackend for FakeBackend {
        async fn reset(&self) -> Result<(), TriggerError> {
            self.record("reset");
            if self.fail_reset {
                return Err(TriggerError::Status {
                    endpoint: crate::backend::Endpoint::Reset,
                    status: 500,
                });
            }
            Ok(())
        }

        async fn start(&self) -> Result<(), TriggerError> {
            self.record("start");
            if self.fail_start {
                return Err(TriggerError::Status {
                    endpoint: crate::backend::Endpoint::Start,
                    status: 503,
                });
            }
            Ok(())
        }
    }

    /// Connects to a channel that stays open and never yields; tests inject
    /// events directly through `handle_event`.
    #[derive(Default)]
    struct IdleSource {
        refuse: bool,
        connects: Mutex<u32>,
    }

    #[async_trait]
    impl SnapshotSource for IdleSource {
        async fn connect(&self) -> Result<FrameStream, TransportError> {
            if let Ok(mut connects) = self.connects.lock() {
                *connects += 1;
            }
            if self.refuse {
                return Err(TransportError::Connect("refused".to_string()));
            }
            Ok(Box::pin(stream::pending()))
        }
    }

    fn controller(
        backend: FakeBackend,
        source: IdleSource,
    ) -> (
        SessionController<FakeBackend, IdleSource>,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (tx, rx) = event_channel();
        (SessionController::new(backend, source, tx), rx)
    }

    fn snapshot_event(generation: u64, total: u32, completed: u32, failed: u32) -> TransportEvent {
        TransportEvent::Snapshot {
            generation,
            snapshot: AggregateSnapshot::from_counts(total, completed, failed),
        }
    }

    #[tokio::test]
    async fn start_resets_before_starting_and_opens_channel() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());

        session.start().await.unwrap();

        assert_eq!(session.backend.calls(), vec!["reset", "start"]);
        assert_eq!(session.state(), ProcessState::Processing);
        assert!(session.transport_open());
        assert!(session.notice().is_none());
    }

    #[tokio::test]
    async fn start_is_rejected_while_processing() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();

        let err = session.start().await.unwrap_err();

        assert!(matches!(err, SessionError::AlreadyProcessing));
        assert_eq!(session.backend.calls(), vec!["reset", "start"]);
        assert_eq!(session.state(), ProcessState::Processing);
        assert!(session.transport_open());
    }

    #[tokio::test]
    async fn start_failure_rolls_back_to_idle() {
        let backend = FakeBackend {
            fail_start: true,
            ..FakeBackend::default()
        };
        let (mut session, _rx) = controller(backend, IdleSource::default());

        let err = session.start().await.unwrap_err();

        assert!(matches!(err, SessionError::Trigger(TriggerError::Status { status: 503, .. })));
        assert_eq!(err.stage(), "start");
        assert_eq!(session.state(), ProcessState::Idle);
        assert!(!session.transport_open());
        assert_eq!(*session.source.connects.lock().unwrap(), 0);
        let notice = session.notice().unwrap();
        assert_eq!(notice.kind, NoticeKind::TriggerFailed);
        assert!(notice.message.starts_with("start failed at start:"));
        assert!(notice.message.contains("503"));
    }

    #[tokio::test]
    async fn reset_failure_never_issues_start() {
        let backend = FakeBackend {
            fail_reset: true,
            ..FakeBackend::default()
        };
        let (mut session, _rx) = controller(backend, IdleSource::default());

        assert!(session.start().await.is_err());

        assert_eq!(session.backend.calls(), vec!["reset"]);
        assert_eq!(session.state(), ProcessState::Idle);
        assert!(!session.transport_open());
    }

    #[tokio::test]
    async fn channel_connect_failure_rolls_back_to_idle() {
        let source = IdleSource {
            refuse: true,
            ..IdleSource::default()
        };
        let (mut session, _rx) = controller(FakeBackend::default(), source);

        let err = session.start().await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(TransportError::Connect(_))));
        assert_eq!(err.stage(), "push_channel");
        assert_eq!(session.state(), ProcessState::Idle);
        assert!(!session.transport_open());
        assert!(session.notice().is_some());
    }

    #[tokio::test]
    async fn done_snapshot_completes_once_and_closes_channel() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();

        assert_eq!(session.handle_event(snapshot_event(1, 10, 0, 0)), None);
        assert_eq!(session.state(), ProcessState::Processing);

        assert_eq!(
            session.handle_event(snapshot_event(1, 10, 7, 3)),
            Some(SessionSignal::Completed)
        );
        assert_eq!(session.state(), ProcessState::Completed);
        assert!(!session.transport_open());
        assert_eq!(session.view().pending, 0);

        // A duplicate arriving after completion belongs to a closed channel.
        assert_eq!(session.handle_event(snapshot_event(1, 10, 7, 3)), None);
        assert_eq!(session.state(), ProcessState::Completed);
    }

    #[tokio::test]
    async fn restart_from_completed_clears_view_and_ignores_old_generation() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();
        session.handle_event(snapshot_event(1, 2, 2, 0));
        assert_eq!(session.state(), ProcessState::Completed);

        session.start().await.unwrap();
        assert_eq!(session.state(), ProcessState::Processing);
        assert_eq!(session.view().total, 0);

        assert_eq!(session.handle_event(snapshot_event(1, 2, 1, 0)), None);
        assert_eq!(session.view().total, 0);

        session.handle_event(snapshot_event(2, 5, 1, 0));
        assert_eq!(session.view().total, 5);
    }

    #[tokio::test]
    async fn transport_failure_keeps_state_and_last_snapshot() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();
        session.handle_event(snapshot_event(1, 10, 4, 1));

        let signal = session.handle_event(TransportEvent::Failed {
            generation: 1,
            error: TransportError::Receive("connection reset".to_string()),
        });

        assert_eq!(signal, Some(SessionSignal::TransportLost));
        assert_eq!(session.state(), ProcessState::Processing);
        assert!(!session.transport_open());
        assert_eq!(session.view().completed, 4);
        assert_eq!(
            session.notice().map(|notice| notice.kind),
            Some(NoticeKind::TransportFailed)
        );

        // Events from the failed channel no longer reach the reconciler.
        assert_eq!(session.handle_event(snapshot_event(1, 10, 9, 1)), None);
        assert_eq!(session.view().completed, 4);
    }

    #[tokio::test]
    async fn unexpected_close_is_reported_as_transport_loss() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();

        let signal = session.handle_event(TransportEvent::Closed { generation: 1 });

        assert_eq!(signal, Some(SessionSignal::TransportLost));
        assert!(!session.transport_open());
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_and_allows_restart() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.start().await.unwrap();
        session.handle_event(snapshot_event(1, 3, 1, 0));

        session.cancel();
        session.cancel();

        assert_eq!(session.state(), ProcessState::Idle);
        assert!(!session.transport_open());
        assert_eq!(session.view().completed, 1);
        assert_eq!(
            session.notice().map(|notice| notice.kind),
            Some(NoticeKind::Info)
        );

        session.start().await.unwrap();
        assert_eq!(session.state(), ProcessState::Processing);
        assert_eq!(*session.source.connects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn teardown_closes_channel_in_any_state() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        session.teardown();
        assert!(!session.transport_open());

        session.start().await.unwrap();
        session.teardown();
        session.teardown();
        assert!(!session.transport_open());
    }

    #[tokio::test]
    async fn dismiss_clears_notice() {
        let backend = FakeBackend {
            fail_start: true,
            ..FakeBackend::default()
        };
        let (mut session, _rx) = controller(backend, IdleSource::default());
        let _ = session.start().await;
        assert!(session.notice().is_some());

        session.dismiss_notice();
        assert!(session.view().notice.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_reconciled_snapshots() {
        let (mut session, _rx) = controller(FakeBackend::default(), IdleSource::default());
        let mut updates = session.subscribe();
        session.start().await.unwrap();

        session.handle_event(TransportEvent::Snapshot {
            generation: 1,
            snapshot: swarm_core::decode_snapshot(
                &encode_snapshot(&AggregateSnapshot::from_counts(6, 2, 1)).unwrap(),
            )
            .unwrap(),
        });

        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().settled(), 3);
    }
}
