use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use swarm_core::ProgressView;
use swarm_session::{
    SessionController, SessionError, SessionSignal, SnapshotSource, TransportEvent,
    TriggerBackend,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Cancel,
    Dismiss,
    Quit,
}

pub fn action_for_key(key: KeyEvent) -> Option<Action> {
    if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('s') | KeyCode::Enter => Some(Action::Start),
        KeyCode::Char('c') => Some(Action::Cancel),
        KeyCode::Char('d') => Some(Action::Dismiss),
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        _ => None,
    }
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct Screen {
    pub view: ProgressView,
    pub endpoint: String,
    pub transport_open: bool,
    pub status_note: Option<String>,
}

pub struct App<B, S> {
    session: SessionController<B, S>,
    endpoint: String,
    status_note: Option<String>,
    quit: bool,
}

impl<B, S> App<B, S>
where
    B: TriggerBackend,
    S: SnapshotSource,
{
    pub fn new(session: SessionController<B, S>, endpoint: impl Into<String>) -> Self {
        Self {
            session,
            endpoint: endpoint.into(),
            status_note: None,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn screen(&self) -> Screen {
        Screen {
            view: self.session.view(),
            endpoint: self.endpoint.clone(),
            transport_open: self.session.transport_open(),
            status_note: self.status_note.clone(),
        }
    }

    pub async fn perform(&mut self, action: Action) {
        self.status_note = None;
        match action {
            Action::Start => match self.session.start().await {
                Ok(()) => info!(event = "batch_started"),
                Err(SessionError::AlreadyProcessing) => {
                    self.status_note =
                        Some("batch already processing; press c to cancel first".to_string());
                }
                Err(err) => warn!(event = "batch_start_failed", error = %err),
            },
            Action::Cancel => self.session.cancel(),
            Action::Dismiss => self.session.dismiss_notice(),
            Action::Quit => {
                self.session.teardown();
                self.quit = true;
            }
        }
    }

    pub fn apply_transport_event(&mut self, event: TransportEvent) {
        match self.session.handle_event(event) {
            Some(SessionSignal::Completed) => {
                self.status_note = Some("batch complete; press s to run again".to_string());
            }
            Some(SessionSignal::TransportLost) => {
                self.status_note = Some("live updates lost; press c then s to restart".to_string());
            }
            None => {}
        }
    }

    pub fn teardown(&mut self) {
        self.session.teardown();
    }
}
