use std::sync::Arc;

use shared::{domain::UserId, error::BackendError};
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub current_user: Option<UserId>,
    pub loading: bool,
    pub modal_open: bool,
}

/// Signed-in user plus the loading and modal flags, handed explicitly to
/// whatever needs them. Clones share the same state.
#[derive(Clone)]
pub struct SessionContext {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn signed_in(user_id: UserId) -> Self {
        let session = Self::new();
        session.set_user(Some(user_id));
        session
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.state.borrow().current_user
    }

    pub fn require_user(&self) -> Result<UserId, BackendError> {
        self.current_user()
            .ok_or_else(|| BackendError::Unauthorized("no user signed in".into()))
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn is_modal_open(&self) -> bool {
        self.state.borrow().modal_open
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn set_user(&self, user_id: Option<UserId>) {
        self.state.send_modify(|state| {
            state.current_user = user_id;
            state.loading = false;
        });
    }

    pub fn begin_loading(&self) {
        self.state.send_modify(|state| state.loading = true);
    }

    pub fn finish_loading(&self) {
        self.state.send_modify(|state| state.loading = false);
    }

    pub fn open_modal(&self) {
        self.state.send_modify(|state| state.modal_open = true);
    }

    pub fn close_modal(&self) {
        self.state.send_modify(|state| state.modal_open = false);
    }
}
