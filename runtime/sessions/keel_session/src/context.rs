use crate::SessionId;
use crate::store::SessionRecord;
use serde_json::Value;
use std::collections::HashMap;

/// The session attached to the request currently being processed.
///
/// Built by [`SessionMiddleware::on_request`] and consumed by
/// [`SessionMiddleware::on_response`] or [`SessionMiddleware::finalize`].
///
/// [`SessionMiddleware::on_request`]: crate::SessionMiddleware::on_request
/// [`SessionMiddleware::on_response`]: crate::SessionMiddleware::on_response
/// [`SessionMiddleware::finalize`]: crate::SessionMiddleware::finalize
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub(crate) state: ContextState,
}

#[derive(Debug, Clone)]
pub(crate) enum ContextState {
    /// The request didn't carry a valid session: a new one will be created
    /// when the response goes out.
    Anonymous {
        initial_state: HashMap<String, Value>,
    },
    /// The request carried a valid cookie pointing at an existing record.
    Active { id: SessionId, record: SessionRecord },
    /// The session was deleted while processing the request.
    Ended { id: SessionId },
}

impl SessionContext {
    pub(crate) fn anonymous() -> Self {
        Self {
            state: ContextState::Anonymous {
                initial_state: HashMap::new(),
            },
        }
    }

    pub(crate) fn active(id: SessionId, record: SessionRecord) -> Self {
        Self {
            state: ContextState::Active { id, record },
        }
    }

    /// `true` if the request carried a valid session cookie pointing at a live record.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ContextState::Active { .. })
    }

    /// The ID of the active session, if there is one.
    pub fn id(&self) -> Option<SessionId> {
        match &self.state {
            ContextState::Active { id, .. } => Some(*id),
            ContextState::Anonymous { .. } | ContextState::Ended { .. } => None,
        }
    }

    /// The ID of the session ended via [`SessionMiddleware::end_session`][crate::SessionMiddleware::end_session]
    /// while processing this request.
    pub fn ended_id(&self) -> Option<SessionId> {
        match &self.state {
            ContextState::Ended { id } => Some(*id),
            ContextState::Anonymous { .. } | ContextState::Active { .. } => None,
        }
    }

    /// The server-side record of the active session, as it was when the request came in.
    ///
    /// Changes must be persisted explicitly via [`SessionStore::update`][crate::SessionStore::update].
    pub fn record(&self) -> Option<&SessionRecord> {
        match &self.state {
            ContextState::Active { record, .. } => Some(record),
            ContextState::Anonymous { .. } | ContextState::Ended { .. } => None,
        }
    }

    /// The state the new session will be created with, for requests without a session.
    ///
    /// Returns `None` if the request already has a session (or had one that was ended).
    pub fn initial_state_mut(&mut self) -> Option<&mut HashMap<String, Value>> {
        match &mut self.state {
            ContextState::Anonymous { initial_state } => Some(initial_state),
            ContextState::Active { .. } | ContextState::Ended { .. } => None,
        }
    }

    pub(crate) fn end(&mut self) -> Option<SessionId> {
        let id = self.id()?;
        self.state = ContextState::Ended { id };
        Some(id)
    }
}
