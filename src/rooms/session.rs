use std::mem;

use tracing::{debug, error, info};

use crate::{
    AppState,
    history::DEFAULT_PAGE_SIZE,
    models::{ClientFrame, Content, Identity, NewMessage, ServerEvent},
    registry::Connection,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for the frame that names the user.
    Init,
    Active(Identity),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Transport-free half of a live connection: turns inbound frames into
/// registry, store and router calls. The socket loop in `ws` feeds it.
pub struct ConnectionSession {
    room: String,
    connection: Connection,
    state: SessionState,
    app: AppState,
}

impl ConnectionSession {
    pub fn new(room: String, connection: Connection, app: AppState) -> Self {
        Self {
            room,
            connection,
            state: SessionState::Init,
            app,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    pub async fn on_frame(&mut self, raw: &[u8]) -> Flow {
        let identity = match &self.state {
            SessionState::Init => None,
            SessionState::Active(identity) => Some(identity.clone()),
            SessionState::Closed => return Flow::Close,
        };

        let frame: ClientFrame = match serde_json::from_slice(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(room = %self.room, error = %err, "discarding malformed frame");
                return self.flow();
            }
        };

        match identity {
            None => self.join(frame).await,
            Some(identity) => self.post(&identity, frame).await,
        }
    }

    /// Leaves the registry (unless already superseded) and closes the connection.
    pub fn close(&mut self) {
        if let SessionState::Active(identity) = mem::replace(&mut self.state, SessionState::Closed) {
            self.app
                .registry
                .release(&self.room, identity.as_str(), self.connection.id());
            info!(room = %self.room, username = %identity, connection = %self.connection.id(), "session closed");
        }
        self.connection.close();
    }

    async fn join(&mut self, frame: ClientFrame) -> Flow {
        let identity = Identity::derive(frame.username.as_deref());

        // History is queued before the registry can route anything here, so it
        // is always the first event. Messages stored between that read and
        // admission are replayed by `catch_up`; one racing a live broadcast may
        // arrive twice, and clients dedupe by id.
        let page = match self.app.history.page(&self.room, DEFAULT_PAGE_SIZE, None).await {
            Ok(page) => page,
            Err(err) => {
                error!(room = %self.room, error = %err, "failed to load history");
                return Flow::Close;
            }
        };
        let seen = page.items.last().map(|item| item.id);
        if self.reply(&identity, &ServerEvent::History { items: page.items }).await == Flow::Close {
            return Flow::Close;
        }

        self.app
            .registry
            .connect(&self.room, identity.clone(), self.connection.clone());
        self.state = SessionState::Active(identity.clone());
        info!(room = %self.room, username = %identity, connection = %self.connection.id(), "session joined");

        if self.catch_up(&identity, seen).await == Flow::Close {
            return Flow::Close;
        }

        // clients that repeat `username` on every frame may put content in the first one
        if frame.content.is_some() {
            return self.post(&identity, frame).await;
        }
        Flow::Continue
    }

    async fn catch_up(&self, identity: &Identity, seen: Option<i64>) -> Flow {
        let page = match self.app.history.page(&self.room, DEFAULT_PAGE_SIZE, None).await {
            Ok(page) => page,
            Err(err) => {
                error!(room = %self.room, error = %err, "failed to load history");
                return Flow::Close;
            }
        };

        let missed = page
            .items
            .into_iter()
            .filter(|item| seen.is_none_or(|seen| item.id > seen));
        for item in missed {
            debug!(room = %self.room, username = %identity, id = item.id, "replaying message stored during join");
            if self.reply(identity, &ServerEvent::Message { item }).await == Flow::Close {
                return Flow::Close;
            }
        }
        Flow::Continue
    }

    async fn post(&self, identity: &Identity, frame: ClientFrame) -> Flow {
        let content = match frame.content.as_deref().map(Content::parse) {
            Some(Ok(content)) => content,
            Some(Err(err)) => {
                debug!(room = %self.room, username = %identity, error = %err, "discarding invalid frame");
                return Flow::Continue;
            }
            None => return Flow::Continue,
        };

        let message = match self
            .app
            .store
            .insert(NewMessage::new(&self.room, identity, content))
            .await
        {
            Ok(message) => message,
            Err(err) => {
                error!(room = %self.room, username = %identity, error = %err, "failed to persist message");
                return Flow::Close;
            }
        };

        let recipient = frame.to.as_deref().map(str::trim).filter(|to| !to.is_empty());
        let Some(to) = recipient else {
            self.app
                .router
                .broadcast(&self.room, &ServerEvent::Message { item: message })
                .await;
            return self.flow();
        };

        let event = ServerEvent::Private {
            from: message.username,
            content: message.content,
            created_at: message.created_at,
        };
        if self.app.router.deliver_private(&self.room, to, &event).await {
            return self.flow();
        }

        let notice = ServerEvent::Error {
            msg: format!("{to} is not online"),
        };
        self.reply(identity, &notice).await
    }

    async fn reply(&self, identity: &Identity, event: &ServerEvent) -> Flow {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(err) => {
                error!(room = %self.room, error = %err, "failed to encode event");
                return self.flow();
            }
        };

        match self
            .app
            .router
            .send(&self.room, identity.as_str(), &self.connection, frame)
            .await
        {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }

    // the router may have evicted our own connection during a fan-out
    fn flow(&self) -> Flow {
        if self.connection.is_closed() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }
}
