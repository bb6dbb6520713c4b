use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use super::{BoxedSession, Entered};
use crate::error::{Error, Result};
use crate::response::ResponseSink;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Created,
    Entered,
    /// `enter` asked for an internal redirect; the session is spent.
    ///
    /// Reached straight from `Created`: a redirecting session never passes
    /// through `Entered`, and no later phase may run on it.
    Redirected,
    ResponseBegun,
    ResponseWritten,
    Done,
    /// A phase failed or was called out of order. Absorbing.
    Errored,
}

/// Drives one session through its phases, rejecting anything out of order.
///
/// A rejected call never reaches the session, so a repeated
/// `write_response` cannot put the body on the wire twice.
pub struct SessionDriver {
    session: BoxedSession,
    state: SessionState,
}

impl SessionDriver {
    pub fn new(session: BoxedSession) -> Self {
        Self { session, state: SessionState::Created }
    }

    /// Wraps a session that needs no `enter` phase, such as an error page
    /// produced by the dispatcher itself.
    pub fn entered(session: BoxedSession) -> Self {
        Self { session, state: SessionState::Entered }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check_state(&mut self, state: SessionState, violation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            self.state = SessionState::Errored;
            Err(Error::Protocol(violation))
        }
    }

    /// Runs the `enter` phase. An empty redirect target means "proceed".
    pub async fn enter(&mut self) -> Result<Entered> {
        self.check_state(SessionState::Created, "enter called twice or after responding")?;
        match self.session.enter().await {
            Ok(Entered::Redirect(target)) if !target.is_empty() => {
                self.state = SessionState::Redirected;
                Ok(Entered::Redirect(target))
            }
            Ok(_) => {
                self.state = SessionState::Entered;
                Ok(Entered::Proceed)
            }
            Err(e) => {
                self.state = SessionState::Errored;
                Err(e)
            }
        }
    }

    pub fn begin_response(&mut self, headers: &mut HeaderMap) -> Result<StatusCode> {
        self.check_state(SessionState::Entered, "begin_response called out of order")?;
        let status = self.session.begin_response(headers);
        self.state = SessionState::ResponseBegun;
        Ok(status)
    }

    pub async fn write_response(&mut self, sink: &mut dyn ResponseSink) -> Result<Option<Bytes>> {
        self.check_state(SessionState::ResponseBegun, "write_response called out of order")?;
        match self.session.write_response(sink).await {
            Ok(body) => {
                self.state = SessionState::ResponseWritten;
                Ok(body)
            }
            Err(e) => {
                self.state = SessionState::Errored;
                Err(e)
            }
        }
    }

    /// Marks the response as fully flushed.
    pub fn finish(&mut self) -> Result<()> {
        self.check_state(SessionState::ResponseWritten, "finish called before the body was written")?;
        self.state = SessionState::Done;
        Ok(())
    }
}
