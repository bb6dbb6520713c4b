//! Handler trait and type erasure.
//!
//! # How handlers form a tree
//!
//! A [`Handler`] turns a request into a [`Session`](crate::Session). Routers
//! are handlers too, so a route tree is just handlers owning handlers:
//!
//! ```text
//! PathRouter                       ← top-level handler given to the Dispatcher
//!   ├─ "api" → MethodRouter        ← nested router, bound to /api
//!   │            ├─ GET  → SessionFn
//!   │            └─ POST → SyncHandler
//!   └─ (fallback) → FileHandler
//! ```
//!
//! The tree is initialized once, top-down, through [`Handler::init`], then
//! frozen behind an `Arc` and shared by every concurrent request. During
//! dispatch only `&self` methods run, so no locking is needed.

use std::sync::Arc;

use crate::binding::BindingContext;
use crate::error::{Error, Result};
use crate::instance::{Instance, SessionEnv};
use crate::request::RequestContext;
use crate::session::BoxedSession;

/// A heap-allocated, type-erased handler.
pub type BoxedHandler = Box<dyn Handler>;

/// Unit of application logic that produces a session per routing attempt.
pub trait Handler: Send + Sync + 'static {
    /// Called exactly once before serving begins.
    ///
    /// `binding` is `None` for the top-level handler; nested handlers receive
    /// the binding inherited from every router above them.
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        let _ = (instance, binding);
        Ok(())
    }

    /// Produces a fresh session for this routing attempt.
    ///
    /// Returning `None` is a defect the dispatcher reports as a 500.
    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession>;
}

impl Handler for BoxedHandler {
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        (**self).init(instance, binding)
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        (**self).begin_session(req, env)
    }
}

// ── SessionFn ─────────────────────────────────────────────────────────────────

/// A handler backed by a session factory closure.
///
/// ```rust
/// use switchyard::{SessionFn, AliasSession, NotModifiedSession, BoxedSession};
///
/// let handler = SessionFn::new(|_instance, req, _env| {
///     let session: BoxedSession = if req.header("if-none-match").is_some() {
///         Box::new(NotModifiedSession)
///     } else {
///         Box::new(AliasSession::new("/@render/home"))
///     };
///     Some(session)
/// });
/// # let _ = handler;
/// ```
pub struct SessionFn<F> {
    factory: F,
    instance: Option<Arc<Instance>>,
}

impl<F> SessionFn<F>
where
    F: Fn(&Arc<Instance>, &mut RequestContext, Option<&SessionEnv>) -> Option<BoxedSession>
        + Send
        + Sync
        + 'static,
{
    pub fn new(factory: F) -> Self {
        Self { factory, instance: None }
    }
}

impl<F> Handler for SessionFn<F>
where
    F: Fn(&Arc<Instance>, &mut RequestContext, Option<&SessionEnv>) -> Option<BoxedSession>
        + Send
        + Sync
        + 'static,
{
    fn init(&mut self, instance: &Arc<Instance>, _binding: Option<&BindingContext>) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::Registration("handler initialized twice".into()));
        }
        self.instance = Some(Arc::clone(instance));
        Ok(())
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        // An uninitialized handler has no instance to give the factory.
        let instance = self.instance.as_ref()?;
        (self.factory)(instance, req, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::session::NotModifiedSession;

    fn factory() -> SessionFn<impl Fn(&Arc<Instance>, &mut RequestContext, Option<&SessionEnv>) -> Option<BoxedSession> + Send + Sync + 'static> {
        SessionFn::new(|_, _, _| Some(Box::new(NotModifiedSession) as BoxedSession))
    }

    #[test]
    fn session_fn_needs_initialization() {
        let mut handler = factory();
        let mut req = RequestContext::new("GET", "/").unwrap();
        assert!(handler.begin_session(&mut req, None).is_none());

        let instance = Arc::new(Instance::new(InstanceConfig::default()));
        handler.init(&instance, None).unwrap();
        assert!(handler.begin_session(&mut req, None).is_some());
    }

    #[test]
    fn session_fn_rejects_a_second_init() {
        let mut handler = factory();
        let instance = Arc::new(Instance::new(InstanceConfig::default()));
        handler.init(&instance, None).unwrap();
        assert!(matches!(handler.init(&instance, None), Err(Error::Registration(_))));
    }
}
