//! Route resolvers.
//!
//! Two routers, both of them [`Handler`]s, so they nest freely:
//!
//! - [`PathRouter`]: a trie keyed by path segment. The handler found at a
//!   segment owns everything below it.
//! - [`MethodRouter`]: a table keyed by HTTP method.
//!
//! Routes are registered on a single thread before the dispatcher is built.
//! [`Dispatcher::new`](crate::Dispatcher::new) initializes the tree, which
//! seals every router: registering afterwards fails, and the tree is only
//! ever read while serving.

mod method;
mod path;

use std::sync::Arc;

use http::StatusCode;

use crate::binding::BindingContext;
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler};
use crate::instance::Instance;
use crate::log::{ERROR_LOG, Level, LogSink};
use crate::request::RequestContext;
use crate::session::{BoxedSession, reject};

pub use method::MethodRouter;
pub use path::{PRIVATE_MARKER, PathRouter};

/// A registered handler together with the binding fragment it was
/// registered with (its own path segments or method).
pub(crate) struct RouteEntry {
    pub(crate) fragment: BindingContext,
    pub(crate) handler: BoxedHandler,
}

impl RouteEntry {
    pub(crate) fn new(fragment: BindingContext, handler: impl Handler) -> Self {
        Self { fragment, handler: Box::new(handler) }
    }

    /// Passes the inherited binding down to the handler.
    fn init(&mut self, instance: &Arc<Instance>, parent: Option<&BindingContext>) -> Result<()> {
        let binding = BindingContext::resolve(parent, &self.fragment);
        self.handler.init(instance, Some(&binding))
    }
}

/// State every router carries: what it learned during initialization.
#[derive(Default)]
pub(crate) struct RouteBase {
    binding: Option<BindingContext>,
    log: Option<Arc<dyn LogSink>>,
    debug: bool,
    sealed: bool,
}

impl RouteBase {
    fn check_open(&self) -> Result<()> {
        if self.sealed {
            return Err(Error::Registration(
                "router is already initialized; routes can no longer be registered".into(),
            ));
        }
        Ok(())
    }

    fn seal(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        if self.sealed {
            return Err(Error::Registration("router initialized twice".into()));
        }
        self.binding = binding.cloned();
        self.log = Some(instance.log(ERROR_LOG)?);
        self.debug = instance.is_debug();
        self.sealed = true;
        Ok(())
    }

    fn binding(&self) -> Option<&BindingContext> {
        self.binding.as_ref()
    }

    fn reject(&self, req: &RequestContext, status: StatusCode, message: &str) -> Option<BoxedSession> {
        reject(self.debug, req, status, message)
    }

    fn log(&self, level: Level, message: &str) {
        if let Some(log) = &self.log {
            log.send(level, message);
        }
    }
}
