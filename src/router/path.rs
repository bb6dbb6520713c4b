use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::sync::Arc;

use http::StatusCode;

use super::{RouteBase, RouteEntry};
use crate::binding::{BindingContext, Extension};
use crate::bridge::{ResponseWriter, SyncHandler};
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler};
use crate::instance::{Instance, SessionEnv};
use crate::log::Level;
use crate::request::{RequestContext, split_path};
use crate::session::BoxedSession;

/// Segments starting with this character are private: reachable only through
/// an internal redirect, never straight from a client request.
pub const PRIVATE_MARKER: char = '@';

enum Node {
    Subtree(HashMap<String, Node>),
    Leaf(RouteEntry),
}

/// Result of walking the trie.
struct Found<'a> {
    entry: &'a RouteEntry,
    touched_private: bool,
}

/// Hierarchical router keyed by path segment.
///
/// ```rust
/// use switchyard::{ErrorSession, PathRouter};
/// use http::StatusCode;
///
/// # fn main() -> switchyard::Result<()> {
/// let gone = ErrorSession::new(StatusCode::GONE, "retired", None).unwrap();
/// let router = PathRouter::new()
///     .route("/v1/legacy", gone.clone())?
///     .route("/@internal/report", gone)?;
/// # let _ = router;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct PathRouter {
    base: RouteBase,
    root: HashMap<String, Node>,
    fallback: Option<BoxedHandler>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `pattern` (`/`-separated). Returns `self` for
    /// chaining. `"/"` or `""` sets the fallback handler.
    pub fn route(mut self, pattern: &str, handler: impl Handler) -> Result<Self> {
        self.insert(&split_path(pattern), handler)?;
        Ok(self)
    }

    /// Registers a push-style function at `pattern`, run through the
    /// synchronous handler bridge.
    pub fn route_fn<F>(self, pattern: &str, func: F) -> Result<Self>
    where
        F: Fn(&mut dyn ResponseWriter, &RequestContext) -> io::Result<()> + Send + Sync + 'static,
    {
        self.route(pattern, SyncHandler::new(func))
    }

    /// Registers `handler` at `pattern`, attaching `extension` to its binding.
    pub fn route_with(mut self, pattern: &str, extension: Extension, handler: impl Handler) -> Result<Self> {
        let path = split_path(pattern);
        if path.is_empty() {
            return Err(Error::Registration("an extension needs a non-root path".into()));
        }
        let fragment = BindingContext::new().with_path(path.clone()).with_extension(extension);
        self.insert_entry(&path, RouteEntry::new(fragment, handler))?;
        Ok(self)
    }

    /// Sets the handler used when no registered path matches. Set-once.
    pub fn fallback(mut self, handler: impl Handler) -> Result<Self> {
        self.set_fallback(Box::new(handler))?;
        Ok(self)
    }

    /// Registers `handler` at `path`. An empty path sets the fallback.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], handler: impl Handler) -> Result<()> {
        let path: Vec<String> = path.iter().map(|s| s.as_ref().to_owned()).collect();
        if path.is_empty() {
            return self.set_fallback(Box::new(handler));
        }
        let fragment = BindingContext::new().with_path(path.clone());
        self.insert_entry(&path, RouteEntry::new(fragment, handler))
    }

    fn set_fallback(&mut self, handler: BoxedHandler) -> Result<()> {
        self.base.check_open()?;
        if self.fallback.is_some() {
            return Err(Error::Registration("fallback handler is already set".into()));
        }
        self.fallback = Some(handler);
        Ok(())
    }

    fn insert_entry(&mut self, path: &[String], entry: RouteEntry) -> Result<()> {
        self.base.check_open()?;
        if let Some(bad) = path.iter().find(|s| s.is_empty() || s.contains('/')) {
            return Err(Error::Registration(format!("invalid path segment `{bad}`")));
        }
        let occupied = || Error::Registration(format!("path /{} is already registered", path.join("/")));

        let Some((last, parents)) = path.split_last() else {
            return Err(Error::Registration("empty route path".into()));
        };
        let mut level = &mut self.root;
        for segment in parents {
            let node = level
                .entry(segment.clone())
                .or_insert_with(|| Node::Subtree(HashMap::new()));
            level = match node {
                Node::Subtree(next) => next,
                Node::Leaf(_) => return Err(occupied()),
            };
        }
        match level.entry(last.clone()) {
            Entry::Occupied(_) => Err(occupied()),
            Entry::Vacant(slot) => {
                slot.insert(Node::Leaf(entry));
                Ok(())
            }
        }
    }

    /// Walks the trie along `path`. Stops at the first leaf; a missing
    /// segment or running out of segments inside a subtree is a miss.
    fn find(&self, path: &[String]) -> Option<Found<'_>> {
        let mut level = &self.root;
        let mut touched_private = false;
        for segment in path {
            if segment.starts_with(PRIVATE_MARKER) {
                touched_private = true;
            }
            match level.get(segment)? {
                Node::Subtree(next) => level = next,
                Node::Leaf(entry) => return Some(Found { entry, touched_private }),
            }
        }
        None
    }
}

fn init_level(
    level: &mut HashMap<String, Node>,
    instance: &Arc<Instance>,
    parent: Option<&BindingContext>,
) -> Result<()> {
    for node in level.values_mut() {
        match node {
            Node::Subtree(next) => init_level(next, instance, parent)?,
            Node::Leaf(entry) => entry.init(instance, parent)?,
        }
    }
    Ok(())
}

impl Handler for PathRouter {
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        self.base.seal(instance, binding)?;
        if let Some(fallback) = &mut self.fallback {
            fallback.init(instance, binding)?;
        }
        init_level(&mut self.root, instance, self.base.binding())
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        let Some(found) = self.find(req.rel_path()) else {
            return match &self.fallback {
                Some(fallback) => fallback.begin_session(req, env),
                None => self.base.reject(req, StatusCode::NOT_FOUND, "no route for this path"),
            };
        };
        if found.touched_private && !req.is_redirected() {
            return self.base.reject(req, StatusCode::FORBIDDEN, "this location is unavailable");
        }
        if let Err(e) = req.trim_path(found.entry.fragment.path()) {
            self.base.log(Level::Error, &format!("route desynchronized - {e}"));
            return self.base.reject(req, StatusCode::INTERNAL_SERVER_ERROR, "an error occured");
        }
        found.entry.handler.begin_session(req, env)
    }
}
