use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use http::StatusCode;

use super::{RouteBase, RouteEntry};
use crate::binding::BindingContext;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::instance::{Instance, SessionEnv};
use crate::method::Method;
use crate::request::RequestContext;
use crate::session::BoxedSession;

/// RESTful router: one handler per HTTP method.
///
/// ```rust
/// use switchyard::{ErrorSession, Method, MethodRouter};
/// use http::StatusCode;
///
/// # fn main() -> switchyard::Result<()> {
/// let teapot = ErrorSession::new(StatusCode::IM_A_TEAPOT, "short and stout", None).unwrap();
/// let router = MethodRouter::new()
///     .on(Method::Get, teapot.clone())?
///     .on(Method::Post, teapot)?;
/// # let _ = router;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MethodRouter {
    base: RouteBase,
    methods: HashMap<Method, RouteEntry>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`. Returns `self` for chaining.
    pub fn on(mut self, method: Method, handler: impl Handler) -> Result<Self> {
        self.insert_method(method, handler)?;
        Ok(self)
    }

    /// Registers `handler` under a method name such as `"GET"`.
    ///
    /// Names outside the recognized set are rejected.
    pub fn insert(&mut self, name: &str, handler: impl Handler) -> Result<()> {
        let method = name
            .parse()
            .map_err(|()| Error::Registration(format!("unsupported method {name}")))?;
        self.insert_method(method, handler)
    }

    fn insert_method(&mut self, method: Method, handler: impl Handler) -> Result<()> {
        self.base.check_open()?;
        match self.methods.entry(method) {
            Entry::Occupied(_) => Err(Error::Registration(format!("method {method} is already registered"))),
            Entry::Vacant(slot) => {
                let fragment = BindingContext::new().with_method(method);
                slot.insert(RouteEntry::new(fragment, handler));
                Ok(())
            }
        }
    }
}

impl Handler for MethodRouter {
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        if let Some(bound) = binding.and_then(BindingContext::method) {
            return Err(Error::Registration(format!(
                "method router cannot be mounted beneath a {bound} binding"
            )));
        }
        self.base.seal(instance, binding)?;
        let parent = self.base.binding.as_ref();
        for entry in self.methods.values_mut() {
            entry.init(instance, parent)?;
        }
        Ok(())
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        let Ok(method) = req.method().parse::<Method>() else {
            return self.base.reject(req, StatusCode::METHOD_NOT_ALLOWED, "unsupported method");
        };
        match self.methods.get(&method) {
            Some(entry) => entry.handler.begin_session(req, env),
            None => self.base.reject(req, StatusCode::METHOD_NOT_ALLOWED, "method not implemented"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::InstanceConfig;
    use crate::router::PathRouter;
    use crate::session::NotModifiedSession;

    #[derive(Clone, Default)]
    struct Bound(Arc<Mutex<Option<BindingContext>>>);

    impl Handler for Bound {
        fn init(&mut self, _instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
            *self.0.lock().unwrap() = binding.cloned();
            Ok(())
        }

        fn begin_session(&self, _req: &mut RequestContext, _env: Option<&SessionEnv>) -> Option<BoxedSession> {
            Some(Box::new(NotModifiedSession))
        }
    }

    fn instance() -> Arc<Instance> {
        Arc::new(Instance::new(InstanceConfig::default()))
    }

    fn status_for(router: &MethodRouter, method: &str) -> StatusCode {
        let mut req = RequestContext::new(method, "/").unwrap();
        router
            .begin_session(&mut req, None)
            .expect("a session")
            .begin_response(&mut http::HeaderMap::new())
    }

    #[test]
    fn dispatches_by_method_and_rejects_the_rest() {
        let mut router = MethodRouter::new()
            .on(Method::Get, Bound::default())
            .unwrap()
            .on(Method::Post, Bound::default())
            .unwrap();
        router.init(&instance(), None).unwrap();

        assert_eq!(status_for(&router, "GET"), StatusCode::NOT_MODIFIED);
        assert_eq!(status_for(&router, "POST"), StatusCode::NOT_MODIFIED);
        assert_eq!(status_for(&router, "DELETE"), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_for(&router, "BREW"), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn registration_enforces_known_and_unique_methods() {
        let mut router = MethodRouter::new();
        router.insert("GET", Bound::default()).unwrap();
        assert!(matches!(router.insert("GET", Bound::default()), Err(Error::Registration(_))));
        assert!(matches!(router.insert("TRACE", Bound::default()), Err(Error::Registration(_))));
        assert!(router.insert("get", Bound::default()).is_err());

        router.init(&instance(), None).unwrap();
        assert!(router.insert("PUT", Bound::default()).is_err());
    }

    #[test]
    fn handlers_inherit_path_and_own_method() {
        let bound = Bound::default();
        let methods = MethodRouter::new().on(Method::Put, bound.clone()).unwrap();
        let mut paths = PathRouter::new().route("/items", methods).unwrap();
        paths.init(&instance(), None).unwrap();

        let binding = bound.0.lock().unwrap().clone().unwrap();
        assert_eq!(binding.method(), Some(Method::Put));
        assert_eq!(binding.path_str(), "/items");
    }

    #[test]
    fn cannot_mount_beneath_a_method_binding() {
        let inner = MethodRouter::new().on(Method::Get, Bound::default()).unwrap();
        let mut outer = MethodRouter::new().on(Method::Get, inner).unwrap();
        assert!(matches!(outer.init(&instance(), None), Err(Error::Registration(_))));
    }
}
