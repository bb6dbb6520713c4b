//! Inherited route-tree metadata.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::method::Method;

/// Opaque payload a layer of the route tree attaches for the layers below it.
pub type Extension = Arc<dyn Any + Send + Sync>;

/// What a handler is bound to: the method and path prefix it was mounted
/// under, plus whatever extension the nearest layer attached.
///
/// Computed once, top-down, while the dispatcher initializes the route tree,
/// and never touched while serving.
#[derive(Clone, Default)]
pub struct BindingContext {
    method: Option<Method>,
    path: Vec<String>,
    extension: Option<Extension>,
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn method(&self) -> Option<Method> { self.method }
    pub fn path(&self) -> &[String] { &self.path }
    pub fn extension(&self) -> Option<&Extension> { self.extension.as_ref() }

    /// The extension, if it is a `T`.
    pub fn extension_as<T: Any>(&self) -> Option<&T> {
        self.extension.as_deref()?.downcast_ref()
    }

    /// `/a/b` for a bound path of `["a", "b"]`, `/` when unbound.
    pub fn path_str(&self) -> String {
        if self.path.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }

    /// Combines this (parent) binding with a child's own fragment.
    ///
    /// The parent's method wins when set; the child's path segments follow
    /// the parent's; the child's extension wins when set.
    pub fn inherit(&self, child: &BindingContext) -> BindingContext {
        let mut path = Vec::with_capacity(self.path.len() + child.path.len());
        path.extend_from_slice(&self.path);
        path.extend_from_slice(&child.path);
        BindingContext {
            method: self.method.or(child.method),
            path,
            extension: child.extension.clone().or_else(|| self.extension.clone()),
        }
    }

    /// The binding a child receives: its own fragment at the tree root,
    /// otherwise the fragment inherited from `parent`.
    pub fn resolve(parent: Option<&BindingContext>, child: &BindingContext) -> BindingContext {
        match parent {
            Some(parent) => parent.inherit(child),
            None => child.clone(),
        }
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("extension", &self.extension.as_ref().map(|_| ".."))
            .finish()
    }
}
