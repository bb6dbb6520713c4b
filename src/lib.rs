//! # switchyard
//!
//! Request-dispatch middleware for HTTP services: hierarchical routing, an
//! explicit session protocol and a bridge for blocking, write-as-you-go
//! handlers.
//!
//! ## How a request flows
//!
//! ```text
//! hyper ──▶ Server ──▶ Dispatcher ──▶ root Handler ──▶ … ──▶ Session
//!             │            │
//!             │            ├─ enter            (may redirect internally, ≤ max_redirect hops)
//!             │            ├─ begin_response   (status + headers)
//!             │            └─ write_response   (body)
//!             └─ body collected, capped at limit_post
//! ```
//!
//! - **Handlers** form a tree. [`PathRouter`] picks a child by path segment,
//!   [`MethodRouter`] by HTTP method. Each child is initialized once with the
//!   [`BindingContext`] it inherits from the routers above it.
//! - **Sessions** are created per routing attempt. A session may answer
//!   [`Entered::Redirect`] to send the request back through the tree with a
//!   new path; segments starting with `@` are reachable only that way.
//! - **[`SyncHandler`]** runs a blocking closure that writes status, headers
//!   and body as it goes, and adapts it to the session protocol.
//!
//! Failures never escape the [`Dispatcher`]: missing sessions, protocol
//! violations, handler errors and panics all become logged `500` pages.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::io::Write;
//! use std::sync::Arc;
//!
//! use http::StatusCode;
//! use switchyard::{
//!     AliasSession, Dispatcher, FileHandler, Instance, Method, MethodRouter, PathRouter, Server,
//!     SessionFn, SyncHandler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> switchyard::Result<()> {
//!     let users = MethodRouter::new()
//!         .on(Method::Get, SyncHandler::new(|w, req| {
//!             w.write_status(StatusCode::OK);
//!             write!(w, "user {}", req.rel_path_str())
//!         }))?
//!         .on(Method::Post, SyncHandler::new(|w, _req| {
//!             w.write_status(StatusCode::CREATED);
//!             Ok(())
//!         }))?;
//!
//!     let app = PathRouter::new()
//!         .route("/users", users)?
//!         .route("/home", SessionFn::new(|_i, _r, _e| Some(Box::new(AliasSession::new("/static")))))?
//!         .route("/static", FileHandler::new("public"))?;
//!
//!     let instance = Arc::new(Instance::open(".")?);
//!     let server = Server::from_instance(&instance)?;
//!     server.serve(Dispatcher::new(instance, app)?).await
//! }
//! ```

mod binding;
mod bridge;
mod config;
mod dispatcher;
mod error;
mod files;
mod handler;
mod instance;
mod log;
mod method;
mod request;
mod response;
mod router;
mod server;
mod session;

pub mod status;

pub use binding::{BindingContext, Extension};
pub use bridge::{BridgeSession, BridgeWriter, PushFn, ResponseWriter, SyncHandler};
pub use config::{DEFAULT_CONFIG_FILE, InstanceConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use files::FileHandler;
pub use handler::{BoxedHandler, Handler, SessionFn};
pub use instance::{Environment, Instance, SessionEnv};
pub use log::{ERROR_LOG, Level, LogConfig, LogSink, Logs, TracingSink};
pub use method::Method;
pub use request::{CONTENT_READ_HARD_LIMIT, Cookie, RequestContext, split_path};
pub use response::{ContentType, Response, ResponseSink};
pub use router::{MethodRouter, PRIVATE_MARKER, PathRouter};
pub use server::Server;
pub use session::{
    AliasSession, BoxFuture, BoxedSession, Entered, ErrorSession, NotModifiedSession, RedirectSession,
    Session, SessionDriver, SessionState,
};
pub use status::RedirectCode;
