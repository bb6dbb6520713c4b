//! Minimal switchyard example: a REST resource, an alias into a private
//! area and static files.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:8080/users/42
//!   curl -i -X POST http://localhost:8080/users -d '{"name":"alice"}'
//!   curl -i -X DELETE http://localhost:8080/users/42    # 405
//!   curl -i http://localhost:8080/@panel/stats          # 403, private
//!   curl -i http://localhost:8080/stats                 # alias into /@panel
//!   curl -i http://localhost:8080/legacy                # 301

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderValue, StatusCode};
use serde::Deserialize;
use switchyard::{
    AliasSession, BindingContext, BoxedSession, ContentType, Dispatcher, FileHandler, Handler, Instance,
    InstanceConfig, Method, MethodRouter, PathRouter, RedirectCode, RedirectSession, RequestContext, ResponseWriter,
    Server, SessionEnv, SessionFn, SyncHandler,
};

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main]
async fn main() -> switchyard::Result<()> {
    tracing_subscriber::fmt::init();

    let hits = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&hits);

    let users = MethodRouter::new()
        .on(Method::Get, SyncHandler::new(get_user))?
        .on(Method::Post, SyncHandler::new(create_user))?;

    let panel = PathRouter::new().route_fn("/stats", move |w, _req| {
        w.headers_mut().insert(CONTENT_TYPE, ContentType::Json.header_value());
        write!(w, r#"{{"hits":{}}}"#, counter.load(Ordering::Relaxed))
    })?;

    let app = PathRouter::new()
        .route("/users", users)?
        .route("/@panel", panel)?
        .route("/stats", SessionFn::new(|_i, _r, _e| Some(Box::new(AliasSession::new("/@panel/stats")))))?
        .route("/legacy", SessionFn::new(|_i, _r, _e| {
            Some(Box::new(RedirectSession::new("/users/1", RedirectCode::MovedPermanently)))
        }))?
        .fallback(FileHandler::new("public"))?;

    let hits_app = CountingRoot { inner: app, hits };
    let instance = Arc::new(Instance::new(InstanceConfig::default()));
    let server = Server::from_instance(&instance)?;
    server.serve(Dispatcher::new(instance, hits_app)?).await
}

/// Counts every routing attempt before handing it to the real tree.
struct CountingRoot {
    inner: PathRouter,
    hits: Arc<AtomicU64>,
}

impl Handler for CountingRoot {
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> switchyard::Result<()> {
        self.inner.init(instance, binding)
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.inner.begin_session(req, env)
    }
}

// GET /users/<id>
fn get_user(w: &mut dyn ResponseWriter, req: &RequestContext) -> io::Result<()> {
    let id = req.rel_path().first().map(String::as_str).unwrap_or("unknown");
    w.headers_mut().insert(CONTENT_TYPE, ContentType::Json.header_value());
    write!(w, r#"{{"id":"{id}","name":"alice"}}"#)
}

// POST /users
fn create_user(w: &mut dyn ResponseWriter, req: &RequestContext) -> io::Result<()> {
    let Ok(user) = req.read_json::<NewUser>() else {
        w.write_status(StatusCode::BAD_REQUEST);
        return Ok(());
    };
    w.headers_mut().insert(LOCATION, HeaderValue::from_static("/users/99"));
    w.headers_mut().insert(CONTENT_TYPE, ContentType::Json.header_value());
    w.write_status(StatusCode::CREATED);
    write!(w, r#"{{"id":"99","name":"{}"}}"#, user.name)
}
