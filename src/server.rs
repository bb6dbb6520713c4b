//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Stops `listener.accept()` immediately, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Terminates the [`Instance`](crate::Instance) (environment, then log
//!    sinks) and returns from [`Server::serve`].
//!
//! # Request bodies
//!
//! Bodies are collected in full before dispatch, capped at `limit_post`
//! bytes. A larger body is answered with `413` without reaching the route
//! tree.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::request::RequestContext;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use switchyard::Server;
    ///
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self> {
        let addr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address `{addr}`: {e}")))?;
        Ok(Self { addr })
    }

    /// Binds to the instance's configured `listen` address.
    pub fn from_instance(instance: &Instance) -> Result<Self> {
        Self::bind(&instance.config().listen)
    }

    /// Serves until SIGTERM or Ctrl-C, then drains and terminates.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<()> {
        self.serve_with_shutdown(dispatcher, shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then drains and terminates.
    pub async fn serve_with_shutdown(
        self,
        dispatcher: Dispatcher,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let dispatcher = Arc::new(dispatcher);
        let service = dispatcher.instance().service_name().to_owned();

        info!(addr = %self.addr, %service, "switchyard listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a signal stops accepting even if more
                // connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = Arc::clone(&dispatcher);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move { handle(dispatcher, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        dispatcher.instance().terminate();
        info!(%service, "switchyard stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

/// Collects the body, builds the request context and dispatches it.
///
/// Never fails: every outcome, including an oversized body, is a response.
async fn handle<B>(
    dispatcher: Arc<Dispatcher>,
    req: http::Request<B>,
    remote_addr: SocketAddr,
) -> std::result::Result<http::Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let limit = dispatcher.instance().config().limit_post;
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let response = if e.downcast_ref::<LengthLimitError>().is_some() {
                dispatcher
                    .error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
                    .await
            } else {
                debug!(peer = %remote_addr, "failed to read request body: {e}");
                dispatcher
                    .error_response(StatusCode::BAD_REQUEST, "unreadable request body")
                    .await
            };
            return Ok(response.into_inner());
        }
    };

    let req = RequestContext::from_parts(parts, body)
        .with_remote_addr(remote_addr)
        .with_body_limit(limit);
    Ok(dispatcher.dispatch(req).await.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::InstanceConfig;
    use crate::router::PathRouter;

    fn dispatcher(limit_post: usize) -> Arc<Dispatcher> {
        let app = PathRouter::new()
            .route_fn("/echo", |w, req| {
                let peer = req.remote_addr().map(|a| a.to_string()).unwrap_or_default();
                w.headers_mut().insert("x-peer", peer.parse().unwrap());
                w.write_all(req.body())
            })
            .unwrap();
        let config = InstanceConfig { limit_post, ..InstanceConfig::default() };
        let instance = Arc::new(Instance::new(config));
        Arc::new(Dispatcher::new(instance, app).unwrap())
    }

    fn post(body: &'static str) -> http::Request<Full<Bytes>> {
        http::Request::post("/echo").body(Full::new(Bytes::from(body))).unwrap()
    }

    fn peer() -> SocketAddr {
        "10.0.0.7:4100".parse().unwrap()
    }

    #[tokio::test]
    async fn bodies_within_the_limit_reach_the_handler() {
        let response = handle(dispatcher(16), post("ping"), peer()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-peer"], "10.0.0.7:4100");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "ping");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected_with_413() {
        let response = handle(dispatcher(4), post("far too long"), peer()).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn serves_until_shutdown_then_terminates_the_instance() {
        let dispatcher = Dispatcher::new(
            Arc::new(Instance::new(InstanceConfig::default())),
            PathRouter::new(),
        )
        .unwrap();
        let instance = Arc::clone(dispatcher.instance());
        let server = Server::bind("127.0.0.1:0").unwrap();

        server.serve_with_shutdown(dispatcher, async {}).await.unwrap();
        assert!(instance.is_terminated());
    }
}
