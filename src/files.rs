//! Static files served through the synchronous bridge.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};

use crate::binding::BindingContext;
use crate::bridge::{ResponseWriter, SyncHandler};
use crate::error::Result;
use crate::handler::Handler;
use crate::instance::{Instance, SessionEnv};
use crate::request::RequestContext;
use crate::response::ContentType;
use crate::session::BoxedSession;
use crate::status::error_title;

const INDEX_FILE: &str = "index.html";

/// Serves files below a root directory.
///
/// The request's relative path selects the file, so mounting the handler at
/// `/static` maps `/static/css/site.css` to `<root>/css/site.css`. A relative
/// root is resolved against the instance working directory.
pub struct FileHandler {
    root: PathBuf,
    inner: Option<SyncHandler>,
}

impl FileHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), inner: None }
    }
}

impl Handler for FileHandler {
    fn init(&mut self, instance: &Arc<Instance>, binding: Option<&BindingContext>) -> Result<()> {
        let root = if self.root.is_absolute() {
            self.root.clone()
        } else {
            instance.work_path(&self.root)
        };
        let mut inner = SyncHandler::new(move |w, req| serve_file(&root, w, req));
        inner.init(instance, binding)?;
        self.inner = Some(inner);
        Ok(())
    }

    fn begin_session(&self, req: &mut RequestContext, env: Option<&SessionEnv>) -> Option<BoxedSession> {
        self.inner.as_ref()?.begin_session(req, env)
    }
}

fn serve_file(root: &Path, w: &mut dyn ResponseWriter, req: &RequestContext) -> io::Result<()> {
    let head_only = match req.method() {
        "GET" => false,
        "HEAD" => true,
        _ => {
            w.headers_mut().insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return write_error(w, StatusCode::METHOD_NOT_ALLOWED);
        }
    };

    let mut path = root.to_path_buf();
    for segment in req.rel_path() {
        if segment == ".." || segment.contains('\\') {
            return write_error(w, StatusCode::FORBIDDEN);
        }
        path.push(segment);
    }
    if path.is_dir() {
        path.push(INDEX_FILE);
    }

    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return write_error(w, StatusCode::NOT_FOUND),
        Err(e) => return Err(e),
    };

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    w.headers_mut().insert(CONTENT_TYPE, ContentType::from_extension(ext).header_value());
    w.write_status(StatusCode::OK);
    if !head_only {
        w.write_all(&content)?;
    }
    Ok(())
}

fn write_error(w: &mut dyn ResponseWriter, status: StatusCode) -> io::Result<()> {
    w.headers_mut().insert(CONTENT_TYPE, ContentType::Text.header_value());
    w.write_status(status);
    w.write_all(error_title(status).unwrap_or("Error").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::response::{Response, ResponseSink};
    use crate::router::PathRouter;
    use crate::session::SessionDriver;

    async fn fetch(handler: &dyn Handler, method: &str, uri: &str) -> Response {
        let mut req = RequestContext::new(method, uri).unwrap();
        let session = handler.begin_session(&mut req, None).expect("a session");
        let mut driver = SessionDriver::new(session);
        let mut out = Response::new();
        driver.enter().await.unwrap();
        let status = driver.begin_response(out.headers_mut()).unwrap();
        out.write_status(status);
        driver.write_response(&mut out).await.unwrap();
        out
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        dir
    }

    fn files(dir: &tempfile::TempDir) -> FileHandler {
        let mut handler = FileHandler::new(dir.path());
        handler.init(&Arc::new(Instance::new(InstanceConfig::default())), None).unwrap();
        handler
    }

    #[tokio::test]
    async fn serves_files_with_a_guessed_content_type() {
        let dir = site();
        let out = fetch(&files(&dir), "GET", "/css/site.css").await;
        assert_eq!(out.status(), StatusCode::OK);
        assert_eq!(out.content_type(), Some("text/css"));
        assert_eq!(out.body(), b"body{}");
    }

    #[tokio::test]
    async fn directories_serve_their_index() {
        let dir = site();
        let out = fetch(&files(&dir), "GET", "/").await;
        assert_eq!(out.body(), b"<h1>home</h1>");
        assert_eq!(out.content_type(), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn rejects_missing_files_traversal_and_other_methods() {
        let dir = site();
        let handler = files(&dir);
        assert_eq!(fetch(&handler, "GET", "/nope.txt").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(fetch(&handler, "GET", "/css/../../etc/passwd").await.status(), StatusCode::FORBIDDEN);

        let out = fetch(&handler, "POST", "/index.html").await;
        assert_eq!(out.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(out.headers()[ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn head_sends_headers_only() {
        let dir = site();
        let out = fetch(&files(&dir), "HEAD", "/css/site.css").await;
        assert_eq!(out.status(), StatusCode::OK);
        assert!(out.body().is_empty());
    }

    #[tokio::test]
    async fn mounted_under_a_prefix_serves_the_remainder() {
        let dir = site();
        let mut router = PathRouter::new().route("/static", FileHandler::new(dir.path())).unwrap();
        router.init(&Arc::new(Instance::new(InstanceConfig::default())), None).unwrap();
        let out = fetch(&router, "GET", "/static/css/site.css").await;
        assert_eq!(out.body(), b"body{}");
    }
}
