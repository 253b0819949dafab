//! Connection dispatcher.
//!
//! A tokio accept loop hands each connection to hyper, which parses one
//! HTTP/1.x request and answers it through an [`axum::Router`]. The access
//! filter runs on the peer address as soon as the connection is accepted,
//! before hyper has read anything: rejected peers get a router that answers
//! every request with 403.
//!
//! ```text
//! permit ─► accept ─► access filter ─► hyper ─► router ─► respond, close
//!                         │ reject
//!                         └────────► hyper ─► 403 Access Denied, close
//! ```
//!
//! ## Backpressure
//!
//! At most `max_connections` connections are open at once. The accept loop
//! takes a semaphore permit *before* accepting, so further clients wait in
//! the kernel's listen backlog instead of holding file descriptors. Every
//! connection is wrapped in [`IdleTimeout`]: a client that stops sending or
//! stops reading for `read_timeout_secs` is dropped and its permit returns.
//!
//! ## Routes
//!
//! | Route                                  | Response                          |
//! |----------------------------------------|-----------------------------------|
//! | `/`, `/browse/<dir>/`                  | subdirectory listing              |
//! | `/view?path=P&page=N`                  | one image with navigation         |
//! | `/random?path=P`                       | 307 to a random view page         |
//! | `/image/<file>`                        | raw image bytes                   |
//!
//! `action=refresh` on `view` and `random` rebuilds the directory's index
//! first. Unknown first words are treated as `browse`. Methods other than
//! GET and HEAD get 501. hyper itself answers 400 for unparsable requests
//! and 414 for request targets longer than 65534 bytes.

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path as UrlPath, Query, Request, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::access::{AccessFilter, Decision};
use crate::browse;
use crate::cache::{CacheError, IndexCache};
use crate::config::{ConfigError, ServerConfig, effective_connections};
use crate::navigate;
use crate::render::{self, ViewPage};
use crate::types::{DirectoryId, normalize_relative};

/// Pause after a failed `accept`, so a persistent error (out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A bound listener plus everything needed to answer requests.
pub struct Server {
    listener: TcpListener,
    limit: Arc<Semaphore>,
    connections: usize,
    app: Arc<App>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// The gallery must exist; it is canonicalized so that logged and
    /// rendered paths are absolute.
    pub async fn bind(config: ServerConfig, filter: AccessFilter) -> Result<Server, ServerError> {
        config.validate()?;
        config.validate_gallery()?;

        let gallery = config.gallery.canonicalize()?;
        let connections = effective_connections(&config);
        let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;

        let app = App {
            cache: IndexCache::new(&gallery, config.cache_root()),
            gallery,
            filter,
            idle_timeout: Duration::from_secs(config.read_timeout_secs),
        };
        Ok(Server {
            listener,
            limit: Arc::new(Semaphore::new(connections)),
            connections,
            app: Arc::new(app),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gallery(&self) -> &Path {
        &self.app.gallery
    }

    /// Connections served at once.
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Accept connections until the process exits.
    ///
    /// Accept errors are logged and retried after a short pause.
    pub async fn serve(self) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr()?,
            gallery = %self.app.gallery.display(),
            cache = %self.app.cache.cache_dir().display(),
            connections = self.connections,
            "listening"
        );
        let routes = router(Arc::clone(&self.app));
        let denied = denied_router();

        loop {
            let Ok(permit) = Arc::clone(&self.limit).acquire_owned().await else {
                return Ok(());
            };
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let service = match self.app.filter.decide(peer.ip()) {
                Decision::Admit => routes.clone(),
                Decision::Reject => {
                    info!(peer = %peer, "connection rejected");
                    denied.clone()
                }
            };
            let io = TokioIo::new(IdleTimeout::new(stream, self.app.idle_timeout));

            tokio::spawn(async move {
                let connection = http1::Builder::new()
                    .keep_alive(false)
                    .serve_connection(io, TowerToHyperService::new(service));
                if let Err(e) = connection.await {
                    debug!(peer = %peer, error = %e, "connection ended with an error");
                }
                drop(permit);
            });
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Shared, read-only state for every connection.
struct App {
    gallery: PathBuf,
    cache: IndexCache,
    filter: AccessFilter,
    idle_timeout: Duration,
}

/// Query parameters of `view` and `random`. A repeated key is a 400.
#[derive(Debug, Deserialize)]
struct ViewParams {
    path: Option<String>,
    page: Option<String>,
    action: Option<String>,
    source: Option<String>,
}

impl ViewParams {
    fn refresh(&self) -> bool {
        self.action.as_deref() == Some("refresh")
    }
}

fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/view", get(view))
        .route("/random", get(random))
        .route("/image/*path", get(image))
        .fallback(browse)
        .layer(middleware::from_fn(only_get_and_head))
        .with_state(app)
}

/// Router for rejected peers: 403 for anything they ask.
fn denied_router() -> Router {
    Router::new().fallback(|| async { error_page(StatusCode::FORBIDDEN, "Access Denied") })
}

async fn only_get_and_head(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = match method {
        Method::GET | Method::HEAD => next.run(request).await,
        ref other => error_page(
            StatusCode::NOT_IMPLEMENTED,
            &format!("Unsupported method ({other})"),
        ),
    };
    debug!(method = %method, uri = %uri, status = response.status().as_u16(), "request");
    response
}

impl App {
    /// Build the index for `path` if needed. `Err` is a ready-made response.
    fn ensure(&self, path: &str, refresh: bool) -> Result<(String, DirectoryId), Response> {
        let relative = normalize_relative(path);
        let id = DirectoryId::from_relative(&relative);
        match self.cache.try_ensure_index(&id, &relative, refresh) {
            Ok(_) => Ok((relative, id)),
            Err(CacheError::MissingDirectory(dir)) => Err(error_page(
                StatusCode::NOT_FOUND,
                &format!("Directory not found: {}", dir.display()),
            )),
            Err(e) => {
                warn!(id = %id, error = %e, "failed to write index");
                Err(error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unable to index directory",
                ))
            }
        }
    }

    fn list(&self, relative: &str, raw_path: &str) -> Response {
        let dir = self.gallery.join(relative);
        if !dir.is_dir() {
            return error_page(
                StatusCode::NOT_FOUND,
                &format!("Directory not found: {}", dir.display()),
            );
        }
        if !raw_path.ends_with('/') {
            return Redirect::temporary(&format!("{raw_path}/")).into_response();
        }
        match browse::list(&self.gallery, relative) {
            Ok(listing) => render::browse_page(relative, &dir, &listing).into_response(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to list directory");
                error_page(StatusCode::NOT_FOUND, "No permission to list directory")
            }
        }
    }
}

/// Run cache and filesystem work off the async workers; the per-id build
/// slots block.
async fn blocking<F>(work: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "request task failed");
            error_page(StatusCode::INTERNAL_SERVER_ERROR, "Request failed")
        }
    }
}

async fn view(
    State(app): State<Arc<App>>,
    params: Result<Query<ViewParams>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = params else {
        return error_page(StatusCode::BAD_REQUEST, "Bad request syntax");
    };
    let refresh = params.refresh();
    let from_random = params.source.as_deref() == Some("random");
    let page = parse_page(params.page.as_deref());
    let Some(path) = params.path else {
        return Redirect::temporary("/browse/").into_response();
    };

    blocking(move || {
        let (relative, id) = match app.ensure(&path, refresh) {
            Ok(ready) => ready,
            Err(response) => return response,
        };
        let nav = navigate::resolve(&app.cache, &id, page);
        render::view_page(&ViewPage {
            relative: &relative,
            page,
            nav: &nav,
            from_random,
        })
        .into_response()
    })
    .await
}

async fn random(
    State(app): State<Arc<App>>,
    params: Result<Query<ViewParams>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = params else {
        return error_page(StatusCode::BAD_REQUEST, "Bad request syntax");
    };
    let refresh = params.refresh();
    let Some(path) = params.path else {
        return Redirect::temporary("/browse/").into_response();
    };

    blocking(move || {
        let (relative, id) = match app.ensure(&path, refresh) {
            Ok(ready) => ready,
            Err(response) => return response,
        };
        let page = navigate::random_page(&app.cache, &id);
        Redirect::temporary(&render::random_view_href(&relative, page)).into_response()
    })
    .await
}

async fn image(State(app): State<Arc<App>>, UrlPath(path): UrlPath<String>) -> Response {
    serve_image(&app, &path).await
}

async fn serve_image(app: &App, path: &str) -> Response {
    let relative = normalize_relative(path);
    let file = app.gallery.join(&relative);
    match tokio::fs::read(&file).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&relative))], bytes).into_response(),
        Err(e) => {
            debug!(path = %file.display(), error = %e, "image not served");
            error_page(StatusCode::NOT_FOUND, "File not found")
        }
    }
}

/// Everything that is not `view`, `random` or `image/...`: the first path
/// word is dropped and the rest is listed.
async fn browse(State(app): State<Arc<App>>, uri: Uri) -> Response {
    let raw_path = uri.path().to_string();
    let normalized = normalize_relative(&percent_decode_str(&raw_path).decode_utf8_lossy());
    let (word, rest) = normalized.split_once('/').unwrap_or((&normalized, ""));
    if word == "image" {
        return serve_image(&app, rest).await;
    }
    let relative = if word.is_empty() { String::new() } else { rest.to_string() };

    blocking(move || app.list(&relative, &raw_path)).await
}

// ============================================================================
// Responses
// ============================================================================

/// HTML error page titled with the status, e.g. "404 Not Found".
fn error_page(status: StatusCode, message: &str) -> Response {
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    (status, render::message_page(&title, message)).into_response()
}

/// Page number from a query value: missing or unparsable is 1, anything
/// below 1 clamps to 1.
fn parse_page(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|n| usize::try_from(n.max(1)).unwrap_or(usize::MAX))
        .unwrap_or(1)
}

/// MIME type by extension, from the same table the indexer accepts.
fn content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Idle timeout
// ============================================================================

/// Stream wrapper that fails with [`io::ErrorKind::TimedOut`] once neither a
/// read nor a write has made progress for `timeout`.
///
/// The timer only runs while some operation is pending, so time spent
/// building an index between reading the request and writing the response
/// does not count.
pub struct IdleTimeout<S> {
    inner: S,
    timeout: Duration,
    timer: Pin<Box<Sleep>>,
}

impl<S> IdleTimeout<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            timer: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    fn track<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        match poll {
            Poll::Ready(result) => {
                self.timer.as_mut().reset(Instant::now() + self.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => match self.timer.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection idle",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        this.track(cx, poll)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.track(cx, poll)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.track(cx, poll)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.track(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.track(cx, poll)
    }
}
