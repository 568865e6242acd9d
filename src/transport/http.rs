//! Smart HTTP(S) carrier.
//!
//! Stateless per call: discovery is a GET of `/info/refs` with the service
//! announcement validated before the shared advertisement parser runs, and
//! fetch is a single POST of the whole negotiation body. The body is
//! buffered so `Content-Length` can be sent, unless chunked transfer was
//! requested, in which case it streams through a channel. A 301 response
//! re-resolves the remote from `Location` and retries exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::Transport;
use crate::errors::TransportError;
use crate::platform::{HttpBody, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::protocol::core::{Connection, RefStore};
use crate::protocol::discovery;
use crate::protocol::fetch::{self, FetchOptions, PackReader};
use crate::protocol::pktline;
use crate::protocol::stream::PktStream;
use crate::protocol::types::{Pkt, RefAdvertisement};
use crate::remote::{ParsedRemote, Scheme};

pub const UPLOAD_PACK_ADVERTISEMENT: &str = "application/x-git-upload-pack-advertisement";
pub const UPLOAD_PACK_REQUEST: &str = "application/x-git-upload-pack-request";
pub const UPLOAD_PACK_RESULT: &str = "application/x-git-upload-pack-result";

/// Agent string sent with every request.
pub const USER_AGENT: &str = concat!("git-transport/", env!("CARGO_PKG_VERSION"));

const INFO_REFS_PATH: &str = "/info/refs?service=git-upload-pack";
const UPLOAD_PACK_PATH: &str = "/git-upload-pack";
const SERVICE_LINE: &[u8] = b"# service=git-upload-pack";
const DONE_LINE: &[u8] = b"done\n";

pub struct HttpTransport {
    remote: ParsedRemote,
    client: Arc<dyn HttpClient>,
    chunked: bool,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("remote", &self.remote)
            .field("chunked", &self.chunked)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(remote: ParsedRemote, client: Arc<dyn HttpClient>) -> Self {
        Self {
            remote,
            client,
            chunked: false,
        }
    }

    /// Stream the negotiation body with chunked transfer encoding instead
    /// of buffering it for `Content-Length`.
    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    async fn get_with_redirect(
        &mut self,
        service_path: &str,
        extra: &[(&str, String)],
    ) -> Result<HttpResponse, TransportError> {
        let request = build_request(&self.remote, HttpMethod::Get, service_path, extra, None);
        let response = self.client.request(request).await?;
        if response.status != 301 {
            return Ok(response);
        }
        let location = location_header(&response)?;
        tracing::debug!(%location, "following http redirect");
        relocate(&mut self.remote, &location, service_path)?;
        let request = build_request(&self.remote, HttpMethod::Get, service_path, extra, None);
        self.client.request(request).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn discover(&mut self) -> Result<RefAdvertisement, TransportError> {
        let extra = [
            ("Accept", "*/*".to_string()),
            ("Accept-Encoding", "gzip".to_string()),
            ("Pragma", "no-cache".to_string()),
        ];
        let response = self.get_with_redirect(INFO_REFS_PATH, &extra).await?;
        expect_ok(&response)?;
        expect_content_type(&response, UPLOAD_PACK_ADVERTISEMENT)?;

        let input = PktStream::from_stream(response.body);
        match input.read().await? {
            Some(Pkt::Data(line)) if line.trim() == SERVICE_LINE => {}
            _ => return Err(TransportError::protocol("Missing expected service line")),
        }
        match input.read().await? {
            Some(Pkt::Flush) => {}
            _ => return Err(TransportError::protocol("Missing expected terminator")),
        }
        discovery::discover(&input).await
    }

    async fn fetch(
        &mut self,
        repo: &dyn RefStore,
        opts: FetchOptions,
    ) -> Result<Option<PackReader>, TransportError> {
        let conn: Arc<dyn Connection> = Arc::new(UploadPackPost::new(
            self.client.clone(),
            self.remote.clone(),
            self.chunked,
        ));
        fetch::negotiate(conn, repo, opts).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

enum BodyState {
    /// Accumulating the request body for a `Content-Length` POST.
    Buffering(BytesMut),
    /// Chunked transfer: the live body sender once the request is spawned.
    Streaming(Option<mpsc::Sender<Result<Bytes, TransportError>>>),
    /// `done` went out; the body is complete.
    Sent,
}

enum ResponseState {
    /// Buffered mode before the request is dispatched.
    NotSent,
    /// Chunked mode: response pending from the spawned request task.
    Pending(Option<oneshot::Receiver<Result<HttpResponse, TransportError>>>),
    /// Response body open for reading.
    Open(Arc<PktStream>),
}

/// Connection-shaped adapter around one `POST /git-upload-pack` exchange.
///
/// Writes accumulate (or stream) the request body; the terminating
/// `done` line completes it. Reads come from the response body once the
/// exchange has happened.
struct UploadPackPost {
    client: Arc<dyn HttpClient>,
    remote: Mutex<ParsedRemote>,
    body: Mutex<BodyState>,
    response: Mutex<ResponseState>,
    reader: std::sync::Mutex<Option<Arc<PktStream>>>,
    aborted: AtomicBool,
    abort_signal: Notify,
}

impl UploadPackPost {
    fn new(client: Arc<dyn HttpClient>, remote: ParsedRemote, chunked: bool) -> Self {
        let body = if chunked {
            BodyState::Streaming(None)
        } else {
            BodyState::Buffering(BytesMut::new())
        };
        Self {
            client,
            remote: Mutex::new(remote),
            body: Mutex::new(body),
            response: Mutex::new(ResponseState::NotSent),
            reader: std::sync::Mutex::new(None),
            aborted: AtomicBool::new(false),
            abort_signal: Notify::new(),
        }
    }

    /// Send the buffered body, following a single redirect, and open the
    /// response for reading.
    async fn dispatch(&self, payload: Bytes) -> Result<(), TransportError> {
        let headers = |len: usize| {
            [
                ("Content-Type", UPLOAD_PACK_REQUEST.to_string()),
                ("Accept", UPLOAD_PACK_RESULT.to_string()),
                ("Content-Length", len.to_string()),
            ]
        };
        let mut remote = self.remote.lock().await;
        let request = build_request(
            &remote,
            HttpMethod::Post,
            UPLOAD_PACK_PATH,
            &headers(payload.len()),
            Some(HttpBody::Full(payload.clone())),
        );
        let mut response = self.client.request(request).await?;
        if response.status == 301 {
            let location = location_header(&response)?;
            tracing::debug!(%location, "following http redirect");
            relocate(&mut remote, &location, UPLOAD_PACK_PATH)?;
            let request = build_request(
                &remote,
                HttpMethod::Post,
                UPLOAD_PACK_PATH,
                &headers(payload.len()),
                Some(HttpBody::Full(payload)),
            );
            response = self.client.request(request).await?;
        }
        drop(remote);

        let stream = self.open_response(response)?;
        *self.response.lock().await = ResponseState::Open(stream);
        Ok(())
    }

    /// Start the chunked request; its body is fed through the returned
    /// sender and its response lands in the response slot.
    async fn spawn_request(
        &self,
    ) -> Result<mpsc::Sender<Result<Bytes, TransportError>>, TransportError> {
        let (tx, rx) = mpsc::channel(16);
        let (resp_tx, resp_rx) = oneshot::channel();
        let remote = self.remote.lock().await.clone();
        let extra = [
            ("Content-Type", UPLOAD_PACK_REQUEST.to_string()),
            ("Accept", UPLOAD_PACK_RESULT.to_string()),
            ("Transfer-Encoding", "chunked".to_string()),
        ];
        let request = build_request(
            &remote,
            HttpMethod::Post,
            UPLOAD_PACK_PATH,
            &extra,
            Some(HttpBody::Stream(Box::pin(ReceiverStream::new(rx)))),
        );
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = resp_tx.send(client.request(request).await);
        });
        *self.response.lock().await = ResponseState::Pending(Some(resp_rx));
        Ok(tx)
    }

    fn open_response(&self, response: HttpResponse) -> Result<Arc<PktStream>, TransportError> {
        expect_ok(&response)?;
        expect_content_type(&response, UPLOAD_PACK_RESULT)?;
        let stream = Arc::new(PktStream::from_stream(response.body));
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(stream.clone());
        }
        Ok(stream)
    }
}

#[async_trait]
impl Connection for UploadPackPost {
    async fn send(&self, pkt: Pkt) -> Result<(), TransportError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(TransportError::Aborted);
        }
        let frame = pktline::encode(&pkt)?;
        let done = matches!(&pkt, Pkt::Data(data) if data.as_ref() == DONE_LINE);

        let mut body = self.body.lock().await;
        match &mut *body {
            BodyState::Buffering(buf) => {
                buf.extend_from_slice(&frame);
                if done {
                    let payload = std::mem::take(buf).freeze();
                    *body = BodyState::Sent;
                    drop(body);
                    self.dispatch(payload).await?;
                }
            }
            BodyState::Streaming(sender) => {
                let tx = match sender {
                    Some(tx) => tx.clone(),
                    None => {
                        let tx = self.spawn_request().await?;
                        *sender = Some(tx.clone());
                        tx
                    }
                };
                tx.send(Ok(frame))
                    .await
                    .map_err(|_| TransportError::transport("request body channel closed"))?;
                // dropping the sender ends the chunked body
                if done {
                    *body = BodyState::Sent;
                }
            }
            BodyState::Sent => {
                return Err(TransportError::transport(
                    "negotiation request already sent",
                ));
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Pkt>, TransportError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(TransportError::Aborted);
        }
        let stream = {
            let mut response = self
                .response
                .try_lock()
                .map_err(|_| TransportError::ConcurrentRead)?;
            match &mut *response {
                ResponseState::Open(stream) => stream.clone(),
                ResponseState::NotSent => {
                    return Err(TransportError::transport(
                        "negotiation request was never completed",
                    ));
                }
                ResponseState::Pending(rx_slot) => {
                    let rx = rx_slot
                        .take()
                        .ok_or_else(|| TransportError::transport("response already claimed"))?;
                    let result = tokio::select! {
                        _ = self.abort_signal.notified() => return Err(TransportError::Aborted),
                        result = rx => result,
                    };
                    let http_response =
                        result.map_err(|_| TransportError::transport("request task dropped"))??;
                    let stream = self.open_response(http_response)?;
                    *response = ResponseState::Open(stream.clone());
                    stream
                }
            }
        };
        stream.read().await
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.abort_signal.notify_one();
        if let Ok(reader) = self.reader.lock() {
            if let Some(stream) = reader.as_ref() {
                stream.abort();
            }
        }
    }
}

fn default_headers(remote: &ParsedRemote) -> Vec<(String, String)> {
    let mut headers = vec![
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("Host".to_string(), remote.hostname.clone()),
    ];
    // gist.github.com rejects requests from agents it does not know
    if remote.hostname == "gist.github.com" {
        headers[0].1 = "git/1.8.1.2".to_string();
        headers.push(("X-Real-User-Agent".to_string(), USER_AGENT.to_string()));
    }
    headers
}

fn build_request(
    remote: &ParsedRemote,
    method: HttpMethod,
    service_path: &str,
    extra: &[(&str, String)],
    body: Option<HttpBody>,
) -> HttpRequest {
    let mut headers = default_headers(remote);
    for (name, value) in extra {
        headers.push((name.to_string(), value.clone()));
    }
    HttpRequest {
        method,
        tls: remote.scheme == Scheme::Https,
        hostname: remote.hostname.clone(),
        port: remote.port,
        path: format!("{}{}", remote.pathname, service_path),
        auth: remote.auth.clone(),
        headers,
        body,
    }
}

/// Re-resolve the remote from a redirect `Location`, recovering the repo
/// path by stripping the service suffix.
fn relocate(
    remote: &mut ParsedRemote,
    location: &str,
    service_path: &str,
) -> Result<(), TransportError> {
    let uri = ParsedRemote::parse(location)?;
    let mut full = uri.pathname.clone();
    if let Some(search) = &uri.search {
        full.push_str(search);
    }
    let pathname = match full.find(service_path) {
        Some(at) => {
            let mut stripped = full;
            stripped.replace_range(at..at + service_path.len(), "");
            stripped
        }
        None => full,
    };
    remote.scheme = uri.scheme;
    remote.hostname = uri.hostname;
    remote.port = uri.port;
    remote.auth = uri.auth;
    remote.pathname = pathname;
    Ok(())
}

fn location_header(response: &HttpResponse) -> Result<String, TransportError> {
    response
        .header("location")
        .map(str::to_string)
        .ok_or_else(|| TransportError::protocol("redirect without a Location header"))
}

fn expect_ok(response: &HttpResponse) -> Result<(), TransportError> {
    if response.status != 200 {
        return Err(TransportError::protocol(format!(
            "Unexpected status code {}",
            response.status
        )));
    }
    Ok(())
}

fn expect_content_type(response: &HttpResponse, expected: &str) -> Result<(), TransportError> {
    match response.header("content-type") {
        Some(value) if value == expected => Ok(()),
        _ => Err(TransportError::protocol(
            "Wrong content-type in server response",
        )),
    }
}
