//! Thin typed client for the orgd daemon.
//!
//! The client has an explicit lifecycle: `Constructed` until [`Client::connect`]
//! succeeds, then `Connected`, then `Closed` after [`Client::close`]. Calls
//! made while still `Constructed` are parked in a bounded pending queue and
//! executed in submission order the moment the connection comes up; calls
//! after `close` fail immediately.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use orgd_schemas::{
    CompleteDay, CreateNodeReq, CreateTenantReq, Date, DayColorDefinitions, ErrorCode, Month,
    MoveNodeReq, Node, NodeTree, ServerInfo, SetColorReq, StatusReply, Tenant, Update, User,
};

mod sse;
use sse::SseDecoder;

/// Identity headers the daemon expects on every call; mirrors the daemon's
/// `ident` module.
pub const USER_HEADER: &str = "x-orgd-user";
pub const TENANT_HEADER: &str = "x-orgd-tenant";

/// Calls parked before `connect()` succeeds. Beyond this the caller gets
/// [`ClientError::QueueFull`] instead of unbounded buffering.
const MAX_PENDING_CALLS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is closed")]
    Closed,
    #[error("client is not connected")]
    NotConnected,
    #[error("pending-call queue is full")]
    QueueFull,
    #[error("call dropped before completion")]
    Canceled,
    #[error("server rejected the call with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("server returned {}: {message}", .code.as_str())]
    Server { code: ErrorCode, message: String },
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode server reply: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Constructed,
    Connected,
    Closed,
}

type QueuedCall = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct Inner {
    state: ClientState,
    pending: VecDeque<QueuedCall>,
    server_version: Option<String>,
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    user: Uuid,
    tenant: Uuid,
    inner: Mutex<Inner>,
}

impl Client {
    /// Create a disconnected client for the given server address and
    /// pre-authenticated identity.
    pub fn new(base_url: impl Into<String>, user: Uuid, tenant: Uuid) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            user,
            tenant,
            inner: Mutex::new(Inner {
                state: ClientState::Constructed,
                pending: VecDeque::new(),
                server_version: None,
            }),
        }
    }

    /// Establish the connection: fetch the server info, remember the server
    /// version, and drain every call parked while disconnected, in order.
    pub async fn connect(&self) -> Result<ServerInfo, ClientError> {
        {
            let inner = self.inner.lock().await;
            if inner.state == ClientState::Closed {
                return Err(ClientError::Closed);
            }
        }

        let url = format!("{}/v1/server-info", self.base_url);
        let value =
            do_call_raw(self.http.clone(), Method::GET, url, self.user, self.tenant, None).await?;
        let info: ServerInfo = decode_reply(value)?;

        let drained = {
            let mut inner = self.inner.lock().await;
            if inner.state == ClientState::Closed {
                return Err(ClientError::Closed);
            }
            inner.state = ClientState::Connected;
            inner.server_version = info.properties.get("version").cloned();
            std::mem::take(&mut inner.pending)
        };

        info!(
            "connected to server version {} at {}",
            info.properties.get("version").map(String::as_str).unwrap_or("?"),
            self.base_url
        );

        for call in drained {
            call().await;
        }

        Ok(info)
    }

    /// Close the client. Parked calls resolve with [`ClientError::Canceled`];
    /// later calls fail with [`ClientError::Closed`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ClientState::Closed;
        inner.pending.clear();
    }

    /// Version string reported by the server at connect time.
    pub async fn server_version(&self) -> Option<String> {
        self.inner.lock().await.server_version.clone()
    }

    // -- typed calls ---------------------------------------------------------

    pub async fn get_server_info(&self) -> Result<ServerInfo, ClientError> {
        self.call(Method::GET, "/v1/server-info", None).await
    }

    pub async fn get_day_color_definitions(&self) -> Result<DayColorDefinitions, ClientError> {
        self.call(Method::GET, "/v1/day-colors", None).await
    }

    pub async fn get_day(&self, date: Date) -> Result<CompleteDay, ClientError> {
        let path = format!("/v1/days/{}/{}/{}", date.year, date.month, date.mday);
        self.call(Method::GET, &path, None).await
    }

    pub async fn get_month(&self, year: i32, month: u32) -> Result<Month, ClientError> {
        let path = format!("/v1/months/{year}/{month}");
        self.call(Method::GET, &path, None).await
    }

    pub async fn set_day_color(&self, date: Date, color: &str) -> Result<StatusReply, ClientError> {
        let req = SetColorReq {
            date,
            color: color.to_string(),
        };
        self.call(Method::POST, "/v1/days/color", Some(serde_json::to_value(req)?))
            .await
    }

    pub async fn set_day(&self, day: CompleteDay) -> Result<StatusReply, ClientError> {
        self.call(Method::POST, "/v1/days", Some(serde_json::to_value(day)?))
            .await
    }

    pub async fn create_tenant(
        &self,
        tenant: Tenant,
        users: Vec<User>,
    ) -> Result<StatusReply, ClientError> {
        let req = CreateTenantReq { tenant, users };
        self.call(Method::POST, "/v1/tenants", Some(serde_json::to_value(req)?))
            .await
    }

    pub async fn create_node(&self, node: Node) -> Result<StatusReply, ClientError> {
        let req = CreateNodeReq { node };
        self.call(Method::POST, "/v1/nodes", Some(serde_json::to_value(req)?))
            .await
    }

    pub async fn update_node(&self, node: Node) -> Result<StatusReply, ClientError> {
        self.call(Method::POST, "/v1/nodes/update", Some(serde_json::to_value(node)?))
            .await
    }

    pub async fn move_node(
        &self,
        uuid: Uuid,
        parent_uuid: Option<Uuid>,
    ) -> Result<StatusReply, ClientError> {
        let req = MoveNodeReq { uuid, parent_uuid };
        self.call(Method::POST, "/v1/nodes/move", Some(serde_json::to_value(req)?))
            .await
    }

    pub async fn delete_node(&self, uuid: Uuid) -> Result<StatusReply, ClientError> {
        let path = format!("/v1/nodes/{uuid}");
        self.call(Method::DELETE, &path, None).await
    }

    pub async fn get_nodes(&self) -> Result<NodeTree, ClientError> {
        self.call(Method::GET, "/v1/nodes", None).await
    }

    /// Open the live update stream. Requires a connected client.
    pub async fn subscribe_to_updates(
        &self,
    ) -> Result<impl Stream<Item = Result<Update, ClientError>>, ClientError> {
        {
            let inner = self.inner.lock().await;
            match inner.state {
                ClientState::Connected => {}
                ClientState::Closed => return Err(ClientError::Closed),
                ClientState::Constructed => return Err(ClientError::NotConnected),
            }
        }

        let url = format!("{}/v1/updates", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(USER_HEADER, self.user.to_string())
            .header(TENANT_HEADER, self.tenant.to_string())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!("update stream open at {url}");

        let updates = resp
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let items: Vec<Result<Update, ClientError>> = match chunk {
                    Ok(bytes) => decoder
                        .push(&bytes)
                        .into_iter()
                        .map(|data| serde_json::from_str::<Update>(&data).map_err(ClientError::from))
                        .collect(),
                    Err(err) => vec![Err(ClientError::from(err))],
                };
                std::future::ready(Some(stream::iter(items)))
            })
            .flatten();

        Ok(updates)
    }

    // -- plumbing ------------------------------------------------------------

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);

        enum Dispatch {
            Direct {
                method: Method,
                url: String,
                body: Option<Value>,
            },
            Parked(oneshot::Receiver<Result<Value, ClientError>>),
        }

        let dispatch = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ClientState::Closed => return Err(ClientError::Closed),
                ClientState::Connected => Dispatch::Direct { method, url, body },
                ClientState::Constructed => {
                    if inner.pending.len() >= MAX_PENDING_CALLS {
                        return Err(ClientError::QueueFull);
                    }
                    debug!("deferring {method} {url} until connected");
                    let (tx, rx) = oneshot::channel();
                    let http = self.http.clone();
                    let (user, tenant) = (self.user, self.tenant);
                    inner.pending.push_back(Box::new(move || {
                        Box::pin(async move {
                            let res = do_call_raw(http, method, url, user, tenant, body).await;
                            let _ = tx.send(res);
                        })
                    }));
                    Dispatch::Parked(rx)
                }
            }
        };

        let value = match dispatch {
            Dispatch::Direct { method, url, body } => {
                do_call_raw(self.http.clone(), method, url, self.user, self.tenant, body).await?
            }
            Dispatch::Parked(rx) => rx.await.map_err(|_| ClientError::Canceled)??,
        };

        decode_reply(value)
    }

    #[cfg(test)]
    async fn pending_calls(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

async fn do_call_raw(
    http: reqwest::Client,
    method: Method,
    url: String,
    user: Uuid,
    tenant: Uuid,
    body: Option<Value>,
) -> Result<Value, ClientError> {
    let mut req = http
        .request(method, &url)
        .header(USER_HEADER, user.to_string())
        .header(TENANT_HEADER, tenant.to_string());
    if let Some(body) = body {
        req = req.json(&body);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    Ok(resp.json::<Value>().await?)
}

/// Decode a reply body into the expected type. If that fails and the body is
/// actually a structured error reply, surface the domain code instead of a
/// decode error.
fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => Ok(parsed),
        Err(decode_err) => {
            if let Ok(status) = serde_json::from_value::<StatusReply>(value) {
                if status.error != ErrorCode::Ok {
                    return Err(ClientError::Server {
                        code: status.error,
                        message: status.message,
                    });
                }
            }
            Err(ClientError::Decode(decode_err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // -- stub HTTP server ----------------------------------------------------

    fn stub_body(request_line: &str) -> String {
        if request_line.contains("/v1/server-info") {
            r#"{"properties":{"service":"orgd","version":"0.0.1"}}"#.to_string()
        } else if request_line.starts_with("GET /v1/nodes") {
            r#"{"root":{"node":null,"children":[]}}"#.to_string()
        } else if request_line.contains("/v1/days/") {
            concat!(
                r#"{"day":{"date":{"year":2024,"month":0,"mday":1},"#,
                r#""user":"00000000-0000-0000-0000-000000000000","#,
                r#""color":null,"has_notes":false,"has_report":false},"#,
                r#""notes":null,"report":null}"#
            )
            .to_string()
        } else {
            r#"{"error":"OK","message":""}"#.to_string()
        }
    }

    /// One-connection-per-request HTTP server that records request lines.
    async fn spawn_stub_server() -> (SocketAddr, Arc<StdMutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let record = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let record = Arc::clone(&record);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut tmp = [0u8; 4096];
                    // Read headers, then the announced body length.
                    let body_len = loop {
                        let Ok(n) = sock.read(&mut tmp).await else { return };
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&tmp[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
                            let announced = head
                                .lines()
                                .find_map(|l| {
                                    l.to_ascii_lowercase()
                                        .strip_prefix("content-length:")
                                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                                })
                                .unwrap_or(0);
                            let have = buf.len() - (pos + 4);
                            break announced.saturating_sub(have);
                        }
                    };
                    let mut remaining = body_len;
                    while remaining > 0 {
                        let Ok(n) = sock.read(&mut tmp).await else { return };
                        if n == 0 {
                            break;
                        }
                        remaining = remaining.saturating_sub(n);
                    }

                    let head = String::from_utf8_lossy(&buf).to_string();
                    let line = head.lines().next().unwrap_or("").to_string();
                    record.lock().unwrap().push(line.clone());

                    let body = stub_body(&line);
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        (addr, seen)
    }

    async fn wait_for_pending(client: &Client, n: usize) {
        for _ in 0..200 {
            if client.pending_calls().await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached {n} entries");
    }

    fn make_client(addr: SocketAddr) -> Arc<Client> {
        Arc::new(Client::new(
            format!("http://{addr}"),
            Uuid::new_v4(),
            Uuid::new_v4(),
        ))
    }

    // -- lifecycle -----------------------------------------------------------

    #[tokio::test]
    async fn calls_before_connect_drain_in_submission_order() {
        let (addr, seen) = spawn_stub_server().await;
        let client = make_client(addr);

        // Park two calls; enqueueing happens before the task awaits, so the
        // order is pinned by waiting for each to land in the queue.
        let c1 = Arc::clone(&client);
        let first = tokio::spawn(async move { c1.get_nodes().await });
        wait_for_pending(&client, 1).await;

        let c2 = Arc::clone(&client);
        let second = tokio::spawn(async move { c2.get_day(Date::new(2024, 0, 1)).await });
        wait_for_pending(&client, 2).await;

        let info = client.connect().await.expect("connect succeeds");
        assert_eq!(info.properties.get("version").map(String::as_str), Some("0.0.1"));
        assert_eq!(client.server_version().await.as_deref(), Some("0.0.1"));

        first.await.unwrap().expect("first parked call resolves");
        second.await.unwrap().expect("second parked call resolves");

        let seen = seen.lock().unwrap().clone();
        assert!(seen[0].contains("/v1/server-info"), "seen: {seen:?}");
        assert!(seen[1].starts_with("GET /v1/nodes"), "seen: {seen:?}");
        assert!(seen[2].contains("/v1/days/2024/0/1"), "seen: {seen:?}");
    }

    #[tokio::test]
    async fn queue_is_bounded() {
        // No server needed; nothing is sent while disconnected.
        let client = make_client("127.0.0.1:1".parse().unwrap());

        for _ in 0..MAX_PENDING_CALLS {
            let c = Arc::clone(&client);
            tokio::spawn(async move {
                let _ = c.get_nodes().await;
            });
        }
        wait_for_pending(&client, MAX_PENDING_CALLS).await;

        let err = client.get_nodes().await.unwrap_err();
        assert!(matches!(err, ClientError::QueueFull));
    }

    #[tokio::test]
    async fn parked_calls_cancel_on_close() {
        let client = make_client("127.0.0.1:1".parse().unwrap());

        let c = Arc::clone(&client);
        let parked = tokio::spawn(async move { c.get_nodes().await });
        wait_for_pending(&client, 1).await;

        client.close().await;

        let err = parked.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Canceled));

        let err = client.get_nodes().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let client = make_client("127.0.0.1:1".parse().unwrap());
        let err = match client.subscribe_to_updates().await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, ClientError::NotConnected));
    }

    // -- reply decoding ------------------------------------------------------

    #[test]
    fn decode_surfaces_structured_errors() {
        let body = serde_json::json!({ "error": "NOT_FOUND", "message": "node x not found" });
        let err = decode_reply::<NodeTree>(body).unwrap_err();
        match err {
            ClientError::Server { code, message } => {
                assert_eq!(code, ErrorCode::NotFound);
                assert_eq!(message, "node x not found");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn decode_passes_status_replies_through() {
        let body = serde_json::json!({ "error": "NO_CHANGES", "message": "parent unchanged" });
        let reply = decode_reply::<StatusReply>(body).unwrap();
        assert_eq!(reply.error, ErrorCode::NoChanges);
    }
}
