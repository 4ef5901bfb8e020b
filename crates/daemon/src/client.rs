//! Clients: named roles inside a running test case
//!
//! A [`Client`] turns the adapter long-poll exchange into an ordinary
//! awaitable call. A scenario calls an action method, the action is published
//! so the adapter's next poll returns it, and the call resumes once the
//! adapter responds or reports an error.
//!
//! At most one action may be outstanding per client. Issuing a second one
//! before the first resolves fails with [`Error::ActionCollision`].

use crate::homerunner::HomeServer;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use trafficlight_common::{ActionResponse, Error, PollAction, Result};

/// Re-poll hint handed to a bound adapter while its scenario is between actions
pub const CLIENT_IDLE_DELAY_MS: u64 = 5000;

/// Uploaded files of one test case, keyed by `{role}_{filename}`
pub type FileIndex = Arc<RwLock<BTreeMap<String, PathBuf>>>;

/// Login details a client registers or logs in with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub localpart: String,
    pub password: String,
}

impl Credentials {
    pub fn for_role(role: &str) -> Self {
        Self {
            localpart: format!("user_{}", role),
            password: format!("pass_{}", role),
        }
    }
}

/// One video tile as seen by a call client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoTile {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub muted: bool,
}

/// Call state reported by `get_call_data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    #[serde(default)]
    pub video_tiles: Vec<VideoTile>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub video_muted: bool,
    #[serde(default)]
    pub screenshare: bool,
}

type Resolver = oneshot::Sender<Result<ActionResponse>>;

struct Exchange {
    /// What the next poll returns
    current: PollAction,
    pending: Option<Resolver>,
    /// Error reported while nothing was outstanding; raised by the next action
    undelivered: Option<Error>,
    /// Bumped on every published action
    seq: u64,
}

struct ClientInner {
    name: String,
    adapter: String,
    credentials: Mutex<Credentials>,
    exchange: Mutex<Exchange>,
    files: FileIndex,
}

/// A named participant in a running test case, backed by one adapter
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("adapter", &self.inner.adapter)
            .finish()
    }
}

/// Clears a published action if the awaiting call is dropped before it resolves.
struct PendingGuard<'a> {
    client: &'a Client,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut exchange = self.client.inner.exchange.lock();
        if exchange.seq == self.seq && exchange.pending.is_some() {
            debug!(
                "Abandoning outstanding {} on client {}",
                exchange.current.action, self.client.inner.name
            );
            exchange.pending = None;
            exchange.current = PollAction::idle(CLIENT_IDLE_DELAY_MS);
        }
    }
}

impl Client {
    /// Create a client for `name` backed by the adapter `adapter`
    pub fn new(
        name: impl Into<String>,
        adapter: impl Into<String>,
        files: FileIndex,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(ClientInner {
                credentials: Mutex::new(Credentials::for_role(&name)),
                name,
                adapter: adapter.into(),
                exchange: Mutex::new(Exchange {
                    current: PollAction::idle(CLIENT_IDLE_DELAY_MS),
                    pending: None,
                    undelivered: None,
                    seq: 0,
                }),
                files,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handle of the adapter backing this client
    pub fn adapter(&self) -> &str {
        &self.inner.adapter
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.credentials.lock().clone()
    }

    /// Log in as someone else from now on, e.g. a second device of another role
    pub fn use_credentials(&self, credentials: Credentials) {
        *self.inner.credentials.lock() = credentials;
    }

    /// True while an action is awaiting its response
    pub fn is_waiting(&self) -> bool {
        self.inner.exchange.lock().pending.is_some()
    }

    // ------------------------------------------------------------------------
    // Adapter side
    // ------------------------------------------------------------------------

    /// Action the adapter should perform next
    pub fn poll_data(&self) -> PollAction {
        self.inner.exchange.lock().current.clone()
    }

    /// Resolve the outstanding action with the adapter's answer.
    ///
    /// Fails without touching any state when nothing is outstanding.
    pub fn give_response(&self, response: ActionResponse) -> Result<()> {
        let resolver = {
            let mut exchange = self.inner.exchange.lock();
            let resolver = exchange
                .pending
                .take()
                .ok_or_else(|| Error::NoActionPending(self.inner.name.clone()))?;
            exchange.current = PollAction::idle(CLIENT_IDLE_DELAY_MS);
            resolver
        };

        debug!("Client {} received {}", self.inner.name, response.response);
        // A closed receiver means the awaiting call was already abandoned.
        let _ = resolver.send(Ok(response));
        Ok(())
    }

    /// Fail the outstanding action, or hold the error for the next one.
    pub fn give_error(&self, error: Error) {
        let mut exchange = self.inner.exchange.lock();
        exchange.current = PollAction::idle(CLIENT_IDLE_DELAY_MS);
        let pending = exchange.pending.take();
        match pending {
            Some(resolver) => {
                drop(exchange);
                let _ = resolver.send(Err(error));
            }
            None => {
                info!(
                    "Client {} got an error with no action outstanding; raising it on the next action",
                    self.inner.name
                );
                exchange.undelivered = Some(error);
            }
        }
    }

    /// Record a file uploaded by this client's adapter
    pub fn record_upload(&self, filename: &str, path: PathBuf) {
        let key = format!("{}_{}", self.inner.name, filename);
        self.inner.files.write().insert(key, path);
    }

    // ------------------------------------------------------------------------
    // Scenario side
    // ------------------------------------------------------------------------

    /// Publish an action and wait for the adapter to answer it.
    ///
    /// The action tag and data are passed through untouched, so scenarios are
    /// free to define their own vocabulary.
    pub async fn perform_action(&self, action: &str, data: Value) -> Result<ActionResponse> {
        let (receiver, seq) = {
            let mut exchange = self.inner.exchange.lock();
            if exchange.pending.is_some() {
                return Err(Error::ActionCollision {
                    client: self.inner.name.clone(),
                    pending: exchange.current.to_string(),
                });
            }
            if let Some(error) = exchange.undelivered.take() {
                return Err(error);
            }
            let (sender, receiver) = oneshot::channel();
            exchange.seq += 1;
            exchange.current = PollAction::new(action, data);
            exchange.pending = Some(sender);
            (receiver, exchange.seq)
        };

        debug!("Client {} waiting on {}", self.inner.name, action);
        let _guard = PendingGuard { client: self, seq };
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!(
                "exchange for {} on client {} was dropped",
                action, self.inner.name
            ))),
        }
    }

    async fn simple_action(&self, action: &str, data: Value) -> Result<()> {
        self.perform_action(action, data).await.map(|_| ())
    }

    fn login_data(&self, server: &HomeServer) -> Value {
        let credentials = self.credentials();
        json!({
            "username": credentials.localpart,
            "password": credentials.password,
            "homeserver_url": {
                "local_docker": server.docker_url(),
                "local": server.cs_api,
            },
        })
    }

    pub async fn register(&self, server: &HomeServer) -> Result<()> {
        let data = self.login_data(server);
        self.simple_action("register", data).await
    }

    pub async fn login(&self, server: &HomeServer) -> Result<()> {
        let data = self.login_data(server);
        self.simple_action("login", data).await
    }

    pub async fn start_crosssign(&self) -> Result<()> {
        self.simple_action("start_crosssign", json!({})).await
    }

    pub async fn accept_crosssign(&self) -> Result<()> {
        self.simple_action("accept_crosssign", json!({})).await
    }

    pub async fn verify_crosssign(&self) -> Result<()> {
        self.simple_action("verify_crosssign", json!({})).await
    }

    pub async fn create_room(&self, room_name: &str) -> Result<()> {
        self.simple_action("create_room", json!({ "name": room_name }))
            .await
    }

    pub async fn send_message(&self, message: &str) -> Result<()> {
        self.simple_action("send_message", json!({ "message": message }))
            .await
    }

    pub async fn invite_user(&self, user_id: &str) -> Result<()> {
        self.simple_action("invite_user", json!({ "userId": user_id }))
            .await
    }

    pub async fn accept_invite(&self) -> Result<()> {
        self.simple_action("accept_invite", json!({})).await
    }

    pub async fn reload(&self) -> Result<()> {
        self.simple_action("reload", json!({})).await
    }

    pub async fn clear_idb_storage(&self) -> Result<()> {
        self.simple_action("clear_idb_storage", json!({})).await
    }

    pub async fn change_room_history_visibility(&self, history_visibility: &str) -> Result<()> {
        self.simple_action(
            "change_room_history_visibility",
            json!({ "historyVisibility": history_visibility }),
        )
        .await
    }

    pub async fn verify_message_in_timeline(&self, message: &str) -> Result<()> {
        self.simple_action("verify_message_in_timeline", json!({ "message": message }))
            .await
    }

    /// Create the named call or join it; returns true if it already existed.
    pub async fn create_or_join(&self, call_name: &str, display_name: &str) -> Result<bool> {
        let response = self
            .perform_action(
                "create_or_join",
                json!({ "call_name": call_name, "display_name": display_name }),
            )
            .await?;
        Ok(response.response == "joined")
    }

    pub async fn lobby_join(&self) -> Result<()> {
        self.simple_action("lobby_join", json!({})).await
    }

    pub async fn get_call_data(&self) -> Result<CallData> {
        let response = self.perform_action("get_call_data", json!({})).await?;
        Ok(serde_json::from_value(response.data)?)
    }

    pub async fn set_mute(&self, audio_mute: bool, video_mute: bool) -> Result<()> {
        self.simple_action(
            "set_mute",
            json!({ "audio_mute": audio_mute, "video_mute": video_mute }),
        )
        .await
    }

    /// Route this network proxy's traffic to `server`
    pub async fn proxy_to(&self, server: &HomeServer) -> Result<()> {
        self.simple_action("proxy_to", json!({ "url": server.docker_url() }))
            .await
    }

    pub async fn disable_network(&self) -> Result<()> {
        self.simple_action("disable_network", json!({})).await
    }

    pub async fn enable_network(&self) -> Result<()> {
        self.simple_action("enable_network", json!({})).await
    }
}
