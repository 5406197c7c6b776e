use crate::auth::{Caller, IdentityProvider};
use crate::error::{AppError, AppResult};
use crate::realtime::{ChangeFeed, ChannelKey, Projector, Subscription, ViewEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },
    #[serde(rename = "subscribe")]
    Subscribe {
        channel: String, // "wishlist:{id}:gifts", "gift:{id}:contributions", ...
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { channel: String },
    #[serde(rename = "connected")]
    Connected { client_id: Uuid },
    #[serde(rename = "authenticated")]
    Authenticated { user_id: Option<Uuid> },
    #[serde(rename = "subscribed")]
    Subscribed { channel: String },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { channel: String },
    #[serde(rename = "event")]
    Event { event: ViewEvent },
    #[serde(rename = "error")]
    Error { message: String },
}

type SharedSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

async fn send<S>(sink: &SharedSink<S>, message: &WsMessage) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;
    sink.lock()
        .await
        .send(Message::Text(json))
        .await
        .map_err(|e| AppError::Message(format!("WebSocket send failed: {}", e)))
}

/// Realtime edge: forwards change-feed events to connected viewers, each
/// event redacted for that connection's caller
#[derive(Clone)]
pub struct WebSocketServer {
    feed: Arc<ChangeFeed>,
    projector: Projector,
    identity: Arc<dyn IdentityProvider>,
    /// Active subscriptions: client_id -> channels
    client_channels: Arc<RwLock<HashMap<Uuid, Vec<ChannelKey>>>>,
}

impl WebSocketServer {
    pub fn new(feed: Arc<ChangeFeed>, projector: Projector, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            feed,
            projector,
            identity,
            client_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Accept connections until the listener fails
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New WebSocket connection from {}", addr);
                    let ws = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ws.handle_connection(stream).await {
                            error!("WebSocket connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("WebSocket accept error: {}", e);
                }
            }
        }
    }

    /// Number of clients currently connected
    pub async fn connection_count(&self) -> usize {
        self.client_channels.read().await.len()
    }

    /// Serve one connection until the client closes it
    pub async fn handle_connection<S>(&self, stream: S) -> AppResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AppError::Message(format!("WebSocket handshake failed: {}", e)))?;

        let (ws_sender, mut ws_receiver) = ws_stream.split();
        let sink: SharedSink<S> = Arc::new(Mutex::new(ws_sender));
        let client_id = Uuid::new_v4();
        let caller = Arc::new(RwLock::new(Caller::anonymous()));
        let mut forwarders: HashMap<ChannelKey, JoinHandle<()>> = HashMap::new();

        self.client_channels.write().await.insert(client_id, Vec::new());
        info!("New WebSocket client: {}", client_id);

        if let Err(e) = send(&sink, &WsMessage::Connected { client_id }).await {
            warn!("Failed to send welcome message: {}", e);
        }

        while let Some(msg) = ws_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed: {}", client_id);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => continue,
            };

            let reply = match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Authenticate { token }) => {
                    match Caller::resolve(self.identity.as_ref(), Some(token.as_str())).await {
                        Ok(resolved) => {
                            let user_id = resolved.user_id();
                            *caller.write().await = resolved;
                            info!("Client {} authenticated as {:?}", client_id, user_id);
                            WsMessage::Authenticated { user_id }
                        }
                        Err(e) => WsMessage::Error {
                            message: e.to_string(),
                        },
                    }
                }
                Ok(WsMessage::Subscribe { channel }) => match channel.parse::<ChannelKey>() {
                    Ok(key) => {
                        if !forwarders.contains_key(&key) {
                            let subscription = self.feed.subscribe(key).await;
                            let handle =
                                self.spawn_forwarder(client_id, subscription, caller.clone(), sink.clone());
                            forwarders.insert(key, handle);
                            self.track(client_id, key).await;
                        }
                        WsMessage::Subscribed { channel }
                    }
                    Err(message) => WsMessage::Error { message },
                },
                Ok(WsMessage::Unsubscribe { channel }) => match channel.parse::<ChannelKey>() {
                    Ok(key) => {
                        if let Some(handle) = forwarders.remove(&key) {
                            handle.abort();
                            self.untrack(client_id, key).await;
                        }
                        WsMessage::Unsubscribed { channel }
                    }
                    Err(message) => WsMessage::Error { message },
                },
                Ok(_) => {
                    warn!("Unexpected message type from client {}", client_id);
                    WsMessage::Error {
                        message: "Unexpected message type".to_string(),
                    }
                }
                Err(_) => {
                    warn!("Failed to parse message from client {}: {}", client_id, text);
                    WsMessage::Error {
                        message: "Invalid message format".to_string(),
                    }
                }
            };

            if let Err(e) = send(&sink, &reply).await {
                warn!("Failed to reply to client {}: {}", client_id, e);
                break;
            }
        }

        // Clean up all subscriptions for this client
        for (_, handle) in forwarders.drain() {
            handle.abort();
        }
        self.client_channels.write().await.remove(&client_id);
        let pruned = self.feed.prune().await;
        debug!("Client {} gone, pruned {} idle channels", client_id, pruned);

        Ok(())
    }

    fn spawn_forwarder<S>(
        &self,
        client_id: Uuid,
        mut subscription: Subscription,
        caller: Arc<RwLock<Caller>>,
        sink: SharedSink<S>,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let projector = self.projector.clone();

        tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let viewer = caller.read().await.clone();

                let event = match projector.project(&viewer, &event).await {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Could not project event for client {}: {}", client_id, e);
                        continue;
                    }
                };

                if let Err(e) = send(&sink, &WsMessage::Event { event }).await {
                    error!("Failed to send message to client {}: {}", client_id, e);
                    break;
                }
            }
        })
    }

    async fn track(&self, client_id: Uuid, key: ChannelKey) {
        let mut client_channels = self.client_channels.write().await;
        client_channels.entry(client_id).or_default().push(key);
        info!("Client {} subscribed to {}", client_id, key);
    }

    async fn untrack(&self, client_id: Uuid, key: ChannelKey) {
        let mut client_channels = self.client_channels.write().await;
        if let Some(channels) = client_channels.get_mut(&client_id) {
            channels.retain(|c| *c != key);
        }
        info!("Client {} unsubscribed from {}", client_id, key);
    }
}
