use std::sync::Arc;

use axum::extract::ws::{Message as BrowserMessage, WebSocket};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message as BackendMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::shared::config::RelaySettings;

/// Sees every text frame the backend sends towards the browser.
pub trait FrameObserver: Send + Sync {
    fn observe(&self, frame: &str);
}

#[derive(Debug, Clone)]
pub struct RelaySession {
    pub id: Uuid,
    pub uid: String,
    pub target: String,
    pub opened_at: DateTime<Utc>,
}

/// Open WebSocket pairs, for introspection and teardown accounting.
#[derive(Default)]
pub struct MirrorRegistry {
    sessions: DashMap<Uuid, RelaySession>,
}

impl MirrorRegistry {
    pub fn insert(&self, session: RelaySession) {
        self.sessions.insert(session.id, session);
    }

    pub fn count_for(&self, uid: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().uid == uid)
            .count()
    }

    pub fn remove(&self, id: &Uuid) -> Option<RelaySession> {
        self.sessions.remove(id).map(|(_, session)| session)
    }
}

#[cfg(test)]
impl MirrorRegistry {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

struct RegistryEntry {
    registry: Arc<MirrorRegistry>,
    id: Uuid,
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

fn to_backend(message: BrowserMessage) -> Option<BackendMessage> {
    match message {
        BrowserMessage::Text(text) => Some(BackendMessage::Text(text.as_str().to_string().into())),
        BrowserMessage::Binary(data) => Some(BackendMessage::Binary(data)),
        // axum answers browser pings itself
        BrowserMessage::Ping(_) | BrowserMessage::Pong(_) | BrowserMessage::Close(_) => None,
    }
}

fn to_browser(message: BackendMessage) -> Option<BrowserMessage> {
    match message {
        BackendMessage::Text(text) => Some(BrowserMessage::Text(text.as_str().to_string().into())),
        BackendMessage::Binary(data) => Some(BrowserMessage::Binary(data)),
        _ => None,
    }
}

/// Pairs a browser socket with a fresh backend socket and copies frames both
/// ways until either side closes or the pair goes idle.
pub async fn mirror(
    browser: WebSocket,
    uid: String,
    target: String,
    settings: RelaySettings,
    registry: Arc<MirrorRegistry>,
    observer: Option<Arc<dyn FrameObserver>>,
) {
    let id = Uuid::new_v4();
    registry.insert(RelaySession {
        id,
        uid: uid.clone(),
        target: target.clone(),
        opened_at: Utc::now(),
    });
    let _entry = RegistryEntry {
        registry: registry.clone(),
        id,
    };

    let (mut browser_tx, mut browser_rx) = browser.split();

    // Nothing is read from the browser until the backend socket is open.
    let (ready_tx, ready_rx) = oneshot::channel();
    let connect_target = target.clone();
    tokio::spawn(async move {
        let _ = ready_tx.send(connect_async(connect_target).await);
    });

    let backend = match timeout(settings.connect_timeout(), ready_rx).await {
        Ok(Ok(Ok((backend, _)))) => backend,
        Ok(Ok(Err(e))) => {
            warn!(uid = %uid, "Backend {} refused relay: {}", target, e);
            let _ = browser_tx.send(BrowserMessage::Close(None)).await;
            return;
        }
        Ok(Err(_)) | Err(_) => {
            warn!(uid = %uid, "Backend {} did not open within {:?}", target, settings.connect_timeout());
            let _ = browser_tx.send(BrowserMessage::Close(None)).await;
            return;
        }
    };
    info!(uid = %uid, session = %id, "Relaying to {}", target);

    let (mut backend_tx, mut backend_rx) = backend.split();

    let idle_timeout = settings.idle_timeout();
    let idle = sleep(idle_timeout);
    tokio::pin!(idle);

    let mut ping = interval(settings.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            incoming = browser_rx.next() => {
                let message = match incoming {
                    Some(Ok(BrowserMessage::Close(_))) | None => {
                        debug!(uid = %uid, session = %id, "Browser closed relay");
                        let _ = backend_tx.send(BackendMessage::Close(None)).await;
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(uid = %uid, session = %id, "Browser socket failed: {}", e);
                        let _ = backend_tx.send(BackendMessage::Close(None)).await;
                        break;
                    }
                    Some(Ok(message)) => message,
                };
                if let Some(frame) = to_backend(message) {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    if backend_tx.send(frame).await.is_err() {
                        let _ = browser_tx.send(BrowserMessage::Close(None)).await;
                        break;
                    }
                }
            }
            outgoing = backend_rx.next() => {
                let message = match outgoing {
                    Some(Ok(BackendMessage::Close(_))) | None => {
                        debug!(uid = %uid, session = %id, "Backend closed relay");
                        let _ = browser_tx.send(BrowserMessage::Close(None)).await;
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(uid = %uid, session = %id, "Backend socket failed: {}", e);
                        let _ = browser_tx.send(BrowserMessage::Close(None)).await;
                        break;
                    }
                    Some(Ok(message)) => message,
                };
                if let (Some(observer), BackendMessage::Text(text)) = (&observer, &message) {
                    observer.observe(text.as_str());
                }
                if let Some(frame) = to_browser(message) {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    if browser_tx.send(frame).await.is_err() {
                        let _ = backend_tx.send(BackendMessage::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if backend_tx.send(BackendMessage::Ping(Bytes::new())).await.is_err() {
                    let _ = browser_tx.send(BrowserMessage::Close(None)).await;
                    break;
                }
            }
            _ = &mut idle => {
                info!(uid = %uid, session = %id, "Relay idle for {:?}, closing", idle_timeout);
                let _ = backend_tx.send(BackendMessage::Close(None)).await;
                let _ = browser_tx.send(BrowserMessage::Close(None)).await;
                break;
            }
        }
    }

    info!(uid = %uid, session = %id, "Relay to {} closed", target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{State, WebSocketUpgrade},
        response::Response,
        routing::get,
        Router,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Recorder(Mutex<Vec<String>>);

    impl FrameObserver for Recorder {
        fn observe(&self, frame: &str) {
            self.0.lock().unwrap().push(frame.to_string());
        }
    }

    /// Echo backend that takes its time before accepting the upgrade.
    async fn slow_echo(ws: WebSocketUpgrade) -> Response {
        tokio::time::sleep(Duration::from_millis(300)).await;
        ws.on_upgrade(|mut socket| async move {
            let _ = socket
                .send(BrowserMessage::Text("hello from backend".to_string().into()))
                .await;
            while let Some(Ok(message)) = socket.recv().await {
                match message {
                    BrowserMessage::Text(text) => {
                        let reply = format!("echo:{}", text.as_str());
                        if socket.send(BrowserMessage::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    BrowserMessage::Close(_) => break,
                    _ => {}
                }
            }
        })
    }

    struct RelayFixture {
        target: String,
        settings: RelaySettings,
        registry: Arc<MirrorRegistry>,
        observer: Arc<Recorder>,
    }

    async fn relay_socket(State(fixture): State<Arc<RelayFixture>>, ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(move |socket| async move {
            let observer: Arc<dyn FrameObserver> = fixture.observer.clone();
            mirror(
                socket,
                "u1".to_string(),
                fixture.target.clone(),
                fixture.settings.clone(),
                fixture.registry.clone(),
                Some(observer),
            )
            .await;
        })
    }

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn start_relay(backend_path: &str, settings: RelaySettings) -> (std::net::SocketAddr, Arc<RelayFixture>) {
        let backend = serve(Router::new().route("/ws", get(slow_echo))).await;
        let fixture = Arc::new(RelayFixture {
            target: format!("ws://{}{}", backend, backend_path),
            settings,
            registry: Arc::new(MirrorRegistry::default()),
            observer: Arc::new(Recorder(Mutex::new(Vec::new()))),
        });
        let relay = serve(
            Router::new()
                .route("/relay", get(relay_socket))
                .with_state(fixture.clone()),
        )
        .await;
        (relay, fixture)
    }

    async fn next_text<S>(socket: &mut S) -> Option<String>
    where
        S: futures::Stream<Item = Result<BackendMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        timeout(Duration::from_secs(5), async {
            while let Some(Ok(message)) = socket.next().await {
                match message {
                    BackendMessage::Text(text) => return Some(text.as_str().to_string()),
                    BackendMessage::Close(_) => return None,
                    _ => {}
                }
            }
            None
        })
        .await
        .expect("timed out waiting for relay frame")
    }

    #[tokio::test]
    async fn first_browser_frame_waits_for_backend() {
        let (relay, fixture) = start_relay("/ws", RelaySettings::default()).await;

        let (mut browser, _) = connect_async(format!("ws://{}/relay", relay)).await.unwrap();
        // Sent before the backend has accepted; must not be lost.
        browser
            .send(BackendMessage::Text("first".to_string().into()))
            .await
            .unwrap();

        assert_eq!(next_text(&mut browser).await.as_deref(), Some("hello from backend"));
        assert_eq!(next_text(&mut browser).await.as_deref(), Some("echo:first"));

        let seen = fixture.observer.0.lock().unwrap().clone();
        assert_eq!(seen, vec!["hello from backend".to_string(), "echo:first".to_string()]);
        assert_eq!(fixture.registry.count_for("u1"), 1);
    }

    #[tokio::test]
    async fn browser_close_tears_down_the_pair() {
        let (relay, fixture) = start_relay("/ws", RelaySettings::default()).await;

        let (mut browser, _) = connect_async(format!("ws://{}/relay", relay)).await.unwrap();
        assert_eq!(next_text(&mut browser).await.as_deref(), Some("hello from backend"));
        browser.close(None).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while fixture.registry.len() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("relay session was not released");
    }

    #[tokio::test]
    async fn unreachable_backend_closes_the_browser() {
        let (relay, fixture) = start_relay("/missing", RelaySettings::default()).await;

        let (mut browser, _) = connect_async(format!("ws://{}/relay", relay)).await.unwrap();
        assert_eq!(next_text(&mut browser).await, None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fixture.registry.len(), 0);
    }

    #[tokio::test]
    async fn idle_pairs_are_closed() {
        let settings = RelaySettings {
            idle_timeout_secs: 1,
            ..RelaySettings::default()
        };
        let (relay, _) = start_relay("/ws", settings).await;

        let (mut browser, _) = connect_async(format!("ws://{}/relay", relay)).await.unwrap();
        assert_eq!(next_text(&mut browser).await.as_deref(), Some("hello from backend"));
        // No more traffic; the relay gives up after a second.
        assert_eq!(next_text(&mut browser).await, None);
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_their_own_frames() {
        let (relay, fixture) = start_relay("/ws", RelaySettings::default()).await;

        let browsers = (0..8).map(|n| {
            let url = format!("ws://{}/relay", relay);
            tokio::spawn(async move {
                let (mut browser, _) = connect_async(url).await.unwrap();
                browser
                    .send(BackendMessage::Text(format!("frame-{}", n).into()))
                    .await
                    .unwrap();
                assert_eq!(next_text(&mut browser).await.as_deref(), Some("hello from backend"));
                let echoed = next_text(&mut browser).await;
                browser.close(None).await.unwrap();
                echoed
            })
        });
        let echoed = futures::future::join_all(browsers).await;

        for (n, echo) in echoed.into_iter().enumerate() {
            assert_eq!(echo.unwrap(), Some(format!("echo:frame-{}", n)));
        }
        timeout(Duration::from_secs(5), async {
            while fixture.registry.len() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("relay sessions were not released");
    }
}
