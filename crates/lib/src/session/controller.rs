//! Session controller: one conversation's message log and its send state machine.
//!
//! `Idle → Sending → Streaming → Idle`, or `Idle → Sending → Failed → Idle`. At most one send
//! is in flight; a second `send_message` while not idle is rejected without touching the log.
//! The reply is consumed on a background task that appends each chunk to a single sentinel
//! message and persists the whole log after every change.
//!
//! Every send carries the epoch it started under. Clearing the conversation (or shutting the
//! session down) bumps the epoch: the in-flight task drops its stream and every later chunk
//! or completion is discarded instead of being applied to the reset log.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::identity::Identity;
use super::message::Message;
use super::store::{KeyValueStore, StoreError};
use super::HISTORY_KEY;
use crate::llm::ChatMessage;
use crate::prompt;
use crate::relay::{ChatTransport, RelayError, SseDecoder, SseEvent};
use crate::status::{ConnectivityState, HealthCheck, StatusProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    /// Request issued, nothing received yet.
    Sending,
    /// At least one event received.
    Streaming,
    /// Transient: the apology is being recorded.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("a reply is still in progress")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a background send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Reply finalized (or the model returned nothing).
    Completed,
    /// The apology message was appended.
    Failed,
    /// The conversation was reset or shut down; the result was dropped.
    Discarded,
}

/// Handle to an accepted send. Dropping it does not cancel the send.
pub struct SendTask {
    handle: JoinHandle<SendOutcome>,
}

impl SendTask {
    /// Wait for the reply to finish streaming.
    pub async fn wait(self) -> SendOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("send task ended abnormally: {}", e);
                SendOutcome::Discarded
            }
        }
    }
}

/// Session settings.
pub struct SessionConfig {
    pub system_prompt: String,
    /// Connectivity probing; None leaves the state at `checking`.
    pub health_check: Option<Arc<dyn HealthCheck>>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: prompt::SYSTEM_PROMPT.to_string(),
            health_check: None,
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

struct LogState {
    messages: Vec<Message>,
    state: SendState,
    epoch: u64,
}

struct Shared {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn KeyValueStore>,
    system_prompt: String,
    log: Mutex<LogState>,
    identity: Mutex<Identity>,
    snapshot_tx: watch::Sender<Vec<Message>>,
    epoch_tx: watch::Sender<u64>,
    prober: Option<StatusProber>,
}

/// Cheap-to-clone handle to one conversation.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Load the conversation and identity from `store` and start probing if configured.
    /// An absent log is seeded with the welcome message and written back.
    pub async fn load(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn KeyValueStore>,
        config: SessionConfig,
    ) -> Result<Self, StoreError> {
        let (mut messages, seeded) = match store.get(HISTORY_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(m) if !m.is_empty() => (m, false),
                Ok(_) => (vec![Message::welcome()], true),
                Err(e) => {
                    log::warn!("ignoring malformed conversation log: {}", e);
                    (vec![Message::welcome()], true)
                }
            },
            None => (vec![Message::welcome()], true),
        };
        // A sentinel left behind by an interrupted process keeps its partial content.
        let interrupted = finalize_sentinel(&mut messages);
        if interrupted {
            log::info!("finalized a reply interrupted in a previous session");
        }

        let identity = Identity::load(store.as_ref()).await?;
        let prober = config.health_check.map(|target| {
            StatusProber::start(target, config.probe_interval, config.probe_timeout)
        });
        let (snapshot_tx, _) = watch::channel(messages.clone());
        let (epoch_tx, _) = watch::channel(0);

        let controller = Self {
            shared: Arc::new(Shared {
                transport,
                store,
                system_prompt: config.system_prompt,
                log: Mutex::new(LogState {
                    messages,
                    state: SendState::Idle,
                    epoch: 0,
                }),
                identity: Mutex::new(identity),
                snapshot_tx,
                epoch_tx,
                prober,
            }),
        };
        if seeded || interrupted {
            let log = controller.shared.log.lock().await;
            controller.shared.persist_log(&log).await;
        }
        Ok(controller)
    }

    /// Append a user message and start streaming the reply in the background.
    ///
    /// Rejected without side effects when `text` is blank or a reply is still in progress.
    pub async fn send_message(&self, text: &str) -> Result<SendTask, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::InvalidInput("message is empty"));
        }
        let (history, ticket) = {
            let mut log = self.shared.log.lock().await;
            if log.state != SendState::Idle {
                log::debug!("send rejected: session is {:?}", log.state);
                return Err(SessionError::Busy);
            }
            log.messages.push(Message::user(text));
            log.state = SendState::Sending;
            self.shared.persist_log(&log).await;
            let history: Vec<ChatMessage> = log.messages.iter().map(Message::to_chat).collect();
            (history, log.epoch)
        };
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { shared.run_send(history, ticket).await });
        Ok(SendTask { handle })
    }

    /// Reset the log to a fresh welcome message. Any in-flight reply is abandoned.
    pub async fn clear_conversation(&self) {
        let mut log = self.shared.log.lock().await;
        self.shared.bump_epoch(&mut log);
        log.messages = vec![Message::welcome()];
        log.state = SendState::Idle;
        self.shared.persist_log(&log).await;
    }

    pub async fn set_display_name(&self, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidInput("display name is empty"));
        }
        let mut identity = self.shared.identity.lock().await;
        identity
            .save_display_name(self.shared.store.as_ref(), name)
            .await?;
        Ok(())
    }

    /// New avatar references for both participants; returns the updated identity.
    pub async fn regenerate_avatars(&self) -> Result<Identity, SessionError> {
        let mut identity = self.shared.identity.lock().await;
        identity
            .regenerate_avatars(self.shared.store.as_ref())
            .await?;
        Ok(identity.clone())
    }

    pub async fn identity(&self) -> Identity {
        self.shared.identity.lock().await.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.shared.log.lock().await.messages.clone()
    }

    pub async fn state(&self) -> SendState {
        self.shared.log.lock().await.state
    }

    /// Log snapshots, published after every persisted change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.shared
            .prober
            .as_ref()
            .map(StatusProber::current)
            .unwrap_or(ConnectivityState::Checking)
    }

    /// Connectivity changes; None when the session was built without a health check.
    pub fn subscribe_connectivity(&self) -> Option<watch::Receiver<ConnectivityState>> {
        self.shared.prober.as_ref().map(StatusProber::subscribe)
    }

    /// Stop probing and abandon any in-flight reply. Partial reply content is kept.
    pub async fn shutdown(&self) {
        if let Some(prober) = &self.shared.prober {
            prober.stop();
        }
        let mut log = self.shared.log.lock().await;
        self.shared.bump_epoch(&mut log);
        let was_busy = log.state != SendState::Idle;
        log.state = SendState::Idle;
        if finalize_sentinel(&mut log.messages) || was_busy {
            self.shared.persist_log(&log).await;
        }
    }
}

/// Give a leftover sentinel a permanent id. Returns true if one was found.
fn finalize_sentinel(messages: &mut [Message]) -> bool {
    match messages.last_mut() {
        Some(last) if last.is_streaming() => {
            last.finalize();
            true
        }
        _ => false,
    }
}

/// Resolves once the epoch differs from `ticket`.
async fn stale(epoch_rx: &mut watch::Receiver<u64>, ticket: u64) {
    loop {
        if *epoch_rx.borrow_and_update() != ticket {
            return;
        }
        if epoch_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Shared {
    fn bump_epoch(&self, log: &mut LogState) {
        log.epoch += 1;
        self.epoch_tx.send_replace(log.epoch);
    }

    /// Write the whole log and publish a snapshot. Store failures are logged; the in-memory
    /// log stays authoritative.
    async fn persist_log(&self, log: &LogState) {
        match serde_json::to_string(&log.messages) {
            Ok(json) => {
                if let Err(e) = self.store.set(HISTORY_KEY, json).await {
                    log::warn!("failed to persist conversation log: {}", e);
                }
            }
            Err(e) => log::warn!("failed to encode conversation log: {}", e),
        }
        self.snapshot_tx.send_replace(log.messages.clone());
    }

    async fn run_send(&self, history: Vec<ChatMessage>, ticket: u64) -> SendOutcome {
        let mut epoch_rx = self.epoch_tx.subscribe();
        let opened = tokio::select! {
            opened = self.transport.stream_chat(history, &self.system_prompt) => opened,
            _ = stale(&mut epoch_rx, ticket) => {
                log::debug!("send abandoned before the reply started");
                return SendOutcome::Discarded;
            }
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(ticket, e).await,
        };

        let mut decoder = SseDecoder::new();
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = stale(&mut epoch_rx, ticket) => {
                    log::debug!("send abandoned mid-stream");
                    return SendOutcome::Discarded;
                }
            };
            let (events, ended) = match next {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) => return self.fail(ticket, e).await,
                None => (decoder.finish(), true),
            };
            for event in events {
                match event {
                    SseEvent::Chunk(chunk) => {
                        if !self.apply_chunk(ticket, &chunk.text).await {
                            return SendOutcome::Discarded;
                        }
                        if chunk.done {
                            return self.complete(ticket).await;
                        }
                    }
                    SseEvent::Done => return self.complete(ticket).await,
                    SseEvent::Error(message) => {
                        return self.fail(ticket, RelayError::UpstreamStream(message)).await;
                    }
                }
            }
            if ended {
                return self.complete(ticket).await;
            }
        }
    }

    /// Append `text` to the sentinel, creating it on first content. False if stale.
    async fn apply_chunk(&self, ticket: u64, text: &str) -> bool {
        let mut log = self.log.lock().await;
        if log.epoch != ticket {
            return false;
        }
        if log.state == SendState::Sending {
            log.state = SendState::Streaming;
        }
        if text.is_empty() {
            return true;
        }
        match log.messages.last_mut() {
            Some(last) if last.is_streaming() => last.content.push_str(text),
            _ => log.messages.push(Message::streaming(text)),
        }
        self.persist_log(&log).await;
        true
    }

    async fn complete(&self, ticket: u64) -> SendOutcome {
        let mut log = self.log.lock().await;
        if log.epoch != ticket {
            return SendOutcome::Discarded;
        }
        finalize_sentinel(&mut log.messages);
        log.state = SendState::Idle;
        self.persist_log(&log).await;
        SendOutcome::Completed
    }

    async fn fail(&self, ticket: u64, err: RelayError) -> SendOutcome {
        log::warn!("chat reply failed: {}", err);
        let mut log = self.log.lock().await;
        if log.epoch != ticket {
            return SendOutcome::Discarded;
        }
        log.state = SendState::Failed;
        if log.messages.last().is_some_and(Message::is_streaming) {
            log.messages.pop();
        }
        log.messages
            .push(Message::assistant(prompt::APOLOGY_MESSAGE));
        log.state = SendState::Idle;
        self.persist_log(&log).await;
        SendOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::SseStream;
    use crate::session::{MemoryStore, Role, STREAMING_ID, WELCOME_ID};
    use async_trait::async_trait;
    use axum::body::Bytes;
    use futures_util::stream;
    use tokio::sync::mpsc;

    /// Transport whose reply bytes are fed by the test through a channel.
    struct Scripted {
        feeds: std::sync::Mutex<Vec<mpsc::UnboundedReceiver<Result<Bytes, RelayError>>>>,
        seen: std::sync::Mutex<Vec<(Vec<ChatMessage>, String)>>,
    }

    impl Scripted {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Bytes, RelayError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let t = Arc::new(Self {
                feeds: std::sync::Mutex::new(vec![rx]),
                seen: std::sync::Mutex::new(Vec::new()),
            });
            (t, tx)
        }
    }

    #[async_trait]
    impl ChatTransport for Scripted {
        async fn stream_chat(
            &self,
            messages: Vec<ChatMessage>,
            system_prompt: &str,
        ) -> Result<SseStream, RelayError> {
            self.seen
                .lock()
                .unwrap()
                .push((messages, system_prompt.to_string()));
            let rx = self
                .feeds
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| RelayError::UpstreamUnavailable("no feed".to_string()))?;
            Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed())
        }
    }

    /// Transport that refuses every connection.
    struct Down;

    #[async_trait]
    impl ChatTransport for Down {
        async fn stream_chat(
            &self,
            _messages: Vec<ChatMessage>,
            _system_prompt: &str,
        ) -> Result<SseStream, RelayError> {
            Err(RelayError::UpstreamUnavailable("connection refused".to_string()))
        }
    }

    fn chunk(text: &str, done: bool) -> Result<Bytes, RelayError> {
        Ok(SseEvent::chunk(text, done).encode())
    }

    async fn controller(transport: Arc<dyn ChatTransport>) -> (SessionController, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let c = SessionController::load(transport, store.clone(), SessionConfig::default())
            .await
            .unwrap();
        (c, store)
    }

    async fn persisted(store: &MemoryStore) -> Vec<Message> {
        let raw = store.get(HISTORY_KEY).await.unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn fresh_session_is_seeded_and_persisted() {
        let (c, store) = controller(Arc::new(Down)).await;
        let messages = c.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, WELCOME_ID);
        assert_eq!(persisted(&store).await, messages);
        assert_eq!(c.state().await, SendState::Idle);
        assert_eq!(c.connectivity(), ConnectivityState::Checking);
    }

    #[tokio::test]
    async fn blank_message_rejected() {
        let (c, _) = controller(Arc::new(Down)).await;
        assert!(matches!(
            c.send_message("   \n").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert_eq!(c.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn incremental_visibility_then_permanent_id() {
        let (t, feed) = Scripted::new();
        let (c, store) = controller(t.clone()).await;
        let mut rx = c.subscribe();
        let task = c.send_message("hello?").await.unwrap();
        rx.borrow_and_update();

        feed.send(chunk("Hel", false)).unwrap();
        rx.changed().await.unwrap();
        {
            let snap = rx.borrow_and_update().clone();
            let last = snap.last().unwrap();
            assert_eq!(last.id, STREAMING_ID);
            assert_eq!(last.content, "Hel");
            assert_eq!(persisted(&store).await, snap);
        }
        assert_eq!(c.state().await, SendState::Streaming);

        feed.send(chunk("lo", false)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().last().unwrap().content, "Hello");

        feed.send(chunk("", true)).unwrap();
        assert_eq!(task.wait().await, SendOutcome::Completed);

        let messages = c.messages().await;
        assert_eq!(messages.len(), 3);
        let reply = &messages[2];
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Hello");
        assert_ne!(reply.id, STREAMING_ID);
        assert_eq!(c.state().await, SendState::Idle);
        assert_eq!(persisted(&store).await, messages);

        let seen = t.seen.lock().unwrap();
        let (history, system_prompt) = &seen[0];
        assert_eq!(system_prompt, prompt::SYSTEM_PROMPT);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], ChatMessage::user("hello?"));
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_noop() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let first = c.send_message("one").await.unwrap();
        assert!(matches!(c.send_message("two").await, Err(SessionError::Busy)));
        assert_eq!(c.messages().await.len(), 2);

        feed.send(chunk("ok", true)).unwrap();
        assert_eq!(first.wait().await, SendOutcome::Completed);
        let users = c
            .messages()
            .await
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        assert_eq!(users, 1);
    }

    #[tokio::test]
    async fn earlier_messages_never_mutate() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let task = c.send_message("hi").await.unwrap();
        let before = c.messages().await;
        feed.send(chunk("a", false)).unwrap();
        feed.send(chunk("b", false)).unwrap();
        feed.send(Ok(SseEvent::Done.encode())).unwrap();
        assert_eq!(task.wait().await, SendOutcome::Completed);
        let after = c.messages().await;
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.last().unwrap().content, "ab");
    }

    #[tokio::test]
    async fn malformed_event_is_skipped() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let task = c.send_message("hi").await.unwrap();
        feed.send(Ok(Bytes::from_static(b"data: {oops\n\n"))).unwrap();
        feed.send(chunk("ok", true)).unwrap();
        assert_eq!(task.wait().await, SendOutcome::Completed);
        let messages = c.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "ok");
    }

    #[tokio::test]
    async fn upstream_down_appends_apology() {
        let (c, store) = controller(Arc::new(Down)).await;
        let task = c.send_message("hi").await.unwrap();
        assert_eq!(task.wait().await, SendOutcome::Failed);
        let messages = c.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, prompt::APOLOGY_MESSAGE);
        assert_ne!(messages[2].id, messages[1].id);
        assert_eq!(c.state().await, SendState::Idle);
        assert_eq!(persisted(&store).await, messages);

        // still usable afterwards
        assert!(c.send_message("again").await.is_ok());
    }

    #[tokio::test]
    async fn mid_stream_error_leaves_no_sentinel() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let mut rx = c.subscribe();
        let task = c.send_message("hi").await.unwrap();
        rx.borrow_and_update();
        feed.send(chunk("partial", false)).unwrap();
        rx.changed().await.unwrap();
        feed.send(Err(RelayError::UpstreamStream("reset".to_string())))
            .unwrap();
        assert_eq!(task.wait().await, SendOutcome::Failed);
        let messages = c.messages().await;
        assert!(messages.iter().all(|m| !m.is_streaming()));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, prompt::APOLOGY_MESSAGE);
    }

    #[tokio::test]
    async fn in_band_error_event_fails_send() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let task = c.send_message("hi").await.unwrap();
        feed.send(Ok(SseEvent::Error("Ollama API request failed".to_string()).encode()))
            .unwrap();
        assert_eq!(task.wait().await, SendOutcome::Failed);
        assert_eq!(
            c.messages().await.last().unwrap().content,
            prompt::APOLOGY_MESSAGE
        );
    }

    #[tokio::test]
    async fn stream_end_without_done_finalizes() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let task = c.send_message("hi").await.unwrap();
        feed.send(chunk("bye", false)).unwrap();
        drop(feed);
        assert_eq!(task.wait().await, SendOutcome::Completed);
        let last = c.messages().await.pop().unwrap();
        assert_eq!(last.content, "bye");
        assert!(!last.is_streaming());
    }

    #[tokio::test]
    async fn clear_during_stream_discards_reply() {
        let (t, feed) = Scripted::new();
        let (c, store) = controller(t).await;
        let mut rx = c.subscribe();
        let task = c.send_message("hi").await.unwrap();
        rx.borrow_and_update();
        feed.send(chunk("Hel", false)).unwrap();
        rx.changed().await.unwrap();

        c.clear_conversation().await;
        assert_eq!(c.state().await, SendState::Idle);

        // late chunks and completion are dropped; sending may fail once the task is gone
        let _ = feed.send(chunk("lo", false));
        let _ = feed.send(chunk("", true));
        assert_eq!(task.wait().await, SendOutcome::Discarded);

        let messages = c.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, WELCOME_ID);
        assert_eq!(persisted(&store).await, messages);
    }

    #[tokio::test]
    async fn identity_setters_persist() {
        let (c, store) = controller(Arc::new(Down)).await;
        assert!(matches!(
            c.set_display_name("  ").await,
            Err(SessionError::InvalidInput(_))
        ));
        c.set_display_name(" Ada ").await.unwrap();
        assert_eq!(c.identity().await.display_name, "Ada");
        let before = c.identity().await;
        let after = c.regenerate_avatars().await.unwrap();
        assert_eq!(after.display_name, "Ada");

        let reloaded = controller_on(store).await;
        let identity = reloaded.identity().await;
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.user_avatar, after.user_avatar);
        assert!(before.user_avatar.contains("avataaars"));
    }

    async fn controller_on(store: Arc<MemoryStore>) -> SessionController {
        SessionController::load(Arc::new(Down), store, SessionConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn persisted_log_survives_reload_and_sentinel_is_finalized() {
        let store = Arc::new(MemoryStore::new());
        let log = vec![Message::welcome(), Message::user("hi"), Message::streaming("half")];
        store
            .set(HISTORY_KEY, serde_json::to_string(&log).unwrap())
            .await
            .unwrap();
        let c = controller_on(store.clone()).await;
        let messages = c.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "half");
        assert!(!messages[2].is_streaming());
        assert_eq!(persisted(&store).await, messages);
    }

    #[tokio::test]
    async fn shutdown_abandons_in_flight_send() {
        let (t, feed) = Scripted::new();
        let (c, _) = controller(t).await;
        let task = c.send_message("hi").await.unwrap();
        c.shutdown().await;
        let _ = feed.send(chunk("late", true));
        assert_eq!(task.wait().await, SendOutcome::Discarded);
        assert_eq!(c.messages().await.len(), 2);
        assert_eq!(c.state().await, SendState::Idle);
    }

    /// Health target whose checks never return.
    struct Stalled;

    #[async_trait]
    impl HealthCheck for Stalled {
        async fn check(&self, _timeout: Duration) -> Result<(), crate::status::ProbeError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_check_leaves_stream_alone() {
        let (t, feed) = Scripted::new();
        let config = SessionConfig {
            health_check: Some(Arc::new(Stalled)),
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            ..SessionConfig::default()
        };
        let c = SessionController::load(t, Arc::new(MemoryStore::new()), config)
            .await
            .unwrap();
        assert_eq!(c.connectivity(), ConnectivityState::Checking);

        let mut rx = c.subscribe();
        let task = c.send_message("hi").await.unwrap();
        rx.borrow_and_update();
        feed.send(chunk("Hel", false)).unwrap();
        rx.changed().await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(c.connectivity(), ConnectivityState::Offline);
        assert_eq!(c.state().await, SendState::Streaming);
        let last = c.messages().await.pop().unwrap();
        assert!(last.is_streaming());
        assert_eq!(last.content, "Hel");

        feed.send(chunk("lo", true)).unwrap();
        assert_eq!(task.wait().await, SendOutcome::Completed);
        assert_eq!(c.messages().await.pop().unwrap().content, "Hello");
        assert_eq!(c.state().await, SendState::Idle);
        c.shutdown().await;
    }
}
