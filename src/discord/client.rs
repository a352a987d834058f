//! Discord Rich Presence sink: a background connection task on the tokio runtime,
//! fed the latest presence through a watch channel.

use super::activity::set_activity;
use super::ipc::{DiscordError, Opcode, connect_any, read_frame, write_frame};
use crate::presence::{Presence, PresenceSink, SinkEvent, SinkHandlers, SinkUser};
use serde_json::{Value, json};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const MIN_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Code reported for failures that did not come from Discord itself.
pub const LOCAL_ERROR_CODE: i32 = -1;

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { current: min, min, max }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF, MAX_BACKOFF)
    }
}

pub struct DiscordIpcSink {
    runtime: Handle,
    presence_tx: watch::Sender<Option<Presence>>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: std_mpsc::Sender<SinkEvent>,
    events_rx: std_mpsc::Receiver<SinkEvent>,
    handlers: SinkHandlers,
    task: Option<JoinHandle<()>>,
}

impl DiscordIpcSink {
    /// The connection task is spawned onto `runtime` at `init`.
    pub fn new(runtime: Handle) -> Self {
        let (presence_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = std_mpsc::channel();
        Self {
            runtime,
            presence_tx,
            shutdown_tx,
            events_tx,
            events_rx,
            handlers: SinkHandlers::default(),
            task: None,
        }
    }
}

impl PresenceSink for DiscordIpcSink {
    fn init(&mut self, application_id: &str, handlers: SinkHandlers) {
        self.handlers = handlers;
        if self.task.is_some() {
            return;
        }
        let session = Session {
            app_id: application_id.to_string(),
            pid: std::process::id(),
            presence: self.presence_tx.subscribe(),
            shutdown: self.shutdown_tx.subscribe(),
            events: self.events_tx.clone(),
            nonce: 0,
        };
        self.task = Some(self.runtime.spawn(session.run()));
    }

    fn update_presence(&mut self, presence: &Presence) {
        self.presence_tx.send_if_modified(|current| {
            if current.as_ref() == Some(presence) {
                return false;
            }
            *current = Some(presence.clone());
            true
        });
    }

    fn run_callbacks(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handlers.dispatch(&event);
        }
    }

    fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        let Some(task) = self.task.take() else {
            return;
        };
        let finished = self
            .runtime
            .block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, task).await });
        if finished.is_err() {
            tracing::warn!("Discord connection did not close in time");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Lost { code: i32, message: String },
}

struct Session {
    app_id: String,
    pid: u32,
    presence: watch::Receiver<Option<Presence>>,
    shutdown: watch::Receiver<bool>,
    events: std_mpsc::Sender<SinkEvent>,
    nonce: u64,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Session {
    async fn run(self) {
        self.run_with(Backoff::default(), connect_any).await
    }

    /// Connects with `connect`, serves until the connection drops, then waits out
    /// the backoff and tries again. Returns once shutdown is requested.
    async fn run_with<C, F, S>(mut self, mut backoff: Backoff, mut connect: C)
    where
        C: FnMut() -> F,
        F: Future<Output = Result<S, DiscordError>>,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        loop {
            if *self.shutdown.borrow() {
                return;
            }
            match connect().await {
                Ok(stream) => match self.serve(stream, &mut backoff).await {
                    Ok(SessionEnd::Shutdown) => return,
                    Ok(SessionEnd::Lost { code, message }) => self.emit(SinkEvent::Disconnected { code, message }),
                    Err(e) => self.emit(SinkEvent::Disconnected {
                        code: LOCAL_ERROR_CODE,
                        message: e.to_string(),
                    }),
                },
                Err(e) => tracing::debug!(error = %e, "Discord not reachable"),
            }

            let delay = backoff.next_delay();
            tracing::debug!(?delay, "reconnecting to Discord");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, event: SinkEvent) {
        let _ = self.events.send(event);
    }

    fn next_nonce(&mut self) -> u64 {
        self.nonce += 1;
        self.nonce
    }

    /// Runs one connection until Discord drops it or shutdown is requested.
    async fn serve<S>(&mut self, stream: S, backoff: &mut Backoff) -> Result<SessionEnd, DiscordError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (frame_tx, mut frames) = mpsc::channel(16);
        // Frame reads are not cancel safe, so they get their own task.
        let _reader = AbortOnDrop(tokio::spawn(async move {
            loop {
                let frame = read_frame(&mut reader).await;
                let failed = frame.is_err();
                if frame_tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        }));

        write_frame(&mut writer, Opcode::Handshake, &json!({ "v": 1, "client_id": self.app_id })).await?;
        let mut ready = false;

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Lost { code: LOCAL_ERROR_CODE, message: "connection closed".into() });
                    };
                    let (op, body) = frame?;
                    match op {
                        Opcode::Frame => {
                            if self.handle_dispatch(&body) && !ready {
                                ready = true;
                                backoff.reset();
                                let latest = self.presence.borrow_and_update().clone();
                                if let Some(presence) = latest {
                                    self.send_activity(&mut writer, Some(&presence)).await?;
                                }
                            }
                        }
                        Opcode::Close => {
                            let code = body.get("code").and_then(Value::as_i64).unwrap_or(LOCAL_ERROR_CODE.into()) as i32;
                            let message = body.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
                            return Ok(SessionEnd::Lost { code, message });
                        }
                        Opcode::Ping => write_frame(&mut writer, Opcode::Pong, &body).await?,
                        Opcode::Pong | Opcode::Handshake => {}
                    }
                }
                changed = self.presence.changed(), if ready => {
                    if changed.is_err() {
                        return Ok(SessionEnd::Shutdown);
                    }
                    let latest = self.presence.borrow_and_update().clone();
                    self.send_activity(&mut writer, latest.as_ref()).await?;
                }
                _ = self.shutdown.changed() => {
                    if ready {
                        let _ = self.send_activity(&mut writer, None).await;
                    }
                    let _ = write_frame(&mut writer, Opcode::Close, &json!({})).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    async fn send_activity<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        presence: Option<&Presence>,
    ) -> Result<(), DiscordError> {
        let nonce = self.next_nonce();
        write_frame(writer, Opcode::Frame, &set_activity(self.pid, presence, nonce)).await
    }

    /// Queues callbacks for a dispatch frame. Returns true on READY.
    fn handle_dispatch(&self, body: &Value) -> bool {
        match body.get("evt").and_then(Value::as_str) {
            Some("READY") => {
                let user = body
                    .pointer("/data/user")
                    .cloned()
                    .and_then(|user| serde_json::from_value::<SinkUser>(user).ok())
                    .unwrap_or_default();
                self.emit(SinkEvent::Ready(user));
                true
            }
            Some("ERROR") => {
                let code = body.pointer("/data/code").and_then(Value::as_i64).unwrap_or(LOCAL_ERROR_CODE.into());
                let message = body
                    .pointer("/data/message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.emit(SinkEvent::Errored {
                    code: code as i32,
                    message,
                });
                false
            }
            _ => {
                tracing::trace!(?body, "Discord response");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn presence(details: &str) -> Presence {
        Presence {
            details: details.into(),
            state: "X - Y".into(),
            large_image_key: "mpv-logo".into(),
            large_image_text: "mpv".into(),
            ..Default::default()
        }
    }

    fn session(
        presence: &watch::Sender<Option<Presence>>,
        shutdown: &watch::Sender<bool>,
    ) -> (Session, std_mpsc::Receiver<SinkEvent>) {
        let (events, rx) = std_mpsc::channel();
        let session = Session {
            app_id: "1234".into(),
            pid: 99,
            presence: presence.subscribe(),
            shutdown: shutdown.subscribe(),
            events,
            nonce: 0,
        };
        (session, rx)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    async fn expect_frame(peer: &mut DuplexStream) -> (Opcode, Value) {
        tokio::time::timeout(Duration::from_secs(2), read_frame(peer)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn handshake_ready_and_latest_presence_are_sent() {
        let (presence_tx, _) = watch::channel(Some(presence("Playing (00:00:01/00:03:00)")));
        let (shutdown_tx, _) = watch::channel(false);
        let (mut session, events) = session(&presence_tx, &shutdown_tx);
        let (client, mut discord) = tokio::io::duplex(64 * 1024);

        let served = tokio::spawn(async move {
            let mut backoff = Backoff::default();
            session.serve(client, &mut backoff).await
        });

        let (op, hello) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Handshake);
        assert_eq!(hello, json!({"v": 1, "client_id": "1234"}));

        let ready = json!({"cmd": "DISPATCH", "evt": "READY", "data": {"user": {"id": "1", "username": "u"}}});
        write_frame(&mut discord, Opcode::Frame, &ready).await.unwrap();

        let (op, first) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Frame);
        assert_eq!(first["args"]["activity"]["details"], "Playing (00:00:01/00:03:00)");

        presence_tx.send_replace(Some(presence("Paused (00:00:02/00:03:00)")));
        let (_, second) = expect_frame(&mut discord).await;
        assert_eq!(second["args"]["activity"]["details"], "Paused (00:00:02/00:03:00)");

        write_frame(&mut discord, Opcode::Ping, &json!({"n": 1})).await.unwrap();
        assert_eq!(expect_frame(&mut discord).await, (Opcode::Pong, json!({"n": 1})));

        write_frame(&mut discord, Opcode::Close, &json!({"code": 4000, "message": "bye"})).await.unwrap();
        let end = served.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Lost { code: 4000, message: "bye".into() });

        let user = match events.try_recv().unwrap() {
            SinkEvent::Ready(user) => user,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(user.username, "u");
    }

    #[tokio::test]
    async fn nothing_is_sent_before_ready() {
        let (presence_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (mut session, events) = session(&presence_tx, &shutdown_tx);
        let (client, mut discord) = tokio::io::duplex(64 * 1024);

        let served = tokio::spawn(async move {
            let mut backoff = Backoff::default();
            session.serve(client, &mut backoff).await
        });
        let (op, _) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Handshake);

        presence_tx.send_replace(Some(presence("Playing")));
        let error = json!({"cmd": "DISPATCH", "evt": "ERROR", "data": {"code": 4000, "message": "Invalid Client ID"}});
        write_frame(&mut discord, Opcode::Frame, &error).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send_replace(true);
        let (op, _) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Close);
        assert_eq!(served.await.unwrap().unwrap(), SessionEnd::Shutdown);

        assert_eq!(
            events.try_recv().unwrap(),
            SinkEvent::Errored {
                code: 4000,
                message: "Invalid Client ID".into()
            }
        );
    }

    #[tokio::test]
    async fn shutdown_clears_activity_then_closes() {
        let (presence_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (mut session, _events) = session(&presence_tx, &shutdown_tx);
        let (client, mut discord) = tokio::io::duplex(64 * 1024);

        let served = tokio::spawn(async move {
            let mut backoff = Backoff::default();
            session.serve(client, &mut backoff).await
        });
        expect_frame(&mut discord).await;
        let ready = json!({"cmd": "DISPATCH", "evt": "READY", "data": {}});
        write_frame(&mut discord, Opcode::Frame, &ready).await.unwrap();
        // Give the session a moment to observe READY before the shutdown lands.
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send_replace(true);
        let (op, cleared) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Frame);
        assert!(cleared["args"]["activity"].is_null());
        let (op, _) = expect_frame(&mut discord).await;
        assert_eq!(op, Opcode::Close);
        assert_eq!(served.await.unwrap().unwrap(), SessionEnd::Shutdown);
    }

    #[test]
    fn callbacks_wait_for_run_callbacks() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut sink = DiscordIpcSink::new(rt.handle().clone());
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = std::sync::Arc::clone(&seen);
        sink.handlers = SinkHandlers {
            errored: Box::new(move |code, _| log.lock().unwrap().push(code)),
            ..Default::default()
        };

        sink.events_tx
            .send(SinkEvent::Errored {
                code: 4000,
                message: String::new(),
            })
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        sink.run_callbacks();
        assert_eq!(*seen.lock().unwrap(), vec![4000]);
        sink.shutdown();
    }

    #[tokio::test]
    async fn reconnect_resends_the_latest_presence() {
        let (presence_tx, _) = watch::channel(Some(presence("Playing (00:00:01/00:03:00)")));
        let (shutdown_tx, _) = watch::channel(false);
        let (session, events) = session(&presence_tx, &shutdown_tx);
        let (first, mut discord_a) = tokio::io::duplex(64 * 1024);
        let (second, mut discord_b) = tokio::io::duplex(64 * 1024);
        let streams = std::sync::Arc::new(std::sync::Mutex::new(std::collections::VecDeque::from([first, second])));

        let connect = move || {
            let next = streams.lock().unwrap().pop_front();
            async move { next.ok_or(DiscordError::NotRunning) }
        };
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(20));
        let task = tokio::spawn(session.run_with(backoff, connect));
        let ready = json!({"cmd": "DISPATCH", "evt": "READY", "data": {"user": {"username": "u"}}});

        assert_eq!(expect_frame(&mut discord_a).await.0, Opcode::Handshake);
        write_frame(&mut discord_a, Opcode::Frame, &ready).await.unwrap();
        expect_frame(&mut discord_a).await;
        presence_tx.send_replace(Some(presence("Paused (00:00:02/00:03:00)")));
        let (_, latest) = expect_frame(&mut discord_a).await;
        assert_eq!(latest["args"]["activity"]["details"], "Paused (00:00:02/00:03:00)");
        write_frame(&mut discord_a, Opcode::Close, &json!({"code": 1000, "message": "bye"})).await.unwrap();

        assert_eq!(expect_frame(&mut discord_b).await.0, Opcode::Handshake);
        write_frame(&mut discord_b, Opcode::Frame, &ready).await.unwrap();
        let (op, resent) = expect_frame(&mut discord_b).await;
        assert_eq!(op, Opcode::Frame);
        assert_eq!(resent["args"]["activity"]["details"], "Paused (00:00:02/00:03:00)");

        shutdown_tx.send_replace(true);
        let (_, cleared) = expect_frame(&mut discord_b).await;
        assert!(cleared["args"]["activity"].is_null());
        assert_eq!(expect_frame(&mut discord_b).await.0, Opcode::Close);
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        let received: Vec<SinkEvent> = events.try_iter().collect();
        assert!(matches!(received[0], SinkEvent::Ready(_)));
        assert_eq!(
            received[1],
            SinkEvent::Disconnected {
                code: 1000,
                message: "bye".into()
            }
        );
        assert!(matches!(received[2], SinkEvent::Ready(_)));
        assert_eq!(received.len(), 3);
    }
}
