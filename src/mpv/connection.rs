//! JSON IPC connection to a running mpv and synchronous property access over it.

use super::events::{IDLE_ACTIVE_PROPERTY, Incoming, IpcMessage, MpvEvents, parse_event};
use super::property::node_from_json;
use crate::host::{HostError, HostEvent, PropertySource, PropertyValue};
use crate::transport;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

const TIMEOUT: Duration = Duration::from_millis(5000);
const IDLE_OBSERVER_ID: u64 = 1;

struct Request {
    id: u64,
    line: String,
    reply: oneshot::Sender<Reply>,
}

#[derive(Debug)]
struct Reply {
    error: String,
    data: Value,
}

/// Command side of the connection. Calls block the current thread, so they must be
/// made from outside the async runtime.
pub struct MpvConnection {
    runtime: Handle,
    requests: mpsc::UnboundedSender<Request>,
    next_id: AtomicU64,
}

/// Connect to mpv's `--input-ipc-server` socket.
pub async fn connect(path: &Path) -> Result<(MpvConnection, MpvEvents), HostError> {
    let stream = transport::connect(path).await?;
    tracing::info!(socket = %path.display(), "connected to mpv");
    attach(stream).await
}

/// Run the IPC protocol over an already open stream.
pub async fn attach<S>(stream: S) -> Result<(MpvConnection, MpvEvents), HostError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(io_loop(reader, writer, request_rx, event_tx.clone()));

    let connection = MpvConnection {
        runtime: Handle::current(),
        requests: request_tx,
        next_id: AtomicU64::new(1),
    };
    connection
        .request(json!(["observe_property", IDLE_OBSERVER_ID, IDLE_ACTIVE_PROPERTY]))
        .await?;

    // A file that was already loaded before we attached never produces file-loaded.
    match connection.request(json!(["get_property", IDLE_ACTIVE_PROPERTY])).await {
        Ok(Value::Bool(false)) => {
            tracing::debug!("mpv is already playing a file");
            let _ = event_tx.send(Incoming::Event(HostEvent::FileLoaded));
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "could not read idle state at attach"),
    }
    Ok((connection, MpvEvents::new(event_rx, event_tx)))
}

impl MpvConnection {
    async fn request(&self, command: Value) -> Result<Value, HostError> {
        let label = command.get(0).and_then(Value::as_str).unwrap_or("?").to_string();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request { id, line, reply: reply_tx })
            .map_err(|_| HostError::Disconnected)?;

        let reply = match tokio::time::timeout(TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(HostError::Disconnected),
            Err(_) => return Err(HostError::Timeout(TIMEOUT)),
        };
        if reply.error == "success" {
            Ok(reply.data)
        } else {
            Err(HostError::Command {
                command: label,
                reason: reply.error,
            })
        }
    }

    /// Send a raw command and wait for its `data`.
    pub fn command(&self, command: Value) -> Result<Value, HostError> {
        self.runtime.block_on(self.request(command))
    }
}

impl PropertySource for MpvConnection {
    fn get_property(&self, name: &str) -> Result<PropertyValue, HostError> {
        let data = self.command(json!(["get_property", name]))?;
        node_from_json(data).ok_or_else(|| HostError::Unavailable(name.to_string()))
    }

    fn get_osd_string(&self, name: &str) -> Result<String, HostError> {
        let template = format!("${{{name}:}}");
        match self.command(json!(["expand-text", template]))? {
            Value::String(text) => Ok(text),
            _ => Err(HostError::Unavailable(name.to_string())),
        }
    }
}

async fn io_loop<R, W>(
    reader: R,
    mut writer: W,
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<Incoming>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut pending: HashMap<u64, oneshot::Sender<Reply>> = HashMap::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                if let Err(e) = writer.write_all(request.line.as_bytes()).await {
                    tracing::warn!(error = %e, "write to mpv failed");
                    break;
                }
                track(&mut pending, request.id, request.reply);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => route_line(&line, &mut pending, &events),
                Ok(None) => {
                    tracing::info!("mpv closed the IPC connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read from mpv failed");
                    break;
                }
            }
        }
    }
    // Dropping `pending` fails every outstanding request.
    let _ = events.send(Incoming::Closed);
}

/// Registers a request awaiting its reply. Requests that timed out have dropped
/// their receivers and are pruned here.
fn track(pending: &mut HashMap<u64, oneshot::Sender<Reply>>, id: u64, reply: oneshot::Sender<Reply>) {
    pending.retain(|_, reply| !reply.is_closed());
    pending.insert(id, reply);
}

fn route_line(line: &str, pending: &mut HashMap<u64, oneshot::Sender<Reply>>, events: &mpsc::UnboundedSender<Incoming>) {
    let message: IpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable line from mpv");
            return;
        }
    };

    if message.event.is_some() {
        if let Some(event) = parse_event(&message) {
            tracing::trace!(?event, "mpv event");
            let _ = events.send(Incoming::Event(event));
        }
        return;
    }

    let Some(id) = message.request_id else {
        tracing::trace!(line, "reply without request id");
        return;
    };
    match pending.remove(&id) {
        Some(reply) => {
            let _ = reply.send(Reply {
                error: message.error.unwrap_or_default(),
                data: message.data,
            });
        }
        None => tracing::trace!(request_id = id, "reply for unknown request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EventSource;
    use tokio::io::DuplexStream;

    /// Minimal stand-in for mpv: answers the commands the engine sends and emits a
    /// couple of events once the idle observer is registered.
    async fn fake_mpv(stream: DuplexStream) {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["request_id"].clone();
            let command = request["command"].as_array().cloned().unwrap_or_default();
            let name = command.get(1).cloned().unwrap_or(Value::Null);
            let reply = match command[0].as_str().unwrap() {
                "observe_property" => json!({"request_id": id, "error": "success"}),
                "get_property" if name == "pause" => json!({"request_id": id, "error": "success", "data": true}),
                "get_property" if name == "metadata" => {
                    json!({"request_id": id, "error": "success", "data": {"artist": "X", "title": "Y"}})
                }
                "expand-text" => json!({"request_id": id, "error": "success", "data": "00:01:02"}),
                _ => json!({"request_id": id, "error": "property unavailable"}),
            };
            let mut out = reply.to_string();
            out.push('\n');
            if command[0] == "observe_property" {
                out.push_str("{\"event\":\"file-loaded\"}\n");
                out.push_str("{\"event\":\"property-change\",\"id\":1,\"name\":\"idle-active\",\"data\":true}\n");
            }
            writer.write_all(out.as_bytes()).await.unwrap();
        }
    }

    #[test]
    fn properties_and_events_over_a_stream() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        rt.spawn(fake_mpv(server));
        let (conn, mut events) = rt.block_on(attach(client)).unwrap();

        assert_eq!(conn.get_property("pause").unwrap(), PropertyValue::Flag(true));
        let metadata = conn.get_property("metadata").unwrap().into_map().unwrap();
        assert_eq!(metadata.get("artist").and_then(PropertyValue::as_str), Some("X"));
        assert_eq!(conn.get_osd_string("time-pos").unwrap(), "00:01:02");
        assert!(matches!(
            conn.get_property("chapter"),
            Err(HostError::Command { ref reason, .. }) if reason == "property unavailable"
        ));

        assert_eq!(events.wait_event().unwrap(), Some(HostEvent::FileLoaded));
        assert_eq!(events.wait_event().unwrap(), Some(HostEvent::Idle));
    }

    #[test]
    fn closed_stream_is_a_disconnect() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        rt.spawn(async move {
            let (reader, mut writer) = tokio::io::split(server);
            let mut lines = BufReader::new(reader).lines();
            if let Ok(Some(_)) = lines.next_line().await {
                writer
                    .write_all(b"{\"request_id\":1,\"error\":\"success\"}\n")
                    .await
                    .unwrap();
            }
        });
        let (conn, mut events) = rt.block_on(attach(client)).unwrap();

        let err = events.wait_event().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(conn.get_property("pause"), Err(HostError::Disconnected)));
    }

    #[test]
    fn attaching_mid_playback_reports_the_loaded_file() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        rt.spawn(async move {
            let (reader, mut writer) = tokio::io::split(server);
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let id = request["request_id"].clone();
                let mut out = match request["command"][0].as_str() {
                    Some("observe_property") => format!(
                        "{}\n{}",
                        json!({"request_id": id, "error": "success"}),
                        r#"{"event":"property-change","id":1,"name":"idle-active","data":false}"#
                    ),
                    _ => json!({"request_id": id, "error": "success", "data": false}).to_string(),
                };
                out.push('\n');
                writer.write_all(out.as_bytes()).await.unwrap();
            }
        });
        let (_conn, mut events) = rt.block_on(attach(client)).unwrap();

        assert_eq!(events.wait_event().unwrap(), Some(HostEvent::FileLoaded));
    }

    #[test]
    fn abandoned_requests_are_pruned() {
        let mut pending = HashMap::new();
        let (timed_out, receiver) = oneshot::channel();
        drop(receiver);
        pending.insert(1, timed_out);

        let (live, _receiver) = oneshot::channel();
        track(&mut pending, 2, live);

        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&2));
    }
}
