// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 实时通道 (WebSocket)
//! Realtime channel: subscribes to the session and tracks connection status only

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// 客户端 → 服务端
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// 服务端 → 客户端
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    Subscribed {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(other)]
    Unknown,
}

/// 连接状态 (仅由通道线程写入)
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    connected: AtomicBool,
    client_id: Mutex<Option<String>>,
    subscribed_session: Mutex<Option<String>>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().ok().and_then(|g| g.clone())
    }

    pub fn subscribed_session(&self) -> Option<String> {
        self.subscribed_session.lock().ok().and_then(|g| g.clone())
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn set_client_id(&self, id: Option<String>) {
        if let Ok(mut g) = self.client_id.lock() {
            *g = id;
        }
    }

    fn set_subscribed(&self, session_id: Option<String>) {
        if let Ok(mut g) = self.subscribed_session.lock() {
            *g = session_id;
        }
    }
}

/// 处理一条服务端消息, 返回需要回复的消息
pub fn handle_server_message(
    text: &str,
    session_id: &str,
    status: &ConnectionStatus,
) -> Option<ClientMessage> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("忽略无法解析的实时消息: {}", e);
            return None;
        }
    };
    match message {
        ServerMessage::Connected { client_id } => {
            info!("🔗 实时通道已连接, clientId={}", client_id);
            status.set_client_id(Some(client_id));
            Some(ClientMessage::Subscribe {
                session_id: session_id.to_string(),
            })
        }
        ServerMessage::Subscribed { session_id } => {
            info!("📡 已订阅会话 {}", session_id);
            status.set_subscribed(Some(session_id));
            None
        }
        ServerMessage::Unknown => None,
    }
}

pub struct RealtimeChannel {
    status: Arc<ConnectionStatus>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// 连接并启动读取线程; 连接失败返回错误, 不影响会话
    pub fn open(ws_url: &str, session_id: &str) -> anyhow::Result<Self> {
        let mut socket = connect(ws_url)?;
        socket.get_mut().set_read_timeout(Some(READ_TIMEOUT))?;

        let status = Arc::new(ConnectionStatus::default());
        status.set_connected(true);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_status = Arc::clone(&status);
        let thread_stop = Arc::clone(&stop);
        let session_id = session_id.to_string();
        let handle = thread::Builder::new()
            .name("realtime".to_string())
            .spawn(move || read_loop(socket, &session_id, &thread_status, &thread_stop))?;

        Ok(Self {
            status,
            stop,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("❌ 实时通道线程异常退出");
            }
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// 带超时的TCP连接 + WebSocket握手 (仅支持 ws://)
fn connect(ws_url: &str) -> anyhow::Result<WebSocket<TcpStream>> {
    let request = ws_url.into_client_request()?;
    let uri = request.uri();
    if uri.scheme_str() != Some("ws") {
        bail!("不支持的实时通道地址: {}", ws_url);
    }
    let host = uri.host().context("实时通道地址缺少主机名")?;
    let port = uri.port_u16().unwrap_or(80);

    let mut last_error = None;
    let mut stream = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let stream = match (stream, last_error) {
        (Some(s), _) => s,
        (None, Some(e)) => return Err(e.into()),
        (None, None) => bail!("无法解析实时通道地址: {}", host),
    };
    stream.set_read_timeout(Some(CONNECT_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECT_TIMEOUT))?;

    let (socket, _response) =
        tungstenite::client(request, stream).map_err(|e| anyhow!("实时通道握手失败: {e}"))?;
    Ok(socket)
}

fn read_loop(
    mut socket: WebSocket<TcpStream>,
    session_id: &str,
    status: &ConnectionStatus,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        match socket.read() {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_server_message(&text, session_id, status) {
                    let sent = serde_json::to_string(&reply)
                        .map_err(anyhow::Error::from)
                        .and_then(|json| socket.send(Message::Text(json)).map_err(Into::into));
                    if let Err(e) = sent {
                        warn!("⚠️ 实时订阅发送失败: {}", e);
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("🔌 实时通道被服务端关闭");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!("⚠️ 实时通道断开: {}", e);
                break;
            }
        }
    }

    status.set_connected(false);
    status.set_subscribed(None);
    if stop.load(Ordering::SeqCst) {
        let _ = socket.close(None);
        let _ = socket.flush();
    }
    debug!("实时通道线程退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_connected_triggers_subscribe() {
        let status = ConnectionStatus::default();
        let reply = handle_server_message(
            r#"{"type":"connected","clientId":"c-42"}"#,
            "session_1",
            &status,
        );
        assert_eq!(
            reply,
            Some(ClientMessage::Subscribe {
                session_id: "session_1".to_string()
            })
        );
        assert_eq!(status.client_id().as_deref(), Some("c-42"));

        let wire = serde_json::to_value(reply.unwrap()).unwrap();
        assert_eq!(wire, json!({"type": "subscribe", "sessionId": "session_1"}));
    }

    #[test]
    fn test_subscribed_records_session() {
        let status = ConnectionStatus::default();
        let reply = handle_server_message(
            r#"{"type":"subscribed","sessionId":"session_1"}"#,
            "session_1",
            &status,
        );
        assert!(reply.is_none());
        assert_eq!(status.subscribed_session().as_deref(), Some("session_1"));
    }

    #[test]
    fn test_unknown_and_garbage_ignored() {
        let status = ConnectionStatus::default();
        assert!(handle_server_message(r#"{"type":"event","data":{}}"#, "s", &status).is_none());
        assert!(handle_server_message("not json", "s", &status).is_none());
        assert!(status.client_id().is_none());
    }

    #[test]
    fn test_open_unreachable_fails() {
        assert!(RealtimeChannel::open("ws://127.0.0.1:1/ws", "s").is_err());
        assert!(RealtimeChannel::open("wss://127.0.0.1:1/ws", "s").is_err());
    }

    #[test]
    fn test_subscribes_then_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (reply_tx, reply_rx) = mpsc::channel();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::Text(r#"{"type":"connected","clientId":"c-7"}"#.to_string()))
                .unwrap();
            if let Ok(Message::Text(text)) = ws.read() {
                let _ = reply_tx.send(text);
            }
            let _ = ws.close(None);
            let _ = ws.flush();
            // 等待客户端断开
            while ws.read().is_ok() {}
        });

        let channel = RealtimeChannel::open(&format!("ws://{addr}/ws"), "session_1").unwrap();
        let reply = reply_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply, json!({"type": "subscribe", "sessionId": "session_1"}));
        assert_eq!(channel.status().client_id().as_deref(), Some("c-7"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while channel.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!channel.is_connected());
        assert!(channel.status().subscribed_session().is_none());
        server.join().unwrap();
    }
}
