// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 远程接口客户端
//! Remote ingestion API client (HTTP + JSON)

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{
    CreateSessionRequest, CreateSessionResponse, EndSessionRequest, Event, IngestRequest,
    IngestResponse, RecordWeightRequest,
};
use crate::config::PipelineConfig;
use crate::error::ApiError;

/// 远程接口抽象 (会话、事件、重量)
pub trait IngestApi: Send + Sync {
    fn create_session(&self, request: &CreateSessionRequest)
        -> Result<CreateSessionResponse, ApiError>;

    fn end_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// 批量上报事件, 服务端返回 success=false 视为失败
    fn ingest(&self, events: &[Event], auth_token: &str) -> Result<(), ApiError>;

    fn record_weight(&self, request: &RecordWeightRequest) -> Result<(), ApiError>;
}

/// 基于 ureq 的阻塞式HTTP客户端
pub struct HttpIngestApi {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpIngestApi {
    pub fn new(config: &PipelineConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build();
        Self {
            agent,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<R, ApiError> {
        let url = self.url(endpoint);
        debug!(%url, "POST");
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(body)?;
        response
            .into_json::<R>()
            .map_err(|e| ApiError::Malformed(format!("{endpoint}: {e}")))
    }
}

impl IngestApi for HttpIngestApi {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, ApiError> {
        self.post("sessions/create", request)
    }

    fn end_session(&self, session_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post("sessions/end", &EndSessionRequest { session_id })?;
        Ok(())
    }

    fn ingest(&self, events: &[Event], auth_token: &str) -> Result<(), ApiError> {
        let response: IngestResponse =
            self.post("events/ingest", &IngestRequest { events, auth_token })?;
        if response.success {
            Ok(())
        } else {
            Err(ApiError::Rejected)
        }
    }

    fn record_weight(&self, request: &RecordWeightRequest) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post("weights/record", request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// 本地单次HTTP应答: 读完请求后返回固定的 200 响应体
    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_url_join() {
        let config = PipelineConfig {
            api_base_url: "http://localhost:3000/api/".to_string(),
            ..Default::default()
        };
        let api = HttpIngestApi::new(&config);
        assert_eq!(api.url("events/ingest"), "http://localhost:3000/api/events/ingest");
    }

    #[test]
    fn test_unreachable_endpoint_is_transport_error() {
        let config = PipelineConfig {
            api_base_url: "http://127.0.0.1:1".to_string(),
            request_timeout_ms: 500,
            ..Default::default()
        };
        let api = HttpIngestApi::new(&config);
        let err = api.ingest(&[], "secret").unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unparsable_body_is_malformed() {
        let config = PipelineConfig {
            api_base_url: serve_once("<html>bad gateway</html>"),
            request_timeout_ms: 2000,
            ..Default::default()
        };
        let api = HttpIngestApi::new(&config);
        let request = CreateSessionRequest {
            member_id: None,
            metadata: serde_json::json!({}),
        };
        let err = api.create_session(&request).unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }
}
