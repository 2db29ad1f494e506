// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 测试用的内存接口实现

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;

use super::client::IngestApi;
use super::types::{
    CreateSessionRequest, CreateSessionResponse, Event, EventType, RecordWeightRequest,
    EVENT_SOURCE,
};
use crate::error::ApiError;

#[derive(Default)]
pub(crate) struct MockApi {
    batches: Mutex<Vec<Vec<Event>>>,
    ended: Mutex<Vec<String>>,
    weights: Mutex<Vec<RecordWeightRequest>>,
    created: Mutex<Vec<CreateSessionRequest>>,
    session_seq: AtomicUsize,
    failing: AtomicBool,
    reject_create: AtomicBool,
    empty_session_id: AtomicBool,
}

impl MockApi {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_reject_create(&self, reject: bool) {
        self.reject_create.store(reject, Ordering::SeqCst);
    }

    /// 创建会话时返回空的会话ID
    pub fn set_empty_session_id(&self, empty: bool) {
        self.empty_session_id.store(empty, Ordering::SeqCst);
    }

    /// 所有已送达事件 (按送达顺序展开)
    pub fn delivered(&self) -> Vec<Event> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn delivered_types(&self) -> Vec<EventType> {
        self.delivered().iter().map(|e| e.event_type).collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().unwrap().clone()
    }

    pub fn weights(&self) -> Vec<RecordWeightRequest> {
        self.weights.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreateSessionRequest> {
        self.created.lock().unwrap().clone()
    }
}

impl IngestApi for MockApi {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, ApiError> {
        if self.reject_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                code: 500,
                body: "unavailable".to_string(),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        if self.empty_session_id.load(Ordering::SeqCst) {
            return Ok(CreateSessionResponse { id: String::new() });
        }
        let n = self.session_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreateSessionResponse {
            id: format!("session_{n}"),
        })
    }

    fn end_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.ended.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    fn ingest(&self, events: &[Event], _auth_token: &str) -> Result<(), ApiError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".to_string()));
        }
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }

    fn record_weight(&self, request: &RecordWeightRequest) -> Result<(), ApiError> {
        self.weights.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// 生成 n 个编号递增的 rep_completed 事件
pub(crate) fn sample_events(session_id: &str, n: usize) -> Vec<Event> {
    (1..=n)
        .map(|i| Event {
            event_type: EventType::RepCompleted,
            session_id: session_id.to_string(),
            source: EVENT_SOURCE.to_string(),
            metadata: json!({"trackId": "track_1", "repNumber": i}),
            confidence: None,
            timestamp: None,
        })
        .collect()
}
