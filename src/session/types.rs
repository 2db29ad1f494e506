// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 会话与事件数据结构 (与远程接口的JSON格式一致)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 事件来源 (固定值)
pub const EVENT_SOURCE: &str = "perception";

/// 事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PersonDetected,
    PersonLost,
    ExerciseStarted,
    ExerciseEnded,
    RepCompleted,
    SetCompleted,
    IdentityMatched,
}

/// 上报事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    pub source: String,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Unix 时间戳 (秒), 默认由服务端填写
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// 会话生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Ended,
}

/// 远程会话
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub member_id: Option<String>,
    pub metadata: Value,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

// ========== 请求/响应 ==========

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    pub metadata: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateSessionResponse {
    pub id: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest<'a> {
    pub session_id: &'a str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest<'a> {
    pub events: &'a [Event],
    pub auth_token: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub success: bool,
}

/// 重量记录 (weights/record)
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordWeightRequest {
    pub session_id: String,
    pub member_id: String,
    pub exercise: String,
    pub set_number: u32,
    pub weight: f32,
    pub unit: String,
    pub source: String,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = Event {
            event_type: EventType::RepCompleted,
            session_id: "s1".to_string(),
            source: EVENT_SOURCE.to_string(),
            metadata: json!({"trackId": "track_1", "repNumber": 3}),
            confidence: None,
            timestamp: None,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "rep_completed",
                "sessionId": "s1",
                "source": "perception",
                "metadata": {"trackId": "track_1", "repNumber": 3}
            })
        );
    }

    #[test]
    fn test_create_session_omits_missing_member() {
        let req = CreateSessionRequest {
            member_id: None,
            metadata: json!({"source": "perception"}),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("memberId").is_none());
    }

    #[test]
    fn test_ingest_response_defaults_to_failure() {
        let r: IngestResponse = serde_json::from_str("{}").unwrap();
        assert!(!r.success);
    }
}
