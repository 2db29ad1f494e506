// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 会话与事件上报 (Session & Event Pipeline)
///
/// - client: 远程接口 (HTTP)
/// - pipeline: 事件队列、批量上报、在场人员
/// - flush_worker: 后台投递与退避重试
/// - realtime: WebSocket 订阅
pub mod client;
pub mod flush_worker;
pub mod pipeline;
pub mod presence;
pub mod realtime;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HttpIngestApi, IngestApi};
pub use flush_worker::{FlushWorker, RetryPolicy};
pub use pipeline::EventPipeline;
pub use presence::{PresenceDiff, PresenceTracker};
pub use realtime::{ConnectionStatus, RealtimeChannel};
pub use types::{Event, EventType, Session, SessionState, EVENT_SOURCE};
