// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数
pub mod detection; // 检测输入与多人跟踪
pub mod error; // 远程接口错误
pub mod exercise; // 动作识别与计数
pub mod processor; // 帧处理循环
pub mod session; // 会话与事件上报

pub use crate::config::PerceptionConfig;
pub use crate::error::ApiError;
pub use crate::processor::{FrameProcessor, TrackSummary};
pub use crate::session::{EventPipeline, HttpIngestApi, IngestApi};
