// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测与跟踪 (Detection & Tracking)
///
/// - types:    检测框、关键点、输入记录
/// - geometry: IOU 与关节角度
/// - tracker:  多人跟踪与轨迹状态
pub mod geometry;
pub mod tracker;
pub mod types;

pub use geometry::{angle_at, compute_iou, JointAngle};
pub use tracker::{PersonTracker, RepState, Track, Tracker};
pub use types::{BBox, Detection, FrameRecord, Keypoint, Keypoints};
