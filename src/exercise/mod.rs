// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 动作识别系统 (Exercise Recognition)
///
/// - Classifier: 根据关键点可见度判断动作
/// - RepCounter: 关节角度滞回状态机计数
pub mod classifier;
pub mod rep_counter;

pub use classifier::{ExerciseClassifier, ExerciseScore};
pub use rep_counter::RepCounter;
