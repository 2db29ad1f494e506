// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 动作分类器
//! Exercise classifier
//!
//! 根据关键点可见度判断正在进行的动作, 无状态

use tracing::debug;

use crate::config::{ClassifierMode, ExerciseConfig, PerceptionConfig};
use crate::detection::types::Keypoints;

/// 最低可见度 (所需关键点中可见的比例)
pub const MIN_VISIBILITY: f32 = 0.7;

/// 单个动作的评分明细
#[derive(Clone, Debug, PartialEq)]
pub struct ExerciseScore {
    pub visible_count: usize,
    pub required_count: usize,
    pub visibility: f32,
    pub confidence: f32,
    pub overall: f32,
}

impl ExerciseScore {
    pub fn is_eligible(&self) -> bool {
        self.required_count > 0 && self.visibility >= MIN_VISIBILITY
    }
}

pub struct ExerciseClassifier {
    exercises: Vec<ExerciseConfig>,
    pose_threshold: f32,
    mode: ClassifierMode,
}

impl ExerciseClassifier {
    pub fn new(config: &PerceptionConfig) -> Self {
        Self {
            exercises: config.exercises.clone(),
            pose_threshold: config.pose_confidence_threshold,
            mode: config.classifier_mode,
        }
    }

    /// 判断动作, 无法判断时返回None
    pub fn detect(&self, keypoints: &Keypoints) -> Option<&str> {
        if keypoints.is_empty() {
            return None;
        }
        match self.mode {
            ClassifierMode::Scored => self.detect_scored(keypoints),
            ClassifierMode::Strict => self.detect_strict(keypoints),
        }
    }

    /// 评分模式: 可见度达标的动作中取总分最高者, 平局取配置顺序靠前者
    fn detect_scored(&self, keypoints: &Keypoints) -> Option<&str> {
        let mut best: Option<(&str, f32)> = None;

        for exercise in &self.exercises {
            let score = self.score(exercise, keypoints);
            if !score.is_eligible() {
                continue;
            }
            debug!(
                exercise = %exercise.name,
                visible = score.visible_count,
                required = score.required_count,
                overall = score.overall,
                "动作评分"
            );
            if best.map_or(true, |(_, b)| score.overall > b) {
                best = Some((exercise.name.as_str(), score.overall));
            }
        }

        best.map(|(name, _)| name)
    }

    /// 严格模式: 所有关键点都可见的第一个动作
    fn detect_strict(&self, keypoints: &Keypoints) -> Option<&str> {
        self.exercises
            .iter()
            .find(|exercise| {
                !exercise.keypoints.is_empty()
                    && exercise.keypoints.iter().all(|name| {
                        keypoints
                            .get(name)
                            .is_some_and(|kp| kp.confidence > self.pose_threshold)
                    })
            })
            .map(|exercise| exercise.name.as_str())
    }

    /// 计算单个动作的评分
    pub fn score(&self, exercise: &ExerciseConfig, keypoints: &Keypoints) -> ExerciseScore {
        let required_count = exercise.keypoints.len();
        let visible: Vec<f32> = exercise
            .keypoints
            .iter()
            .filter_map(|name| keypoints.get(name))
            .map(|kp| kp.confidence)
            .filter(|&c| c > self.pose_threshold)
            .collect();

        let visible_count = visible.len();
        if required_count == 0 || visible_count == 0 {
            return ExerciseScore {
                visible_count,
                required_count,
                visibility: 0.0,
                confidence: 0.0,
                overall: 0.0,
            };
        }

        let visibility = visible_count as f32 / required_count as f32;
        let confidence = visible.iter().sum::<f32>() / visible_count as f32;
        ExerciseScore {
            visible_count,
            required_count,
            visibility,
            confidence,
            overall: visibility * confidence,
        }
    }
}
