// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 动作计数器 (基于关节角度的滞回状态机)
//! Rep counter: angle-based hysteresis state machine
//!
//! 状态转移:
//! - Neutral/Up → Down: 平滑角度 < down + 滞回
//! - Down → Up:         平滑角度 > up - 滞回, 最低角度 < down 时计数 +1
//!
//! 最低角度未达到 down 阈值的动作视为幅度不足, 不计数

use tracing::{debug, info};

use crate::config::{AngleCombine, ExerciseConfig, FeedbackProfile, PerceptionConfig};
use crate::detection::geometry::{angle_at, JointAngle};
use crate::detection::tracker::{RepState, Track};
use crate::detection::types::Keypoints;

const SIDES: [&str; 2] = ["left", "right"];

pub struct RepCounter {
    exercises: Vec<ExerciseConfig>,
    pose_threshold: f32,
    hysteresis: f32,
    history_window: usize,
}

impl RepCounter {
    pub fn new(config: &PerceptionConfig) -> Self {
        Self {
            exercises: config.exercises.clone(),
            pose_threshold: config.pose_confidence_threshold,
            hysteresis: config.rep_counter.hysteresis,
            history_window: config.rep_counter.history_window.max(1),
        }
    }

    fn exercise(&self, name: &str) -> Option<&ExerciseConfig> {
        self.exercises.iter().find(|e| e.name == name)
    }

    /// 更新计数, 返回 (rep_count, rep_state)
    ///
    /// 未设置动作、关键点为空或角度无法计算时不改变任何状态
    pub fn count(&self, track: &mut Track, keypoints: Option<&Keypoints>) -> (u32, RepState) {
        let unchanged = (track.rep_count, track.rep_state);

        let Some(exercise) = track.exercise.as_deref().and_then(|name| self.exercise(name))
        else {
            return unchanged;
        };
        let Some(keypoints) = keypoints.filter(|k| !k.is_empty()) else {
            return unchanged;
        };
        let JointAngle::Degrees(angle) = self.measure(exercise, keypoints) else {
            return unchanged;
        };

        // 角度平滑
        track.angle_history.push_back(angle);
        while track.angle_history.len() > self.history_window {
            track.angle_history.pop_front();
        }
        let smoothed =
            track.angle_history.iter().sum::<f32>() / track.angle_history.len() as f32;

        let down = exercise.angle_thresholds.down;
        let up = exercise.angle_thresholds.up;

        match track.rep_state {
            RepState::Neutral | RepState::Up => {
                if smoothed < down + self.hysteresis {
                    track.rep_state = RepState::Down;
                    track.lowest_angle = Some(smoothed);
                    debug!(track_id = %track.id, angle = smoothed, "⬇️ 进入下行");
                }
            }
            RepState::Down => {
                let lowest = track.lowest_angle.map_or(smoothed, |l| l.min(smoothed));
                track.lowest_angle = Some(lowest);

                if smoothed > up - self.hysteresis {
                    track.rep_state = RepState::Up;
                    track.lowest_angle = None;
                    if lowest < down {
                        track.rep_count += 1;
                        info!(
                            track_id = %track.id,
                            exercise = %exercise.name,
                            rep = track.rep_count,
                            lowest,
                            "✅ 完成一次动作"
                        );
                    } else {
                        debug!(
                            track_id = %track.id,
                            lowest,
                            down,
                            "⚠️ 幅度不足, 不计数"
                        );
                    }
                }
            }
        }

        track.last_angle = Some(smoothed);
        (track.rep_count, track.rep_state)
    }

    /// 计算动作对应的关节角度
    ///
    /// 每一侧的三个关键点都高于置信度阈值才参与计算
    pub fn measure(&self, exercise: &ExerciseConfig, keypoints: &Keypoints) -> JointAngle {
        let angles: Vec<f32> = SIDES
            .iter()
            .filter_map(|side| {
                let [a, b, c] = &exercise.joint;
                let p1 = self.visible(keypoints, side, a)?;
                let p2 = self.visible(keypoints, side, b)?;
                let p3 = self.visible(keypoints, side, c)?;
                Some(angle_at(p1, p2, p3))
            })
            .collect();

        if angles.is_empty() {
            return JointAngle::Undefined;
        }

        let angle = match exercise.combine {
            AngleCombine::Mean => angles.iter().sum::<f32>() / angles.len() as f32,
            AngleCombine::Min => angles.iter().copied().fold(f32::INFINITY, f32::min),
        };
        JointAngle::Degrees(angle)
    }

    fn visible(&self, keypoints: &Keypoints, side: &str, joint: &str) -> Option<(f32, f32)> {
        keypoints
            .get(&format!("{side}_{joint}"))
            .filter(|kp| kp.confidence > self.pose_threshold)
            .map(|kp| kp.position())
    }

    /// 根据最近角度给出动作反馈 (仅供显示, 不参与计数)
    pub fn feedback(&self, track: &Track) -> Option<&'static str> {
        let exercise = self.exercise(track.exercise.as_deref()?)?;
        let angle = track.last_angle?;
        let down = exercise.angle_thresholds.down;
        let up = exercise.angle_thresholds.up;

        let text = match exercise.feedback {
            FeedbackProfile::Depth => {
                if angle < down - 20.0 {
                    "Too deep"
                } else if angle < down {
                    "Good depth"
                } else if angle < up {
                    "Go deeper"
                } else {
                    "Starting position"
                }
            }
            FeedbackProfile::Contraction => {
                if angle < down {
                    "Full contraction"
                } else if angle < down + 30.0 {
                    "Good curl"
                } else if angle < up {
                    "Keep curling"
                } else {
                    "Arms extended"
                }
            }
        };
        Some(text)
    }

    /// 重置动作状态
    pub fn reset(&self, track: &mut Track) {
        track.reset_exercise();
    }

    /// 进入下一组 (保留动作)
    pub fn next_set(&self, track: &mut Track) {
        track.advance_set();
        debug!(track_id = %track.id, set = track.set_number, "➡️ 进入下一组");
    }
}
