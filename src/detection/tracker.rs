// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多人跟踪器
//! Multi-person tracker
//!
//! 核心思想:
//! 1. 每条轨迹按顺序在未匹配检测中寻找IOU最大者 (贪心, 与顺序相关)
//! 2. 匹配成功提升置信度, 未匹配则衰减
//! 3. 丢失时间超过 max_lost_frames 后删除, ID 永不复用

use std::collections::VecDeque;
use std::time::Instant;

use tracing::debug;

use super::geometry::compute_iou;
use super::types::{BBox, Detection, Keypoints};
use crate::config::TrackerConfig;

/// 计数状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepState {
    #[default]
    Neutral,
    Down,
    Up,
}

impl RepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepState::Neutral => "neutral",
            RepState::Down => "down",
            RepState::Up => "up",
        }
    }
}

/// 跟踪对象
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID (track_N)
    pub id: String,

    /// 最近一次观测的边界框
    pub bbox: BBox,

    /// 最近一次观测的关键点
    pub keypoints: Option<Keypoints>,

    /// 匹配强度估计 [0, 1]
    pub confidence: f32,

    /// 最近一次匹配成功的时刻
    pub last_seen: Instant,

    /// 本帧是否匹配到检测
    pub matched: bool,

    /// 总共被匹配的帧数
    pub total_frames: u32,

    /// 外部身份 (会员ID)
    pub member_id: Option<String>,

    /// 当前动作
    pub exercise: Option<String>,
    pub rep_count: u32,
    pub rep_state: RepState,
    pub set_number: u32,

    /// 原始角度历史 (平滑用)
    pub angle_history: VecDeque<f32>,

    /// 本次下蹲/弯曲的最低角度, 仅在 Down 状态有效
    pub lowest_angle: Option<f32>,

    /// 最近一次平滑角度
    pub last_angle: Option<f32>,
}

impl Track {
    fn new(id: String, detection: &Detection, confidence: f32, now: Instant) -> Self {
        Self {
            id,
            bbox: detection.bbox,
            keypoints: detection.keypoints.clone(),
            confidence,
            last_seen: now,
            matched: true,
            total_frames: 1,
            member_id: None,
            exercise: None,
            rep_count: 0,
            rep_state: RepState::Neutral,
            set_number: 1,
            angle_history: VecDeque::new(),
            lowest_angle: None,
            last_angle: None,
        }
    }

    /// 清空动作与计数状态 (幂等)
    pub fn reset_exercise(&mut self) {
        self.exercise = None;
        self.rep_count = 0;
        self.rep_state = RepState::Neutral;
        self.set_number = 1;
        self.last_angle = None;
        self.angle_history.clear();
        self.lowest_angle = None;
    }

    /// 进入下一组: 保留动作, 计数清零
    pub fn advance_set(&mut self) {
        self.set_number += 1;
        self.rep_count = 0;
        self.rep_state = RepState::Neutral;
        self.angle_history.clear();
        self.lowest_angle = None;
    }
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
pub trait Tracker {
    /// 更新跟踪器
    ///
    /// # 参数
    /// - `detections`: 当前帧的全部检测
    ///
    /// # 返回
    /// 当前所有存活的跟踪对象 (匹配的、衰减中的、新建的)
    fn update(&mut self, detections: &[Detection]) -> &mut [Track];

    /// 当前存活的跟踪对象
    fn tracks(&self) -> &[Track];

    /// 重置跟踪器 (清除所有跟踪, ID 计数不回退)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

/// IOU 贪心匹配跟踪器
pub struct PersonTracker {
    /// 当前跟踪的人
    tracks: Vec<Track>,

    /// 下一个分配的ID
    next_id: u64,

    config: TrackerConfig,
}

impl PersonTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
        }
    }

    /// 按指定时刻更新 (便于确定性测试)
    pub(crate) fn update_at(&mut self, detections: &[Detection], now: Instant) -> &mut [Track] {
        let mut matched_det = vec![false; detections.len()];
        let step = self.config.confidence_step;
        let max_lost = self.config.max_lost_frames as f64;
        let fps = self.config.assumed_fps as f64;

        // 1. 已有轨迹: 在未匹配检测中贪心选择IOU最大者
        for track in &mut self.tracks {
            let mut best: Option<(usize, f32)> = None;
            for (idx, det) in detections.iter().enumerate() {
                if matched_det[idx] {
                    continue;
                }
                let iou = compute_iou(&track.bbox, &det.bbox);
                if iou > self.config.iou_threshold && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((idx, iou));
                }
            }

            match best {
                Some((idx, _)) => {
                    matched_det[idx] = true;
                    let det = &detections[idx];
                    track.bbox = det.bbox;
                    track.keypoints = det.keypoints.clone();
                    track.last_seen = now;
                    track.matched = true;
                    track.total_frames += 1;
                    track.confidence = (track.confidence + step).min(1.0);
                }
                None => {
                    track.matched = false;
                }
            }
        }

        // 2. 未匹配轨迹: 衰减或删除
        self.tracks.retain_mut(|track| {
            if track.matched {
                return true;
            }
            let frames_lost = now.saturating_duration_since(track.last_seen).as_secs_f64() * fps;
            if frames_lost > max_lost {
                debug!(track_id = %track.id, frames_lost, "🗑️ 轨迹丢失过久,删除");
                false
            } else {
                track.confidence = (track.confidence - step).max(0.0);
                true
            }
        });

        // 3. 未匹配检测 → 新建轨迹
        for (idx, det) in detections.iter().enumerate() {
            if matched_det[idx] {
                continue;
            }
            let id = format!("track_{}", self.next_id);
            self.next_id += 1;
            debug!(track_id = %id, "🆕 新建轨迹");
            self.tracks
                .push(Track::new(id, det, self.config.initial_confidence, now));
        }

        &mut self.tracks
    }

    /// 按ID查找轨迹
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// 获取跟踪统计信息
    pub fn get_stats(&self) -> String {
        format!(
            "跟踪: {} 人 | 总ID: {}",
            self.tracks.len(),
            self.next_id - 1
        )
    }
}

impl Tracker for PersonTracker {
    fn update(&mut self, detections: &[Detection]) -> &mut [Track] {
        self.update_at(detections, Instant::now())
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for PersonTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
