// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧处理器 (Frame Processor)
//! 职责: 检测结果 → 跟踪 → 动作识别 → 计数 → 事件上报

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::PerceptionConfig;
use crate::detection::{BBox, Detection, PersonTracker, RepState, Track, Tracker};
use crate::error::ApiError;
use crate::exercise::{ExerciseClassifier, RepCounter};
use crate::session::{EventPipeline, IngestApi};

/// 单个轨迹的处理结果 (供显示/输出)
#[derive(Clone, Debug)]
pub struct TrackSummary {
    pub track_id: String,
    pub bbox: BBox,
    pub matched: bool,
    pub member_id: Option<String>,
    pub exercise: Option<String>,
    pub rep_count: u32,
    pub rep_state: RepState,
    pub set_number: u32,
    pub angle: Option<f32>,
    pub feedback: Option<&'static str>,
}

pub struct FrameProcessor<A: IngestApi + 'static> {
    tracker: PersonTracker,
    classifier: ExerciseClassifier,
    counter: RepCounter,
    pipeline: EventPipeline<A>,

    // 统计
    frames: u64,
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl<A: IngestApi + 'static> FrameProcessor<A> {
    pub fn new(config: &PerceptionConfig, api: Arc<A>) -> Self {
        Self {
            tracker: PersonTracker::new(config.tracker.clone()),
            classifier: ExerciseClassifier::new(config),
            counter: RepCounter::new(config),
            pipeline: EventPipeline::new(api, config.pipeline.clone()),
            frames: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    /// 创建会话; 失败时不应处理任何帧
    pub fn start(&mut self, member_id: Option<&str>) -> Result<String, ApiError> {
        self.pipeline.create_session(member_id)
    }

    /// 处理一帧检测结果
    pub fn process(&mut self, detections: &[Detection]) -> Vec<TrackSummary> {
        self.process_at(detections, Instant::now())
    }

    pub(crate) fn process_at(&mut self, detections: &[Detection], now: Instant) -> Vec<TrackSummary> {
        let start_total = Instant::now();

        // 1. 跟踪
        let tracks = self.tracker.update_at(detections, now);

        // 2. 在场人员变化
        self.pipeline.observe_tracks(tracks);

        // 3. 动作识别与计数 (仅本帧匹配到的轨迹)
        let mut summaries = Vec::with_capacity(tracks.len());
        for track in tracks.iter_mut() {
            if track.matched {
                Self::update_track(&self.classifier, &self.counter, &mut self.pipeline, track);
            }
            summaries.push(TrackSummary {
                track_id: track.id.clone(),
                bbox: track.bbox,
                matched: track.matched,
                member_id: track.member_id.clone(),
                exercise: track.exercise.clone(),
                rep_count: track.rep_count,
                rep_state: track.rep_state,
                set_number: track.set_number,
                angle: track.last_angle,
                feedback: self.counter.feedback(track),
            });
        }

        // 4. 更新统计
        self.frames += 1;
        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            self.current_fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            self.count = 0;
            self.last = now;
        }

        // 性能监控日志 (每60帧打印一次)
        if self.frames % 60 == 0 {
            let total_ms = start_total.elapsed().as_secs_f64() * 1000.0;
            info!(
                "🎯 {} | {:.2}ms/帧 | {:.1}fps | 待上报: {} | 实时: {}",
                self.tracker.get_stats(),
                total_ms,
                self.current_fps,
                self.pipeline.pending_events(),
                if self.pipeline.realtime_connected() { "在线" } else { "离线" }
            );
        }

        summaries
    }

    fn update_track(
        classifier: &ExerciseClassifier,
        counter: &RepCounter,
        pipeline: &mut EventPipeline<A>,
        track: &mut Track,
    ) {
        // 动作一旦确定即保持, 直到显式结束
        if track.exercise.is_none() {
            let detected = track
                .keypoints
                .as_ref()
                .and_then(|kps| classifier.detect(kps))
                .map(str::to_string);
            if let Some(name) = detected {
                info!("🏃 {} 开始动作: {}", track.id, name);
                track.exercise = Some(name);
                pipeline.exercise_started(track);
            }
        }

        let before = track.rep_count;
        let keypoints = track.keypoints.take();
        counter.count(track, keypoints.as_ref());
        track.keypoints = keypoints;

        if track.rep_count > before {
            pipeline.rep_completed(track);
        }
    }

    // ========== 外部控制 ==========

    /// 结束轨迹当前动作 (发送 exercise_ended 后重置)
    pub fn end_exercise(&mut self, track_id: &str) -> bool {
        let Some(track) = self.tracker.get_mut(track_id) else {
            return false;
        };
        if track.exercise.is_none() {
            return false;
        }
        self.pipeline.exercise_ended(track);
        self.counter.reset(track);
        true
    }

    /// 完成一组 (发送 set_completed 后进入下一组)
    pub fn next_set(&mut self, track_id: &str) -> bool {
        let Some(track) = self.tracker.get_mut(track_id) else {
            return false;
        };
        if track.exercise.is_none() {
            return false;
        }
        self.pipeline.set_completed(track);
        self.counter.next_set(track);
        true
    }

    /// 外部身份匹配结果
    pub fn assign_member(&mut self, track_id: &str, member_id: &str, confidence: f32) -> bool {
        let Some(track) = self.tracker.get_mut(track_id) else {
            warn!("⚠️ 身份匹配: 轨迹 {} 不存在", track_id);
            return false;
        };
        track.member_id = Some(member_id.to_string());
        self.pipeline.identity_matched(track_id, member_id, confidence);
        true
    }

    /// 结束会话并清空跟踪
    pub fn shutdown(&mut self) {
        self.pipeline.end_session();
        self.tracker.reset();
        info!("🛑 帧处理器已停止 (共 {} 帧)", self.frames);
    }

    pub fn tracks(&self) -> &[Track] {
        self.tracker.tracks()
    }

    pub fn pipeline_mut(&mut self) -> &mut EventPipeline<A> {
        &mut self.pipeline
    }
}
