// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 会话与事件管道
//! Session & event pipeline
//!
//! 1. 创建远程会话, 可选订阅实时通道
//! 2. 事件入队, 满一批 (batch_size) 或超过间隔 (flush_interval) 即上报
//! 3. 上报失败保留队列 (至少一次), 后台模式由投递线程退避重试
//! 4. 结束会话: 上报剩余事件, 为在场人员补发 person_lost, 等待投递完成

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::client::IngestApi;
use super::flush_worker::{FlushWorker, RetryPolicy};
use super::presence::PresenceTracker;
use super::realtime::RealtimeChannel;
use super::types::{
    CreateSessionRequest, Event, EventType, RecordWeightRequest, Session, SessionState,
    EVENT_SOURCE,
};
use crate::config::PipelineConfig;
use crate::detection::Track;
use crate::error::ApiError;

/// 重量记录的来源与默认置信度
const WEIGHT_SOURCE: &str = "vision";
const WEIGHT_CONFIDENCE: f32 = 0.5;

pub struct EventPipeline<A: IngestApi + 'static> {
    api: Arc<A>,
    config: PipelineConfig,
    session: Option<Session>,
    queue: VecDeque<Event>,
    last_flush: Instant,
    presence: PresenceTracker,
    worker: Option<FlushWorker>,
    realtime: Option<RealtimeChannel>,
    dropped: u64,
}

impl<A: IngestApi + 'static> EventPipeline<A> {
    pub fn new(api: Arc<A>, config: PipelineConfig) -> Self {
        let worker = if config.background_flush {
            match FlushWorker::spawn(
                Arc::clone(&api),
                config.ingestion_secret.clone(),
                RetryPolicy::from_config(&config),
                config.max_queued_events,
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!("⚠️ 投递线程启动失败, 改为同步上报: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            api,
            config,
            session: None,
            queue: VecDeque::new(),
            last_flush: Instant::now(),
            presence: PresenceTracker::new(),
            worker,
            realtime: None,
            dropped: 0,
        }
    }

    // ========== 会话生命周期 ==========

    /// 创建远程会话, 失败不重试
    pub fn create_session(&mut self, member_id: Option<&str>) -> Result<String, ApiError> {
        if let Some(session) = &self.session {
            return Err(ApiError::AlreadyActive(session.id.clone()));
        }

        let metadata = json!({
            "source": EVENT_SOURCE,
            "camera": self.config.camera.to_string(),
        });
        let request = CreateSessionRequest {
            member_id: member_id.map(str::to_string),
            metadata: metadata.clone(),
        };

        let response = self.api.create_session(&request).map_err(|e| {
            error!("❌ 创建会话失败: {}", e);
            e
        })?;
        if response.id.is_empty() {
            error!("❌ 创建会话失败: 响应缺少会话ID");
            return Err(ApiError::Malformed("empty session id".to_string()));
        }

        let mut session = Session {
            id: response.id,
            member_id: request.member_id,
            metadata,
            state: SessionState::Created,
            created_at: Utc::now(),
        };
        info!("✅ 会话已创建: {}", session.id);

        if let Some(ws_url) = &self.config.ws_url {
            match RealtimeChannel::open(ws_url, &session.id) {
                Ok(channel) => self.realtime = Some(channel),
                Err(e) => warn!("⚠️ 实时通道连接失败 ({}): {}", ws_url, e),
            }
        }

        session.state = SessionState::Active;
        let id = session.id.clone();
        self.session = Some(session);
        self.presence.clear();
        self.last_flush = Instant::now();
        Ok(id)
    }

    /// 结束会话; 远程错误只记录日志
    pub fn end_session(&mut self) {
        let Some(session_id) = self.session_id().map(str::to_string) else {
            debug!("没有活动会话, 忽略 end_session");
            return;
        };

        self.flush();
        for track_id in self.presence.clear() {
            self.person_lost(&track_id);
        }
        self.flush();

        if let Some(worker) = &self.worker {
            let remaining = worker.drain(Duration::from_millis(self.config.drain_timeout_ms));
            if remaining > 0 {
                let lost = worker.discard();
                warn!("⚠️ 等待投递超时, 丢弃 {} 个未送达事件", lost);
            }
        }
        if !self.queue.is_empty() {
            warn!("⚠️ 会话结束, 丢弃 {} 个未送达事件", self.queue.len());
            self.queue.clear();
        }

        match self.api.end_session(&session_id) {
            Ok(()) => info!("🏁 会话已结束: {}", session_id),
            Err(e) => warn!("⚠️ 结束会话请求失败 ({}): {}", session_id, e),
        }

        if let Some(mut channel) = self.realtime.take() {
            channel.close();
        }
        if let Some(mut session) = self.session.take() {
            session.state = SessionState::Ended;
            debug!(
                session_id = %session.id,
                duration_s = (Utc::now() - session.created_at).num_seconds(),
                dropped = self.dropped_events(),
                "会话统计"
            );
        }
    }

    // ========== 事件队列 ==========

    /// 事件入队; 无会话时忽略
    pub fn enqueue(&mut self, event_type: EventType, metadata: Value, confidence: Option<f32>) {
        self.enqueue_at(event_type, metadata, confidence, Instant::now());
    }

    fn enqueue_at(
        &mut self,
        event_type: EventType,
        metadata: Value,
        confidence: Option<f32>,
        now: Instant,
    ) {
        let Some(session) = &self.session else {
            return;
        };

        let timestamp = self
            .config
            .client_timestamps
            .then(|| Utc::now().timestamp_millis() as f64 / 1000.0);
        self.queue.push_back(Event {
            event_type,
            session_id: session.id.clone(),
            source: EVENT_SOURCE.to_string(),
            metadata,
            confidence,
            timestamp,
        });

        if self.queue.len() > self.config.max_queued_events {
            self.queue.pop_front();
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 1000 == 0 {
                warn!(
                    "⚠️ 事件队列已满 ({}), 已丢弃 {} 个最旧事件",
                    self.config.max_queued_events, self.dropped
                );
            }
        }

        let interval = Duration::from_millis(self.config.flush_interval_ms);
        if self.queue.len() >= self.config.batch_size
            || now.saturating_duration_since(self.last_flush) > interval
        {
            self.flush_at(now);
        }
    }

    /// 上报队列; 返回是否已送达 (后台模式为已交给投递线程)
    pub fn flush(&mut self) -> bool {
        self.flush_at(Instant::now())
    }

    fn flush_at(&mut self, now: Instant) -> bool {
        if self.queue.is_empty() {
            return true;
        }

        match &self.worker {
            Some(worker) => {
                let batch: Vec<Event> = self.queue.drain(..).collect();
                let count = batch.len();
                match worker.submit(batch) {
                    Ok(()) => {
                        debug!(count, "📤 事件批次已交给投递线程");
                        self.last_flush = now;
                        true
                    }
                    Err(batch) => {
                        warn!("⚠️ 投递线程不可用, 保留 {} 个事件", batch.len());
                        for event in batch.into_iter().rev() {
                            self.queue.push_front(event);
                        }
                        false
                    }
                }
            }
            None => {
                let events = self.queue.make_contiguous();
                match self.api.ingest(events, &self.config.ingestion_secret) {
                    Ok(()) => {
                        debug!(count = events.len(), "📤 事件批次已送达");
                        self.queue.clear();
                        self.last_flush = now;
                        true
                    }
                    Err(e) => {
                        warn!("⚠️ 事件上报失败, 保留 {} 个事件: {}", self.queue.len(), e);
                        false
                    }
                }
            }
        }
    }

    // ========== 在场人员 ==========

    /// 对比上一帧的轨迹集合, 发送 person_detected / person_lost
    pub fn observe_tracks(&mut self, tracks: &[Track]) {
        if self.session.is_none() {
            return;
        }
        let diff = self.presence.observe(tracks.iter().map(|t| t.id.as_str()));
        for track_id in diff.left {
            self.person_lost(&track_id);
        }
        for track_id in diff.appeared {
            if let Some(track) = tracks.iter().find(|t| t.id == track_id) {
                self.person_detected(track);
            }
        }
    }

    // ========== 事件构造 ==========

    pub fn person_detected(&mut self, track: &Track) {
        let b = &track.bbox;
        self.enqueue(
            EventType::PersonDetected,
            json!({
                "trackId": track.id,
                "boundingBox": {
                    "x": b.x1,
                    "y": b.y1,
                    "width": b.width(),
                    "height": b.height(),
                },
            }),
            Some(track.confidence),
        );
    }

    pub fn person_lost(&mut self, track_id: &str) {
        self.enqueue(EventType::PersonLost, json!({ "trackId": track_id }), None);
    }

    pub fn exercise_started(&mut self, track: &Track) {
        self.enqueue(
            EventType::ExerciseStarted,
            json!({
                "trackId": track.id,
                "exercise": track.exercise,
                "setNumber": track.set_number,
            }),
            None,
        );
    }

    pub fn exercise_ended(&mut self, track: &Track) {
        self.enqueue(
            EventType::ExerciseEnded,
            json!({
                "trackId": track.id,
                "exercise": track.exercise,
                "setNumber": track.set_number,
                "totalReps": track.rep_count,
            }),
            None,
        );
    }

    pub fn rep_completed(&mut self, track: &Track) {
        self.enqueue(
            EventType::RepCompleted,
            json!({
                "trackId": track.id,
                "exercise": track.exercise,
                "repNumber": track.rep_count,
                "setNumber": track.set_number,
            }),
            None,
        );
    }

    pub fn set_completed(&mut self, track: &Track) {
        self.enqueue(
            EventType::SetCompleted,
            json!({
                "trackId": track.id,
                "exercise": track.exercise,
                "setNumber": track.set_number,
                "totalReps": track.rep_count,
            }),
            None,
        );
    }

    pub fn identity_matched(&mut self, track_id: &str, member_id: &str, confidence: f32) {
        self.enqueue(
            EventType::IdentityMatched,
            json!({
                "trackId": track_id,
                "memberId": member_id,
                "confidence": confidence,
            }),
            Some(confidence),
        );
    }

    /// 记录重量 (直接请求, 不经过事件队列)
    pub fn record_weight(
        &self,
        member_id: &str,
        exercise: &str,
        weight: f32,
        unit: &str,
        set_number: u32,
    ) -> Result<(), ApiError> {
        let session_id = self.session_id().ok_or(ApiError::NoSession)?;
        let request = RecordWeightRequest {
            session_id: session_id.to_string(),
            member_id: member_id.to_string(),
            exercise: exercise.to_string(),
            set_number,
            weight,
            unit: unit.to_string(),
            source: WEIGHT_SOURCE.to_string(),
            confidence: WEIGHT_CONFIDENCE,
        };
        self.api.record_weight(&request).map_err(|e| {
            warn!("⚠️ 重量记录失败: {}", e);
            e
        })?;
        info!("🏋️ 已记录重量: {} {}{} (第{}组)", exercise, weight, unit, set_number);
        Ok(())
    }

    // ========== 状态查询 ==========

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state == SessionState::Active)
    }

    /// 尚未确认送达的事件数 (本地队列 + 投递线程积压)
    pub fn pending_events(&self) -> usize {
        self.queue.len() + self.worker.as_ref().map_or(0, FlushWorker::pending_events)
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    /// 因队列超限被丢弃的事件数 (含投递线程积压)
    pub fn dropped_events(&self) -> u64 {
        self.dropped + self.worker.as_ref().map_or(0, FlushWorker::dropped_events)
    }

    pub fn present_count(&self) -> usize {
        self.presence.len()
    }

    pub fn realtime_connected(&self) -> bool {
        self.realtime.as_ref().is_some_and(RealtimeChannel::is_connected)
    }
}
