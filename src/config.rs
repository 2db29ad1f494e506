// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 感知配置 - 通过JSON文件调整参数
//!
//! 启动时构建一次, 之后以只读方式传入各组件

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::types::coco_index;

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_lost_frames: u32,     // 最大丢失帧数
    pub assumed_fps: f32,         // 丢失帧数换算用帧率
    pub iou_threshold: f32,       // IOU匹配阈值 (严格大于)
    pub initial_confidence: f32,  // 新轨迹初始置信度
    pub confidence_step: f32,     // 每帧置信度增减量
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            assumed_fps: 30.0,
            iou_threshold: 0.3,
            initial_confidence: 0.5,
            confidence_step: 0.1,
        }
    }
}

/// 动作分类模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    /// 可见度 × 置信度评分, 可见度 ≥ 70%
    #[default]
    Scored,
    /// 所有关键点都必须可见, 按配置顺序取第一个
    Strict,
}

/// 左右两侧角度的合并方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleCombine {
    /// 两侧平均 (深蹲)
    Mean,
    /// 取最小值 (弯举: 弯曲最多的一侧为发力侧)
    Min,
}

/// 动作反馈分区方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackProfile {
    Depth,
    Contraction,
}

/// 角度阈值 (度)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleThresholds {
    pub down: f32,
    pub up: f32,
}

/// 单个动作配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub name: String,
    pub keypoints: Vec<String>,
    pub angle_thresholds: AngleThresholds,
    /// 关节三元组 (不带 left_/right_ 前缀), 中间为顶点
    pub joint: [String; 3],
    pub combine: AngleCombine,
    pub feedback: FeedbackProfile,
}

impl ExerciseConfig {
    pub fn squat() -> Self {
        Self {
            name: "squat".to_string(),
            keypoints: names(&[
                "left_hip",
                "right_hip",
                "left_knee",
                "right_knee",
                "left_ankle",
                "right_ankle",
            ]),
            angle_thresholds: AngleThresholds {
                down: 90.0,
                up: 150.0,
            },
            joint: ["hip".to_string(), "knee".to_string(), "ankle".to_string()],
            combine: AngleCombine::Mean,
            feedback: FeedbackProfile::Depth,
        }
    }

    pub fn bicep_curl() -> Self {
        Self {
            name: "bicep_curl".to_string(),
            keypoints: names(&[
                "left_shoulder",
                "right_shoulder",
                "left_elbow",
                "right_elbow",
                "left_wrist",
                "right_wrist",
            ]),
            angle_thresholds: AngleThresholds {
                down: 40.0,
                up: 140.0,
            },
            joint: [
                "shoulder".to_string(),
                "elbow".to_string(),
                "wrist".to_string(),
            ],
            combine: AngleCombine::Min,
            feedback: FeedbackProfile::Contraction,
        }
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// 计数器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepCounterConfig {
    pub hysteresis: f32,       // 滞回余量 (度)
    pub history_window: usize, // 角度平滑窗口
}

impl Default for RepCounterConfig {
    fn default() -> Self {
        Self {
            hysteresis: 5.0,
            history_window: 5,
        }
    }
}

/// 事件上报参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api_base_url: String,
    pub ws_url: Option<String>,
    pub ingestion_secret: String,
    pub camera: u32,
    pub batch_size: usize,         // 队列达到此数量立即上报
    pub flush_interval_ms: u64,    // 距上次上报超过此时间则上报
    pub max_queued_events: usize,  // 队列上限, 超出丢弃最旧事件
    pub background_flush: bool,    // 后台线程上报 (不阻塞帧循环)
    pub client_timestamps: bool,   // 客户端填写时间戳
    pub request_timeout_ms: u64,
    pub drain_timeout_ms: u64,     // 结束会话时等待后台上报完成的时间
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            ws_url: None,
            ingestion_secret: String::new(),
            camera: 0,
            batch_size: 10,
            flush_interval_ms: 1000,
            max_queued_events: 10_000,
            background_flush: true,
            client_timestamps: false,
            request_timeout_ms: 5000,
            drain_timeout_ms: 5000,
            retry_initial_ms: 250,
            retry_max_ms: 8000,
        }
    }
}

/// 感知系统总配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub pose_confidence_threshold: f32,
    pub classifier_mode: ClassifierMode,
    pub exercises: Vec<ExerciseConfig>, // 顺序即分类平局时的优先级
    pub tracker: TrackerConfig,
    pub rep_counter: RepCounterConfig,
    pub pipeline: PipelineConfig,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            pose_confidence_threshold: 0.5,
            classifier_mode: ClassifierMode::Scored,
            exercises: vec![ExerciseConfig::squat(), ExerciseConfig::bicep_curl()],
            tracker: TrackerConfig::default(),
            rep_counter: RepCounterConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl PerceptionConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入并返回默认配置, 解析失败返回错误
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("📝 配置文件不存在,创建默认配置: {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("配置文件解析失败: {}", path.display()))?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("API_BASE_URL") {
            self.pipeline.api_base_url = url;
        }
        if let Some(url) = lookup("WS_URL") {
            self.pipeline.ws_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(secret) = lookup("INGESTION_SECRET") {
            self.pipeline.ingestion_secret = secret;
        }
        if let Some(v) = lookup("POSE_THRESHOLD") {
            self.pose_confidence_threshold = v
                .parse()
                .with_context(|| format!("POSE_THRESHOLD 无效: {v}"))?;
        }
        if let Some(v) = lookup("CAMERA_INDEX") {
            self.pipeline.camera = v
                .parse()
                .with_context(|| format!("CAMERA_INDEX 无效: {v}"))?;
        }
        Ok(self)
    }

    /// 校验配置一致性
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pose_confidence_threshold) {
            bail!(
                "pose_confidence_threshold 超出 [0,1]: {}",
                self.pose_confidence_threshold
            );
        }
        if self.exercises.is_empty() {
            bail!("未配置任何动作");
        }
        for exercise in &self.exercises {
            let t = exercise.angle_thresholds;
            if t.down >= t.up {
                bail!(
                    "动作 {} 的阈值无效: down={} >= up={}",
                    exercise.name,
                    t.down,
                    t.up
                );
            }
            if exercise.keypoints.is_empty() {
                bail!("动作 {} 未配置关键点", exercise.name);
            }
            for name in &exercise.keypoints {
                if coco_index(name).is_none() {
                    warn!("⚠️ 动作 {} 使用了非COCO关键点: {}", exercise.name, name);
                }
            }
        }
        if !(0.0..=1.0).contains(&self.tracker.iou_threshold) {
            bail!("tracker.iou_threshold 超出 [0,1]: {}", self.tracker.iou_threshold);
        }
        if self.tracker.assumed_fps <= 0.0 {
            bail!("tracker.assumed_fps 必须为正数");
        }
        if self.rep_counter.history_window == 0 {
            bail!("rep_counter.history_window 必须 ≥ 1");
        }
        if self.pipeline.batch_size == 0 {
            bail!("pipeline.batch_size 必须 ≥ 1");
        }
        if self.pipeline.max_queued_events < self.pipeline.batch_size {
            bail!(
                "pipeline.max_queued_events ({}) 不能小于 batch_size ({})",
                self.pipeline.max_queued_events,
                self.pipeline.batch_size
            );
        }
        Ok(())
    }

    /// 按名称查找动作配置
    pub fn exercise(&self, name: &str) -> Option<&ExerciseConfig> {
        self.exercises.iter().find(|e| e.name == name)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前感知配置:");
        info!("  姿态置信度阈值: {:.2}", self.pose_confidence_threshold);
        info!("  分类模式: {:?}", self.classifier_mode);
        for e in &self.exercises {
            info!(
                "  动作 {}: down={:.0}° up={:.0}° ({}个关键点)",
                e.name,
                e.angle_thresholds.down,
                e.angle_thresholds.up,
                e.keypoints.len()
            );
        }
        info!(
            "  最大丢失帧: {} | IOU阈值: {:.2}",
            self.tracker.max_lost_frames, self.tracker.iou_threshold
        );
        info!(
            "  上报: {} | 批量 {} | 间隔 {}ms | 后台: {}",
            self.pipeline.api_base_url,
            self.pipeline.batch_size,
            self.pipeline.flush_interval_ms,
            self.pipeline.background_flush
        );
    }
}
