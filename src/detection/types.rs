// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 感知系统数据结构定义
//! Data structures for the perception core

use std::collections::HashMap;

use phf::phf_map;
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// COCO-17 关键点名称 (姿态模型输出顺序)
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// 关键点名称 → COCO索引
static COCO_KEYPOINT_INDICES: phf::Map<&'static str, usize> = phf_map! {
    "nose" => 0,
    "left_eye" => 1,
    "right_eye" => 2,
    "left_ear" => 3,
    "right_ear" => 4,
    "left_shoulder" => 5,
    "right_shoulder" => 6,
    "left_elbow" => 7,
    "right_elbow" => 8,
    "left_wrist" => 9,
    "right_wrist" => 10,
    "left_hip" => 11,
    "right_hip" => 12,
    "left_knee" => 13,
    "right_knee" => 14,
    "left_ankle" => 15,
    "right_ankle" => 16,
};

/// 查询关键点的COCO索引 (未知名称返回None)
pub fn coco_index(name: &str) -> Option<usize> {
    COCO_KEYPOINT_INDICES.get(name).copied()
}

// ========== 数据结构 ==========

/// 检测框 (像素坐标, 左上角 + 右下角)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 单个关键点 (x, y, confidence)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

impl From<[f32; 3]> for Keypoint {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Keypoint> for [f32; 3] {
    fn from(k: Keypoint) -> Self {
        [k.x, k.y, k.confidence]
    }
}

/// 命名关键点集合
pub type Keypoints = HashMap<String, Keypoint>;

/// 单帧检测结果 (检测适配器 → 跟踪器)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub keypoints: Option<Keypoints>,
}

impl Detection {
    pub fn new(bbox: BBox, keypoints: Option<Keypoints>) -> Self {
        Self { bbox, keypoints }
    }

    /// 从COCO-17顺序的关键点数组构建
    ///
    /// 多余的点被忽略, 缺失的点不出现在集合中
    pub fn from_coco(bbox: BBox, points: &[(f32, f32, f32)]) -> Self {
        let keypoints: Keypoints = points
            .iter()
            .zip(COCO_KEYPOINTS.iter())
            .map(|(&(x, y, c), name)| (name.to_string(), Keypoint::new(x, y, c)))
            .collect();

        let keypoints = if keypoints.is_empty() {
            None
        } else {
            Some(keypoints)
        };
        Self { bbox, keypoints }
    }
}

/// 检测记录 (JSON 行输入格式)
///
/// `keypoints` 为命名关键点, `points` 为COCO顺序数组, 两者同时存在时以命名为准
#[derive(Clone, Debug, Deserialize)]
pub struct DetectionRecord {
    pub bbox: BBox,
    #[serde(default)]
    pub keypoints: Option<Keypoints>,
    #[serde(default)]
    pub points: Option<Vec<[f32; 3]>>,
}

impl From<DetectionRecord> for Detection {
    fn from(record: DetectionRecord) -> Self {
        match (record.keypoints, record.points) {
            (Some(keypoints), _) => Detection::new(record.bbox, Some(keypoints)),
            (None, Some(points)) => {
                let points: Vec<(f32, f32, f32)> =
                    points.iter().map(|p| (p[0], p[1], p[2])).collect();
                Detection::from_coco(record.bbox, &points)
            }
            (None, None) => Detection::new(record.bbox, None),
        }
    }
}

/// 一帧输入 (JSON 行)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FrameRecord {
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
}

impl FrameRecord {
    pub fn into_detections(self) -> Vec<Detection> {
        self.detections.into_iter().map(Detection::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_index() {
        assert_eq!(coco_index("nose"), Some(0));
        assert_eq!(coco_index("right_ankle"), Some(16));
        assert_eq!(coco_index("tail"), None);
        for (i, name) in COCO_KEYPOINTS.iter().enumerate() {
            assert_eq!(coco_index(name), Some(i));
        }
    }

    #[test]
    fn test_from_coco_names_points() {
        let points: Vec<(f32, f32, f32)> = (0..17).map(|i| (i as f32, 0.0, 0.9)).collect();
        let det = Detection::from_coco(BBox::new(0.0, 0.0, 10.0, 10.0), &points);
        let kps = det.keypoints.unwrap();
        assert_eq!(kps.len(), 17);
        assert_eq!(kps["left_knee"].x, 13.0);
    }

    #[test]
    fn test_frame_record_parse() {
        let line = r#"{"detections":[
            {"bbox":[0,0,100,200],"keypoints":{"left_hip":[10,20,0.9]}},
            {"bbox":[50,50,60,60],"points":[[1,2,0.5],[3,4,0.6]]},
            {"bbox":[1,1,2,2]}
        ]}"#;
        let frame: FrameRecord = serde_json::from_str(line).unwrap();
        let dets = frame.into_detections();
        assert_eq!(dets.len(), 3);
        assert_eq!(dets[0].bbox.y2, 200.0);
        assert_eq!(dets[0].keypoints.as_ref().unwrap()["left_hip"].confidence, 0.9);
        assert_eq!(dets[1].keypoints.as_ref().unwrap()["left_eye"].x, 3.0);
        assert!(dets[2].keypoints.is_none());
    }
}
