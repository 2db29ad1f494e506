// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 几何工具函数
//! Geometry helpers: box IOU and joint angles

use super::types::BBox;

/// 角度计算的分母保护项
const ANGLE_EPSILON: f32 = 1e-6;

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

/// 关节角度 (可能因关键点不足而无法计算)
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JointAngle {
    Degrees(f32),
    Undefined,
}

impl JointAngle {
    pub fn degrees(self) -> Option<f32> {
        match self {
            JointAngle::Degrees(d) => Some(d),
            JointAngle::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, JointAngle::Degrees(_))
    }
}

/// 三点夹角 (p2 为顶点), 单位: 度, 范围 [0, 180]
pub fn angle_at(p1: (f32, f32), p2: (f32, f32), p3: (f32, f32)) -> f32 {
    let v1 = (p1.0 - p2.0, p1.1 - p2.1);
    let v2 = (p3.0 - p2.0, p3.1 - p2.1);

    let dot = v1.0 * v2.0 + v1.1 * v2.1;
    let mag1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let mag2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();

    let cos_angle = (dot / (mag1 * mag2 + ANGLE_EPSILON)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees().clamp(0.0, 180.0)
}
