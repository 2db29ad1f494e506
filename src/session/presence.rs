// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 在场人员集合: 对比相邻两帧的轨迹ID, 得出出现/离开

use std::collections::BTreeSet;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PresenceDiff {
    pub appeared: Vec<String>,
    pub left: Vec<String>,
}

impl PresenceDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    present: BTreeSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新在场集合; appeared 按输入顺序, left 按ID排序
    pub fn observe<'a, I>(&mut self, ids: I) -> PresenceDiff
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = BTreeSet::new();
        let mut appeared = Vec::new();
        for id in ids {
            if current.insert(id.to_string()) && !self.present.contains(id) {
                appeared.push(id.to_string());
            }
        }
        let left = self.present.difference(&current).cloned().collect();
        self.present = current;
        PresenceDiff { appeared, left }
    }

    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.present.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// 清空并返回所有仍在场的ID
    pub fn clear(&mut self) -> Vec<String> {
        std::mem::take(&mut self.present).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appeared_and_left() {
        let mut presence = PresenceTracker::new();
        let diff = presence.observe(["A", "B"]);
        assert_eq!(diff.appeared, vec!["A", "B"]);
        assert!(diff.left.is_empty());

        let diff = presence.observe(["B", "C"]);
        assert_eq!(diff.appeared, vec!["C"]);
        assert_eq!(diff.left, vec!["A"]);
        assert_eq!(presence.present().collect::<Vec<_>>(), vec!["B", "C"]);
    }

    #[test]
    fn test_steady_state_is_quiet() {
        let mut presence = PresenceTracker::new();
        presence.observe(["A"]);
        assert!(presence.observe(["A"]).is_empty());
    }

    #[test]
    fn test_clear_returns_remaining() {
        let mut presence = PresenceTracker::new();
        presence.observe(["track_2", "track_1"]);
        assert_eq!(presence.clear(), vec!["track_1", "track_2"]);
        assert!(presence.is_empty());
        assert!(presence.clear().is_empty());
    }
}
