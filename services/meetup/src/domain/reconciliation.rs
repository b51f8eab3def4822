//! 保存済みイベントとMeetupから取得したイベントの差分計算

use super::event::Event;
use std::collections::HashSet;

/// 1グループ分の差分
///
/// 実行ごとに再計算され、永続化されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDiff {
    /// Meetup側から消えたため、アーカイブすべきイベントID（保存済みの順序を維持）
    pub missing_ids: Vec<String>,
}

impl ImportDiff {
    /// `stored − incoming`をIDで計算する
    pub fn compute(stored: &[Event], incoming: &[Event]) -> Self {
        let incoming_ids: HashSet<&str> = incoming.iter().map(|e| e.id.as_str()).collect();

        let missing_ids = stored
            .iter()
            .filter(|e| !incoming_ids.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();

        Self { missing_ids }
    }
}
