use std::collections::HashMap;
use std::time::Duration;

use quire_project::NodeId;
use tokio::time::Instant;

/// 等待寫入的最新內容。 / Latest content waiting to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSave {
    /// `None` when timed saves are disabled; only a flush writes it then.
    pub deadline: Option<Instant>,
    pub content: String,
}

/// 以節點為單位的尾端防抖排程器。 / Per-node trailing debounce.
///
/// Each node owns its own deadline, so edits to one document never delay
/// another. The scheduler only keeps time; the session decides when to poll
/// it and performs the writes.
#[derive(Clone, Debug)]
pub struct AutosaveScheduler {
    delay: Duration,
    pending: HashMap<NodeId, PendingSave>,
}

impl Default for AutosaveScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(800))
    }
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 延遲為零時僅能手動儲存。 / A zero delay leaves manual saves only.
    pub fn is_timed(&self) -> bool {
        !self.delay.is_zero()
    }

    /// 記錄最新內容並重設該節點的計時。 / Stores the latest content and resets that node's timer.
    pub fn schedule(&mut self, node_id: NodeId, content: String, now: Instant) {
        let deadline = self.is_timed().then(|| now + self.delay);
        self.pending.insert(node_id, PendingSave { deadline, content });
    }

    /// 讓待寫入內容立即到期。 / Makes pending content due immediately.
    pub fn expedite(&mut self, node_id: &NodeId, now: Instant) -> bool {
        match self.pending.get_mut(node_id) {
            Some(pending) => {
                pending.deadline = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn expedite_all(&mut self, now: Instant) {
        for pending in self.pending.values_mut() {
            pending.deadline = Some(now);
        }
    }

    /// 到期的節點，依到期時間排序。 / Nodes whose deadline has passed, earliest first.
    pub fn due(&self, now: Instant) -> Vec<NodeId> {
        let mut due: Vec<(&NodeId, Instant)> = self
            .pending
            .iter()
            .filter_map(|(id, pending)| pending.deadline.map(|deadline| (id, deadline)))
            .filter(|(_, deadline)| *deadline <= now)
            .collect();
        due.sort_by(|(a_id, a), (b_id, b)| a.cmp(b).then_with(|| a_id.cmp(b_id)));
        due.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|pending| pending.deadline)
            .min()
    }

    /// 略過 `skip` 所排除節點的最早到期時間。 / Earliest deadline among nodes `skip` does not exclude.
    pub fn next_deadline_except(&self, skip: impl Fn(&NodeId) -> bool) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|(id, _)| !skip(id))
            .filter_map(|(_, pending)| pending.deadline)
            .min()
    }

    pub fn is_pending(&self, node_id: &NodeId) -> bool {
        self.pending.contains_key(node_id)
    }

    pub fn pending_content(&self, node_id: &NodeId) -> Option<&str> {
        self.pending
            .get(node_id)
            .map(|pending| pending.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn cancel(&mut self, node_id: &NodeId) -> bool {
        self.pending.remove(node_id).is_some()
    }

    /// 取消計時並取回最新內容。 / Cancels the timer and hands back the latest content.
    pub fn take(&mut self, node_id: &NodeId) -> Option<String> {
        self.pending.remove(node_id).map(|pending| pending.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> NodeId {
        NodeId::from(value)
    }

    #[test]
    fn rescheduling_moves_only_that_nodes_deadline() {
        let start = Instant::now();
        let mut scheduler = AutosaveScheduler::default();
        scheduler.schedule(id("a"), "a1".into(), start);
        scheduler.schedule(id("b"), "b1".into(), start + Duration::from_millis(100));
        scheduler.schedule(id("a"), "a2".into(), start + Duration::from_millis(500));

        let at = |ms| start + Duration::from_millis(ms);
        assert!(scheduler.due(at(800)).is_empty());
        assert_eq!(scheduler.due(at(900)), vec![id("b")]);
        assert_eq!(scheduler.due(at(1300)), vec![id("b"), id("a")]);
        assert_eq!(scheduler.next_deadline(), Some(at(900)));
        assert_eq!(
            scheduler.next_deadline_except(|node| node == &id("b")),
            Some(at(1300))
        );
        assert_eq!(scheduler.pending_content(&id("a")), Some("a2"));
    }

    #[test]
    fn take_cancels_and_returns_latest() {
        let now = Instant::now();
        let mut scheduler = AutosaveScheduler::default();
        scheduler.schedule(id("a"), "first".into(), now);
        scheduler.schedule(id("a"), "second".into(), now);
        assert_eq!(scheduler.take(&id("a")), Some("second".to_string()));
        assert!(!scheduler.is_pending(&id("a")));
        assert!(scheduler.take(&id("a")).is_none());
    }

    #[test]
    fn zero_delay_keeps_content_without_deadline() {
        let now = Instant::now();
        let mut scheduler = AutosaveScheduler::new(Duration::ZERO);
        scheduler.schedule(id("a"), "manual".into(), now);
        assert!(scheduler.due(now + Duration::from_secs(3600)).is_empty());
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.expedite(&id("a"), now);
        assert_eq!(scheduler.due(now), vec![id("a")]);
    }
}
