//! State replication: applying snapshots and deciding what to publish.
//!
//! The state blob is opaque to the protocol. The only structure we rely on
//! is that deltas are JSON objects whose top-level fields overwrite the
//! corresponding fields of the local copy. Nested values are replaced
//! wholesale, never deep-merged.

use serde_json::{Map, Value};
use std::time::Duration;

/// Shallow-merge `delta` into `target`.
///
/// When both sides are objects each top-level field of `delta` overwrites the
/// same field of `target`. Otherwise `delta` replaces `target` entirely.
pub fn merge_shallow(target: &mut Value, delta: Value) {
    match (target, delta) {
        (Value::Object(target), Value::Object(delta)) => {
            for (key, value) in delta {
                target.insert(key, value);
            }
        }
        (target, delta) => *target = delta,
    }
}

/// Top-level fields of `next` that differ from `previous`.
///
/// Returns `None` when the change cannot be expressed as a shallow delta:
/// either side is not an object, or a field was removed.
pub fn diff(previous: &Value, next: &Value) -> Option<Map<String, Value>> {
    let (Value::Object(previous), Value::Object(next)) = (previous, next) else {
        return None;
    };
    if previous.keys().any(|key| !next.contains_key(key)) {
        return None;
    }
    Some(
        next.iter()
            .filter(|(key, value)| previous.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// Local copy of the authoritative state.
///
/// On the host this is the canonical state; on followers it is the last
/// applied copy used for rendering.
#[derive(Debug, Default, Clone)]
pub struct Replica {
    state: Option<Value>,
    updates_applied: u64,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full snapshot or a delta.
    ///
    /// A delta arriving before any full snapshot becomes the initial state.
    pub fn apply(&mut self, state: Value, is_delta: bool) {
        self.updates_applied += 1;
        if is_delta {
            if let Some(current) = self.state.as_mut() {
                merge_shallow(current, state);
                return;
            }
        }
        self.state = Some(state);
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    /// Number of snapshots applied since creation.
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }
}

/// Host-side publish cadence and full/delta selection.
///
/// Publishes at most once per `interval`. Every `keyframe_every`-th due slot
/// carries a full snapshot so followers that missed deltas converge; the
/// slots in between carry only changed top-level fields, and are skipped when
/// nothing changed.
#[derive(Debug, Clone)]
pub struct PublishSchedule {
    interval_ms: u64,
    keyframe_every: u32,
    last_slot_at: Option<u64>,
    slots_since_keyframe: u32,
    last_sent: Option<Value>,
}

/// What to put on the wire for one publish slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPublish {
    pub state: Value,
    pub is_delta: bool,
}

impl PublishSchedule {
    pub fn new(interval: Duration, keyframe_every: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            keyframe_every: keyframe_every.max(1),
            last_slot_at: None,
            slots_since_keyframe: 0,
            last_sent: None,
        }
    }

    /// Whether a publish slot is open at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_slot_at
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Force the next slot to carry a full snapshot.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.slots_since_keyframe = 0;
    }

    /// Plan the publish for `next`, or `None` if throttled or unchanged.
    pub fn plan(&mut self, next: &Value, now_ms: u64) -> Option<PlannedPublish> {
        if !self.is_due(now_ms) {
            return None;
        }
        self.last_slot_at = Some(now_ms);

        let keyframe_due = self.slots_since_keyframe + 1 >= self.keyframe_every;
        let delta = match (&self.last_sent, keyframe_due) {
            (Some(previous), false) => diff(previous, next),
            _ => None,
        };

        match delta {
            Some(changes) if changes.is_empty() => {
                self.slots_since_keyframe += 1;
                None
            }
            Some(changes) => {
                self.slots_since_keyframe += 1;
                self.last_sent = Some(next.clone());
                Some(PlannedPublish {
                    state: Value::Object(changes),
                    is_delta: true,
                })
            }
            None => {
                self.slots_since_keyframe = 0;
                self.last_sent = Some(next.clone());
                Some(PlannedPublish {
                    state: next.clone(),
                    is_delta: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_top_level_fields() {
        let mut state = json!({"tick": 1, "score": 10});
        merge_shallow(&mut state, json!({"tick": 2}));
        assert_eq!(state, json!({"tick": 2, "score": 10}));
    }

    #[test]
    fn test_merge_replaces_nested_wholesale() {
        let mut state = json!({"players": {"a": {"x": 1, "y": 2}, "b": {"x": 5}}});
        merge_shallow(&mut state, json!({"players": {"a": {"x": 3}}}));
        // "b" and "a.y" are gone: nested objects are not deep-merged
        assert_eq!(state, json!({"players": {"a": {"x": 3}}}));
    }

    #[test]
    fn test_merge_non_object_replaces() {
        let mut state = json!([1, 2, 3]);
        merge_shallow(&mut state, json!({"a": 1}));
        assert_eq!(state, json!({"a": 1}));

        let mut state = json!({"a": 1});
        merge_shallow(&mut state, json!(7));
        assert_eq!(state, json!(7));
    }

    #[test]
    fn test_diff_changed_fields_only() {
        let changes = diff(&json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3, "c": 4})).unwrap();
        assert_eq!(Value::Object(changes), json!({"b": 3, "c": 4}));
    }

    #[test]
    fn test_diff_removed_field_needs_full() {
        assert!(diff(&json!({"a": 1, "b": 2}), &json!({"a": 1})).is_none());
    }

    #[test]
    fn test_diff_non_object_needs_full() {
        assert!(diff(&json!(1), &json!({"a": 1})).is_none());
        assert!(diff(&json!({"a": 1}), &json!([1])).is_none());
    }

    #[test]
    fn test_replica_full_then_delta() {
        let mut replica = Replica::new();
        replica.apply(json!({"a": 1, "b": 1}), false);
        replica.apply(json!({"b": 2}), true);

        assert_eq!(replica.state(), Some(&json!({"a": 1, "b": 2})));
        assert_eq!(replica.updates_applied(), 2);
    }

    #[test]
    fn test_replica_full_is_idempotent() {
        let snapshot = json!({"tick": 9, "players": {"a": {"x": 1}}});
        let mut once = Replica::new();
        once.apply(snapshot.clone(), false);

        let mut twice = Replica::new();
        twice.apply(snapshot.clone(), false);
        twice.apply(snapshot, false);

        assert_eq!(once.state(), twice.state());
    }

    #[test]
    fn test_replica_delta_without_base() {
        let mut replica = Replica::new();
        replica.apply(json!({"b": 2}), true);
        assert_eq!(replica.state(), Some(&json!({"b": 2})));
    }

    #[test]
    fn test_schedule_throttles() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(50), 20);
        assert!(schedule.plan(&json!({"t": 0}), 1000).is_some());
        assert!(schedule.plan(&json!({"t": 1}), 1020).is_none());
        assert!(schedule.plan(&json!({"t": 2}), 1050).is_some());
    }

    #[test]
    fn test_schedule_first_is_full_then_deltas() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(50), 20);

        let first = schedule.plan(&json!({"t": 0, "s": 1}), 0).unwrap();
        assert!(!first.is_delta);
        assert_eq!(first.state, json!({"t": 0, "s": 1}));

        let second = schedule.plan(&json!({"t": 1, "s": 1}), 50).unwrap();
        assert!(second.is_delta);
        assert_eq!(second.state, json!({"t": 1}));
    }

    #[test]
    fn test_schedule_skips_unchanged() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(50), 20);
        schedule.plan(&json!({"t": 0}), 0).unwrap();
        assert!(schedule.plan(&json!({"t": 0}), 50).is_none());
    }

    #[test]
    fn test_schedule_periodic_keyframe() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(10), 3);
        let kinds: Vec<bool> = (0..7)
            .map(|i| schedule.plan(&json!({"t": i}), i * 10).unwrap().is_delta)
            .collect();
        // full, delta, delta, full, delta, delta, full
        assert_eq!(kinds, vec![false, true, true, false, true, true, false]);
    }

    #[test]
    fn test_schedule_reset_forces_full() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(10), 20);
        schedule.plan(&json!({"t": 0}), 0).unwrap();
        schedule.reset();
        let next = schedule.plan(&json!({"t": 1}), 10).unwrap();
        assert!(!next.is_delta);
    }

    #[test]
    fn test_schedule_removed_field_sends_full() {
        let mut schedule = PublishSchedule::new(Duration::from_millis(10), 20);
        schedule.plan(&json!({"a": 1, "b": 1}), 0).unwrap();
        let next = schedule.plan(&json!({"a": 1}), 10).unwrap();
        assert!(!next.is_delta);
        assert_eq!(next.state, json!({"a": 1}));
    }
}
