//! Interpolation.
//!
//! The server sends discrete updates stamped with its own clock. The client
//! renders at its own rate, a fixed delay behind the newest server time, and
//! blends entity state between the two snapshots bracketing that render time.

use std::collections::{vec_deque, BTreeMap, HashMap, VecDeque};

use sync_shared::{
    config::SyncConfig,
    math::{lerp_f64, Quat},
    tree::{Entity, StateTree, Value},
};

/// A reconstructed, timestamped view of every entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Server time, milliseconds.
    pub time: f64,
    pub entities: Vec<Entity>,
}

impl Snapshot {
    pub fn new(time: f64, entities: Vec<Entity>) -> Self {
        Self { time, entities }
    }

    pub fn find(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Buffered snapshot history for interpolation, oldest first.
#[derive(Debug, Default)]
pub struct SnapshotHistory {
    history: VecDeque<Snapshot>,
    max: usize,
}

impl SnapshotHistory {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max),
            max,
        }
    }

    /// Appends a snapshot, evicting the oldest ones past the bound.
    pub fn push(&mut self, snap: Snapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.history.get(index)
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.history.front()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.history.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Snapshot> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Which record fields get blended.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    /// Numeric fields blended linearly.
    pub linear: Vec<String>,
    /// Quaternion components `(x, y, z, w)`, blended as one rotation.
    pub rotation: Option<[String; 4]>,
}

impl Default for FieldSet {
    fn default() -> Self {
        Self {
            linear: ["x", "y", "z"].map(String::from).to_vec(),
            rotation: Some(["qx", "qy", "qz", "qw"].map(String::from)),
        }
    }
}

impl FieldSet {
    fn quat_of(&self, fields: &StateTree) -> Option<Quat> {
        let [x, y, z, w] = self.rotation.as_ref()?;
        let get = |k: &String| fields.get(k).and_then(Value::as_f64);
        Some(Quat::new(get(x)?, get(y)?, get(z)?, get(w)?))
    }

    fn write_quat(&self, fields: &mut StateTree, q: Quat) {
        if let Some([x, y, z, w]) = &self.rotation {
            fields.insert(x.clone(), Value::Number(q.x));
            fields.insert(y.clone(), Value::Number(q.y));
            fields.insert(z.clone(), Value::Number(q.z));
            fields.insert(w.clone(), Value::Number(q.w));
        }
    }

    /// Record as-is, except a rotation is always handed out normalized.
    fn settled(&self, fields: &StateTree) -> StateTree {
        let mut out = fields.clone();
        if let Some(q) = self.quat_of(fields) {
            self.write_quat(&mut out, q.normalize());
        }
        out
    }
}

/// Per-frame blended entity state. Recomputed every frame, never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpolatedFrame {
    /// Server time the frame represents, `None` when there was nothing to sample.
    pub render_time: Option<f64>,
    pub entities: BTreeMap<String, StateTree>,
}

impl InterpolatedFrame {
    pub fn get(&self, id: &str) -> Option<&StateTree> {
        self.entities.get(id)
    }

    pub fn number(&self, id: &str, field: &str) -> Option<f64> {
        self.get(id)?.get(field)?.as_f64()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Samples a [`SnapshotHistory`] at a fixed delay behind the newest snapshot.
#[derive(Debug, Clone)]
pub struct InterpolationEngine {
    pub fields: FieldSet,
    pub delay_ms: f64,
    pub max_extrapolation_ms: f64,
}

impl InterpolationEngine {
    pub fn new(fields: FieldSet, delay_ms: f64, max_extrapolation_ms: f64) -> Self {
        Self {
            fields,
            delay_ms,
            max_extrapolation_ms,
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self::new(
            FieldSet::default(),
            cfg.render_delay_ms(),
            cfg.max_extrapolation_ms,
        )
    }

    /// Samples at `latest.time - delay`.
    pub fn sample(&self, history: &SnapshotHistory) -> InterpolatedFrame {
        match history.latest() {
            Some(latest) => self.sample_at(history, latest.time - self.delay_ms),
            None => InterpolatedFrame::default(),
        }
    }

    /// Samples at an explicit server time.
    pub fn sample_at(&self, history: &SnapshotHistory, render_time: f64) -> InterpolatedFrame {
        let (Some(oldest), Some(newest)) = (history.oldest(), history.latest()) else {
            return InterpolatedFrame::default();
        };

        if render_time < oldest.time {
            return self.pass_through(oldest, oldest.time);
        }

        if render_time > newest.time {
            let capped = render_time.min(newest.time + self.max_extrapolation_ms.max(0.0));
            // Snapshots sharing the newest stamp carry no velocity.
            return match history.iter().rev().find(|s| s.time < newest.time) {
                Some(prev) => self.extrapolate(prev, newest, capped),
                None => self.pass_through(newest, newest.time),
            };
        }

        // Latest snapshot at or before render time; the one after it, if any.
        let idx = history
            .iter()
            .rposition(|s| s.time <= render_time)
            .unwrap_or(0);
        match (history.get(idx), history.get(idx + 1)) {
            (Some(from), Some(to)) => self.blend(from, to, render_time),
            (Some(from), None) => self.pass_through(from, render_time),
            _ => InterpolatedFrame::default(),
        }
    }

    fn pass_through(&self, snap: &Snapshot, render_time: f64) -> InterpolatedFrame {
        InterpolatedFrame {
            render_time: Some(render_time),
            entities: snap
                .entities
                .iter()
                .map(|e| (e.id.clone(), self.fields.settled(&e.fields)))
                .collect(),
        }
    }

    fn blend(&self, from: &Snapshot, to: &Snapshot, render_time: f64) -> InterpolatedFrame {
        let span = to.time - from.time;
        let t = if span > 0.0 {
            (render_time - from.time) / span
        } else {
            0.0
        };

        let next = by_id(to);
        let mut entities = BTreeMap::new();
        for prev in &from.entities {
            let fields = match next.get(prev.id.as_str()) {
                Some(next) => self.blend_entity(&prev.fields, prev, next, t),
                None => self.fields.settled(&prev.fields),
            };
            entities.insert(prev.id.clone(), fields);
        }
        // Spawned since `from`: shown as-is rather than blended from nowhere.
        for e in &to.entities {
            entities
                .entry(e.id.clone())
                .or_insert_with(|| self.fields.settled(&e.fields));
        }

        InterpolatedFrame {
            render_time: Some(render_time),
            entities,
        }
    }

    /// Projects `newest` forward along the motion since `prev`.
    ///
    /// Only the blended fields move; everything else is the newest state.
    fn extrapolate(&self, prev: &Snapshot, newest: &Snapshot, render_time: f64) -> InterpolatedFrame {
        let t = (render_time - prev.time) / (newest.time - prev.time);
        let before = by_id(prev);
        let entities = newest
            .entities
            .iter()
            .map(|e| {
                let fields = match before.get(e.id.as_str()) {
                    Some(p) => self.blend_entity(&e.fields, p, e, t),
                    None => self.fields.settled(&e.fields),
                };
                (e.id.clone(), fields)
            })
            .collect();

        InterpolatedFrame {
            render_time: Some(render_time),
            entities,
        }
    }

    /// Writes the blended target fields of `from -> to` over `base`.
    fn blend_entity(&self, base: &StateTree, from: &Entity, to: &Entity, t: f64) -> StateTree {
        let mut fields = self.fields.settled(base);
        for name in &self.fields.linear {
            if let (Some(a), Some(b)) = (from.number(name), to.number(name)) {
                fields.insert(name.clone(), Value::Number(lerp_f64(a, b, t)));
            }
        }
        if let (Some(qa), Some(qb)) = (
            self.fields.quat_of(&from.fields),
            self.fields.quat_of(&to.fields),
        ) {
            self.fields.write_quat(&mut fields, qa.slerp(qb, t));
        }
        fields
    }
}

fn by_id(snap: &Snapshot) -> HashMap<&str, &Entity> {
    snap.entities.iter().map(|e| (e.id.as_str(), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_shared::tree::{flatten_entities, tree_from_json};
    use serde_json::json;

    fn snap(time: f64, players: serde_json::Value) -> Snapshot {
        Snapshot::new(time, flatten_entities(&tree_from_json(json!({ "players": players }))))
    }

    fn engine(delay: f64) -> InterpolationEngine {
        InterpolationEngine::new(FieldSet::default(), delay, 50.0)
    }

    fn history(snaps: Vec<Snapshot>) -> SnapshotHistory {
        let mut h = SnapshotHistory::new(8);
        for s in snaps {
            h.push(s);
        }
        h
    }

    #[test]
    fn history_keeps_most_recent_in_order() {
        let mut h = SnapshotHistory::new(3);
        for t in 0..5 {
            h.push(Snapshot::new(t as f64 * 100.0, Vec::new()));
        }
        let times: Vec<f64> = h.iter().map(|s| s.time).collect();
        assert_eq!(times, [200.0, 300.0, 400.0]);
        assert_eq!(h.oldest().unwrap().time, 200.0);
        assert_eq!(h.latest().unwrap().time, 400.0);
    }

    #[test]
    fn history_iterates_from_either_end() {
        let h = history(vec![
            Snapshot::new(0.0, Vec::new()),
            Snapshot::new(100.0, Vec::new()),
            Snapshot::new(100.0, Vec::new()),
        ]);
        assert_eq!(h.iter().len(), 3);
        assert_eq!(h.iter().rposition(|s| s.time <= 100.0), Some(2));
        assert_eq!(h.iter().rev().find(|s| s.time < 100.0).map(|s| s.time), Some(0.0));
    }

    #[test]
    fn midpoint_is_linear() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
        ]);
        let frame = engine(50.0).sample(&h);
        assert_eq!(frame.render_time, Some(50.0));
        assert!((frame.number("p1", "x").unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn exact_snapshot_time_needs_no_blend() {
        let h = history(vec![
            snap(1000.0, json!({ "p1": { "x": 1 } })),
            snap(1100.0, json!({ "p1": { "x": 2 } })),
        ]);
        assert_eq!(engine(100.0).sample(&h).number("p1", "x"), Some(1.0));
    }

    #[test]
    fn non_target_fields_come_from_earlier_snapshot() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0, "health": 80 } })),
            snap(100.0, json!({ "p1": { "x": 10, "health": 20 } })),
        ]);
        let frame = engine(50.0).sample(&h);
        assert_eq!(frame.number("p1", "health"), Some(80.0));
        assert_eq!(frame.get("p1").unwrap().get("id"), Some(&Value::from("p1")));
    }

    #[test]
    fn new_entity_passes_through_unmodified() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 }, "p2": { "x": 42, "y": 7 } })),
        ]);
        let frame = engine(50.0).sample(&h);
        let p2 = h.latest().unwrap().find("p2").unwrap();
        assert_eq!(frame.get("p2"), Some(&p2.fields));
    }

    #[test]
    fn despawned_entity_is_kept_until_bracket_moves_on() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 }, "gone": { "x": 3 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
        ]);
        assert_eq!(engine(50.0).sample(&h).number("gone", "x"), Some(3.0));
    }

    #[test]
    fn extrapolation_is_capped() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
        ]);
        let e = engine(0.0);
        let near = e.sample_at(&h, 120.0);
        assert!((near.number("p1", "x").unwrap() - 12.0).abs() < 1e-9);

        let far = e.sample_at(&h, 10_000.0);
        assert!((far.number("p1", "x").unwrap() - 15.0).abs() < 1e-9);
        assert_eq!(far.render_time, Some(150.0));
    }

    #[test]
    fn extrapolation_keeps_newest_non_target_fields() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0, "health": 80, "username": "old" } })),
            snap(100.0, json!({ "p1": { "x": 10, "health": 20, "username": "new" } })),
        ]);
        let e = engine(0.0);
        assert_eq!(e.sample_at(&h, 100.0).number("p1", "health"), Some(20.0));

        let past = e.sample_at(&h, 101.0);
        assert_eq!(past.number("p1", "health"), Some(20.0));
        assert_eq!(past.get("p1").unwrap().get("username"), Some(&Value::from("new")));
        assert!((past.number("p1", "x").unwrap() - 10.1).abs() < 1e-9);
    }

    #[test]
    fn equal_newest_timestamps_extrapolate_from_last_distinct_time() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
        ]);
        let e = engine(0.0);
        assert_eq!(e.sample_at(&h, 100.0).number("p1", "x"), Some(10.0));
        assert!((e.sample_at(&h, 120.0).number("p1", "x").unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn equal_timestamps_only_pass_newest_through() {
        let h = history(vec![
            snap(100.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
        ]);
        let frame = engine(0.0).sample_at(&h, 120.0);
        assert_eq!(frame.number("p1", "x"), Some(10.0));
        assert_eq!(frame.render_time, Some(100.0));
    }

    #[test]
    fn passed_through_rotation_is_normalized() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "qx": 0, "qy": 0, "qz": 0, "qw": 2 } })),
            snap(100.0, json!({
                "p1": { "qx": 0, "qy": 0, "qz": 0, "qw": 2 },
                "p2": { "x": 1, "qx": 0, "qy": 3, "qz": 0, "qw": 0 }
            })),
        ]);
        let e = engine(0.0);

        let clamped = e.sample_at(&h, -50.0);
        assert_eq!(clamped.number("p1", "qw"), Some(1.0));

        let spawned = e.sample_at(&h, 50.0);
        assert!((spawned.number("p2", "qy").unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(spawned.number("p2", "x"), Some(1.0));
    }

    #[test]
    fn before_oldest_clamps_to_oldest() {
        let h = history(vec![
            snap(500.0, json!({ "p1": { "x": 5 } })),
            snap(600.0, json!({ "p1": { "x": 6 } })),
        ]);
        let frame = engine(0.0).sample_at(&h, 100.0);
        assert_eq!(frame.number("p1", "x"), Some(5.0));
        assert_eq!(frame.render_time, Some(500.0));
    }

    #[test]
    fn single_snapshot_passes_through() {
        let h = history(vec![snap(10.0, json!({ "p1": { "x": 1 } }))]);
        assert_eq!(engine(100.0).sample(&h).number("p1", "x"), Some(1.0));
        assert_eq!(engine(0.0).sample_at(&h, 99.0).number("p1", "x"), Some(1.0));
    }

    #[test]
    fn empty_history_yields_empty_frame() {
        let frame = engine(100.0).sample(&SnapshotHistory::new(4));
        assert!(frame.is_empty());
        assert_eq!(frame.render_time, None);
    }

    #[test]
    fn orientation_is_slerped_and_normalized() {
        let half = std::f64::consts::FRAC_1_SQRT_2;
        let h = history(vec![
            snap(0.0, json!({ "p1": { "qx": 0, "qy": 0, "qz": 0, "qw": 1 } })),
            snap(100.0, json!({ "p1": { "qx": 0, "qy": half, "qz": 0, "qw": half } })),
        ]);
        let frame = engine(50.0).sample(&h);
        let q = Quat::new(
            frame.number("p1", "qx").unwrap(),
            frame.number("p1", "qy").unwrap(),
            frame.number("p1", "qz").unwrap(),
            frame.number("p1", "qw").unwrap(),
        );
        assert!((q.length() - 1.0).abs() < 1e-9);
        let expected = (std::f64::consts::PI / 8.0).sin();
        assert!((q.y - expected).abs() < 1e-9);
    }

    #[test]
    fn sampling_is_idempotent() {
        let h = history(vec![
            snap(0.0, json!({ "p1": { "x": 0 } })),
            snap(100.0, json!({ "p1": { "x": 10 } })),
            snap(200.0, json!({ "p1": { "x": 30 } })),
        ]);
        let e = engine(75.0);
        assert_eq!(e.sample(&h), e.sample(&h));
        assert!((e.sample(&h).number("p1", "x").unwrap() - 15.0).abs() < 1e-9);
    }
}
