//! Login + two deltas + sampling, driven straight through the session.

use serde_json::json;
use sync_client::interp::{FieldSet, InterpolationEngine};
use sync_client::session::{SessionState, SyncSession};
use sync_shared::config::SyncConfig;
use sync_shared::delta::{apply_delta, compute_delta};
use sync_shared::net::{NetMsg, UpdateMsg};
use sync_shared::tree::tree_from_json;

fn update(timestamp: f64, delta: serde_json::Value) -> NetMsg {
    NetMsg::Update(UpdateMsg {
        timestamp,
        seq: None,
        delta: tree_from_json(delta),
    })
}

#[test]
fn sampling_right_after_second_update_hits_first_snapshot() {
    let cfg = SyncConfig {
        render_delay_ms: Some(100.0),
        ..Default::default()
    };
    let mut session = SyncSession::create(&cfg);
    session
        .handle(NetMsg::Login {
            id: "p1".into(),
            state: tree_from_json(json!({ "players": { "p1": { "x": 0, "y": 0, "z": 0 } } })),
            world: None,
        })
        .unwrap();
    assert_eq!(session.state(), SessionState::Synchronized);

    session
        .handle(update(1000.0, json!({ "players": { "p1": { "x": 1 } } })))
        .unwrap();
    session
        .handle(update(1100.0, json!({ "players": { "p1": { "x": 2 } } })))
        .unwrap();

    let engine = InterpolationEngine::from_config(&cfg);
    let frame = engine.sample(session.history());
    assert_eq!(frame.render_time, Some(1000.0));
    assert_eq!(frame.number("p1", "x"), Some(1.0));
    assert_eq!(frame.number("p1", "y"), Some(0.0));
}

#[test]
fn server_side_deltas_reconstruct_on_the_client() {
    let cfg = SyncConfig::default();
    let mut session = SyncSession::create(&cfg);

    let t0 = tree_from_json(json!({ "players": { "p1": { "x": 0, "health": 100 } } }));
    session
        .handle(NetMsg::Login {
            id: "p1".into(),
            state: t0.clone(),
            world: None,
        })
        .unwrap();

    let mut server_tree = t0;
    for step in 1..=5 {
        let next = apply_delta(
            Some(&server_tree),
            Some(&tree_from_json(json!({
                "players": { "p1": { "x": step } },
                "vehicles": { format!("v{step}"): { "rpm": step * 100 } }
            }))),
        );
        let delta = compute_delta(Some(&server_tree), Some(&next)).unwrap_or_default();
        session
            .handle(NetMsg::Update(UpdateMsg {
                timestamp: step as f64 * 50.0,
                seq: Some(step),
                delta,
            }))
            .unwrap();
        server_tree = next;
    }

    assert_eq!(session.tree(), &server_tree);
    assert_eq!(session.history().latest().unwrap().entities.len(), 6);

    let engine = InterpolationEngine::new(FieldSet::default(), 25.0, 100.0);
    let frame = engine.sample(session.history());
    assert!((frame.number("p1", "x").unwrap() - 4.5).abs() < 1e-9);
    assert_eq!(frame.number("v5", "rpm"), Some(500.0));
}
