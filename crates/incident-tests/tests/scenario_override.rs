//! Scenario 5 (spec §8): override precedence and expiry, plus the
//! `duration_hours` boundary behavior.

mod support;

use chrono::Utc;
use incident_core::types::oncall::Override;
use incident_persist::{InMemoryOnCallStore, OnCallStore};
use serde_json::{json, Value};
use support::Harness;

#[tokio::test]
async fn override_takes_precedence_and_expires_back_to_the_rotation() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "platform",
            "rotation_type": "daily",
            "members": [{ "name": "Priya", "email": "priya@example.com", "role": "primary" }],
        }))
        .send()
        .await
        .expect("create schedule");

    let before: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/oncall/current?team=platform"))
        .send()
        .await
        .expect("lookup before override")
        .json()
        .await
        .expect("body");
    assert_eq!(before["primary"]["name"], "Priya");
    assert_eq!(before["overridden"], false);

    let create_override = harness
        .client
        .post(harness.oncall_url("/api/v1/oncall/override"))
        .json(&json!({
            "team": "platform",
            "user_name": "Dan",
            "user_email": "dan@example.com",
            "reason": "Priya on leave",
            "duration_hours": 1,
        }))
        .send()
        .await
        .expect("create override");
    assert_eq!(create_override.status().as_u16(), 201);

    // The override's expiry is in the future (1 hour out), but we can shrink
    // it by recreating with a near-immediate expiry is not supported by the
    // API, so instead exercise precedence now and expiry via a second,
    // shorter-lived override below.
    let during: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/oncall/current?team=platform"))
        .send()
        .await
        .expect("lookup during override")
        .json()
        .await
        .expect("body");
    assert_eq!(during["primary"]["name"], "Dan");
    assert_eq!(during["overridden"], true);

    harness
        .client
        .delete(harness.oncall_url("/api/v1/oncall/override/platform"))
        .send()
        .await
        .expect("delete override");

    let after: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/oncall/current?team=platform"))
        .send()
        .await
        .expect("lookup after override removed")
        .json()
        .await
        .expect("body");
    assert_eq!(after["primary"]["name"], "Priya");
    assert_eq!(after["overridden"], false);
}

/// The public API's minimum override duration is one hour, too long to wait
/// out in a test, so expiry is exercised directly against the store (the
/// same lazy-expiry path `GET /oncall/current` drives through `active_override`).
#[tokio::test]
async fn expired_override_reverts_and_is_recorded_in_history() {
    let store = InMemoryOnCallStore::new(10, 10);
    let now = Utc::now();

    store
        .set_override(Override {
            team: "checkout".into(),
            user_name: "Theo".into(),
            user_email: "theo@example.com".into(),
            reason: Some("handoff".into()),
            created_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::hours(1),
        })
        .await
        .expect("set override");

    let active = store.active_override("checkout", now).await.expect("active lookup");
    assert!(active.is_none());

    let history = store.list_history("checkout", 0).await.expect("history");
    let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&incident_core::types::oncall::HistoryEventKind::OverrideSet));
    assert!(kinds.contains(&incident_core::types::oncall::HistoryEventKind::OverrideExpired));
}

#[tokio::test]
async fn duration_hours_outside_bounds_is_rejected_with_422() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "payments",
            "rotation_type": "daily",
            "members": [{ "name": "Iris", "email": "iris@example.com", "role": "primary" }],
        }))
        .send()
        .await
        .expect("create schedule");

    let too_long = harness
        .client
        .post(harness.oncall_url("/api/v1/oncall/override"))
        .json(&json!({
            "team": "payments",
            "user_name": "Omar",
            "user_email": "omar@example.com",
            "duration_hours": 200,
        }))
        .send()
        .await
        .expect("over-long override");
    assert_eq!(too_long.status().as_u16(), 422);

    let too_short = harness
        .client
        .post(harness.oncall_url("/api/v1/oncall/override"))
        .json(&json!({
            "team": "payments",
            "user_name": "Omar",
            "user_email": "omar@example.com",
            "duration_hours": 0,
        }))
        .send()
        .await
        .expect("zero-length override");
    assert_eq!(too_short.status().as_u16(), 422);
}
