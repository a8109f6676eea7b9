//! Scenario 4 (spec §8): rotation across a week boundary, plus the
//! rotation-change-detection idempotence it implies.

mod support;

use chrono::{NaiveDate, TimeZone, Utc, Weekday};
use incident_core::types::oncall::{Member, RotationType, Role, Schedule};
use oncall_service::rotation::current_on_call;
use serde_json::{json, Value};
use support::Harness;

fn member(name: &str, role: Role) -> Member {
    Member { name: name.into(), email: format!("{}@example.com", name.to_lowercase()), role }
}

#[test]
fn weekly_rotation_advances_across_an_iso_week_boundary() {
    // Members ordered [Bob, Alice] so the index arithmetic lines up with the
    // literal scenario text: ISO week 10 selects Bob, week 11 selects Alice.
    let schedule = Schedule::new(
        "platform".into(),
        RotationType::Weekly,
        vec![member("Bob", Role::Primary), member("Alice", Role::Primary)],
    )
    .unwrap();

    let week10 = Utc.from_utc_datetime(&NaiveDate::from_isoywd_opt(2026, 10, Weekday::Mon).unwrap().and_hms_opt(12, 0, 0).unwrap());
    let week11 = Utc.from_utc_datetime(&NaiveDate::from_isoywd_opt(2026, 11, Weekday::Mon).unwrap().and_hms_opt(12, 0, 0).unwrap());

    let on_week10 = current_on_call(&schedule, week10);
    let on_week11 = current_on_call(&schedule, week11);

    assert_eq!(on_week10.primary.unwrap().name, "Bob");
    assert_eq!(on_week11.primary.unwrap().name, "Alice");
}

#[tokio::test]
async fn first_lookup_never_counts_as_a_rotation_change() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "platform",
            "rotation_type": "weekly",
            "members": [
                { "name": "Bob", "email": "bob@example.com", "role": "primary" },
                { "name": "Alice", "email": "alice@example.com", "role": "primary" },
            ],
        }))
        .send()
        .await
        .expect("create schedule");

    let before: String = harness.client.get(harness.oncall_url("/metrics")).send().await.unwrap().text().await.unwrap();
    let changes_before = extract_counter(&before, "oncall_rotation_changes_total");

    let _first: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/oncall/current?team=platform"))
        .send()
        .await
        .expect("first lookup")
        .json()
        .await
        .expect("first body");

    let _second: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/oncall/current?team=platform"))
        .send()
        .await
        .expect("second lookup")
        .json()
        .await
        .expect("second body");

    // Give the fire-and-forget detection task a moment to run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let after: String = harness.client.get(harness.oncall_url("/metrics")).send().await.unwrap().text().await.unwrap();
    let changes_after = extract_counter(&after, "oncall_rotation_changes_total");

    // Neither the first observation nor a repeat lookup with an unchanged
    // primary should register as a rotation change.
    assert_eq!(changes_before, changes_after);
}

#[tokio::test]
async fn patch_schedule_applies_rotation_type_and_membership_incrementally() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "checkout",
            "rotation_type": "weekly",
            "members": [
                { "name": "Dana", "email": "dana@example.com", "role": "primary" },
                { "name": "Eli", "email": "eli@example.com", "role": "secondary" },
            ],
        }))
        .send()
        .await
        .expect("create schedule");

    let patched: Value = harness
        .client
        .patch(harness.oncall_url("/api/v1/schedules/checkout"))
        .json(&json!({
            "rotation_type": "biweekly",
            "add_members": [{ "name": "Frank", "email": "frank@example.com", "role": "secondary" }],
            "remove_members": ["Eli"],
        }))
        .send()
        .await
        .expect("patch schedule")
        .json()
        .await
        .expect("patch body");

    assert_eq!(patched["rotation_type"], "biweekly");
    let names: Vec<&str> = patched["members"].as_array().unwrap().iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Dana", "Frank"]);
}

#[tokio::test]
async fn patch_schedule_rejects_removing_the_last_primary() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "payments",
            "rotation_type": "daily",
            "members": [{ "name": "Gail", "email": "gail@example.com", "role": "primary" }],
        }))
        .send()
        .await
        .expect("create schedule");

    let response = harness
        .client
        .patch(harness.oncall_url("/api/v1/schedules/payments"))
        .json(&json!({ "remove_members": ["Gail"] }))
        .send()
        .await
        .expect("patch schedule");
    assert_eq!(response.status().as_u16(), 422);
}

fn extract_counter(body: &str, name: &str) -> f64 {
    body.lines()
        .find(|line| line.starts_with(name) && !line.starts_with('#'))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0)
}
