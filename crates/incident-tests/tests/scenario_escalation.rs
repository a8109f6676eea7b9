//! Scenario 6 (spec §8): escalation falls through to the secondary.

mod support;

use serde_json::{json, Value};
use support::Harness;

#[tokio::test]
async fn escalation_falls_through_to_the_secondary_and_notifies() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "backend",
            "rotation_type": "weekly",
            "members": [
                { "name": "Ella", "email": "ella@example.com", "role": "primary" },
                { "name": "Frank", "email": "frank@example.com", "role": "secondary" },
            ],
        }))
        .send()
        .await
        .expect("create schedule");

    let incident: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&json!({ "title": "checkout errors spiking", "service": "backend", "severity": "critical" }))
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = incident["id"].as_str().unwrap().to_string();

    let escalation: Value = harness
        .client
        .post(harness.oncall_url("/api/v1/escalate"))
        .json(&json!({ "team": "backend", "incident_id": incident_id, "reason": "primary unresponsive" }))
        .send()
        .await
        .expect("escalate")
        .json()
        .await
        .expect("escalation body");

    assert_eq!(escalation["escalated_to"]["name"], "Frank");
    assert_eq!(escalation["team"], "backend");

    let log: Value = harness
        .client
        .get(harness.oncall_url("/api/v1/escalations?team=backend"))
        .send()
        .await
        .expect("escalation log")
        .json()
        .await
        .expect("escalation log body");
    let entries = log.as_array().expect("log array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["escalated_to"]["name"], "Frank");

    // The escalation notify dispatch is fire-and-forget; give it a moment to
    // land before checking the notification service recorded it.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let notifications: Value = harness
        .client
        .get(harness.notification_url("/api/v1/notifications"))
        .send()
        .await
        .expect("notifications")
        .json()
        .await
        .expect("notifications body");
    let sent = notifications.as_array().expect("notifications array");
    assert!(sent.iter().any(|n| n["recipient"] == "frank@example.com"));
}

#[tokio::test]
async fn escalating_records_per_team_metrics_and_request_totals() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "search",
            "rotation_type": "weekly",
            "members": [
                { "name": "Ivy", "email": "ivy@example.com", "role": "primary" },
                { "name": "Jay", "email": "jay@example.com", "role": "secondary" },
            ],
        }))
        .send()
        .await
        .expect("create schedule");

    harness
        .client
        .post(harness.oncall_url("/api/v1/escalate"))
        .json(&json!({ "team": "search", "incident_id": incident_core::IncidentId::new().to_string(), "reason": "no ack" }))
        .send()
        .await
        .expect("escalate");

    let body: String = harness.client.get(harness.oncall_url("/metrics")).send().await.unwrap().text().await.unwrap();
    assert!(body.contains("oncall_escalations_total{team=\"search\"} 1"));
    assert!(body.contains("# TYPE oncall_requests_total counter"));
    assert!(body.contains("oncall_active_schedules 1"));
}

#[tokio::test]
async fn escalation_with_no_secondary_still_records_the_attempt() {
    let harness = Harness::spawn().await;

    harness
        .client
        .post(harness.oncall_url("/api/v1/schedules"))
        .json(&json!({
            "team": "data",
            "rotation_type": "daily",
            "members": [{ "name": "Gus", "email": "gus@example.com", "role": "primary" }],
        }))
        .send()
        .await
        .expect("create schedule");

    let incident: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&json!({ "title": "pipeline stalled", "service": "data", "severity": "high" }))
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = incident["id"].as_str().unwrap().to_string();

    let escalation: Value = harness
        .client
        .post(harness.oncall_url("/api/v1/escalate"))
        .json(&json!({ "team": "data", "incident_id": incident_id }))
        .send()
        .await
        .expect("escalate")
        .json()
        .await
        .expect("escalation body");

    assert!(escalation["escalated_to"].is_null());
}
