//! Scenarios 2 and 3 (spec §8): MTTA/MTTR derivation and illegal transitions.

mod support;

use serde_json::{json, Value};
use support::Harness;

#[tokio::test]
async fn resolving_without_acknowledging_implies_acknowledge_at_resolution() {
    let harness = Harness::spawn().await;

    let create = json!({ "title": "db connection pool exhausted", "service": "billing", "severity": "critical" });
    let created: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&create)
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "open");

    let patch = json!({ "status": "resolved" });
    let resolved: Value = harness
        .client
        .patch(harness.incident_url(&format!("/api/v1/incidents/{incident_id}")))
        .json(&patch)
        .send()
        .await
        .expect("patch")
        .json()
        .await
        .expect("patch body");

    assert_eq!(resolved["status"], "resolved");
    assert!(resolved["acknowledged_at"].is_string());
    assert_eq!(resolved["acknowledged_at"], resolved["resolved_at"]);
    assert_eq!(resolved["mtta_seconds"], resolved["mttr_seconds"]);
}

#[tokio::test]
async fn resolved_cannot_transition_backward_and_leaves_exactly_one_timeline_event() {
    let harness = Harness::spawn().await;

    let create = json!({ "title": "cache node flapping", "service": "cache-cluster", "severity": "medium" });
    let created: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&create)
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = created["id"].as_str().unwrap().to_string();

    let resolve = harness
        .client
        .patch(harness.incident_url(&format!("/api/v1/incidents/{incident_id}")))
        .json(&json!({ "status": "resolved" }))
        .send()
        .await
        .expect("resolve");
    assert_eq!(resolve.status().as_u16(), 200);

    let reopen = harness
        .client
        .patch(harness.incident_url(&format!("/api/v1/incidents/{incident_id}")))
        .json(&json!({ "status": "open" }))
        .send()
        .await
        .expect("reopen attempt");
    assert_eq!(reopen.status().as_u16(), 409);

    let timeline: Value = harness
        .client
        .get(harness.incident_url(&format!("/api/v1/incidents/{incident_id}/timeline")))
        .send()
        .await
        .expect("timeline")
        .json()
        .await
        .expect("timeline body");
    let events = timeline.as_array().expect("timeline array");
    let status_changed = events.iter().filter(|e| e["event_type"] == "StatusChanged").count();
    assert_eq!(status_changed, 1);
}

#[tokio::test]
async fn patch_with_status_and_note_applies_both_in_one_request() {
    let harness = Harness::spawn().await;

    let create = json!({ "title": "redis primary unreachable", "service": "cache-cluster", "severity": "high" });
    let created: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&create)
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = created["id"].as_str().unwrap().to_string();

    let patch = json!({ "status": "acknowledged", "note": "failing over to replica", "actor": "oncall-bob" });
    let patched = harness
        .client
        .patch(harness.incident_url(&format!("/api/v1/incidents/{incident_id}")))
        .json(&patch)
        .send()
        .await
        .expect("patch with note");
    assert_eq!(patched.status().as_u16(), 200);
    let patched: Value = patched.json().await.expect("patch body");
    assert_eq!(patched["status"], "acknowledged");

    let notes: Value = harness
        .client
        .get(harness.incident_url(&format!("/api/v1/incidents/{incident_id}/notes")))
        .send()
        .await
        .expect("notes")
        .json()
        .await
        .expect("notes body");
    let notes = notes.as_array().expect("notes array");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["content"], "failing over to replica");
    assert_eq!(notes[0]["author"], "oncall-bob");

    let timeline: Value = harness
        .client
        .get(harness.incident_url(&format!("/api/v1/incidents/{incident_id}/timeline")))
        .send()
        .await
        .expect("timeline")
        .json()
        .await
        .expect("timeline body");
    let events = timeline.as_array().expect("timeline array");
    assert!(events.iter().any(|e| e["event_type"] == "note_added"));
    assert!(events.iter().any(|e| e["event_type"] == "status_changed"));
}

#[tokio::test]
async fn resolving_an_incident_updates_status_gauge_and_latency_histograms() {
    let harness = Harness::spawn().await;

    let create = json!({ "title": "payment webhook retries exhausted", "service": "payments", "severity": "high" });
    let created: Value = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&create)
        .send()
        .await
        .expect("create incident")
        .json()
        .await
        .expect("create body");
    let incident_id = created["id"].as_str().unwrap().to_string();

    harness
        .client
        .patch(harness.incident_url(&format!("/api/v1/incidents/{incident_id}")))
        .json(&json!({ "status": "resolved" }))
        .send()
        .await
        .expect("resolve");

    let body: String = harness.client.get(harness.incident_url("/metrics")).send().await.unwrap().text().await.unwrap();
    assert!(body.contains("incidents_by_status{status=\"resolved\"}"));
    assert!(body.contains("# TYPE incident_mtta_seconds histogram"));
    assert!(body.contains("incident_mtta_seconds_count"));
    assert!(body.contains("# TYPE incident_mttr_seconds histogram"));
    assert!(body.contains("incident_mttr_seconds_count"));
}

#[tokio::test]
async fn unknown_severity_is_rejected_with_422() {
    let harness = Harness::spawn().await;
    let response = harness
        .client
        .post(harness.incident_url("/api/v1/incidents"))
        .json(&json!({ "title": "x", "service": "y", "severity": "catastrophic" }))
        .send()
        .await
        .expect("create with bad severity");
    assert_eq!(response.status().as_u16(), 422);
}
