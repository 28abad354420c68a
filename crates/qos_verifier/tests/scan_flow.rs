//! Scan batch handling: storage-unit filtering, missing requirements, and
//! per-file fan-out into operations.

mod common;

use common::{disk_requirements, file, sticky_replica, Harness};
use qos_verifier::types::{QoSAction, QoSMessageType, ScanVerificationRequest};

#[tokio::test]
async fn scan_batch_verifies_every_file() {
    let harness = Harness::with_pools(&["pool-a", "pool-b"]);
    for id in ["0000A", "0000B"] {
        harness
            .requirements
            .insert(disk_requirements(id, 1, &["pool-a"]));
        harness.probe.set(&file(id), vec![sticky_replica("pool-a")]);
    }

    harness
        .handler
        .handle_scan_request(ScanVerificationRequest {
            pool: "pool-a".to_string(),
            message_type: QoSMessageType::PoolStatusUp,
            storage_unit: None,
            files: vec![file("0000A"), file("0000B")],
        })
        .await;

    let completions = harness.listener.completions();
    assert_eq!(completions.len(), 2);
    assert!(completions
        .iter()
        .all(|(_, action, error)| *action == QoSAction::Void && error.is_none()));
    assert_eq!(harness.handler.operation_count(), 0);
    assert_eq!(harness.handler.counters().scans_received, 1);
}

#[tokio::test]
async fn file_outside_the_scanned_storage_unit_is_skipped() {
    let harness = Harness::with_pools(&["pool-a", "pool-b"]);
    // deficient file, but belonging to a different unit than the scan
    harness
        .requirements
        .insert(disk_requirements("0000C", 2, &["pool-a"]));
    harness
        .probe
        .set(&file("0000C"), vec![sticky_replica("pool-a")]);

    harness
        .handler
        .handle_scan_request(ScanVerificationRequest {
            pool: "pool-a".to_string(),
            message_type: QoSMessageType::SystemScan,
            storage_unit: Some("other:unit@enstore".to_string()),
            files: vec![file("0000C")],
        })
        .await;

    // no copy is dispatched for a file that left the unit
    assert_eq!(harness.adjuster.request_count(), 0);
    let completions = harness.listener.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].1, QoSAction::Void);
}

#[tokio::test]
async fn scan_file_without_requirements_is_voided() {
    let harness = Harness::with_pools(&["pool-a"]);

    harness
        .handler
        .handle_scan_request(ScanVerificationRequest {
            pool: "pool-a".to_string(),
            message_type: QoSMessageType::PoolStatusDown,
            storage_unit: None,
            files: vec![file("0000D")],
        })
        .await;

    let completions = harness.listener.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].1, QoSAction::Void);
    assert!(completions[0].2.is_none());
}

#[tokio::test]
async fn scan_driven_deficit_goes_through_the_adjuster() {
    let harness = Harness::with_pools(&["pool-a", "pool-b"]);
    harness
        .requirements
        .insert(disk_requirements("0000E", 2, &["pool-a"]));
    harness
        .probe
        .set(&file("0000E"), vec![sticky_replica("pool-a")]);

    harness
        .handler
        .handle_scan_request(ScanVerificationRequest {
            pool: "pool-a".to_string(),
            message_type: QoSMessageType::PoolStatusUp,
            storage_unit: None,
            files: vec![file("0000E")],
        })
        .await;

    let request = harness.adjuster.last_request();
    assert_eq!(request.action, QoSAction::CopyReplica);
    // pool-a is this operation's parent, so the copy must land elsewhere
    assert_eq!(request.target.as_deref(), Some("pool-b"));
    assert_eq!(harness.handler.operation_count(), 1);
}
