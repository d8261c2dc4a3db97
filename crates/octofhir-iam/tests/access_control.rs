//! End-to-end access decision scenarios.

use octofhir_iam::prelude::*;
use octofhir_iam::storage::InMemoryIamStorage;
use time::{Duration, OffsetDateTime};

fn clinical_matrix() -> PermissionMatrix {
    PermissionMatrix::new("clinical", "Clinical Access", 1, "clinical")
        .with_role_permission("nurse", ResourcePattern::new("observation"), AccessLevel::Write)
        .with_role_permission("physician", ResourcePattern::new("patient:*"), AccessLevel::Read)
        .with_category_access("lab", "physician", AccessLevel::Write)
        .with_emergency_role("physician")
        .with_supervision("nurse", ["physician"])
}

fn setup() -> IamService {
    let service = IamService::new(IamConfig::default()).expect("valid config");
    for actor in [
        ActorIdentity::human("nurse-1", "Nurse One").with_credential("nurse"),
        ActorIdentity::human("dr-1", "Doctor One").with_credential("physician"),
        ActorIdentity::human("clerk-1", "Clerk One").with_credential("clerk"),
        ActorIdentity::agent("agent-1", "Scheduling Agent"),
    ] {
        service.register_actor(actor).expect("register actor");
    }
    service
        .publish_matrix("admin", clinical_matrix())
        .expect("publish matrix");
    service
}

fn grant(actor: &str, pattern: &str, level: AccessLevel) -> GrantRequest {
    GrantRequest::new(actor, ResourcePattern::new(pattern), level, PermissionScope::Global, "admin")
}

fn ctx() -> AccessContext {
    AccessContext::new()
}

#[test]
fn nurse_writes_observation_through_role_matrix() {
    let service = setup();
    assert!(service.permissions().for_actor("nurse-1").is_empty());

    let allowed = service
        .check_access("nurse-1", "observation-42", AccessLevel::Write, &ctx())
        .unwrap();
    assert!(allowed);

    let entry = &service.get_audit_trail(&AuditQuery::new().for_actor("nurse-1"))[0];
    assert_eq!(entry.event_type, AuditEventType::AccessGranted);
    assert_eq!(entry.detail_str("access_pattern"), Some("role_based"));
    assert_eq!(entry.detail_str("matrix_id"), Some("clinical"));
    assert_eq!(entry.detail_str("role"), Some("nurse"));
}

#[test]
fn revocation_round_trip() {
    let service = setup();
    let permission = service
        .grant_permission(grant("clerk-1", "patient:123", AccessLevel::Write))
        .unwrap();
    assert!(service
        .check_access("clerk-1", "patient:123", AccessLevel::Write, &ctx())
        .unwrap());

    service
        .revoke_permission("admin", &permission.permission_id, "no longer assigned")
        .unwrap();
    assert!(!service
        .check_access("clerk-1", "patient:123", AccessLevel::Write, &ctx())
        .unwrap());

    // the grant event survives revocation
    let history = service.get_audit_trail(
        &AuditQuery::new()
            .for_actor("admin")
            .with_event_type(AuditEventType::PermissionModified),
    );
    assert!(history.iter().any(|e| e.detail_str("action") == Some("granted")
        && e.detail_str("permission_id") == Some(permission.permission_id.as_str())));
}

#[test]
fn expired_permission_never_grants() {
    let service = setup();
    let expired_at = OffsetDateTime::now_utc() - Duration::seconds(1);
    service
        .grant_permission(grant("clerk-1", "patient:123", AccessLevel::Admin).valid_until(expired_at))
        .unwrap();

    for level in AccessLevel::ALL {
        assert!(
            !service
                .check_access("clerk-1", "patient:123", level, &ctx())
                .unwrap(),
            "expired permission granted {level}"
        );
    }

    let decision = service
        .decide("clerk-1", "patient:123", AccessLevel::Read, &ctx())
        .unwrap();
    let reason = decision.deny_reason().expect("denied");
    assert_eq!(reason.code, "insufficient_permissions");
    assert_eq!(reason.detail, Some("permission_expired"));
}

#[test]
fn wildcard_pattern_matches_prefix_only() {
    let service = setup();
    service
        .grant_permission(grant("clerk-1", "patient:*", AccessLevel::Read))
        .unwrap();

    assert!(service.check_access("clerk-1", "patient:123", AccessLevel::Read, &ctx()).unwrap());
    assert!(service.check_access("clerk-1", "patient:456", AccessLevel::Read, &ctx()).unwrap());
    assert!(!service.check_access("clerk-1", "observation:123", AccessLevel::Read, &ctx()).unwrap());
}

#[test]
fn role_entry_for_one_resource_does_not_cover_siblings() {
    let service = setup();
    service
        .register_actor(ActorIdentity::human("care-1", "Carer").with_credential("carer"))
        .unwrap();
    service
        .publish_matrix(
            "admin",
            PermissionMatrix::new("home-care", "Home Care", 1, "clinical")
                .with_role_permission("carer", "patient:1", AccessLevel::Write)
                .with_category_access("lab", "carer", AccessLevel::Read),
        )
        .unwrap();

    assert!(service.check_access("care-1", "patient:1", AccessLevel::Write, &ctx()).unwrap());
    assert!(service.check_access("care-1", "patient:1/care-plan", AccessLevel::Write, &ctx()).unwrap());
    for sibling in ["patient:10", "patient:1999", "patient:1a"] {
        assert!(
            !service.check_access("care-1", sibling, AccessLevel::Read, &ctx()).unwrap(),
            "role entry for patient:1 leaked to {sibling}"
        );
    }

    assert!(service.check_access("care-1", "lab:cbc", AccessLevel::Read, &ctx()).unwrap());
    assert!(!service.check_access("care-1", "laboratory-7", AccessLevel::Read, &ctx()).unwrap());
}

#[test]
fn grants_iff_applying_permission_is_sufficient() {
    let service = setup();
    let now = OffsetDateTime::now_utc();
    service
        .grant_permission(
            grant("clerk-1", "encounter:*", AccessLevel::Write)
                .valid_from(now - Duration::hours(1))
                .valid_until(now + Duration::hours(1))
                .condition("department", "icu"),
        )
        .unwrap();
    let icu = ctx().with("department", "icu");

    // level ordering
    assert!(service.check_access("clerk-1", "encounter:1", AccessLevel::Read, &icu).unwrap());
    assert!(service.check_access("clerk-1", "encounter:1", AccessLevel::Write, &icu).unwrap());
    assert!(!service.check_access("clerk-1", "encounter:1", AccessLevel::Delete, &icu).unwrap());

    // conditions
    assert!(!service.check_access("clerk-1", "encounter:1", AccessLevel::Read, &ctx()).unwrap());
    assert!(!service
        .check_access("clerk-1", "encounter:1", AccessLevel::Read, &ctx().with("department", "er"))
        .unwrap());

    // window
    let later = now + Duration::hours(2);
    assert!(!service
        .check_access_at("clerk-1", "encounter:1", AccessLevel::Read, &icu, later)
        .unwrap());
}

#[test]
fn inactive_and_unknown_actors_are_denied() {
    let service = setup();
    service.set_actor_active("admin", "nurse-1", false).unwrap();

    for actor in ["nurse-1", "ghost"] {
        let decision = service
            .decide(actor, "observation-42", AccessLevel::Read, &ctx())
            .unwrap();
        assert_eq!(
            decision.deny_reason().map(|r| r.code),
            Some("actor_not_found_or_inactive")
        );
    }
}

#[test]
fn every_decision_is_audited_once() {
    let service = setup();
    service
        .grant_permission(grant("dr-1", "patient:9", AccessLevel::Write))
        .unwrap();

    let cases: [(&str, &str, AccessLevel); 5] = [
        ("dr-1", "patient:9", AccessLevel::Write),
        ("dr-1", "lab-17", AccessLevel::Write),
        ("clerk-1", "patient:9", AccessLevel::Read),
        ("ghost", "patient:9", AccessLevel::Read),
        ("agent-1", "", AccessLevel::Read),
    ];

    for (actor, resource, level) in cases {
        let before = service.ledger().len();
        let _ = service.check_access(actor, resource, level, &ctx());
        assert_eq!(service.ledger().len(), before + 1, "{actor} on {resource:?}");
        let latest = &service.get_audit_trail(&AuditQuery::new().with_limit(1))[0];
        assert_eq!(latest.actor_id, actor);
    }
}

#[test]
fn concurrent_checks_count_every_use_and_audit_once() {
    const THREADS: usize = 8;
    const CHECKS: usize = 50;
    let service = setup();
    let permission = service
        .grant_permission(grant("clerk-1", "patient:*", AccessLevel::Read))
        .unwrap();
    let before = service.ledger().len();

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let service = &service;
            s.spawn(move || {
                for i in 0..CHECKS {
                    let allowed = service
                        .check_access("clerk-1", &format!("patient:{t}-{i}"), AccessLevel::Read, &ctx())
                        .unwrap();
                    assert!(allowed);
                }
            });
        }
    });

    let total = THREADS * CHECKS;
    assert_eq!(service.ledger().len(), before + total);

    let granted = service.get_audit_trail(
        &AuditQuery::new()
            .for_actor("clerk-1")
            .with_event_type(AuditEventType::AccessGranted),
    );
    assert_eq!(granted.len(), total);
    let mut resources: Vec<String> = granted.iter().filter_map(|e| e.resource_id.clone()).collect();
    resources.sort();
    resources.dedup();
    assert_eq!(resources.len(), total);

    let permission = service.permissions().get(&permission.permission_id).unwrap();
    assert_eq!(permission.use_count, total as u64);
}

#[test]
fn empty_actor_is_rejected_without_audit() {
    let service = setup();
    let before = service.ledger().len();
    let err = service
        .check_access("", "patient:1", AccessLevel::Read, &ctx())
        .unwrap_err();
    assert!(matches!(err, IamError::InvalidInput { .. }));
    assert_eq!(service.ledger().len(), before);
}

#[test]
fn audit_ids_and_timestamps_are_monotonic() {
    let service = setup();
    for i in 0..50 {
        let _ = service.check_access("nurse-1", &format!("observation-{i}"), AccessLevel::Read, &ctx());
    }
    let trail = service.get_audit_trail(&AuditQuery::new());
    for pair in trail.windows(2) {
        assert!(pair[0].audit_id > pair[1].audit_id);
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
}

#[test]
fn fail_closed_denies_when_audit_cannot_be_persisted() {
    let mut config = IamConfig::default();
    config.audit.fail_closed = true;
    config.storage.queue_capacity = 1;
    let storage = std::sync::Arc::new(InMemoryIamStorage::new());
    let service = IamService::with_storage(config, storage).unwrap();

    // registration fills the queue; no writer is draining it
    service
        .register_actor(ActorIdentity::human("dr-1", "Doctor").with_credential("physician"))
        .unwrap();
    service.publish_matrix("admin", clinical_matrix()).unwrap();

    let decision = service
        .decide("dr-1", "patient:1", AccessLevel::Read, &ctx())
        .unwrap();
    assert_eq!(decision.deny_reason().map(|r| r.code), Some("audit_unavailable"));
    assert!(service.ledger().undelivered() > 0);

    assert!(!service
        .request_emergency_access("dr-1", "patient:1", "cardiac arrest", EmergencyType::LifeThreatening)
        .unwrap());
    assert!(service.permissions().for_actor("dr-1").is_empty());
}

#[test]
fn fail_open_keeps_decision_when_audit_cannot_be_persisted() {
    let mut config = IamConfig::default();
    config.storage.queue_capacity = 1;
    let storage = std::sync::Arc::new(InMemoryIamStorage::new());
    let service = IamService::with_storage(config, storage).unwrap();
    service
        .register_actor(ActorIdentity::human("dr-1", "Doctor").with_credential("physician"))
        .unwrap();
    service.publish_matrix("admin", clinical_matrix()).unwrap();

    assert!(service
        .check_access("dr-1", "patient:1", AccessLevel::Read, &ctx())
        .unwrap());
    assert!(service.ledger().undelivered() > 0);
}
