//! Benchmarks for the access decision hot path.
//!
//! Run with: `cargo bench -p octofhir-iam check_access`

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use octofhir_iam::prelude::*;

/// A service with a few hundred actors, each holding a handful of grants.
fn create_benchmark_service() -> IamService {
    let service = IamService::default();
    service
        .publish_matrix(
            "bench",
            PermissionMatrix::new("clinical", "Clinical", 1, "clinical")
                .with_role_permission("nurse", ResourcePattern::new("observation"), AccessLevel::Write)
                .with_role_permission("physician", ResourcePattern::any(), AccessLevel::Read)
                .with_category_access("lab", "physician", AccessLevel::Write),
        )
        .unwrap();

    for i in 0..500 {
        let actor_id = format!("actor-{i}");
        let role = if i % 2 == 0 { "nurse" } else { "physician" };
        service
            .register_actor(ActorIdentity::human(actor_id.clone(), "Bench").with_credential(role))
            .unwrap();
        for p in 0..8 {
            service
                .grant_permission(GrantRequest::new(
                    actor_id.clone(),
                    ResourcePattern::new(format!("patient:{p}*")),
                    AccessLevel::Write,
                    PermissionScope::Patient,
                    "bench",
                ))
                .unwrap();
        }
    }
    service
}

fn bench_direct_grant(c: &mut Criterion) {
    let service = create_benchmark_service();
    let context = AccessContext::new();

    c.bench_function("check_access_direct_grant", |b| {
        b.iter(|| {
            service
                .check_access(
                    black_box("actor-1"),
                    black_box("patient:7-observation"),
                    AccessLevel::Read,
                    &context,
                )
                .unwrap()
        })
    });
}

fn bench_role_fallback(c: &mut Criterion) {
    let service = create_benchmark_service();
    let context = AccessContext::new();

    c.bench_function("check_access_role_fallback", |b| {
        b.iter(|| {
            service
                .check_access(
                    black_box("actor-2"),
                    black_box("observation-42"),
                    AccessLevel::Write,
                    &context,
                )
                .unwrap()
        })
    });
}

fn bench_denial(c: &mut Criterion) {
    let service = create_benchmark_service();
    let context = AccessContext::new();

    c.bench_function("check_access_denied", |b| {
        b.iter(|| {
            service
                .check_access(
                    black_box("actor-2"),
                    black_box("billing:1"),
                    AccessLevel::Delete,
                    &context,
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_direct_grant, bench_role_fallback, bench_denial);
criterion_main!(benches);
