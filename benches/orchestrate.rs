// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for orchestration hot paths.
//!
//! Run with: `cargo bench --bench orchestrate`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::path::PathBuf;

use minion::orchestrate::{
    derive_branch_name, normalize_name, validate_branch_name, Agent, AgentStatus, EventBus,
    OrchestratorEvent, Task, TaskRequest,
};

/// Benchmark branch name derivation and validation.
fn bench_branch_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_names");
    group.throughput(Throughput::Elements(1));

    let names = [
        ("simple", "Alice"),
        ("spaces", "Code Review Bot"),
        ("symbols", "fix: the ~weird^ [branch]!"),
        ("unicode", "Zoë the Tester"),
    ];

    for (label, name) in names {
        group.bench_with_input(BenchmarkId::new("normalize", label), name, |b, name| {
            b.iter(|| normalize_name(black_box(name)));
        });
        group.bench_with_input(BenchmarkId::new("derive", label), name, |b, name| {
            b.iter(|| {
                derive_branch_name(
                    black_box("minion/"),
                    black_box(name),
                    black_box("0f8fad5b-d9cb-469f-a165-70867728950e"),
                )
            });
        });
    }

    let branch = derive_branch_name("minion/", "Code Review Bot", "0f8fad5b");
    group.bench_function("validate", |b| {
        b.iter(|| validate_branch_name(black_box(&branch)));
    });

    group.finish();
}

/// Benchmark event fan-out with varying subscriber counts.
fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_fanout");
    group.throughput(Throughput::Elements(1));

    let agent = Agent::new(
        "0f8fad5b",
        "Alice",
        PathBuf::from("/repo/.minion-worktrees/0f8fad5b"),
        "minion/alice-0f8fad5b",
    );
    let task = Task::new(&agent.id, &TaskRequest::new("write tests").with_context("uses tokio"));

    for subscribers in [0usize, 1, 8] {
        let bus = EventBus::new(1024);
        let mut receivers: Vec<_> = (0..subscribers).map(|_| bus.subscribe()).collect();

        group.bench_with_input(
            BenchmarkId::new("task_status_changed", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    bus.emit(OrchestratorEvent::task_status_changed(black_box(&task)));
                    for receiver in receivers.iter_mut() {
                        black_box(receiver.try_recv());
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("agent_status_changed", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    bus.emit(OrchestratorEvent::agent_status_changed(
                        black_box(&agent.id).as_str(),
                        AgentStatus::Running,
                    ));
                    for receiver in receivers.iter_mut() {
                        black_box(receiver.try_recv());
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark event serialization for transport.
fn bench_event_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_serialization");

    let mut task = Task::new("0f8fad5b", &TaskRequest::new("write tests"));
    task.start();
    task.complete("x".repeat(4096));
    let event = OrchestratorEvent::task_status_changed(&task);

    group.bench_function("to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&event)));
    });

    let json = serde_json::to_string(&event).unwrap();
    group.bench_function("from_json", |b| {
        b.iter(|| serde_json::from_str::<OrchestratorEvent>(black_box(&json)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_branch_names,
    bench_event_fanout,
    bench_event_serialization
);
criterion_main!(benches);
