//! Benchmarks for hooked method dispatch.
//!
//! Measures the cost a hook adds to a call:
//! - Unhooked baseline through the in-process runtime
//! - Pass-through trampoline with no callbacks left
//! - Chains of recording callbacks of growing length
//! - Early return from the first `before` stage

extern crate hookscope;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hookscope::prelude::*;
use std::{hint::black_box, sync::Arc};

fn setup() -> (Arc<MethodTable>, HookEngine, Member) {
    let runtime = Arc::new(MethodTable::new());
    let member = Member::from_descriptor("bench/Target", "add", "(II)I", MemberFlags::STATIC).unwrap();
    runtime.define(&member, |_, args| {
        Ok(Value::Int(
            args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0),
        ))
    });
    let engine = HookEngine::new(runtime.clone(), HookConfig::in_memory());
    (runtime, engine, member)
}

fn noop_callback(priority: i32) -> HookCallback {
    HookCallback::with_priority(priority)
        .before(|param| {
            black_box(param.args.len());
            Ok(())
        })
        .after(|param| {
            black_box(param.result());
            Ok(())
        })
}

/// Benchmark a call without any hook installed.
fn bench_unhooked(c: &mut Criterion) {
    let (runtime, _engine, member) = setup();
    let args = [Value::Int(1), Value::Int(2)];

    c.bench_function("dispatch_unhooked", |b| {
        b.iter(|| black_box(runtime.invoke(&member, None, black_box(&args))));
    });
}

/// Benchmark a trampoline whose only callback was removed again.
fn bench_pass_through(c: &mut Criterion) {
    let (runtime, engine, member) = setup();
    engine.hook_method(&member, HookCallback::new()).unwrap().unhook();
    let args = [Value::Int(1), Value::Int(2)];

    c.bench_function("dispatch_pass_through", |b| {
        b.iter(|| black_box(runtime.invoke(&member, None, black_box(&args))));
    });
}

/// Benchmark chains of 1, 4 and 16 callbacks.
fn bench_callback_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_chain");
    for length in [1, 4, 16] {
        let (runtime, engine, member) = setup();
        for priority in 0..length {
            engine.hook_method(&member, noop_callback(priority)).unwrap();
        }
        let args = [Value::Int(1), Value::Int(2)];

        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, _| {
            b.iter(|| black_box(runtime.invoke(&member, None, black_box(&args))));
        });
    }
    group.finish();
}

/// Benchmark a replacement that skips the original body.
fn bench_early_return(c: &mut Criterion) {
    let (runtime, engine, member) = setup();
    engine.hook_method(&member, HookCallback::return_constant(0)).unwrap();
    for priority in 0..8 {
        engine.hook_method(&member, noop_callback(priority)).unwrap();
    }
    let args = [Value::Int(1), Value::Int(2)];

    c.bench_function("dispatch_early_return", |b| {
        b.iter(|| black_box(runtime.invoke(&member, None, black_box(&args))));
    });
}

criterion_group!(
    benches,
    bench_unhooked,
    bench_pass_through,
    bench_callback_chain,
    bench_early_return
);
criterion_main!(benches);
