//! # Probe Sync Benchmark
//!
//! Measures one frame of light probe sync: packet build on the simulation
//! side plus packet application (with compaction) on the core side.
//!
//! Target: moving 5% of a 4096-probe volume costs well under a frame.

#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tandem_core::context::{enter, ExecutionContext};
use tandem_core::{CoreObjectRegistry, FrameAlloc, SimObjectRegistry};
use tandem_rendering::{CoreRenderer, HeadlessBackend, LightProbeVolume, TaskScheduler};
use tandem_shared::Vec3;

const FRAME_ALLOC_BYTES: usize = 256 * 1024;

struct Pair {
    sim: SimObjectRegistry<CoreRenderer>,
    core: CoreObjectRegistry<CoreRenderer>,
    renderer: CoreRenderer,
    handle: tandem_core::Handle,
    ids: Vec<u32>,
}

fn pair(probes: u32) -> Pair {
    let mut volume = LightProbeVolume::new();
    let ids = (0..probes)
        .map(|i| volume.add_probe(Vec3::new(i as f32, 0.0, 0.0)))
        .collect();
    let mut renderer = CoreRenderer::new(
        Box::new(HeadlessBackend::new()),
        Arc::new(TaskScheduler::new()),
    );
    let mut sim: SimObjectRegistry<CoreRenderer> = SimObjectRegistry::new();
    let mut core = CoreObjectRegistry::new();
    let (handle, half) = sim.register(Box::new(volume));
    core.create(handle, half, &mut renderer);

    let batch = sim.sync_to_core(FrameAlloc::new(FRAME_ALLOC_BYTES)).unwrap();
    core.apply_batch(&batch, &mut renderer).unwrap();
    Pair {
        sim,
        core,
        renderer,
        handle,
        ids,
    }
}

/// Move a share of the probes, then sync.
fn bench_partial_move(c: &mut Criterion) {
    let _ctx = enter(ExecutionContext::Core);
    let mut group = c.benchmark_group("probe_sync_partial_move");

    for probes in [64, 512, 4096] {
        for moved_pct in [5, 50] {
            let mut p = pair(probes);
            let moved = (probes as usize * moved_pct / 100).max(1);
            let mut alloc = Some(FrameAlloc::new(FRAME_ALLOC_BYTES));
            let mut tick = 0.0f32;

            group.bench_with_input(
                BenchmarkId::new(format!("{moved_pct}pct"), probes),
                &probes,
                |b, _| {
                    b.iter(|| {
                        tick += 1.0;
                        let volume = p.sim.get_mut::<LightProbeVolume>(p.handle).unwrap();
                        for id in &p.ids[..moved] {
                            volume.set_probe_position(*id, Vec3::new(tick, *id as f32, 0.0));
                        }
                        let mut batch = p
                            .sim
                            .sync_to_core(alloc.take().unwrap())
                            .unwrap();
                        p.core.apply_batch(black_box(&batch), &mut p.renderer).unwrap();
                        batch.alloc.clear();
                        alloc = Some(batch.alloc);
                    });
                },
            );
        }
    }
    group.finish();
}

/// Remove and re-add probes so every frame exercises compaction.
fn bench_churn(c: &mut Criterion) {
    let _ctx = enter(ExecutionContext::Core);
    let mut group = c.benchmark_group("probe_sync_churn");

    for probes in [64, 512, 4096] {
        let mut p = pair(probes);
        let mut alloc = Some(FrameAlloc::new(FRAME_ALLOC_BYTES));

        group.bench_with_input(BenchmarkId::from_parameter(probes), &probes, |b, _| {
            b.iter(|| {
                let volume = p.sim.get_mut::<LightProbeVolume>(p.handle).unwrap();
                let victim = volume.probe_ids().next().unwrap();
                volume.remove_probe(victim);
                volume.add_probe(Vec3::ONE);

                let mut batch = p.sim.sync_to_core(alloc.take().unwrap()).unwrap();
                p.core.apply_batch(black_box(&batch), &mut p.renderer).unwrap();
                batch.alloc.clear();
                alloc = Some(batch.alloc);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_partial_move, bench_churn);
criterion_main!(benches);
