use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use flowfill::direction::Direction;
use flowfill::poisson::{LinkWeights, PoissonSystem};
use flowfill::{
    propagate_color, FlowField, FlowSet, FlowVolume, Frame, Mask, Plane, PoissonConfig,
    PropagationConfig,
};

fn noisy_plane(w: u32, h: u32, seed: u64) -> Plane {
    let mut rng = StdRng::seed_from_u64(seed);
    Plane::from_fn(w, h, |x, y| {
        image::Luma([0.01 * x as f32 + 0.02 * y as f32 + rng.gen_range(-0.05f32..0.05f32)])
    })
}

fn centered_hole(w: u32, h: u32, half: u32) -> Mask {
    let (cx, cy) = (w / 2, h / 2);
    Mask::from_fn(w, h, |x, y| x.abs_diff(cx) < half && y.abs_diff(cy) < half)
}

fn bench_poisson(c: &mut Criterion) {
    let plane = noisy_plane(160, 120, 7);
    let mask = centered_hole(160, 120, 24);
    let system = PoissonSystem::new(&mask, &LinkWeights::uniform(160, 120));
    let cfg = PoissonConfig::default();

    c.bench_function("laplace_fill_160x120_48sq", |b| {
        b.iter(|| {
            let out = system
                .solve(black_box(&plane), None, black_box(&cfg))
                .expect("uniform weights converge");
            black_box(out)
        })
    });

    c.bench_function("poisson_system_build_160x120_48sq", |b| {
        b.iter(|| {
            let s = PoissonSystem::new(black_box(&mask), &LinkWeights::uniform(160, 120));
            black_box(s.len())
        })
    });
}

fn panning_video(n: usize, w: u32, h: u32) -> (Vec<Frame>, Vec<Mask>, FlowSet) {
    let mut rng = StdRng::seed_from_u64(42);
    let phase: f32 = rng.gen_range(0.0..1.0);
    let frames: Vec<Frame> = (0..n)
        .map(|t| {
            Frame::from_fn(w, h, |x, y| {
                let u = (x as f32 + t as f32) * 0.11 + phase;
                Rgb([u.sin() * 0.5 + 0.5, (y as f32 * 0.07).cos() * 0.5 + 0.5, 0.3])
            })
        })
        .collect();
    let masks = (0..n).map(|_| centered_hole(w, h, 12)).collect();
    let volume = |d: Direction, v: [f32; 2]| {
        FlowVolume::new(d, n, (0..d.field_count(n)).map(|_| FlowField::from_fn(w, h, |_, _| v)).collect())
    };
    let flows = FlowSet {
        forward: volume(Direction::Forward, [-1.0, 0.0]),
        backward: volume(Direction::Backward, [1.0, 0.0]),
        nonlocal: None,
    };
    (frames, masks, flows)
}

fn bench_propagation(c: &mut Criterion) {
    let (frames, masks, flows) = panning_video(12, 160, 120);
    let cfg = PropagationConfig::default();

    c.bench_function("propagate_color_12x160x120", |b| {
        b.iter(|| {
            let (out, remaining) =
                propagate_color(black_box(&frames), black_box(&masks), &flows, &cfg)
                    .expect("shapes are consistent");
            black_box((out.len(), remaining.len()))
        })
    });
}

criterion_group!(hotpaths, bench_poisson, bench_propagation);
criterion_main!(hotpaths);
