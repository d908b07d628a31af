#[macro_use]
extern crate criterion;

use criterion::black_box;
use criterion::Criterion;

use harness_core::extractor::{AnyP, Extractor};

#[derive(Clone)]
struct Obs {
    x: f32,
    y: f32,
}

fn anyp_write_read_bench(c: &mut Criterion) {
    let mut buf = vec![0u8; std::mem::size_of::<f32>() * 4096];
    c.bench_function("AnyP write+read 4096 f32 slots", move |b| {
        b.iter(|| {
            let mut anyp = AnyP::new(&mut buf, std::mem::size_of::<f32>());
            for i in 0..4096 {
                anyp.write(i, i as f32);
            }
            let mut acc = 0.0f32;
            for i in 0..4096 {
                acc += anyp.read::<f32>(i);
            }
            black_box(acc)
        })
    });
}

fn extractor_fill_batch_bench(c: &mut Criterion) {
    let mut extractor: Extractor<Obs> = Extractor::new();
    extractor.add_field("x", |o: &Obs| o.x, |o: &mut Obs, v| o.x = v);
    extractor.add_field("y", |o: &Obs| o.y, |o: &mut Obs, v| o.y = v);

    let states: Vec<Obs> = (0..1024).map(|i| Obs { x: i as f32, y: -(i as f32) }).collect();
    let mut buf_x = vec![0u8; std::mem::size_of::<f32>() * states.len()];
    let mut buf_y = vec![0u8; std::mem::size_of::<f32>() * states.len()];

    c.bench_function("Extractor fill 1024-slot batch, 2 fields", move |b| {
        b.iter(|| {
            let mut anyp_x = AnyP::new(&mut buf_x, std::mem::size_of::<f32>());
            let mut anyp_y = AnyP::new(&mut buf_y, std::mem::size_of::<f32>());
            for (idx, state) in states.iter().enumerate() {
                extractor.extract("x", state, &mut anyp_x, idx);
                extractor.extract("y", state, &mut anyp_y, idx);
            }
        })
    });
}

criterion_group!(benches, anyp_write_read_bench, extractor_fill_batch_bench);
criterion_main!(benches);
