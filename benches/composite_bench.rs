use criterion::{criterion_group, criterion_main, Criterion};
use webcell::engine::recording::RecordingEngine;
use webcell::{Context, PixelFormat, SessionConfig, SurfaceBuffer, Viewport};

// Stacking two painted views into the RGBA composite at overlay size
fn bench_composite(c: &mut Criterion) {
    let mut config = SessionConfig {
        viewport: Viewport { width: 1280, height: 720 },
        ..Default::default()
    };
    let dir = tempfile::tempdir().expect("temp dir");
    config.engine.cache_path = dir.path().join("cache");
    let engine = RecordingEngine::new();
    let ctx = Context::new(config, engine.clone()).expect("context");
    let handle = ctx.create_session().expect("session");
    ctx.tick();
    for b in engine.browsers() {
        b.paint_solid([40, 80, 120, 255]);
    }

    c.bench_function("composite_1280x720", |b| {
        b.iter(|| {
            let _ = ctx.viewport_rgba(handle).unwrap();
        })
    });
    ctx.shutdown();
}

// The BGRA to RGBA row conversion alone
fn bench_blit(c: &mut Criterion) {
    let src = SurfaceBuffer::new(1280, 672, PixelFormat::Bgra8888);
    let dst = SurfaceBuffer::new(1280, 720, PixelFormat::Rgba8888);
    src.ensure();
    dst.ensure();
    let frame = vec![7u8; src.byte_len()];
    src.write(&frame).expect("frame fits");

    c.bench_function("blit_bgra_to_rgba", |b| {
        b.iter(|| {
            src.blit_into(&dst, 48).unwrap();
        })
    });
}

criterion_group!(benches, bench_composite, bench_blit);
criterion_main!(benches);
