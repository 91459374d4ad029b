//! Benchmarks for decoration rendering
//!
//! Decorations are repainted on every focus, hover and size change, on the
//! main thread, so painting must stay well below a frame.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cinewin_core::decorator::draw::{buffer_len, paint_border, paint_button, Canvas, BUTTON_COLOR_ACTIVE};
use cinewin_core::decorator::layout::{border_geometry, button_layout, hit_test, SurfaceIndex};
use cinewin_core::decorator::{DecoratorHandler, WindowDecorator};
use cinewin_core::geometry::{Point, Size};
use cinewin_core::registry::Registry;
use cinewin_core::shell::{ResizeEdge, ShellState};
use cinewin_core::testing::FakeCompositor;
use cinewin_core::wire::{Create, Interface, ObjectId};

const WINDOW_SIZES: [Size; 3] = [Size::new(1280, 720), Size::new(1920, 1080), Size::new(3840, 2160)];

fn border_paint_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("paint_border");

    for main_size in WINDOW_SIZES {
        for scale in [1, 2] {
            let geometry = border_geometry(SurfaceIndex::Top, main_size);
            let mut data = vec![0u8; buffer_len(geometry.size, scale)];
            group.bench_with_input(
                BenchmarkId::new(format!("top_x{scale}"), main_size),
                &geometry,
                |b, geometry| {
                    b.iter(|| {
                        let mut canvas = Canvas::new(&mut data, geometry.size, scale).unwrap();
                        paint_border(&mut canvas, SurfaceIndex::Top).unwrap();
                        for (kind, rect) in button_layout(geometry.size) {
                            paint_button(&mut canvas, kind, rect, BUTTON_COLOR_ACTIVE, false, false)
                                .unwrap();
                        }
                        black_box(data.len())
                    });
                },
            );
        }
    }

    group.finish();
}

fn hit_test_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hit_test");
    let main_size = Size::new(1920, 1080);
    let top = border_geometry(SurfaceIndex::Top, main_size).size;
    let buttons = button_layout(top);

    group.bench_function("title_bar", |b| {
        b.iter(|| {
            black_box(hit_test(
                black_box(SurfaceIndex::Top),
                top,
                black_box(Point::new(900, 20)),
                &buttons,
            ))
        });
    });

    group.bench_function("corner", |b| {
        b.iter(|| {
            black_box(hit_test(
                black_box(SurfaceIndex::Top),
                top,
                black_box(Point::new(2, 2)),
                &buttons,
            ))
        });
    });

    group.finish();
}

struct IgnoreWindowOps;

impl DecoratorHandler for IgnoreWindowOps {
    fn on_window_move(&self, _: ObjectId, _: u32) {}
    fn on_window_resize(&self, _: ObjectId, _: u32, _: ResizeEdge) {}
    fn on_window_show_context_menu(&self, _: ObjectId, _: u32, _: Point) {}
    fn on_window_minimize(&self) {}
    fn on_window_maximize(&self) {}
    fn on_window_close(&self) {}
}

fn decorator_reallocate_benchmark(c: &mut Criterion) {
    let fake = FakeCompositor::desktop();
    let connection = fake.connection();
    let mut registry = Registry::new(&connection);
    let compositor = registry.request_singleton(Interface::Compositor, 1, 4, true).unwrap();
    let subcompositor = registry.request_singleton(Interface::Subcompositor, 1, 1, true).unwrap();
    let shm = registry.request_singleton(Interface::Shm, 1, 1, true).unwrap();
    registry.bind().unwrap();
    let compositor = compositor.object().unwrap();
    let surface = connection.wire().create(compositor, Create::Surface, None).unwrap();

    let handler: Arc<dyn DecoratorHandler> = Arc::new(IgnoreWindowOps);
    let decorator = WindowDecorator::new(
        &connection,
        Arc::downgrade(&handler),
        surface,
        compositor,
        subcompositor.object(),
        shm.object(),
        true,
    );

    let mut group = c.benchmark_group("decorator");
    let mut toggle = false;
    group.bench_function("resize_1080p", |b| {
        b.iter(|| {
            toggle = !toggle;
            let size = if toggle { Size::new(1920, 1080) } else { Size::new(1910, 1070) };
            decorator.set_state(size, 1, ShellState::ACTIVATED).unwrap();
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    border_paint_benchmark,
    hit_test_benchmark,
    decorator_reallocate_benchmark,
);
criterion_main!(benches);
