//! End-to-end tests driving whole frames through the mock backend.

use borealis_core::Color;
use borealis_core::geometry::Rect;
use borealis_render::testing::{BackendCall, RecordingBackend};
use borealis_render::{
    FrameDriver, FrameScene, MAX_BATCH_QUADS, RenderError, RenderHandle, Space,
    TEXTURE_BATCH_THRESHOLD, TextureId, TextureRef, Uniform, UniformValue,
};
use glam::{Mat3, Vec2};

/// Scene that only draws UI, via the given closure.
struct UiScene<F: FnMut(&mut RenderHandle)>(F);

impl<F: FnMut(&mut RenderHandle)> FrameScene for UiScene<F> {
    fn draw_ui(&mut self, render: &mut RenderHandle) {
        (self.0)(render)
    }
}

/// Scene that only draws world-space tiles, via the given closure.
struct WorldScene<F: FnMut(&mut RenderHandle)>(F);

impl<F: FnMut(&mut RenderHandle)> FrameScene for WorldScene<F> {
    fn draw_tiles(&mut self, render: &mut RenderHandle) {
        (self.0)(render)
    }
}

fn quad(render: &mut RenderHandle, handle: borealis_render::DrawingHandle, tex: TextureId) {
    render.draw_texture_rect(
        handle,
        TextureRef::whole(tex),
        Vec2::ZERO,
        Vec2::ONE,
        Color::WHITE,
        None,
    );
}

#[test]
fn empty_frame_issues_no_draws() {
    let mut backend = RecordingBackend::new();
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    struct Empty;
    impl FrameScene for Empty {}
    driver.render_frame(&mut backend, &mut Empty).unwrap();
    assert_eq!(backend.draw_calls(), 0);
    assert_eq!(backend.scissor_toggles(), 0);
}

#[test]
fn long_run_becomes_one_batch() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for _ in 0..20 {
            quad(render, handle, tex);
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    assert_eq!(backend.batch_draws(), 1);
    assert_eq!(backend.quad_draws(), 0);
    assert_eq!(backend.last_vertices().len(), 80);
    assert_eq!(backend.last_indices().len(), 100);
    // One restart sentinel terminates each quad's strip.
    for (i, &index) in backend.last_indices().iter().enumerate() {
        if i % 5 == 4 {
            assert_eq!(index, 0xFFFF);
        } else {
            assert!(index < 80);
        }
    }
    // Transforms are baked into the mesh, so the model uniform is reset.
    assert_eq!(
        backend.last_uniform(Uniform::ModelMatrix),
        Some(UniformValue::Mat3(Mat3::IDENTITY))
    );
}

#[test]
fn threshold_is_the_batching_boundary() {
    for (quads, batches, singles) in [
        (TEXTURE_BATCH_THRESHOLD - 1, 0, TEXTURE_BATCH_THRESHOLD - 1),
        (TEXTURE_BATCH_THRESHOLD, 1, 0),
    ] {
        let mut backend = RecordingBackend::new();
        let tex = backend.add_texture(32, 32, false);
        let mut scene = UiScene(|render: &mut RenderHandle| {
            let handle = render.create_handle(Space::Screen);
            for _ in 0..quads {
                quad(render, handle, tex);
            }
        });
        let mut driver = FrameDriver::new(800.0, 600.0, false);
        driver.render_frame(&mut backend, &mut scene).unwrap();
        assert_eq!(backend.batch_draws(), batches);
        assert_eq!(backend.quad_draws(), singles);
    }
}

#[test]
fn short_run_replays_with_per_quad_uniforms() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let a = Vec2::new(10.0, 20.0);
    let b = Vec2::new(42.0, 52.0);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        render.draw_texture_rect(handle, TextureRef::whole(tex), a, b, Color::RED, None);
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    assert_eq!(backend.quad_draws(), 1);
    let expected = Mat3::from_scale_angle_translation(b - a, 0.0, a);
    assert_eq!(
        backend.last_uniform(Uniform::ModelMatrix),
        Some(UniformValue::Mat3(expected))
    );
    assert_eq!(
        backend.last_uniform(Uniform::Modulate),
        Some(UniformValue::Color(Color::RED))
    );
    // Whole texture in screen space samples with V mirrored.
    assert_eq!(
        backend.last_uniform(Uniform::UvRect),
        Some(UniformValue::Vec4([0.0, 1.0, 1.0, 0.0]))
    );
}

#[test]
fn modulate_change_closes_the_run() {
    // 3 white, 1 red, 3 white: three runs, each below threshold.
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for color in [
            Color::WHITE,
            Color::WHITE,
            Color::WHITE,
            Color::RED,
            Color::WHITE,
            Color::WHITE,
            Color::WHITE,
        ] {
            render.draw_texture_rect(
                handle,
                TextureRef::whole(tex),
                Vec2::ZERO,
                Vec2::ONE,
                color,
                None,
            );
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();
    assert_eq!(backend.quad_draws(), 7);
    assert_eq!(backend.batch_draws(), 0);
}

#[test]
fn texture_change_splits_batches() {
    let mut backend = RecordingBackend::new();
    let tex_a = backend.add_texture(32, 32, false);
    let tex_b = backend.add_texture(64, 64, false);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for _ in 0..10 {
            quad(render, handle, tex_a);
        }
        for _ in 0..10 {
            quad(render, handle, tex_b);
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();
    assert_eq!(backend.batch_draws(), 2);
    assert_eq!(backend.quad_draws(), 0);
}

#[test]
fn scissor_flushes_and_toggles_only_on_edges() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        render.set_scissor(handle, Some(Rect::new(0, 0, 100, 100)));
        quad(render, handle, tex);
        // Rect change while already scissoring: no re-enable.
        render.set_scissor(handle, Some(Rect::new(50, 50, 20, 20)));
        quad(render, handle, tex);
        render.set_scissor(handle, None);
        quad(render, handle, tex);
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    let toggles: Vec<bool> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::SetScissorEnabled(on) => Some(*on),
            _ => None,
        })
        .collect();
    assert_eq!(toggles, vec![true, false]);

    let rects = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::SetScissorRect(_)))
        .count();
    assert_eq!(rects, 2);
    assert_eq!(backend.quad_draws(), 3);

    // The quad between the two rects must be drawn before the second rect
    // takes effect.
    let first_draw = backend
        .calls()
        .iter()
        .position(|c| matches!(c, BackendCall::DrawQuad))
        .unwrap();
    let second_rect = backend
        .calls()
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, BackendCall::SetScissorRect(_)))
        .map(|(i, _)| i)
        .nth(1)
        .unwrap();
    assert!(first_draw < second_rect);
}

#[test]
fn scissor_cannot_leak_into_the_next_pass() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    // Scissor left enabled at the end of the tile pass.
    let mut scene = WorldScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::World);
        render.set_scissor(handle, Some(Rect::new(0, 0, 10, 10)));
        quad(render, handle, tex);
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    let toggles: Vec<bool> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::SetScissorEnabled(on) => Some(*on),
            _ => None,
        })
        .collect();
    // Forced off at the flush boundary.
    assert_eq!(toggles, vec![true, false]);
}

#[test]
fn atlas_entry_resolves_to_the_uv_sub_rect() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(128, 64, false);
    let atlas = TextureRef::atlas(tex, Rect::new(64.0, 32.0, 32.0, 16.0));
    let mut scene = UiScene(move |render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        render.draw_texture_rect(handle, atlas, Vec2::ZERO, Vec2::ONE, Color::WHITE, None);
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    // (64,32)..(96,48) of a 128x64 texture, V mirrored for screen space.
    assert_eq!(
        backend.last_uniform(Uniform::UvRect),
        Some(UniformValue::Vec4([0.5, 0.75, 0.75, 0.5]))
    );
}

#[test]
fn world_space_does_not_mirror_v() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = WorldScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::World);
        for _ in 0..TEXTURE_BATCH_THRESHOLD {
            quad(render, handle, tex);
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    assert_eq!(backend.batch_draws(), 1);
    // First vertex of each quad is the bottom-left corner; in world space it
    // samples the bottom of the unflipped UV rect.
    assert_eq!(backend.last_vertices()[0].uv, [0.0, 1.0]);
    assert_eq!(backend.last_vertices()[2].uv, [0.0, 0.0]);
}

#[test]
fn screen_space_mirrors_v() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for _ in 0..TEXTURE_BATCH_THRESHOLD {
            quad(render, handle, tex);
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    assert_eq!(backend.batch_draws(), 1);
    assert_eq!(backend.last_vertices()[0].uv, [0.0, 0.0]);
    assert_eq!(backend.last_vertices()[2].uv, [0.0, 1.0]);
}

#[test]
fn arrayed_batches_carry_zero_based_layers() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, true);
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for _ in 0..TEXTURE_BATCH_THRESHOLD {
            render.draw_texture_rect(
                handle,
                TextureRef::layer(tex, 3),
                Vec2::ZERO,
                Vec2::ONE,
                Color::WHITE,
                None,
            );
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    driver.render_frame(&mut backend, &mut scene).unwrap();

    assert_eq!(backend.batch_draws(), 1);
    assert!(backend.last_vertices().iter().all(|v| v.layer == 3.0));
}

#[test]
fn overfilled_batch_fails_the_frame() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut scene = WorldScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::World);
        for _ in 0..(MAX_BATCH_QUADS + 1) {
            quad(render, handle, tex);
        }
    });
    let mut driver = FrameDriver::new(800.0, 600.0, false);
    let err = driver.render_frame(&mut backend, &mut scene).unwrap_err();
    assert_eq!(
        err,
        RenderError::BatchCapacity {
            quads: MAX_BATCH_QUADS + 1
        }
    );
}

#[test]
fn capacity_failure_does_not_poison_the_next_frame() {
    let mut backend = RecordingBackend::new();
    let tex = backend.add_texture(32, 32, false);
    let mut driver = FrameDriver::new(800.0, 600.0, false);

    let mut broken = WorldScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::World);
        for _ in 0..(MAX_BATCH_QUADS + 1) {
            quad(render, handle, tex);
        }
    });
    assert!(driver.render_frame(&mut backend, &mut broken).is_err());

    // The failed frame's open run must not draw into the next frame.
    struct Empty;
    impl FrameScene for Empty {}
    backend.clear_calls();
    driver.render_frame(&mut backend, &mut Empty).unwrap();
    assert_eq!(backend.draw_calls(), 0);

    // And a frame with real content still works.
    let mut scene = UiScene(|render: &mut RenderHandle| {
        let handle = render.create_handle(Space::Screen);
        for _ in 0..TEXTURE_BATCH_THRESHOLD {
            quad(render, handle, tex);
        }
    });
    backend.clear_calls();
    driver.render_frame(&mut backend, &mut scene).unwrap();
    assert_eq!(backend.batch_draws(), 1);
}
