//! Bloom frame structure and target lifecycle, checked on the recording
//! backend.
//!
//! Run with: cargo test --test bloom_pipeline

use bloom_mvp::gfx::recording::{Command, RecordingBackend};
use bloom_mvp::gfx::{
    Bindings, BufferDesc, BufferType, CullMode, GfxError, GraphicsDevice, ImageId, LoadAction, PassAction, ShaderStage,
};
use bloom_mvp::render::{BloomRenderer, BloomSettings, Side};

fn settings(blur_iterations: u32) -> BloomSettings {
    BloomSettings {
        width: 800,
        height: 600,
        sample_count: 4,
        blur_iterations,
    }
}

fn renderer(device: &mut RecordingBackend, blur_iterations: u32) -> BloomRenderer {
    BloomRenderer::new(device, settings(blur_iterations)).unwrap()
}

/// Images bound by each `ApplyBindings` in the recorded stream.
fn bound_images(commands: &[Command]) -> Vec<Vec<ImageId>> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::ApplyBindings(b) => Some(b.fs_images.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_resize_sequence_keeps_one_target_set() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    let static_images = device.live_images() - 4;
    let static_passes = device.live_passes() - 3;

    for (w, h) in [(0, 0), (1, 1), (800, 600), (800, 600), (1920, 1080), (0, 600), (640, 0), (3, 2)] {
        bloom.resize(&mut device, w, h).unwrap();
        assert_eq!(device.live_images(), static_images + 4, "after {w}x{h}");
        assert_eq!(device.live_passes(), static_passes + 3, "after {w}x{h}");

        let targets = bloom.targets().unwrap();
        for image in [
            targets.color,
            targets.depth,
            targets.pingpong.image(Side::Zero),
            targets.pingpong.image(Side::One),
        ] {
            assert!(device.image_info(image).is_some());
        }
    }
}

#[test]
fn test_resize_to_one_pixel_and_back() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);

    for (w, h) in [(800, 600), (1, 1), (800, 600)] {
        bloom.resize(&mut device, w, h).unwrap();
        let targets = bloom.targets().unwrap().clone();
        for image in [targets.color, targets.depth, targets.pingpong.image(Side::One)] {
            let info = device.image_info(image).unwrap();
            assert_eq!((info.width, info.height), (w, h));
        }
        bloom.frame(&mut device).unwrap();
    }
}

#[test]
fn test_zero_iterations_composites_scene_color() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 0);
    let color = bloom.targets().unwrap().color;

    let source = bloom.frame(&mut device).unwrap();
    assert_eq!(source, color);

    let bindings = bound_images(device.commands());
    assert_eq!(bindings.last(), Some(&vec![color]));
}

#[test]
fn test_final_source_follows_iteration_parity() {
    for (iterations, side) in [(1, Side::One), (2, Side::Zero), (9, Side::One), (10, Side::Zero)] {
        let mut device = RecordingBackend::new();
        let mut bloom = renderer(&mut device, iterations);
        let expected = bloom.targets().unwrap().pingpong.image(side);

        assert_eq!(bloom.frame(&mut device).unwrap(), expected, "{iterations} iterations");
        assert_eq!(bound_images(device.commands()).last(), Some(&vec![expected]));
    }
}

#[test]
fn test_no_pass_samples_its_own_attachment() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    bloom.frame(&mut device).unwrap();

    let mut attachments: Vec<ImageId> = Vec::new();
    for command in device.commands() {
        match command {
            Command::BeginPass { pass, .. } => {
                attachments = device.pass_desc(*pass).unwrap().color_attachments.clone();
            }
            Command::BeginDefaultPass { .. } | Command::EndPass => attachments.clear(),
            Command::ApplyBindings(b) => {
                for image in &b.fs_images {
                    assert!(!attachments.contains(image));
                }
            }
            _ => {}
        }
    }
}

#[test]
fn test_frame_command_order() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    let targets = bloom.targets().unwrap().clone();
    bloom.frame(&mut device).unwrap();
    let commands = device.take_commands();

    // Scene pass
    assert!(matches!(
        &commands[0],
        Command::BeginPass { pass, action } if *pass == targets.pass
            && action.color == LoadAction::Clear([0.25, 0.25, 0.25, 1.0])
    ));
    assert!(matches!(
        &commands[3],
        Command::ApplyUniforms { stage: ShaderStage::Vertex, slot: 0, data } if data.len() == 64
    ));
    assert_eq!(
        commands[4],
        Command::Draw {
            base_element: 0,
            num_elements: 36,
            num_instances: 1
        }
    );
    assert_eq!(commands[5], Command::EndPass);

    // Ten blur passes, each loading its target and drawing the quad strip
    let blur: Vec<&[Command]> = commands[6..6 + 10 * 6].chunks(6).collect();
    assert_eq!(blur.len(), 10);
    for (i, pass) in blur.iter().enumerate() {
        let write = if i % 2 == 0 { Side::One } else { Side::Zero };
        assert!(matches!(
            &pass[0],
            Command::BeginPass { pass, action }
                if *pass == targets.pingpong.pass(write) && action.color == LoadAction::Load
        ));
        let Command::ApplyUniforms { stage, slot, data } = &pass[3] else {
            panic!("expected blur uniforms, got {:?}", pass[3]);
        };
        assert_eq!((*stage, *slot), (ShaderStage::Fragment, 0));
        let params: [f32; 4] = bytemuck::pod_read_unaligned(data);
        let expected = if i % 2 == 0 { [1.0, 0.0] } else { [0.0, 1.0] };
        assert_eq!([params[0], params[1]], expected);
        assert_eq!(
            pass[4],
            Command::Draw {
                base_element: 0,
                num_elements: 4,
                num_instances: 1
            }
        );
    }

    // Composite and present
    let tail = &commands[66..];
    assert!(matches!(
        &tail[0],
        Command::BeginDefaultPass { width: 800, height: 600, action }
            if action.color == LoadAction::Clear([0.25 / 15.0, 0.5 / 15.0, 0.75 / 15.0, 1.0])
    ));
    assert_eq!(tail.last(), Some(&Command::Commit));
    assert_eq!(device.frames_committed(), 1);
}

#[test]
fn test_frames_advance_rotation() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 2);
    bloom.frame(&mut device).unwrap();
    bloom.frame(&mut device).unwrap();

    let state = bloom.camera_state();
    assert_eq!(state.rx, 0.01 + 0.01);
    assert_eq!(state.ry, 0.02 + 0.02);
    assert_eq!(device.frames_committed(), 2);
}

#[test]
fn test_failed_resize_is_reported_not_leaked() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    let images_before = device.live_images();

    device.fail_allocations_after(1);
    assert!(bloom.resize(&mut device, 1024, 768).is_err());
    assert!(bloom.targets().is_none());
    assert_eq!(device.live_images(), images_before - 4);
    assert!(bloom.frame(&mut device).is_err());

    device.clear_allocation_failures();
    bloom.resize(&mut device, 1024, 768).unwrap();
    bloom.frame(&mut device).unwrap();
}

#[test]
fn test_shutdown_releases_everything() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    bloom.frame(&mut device).unwrap();
    bloom.shutdown(&mut device);

    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_images(), 0);
    assert_eq!(device.live_shaders(), 0);
    assert_eq!(device.live_pipelines(), 0);
    assert_eq!(device.live_passes(), 0);
}

#[test]
fn test_pipelines_and_plan() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 10);
    assert_eq!(bloom.plan().steps.len(), 10);
    bloom.frame(&mut device).unwrap();

    let pipelines: Vec<_> = device
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::ApplyPipeline(p) => device.pipeline_desc(*p).cloned(),
            _ => None,
        })
        .collect();
    assert_eq!(pipelines.first().map(|p| p.cull_mode), Some(CullMode::Front));
    assert_eq!(pipelines.first().map(|p| p.sample_count), Some(4));
    assert!(pipelines[1..11].iter().all(|p| p.sample_count == 1 && p.depth.pixel_format.is_none()));

    // Scene color and depth are multisampled, the ping-pong pair is not
    let mut samples: Vec<u32> = device.images().iter().map(|info| info.sample_count).collect();
    samples.sort_unstable();
    assert_eq!(samples, vec![1, 1, 4, 4]);
}

#[test]
fn test_binding_stale_handles_fails() {
    let mut device = RecordingBackend::new();
    let mut bloom = renderer(&mut device, 1);
    let old = bloom.targets().unwrap().clone();
    bloom.frame(&mut device).unwrap();

    // The single blur step: BeginPass, ApplyPipeline(blur), ApplyBindings(quad, scene color)
    let commands = device.take_commands();
    let Command::ApplyPipeline(blur_pipeline) = commands[7] else {
        panic!("expected the blur pipeline, got {:?}", commands[7]);
    };
    let Command::ApplyBindings(blur_bindings) = &commands[8] else {
        panic!("expected the blur bindings, got {:?}", commands[8]);
    };
    let quad = blur_bindings.vertex_buffers[0];

    bloom.resize(&mut device, 640, 480).unwrap();
    let current = bloom.targets().unwrap().clone();

    device.begin_pass(current.pingpong.pass(Side::One), &PassAction::load()).unwrap();
    device.apply_pipeline(blur_pipeline).unwrap();

    let stale_image = Bindings {
        vertex_buffers: vec![quad],
        index_buffer: None,
        fs_images: vec![old.pingpong.image(Side::Zero)],
    };
    assert!(matches!(
        device.apply_bindings(&stale_image),
        Err(GfxError::InvalidHandle("image"))
    ));

    let dead_buffer = device
        .make_buffer(&BufferDesc {
            label: "short-lived",
            buffer_type: BufferType::Vertex,
            data: &[0; 16],
        })
        .unwrap();
    device.destroy_buffer(dead_buffer);
    let stale_buffer = Bindings {
        vertex_buffers: vec![dead_buffer],
        index_buffer: None,
        fs_images: vec![current.pingpong.image(Side::Zero)],
    };
    assert!(matches!(
        device.apply_bindings(&stale_buffer),
        Err(GfxError::InvalidHandle("buffer"))
    ));

    // Live handles still bind inside the same pass
    let live = Bindings {
        vertex_buffers: vec![quad],
        index_buffer: None,
        fs_images: vec![current.pingpong.image(Side::Zero)],
    };
    device.apply_bindings(&live).unwrap();
    device.end_pass().unwrap();
}

#[test]
fn test_failed_construction_leaves_nothing() {
    for budget in [0, 3, 8, 11] {
        let mut device = RecordingBackend::new();
        device.fail_allocations_after(budget);
        assert!(BloomRenderer::new(&mut device, settings(10)).is_err(), "budget {budget}");

        assert_eq!(device.live_buffers(), 0, "budget {budget}");
        assert_eq!(device.live_images(), 0, "budget {budget}");
        assert_eq!(device.live_shaders(), 0, "budget {budget}");
        assert_eq!(device.live_pipelines(), 0, "budget {budget}");
        assert_eq!(device.live_passes(), 0, "budget {budget}");
    }
}
