//! End-to-end frame scheduling on the null backend: node dispatch order,
//! fence-value bookkeeping, upload staging & growth, readback round
//! trips, mipmap generation and swapchain recreation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use render_backend::backend::{create_backend, BackendCreateInfo, BackendKind};
use render_backend_traits::backend::BackendInterface;
use render_backend_traits::command_list::NamedUniformExt;
use render_pipeline::driver::FrameDriver;
use render_pipeline::node::LambdaNode;
use render_pipeline::pipeline::RenderPipeline;
use render_pipeline::registry::ReuseMode;
use render_types::buffer::BufferUsage;
use render_types::capabilities::AppSpecification;
use render_types::config::GfxOptions;
use render_types::extent::{Extent2D, Extent3D};
use render_types::format::TextureFormat;
use render_types::texture::{Filters, MipmapMode, TextureDescription, WrapModes};

fn null_backend(extent: Extent2D, options: GfxOptions) -> Arc<dyn BackendInterface> {
    let _ = env_logger::builder().is_test(true).try_init();
    create_backend(BackendCreateInfo {
        kind: BackendKind::Null,
        app_spec: &AppSpecification {
            app_name: "frame-loop-tests".into(),
            ..Default::default()
        },
        options,
        shader_base_dir: "shaders".into(),
        initial_extent: extent,
        window: None,
    })
    .expect("null backend creation")
}

fn default_backend() -> Arc<dyn BackendInterface> {
    null_backend(Extent2D::new(1920, 1080), GfxOptions::default())
}

const DT: f64 = 1.0 / 60.0;

#[test]
fn nodes_execute_in_declaration_order_with_app_state() {
    let backend = default_backend();
    let log: Arc<Mutex<Vec<(String, u64, bool)>>> = Arc::default();

    let mut pipeline = RenderPipeline::new();
    for name in ["shadow", "forward", "post"] {
        let log = log.clone();
        pipeline.add_node(Box::new(LambdaNode::new(name, move |_registry| {
            let log = log.clone();
            let name = name.to_string();
            Box::new(move |state, _cmd, _upload| {
                log.lock()
                    .push((name.clone(), state.frame_index, state.is_relative_first_frame));
            })
        })));
    }

    let mut driver = FrameDriver::new(backend, pipeline);
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();

    let log = log.lock();
    let names: Vec<&str> = log.iter().map(|(name, ..)| name.as_str()).collect();
    assert_eq!(
        names,
        ["shadow", "forward", "post", "shadow", "forward", "post"]
    );
    // first frame of the pipeline is flagged, the second is not
    assert!(log[..3].iter().all(|&(_, frame, first)| frame == 0 && first));
    assert!(log[3..].iter().all(|&(_, frame, first)| frame == 1 && !first));
}

#[test]
fn frame_fences_signal_monotonically_and_complete() {
    let backend = default_backend();
    let mut driver = FrameDriver::new(backend.clone(), RenderPipeline::new());

    let frame_count = 10usize;
    for _ in 0..frame_count {
        driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();
    }

    let infos = backend.frame_fence_info();
    assert_eq!(infos.len(), backend.swapchain_image_count() as usize);
    for info in &infos {
        // the GPU's completed value never trails what was signaled at
        // the context's most recent submit
        assert!(info.completed_value >= info.signaled_value);
    }
    let total_submits: u64 = infos.iter().map(|info| info.signaled_value).sum();
    assert_eq!(total_submits, frame_count as u64);
}

#[test]
fn uploads_land_in_the_destination_buffer_for_later_frames() {
    let backend = default_backend();
    let payload: Vec<u8> = (0..=255u8).collect();

    let dst_slot: Arc<Mutex<Option<Arc<render_backend_traits::buffer::Buffer>>>> =
        Arc::default();

    let mut pipeline = RenderPipeline::new();
    {
        let payload = payload.clone();
        let dst_slot = dst_slot.clone();
        pipeline.add_node(Box::new(LambdaNode::new("uploader", move |registry| {
            let buffer = registry.create_buffer(payload.len(), BufferUsage::StorageBuffer);
            registry.publish_buffer("UploadTarget", buffer.clone());
            *dst_slot.lock() = Some(buffer.clone());

            let payload = payload.clone();
            Box::new(move |state, cmd, upload| {
                if state.is_relative_first_frame {
                    upload
                        .upload(&payload, buffer.clone(), 0)
                        .expect("staging the payload");
                    cmd.execute_upload_operations(upload);
                }
            })
        })));
    }

    let mut driver = FrameDriver::new(backend, pipeline);
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();

    let buffer = dst_slot.lock().clone().expect("uploader ran");
    let mut read_back = vec![0u8; payload.len()];
    buffer.read_data(0, &mut read_back).unwrap();
    assert_eq!(read_back, payload);
}

#[test]
fn buffer_write_then_blocking_readback_round_trips() {
    let backend = default_backend();
    let bytes: Vec<u8> = (0..64u8).map(|v| v.wrapping_mul(3)).collect();

    let buffer = backend
        .create_buffer(128, BufferUsage::StorageBuffer, None)
        .unwrap();
    buffer.update_data(&bytes, 32).unwrap();

    let result: Arc<Mutex<Vec<u8>>> = Arc::default();
    {
        let result = result.clone();
        let buffer_size = bytes.len();
        backend
            .submit_one_shot(&mut |cmd| {
                let mut dest = Vec::new();
                cmd.slow_blocking_read_from_buffer(&buffer, 32, buffer_size, &mut dest)
                    .unwrap();
                *result.lock() = dest;
            })
            .unwrap();
    }
    assert_eq!(*result.lock(), bytes);
}

#[test]
fn constant_buffers_round_up_their_allocation() {
    let backend = default_backend();
    let buffer = backend
        .create_buffer(20, BufferUsage::ConstantBuffer, None)
        .unwrap();
    assert_eq!(buffer.size(), 20);
    assert_eq!(buffer.size_in_memory() % 256, 0);
    assert!(buffer.size_in_memory() >= buffer.size());
}

#[test]
fn generate_mipmaps_preserves_constant_color_down_to_one_pixel() {
    let backend = default_backend();
    let desc = TextureDescription {
        extent: Extent3D::new(1024, 1024, 1),
        format: TextureFormat::Rgba8Unorm,
        mipmap_mode: MipmapMode::Linear,
        filters: Filters::linear(),
        wrap_modes: WrapModes::repeat_all(),
        ..Default::default()
    };
    assert_eq!(desc.mip_levels(), 11);

    let texture = backend.create_texture(desc).unwrap();
    texture
        .set_data(&vec![128u8; 1024 * 1024 * 4], 0, 0)
        .unwrap();
    texture.generate_mipmaps().unwrap();

    let mut smallest = Vec::new();
    texture.read_data(10, &mut smallest).unwrap();
    assert_eq!(smallest.len(), 4);
    assert!(
        smallest.iter().all(|value| value.abs_diff(128) <= 1),
        "mip tail drifted: {smallest:?}"
    );
}

#[test]
fn pipeline_reconstruction_reuses_identically_described_textures() {
    let backend = default_backend();
    let reuse_log: Arc<Mutex<Vec<ReuseMode>>> = Arc::default();
    let extent: Arc<Mutex<Extent2D>> = Arc::new(Mutex::new(Extent2D::new(512, 512)));

    let mut pipeline = RenderPipeline::new();
    {
        let reuse_log = reuse_log.clone();
        let extent = extent.clone();
        pipeline.add_node(Box::new(LambdaNode::new("depth-pyramid", move |registry| {
            let (_texture, mode) = registry.create_or_reuse_texture_2d(
                "DepthPyramid",
                *extent.lock(),
                TextureFormat::R32F,
                Filters::nearest(),
                MipmapMode::Nearest,
                WrapModes::clamp_all_to_edge(),
            );
            reuse_log.lock().push(mode);
            Box::new(move |_state, _cmd, _upload| {})
        })));
    }

    let mut driver = FrameDriver::new(backend, pipeline);
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();

    // same description -> the texture moves forward
    driver.render_pipeline_did_change().unwrap();
    // changed description -> a fresh texture
    *extent.lock() = Extent2D::new(256, 256);
    driver.render_pipeline_did_change().unwrap();

    assert_eq!(
        *reuse_log.lock(),
        [ReuseMode::Created, ReuseMode::Reused, ReuseMode::Created]
    );
}

#[test]
fn window_resize_recreates_swapchain_and_rebuilds_the_pipeline() {
    let backend = default_backend();
    let construct_count = Arc::new(AtomicUsize::new(0));
    let frame_count = Arc::new(AtomicUsize::new(0));

    let mut pipeline = RenderPipeline::new();
    {
        let construct_count = construct_count.clone();
        let frame_count = frame_count.clone();
        pipeline.add_node(Box::new(LambdaNode::new("probe", move |registry| {
            construct_count.fetch_add(1, Ordering::SeqCst);
            // pipeline resources follow the window size
            let _target = registry.window_render_target();
            let frame_count = frame_count.clone();
            Box::new(move |_state, _cmd, _upload| {
                frame_count.fetch_add(1, Ordering::SeqCst);
            })
        })));
    }

    let mut driver = FrameDriver::new(backend.clone(), pipeline);
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();
    assert_eq!(backend.swapchain_extent(), Extent2D::new(1920, 1080));

    // external resize: the frame still renders, then the swapchain is
    // recreated and the pipeline reconstructed
    driver.render_frame(Extent2D::new(1280, 720), DT).unwrap();
    assert_eq!(backend.swapchain_extent(), Extent2D::new(1280, 720));
    assert_eq!(construct_count.load(Ordering::SeqCst), 2);

    driver.render_frame(Extent2D::new(1280, 720), DT).unwrap();
    assert_eq!(frame_count.load(Ordering::SeqCst), 3);
    assert_eq!(backend.swapchain_image_count(), 3);
}

#[test]
fn upload_buffer_grows_past_capacity_with_a_doubling() {
    let options = GfxOptions {
        upload_buffer_capacity: 1024 * 1024,
        ..Default::default()
    };
    let backend = null_backend(Extent2D::new(800, 600), options);
    let capacities: Arc<Mutex<Vec<usize>>> = Arc::default();

    let mut pipeline = RenderPipeline::new();
    {
        let capacities = capacities.clone();
        pipeline.add_node(Box::new(LambdaNode::new("big-uploader", move |registry| {
            let small = registry.create_buffer(600 * 1024, BufferUsage::StorageBuffer);
            let large = registry.create_buffer(1536 * 1024, BufferUsage::StorageBuffer);
            let capacities = capacities.clone();
            Box::new(move |state, cmd, upload| {
                let data_size = if state.frame_index == 0 {
                    600 * 1024
                } else {
                    1536 * 1024
                };
                let target = if state.frame_index == 0 {
                    small.clone()
                } else {
                    large.clone()
                };
                upload
                    .upload(&vec![7u8; data_size], target, 0)
                    .expect("staging");
                cmd.execute_upload_operations(upload);
                capacities.lock().push(upload.capacity());
            })
        })));
    }

    let mut driver = FrameDriver::new(backend, pipeline);
    driver.render_frame(Extent2D::new(800, 600), DT).unwrap();
    driver.render_frame(Extent2D::new(800, 600), DT).unwrap();

    let capacities = capacities.lock();
    // 0.6 MiB fits the 1 MiB budget; 1.5 MiB forces a doubling to 2 MiB
    assert_eq!(capacities[0], 1024 * 1024);
    assert_eq!(capacities[1], 2 * 1024 * 1024);
}

#[test]
fn named_uniform_misses_are_non_fatal() {
    let backend = default_backend();

    let mut pipeline = RenderPipeline::new();
    pipeline.add_node(Box::new(LambdaNode::new("tonemap", move |_registry| {
        Box::new(move |_state, cmd, _upload| {
            // nothing is bound; the lookup misses and the frame goes on
            cmd.set_named_uniform_f32("exposure", 1.25);
        })
    })));

    let mut driver = FrameDriver::new(backend, pipeline);
    driver.render_frame(Extent2D::new(1920, 1080), DT).unwrap();
}
