//! Registry semantics on the null backend: publish/subscribe namespaces,
//! lookup misses, dependency edges, ownership checks and render-target &
//! binding-set validation through the factory paths.

use std::sync::Arc;

use render_backend::backend::{create_backend, BackendCreateInfo, BackendKind};
use render_backend_traits::backend::BackendInterface;
use render_backend_traits::binding::ShaderBinding;
use render_backend_traits::render_target::Attachment;
use render_pipeline::registry::{NodeDependency, Registry};
use render_types::buffer::BufferUsage;
use render_types::capabilities::{AppSpecification, ShaderStageFlags};
use render_types::config::GfxOptions;
use render_types::extent::Extent2D;
use render_types::format::TextureFormat;
use render_types::rendering::{AttachmentType, ClearColor};
use render_types::texture::{Filters, MipmapMode, WrapModes};

fn backend() -> Arc<dyn BackendInterface> {
    create_backend(BackendCreateInfo {
        kind: BackendKind::Null,
        app_spec: &AppSpecification::default(),
        options: GfxOptions::default(),
        shader_base_dir: "shaders".into(),
        initial_extent: Extent2D::new(1280, 720),
        window: None,
    })
    .unwrap()
}

fn registry() -> Registry {
    Registry::new(backend(), None)
}

#[test]
fn published_resources_are_visible_downstream_and_record_dependencies() {
    let mut registry = registry();

    registry.set_current_node(Some("producer".into()));
    let buffer = registry.create_buffer(256, BufferUsage::StorageBuffer);
    registry.publish_buffer("LightGrid", buffer);
    let texture = registry.create_pixel_texture(ClearColor::new(1.0, 0.0, 1.0, 1.0), false);
    registry.publish_texture("Placeholder", texture);
    registry.set_current_node(None);

    registry.set_current_node(Some("consumer".into()));
    assert!(registry.has_previous_node("producer"));
    assert!(!registry.has_previous_node("nonexistent"));

    let found = registry.get_buffer("LightGrid");
    assert!(found.is_some());
    // publishing names the resource for debugging
    assert_eq!(found.unwrap().name(), "LightGrid");

    // a miss is not fatal; nodes substitute placeholders
    assert!(registry.get_buffer("MissingBuffer").is_none());
    // names are namespaced per resource kind
    assert!(registry.get_texture("LightGrid").is_none());
    registry.set_current_node(None);

    assert!(registry.node_dependencies().contains(&NodeDependency {
        consumer: "consumer".into(),
        producer: "producer".into(),
    }));
    assert_eq!(registry.node_dependencies().len(), 1);
}

#[test]
#[should_panic(expected = "duplicate published name")]
fn publishing_the_same_name_twice_is_fatal() {
    let mut registry = registry();
    registry.set_current_node(Some("node".into()));
    let a = registry.create_buffer(16, BufferUsage::StorageBuffer);
    let b = registry.create_buffer(16, BufferUsage::StorageBuffer);
    registry.publish_buffer("Shared", a);
    registry.publish_buffer("Shared", b);
}

#[test]
#[should_panic(expected = "not owned by this registry")]
fn publishing_a_foreign_resource_is_fatal() {
    let mut persistent = registry();
    persistent.set_current_node(Some("startup".into()));
    let foreign = persistent.create_buffer(16, BufferUsage::StorageBuffer);
    persistent.set_current_node(None);

    let mut per_pipeline = Registry::new(persistent.backend().clone(), None);
    per_pipeline.set_current_node(Some("node".into()));
    per_pipeline.publish_buffer("Leaked", foreign);
}

#[test]
fn render_target_topology_is_validated_through_the_factory() {
    let mut registry = registry();
    registry.set_current_node(Some("gbuffer".into()));

    let color = registry.create_texture_2d(
        Extent2D::new(256, 256),
        TextureFormat::Rgba16F,
        Filters::linear(),
        MipmapMode::None,
        WrapModes::clamp_all_to_edge(),
    );
    let depth = registry.create_texture_2d(
        Extent2D::new(256, 256),
        TextureFormat::Depth32F,
        Filters::nearest(),
        MipmapMode::None,
        WrapModes::clamp_all_to_edge(),
    );

    let target = registry.create_render_target(vec![
        Attachment::with_texture(AttachmentType::Color0, color),
        Attachment::with_texture(AttachmentType::Depth, depth),
    ]);
    assert_eq!(target.extent(), Extent2D::new(256, 256));
    assert_eq!(target.color_attachment_count(), 1);
    assert!(target.has_depth_attachment());
}

#[test]
#[should_panic(expected = "densely packed")]
fn color_attachment_gaps_are_fatal() {
    let mut registry = registry();
    registry.set_current_node(Some("bad".into()));

    let a = registry.create_texture_2d(
        Extent2D::new(64, 64),
        TextureFormat::Rgba8Unorm,
        Filters::linear(),
        MipmapMode::None,
        WrapModes::repeat_all(),
    );
    let b = registry.create_texture_2d(
        Extent2D::new(64, 64),
        TextureFormat::Rgba8Unorm,
        Filters::linear(),
        MipmapMode::None,
        WrapModes::repeat_all(),
    );
    // Color0 is missing
    registry.create_render_target(vec![
        Attachment::with_texture(AttachmentType::Color1, a),
        Attachment::with_texture(AttachmentType::Color2, b),
    ]);
}

#[test]
#[should_panic(expected = "extent differs")]
fn mismatched_attachment_extents_are_fatal() {
    let mut registry = registry();
    registry.set_current_node(Some("bad".into()));

    let a = registry.create_texture_2d(
        Extent2D::new(64, 64),
        TextureFormat::Rgba8Unorm,
        Filters::linear(),
        MipmapMode::None,
        WrapModes::repeat_all(),
    );
    let b = registry.create_texture_2d(
        Extent2D::new(128, 128),
        TextureFormat::Depth32F,
        Filters::nearest(),
        MipmapMode::None,
        WrapModes::repeat_all(),
    );
    registry.create_render_target(vec![
        Attachment::with_texture(AttachmentType::Color0, a),
        Attachment::with_texture(AttachmentType::Depth, b),
    ]);
}

#[test]
fn pool_handles_identify_resources_without_holding_references() {
    let mut registry = registry();
    registry.set_current_node(Some("node".into()));

    let buffer = registry.create_buffer(64, BufferUsage::Vertex);
    let texture = registry.create_pixel_texture(ClearColor::BLACK, false);

    let buffer_handle = registry.buffer_handle(&buffer);
    let texture_handle = registry.texture_handle(&texture);
    assert!(buffer_handle.is_valid());
    assert!(texture_handle.is_valid());

    let same_buffer = registry.buffer_by_handle(buffer_handle).unwrap();
    assert!(Arc::ptr_eq(&same_buffer, &buffer));
    assert!(registry
        .texture_by_handle(render_types::handle::TextureHandle::from_index(999))
        .is_none());
    assert!(registry
        .buffer_by_handle(render_types::handle::BufferHandle::INVALID)
        .is_none());
}

#[test]
fn binding_sets_resolve_implicit_indices_in_declaration_order() {
    let mut registry = registry();
    registry.set_current_node(Some("bindings".into()));

    let constants = registry.create_buffer(64, BufferUsage::ConstantBuffer);
    let storage = registry.create_buffer(1024, BufferUsage::StorageBuffer);
    let texture = registry.create_pixel_texture(ClearColor::BLACK, false);

    let binding_set = registry.create_binding_set(vec![
        ShaderBinding::constant_buffer(constants, ShaderStageFlags::any()),
        ShaderBinding::storage_buffer(storage, ShaderStageFlags::COMPUTE),
        ShaderBinding::sampled_texture(texture, ShaderStageFlags::FRAGMENT),
    ]);

    let indices: Vec<u32> = binding_set
        .bindings()
        .iter()
        .map(|binding| binding.binding_index().unwrap())
        .collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[test]
#[should_panic(expected = "storage-capable")]
fn storage_binding_of_a_constant_buffer_is_fatal() {
    let mut registry = registry();
    registry.set_current_node(Some("bad".into()));
    let constants = registry.create_buffer(64, BufferUsage::ConstantBuffer);
    let _ = ShaderBinding::storage_buffer(constants, ShaderStageFlags::COMPUTE);
}
