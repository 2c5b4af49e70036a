use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use render_backend_traits::backend::BackendInterface;
use render_types::extent::Extent2D;

use crate::app_state::AppState;
use crate::pipeline::RenderPipeline;
use crate::registry::Registry;

/// Owns the per-pipeline registry and drives the per-frame loop: polls the
/// window extent, calls into the backend's frame execution and dispatches
/// every node callback, and rebuilds the pipeline when the backend asks
/// for it (swapchain recreation) or shaders recompiled.
pub struct FrameDriver {
    backend: Arc<dyn BackendInterface>,
    pipeline: RenderPipeline,
    registry: Option<Registry>,

    elapsed_time: f64,
    /// Frame counter relative to the last pipeline construction; nodes see
    /// `is_relative_first_frame` via the app state.
    relative_frame_index: u64,
}

impl FrameDriver {
    pub fn new(backend: Arc<dyn BackendInterface>, pipeline: RenderPipeline) -> Self {
        Self {
            backend,
            pipeline,
            registry: None,
            elapsed_time: 0.0,
            relative_frame_index: 0,
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackendInterface> {
        &self.backend
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut RenderPipeline {
        &mut self.pipeline
    }

    /// Wipes the per-pipeline registry and re-runs every node's construct
    /// phase. The old registry is kept alive as the "previous" registry
    /// during construction so `create_or_reuse_*` can move resources
    /// forward, then dropped after a device idle.
    pub fn render_pipeline_did_change(&mut self) -> anyhow::Result<()> {
        // nothing of the old registry may still be in flight when it drops
        self.backend.complete_pending_operations()?;

        let previous = self.registry.take();
        let mut registry = Registry::new(self.backend.clone(), previous);
        self.pipeline.construct_all(&mut registry);
        registry.release_previous();

        self.registry = Some(registry);
        self.relative_frame_index = 0;
        info!(
            "render pipeline (re)constructed with {} nodes",
            self.pipeline.node_count()
        );
        Ok(())
    }

    /// The file watcher saw shader sources change; rebuild with fresh PSOs.
    pub fn shaders_did_recompile(&mut self) -> anyhow::Result<()> {
        debug!("shaders recompiled, reconstructing render pipeline");
        self.render_pipeline_did_change()
    }

    pub fn is_constructed(&self) -> bool {
        self.registry.is_some()
    }

    /// Renders one frame. `window_extent` is the polled framebuffer size;
    /// a zero-area extent (minimized window) must be filtered by the
    /// caller by blocking on window events instead.
    pub fn render_frame(&mut self, window_extent: Extent2D, delta_time: f64) -> anyhow::Result<()> {
        assert!(
            !window_extent.has_zero_area(),
            "render_frame called with a zero-area window extent; block on window events while minimized"
        );

        if self.registry.is_none() {
            self.render_pipeline_did_change()?;
        }

        self.elapsed_time += delta_time;
        let elapsed_time = self.elapsed_time;
        let is_relative_first_frame = self.relative_frame_index == 0;

        let pipeline = &mut self.pipeline;
        let mut node_timings: Vec<(String, std::time::Duration)> = Vec::new();

        let outcome = self.backend.execute_frame(window_extent, &mut |frame| {
            let app_state = AppState {
                window_extent: frame.window_extent,
                delta_time,
                elapsed_time,
                frame_index: frame.frame_index,
                is_relative_first_frame,
            };

            pipeline.for_each_node_in_resolved_order(|name, execute| {
                frame.command_list.begin_debug_label(name);
                let started = Instant::now();
                execute(&app_state, &mut *frame.command_list, &mut *frame.upload_buffer);
                node_timings.push((name.to_string(), started.elapsed()));
                frame.command_list.end_debug_label();
            });
        })?;

        for (name, elapsed) in node_timings {
            self.pipeline.report_node_cpu_time(&name, elapsed);
        }

        self.relative_frame_index += 1;

        if outcome.needs_pipeline_reconstruction {
            self.render_pipeline_did_change()?;
        }

        Ok(())
    }

    /// Device idle + per-pipeline resource teardown, for shutdown.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        self.backend.complete_pending_operations()?;
        self.registry = None;
        Ok(())
    }
}
