use render_backend_traits::command_list::CommandListInterface;
use render_backend_traits::upload::UploadBuffer;

use crate::app_state::AppState;
use crate::registry::Registry;

/// Recorded every frame by a node; the closure captures whatever registry
/// resources the node grabbed during construction.
pub type ExecuteCallback =
    Box<dyn FnMut(&AppState, &mut dyn CommandListInterface, &mut UploadBuffer)>;

/// The two-phase node contract: `construct` creates and wires resources
/// through the registry, then hands back the per-frame recording callback.
/// Construction runs again whenever the pipeline is rebuilt (window
/// resized, shaders recompiled), with a fresh registry.
pub trait RenderPipelineNode {
    fn name(&self) -> &str;

    fn construct(&mut self, registry: &mut Registry) -> ExecuteCallback;
}

/// A node made from a plain closure, for pipeline steps too small to
/// deserve a type.
pub struct LambdaNode<F>
where
    F: FnMut(&mut Registry) -> ExecuteCallback,
{
    name: String,
    construct_fn: F,
}

impl<F> LambdaNode<F>
where
    F: FnMut(&mut Registry) -> ExecuteCallback,
{
    pub fn new(name: &str, construct_fn: F) -> Self {
        Self {
            name: name.to_string(),
            construct_fn,
        }
    }
}

impl<F> RenderPipelineNode for LambdaNode<F>
where
    F: FnMut(&mut Registry) -> ExecuteCallback,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn construct(&mut self, registry: &mut Registry) -> ExecuteCallback {
        (self.construct_fn)(registry)
    }
}
