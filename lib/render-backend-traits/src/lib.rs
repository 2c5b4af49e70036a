pub mod backend;
pub mod binding;
pub mod buffer;
pub mod command_list;
pub mod pipeline_state;
pub mod render_target;
pub mod resource;
pub mod rt;
pub mod sampler;
pub mod shader;
pub mod texture;
pub mod upload;
