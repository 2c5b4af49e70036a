use render_types::extent::Extent2D;

/// Passed by value to every node execute callback, once per frame.
#[derive(Debug, Clone, Copy)]
pub struct AppState {
    pub window_extent: Extent2D,
    pub delta_time: f64,
    pub elapsed_time: f64,
    /// Absolute frame counter, never reset.
    pub frame_index: u64,
    /// True on the first frame after the current pipeline was
    /// (re)constructed; nodes use it to run one-time setup work.
    pub is_relative_first_frame: bool,
}
