use ash::vk;

/// Graphics & present queues; the same family (and the same queue) on
/// every target we care about. Guarded by a mutex on the device so frame
/// submits and one-shot submits cannot interleave mid-call.
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}
