use std::sync::Arc;

use log::warn;
use render_types::buffer::BufferUsage;

use crate::buffer::Buffer;
use crate::texture::Texture;

/// A pending staged copy from the upload buffer into a destination
/// resource, executed by the command list before any other frame commands.
#[derive(Debug, Clone)]
pub enum UploadOperation {
    BufferCopy {
        src_offset: usize,
        dst: Arc<Buffer>,
        dst_offset: usize,
        size: usize,
    },
    TextureCopy {
        src_offset: usize,
        dst: Arc<Texture>,
        mip_level: u32,
        array_layer: u32,
        size: usize,
    },
}

/// Per-frame bump allocator over an upload-heap buffer. Reset at the start
/// of each frame by its owning frame context. Exceeding the capacity grows
/// the backing buffer (doubling) with a logged warning; correct but a sign
/// the capacity should be raised.
pub struct UploadBuffer {
    buffer: Arc<Buffer>,
    cursor: usize,
    pending_operations: Vec<UploadOperation>,
}

impl std::fmt::Debug for UploadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBuffer")
            .field("capacity", &self.buffer.size())
            .field("cursor", &self.cursor)
            .field("pending", &self.pending_operations.len())
            .finish()
    }
}

impl UploadBuffer {
    /// `buffer` must have Upload usage; created by the backend per frame
    /// context.
    pub fn new(buffer: Arc<Buffer>) -> Self {
        assert!(
            matches!(buffer.usage(), BufferUsage::Upload),
            "an upload buffer must be backed by an Upload-usage buffer"
        );
        Self {
            buffer,
            cursor: 0,
            pending_operations: Vec::new(),
        }
    }

    pub fn backing_buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.buffer.size()
    }

    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Rewinds the cursor; pending operations must already have been
    /// drained into a command list.
    pub fn reset(&mut self) {
        if !self.pending_operations.is_empty() {
            warn!(
                "upload buffer reset with {} pending operations, dropping them",
                self.pending_operations.len()
            );
            self.pending_operations.clear();
        }
        self.cursor = 0;
    }

    fn stage(&mut self, data: &[u8]) -> anyhow::Result<usize> {
        let required = self.cursor + data.len();
        if required > self.capacity() {
            warn!(
                "upload buffer exceeded its {} byte capacity (need {required}), growing",
                self.capacity()
            );
            self.buffer.grow_to_fit(required)?;
        }
        let offset = self.cursor;
        self.buffer.update_data(data, offset)?;
        self.cursor = required;
        Ok(offset)
    }

    /// Stages `data` and queues a copy into `dst` at `dst_offset`.
    pub fn upload(
        &mut self,
        data: &[u8],
        dst: Arc<Buffer>,
        dst_offset: usize,
    ) -> anyhow::Result<UploadOperation> {
        let src_offset = self.stage(data)?;
        let operation = UploadOperation::BufferCopy {
            src_offset,
            dst,
            dst_offset,
            size: data.len(),
        };
        self.pending_operations.push(operation.clone());
        Ok(operation)
    }

    /// Stages tightly packed texel data and queues a copy into one mip of
    /// one layer of `dst`.
    pub fn upload_to_texture(
        &mut self,
        data: &[u8],
        dst: Arc<Texture>,
        mip_level: u32,
        array_layer: u32,
    ) -> anyhow::Result<UploadOperation> {
        let src_offset = self.stage(data)?;
        let operation = UploadOperation::TextureCopy {
            src_offset,
            dst,
            mip_level,
            array_layer,
            size: data.len(),
        };
        self.pending_operations.push(operation.clone());
        Ok(operation)
    }

    pub fn has_pending_operations(&self) -> bool {
        !self.pending_operations.is_empty()
    }

    pub fn peek_pending_operations(&self) -> &[UploadOperation] {
        &self.pending_operations
    }

    /// Hands the pending operations to the command list for recording.
    pub fn drain_pending_operations(&mut self) -> Vec<UploadOperation> {
        std::mem::take(&mut self.pending_operations)
    }
}
