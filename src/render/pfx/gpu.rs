//! GPU 数据交接
//!
//! 模拟层只产出字节数组，上传通过 `GpuBackend` 抽象完成：
//! 测试中可以替换为记录调用的实现，运行时使用 `WgpuBackend`。
//! 每个帧槽位持有独立的缓冲区，避免与仍在飞行中的帧共享数据。

use crate::core::error::{PfxError, PfxResult};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// 最大飞行帧数
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// 后端缓冲区句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// GPU 缓冲区后端
pub trait GpuBackend {
    /// 以给定内容创建缓冲区
    fn create_buffer(&mut self, label: &str, bytes: &[u8]) -> BufferId;

    /// 原地更新缓冲区，大小与创建时一致
    fn update_buffer(&mut self, id: BufferId, bytes: &[u8]);

    /// 释放缓冲区
    fn destroy_buffer(&mut self, id: BufferId);
}

#[derive(Debug, Clone, Copy, Default)]
struct FrameSlot {
    buffer: Option<BufferId>,
    byte_size: usize,
}

/// 按帧槽位分开的一组缓冲区
#[derive(Debug, Clone, Default)]
pub struct FrameBuffers {
    slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT],
}

impl FrameBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上传某个槽位的数据
    ///
    /// 字节数变化时重建缓冲区，否则原地更新；空数据释放缓冲区。
    pub fn upload<B: GpuBackend + ?Sized>(
        &mut self,
        slot: usize,
        label: &str,
        bytes: &[u8],
        backend: &mut B,
    ) -> PfxResult<()> {
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(PfxError::FrameSlotOutOfRange {
                slot,
                frames: MAX_FRAMES_IN_FLIGHT,
            })?;

        if entry.byte_size == bytes.len() {
            if let Some(id) = entry.buffer {
                backend.update_buffer(id, bytes);
            }
            return Ok(());
        }

        if let Some(id) = entry.buffer.take() {
            backend.destroy_buffer(id);
        }
        if !bytes.is_empty() {
            entry.buffer = Some(backend.create_buffer(label, bytes));
        }
        entry.byte_size = bytes.len();

        tracing::debug!(
            target: "pfx_gpu",
            "Frame slot {} buffer '{}' resized to {} bytes",
            slot,
            label,
            bytes.len()
        );
        Ok(())
    }

    /// 槽位当前的缓冲区
    pub fn buffer(&self, slot: usize) -> Option<BufferId> {
        self.slots.get(slot).and_then(|s| s.buffer)
    }

    /// 槽位当前的字节数
    pub fn byte_size(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |s| s.byte_size)
    }

    /// 是否仍有槽位持有数据
    pub fn has_data(&self) -> bool {
        self.slots.iter().any(|s| s.byte_size > 0)
    }

    /// 释放全部槽位
    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for slot in &mut self.slots {
            if let Some(id) = slot.buffer.take() {
                backend.destroy_buffer(id);
            }
            slot.byte_size = 0;
        }
    }
}

/// 基于 wgpu 的缓冲区后端
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: Vec<Option<wgpu::Buffer>>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            buffers: Vec::new(),
        }
    }

    /// 按句柄取缓冲区，用于绑定
    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(id.0).and_then(Option::as_ref)
    }

    /// 存活缓冲区数量
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, label: &str, bytes: &[u8]) -> BufferId {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST,
            });

        if let Some(id) = self.buffers.iter().position(Option::is_none) {
            self.buffers[id] = Some(buffer);
            return BufferId(id);
        }
        self.buffers.push(Some(buffer));
        BufferId(self.buffers.len() - 1)
    }

    fn update_buffer(&mut self, id: BufferId, bytes: &[u8]) {
        match self.buffers.get(id.0).and_then(Option::as_ref) {
            Some(buffer) => self.queue.write_buffer(buffer, 0, bytes),
            None => tracing::warn!(target: "pfx_gpu", "Update of unknown buffer {:?}", id),
        }
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(id.0).and_then(Option::take) {
            buffer.destroy();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingBackend};
    use super::*;

    #[test]
    fn test_recreate_only_on_size_change() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();

        frames.upload(0, "pfx", &[0u8; 48], &mut backend).unwrap();
        frames.upload(0, "pfx", &[1u8; 48], &mut backend).unwrap();
        assert_eq!(backend.creates(), 1);
        assert_eq!(backend.updates(), 1);

        frames.upload(0, "pfx", &[0u8; 96], &mut backend).unwrap();
        assert_eq!(backend.creates(), 2);
        assert_eq!(backend.live.len(), 1);
        assert_eq!(frames.byte_size(0), 96);
    }

    #[test]
    fn test_slots_do_not_alias() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();

        frames.upload(0, "pfx", &[0u8; 48], &mut backend).unwrap();
        frames.upload(1, "pfx", &[0u8; 48], &mut backend).unwrap();
        assert_ne!(frames.buffer(0), frames.buffer(1));
        assert_eq!(backend.creates(), 2);
    }

    #[test]
    fn test_empty_payload_releases() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();

        frames.upload(2, "pfx", &[0u8; 48], &mut backend).unwrap();
        assert!(frames.has_data());

        frames.upload(2, "pfx", &[], &mut backend).unwrap();
        assert!(!frames.has_data());
        assert!(frames.buffer(2).is_none());
        assert_eq!(backend.calls.last(), Some(&Call::Destroy { id: BufferId(0) }));
    }

    #[test]
    fn test_empty_to_empty_is_noop() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();
        frames.upload(0, "pfx", &[], &mut backend).unwrap();
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();
        let err = frames
            .upload(MAX_FRAMES_IN_FLIGHT, "pfx", &[0u8; 4], &mut backend)
            .unwrap_err();
        assert!(matches!(err, PfxError::FrameSlotOutOfRange { slot: 3, .. }));
    }

    #[test]
    fn test_release_all() {
        let mut backend = RecordingBackend::default();
        let mut frames = FrameBuffers::new();
        frames.upload(0, "pfx", &[0u8; 8], &mut backend).unwrap();
        frames.upload(1, "pfx", &[0u8; 8], &mut backend).unwrap();
        frames.release(&mut backend);
        assert!(backend.live.is_empty());
        assert!(!frames.has_data());
    }
}
