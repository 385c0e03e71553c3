//! 粒子系统驱动
//!
//! `PfxObjects` 持有全部声明桶与拖尾桶，对外提供句柄 API 和每帧三个入口：
//! `step` 推进模拟，`build_render_buffers` 重建 GPU 记录，
//! `prepare_frame` 把记录上传到指定帧槽位。

use super::bucket::PfxBucket;
use super::declaration::{AlphaFunc, ParticleFx};
use super::emitter::{EmitterHandle, EmitterSlot};
use super::gpu::{BufferId, GpuBackend};
use super::mesh::{MeshSampler, Pose, TargetTransform};
use super::rng::PfxRng;
use super::trail::{TrailHandle, TrlObjects};
use crate::config::PfxConfig;
use crate::core::error::{PfxError, PfxResult};
use glam::Vec3;
use std::sync::Arc;

/// 渲染材质描述
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub texture: Option<String>,
    pub alpha_func: AlphaFunc,
}

/// 绘制内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    /// 公告板粒子
    Particles,
    /// 拖尾线段
    Trail,
}

/// 每个桶一次绘制
#[derive(Debug, Clone)]
pub struct DrawItem<'a> {
    pub kind: DrawKind,
    pub decl: &'a Arc<ParticleFx>,
    pub material: Material,
    /// 实例数
    pub instances: usize,
    /// 每实例顶点数
    pub vertices_per_instance: usize,
    /// 本帧槽位的记录缓冲区
    pub buffer: Option<BufferId>,
}

/// 诊断统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PfxStats {
    pub buckets: usize,
    pub emitters: usize,
    pub blocks: usize,
    pub live_particles: usize,
    pub trails: usize,
    pub trail_points: usize,
}

/// 粒子系统
#[derive(Debug)]
pub struct PfxObjects {
    config: PfxConfig,
    rng: PfxRng,
    buckets: Vec<Option<PfxBucket>>,
    trails: TrlObjects,
    generation: u64,
}

impl PfxObjects {
    /// 按配置创建，配置了种子时模拟可复现
    pub fn new(config: PfxConfig) -> PfxResult<Self> {
        let rng = match config.rng_seed {
            Some(seed) => PfxRng::seeded(seed),
            None => PfxRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// 注入随机源
    pub fn with_rng(config: PfxConfig, rng: PfxRng) -> PfxResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            buckets: Vec::new(),
            trails: TrlObjects::new(),
            generation: 0,
        })
    }

    pub fn config(&self) -> &PfxConfig {
        &self.config
    }

    /// 按声明取桶，没有时在空闲槽位创建
    fn bucket_for(&mut self, decl: &Arc<ParticleFx>) -> (usize, &mut PfxBucket) {
        let existing = self
            .buckets
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.serves(decl)));
        let id = match existing {
            Some(id) => id,
            None => match self.buckets.iter().position(Option::is_none) {
                Some(id) => id,
                None => {
                    self.buckets.push(None);
                    self.buckets.len() - 1
                }
            },
        };

        let bucket = self.buckets[id].get_or_insert_with(|| {
            let bucket = PfxBucket::new(Arc::clone(decl));
            tracing::debug!(
                target: "pfx",
                "Particle bucket created (block size {})",
                bucket.pool().block_size()
            );
            bucket
        });
        (id, bucket)
    }

    fn bucket_mut(&mut self, id: usize) -> Option<&mut PfxBucket> {
        self.buckets.get_mut(id).and_then(Option::as_mut)
    }

    /// 创建发射器，初始为未激活
    pub fn create_emitter(&mut self, decl: &Arc<ParticleFx>, pos: Vec3) -> EmitterHandle {
        self.generation += 1;
        let generation = self.generation;
        let (bucket_id, bucket) = self.bucket_for(decl);
        let id = bucket.alloc_emitter(generation);

        let handle = EmitterHandle {
            bucket: bucket_id,
            id,
            generation,
        };
        bucket.set_position(&handle, pos);
        handle
    }

    /// 句柄是否仍然有效
    pub fn is_alive(&self, handle: &EmitterHandle) -> bool {
        self.buckets
            .get(handle.bucket)
            .and_then(Option::as_ref)
            .and_then(|b| b.emitter(handle))
            .is_some()
    }

    /// 读取发射器状态
    pub fn emitter(&self, handle: &EmitterHandle) -> Option<&EmitterSlot> {
        self.buckets
            .get(handle.bucket)
            .and_then(Option::as_ref)
            .and_then(|b| b.emitter(handle))
    }

    fn with_emitter<F>(&mut self, handle: &EmitterHandle, f: F) -> bool
    where
        F: FnOnce(&mut EmitterSlot),
    {
        match self.bucket_mut(handle.bucket).and_then(|b| b.emitter_mut(handle)) {
            Some(emitter) => {
                f(emitter);
                true
            }
            None => {
                tracing::warn!(target: "pfx", "Stale emitter handle {:?}", handle);
                false
            }
        }
    }

    pub fn set_active(&mut self, handle: &EmitterHandle, active: bool) -> bool {
        let ok = self
            .bucket_mut(handle.bucket)
            .is_some_and(|b| b.set_active(handle, active));
        if !ok {
            tracing::warn!(target: "pfx", "Stale emitter handle {:?}", handle);
        }
        ok
    }

    pub fn set_looped(&mut self, handle: &EmitterHandle, looped: bool) -> bool {
        self.with_emitter(handle, |e| e.is_loop = looped)
    }

    pub fn set_position(&mut self, handle: &EmitterHandle, pos: Vec3) -> bool {
        let ok = self
            .bucket_mut(handle.bucket)
            .is_some_and(|b| b.set_position(handle, pos));
        if !ok {
            tracing::warn!(target: "pfx", "Stale emitter handle {:?}", handle);
        }
        ok
    }

    /// 设置朝向基（X/Y/Z 轴）
    pub fn set_direction(&mut self, handle: &EmitterHandle, axes: [Vec3; 3]) -> bool {
        self.with_emitter(handle, |e| e.direction = axes)
    }

    pub fn set_target(
        &mut self,
        handle: &EmitterHandle,
        target: Option<Arc<dyn TargetTransform>>,
    ) -> bool {
        self.with_emitter(handle, |e| e.target = target)
    }

    /// 设置发射网格及其姿态
    pub fn set_mesh(
        &mut self,
        handle: &EmitterHandle,
        mesh: Option<Arc<dyn MeshSampler>>,
        pose: Option<Arc<Pose>>,
    ) -> bool {
        self.with_emitter(handle, |e| {
            e.mesh = mesh;
            e.pose = pose;
        })
    }

    /// 释放发射器及其自动生成的后续发射器
    ///
    /// 仍有存活粒子的发射器进入淡出，失效句柄被忽略。
    pub fn destroy(&mut self, handle: EmitterHandle) {
        let mut pending = Some(handle);
        while let Some(h) = pending.take() {
            let Some(bucket) = self.bucket_mut(h.bucket) else {
                break;
            };
            if bucket.emitter(&h).is_none() {
                break;
            }
            pending = bucket.free_emitter(h.id);
        }
    }

    /// 创建拖尾；声明不带拖尾参数时返回 `None`
    pub fn create_trail(&mut self, decl: &Arc<ParticleFx>) -> Option<TrailHandle> {
        self.trails.create(decl)
    }

    pub fn set_trail_position(&mut self, handle: &TrailHandle, pos: Vec3) -> bool {
        self.trails.set_position(handle, pos)
    }

    /// 释放拖尾，拖尾总是先淡出
    pub fn destroy_trail(&mut self, handle: TrailHandle) {
        self.trails.destroy(handle);
    }

    /// 全部粒子桶
    pub fn buckets(&self) -> impl Iterator<Item = &PfxBucket> {
        self.buckets.iter().flatten()
    }

    pub fn trails(&self) -> &TrlObjects {
        &self.trails
    }

    /// 推进一个模拟步骤
    ///
    /// `dt` 为毫秒，`view_pos` 为可见距离判定的参考点。
    pub fn step(&mut self, dt: u64, view_pos: Vec3) {
        let view_range = self.config.view_range;
        let mut spawns = Vec::new();

        for (id, slot) in self.buckets.iter_mut().enumerate() {
            let Some(bucket) = slot else { continue };
            for request in bucket.tick(dt, view_pos, view_range, &mut self.rng) {
                spawns.push((id, request));
            }
        }

        for (bucket, request) in spawns {
            let child = self.create_emitter(&request.decl, request.pos);
            self.set_active(&child, true);
            self.set_looped(&child, request.is_loop);

            let linked = self
                .bucket_mut(bucket)
                .is_some_and(|b| b.link_next(request.parent, request.generation, child));
            if linked {
                tracing::debug!(
                    target: "pfx",
                    "Emitter {} spawned follow-up {:?}",
                    request.parent,
                    child
                );
            } else {
                self.destroy(child);
            }
        }

        self.trails.tick(dt);
        self.remove_empty_buckets();
    }

    fn remove_empty_buckets(&mut self) {
        for slot in &mut self.buckets {
            if slot.as_ref().is_some_and(PfxBucket::is_empty) {
                *slot = None;
                tracing::debug!(target: "pfx", "Particle bucket removed");
            }
        }
        while self.buckets.last().is_some_and(Option::is_none) {
            self.buckets.pop();
        }
    }

    /// 重建全部 GPU 记录
    pub fn build_render_buffers(&mut self, view_dir: Vec3) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.build_ssbo();
        }
        self.trails.build(view_dir);
    }

    /// 上传到帧槽位
    ///
    /// 字节数不变时原地更新，否则重建缓冲区。
    pub fn prepare_frame<B: GpuBackend + ?Sized>(
        &mut self,
        slot: usize,
        backend: &mut B,
    ) -> PfxResult<()> {
        let frames = self.config.frames_in_flight;
        if slot >= frames {
            return Err(PfxError::FrameSlotOutOfRange { slot, frames });
        }

        for bucket in self.buckets.iter_mut().flatten() {
            bucket.prepare_frame(slot, backend)?;
        }
        self.trails.prepare_frame(slot, backend)
    }

    /// 释放全部 GPU 资源
    pub fn release_gpu<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.release_gpu(backend);
        }
        self.trails.release_gpu(backend);
    }

    /// 本帧槽位的绘制列表，每个桶一项
    pub fn draw_items(&self, slot: usize) -> Vec<DrawItem<'_>> {
        let particles = self.buckets.iter().flatten().map(|b| {
            let decl = b.decl();
            DrawItem {
                kind: DrawKind::Particles,
                decl,
                material: Material {
                    texture: decl.vis_texture.clone(),
                    alpha_func: decl.vis_alpha_func,
                },
                instances: b.instance_count(),
                vertices_per_instance: decl.vertex_count(),
                buffer: b.buffer(slot),
            }
        });

        let trails = self.trails.buckets().map(|b| {
            let decl = b.decl();
            DrawItem {
                kind: DrawKind::Trail,
                decl,
                material: Material {
                    texture: decl.trl_texture.clone(),
                    alpha_func: decl.vis_alpha_func,
                },
                instances: b.segments().len(),
                vertices_per_instance: 6,
                buffer: b.vertex_buffer(slot),
            }
        });

        particles
            .chain(trails)
            .filter(|item| item.instances > 0)
            .collect()
    }

    pub fn stats(&self) -> PfxStats {
        let mut stats = PfxStats {
            trails: self.trails.live_trails(),
            trail_points: self.trails.point_count(),
            ..Default::default()
        };
        for bucket in self.buckets.iter().flatten() {
            stats.buckets += 1;
            stats.emitters += bucket.emitters().live_count();
            stats.blocks += bucket.pool().allocated_blocks();
            stats.live_particles += bucket.live_particles();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pfx::gpu::testing::RecordingBackend;
    use crate::render::pfx::mesh::StaticTarget;
    use glam::Mat4;

    fn objects() -> PfxObjects {
        PfxObjects::with_rng(PfxConfig::default(), PfxRng::seeded(1)).unwrap()
    }

    fn looping_rate(pps: f32) -> Arc<ParticleFx> {
        Arc::new(ParticleFx {
            pps_value: pps,
            lsp_part_avg: 1000.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PfxConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(PfxObjects::new(config), Err(PfxError::Config(_))));
    }

    #[test]
    fn test_same_declaration_shares_bucket() {
        let mut pfx = objects();
        let decl = looping_rate(10.0);
        let a = pfx.create_emitter(&decl, Vec3::ZERO);
        let b = pfx.create_emitter(&decl, Vec3::X);
        let other = pfx.create_emitter(&looping_rate(10.0), Vec3::ZERO);

        assert_eq!(a.bucket(), b.bucket());
        assert_ne!(a.bucket(), other.bucket());
        assert_eq!(pfx.stats().buckets, 2);
        assert_eq!(pfx.emitter(&b).unwrap().pos, Vec3::X);
    }

    #[test]
    fn test_stale_handle_ignored() {
        let mut pfx = objects();
        let decl = looping_rate(10.0);
        let h = pfx.create_emitter(&decl, Vec3::ZERO);
        pfx.destroy(h);
        assert!(!pfx.is_alive(&h));
        assert!(!pfx.set_active(&h, true));
        assert!(!pfx.set_position(&h, Vec3::ONE));
        pfx.destroy(h);

        let h2 = pfx.create_emitter(&decl, Vec3::ZERO);
        assert!(pfx.is_alive(&h2));
        assert!(!pfx.set_looped(&h, true));
    }

    #[test]
    fn test_bucket_removed_when_empty() {
        let mut pfx = objects();
        let h = pfx.create_emitter(&looping_rate(10.0), Vec3::ZERO);
        pfx.destroy(h);
        pfx.step(16, Vec3::ZERO);
        assert_eq!(pfx.stats().buckets, 0);
    }

    #[test]
    fn test_chained_spawn_and_recursive_destroy() {
        let child = Arc::new(ParticleFx {
            pps_value: 10.0,
            lsp_part_avg: 100.0,
            ..Default::default()
        });
        let parent = Arc::new(ParticleFx {
            pps_value: 10.0,
            lsp_part_avg: 100.0,
            pps_create_em: Some(Arc::clone(&child)),
            pps_create_em_delay: 50,
            ..Default::default()
        });

        let mut pfx = objects();
        let h = pfx.create_emitter(&parent, Vec3::new(3.0, 0.0, 0.0));
        pfx.set_looped(&h, true);
        pfx.set_active(&h, true);

        pfx.step(100, Vec3::ZERO);
        let next = pfx.emitter(&h).unwrap().next.unwrap();
        assert_ne!(next.bucket(), h.bucket());
        let spawned = pfx.emitter(&next).unwrap();
        assert_eq!(spawned.pos, Vec3::new(3.0, 0.0, 0.0));
        assert!(spawned.is_loop);
        assert_eq!(spawned.st, crate::render::pfx::EmitterState::Active);
        assert_eq!(pfx.stats().emitters, 2);

        pfx.destroy(h);
        assert!(!pfx.is_alive(&next));
        pfx.step(1000, Vec3::ZERO);
        assert_eq!(pfx.stats().emitters, 0);
    }

    #[test]
    fn test_setters_reach_emitter() {
        let mut pfx = objects();
        let h = pfx.create_emitter(&looping_rate(1.0), Vec3::ZERO);
        assert!(pfx.set_direction(&h, [Vec3::Z, Vec3::Y, -Vec3::X]));
        assert!(pfx.set_target(&h, Some(Arc::new(StaticTarget(Mat4::IDENTITY)))));
        assert!(pfx.set_mesh(&h, None, Some(Arc::new(Pose::new(Vec::new())))));

        let e = pfx.emitter(&h).unwrap();
        assert_eq!(e.direction[0], Vec3::Z);
        assert!(e.target.is_some());
        assert!(e.pose.is_some());
    }

    #[test]
    fn test_prepare_frame_slot_bounds() {
        let mut pfx = objects();
        let mut backend = RecordingBackend::default();
        assert!(pfx.prepare_frame(1, &mut backend).is_ok());
        assert!(matches!(
            pfx.prepare_frame(2, &mut backend),
            Err(PfxError::FrameSlotOutOfRange { slot: 2, frames: 2 })
        ));
    }

    #[test]
    fn test_draw_items() {
        let mut pfx = objects();
        let decl = Arc::new(ParticleFx {
            pps_value: 10.0,
            vis_texture: Some("spark.tga".to_string()),
            vis_alpha_func: AlphaFunc::AdditiveLight,
            ..Default::default()
        });
        let h = pfx.create_emitter(&decl, Vec3::ZERO);
        pfx.set_active(&h, true);
        pfx.step(16, Vec3::ZERO);
        pfx.build_render_buffers(Vec3::Z);

        let mut backend = RecordingBackend::default();
        pfx.prepare_frame(0, &mut backend).unwrap();

        let items = pfx.draw_items(0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, DrawKind::Particles);
        assert_eq!(items[0].material.texture.as_deref(), Some("spark.tga"));
        assert_eq!(items[0].instances, 10);
        assert_eq!(items[0].vertices_per_instance, 6);
        assert!(items[0].buffer.is_some());
        assert!(pfx.draw_items(1)[0].buffer.is_none());
    }

    #[test]
    fn test_trail_api() {
        let mut pfx = objects();
        let decl = Arc::new(ParticleFx {
            trl_texture: Some("trail.tga".to_string()),
            trl_width: 1.0,
            trl_fade_speed: 0.2,
            ..Default::default()
        });
        let h = pfx.create_trail(&decl).unwrap();
        pfx.set_trail_position(&h, Vec3::ZERO);
        pfx.step(10, Vec3::ZERO);
        pfx.set_trail_position(&h, Vec3::X);
        pfx.step(10, Vec3::ZERO);
        assert_eq!(pfx.stats().trail_points, 2);

        pfx.destroy_trail(h);
        pfx.step(500, Vec3::ZERO);
        assert_eq!(pfx.stats().trails, 0);
        assert_eq!(pfx.trails().buckets().count(), 0);
    }
}
