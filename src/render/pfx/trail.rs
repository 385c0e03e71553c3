//! 拖尾
//!
//! 与粒子桶平行的一套池化结构：按声明分桶，桶内拖尾以空闲槽位复用，
//! 没有块的概念。每条拖尾记录锚点经过的点序列，点随时间老化，
//! 超过淡出时长后从最旧一端移除。

use super::declaration::{AlphaFunc, ParticleFx};
use super::gpu::{BufferId, FrameBuffers, GpuBackend};
use super::state::{pack_color, PfxFlags, PfxState};
use crate::core::error::PfxResult;
use glam::Vec3;
use std::sync::Arc;

/// 共线判定容差
const COLINEAR_EPSILON: f32 = 0.001;

const QUAD_DX: [f32; 6] = [1.0, 1.0, -1.0, 1.0, -1.0, -1.0];
const QUAD_DY: [f32; 6] = [0.0, 1.0, 0.0, 1.0, 1.0, 0.0];

/// 拖尾句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrailHandle {
    pub(crate) bucket: usize,
    pub(crate) id: usize,
    pub(crate) generation: u64,
}

/// 拖尾槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailState {
    /// 槽位可复用
    #[default]
    Free,
    /// 由句柄持有
    Alloc,
    /// 句柄已释放，等待点序列老化
    Fade,
}

/// 拖尾上的点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub pos: Vec3,
    /// 年龄（毫秒）
    pub time: u64,
}

/// 单条拖尾
#[derive(Debug, Clone, Default)]
pub struct Trail {
    pub st: TrailState,
    /// 当前锚点
    pub pos: Vec3,
    /// 从旧到新的点序列
    pub points: Vec<Point>,
    pub generation: u64,
}

impl Trail {
    fn tick(&mut self, dt: u64, max_time: u64) {
        if self.st == TrailState::Free {
            return;
        }

        for p in &mut self.points {
            p.time += dt;
        }

        if self.st != TrailState::Fade {
            self.extend(self.pos);
        }

        let expired = self
            .points
            .iter()
            .take_while(|p| p.time >= max_time)
            .count();
        self.points.drain(..expired);

        if self.st == TrailState::Fade && self.points.len() <= 1 {
            self.st = TrailState::Free;
            self.points.clear();
        }
    }

    /// 追加锚点；与前两个点共线时替换最后一个点
    fn extend(&mut self, at: Vec3) {
        let x = Point { pos: at, time: 0 };
        let n = self.points.len();

        let Some(last) = self.points.last_mut() else {
            self.points.push(x);
            return;
        };

        if last.pos == at {
            last.time = 0;
            return;
        }

        if n > 1 {
            let origin = self.points[n - 2].pos;
            let u = at - origin;
            let v = self.points[n - 1].pos - origin;
            if (u.dot(v) - u.length() * v.length()).abs() < COLINEAR_EPSILON {
                self.points[n - 1] = x;
                return;
            }
        }
        self.points.push(x);
    }
}

/// 拖尾几何顶点
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TrailVertex {
    pub pos: [f32; 3],
    pub norm: [f32; 3],
    pub uv: [f32; 2],
    pub color: u32,
}

/// 单个声明的拖尾桶
#[derive(Debug)]
pub struct TrailBucket {
    decl: Arc<ParticleFx>,
    max_time: u64,
    trails: Vec<Trail>,
    states: Vec<PfxState>,
    vertices: Vec<TrailVertex>,
    gpu: FrameBuffers,
    vbo: FrameBuffers,
}

impl TrailBucket {
    pub fn new(decl: Arc<ParticleFx>) -> Self {
        Self {
            max_time: (decl.trl_fade_speed * 1000.0) as u64,
            decl,
            trails: Vec::new(),
            states: Vec::new(),
            vertices: Vec::new(),
            gpu: FrameBuffers::new(),
            vbo: FrameBuffers::new(),
        }
    }

    pub fn decl(&self) -> &Arc<ParticleFx> {
        &self.decl
    }

    /// 淡出时长（毫秒）
    pub fn max_time(&self) -> u64 {
        self.max_time
    }

    pub fn trails(&self) -> &[Trail] {
        &self.trails
    }

    pub fn serves(&self, decl: &Arc<ParticleFx>) -> bool {
        Arc::ptr_eq(&self.decl, decl)
    }

    /// 分配拖尾，优先复用空闲槽位
    pub fn alloc(&mut self, generation: u64) -> usize {
        let trail = Trail {
            st: TrailState::Alloc,
            generation,
            ..Default::default()
        };

        if let Some(id) = self
            .trails
            .iter()
            .position(|t| t.st == TrailState::Free)
        {
            self.trails[id] = trail;
            return id;
        }
        self.trails.push(trail);
        self.trails.len() - 1
    }

    /// 按句柄取仍由外部持有的拖尾
    pub fn trail_mut(&mut self, id: usize, generation: u64) -> Option<&mut Trail> {
        self.trails
            .get_mut(id)
            .filter(|t| t.st == TrailState::Alloc && t.generation == generation)
    }

    pub fn tick(&mut self, dt: u64) {
        for trail in &mut self.trails {
            trail.tick(dt, self.max_time);
        }
        while self
            .trails
            .last()
            .is_some_and(|t| t.st == TrailState::Free)
        {
            self.trails.pop();
        }
    }

    /// 重建线段记录与顶点
    pub fn build(&mut self, view_dir: Vec3) {
        self.states.clear();
        self.vertices.clear();

        for trail in &self.trails {
            if trail.points.len() < 2 {
                continue;
            }

            let max_t = self.max_time.min(trail.points[0].time).max(1) as f32;
            for pair in trail.points.windows(2) {
                let (state, quad) = self.segment(view_dir, &pair[0], &pair[1], max_t);
                self.states.push(state);
                self.vertices.extend_from_slice(&quad);
            }
        }
    }

    fn segment(&self, view_dir: Vec3, a: &Point, b: &Point, max_t: f32) -> (PfxState, [TrailVertex; 6]) {
        let width = self.decl.trl_width * 2.0;
        let dp = b.pos - a.pos;

        let mut n = -view_dir.cross(dp);
        let len = n.length();
        if len > 0.0 {
            n = n / len * width;
        }

        let t_a = 1.0 - a.time as f32 / max_t;
        let t_b = 1.0 - b.time as f32 / max_t;
        let cl_a = self.mk_color(t_a);
        let cl_b = self.mk_color(t_b);

        let state = PfxState {
            pos: a.pos.to_array(),
            color: cl_a,
            size: [width, t_a, t_b],
            bits0: PfxFlags::TRAIL.bits(),
            dir: dp.to_array(),
            color_b: cl_b,
        };

        let quad = std::array::from_fn(|i| {
            let (dx, dy) = (QUAD_DX[i], QUAD_DY[i]);
            TrailVertex {
                pos: (a.pos + n * dx + dp * dy).to_array(),
                norm: [0.0, 1.0, 0.0],
                uv: [dx * 0.5 + 0.5, 1.0 - (t_a + dy * (t_b - t_a))],
                color: if dy == 0.0 { cl_a } else { cl_b },
            }
        });

        (state, quad)
    }

    fn mk_color(&self, t: f32) -> u32 {
        let t = t.clamp(0.0, 1.0);
        match self.decl.vis_alpha_func {
            AlphaFunc::AdditiveLight => {
                let c = (255.0 * t) as u8;
                pack_color(c, c, c, 255)
            }
            AlphaFunc::Transparent => pack_color(255, 255, 255, (t * 255.0) as u8),
            AlphaFunc::None | AlphaFunc::Multiply => pack_color(255, 255, 255, 255),
        }
    }

    pub fn segments(&self) -> &[PfxState] {
        &self.states
    }

    pub fn vertices(&self) -> &[TrailVertex] {
        &self.vertices
    }

    pub fn prepare_frame<B: GpuBackend + ?Sized>(
        &mut self,
        slot: usize,
        backend: &mut B,
    ) -> PfxResult<()> {
        self.gpu
            .upload(slot, "trail_segments", bytemuck::cast_slice(&self.states), backend)?;
        self.vbo
            .upload(slot, "trail_vertices", bytemuck::cast_slice(&self.vertices), backend)
    }

    pub fn release_gpu<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.gpu.release(backend);
        self.vbo.release(backend);
    }

    pub fn buffer(&self, slot: usize) -> Option<BufferId> {
        self.gpu.buffer(slot)
    }

    pub fn vertex_buffer(&self, slot: usize) -> Option<BufferId> {
        self.vbo.buffer(slot)
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty() && !self.gpu.has_data() && !self.vbo.has_data()
    }

    pub fn live_trails(&self) -> usize {
        self.trails
            .iter()
            .filter(|t| t.st != TrailState::Free)
            .count()
    }

    pub fn point_count(&self) -> usize {
        self.trails.iter().map(|t| t.points.len()).sum()
    }
}

/// 全部拖尾桶
#[derive(Debug, Default)]
pub struct TrlObjects {
    buckets: Vec<Option<TrailBucket>>,
    generation: u64,
}

impl TrlObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建拖尾；声明不带拖尾参数时返回 `None`
    pub fn create(&mut self, decl: &Arc<ParticleFx>) -> Option<TrailHandle> {
        if !decl.has_trail() {
            return None;
        }

        self.generation += 1;
        let generation = self.generation;
        let bucket = self.bucket_for(decl);
        let id = self.buckets[bucket].as_mut()?.alloc(generation);

        Some(TrailHandle {
            bucket,
            id,
            generation,
        })
    }

    fn bucket_for(&mut self, decl: &Arc<ParticleFx>) -> usize {
        let existing = self
            .buckets
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.serves(decl)));
        if let Some(id) = existing {
            return id;
        }

        let bucket = Some(TrailBucket::new(Arc::clone(decl)));
        tracing::debug!(target: "trail", "Trail bucket created ({} buckets)", self.buckets.len() + 1);
        if let Some(id) = self.buckets.iter().position(Option::is_none) {
            self.buckets[id] = bucket;
            return id;
        }
        self.buckets.push(bucket);
        self.buckets.len() - 1
    }

    fn trail_mut(&mut self, handle: &TrailHandle) -> Option<&mut Trail> {
        self.buckets
            .get_mut(handle.bucket)?
            .as_mut()?
            .trail_mut(handle.id, handle.generation)
    }

    /// 移动拖尾锚点
    pub fn set_position(&mut self, handle: &TrailHandle, pos: Vec3) -> bool {
        match self.trail_mut(handle) {
            Some(trail) => {
                trail.pos = pos;
                true
            }
            None => {
                tracing::warn!(target: "trail", "Stale trail handle {:?}", handle);
                false
            }
        }
    }

    /// 释放句柄，拖尾进入淡出
    pub fn destroy(&mut self, handle: TrailHandle) {
        if let Some(trail) = self.trail_mut(&handle) {
            trail.st = TrailState::Fade;
            tracing::trace!(target: "trail", "Trail {} fading", handle.id);
        }
    }

    /// 推进所有拖尾并移除空桶
    pub fn tick(&mut self, dt: u64) {
        for slot in &mut self.buckets {
            let Some(bucket) = slot else { continue };
            bucket.tick(dt);
            if bucket.is_empty() {
                *slot = None;
                tracing::debug!(target: "trail", "Trail bucket removed");
            }
        }
        while self.buckets.last().is_some_and(Option::is_none) {
            self.buckets.pop();
        }
    }

    pub fn build(&mut self, view_dir: Vec3) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.build(view_dir);
        }
    }

    pub fn prepare_frame<B: GpuBackend + ?Sized>(
        &mut self,
        slot: usize,
        backend: &mut B,
    ) -> PfxResult<()> {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.prepare_frame(slot, backend)?;
        }
        Ok(())
    }

    pub fn release_gpu<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.release_gpu(backend);
        }
    }

    pub fn buckets(&self) -> impl Iterator<Item = &TrailBucket> {
        self.buckets.iter().flatten()
    }

    pub fn live_trails(&self) -> usize {
        self.buckets().map(TrailBucket::live_trails).sum()
    }

    pub fn point_count(&self) -> usize {
        self.buckets().map(TrailBucket::point_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pfx::gpu::testing::RecordingBackend;
    use crate::render::pfx::state::unpack_color;

    fn trail_decl(fade: f32) -> Arc<ParticleFx> {
        Arc::new(ParticleFx {
            trl_texture: Some("trail.tga".to_string()),
            trl_width: 0.5,
            trl_fade_speed: fade,
            ..Default::default()
        })
    }

    fn points(objects: &TrlObjects) -> Vec<Point> {
        objects.buckets().next().unwrap().trails()[0].points.clone()
    }

    #[test]
    fn test_create_requires_trail_parameters() {
        let mut objects = TrlObjects::new();
        let plain = Arc::new(ParticleFx::default());
        assert!(objects.create(&plain).is_none());
        assert_eq!(objects.buckets().count(), 0);

        assert!(objects.create(&trail_decl(1.0)).is_some());
    }

    #[test]
    fn test_same_declaration_shares_bucket() {
        let mut objects = TrlObjects::new();
        let decl = trail_decl(1.0);
        let a = objects.create(&decl).unwrap();
        let b = objects.create(&decl).unwrap();
        assert_eq!(a.bucket, b.bucket);
        assert_ne!(a.id, b.id);
        assert_eq!(objects.buckets().count(), 1);
    }

    #[test]
    fn test_colinear_points_are_merged() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(10.0)).unwrap();

        for x in 0..5 {
            objects.set_position(&h, Vec3::new(x as f32, 0.0, 0.0));
            objects.tick(10);
        }
        let pts = points(&objects);
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1].pos, Vec3::new(4.0, 0.0, 0.0));

        objects.set_position(&h, Vec3::new(4.0, 1.0, 0.0));
        objects.tick(10);
        assert_eq!(points(&objects).len(), 3);
    }

    #[test]
    fn test_coincident_anchor_resets_age() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(10.0)).unwrap();
        objects.set_position(&h, Vec3::ONE);
        objects.tick(10);
        objects.tick(10);
        let pts = points(&objects);
        assert_eq!(pts.len(), 1);
        assert_eq!(pts[0].time, 0);
    }

    #[test]
    fn test_old_points_trimmed() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(0.1)).unwrap();

        objects.set_position(&h, Vec3::ZERO);
        objects.tick(10);
        objects.set_position(&h, Vec3::X);
        objects.tick(50);
        objects.set_position(&h, Vec3::new(1.0, 1.0, 0.0));
        objects.tick(60);

        let pts = points(&objects);
        assert!(pts.iter().all(|p| p.time < 100));
        assert_eq!(pts.len(), 2);
    }

    #[test]
    fn test_fade_frees_and_removes_bucket() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(0.1)).unwrap();
        let state = |objects: &TrlObjects| objects.buckets().next().unwrap().trails()[0].st;
        assert_eq!(state(&objects), TrailState::Alloc);
        objects.set_position(&h, Vec3::ZERO);
        objects.tick(10);
        objects.set_position(&h, Vec3::X);
        objects.tick(10);

        objects.destroy(h);
        assert_eq!(state(&objects), TrailState::Fade);
        assert!(!objects.set_position(&h, Vec3::Y));
        assert_eq!(objects.live_trails(), 1);

        objects.tick(200);
        assert_eq!(objects.live_trails(), 0);
        assert_eq!(objects.buckets().count(), 0);
    }

    #[test]
    fn test_segment_build() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(1.0)).unwrap();
        objects.set_position(&h, Vec3::ZERO);
        objects.tick(100);
        objects.set_position(&h, Vec3::X);
        objects.tick(100);

        objects.build(Vec3::Z);
        let bucket = objects.buckets().next().unwrap();
        assert_eq!(bucket.segments().len(), 1);
        assert_eq!(bucket.vertices().len(), 6);

        let seg = bucket.segments()[0];
        assert_eq!(seg.bits0, 1 << 3);
        assert_eq!(seg.dir, [1.0, 0.0, 0.0]);
        assert_eq!(seg.size[0], 1.0);
        // 最旧点年龄即淡出基准
        assert_eq!(seg.size[1], 0.0);
        assert_eq!(seg.size[2], 1.0);
        assert_eq!(unpack_color(seg.color), [255, 255, 255, 0]);
        assert_eq!(unpack_color(seg.color_b), [255, 255, 255, 255]);

        // 法线 = -(Z x X) = -Y，宽度 1
        let v0 = bucket.vertices()[0];
        assert_eq!(v0.pos, [0.0, -1.0, 0.0]);
        assert_eq!(v0.uv, [1.0, 1.0]);
        let v1 = bucket.vertices()[1];
        assert_eq!(v1.pos, [1.0, -1.0, 0.0]);
        assert_eq!(v1.uv, [1.0, 0.0]);
    }

    #[test]
    fn test_additive_color_ramp() {
        let decl = Arc::new(ParticleFx {
            vis_alpha_func: AlphaFunc::AdditiveLight,
            ..(*trail_decl(1.0)).clone()
        });
        let bucket = TrailBucket::new(decl);
        assert_eq!(unpack_color(bucket.mk_color(1.0)), [255, 255, 255, 255]);
        assert_eq!(unpack_color(bucket.mk_color(-1.0)), [0, 0, 0, 255]);
    }

    #[test]
    fn test_prepare_frame_uploads_both_buffers() {
        let mut objects = TrlObjects::new();
        let h = objects.create(&trail_decl(1.0)).unwrap();
        objects.set_position(&h, Vec3::ZERO);
        objects.tick(10);
        objects.set_position(&h, Vec3::X);
        objects.tick(10);
        objects.build(Vec3::Z);

        let mut backend = RecordingBackend::default();
        objects.prepare_frame(1, &mut backend).unwrap();
        let bucket = objects.buckets().next().unwrap();
        assert!(bucket.buffer(1).is_some());
        assert!(bucket.vertex_buffer(1).is_some());
        assert_eq!(backend.creates(), 2);
    }
}
