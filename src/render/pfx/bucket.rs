//! 声明桶
//!
//! 每个 `ParticleFx` 声明对应一个桶：桶内持有粒子块分配器、发射器注册表
//! 以及按帧槽位划分的 GPU 缓冲区。一次模拟步骤对每个存活发射器依次执行
//! 粒子积分、块回收和新粒子发射；贴花式声明走单独的路径。

use super::declaration::{AlphaFunc, ParticleFx};
use super::emission::{init_particle, pps_diff};
use super::emitter::{EmitterHandle, EmitterRegistry, EmitterSlot, EmitterState};
use super::gpu::{BufferId, FrameBuffers, GpuBackend};
use super::pool::ParticlePool;
use super::rng::PfxRng;
use super::state::{pack_color, PfxFlags, PfxState};
use crate::core::error::PfxResult;
use glam::Vec3;
use std::sync::Arc;

/// 发射器请求的后续特效
///
/// 桶在步骤中不能访问其他桶，由驱动在桶步骤结束后创建子发射器，
/// 再把句柄写回父发射器的 `next`。
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// 父发射器槽位
    pub parent: usize,
    /// 父发射器代号
    pub generation: u64,
    /// 后续特效声明
    pub decl: Arc<ParticleFx>,
    /// 生成位置
    pub pos: Vec3,
    /// 继承的循环标志
    pub is_loop: bool,
}

/// 单个声明的粒子桶
#[derive(Debug)]
pub struct PfxBucket {
    decl: Arc<ParticleFx>,
    pool: ParticlePool,
    emitters: EmitterRegistry,
    gpu: FrameBuffers,
}

impl PfxBucket {
    pub fn new(decl: Arc<ParticleFx>) -> Self {
        let lifetime = decl.max_lifetime();
        let pps = decl.max_pps().ceil().max(0.0) as u64;
        let block_size = (lifetime * pps).div_ceil(1000) as usize;

        Self {
            pool: ParticlePool::new(block_size),
            emitters: EmitterRegistry::new(),
            gpu: FrameBuffers::new(),
            decl,
        }
    }

    pub fn decl(&self) -> &Arc<ParticleFx> {
        &self.decl
    }

    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    pub fn emitters(&self) -> &EmitterRegistry {
        &self.emitters
    }

    /// 按声明判断是否属于本桶
    pub fn serves(&self, decl: &Arc<ParticleFx>) -> bool {
        Arc::ptr_eq(&self.decl, decl)
    }

    /// 分配发射器，初始为 `Inactive` 并装填后续特效延迟
    pub fn alloc_emitter(&mut self, generation: u64) -> usize {
        self.emitters
            .alloc(generation, self.decl.pps_create_em_delay)
    }

    /// 按句柄取仍由外部持有的发射器（`Fade` 视为已释放）
    pub fn emitter(&self, handle: &EmitterHandle) -> Option<&EmitterSlot> {
        self.emitters
            .get(handle.id, handle.generation)
            .filter(|e| e.st != EmitterState::Fade)
    }

    pub fn emitter_mut(&mut self, handle: &EmitterHandle) -> Option<&mut EmitterSlot> {
        self.emitters
            .get_mut(handle.id, handle.generation)
            .filter(|e| e.st != EmitterState::Fade)
    }

    /// 释放外部句柄
    ///
    /// 块内仍有存活粒子时进入 `Fade`，否则立即回收。
    /// 返回需要一并销毁的后续发射器。
    pub fn free_emitter(&mut self, id: usize) -> Option<EmitterHandle> {
        let emitter = self.emitters.slot_mut(id);
        let next = emitter.next.take();
        emitter.target = None;
        emitter.mesh = None;
        emitter.pose = None;

        match emitter.block {
            Some(block) if self.pool.block(block).count > 0 => {
                emitter.st = EmitterState::Fade;
            }
            Some(block) => {
                self.pool.free_block(block);
                emitter.block = None;
                emitter.st = EmitterState::Free;
            }
            None => emitter.st = EmitterState::Free,
        }

        tracing::trace!(target: "pfx", "Emitter {} released ({:?})", id, emitter.st);
        self.shrink();
        next
    }

    /// 切换发射状态
    ///
    /// 从未激活转为激活时重置块的累计时间并重新装填后续特效延迟，
    /// 状态不变的调用不做任何事。
    pub fn set_active(&mut self, handle: &EmitterHandle, active: bool) -> bool {
        let delay = self.decl.pps_create_em_delay;
        let Some(emitter) = self
            .emitters
            .get_mut(handle.id, handle.generation)
            .filter(|e| e.st != EmitterState::Fade)
        else {
            return false;
        };

        if active {
            if emitter.st == EmitterState::Active {
                return true;
            }
            emitter.st = EmitterState::Active;
            emitter.wait_for_next = delay;
            if let Some(block) = emitter.block {
                self.pool.block_mut(block).time_total = 0;
            }
        } else {
            emitter.st = EmitterState::Inactive;
        }
        true
    }

    /// 移动发射器，同时移动其块的锚点
    pub fn set_position(&mut self, handle: &EmitterHandle, pos: Vec3) -> bool {
        let Some(emitter) = self
            .emitters
            .get_mut(handle.id, handle.generation)
            .filter(|e| e.st != EmitterState::Fade)
        else {
            return false;
        };

        emitter.pos = pos;
        if let Some(block) = emitter.block {
            self.pool.block_mut(block).pos = pos;
        }
        true
    }

    /// 推进一个模拟步骤，返回需要创建的后续特效
    pub fn tick(
        &mut self,
        dt: u64,
        view_pos: Vec3,
        view_range: f32,
        rng: &mut PfxRng,
    ) -> Vec<SpawnRequest> {
        if self.decl.is_decal() {
            self.tick_decals(rng);
            return Vec::new();
        }
        self.tick_common(dt, view_pos, view_range, rng)
    }

    fn tick_common(
        &mut self,
        dt: u64,
        view_pos: Vec3,
        view_range: f32,
        rng: &mut PfxRng,
    ) -> Vec<SpawnRequest> {
        let mut requests = Vec::new();
        let mut do_shrink = false;
        let range_sq = view_range * view_range;

        for id in 0..self.emitters.len() {
            let emitter = self.emitters.slot_mut(id);
            if emitter.is_free() {
                continue;
            }

            let nearby = (emitter.pos - view_pos).length_squared() < range_sq;

            if emitter.st == EmitterState::Active
                && emitter.next.is_none()
                && emitter.wait_for_next < dt
            {
                if let Some(child) = &self.decl.pps_create_em {
                    requests.push(SpawnRequest {
                        parent: id,
                        generation: emitter.generation,
                        decl: Arc::clone(child),
                        pos: emitter.pos,
                        is_loop: emitter.is_loop,
                    });
                }
            }
            emitter.wait_for_next = emitter.wait_for_next.saturating_sub(dt);

            if let Some(block) = emitter.block {
                if self.pool.block(block).count > 0 {
                    integrate(&mut self.pool, block, dt, self.decl.fly_gravity);

                    if self.pool.block(block).count == 0
                        && (emitter.st == EmitterState::Fade || !nearby)
                    {
                        self.pool.free_block(block);
                        emitter.block = None;
                        if emitter.st == EmitterState::Fade {
                            emitter.st = EmitterState::Free;
                            tracing::trace!(target: "pfx", "Faded emitter {} freed", id);
                        }
                        do_shrink = true;
                        continue;
                    }
                }
            }

            if emitter.st == EmitterState::Active && nearby {
                let block = block_of(&mut self.pool, emitter);
                let time_total = self.pool.block(block).time_total;
                let emitted = pps_diff(&self.decl, emitter.is_loop, time_total, time_total + dt);
                emit(&self.decl, &mut self.pool, block, emitter, emitted, rng);
            }

            if let Some(block) = emitter.block {
                self.pool.block_mut(block).time_total += dt;
            }
        }

        if do_shrink {
            self.shrink();
        }
        requests
    }

    /// 贴花：每个发射器恒定一个粒子，不老化，淡出时立即回收
    fn tick_decals(&mut self, rng: &mut PfxRng) {
        let mut do_shrink = false;

        for id in 0..self.emitters.len() {
            let emitter = self.emitters.slot_mut(id);
            match emitter.st {
                EmitterState::Free => {}
                EmitterState::Active | EmitterState::Inactive => {
                    let block = block_of(&mut self.pool, emitter);
                    if self.pool.block(block).count == 0 {
                        emit(&self.decl, &mut self.pool, block, emitter, 1, rng);
                    }
                }
                EmitterState::Fade => {
                    if let Some(block) = emitter.block.take() {
                        let offset = self.pool.block(block).offset;
                        for i in 0..self.pool.block_size() {
                            self.pool.finalize(offset + i);
                        }
                        self.pool.block_mut(block).count = 0;
                        self.pool.free_block(block);
                    }
                    emitter.st = EmitterState::Free;
                    do_shrink = true;
                }
            }
        }

        if do_shrink {
            self.shrink();
        }
    }

    /// 重建整桶 GPU 记录
    pub fn build_ssbo(&mut self) {
        let decl = &self.decl;
        let bits0 = PfxFlags::particle_bits(decl);

        for id in 0..self.pool.block_count() {
            if self.pool.block(id).count == 0 {
                continue;
            }

            let (block, particles, render) = self.pool.block_parts_mut(id);
            for (ps, px) in particles.iter().zip(render.iter_mut()) {
                if ps.life == 0 {
                    px.size = [0.0; 3];
                    continue;
                }

                let a = ps.life_time();
                let cl = decl.vis_tex_color_start * (1.0 - a) + decl.vis_tex_color_end * a;
                let cl_a = decl.vis_alpha_start * (1.0 - a) + decl.vis_alpha_end * a;

                let scale = (1.0 - a) + a * decl.vis_size_end_scale;
                let sz_x = decl.vis_size_start.x * scale;
                let sz_y = decl.vis_size_start.y * scale;
                let sz_z = 0.1 * ((sz_x + sz_y) * 0.5);

                px.color = if decl.vis_alpha_func == AlphaFunc::AdditiveLight {
                    pack_color(
                        (cl.x * cl_a) as u8,
                        (cl.y * cl_a) as u8,
                        (cl.z * cl_a) as u8,
                        255,
                    )
                } else {
                    pack_color(cl.x as u8, cl.y as u8, cl.z as u8, (cl_a * 255.0) as u8)
                };

                let pos = if decl.use_emitters_for {
                    ps.pos + block.pos
                } else {
                    ps.pos
                };
                px.pos = pos.to_array();
                px.size = [sz_x, sz_y, sz_z];
                px.bits0 = bits0;
                px.dir = ps.dir.to_array();
            }
        }
    }

    /// 上传本帧槽位的数据
    pub fn prepare_frame<B: GpuBackend + ?Sized>(
        &mut self,
        slot: usize,
        backend: &mut B,
    ) -> PfxResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(self.pool.render_data());
        self.gpu.upload(slot, "pfx_bucket", bytes, backend)
    }

    /// 释放全部 GPU 资源
    pub fn release_gpu<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.gpu.release(backend);
    }

    pub fn buffer(&self, slot: usize) -> Option<BufferId> {
        self.gpu.buffer(slot)
    }

    /// 实例数（等于粒子槽位数，空槽位尺寸为零）
    pub fn instance_count(&self) -> usize {
        self.pool.render_data().len()
    }

    /// 没有发射器且没有任何帧槽位持有数据
    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty() && !self.gpu.has_data()
    }

    /// 存活粒子总数
    pub fn live_particles(&self) -> usize {
        self.pool
            .blocks()
            .iter()
            .filter(|b| b.allocated)
            .map(|b| b.count)
            .sum()
    }

    pub fn shrink(&mut self) -> bool {
        self.emitters.shrink();
        self.pool.shrink()
    }

    /// 写回后续发射器句柄
    pub(crate) fn link_next(&mut self, parent: usize, generation: u64, next: EmitterHandle) -> bool {
        match self.emitters.get_mut(parent, generation) {
            Some(emitter) if emitter.next.is_none() => {
                emitter.next = Some(next);
                true
            }
            _ => false,
        }
    }
}

/// 取发射器的块，没有时分配并以发射器位置为锚点
fn block_of(pool: &mut ParticlePool, emitter: &mut EmitterSlot) -> usize {
    if let Some(block) = emitter.block {
        return block;
    }
    let block = pool.alloc_block();
    pool.block_mut(block).pos = emitter.pos;
    emitter.block = Some(block);
    block
}

/// 推进块内全部粒子
fn integrate(pool: &mut ParticlePool, block: usize, dt: u64, gravity: Vec3) {
    let dt_f = dt as f32;
    let (block, particles, render) = pool.block_parts_mut(block);

    for (ps, px) in particles.iter_mut().zip(render.iter_mut()) {
        if ps.life == 0 {
            continue;
        }

        if u64::from(ps.life) <= dt {
            *ps = Default::default();
            *px = PfxState::default();
            block.count -= 1;
            continue;
        }

        ps.life -= dt as u16;
        ps.pos += ps.dir * dt_f;
        ps.dir += gravity * dt_f;
    }
}

/// 向块内空槽位发射 `emitted` 个粒子
///
/// 请求数先截断到块大小。从槽位 1 开始环形扫描；回到最后一次写入的
/// 槽位且该槽位已占用时说明块已满，多余的数量直接丢弃。
fn emit(
    decl: &ParticleFx,
    pool: &mut ParticlePool,
    block: usize,
    emitter: &EmitterSlot,
    emitted: u64,
    rng: &mut PfxRng,
) {
    let block_size = pool.block_size();
    let mut emitted = emitted.min(block_size as u64);
    let (block, particles, _) = pool.block_parts_mut(block);

    let mut last = 0;
    let mut id = 1;
    while emitted > 0 {
        let i = id % block_size;
        id += 1;

        if particles[i].life == 0 {
            emitted -= 1;
            last = i;
            particles[i] = init_particle(decl, emitter, block.time_total, rng);
            if particles[i].life == 0 {
                continue;
            }
            block.count += 1;
        } else if last == i {
            return;
        }
    }
}
