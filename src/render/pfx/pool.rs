//! 粒子块分配器
//!
//! 每个声明桶持有一个按固定大小分块的粒子数组，一个块只服务于一个发射器。
//! 释放的块只做标记，真正收缩存储只发生在 `shrink()` 中，
//! 稳态下分配是摊还 O(1) 的。

use super::state::PfxState;
use glam::Vec3;

/// 单个粒子的模拟状态
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParState {
    /// 剩余寿命（毫秒），0 表示空槽位
    pub life: u16,
    /// 初始寿命
    pub max_life: u16,
    /// 位置（发射器局部或世界坐标）
    pub pos: Vec3,
    /// 速度
    pub dir: Vec3,
}

impl ParState {
    /// 归一化年龄，0 为刚出生，接近 1 为即将死亡
    #[inline]
    pub fn life_time(&self) -> f32 {
        if self.max_life == 0 {
            return 1.0;
        }
        1.0 - self.life as f32 / self.max_life as f32
    }
}

/// 粒子内存块
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// 是否被发射器占用
    pub allocated: bool,
    /// 在粒子数组中的起始下标
    pub offset: usize,
    /// 存活粒子数
    pub count: usize,
    /// 累积激活时间（毫秒）
    pub time_total: u64,
    /// 发射器锚点
    pub pos: Vec3,
}

/// 块分配器
#[derive(Debug, Clone)]
pub struct ParticlePool {
    block_size: usize,
    blocks: Vec<Block>,
    particles: Vec<ParState>,
    render: Vec<PfxState>,
}

impl ParticlePool {
    /// 创建分配器，块大小至少为 1
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: Vec::new(),
            particles: Vec::new(),
            render: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// 当前被占用的块数
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.allocated).count()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: usize) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: usize) -> &mut Block {
        &mut self.blocks[id]
    }

    /// 全部粒子槽位
    pub fn particles(&self) -> &[ParState] {
        &self.particles
    }

    /// 某个块的粒子槽位
    pub fn block_particles(&self, id: usize) -> &[ParState] {
        let offset = self.blocks[id].offset;
        &self.particles[offset..offset + self.block_size]
    }

    /// GPU 记录，与粒子槽位一一对应
    pub fn render_data(&self) -> &[PfxState] {
        &self.render
    }

    /// 同时借出块、块内粒子和块内 GPU 记录
    pub fn block_parts_mut(&mut self, id: usize) -> (&mut Block, &mut [ParState], &mut [PfxState]) {
        let block = &mut self.blocks[id];
        let range = block.offset..block.offset + self.block_size;
        (
            block,
            &mut self.particles[range.clone()],
            &mut self.render[range],
        )
    }

    /// 分配一个块，优先复用已释放的槽位
    pub fn alloc_block(&mut self) -> usize {
        if let Some(id) = self.blocks.iter().position(|b| !b.allocated) {
            let block = &mut self.blocks[id];
            block.allocated = true;
            block.time_total = 0;
            return id;
        }

        let offset = self.particles.len();
        self.blocks.push(Block {
            allocated: true,
            offset,
            ..Default::default()
        });

        let len = offset + self.block_size;
        self.particles.resize(len, ParState::default());
        self.render.resize(len, PfxState::default());
        tracing::debug!(
            target: "pfx",
            "Particle pool grew to {} blocks ({} slots)",
            self.blocks.len(),
            len
        );
        self.blocks.len() - 1
    }

    /// 释放块，块内必须已没有存活粒子
    pub fn free_block(&mut self, id: usize) {
        let block = &mut self.blocks[id];
        assert_eq!(
            block.count, 0,
            "particle block {} freed with {} live particles",
            id, block.count
        );
        self.render[block.offset].size = [0.0; 3];
        block.allocated = false;
    }

    /// 清空单个粒子槽位
    pub fn finalize(&mut self, particle: usize) {
        self.particles[particle] = ParState::default();
        self.render[particle] = PfxState::default();
    }

    /// 移除尾部空闲块，存储大小不匹配时收缩
    ///
    /// 返回存储是否被调整。
    pub fn shrink(&mut self) -> bool {
        while self.blocks.last().is_some_and(|b| !b.allocated) {
            self.blocks.pop();
        }

        let len = self.blocks.len() * self.block_size;
        if self.particles.len() != len {
            self.particles.resize(len, ParState::default());
            self.render.resize(len, PfxState::default());
            tracing::debug!(
                target: "pfx",
                "Particle pool shrunk to {} blocks ({} slots)",
                self.blocks.len(),
                len
            );
            return true;
        }
        false
    }
}
