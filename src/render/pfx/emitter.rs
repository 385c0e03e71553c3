//! 发射器注册表
//!
//! 发射器按下标存放在每个声明桶内，空闲槽位以 `Free` 状态保留并被复用，
//! 从不在中间删除。外部只持有 `EmitterHandle`（桶下标 + 槽位下标 + 代号）。

use super::mesh::{MeshSampler, Pose, TargetTransform};
use glam::Vec3;
use std::sync::Arc;

/// 发射器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitterState {
    /// 槽位可复用
    #[default]
    Free,
    /// 已创建，未发射
    Inactive,
    /// 发射中
    Active,
    /// 句柄已释放，等待存量粒子消亡
    Fade,
}

/// 发射器句柄
///
/// `generation` 在整个粒子系统内唯一，槽位被复用后旧句柄自然失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmitterHandle {
    pub(crate) bucket: usize,
    pub(crate) id: usize,
    pub(crate) generation: u64,
}

impl EmitterHandle {
    /// 所属声明桶
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// 桶内槽位
    pub fn slot(&self) -> usize {
        self.id
    }
}

/// 发射器记录
#[derive(Debug, Clone)]
pub struct EmitterSlot {
    /// 状态
    pub st: EmitterState,
    /// 持有的粒子块
    pub block: Option<usize>,
    /// 世界位置
    pub pos: Vec3,
    /// 朝向基（X/Y/Z 轴）
    pub direction: [Vec3; 3],
    /// 循环发射
    pub is_loop: bool,
    /// 距离自动生成后续发射器的剩余时间（毫秒）
    pub wait_for_next: u64,
    /// 自动生成的后续发射器，由本发射器独占
    pub next: Option<EmitterHandle>,
    /// 追踪目标
    pub target: Option<Arc<dyn TargetTransform>>,
    /// 发射网格（覆盖声明中的网格）
    pub mesh: Option<Arc<dyn MeshSampler>>,
    /// 网格姿态
    pub pose: Option<Arc<Pose>>,
    /// 代号
    pub generation: u64,
}

impl Default for EmitterSlot {
    fn default() -> Self {
        Self {
            st: EmitterState::Free,
            block: None,
            pos: Vec3::ZERO,
            direction: [Vec3::X, Vec3::Y, Vec3::Z],
            is_loop: false,
            wait_for_next: 0,
            next: None,
            target: None,
            mesh: None,
            pose: None,
            generation: 0,
        }
    }
}

impl EmitterSlot {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.st == EmitterState::Free
    }

    /// 把局部向量按朝向基变换
    #[inline]
    pub fn to_basis(&self, v: Vec3) -> Vec3 {
        self.direction[0] * v.x + self.direction[1] * v.y + self.direction[2] * v.z
    }
}

/// 发射器注册表
#[derive(Debug, Clone, Default)]
pub struct EmitterRegistry {
    slots: Vec<EmitterSlot>,
}

impl EmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配一个 `Inactive` 发射器，优先复用 `Free` 槽位
    pub fn alloc(&mut self, generation: u64, wait_for_next: u64) -> usize {
        let slot = EmitterSlot {
            st: EmitterState::Inactive,
            wait_for_next,
            generation,
            ..Default::default()
        };

        if let Some(id) = self.slots.iter().position(EmitterSlot::is_free) {
            self.slots[id] = slot;
            return id;
        }
        self.slots.push(slot);
        self.slots.len() - 1
    }

    /// 按句柄代号取发射器，槽位已被复用或释放时返回 `None`
    pub fn get(&self, id: usize, generation: u64) -> Option<&EmitterSlot> {
        self.slots
            .get(id)
            .filter(|e| !e.is_free() && e.generation == generation)
    }

    pub fn get_mut(&mut self, id: usize, generation: u64) -> Option<&mut EmitterSlot> {
        self.slots
            .get_mut(id)
            .filter(|e| !e.is_free() && e.generation == generation)
    }

    pub fn slot(&self, id: usize) -> &EmitterSlot {
        &self.slots[id]
    }

    pub fn slot_mut(&mut self, id: usize) -> &mut EmitterSlot {
        &mut self.slots[id]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 非 `Free` 的发射器数量
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|e| !e.is_free()).count()
    }

    /// 移除尾部的 `Free` 槽位
    pub fn shrink(&mut self) {
        while self.slots.last().is_some_and(EmitterSlot::is_free) {
            self.slots.pop();
        }
    }
}
