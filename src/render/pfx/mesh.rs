//! 外部协作者接口
//!
//! 网格采样（Mesh 形状发射）与目标实体（Target 方向模式）由场景层提供，
//! 粒子系统只通过这里的 trait 读取它们。

use glam::{Mat4, Vec3};
use std::fmt::Debug;

/// 骨骼姿态
///
/// 蒙皮网格采样时使用的骨骼矩阵（模型空间）。
#[derive(Debug, Clone, Default)]
pub struct Pose {
    /// 骨骼变换
    pub bones: Vec<Mat4>,
}

impl Pose {
    pub fn new(bones: Vec<Mat4>) -> Self {
        Self { bones }
    }
}

/// 网格表面采样器
pub trait MeshSampler: Debug + Send + Sync {
    /// 根据均匀随机数 `t`（0-1）返回网格表面上的一个世界坐标
    fn rand_coord(&self, t: f32, pose: Option<&Pose>) -> Vec3;
}

/// 被追踪的目标实体
pub trait TargetTransform: Debug + Send + Sync {
    /// 目标当前的世界变换
    fn transform(&self) -> Mat4;
}

/// 固定变换的目标，测试和简单场景使用
#[derive(Debug, Clone, Copy)]
pub struct StaticTarget(pub Mat4);

impl TargetTransform for StaticTarget {
    fn transform(&self) -> Mat4 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_target_transform() {
        let target = StaticTarget(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        let p = target.transform().transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
    }
}
