//! GPU 粒子记录
//!
//! 每个粒子槽位和每段拖尾都对应一条 `PfxState`，整桶打包后作为
//! storage buffer 上传，布局需与着色器中的结构体一致。

use super::declaration::ParticleFx;
use bitflags::bitflags;

/// 朝向模式在 `bits0` 中的起始位
pub const ORIENTATION_SHIFT: u32 = 4;

bitflags! {
    /// `PfxState::bits0` 的开关位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PfxFlags: u32 {
        /// 深度偏移
        const Z_BIAS = 1;
        /// 四边形几何
        const QUAD_POLY = 1 << 1;
        /// 锁定偏航
        const YAW_ALIGN = 1 << 2;
        /// 拖尾段
        const TRAIL = 1 << 3;
    }
}

impl PfxFlags {
    /// 按声明生成粒子的标志位（含朝向模式）
    pub fn particle_bits(decl: &ParticleFx) -> u32 {
        let mut flags = PfxFlags::empty();
        flags.set(PfxFlags::Z_BIAS, decl.vis_z_bias);
        flags.set(PfxFlags::QUAD_POLY, decl.vis_tex_is_quad_poly);
        flags.set(PfxFlags::YAW_ALIGN, decl.vis_yaw_align);
        flags.bits() | ((decl.vis_orientation as u32) << ORIENTATION_SHIFT)
    }
}

/// GPU 粒子记录（对应 WGSL struct）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PfxState {
    /// 位置
    pub pos: [f32; 3],
    /// 颜色（RGBA8）
    pub color: u32,
    /// 尺寸，零尺寸表示空槽位
    pub size: [f32; 3],
    /// 标志位
    pub bits0: u32,
    /// 速度方向
    pub dir: [f32; 3],
    /// 第二颜色（拖尾末端）
    pub color_b: u32,
}

impl PfxState {
    /// 是否为空槽位
    pub fn is_empty(&self) -> bool {
        self.size == [0.0; 3]
    }
}

/// 打包 RGBA8 颜色，字节序与着色器 `unpack4x8unorm` 一致
#[inline]
pub fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

/// 解包 RGBA8 颜色
#[inline]
pub fn unpack_color(color: u32) -> [u8; 4] {
    color.to_le_bytes()
}
