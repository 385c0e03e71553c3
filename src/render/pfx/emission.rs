//! 发射计数与粒子初始化
//!
//! 发射形状与方向模式都是无状态的纯函数：输入声明、发射器和随机源，
//! 输出一个新粒子。

use super::declaration::{DirMode, EmitterShape, Frame, ParticleFx};
use super::emitter::EmitterSlot;
use super::pool::ParState;
use super::rng::PfxRng;
use glam::Vec3;
use std::f32::consts::{PI, TAU};

/// `[time0, time1)` 区间内应发射的粒子数
///
/// 取发射率积分在两端的整数部分之差，任意切分时间步长总数不变。
/// 非循环且没有截止时间的声明在首次发射时一次性发射。
pub fn pps_diff(decl: &ParticleFx, looped: bool, time0: u64, time1: u64) -> u64 {
    if time1 <= time0 {
        return 0;
    }

    let preferred = decl.preferred_time();
    if preferred == 0 && time0 == 0 && !looped {
        return (decl.pps_value * 1000.0) as u64;
    }

    let (time0, time1) = if looped {
        (time0, time1)
    } else {
        (time0.min(preferred), time1.min(preferred))
    };

    let pps = decl.pps_scale_at(time1) * decl.pps_value;
    let emitted0 = (pps * time0 as f32 / 1000.0) as u64;
    let emitted1 = (pps * time1 as f32 / 1000.0) as u64;
    emitted1.saturating_sub(emitted0)
}

/// 按发射形状采样局部位置（未缩放）
pub fn sample_shape(decl: &ParticleFx, emitter: &EmitterSlot, rng: &mut PfxRng) -> Vec3 {
    match decl.shp_type {
        EmitterShape::Point => Vec3::ZERO,
        EmitterShape::Line => Vec3::splat(rng.randf()),
        // 表面与体积目前使用同一分布
        EmitterShape::Box => {
            let x = rng.randf() * 2.0 - 1.0;
            let y = rng.randf() * 2.0 - 1.0;
            let z = rng.randf() * 2.0 - 1.0;
            Vec3::new(x, y, z) * 0.5
        }
        EmitterShape::Sphere => {
            let theta = TAU * rng.randf();
            let phi = (1.0 - 2.0 * rng.randf()).acos();
            let p = Vec3::new(phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos());
            if decl.shp_is_volume {
                p * rng.randf()
            } else {
                p
            }
        }
        EmitterShape::Circle => {
            let a = TAU * rng.randf();
            let p = Vec3::new(a.sin(), 0.0, a.cos());
            if decl.shp_is_volume {
                p * rng.randf().sqrt()
            } else {
                p
            }
        }
        EmitterShape::Mesh => {
            let (mesh, pose) = match &emitter.mesh {
                Some(mesh) => (Some(mesh), emitter.pose.as_deref()),
                None => (decl.shp_mesh.as_ref(), None),
            };
            match mesh {
                Some(mesh) => {
                    let pos = mesh.rand_coord(rng.randf(), pose) - emitter.pos;
                    emitter.to_basis(pos)
                }
                None => Vec3::ZERO,
            }
        }
    }
}

/// 按方向模式采样初速度方向（未归一化）
pub fn sample_direction(
    decl: &ParticleFx,
    emitter: &EmitterSlot,
    particle_pos: Vec3,
    rng: &mut PfxRng,
) -> Vec3 {
    match decl.dir_mode {
        DirMode::Rand => {
            let dy = 1.0 - 2.0 * rng.randf();
            let sn = (1.0 - dy * dy).sqrt();
            let theta = TAU * rng.randf();
            Vec3::new(sn * theta.cos(), dy, sn * theta.sin())
        }
        DirMode::Dir => {
            // 偏差达到半圈时圆锥退化，按无偏差处理
            let head_var = if decl.dir_angle_head_var >= 180.0 {
                0.0
            } else {
                decl.dir_angle_head_var
            };
            let elev_var = if decl.dir_angle_elev_var >= 180.0 {
                0.0
            } else {
                decl.dir_angle_elev_var
            };

            let head = (90.0 + rng.randf_var(decl.dir_angle_head, head_var)) * PI / 180.0;
            let elev = rng.randf_var(decl.dir_angle_elev, elev_var) * PI / 180.0;
            let dir = Vec3::new(elev.cos() * head.cos(), elev.sin(), elev.cos() * head.sin());

            if decl.dir_for.is_local() {
                emitter.to_basis(dir)
            } else {
                dir
            }
        }
        DirMode::Target => {
            let target = match decl.dir_mode_target_for {
                Frame::World => decl.dir_mode_target_pos,
                Frame::Object | Frame::Node => match &emitter.target {
                    Some(t) => t.transform().transform_point3(emitter.pos),
                    None => emitter.pos,
                },
            };
            target - (emitter.pos + particle_pos)
        }
    }
}

/// 生成一个新粒子
///
/// 寿命取整后为 0 的粒子视为未生成，调用方不计数。
pub fn init_particle(
    decl: &ParticleFx,
    emitter: &EmitterSlot,
    time_total: u64,
    rng: &mut PfxRng,
) -> ParState {
    let life = rng.randf_var(decl.lsp_part_avg, decl.lsp_part_var) as u16;

    let mut pos = sample_shape(decl, emitter, rng);
    if !matches!(decl.shp_type, EmitterShape::Point | EmitterShape::Mesh) {
        pos *= decl.shp_dim * decl.shp_scale_at(time_total);
    }

    if decl.shp_for.is_local() {
        pos += emitter.to_basis(decl.shp_offset_vec);
    } else {
        pos += decl.shp_offset_vec;
    }

    let mut dir = sample_direction(decl, emitter, pos, rng);

    if !decl.use_emitters_for {
        pos += emitter.pos;
    }

    let len = dir.length();
    if len != 0.0 {
        let velocity = rng.randf_var(decl.vel_avg, decl.vel_var);
        dir = dir * velocity / len;
    }

    ParState {
        life,
        max_life: life,
        pos,
        dir,
    }
}
