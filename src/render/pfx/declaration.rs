//! 粒子特效声明
//!
//! `ParticleFx` 是由资源层构造、只读共享的特效参数集合。
//! 粒子系统按声明分桶（`Arc::ptr_eq` 判等），从不修改声明本身。
//!
//! 单位约定：时间为毫秒，角度为度，颜色通道为 0-255，透明度为 0-1。

use super::mesh::MeshSampler;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 发射形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmitterShape {
    /// 点发射
    #[default]
    Point,
    /// 线段发射
    Line,
    /// 盒子发射
    Box,
    /// 球形发射
    Sphere,
    /// 圆形发射（XZ 平面）
    Circle,
    /// 网格表面发射
    Mesh,
}

/// 参考坐标系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Frame {
    /// 对象局部坐标
    #[default]
    Object,
    /// 节点局部坐标
    Node,
    /// 世界坐标
    World,
}

impl Frame {
    /// 是否需要经过发射器朝向基变换
    pub fn is_local(self) -> bool {
        matches!(self, Frame::Object | Frame::Node)
    }
}

/// 初速度方向模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirMode {
    /// 单位球面随机方向
    #[default]
    Rand,
    /// 固定朝向（方位角/仰角）加随机偏差
    Dir,
    /// 指向目标点
    Target,
}

/// 混合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlphaFunc {
    /// 不混合
    None,
    /// 透明混合
    #[default]
    Transparent,
    /// 加法光照（RGB 预乘透明度）
    AdditiveLight,
    /// 正片叠底
    Multiply,
}

/// 公告板朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum Orientation {
    /// 始终面向相机
    #[default]
    None = 0,
    /// 沿速度方向
    Velocity = 1,
    /// 沿速度方向（三维）
    Velocity3d = 2,
}

/// 关键帧缩放曲线
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyCurve {
    /// 关键帧
    #[serde(default)]
    pub keys: Vec<f32>,
    /// 每秒关键帧数
    #[serde(default)]
    pub fps: f32,
    /// 关键帧之间线性插值
    #[serde(default)]
    pub smooth: bool,
    /// 循环播放
    #[serde(default)]
    pub looping: bool,
}

impl KeyCurve {
    pub fn new(keys: Vec<f32>, fps: f32) -> Self {
        Self {
            keys,
            fps,
            smooth: false,
            looping: false,
        }
    }

    /// 在 `time`（毫秒）处采样，没有关键帧时返回 1
    pub fn eval(&self, time: u64) -> f32 {
        if self.keys.is_empty() {
            return 1.0;
        }

        let scaled = (self.fps * time as f32) as u64;
        let at = (scaled / 1000) as usize;
        let alpha = (scaled % 1000) as f32 / 1000.0;
        let len = self.keys.len();

        let (a, b) = if self.looping {
            (at % len, (at + 1) % len)
        } else {
            (at.min(len - 1), (at + 1).min(len - 1))
        };

        if self.smooth {
            self.keys[a] * (1.0 - alpha) + self.keys[b] * alpha
        } else {
            self.keys[a]
        }
    }

    /// 曲线最大值，没有关键帧时为 1
    pub fn max_value(&self) -> f32 {
        self.keys.iter().copied().reduce(f32::max).unwrap_or(1.0)
    }
}

/// 粒子特效声明
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFx {
    /// 每秒发射数
    pub pps_value: f32,
    /// 发射率随时间缩放
    pub pps_scale: KeyCurve,
    /// 激活结束后自动生成的后续特效
    #[serde(skip)]
    pub pps_create_em: Option<Arc<ParticleFx>>,
    /// 后续特效的延迟（毫秒）
    pub pps_create_em_delay: u64,

    /// 粒子寿命平均值（毫秒）
    pub lsp_part_avg: f32,
    /// 粒子寿命偏差（毫秒）
    pub lsp_part_var: f32,

    /// 发射形状
    pub shp_type: EmitterShape,
    /// 填充体积而非表面
    pub shp_is_volume: bool,
    /// 形状尺寸
    pub shp_dim: Vec3,
    /// 形状尺寸随时间缩放
    pub shp_scale: KeyCurve,
    /// 形状偏移
    pub shp_offset_vec: Vec3,
    /// 形状偏移的参考坐标系
    pub shp_for: Frame,
    /// 默认发射网格
    #[serde(skip)]
    pub shp_mesh: Option<Arc<dyn MeshSampler>>,

    /// 方向模式
    pub dir_mode: DirMode,
    /// 方向的参考坐标系
    pub dir_for: Frame,
    /// 方位角（度）
    pub dir_angle_head: f32,
    /// 方位角偏差（度）
    pub dir_angle_head_var: f32,
    /// 仰角（度）
    pub dir_angle_elev: f32,
    /// 仰角偏差（度）
    pub dir_angle_elev_var: f32,
    /// 目标点的参考坐标系
    pub dir_mode_target_for: Frame,
    /// 世界坐标目标点
    pub dir_mode_target_pos: Vec3,

    /// 初速度平均值（单位/毫秒）
    pub vel_avg: f32,
    /// 初速度偏差
    pub vel_var: f32,
    /// 恒定加速度（单位/毫秒²）
    pub fly_gravity: Vec3,
    /// 粒子坐标相对发射器
    pub use_emitters_for: bool,

    /// 起始颜色
    pub vis_tex_color_start: Vec3,
    /// 结束颜色
    pub vis_tex_color_end: Vec3,
    /// 起始尺寸
    pub vis_size_start: Vec2,
    /// 结束尺寸缩放
    pub vis_size_end_scale: f32,
    /// 起始透明度
    pub vis_alpha_start: f32,
    /// 结束透明度
    pub vis_alpha_end: f32,
    /// 混合方式
    pub vis_alpha_func: AlphaFunc,
    /// 公告板朝向
    pub vis_orientation: Orientation,
    /// 四边形（否则三角形）
    pub vis_tex_is_quad_poly: bool,
    /// 深度偏移
    pub vis_z_bias: bool,
    /// 锁定偏航
    pub vis_yaw_align: bool,
    /// 贴花式特效
    pub vis_decal: bool,
    /// 粒子纹理
    pub vis_texture: Option<String>,

    /// 拖尾淡出时长（秒）
    pub trl_fade_speed: f32,
    /// 拖尾宽度
    pub trl_width: f32,
    /// 拖尾纹理
    pub trl_texture: Option<String>,
}

impl Default for ParticleFx {
    fn default() -> Self {
        Self {
            pps_value: 0.0,
            pps_scale: KeyCurve::default(),
            pps_create_em: None,
            pps_create_em_delay: 0,
            lsp_part_avg: 1000.0,
            lsp_part_var: 0.0,
            shp_type: EmitterShape::Point,
            shp_is_volume: false,
            shp_dim: Vec3::ZERO,
            shp_scale: KeyCurve::default(),
            shp_offset_vec: Vec3::ZERO,
            shp_for: Frame::World,
            shp_mesh: None,
            dir_mode: DirMode::Rand,
            dir_for: Frame::World,
            dir_angle_head: 0.0,
            dir_angle_head_var: 0.0,
            dir_angle_elev: 0.0,
            dir_angle_elev_var: 0.0,
            dir_mode_target_for: Frame::World,
            dir_mode_target_pos: Vec3::ZERO,
            vel_avg: 0.0,
            vel_var: 0.0,
            fly_gravity: Vec3::ZERO,
            use_emitters_for: false,
            vis_tex_color_start: Vec3::splat(255.0),
            vis_tex_color_end: Vec3::splat(255.0),
            vis_size_start: Vec2::ONE,
            vis_size_end_scale: 1.0,
            vis_alpha_start: 1.0,
            vis_alpha_end: 1.0,
            vis_alpha_func: AlphaFunc::Transparent,
            vis_orientation: Orientation::None,
            vis_tex_is_quad_poly: true,
            vis_z_bias: false,
            vis_yaw_align: false,
            vis_decal: false,
            vis_texture: None,
            trl_fade_speed: 0.0,
            trl_width: 0.0,
            trl_texture: None,
        }
    }
}

impl ParticleFx {
    /// 粒子最长寿命（毫秒）
    pub fn max_lifetime(&self) -> u64 {
        (self.lsp_part_avg + self.lsp_part_var).max(0.0) as u64
    }

    /// 最大每秒发射数
    pub fn max_pps(&self) -> f32 {
        self.pps_value * self.pps_scale.max_value()
    }

    /// 非循环发射的截止时间（毫秒），0 表示没有
    pub fn preferred_time(&self) -> u64 {
        let curve = &self.pps_scale;
        if curve.looping || curve.keys.is_empty() || curve.fps <= 0.0 {
            return 0;
        }
        (curve.keys.len() as f32 * 1000.0 / curve.fps) as u64
    }

    /// 在 `time` 处的发射率缩放
    pub fn pps_scale_at(&self, time: u64) -> f32 {
        self.pps_scale.eval(time)
    }

    /// 在 `time` 处的形状尺寸缩放
    pub fn shp_scale_at(&self, time: u64) -> f32 {
        self.shp_scale.eval(time)
    }

    pub fn is_decal(&self) -> bool {
        self.vis_decal
    }

    /// 是否带有可用的拖尾参数
    pub fn has_trail(&self) -> bool {
        self.trl_texture.is_some() && self.trl_width > 0.0 && self.trl_fade_speed > 0.0
    }

    /// 每个粒子的几何顶点数
    pub fn vertex_count(&self) -> usize {
        if self.vis_tex_is_quad_poly {
            6
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_curve_is_identity() {
        let curve = KeyCurve::default();
        assert_eq!(curve.eval(0), 1.0);
        assert_eq!(curve.eval(123_456), 1.0);
        assert_eq!(curve.max_value(), 1.0);
    }

    #[test]
    fn test_curve_clamps_without_loop() {
        let curve = KeyCurve::new(vec![1.0, 2.0, 3.0], 1.0);
        assert_eq!(curve.eval(0), 1.0);
        assert_eq!(curve.eval(1000), 2.0);
        assert_eq!(curve.eval(10_000), 3.0);
    }

    #[test]
    fn test_curve_wraps_when_looping() {
        let mut curve = KeyCurve::new(vec![1.0, 2.0], 1.0);
        curve.looping = true;
        assert_eq!(curve.eval(2000), 1.0);
        assert_eq!(curve.eval(3000), 2.0);
    }

    #[test]
    fn test_curve_smooth_interpolation() {
        let mut curve = KeyCurve::new(vec![0.0, 10.0], 1.0);
        curve.smooth = true;
        assert!((curve.eval(500) - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_preferred_time() {
        let mut decl = ParticleFx::default();
        assert_eq!(decl.preferred_time(), 0);

        decl.pps_scale = KeyCurve::new(vec![1.0, 1.0, 1.0, 1.0], 2.0);
        assert_eq!(decl.preferred_time(), 2000);

        decl.pps_scale.looping = true;
        assert_eq!(decl.preferred_time(), 0);
    }

    #[test]
    fn test_max_values() {
        let decl = ParticleFx {
            pps_value: 10.0,
            pps_scale: KeyCurve::new(vec![0.5, 3.0, 1.0], 1.0),
            lsp_part_avg: 800.0,
            lsp_part_var: 200.0,
            ..Default::default()
        };
        assert_eq!(decl.max_pps(), 30.0);
        assert_eq!(decl.max_lifetime(), 1000);
    }

    #[test]
    fn test_has_trail_requires_all_parameters() {
        let mut decl = ParticleFx {
            trl_texture: Some("trail.tga".to_string()),
            trl_width: 1.0,
            trl_fade_speed: 0.5,
            ..Default::default()
        };
        assert!(decl.has_trail());
        decl.trl_width = 0.0;
        assert!(!decl.has_trail());
    }

    #[test]
    fn test_json_declaration() {
        let json = r#"{
            "pps_value": 25.0,
            "shp_type": "Sphere",
            "shp_dim": [2.0, 2.0, 2.0],
            "vis_alpha_func": "AdditiveLight"
        }"#;
        let decl: ParticleFx = serde_json::from_str(json).unwrap();
        assert_eq!(decl.pps_value, 25.0);
        assert_eq!(decl.shp_type, EmitterShape::Sphere);
        assert_eq!(decl.shp_dim, Vec3::splat(2.0));
        assert_eq!(decl.vis_alpha_func, AlphaFunc::AdditiveLight);
        assert_eq!(decl.lsp_part_avg, 1000.0);
        assert!(decl.pps_create_em.is_none());
    }
}
