//! 池化粒子特效系统
//!
//! 在 CPU 上模拟的公告板粒子与拖尾，每帧把整桶记录交给 GPU 绘制。
//!
//! ## 架构设计
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        PfxObjects                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  PfxBucket (每个声明一个)          TrlObjects              │
//! │   ├─ EmitterRegistry  句柄/状态机   └─ TrailBucket         │
//! │   ├─ ParticlePool     分块粒子数组      └─ Trail / Point   │
//! │   └─ FrameBuffers     每帧槽位缓冲区                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! 每帧顺序：`step(dt, view_pos)` → `build_render_buffers(view_dir)`
//! → `prepare_frame(slot, backend)`。模拟单线程同步执行，
//! 随机数从驱动持有的 `PfxRng` 取得。
//!
//! ## 使用示例
//!
//! ```
//! use glam::Vec3;
//! use pfx_engine::config::PfxConfig;
//! use pfx_engine::render::pfx::{ParticleFx, PfxObjects};
//! use std::sync::Arc;
//!
//! let config = PfxConfig {
//!     rng_seed: Some(7),
//!     ..Default::default()
//! };
//! let mut pfx = PfxObjects::new(config).unwrap();
//!
//! let decl = Arc::new(ParticleFx {
//!     pps_value: 10.0,
//!     lsp_part_avg: 1000.0,
//!     ..Default::default()
//! });
//! let fire = pfx.create_emitter(&decl, Vec3::ZERO);
//! pfx.set_looped(&fire, true);
//! pfx.set_active(&fire, true);
//!
//! pfx.step(500, Vec3::ZERO);
//! pfx.build_render_buffers(Vec3::Z);
//! assert_eq!(pfx.stats().live_particles, 5);
//! ```

pub mod bucket;
pub mod declaration;
pub mod emission;
pub mod emitter;
pub mod gpu;
pub mod mesh;
pub mod objects;
pub mod pool;
pub mod rng;
pub mod state;
pub mod trail;


pub use bucket::{PfxBucket, SpawnRequest};
pub use declaration::{
    AlphaFunc, DirMode, EmitterShape, Frame, KeyCurve, Orientation, ParticleFx,
};
pub use emitter::{EmitterHandle, EmitterSlot, EmitterState};
pub use gpu::{BufferId, FrameBuffers, GpuBackend, WgpuBackend, MAX_FRAMES_IN_FLIGHT};
pub use mesh::{MeshSampler, Pose, StaticTarget, TargetTransform};
pub use objects::{DrawItem, DrawKind, Material, PfxObjects, PfxStats};
pub use pool::{Block, ParState, ParticlePool};
pub use rng::PfxRng;
pub use state::{pack_color, unpack_color, PfxFlags, PfxState};
pub use trail::{
    Point, Trail, TrailBucket, TrailHandle, TrailState, TrailVertex, TrlObjects,
};
