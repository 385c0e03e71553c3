//! # Pfx Engine
//!
//! Pooled CPU particle effects and trails for a real-time renderer.
//!
//! ## Features
//!
//! - **Block Pool**: per-declaration particle storage split into fixed-size blocks, reused free-slot-first
//! - **Emitter Handles**: index + generation handles with an explicit `Free → Inactive → Active → Fade` lifecycle
//! - **Emission Shapes**: point, line, box, sphere, circle and mesh surfaces with random, fixed and targeted directions
//! - **Trails**: age-faded point strips with colinear point merging
//! - **GPU Hand-off**: per-frame-slot buffers behind a `GpuBackend` trait, with a `wgpu` implementation
//!
//! ## Frame Loop
//!
//! ```ignore
//! pfx.step(dt_ms, camera_pos);
//! pfx.build_render_buffers(camera_dir);
//! pfx.prepare_frame(frame_slot, &mut backend)?;
//! for item in pfx.draw_items(frame_slot) {
//!     // one draw per bucket
//! }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Error types and helper macros
//! - [`config`]: Configuration loading and logging setup
//! - [`render`]: Particle and trail simulation with GPU buffer preparation

/// Error types and helper macros
pub mod core;
/// Configuration system
pub mod config;
/// Particle effects and trails
pub mod render;

pub use crate::config::PfxConfig;
pub use crate::core::{PfxError, PfxResult};
