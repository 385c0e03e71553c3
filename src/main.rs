//! 无窗口演示：运行固定帧数并输出统计

use glam::{Vec2, Vec3};
use pfx_engine::config::{init_logging, PfxConfig};
use pfx_engine::render::pfx::{
    AlphaFunc, DirMode, EmitterShape, KeyCurve, ParticleFx, PfxObjects,
};
use std::sync::Arc;

const FRAMES: u64 = 240;
const FRAME_MS: u64 = 16;

fn sparks() -> Arc<ParticleFx> {
    let smoke = Arc::new(ParticleFx {
        pps_value: 20.0,
        pps_scale: KeyCurve::new(vec![1.0, 0.5, 0.25], 2.0),
        lsp_part_avg: 1500.0,
        lsp_part_var: 300.0,
        shp_type: EmitterShape::Sphere,
        shp_is_volume: true,
        shp_dim: Vec3::splat(20.0),
        vel_avg: 0.02,
        vis_size_start: Vec2::splat(40.0),
        vis_size_end_scale: 3.0,
        vis_alpha_end: 0.0,
        ..Default::default()
    });

    Arc::new(ParticleFx {
        pps_value: 60.0,
        pps_create_em: Some(smoke),
        pps_create_em_delay: 1000,
        lsp_part_avg: 800.0,
        lsp_part_var: 200.0,
        shp_type: EmitterShape::Circle,
        shp_dim: Vec3::splat(10.0),
        dir_mode: DirMode::Dir,
        dir_angle_elev: 80.0,
        dir_angle_elev_var: 10.0,
        dir_angle_head_var: 180.0,
        vel_avg: 0.3,
        vel_var: 0.1,
        fly_gravity: Vec3::new(0.0, -0.0005, 0.0),
        vis_tex_color_start: Vec3::new(255.0, 200.0, 80.0),
        vis_tex_color_end: Vec3::new(255.0, 40.0, 0.0),
        vis_alpha_func: AlphaFunc::AdditiveLight,
        vis_texture: Some("spark.tga".to_string()),
        trl_texture: Some("trail.tga".to_string()),
        trl_width: 2.0,
        trl_fade_speed: 0.5,
        ..Default::default()
    })
}

fn main() {
    let config = PfxConfig::load_or_default();
    init_logging(&config.logging);

    let mut pfx = match PfxObjects::new(config) {
        Ok(pfx) => pfx,
        Err(e) => {
            eprintln!("Particle system failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let decl = sparks();
    let emitter = pfx.create_emitter(&decl, Vec3::ZERO);
    pfx.set_looped(&emitter, true);
    pfx.set_active(&emitter, true);
    let trail = pfx.create_trail(&decl);

    let view_pos = Vec3::new(0.0, 100.0, -500.0);
    let view_dir = (Vec3::ZERO - view_pos).normalize();

    for frame in 0..FRAMES {
        let t = (frame * FRAME_MS) as f32 / 1000.0;
        let pos = Vec3::new(t.cos() * 100.0, 0.0, t.sin() * 100.0);
        pfx.set_position(&emitter, pos);
        if let Some(trail) = &trail {
            pfx.set_trail_position(trail, pos);
        }

        pfx.step(FRAME_MS, view_pos);
        pfx.build_render_buffers(view_dir);

        if frame % 60 == 0 {
            tracing::info!(target: "pfx", "frame {}: {:?}", frame, pfx.stats());
        }
    }

    pfx.destroy(emitter);
    if let Some(trail) = trail {
        pfx.destroy_trail(trail);
    }
    for _ in 0..200 {
        pfx.step(FRAME_MS, view_pos);
    }
    tracing::info!(target: "pfx", "after shutdown: {:?}", pfx.stats());
}
