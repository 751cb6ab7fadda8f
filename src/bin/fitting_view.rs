//! Local try-on preview without the HTTP layer: camera to minifb window.
//!
//! Keys: N/P cycle shirts, W/A/S/D nudge position, Escape quits.
//! Requires the `desktop` feature.

use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};

use fitmirror::camera::OpenCvCamera;
use fitmirror::config::Config;
use fitmirror::garment::GarmentCatalog;
use fitmirror::overlay::{composite, compute_anchor, Direction, PositionOffset};
use fitmirror::pose::{PoseDetector, TorsoLandmarks};
use fitmirror::render::{Key, MinifbRenderer};

const CONFIG_PATH: &str = "fitmirror.toml";

fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);
    let width = config.stream.width;
    let height = config.stream.height;

    let mut catalog = GarmentCatalog::open(&config.garment.processed_dir)
        .context("cannot preview without a loadable garment catalog")?;
    println!("{} garments, active: {}", catalog.len(), catalog.active_file());

    let mut camera = OpenCvCamera::open(config.camera.index)?;
    let mut detector = PoseDetector::new(&config.pose.model_path)?;
    let offset = PositionOffset::default();
    let mut renderer = MinifbRenderer::new("fitmirror", width as usize, height as usize)?;

    while renderer.is_open() {
        if renderer.is_key_pressed(Key::N) {
            let index = catalog.advance()?;
            println!("shirt {}: {}", index, catalog.active_file());
        }
        if renderer.is_key_pressed(Key::P) {
            let index = catalog.retreat()?;
            println!("shirt {}: {}", index, catalog.active_file());
        }
        for (key, direction) in [
            (Key::W, Direction::Up),
            (Key::S, Direction::Down),
            (Key::A, Direction::Left),
            (Key::D, Direction::Right),
        ] {
            if renderer.is_key_pressed(key) {
                let values = offset.nudge(direction, config.placement.nudge_step);
                println!("offset: v={} h={}", values.vertical, values.horizontal);
            }
        }

        let captured = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("capture stopped: {e:#}");
                break;
            }
        };
        let mut frame = Mat::default();
        imgproc::resize(
            &captured,
            &mut frame,
            Size::new(width, height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let torso = match detector.detect(&frame) {
            Ok(pose) => TorsoLandmarks::from_pose(
                &pose,
                width as u32,
                height as u32,
                config.pose.min_confidence,
            ),
            Err(e) => {
                eprintln!("pose detection failed: {e:#}");
                None
            }
        };

        let output = match torso {
            Some(torso) => {
                let garment = catalog.active();
                let anchor = compute_anchor(
                    torso.left_shoulder,
                    torso.right_shoulder,
                    garment.cols(),
                    garment.rows(),
                    offset.get(),
                    config.placement.neckline_ratio,
                );
                match composite(&frame, &garment, anchor) {
                    Ok(blended) => blended,
                    Err(e) => {
                        eprintln!("composite failed: {e:#}");
                        frame
                    }
                }
            }
            None => frame,
        };

        renderer.draw_frame(&output)?;
    }

    Ok(())
}
