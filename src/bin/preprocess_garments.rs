//! One-shot garment preprocessing: resizes every source shirt image to the
//! given body measurements and writes the results to the processed store.
//!
//! Usage: preprocess_garments <shoulder_width_cm> <torso_height_cm>

use anyhow::{Context, Result};
use std::path::Path;

use fitmirror::config::Config;
use fitmirror::garment::{preprocess_garments, BodyMeasurements};

const CONFIG_PATH: &str = "fitmirror.toml";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <shoulder_width_cm> <torso_height_cm>", args[0]);
        std::process::exit(2);
    }
    let shoulder: f32 = args[1].parse().context("shoulder_width_cm must be a number")?;
    let torso: f32 = args[2].parse().context("torso_height_cm must be a number")?;
    let measurements = BodyMeasurements::new(shoulder, torso)?;

    let config = Config::load_or_default(CONFIG_PATH);
    println!(
        "Resizing {} -> {} (shoulder {}cm, torso {}cm, {}px/cm x{})",
        config.garment.source_dir,
        config.garment.processed_dir,
        shoulder,
        torso,
        config.sizing.calibration_factor,
        config.sizing.size_reduction_factor,
    );

    let report = preprocess_garments(
        Path::new(&config.garment.source_dir),
        Path::new(&config.garment.processed_dir),
        measurements,
        config.sizing,
    )?;

    println!("Done: {} processed, {} skipped", report.processed, report.skipped);
    Ok(())
}
