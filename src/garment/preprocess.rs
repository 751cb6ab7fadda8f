use anyhow::{Context, Result};
use opencv::{
    core::{Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::fs;
use std::path::Path;

use crate::config::SizingConfig;

/// 利用者の身体採寸値 (cm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyMeasurements {
    pub shoulder_width_cm: f32,
    pub torso_height_cm: f32,
}

impl BodyMeasurements {
    /// 採寸値を検証して生成する。どちらも正でなければエラー。
    pub fn new(shoulder_width_cm: f32, torso_height_cm: f32) -> Result<Self> {
        if !(shoulder_width_cm > 0.0) || !(torso_height_cm > 0.0) {
            anyhow::bail!(
                "body measurements must be positive: shoulder={shoulder_width_cm}, torso={torso_height_cm}"
            );
        }
        Ok(Self {
            shoulder_width_cm,
            torso_height_cm,
        })
    }
}

/// 一括リサイズの結果。全ファイルを試行し終えてから返る。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessReport {
    pub processed: usize,
    pub skipped: usize,
}

/// 衣服画像として扱う拡張子か
pub(crate) fn is_garment_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".png") || lower.ends_with(".jpg")
}

/// 採寸値に基づいて元画像ディレクトリの全衣服をリサイズし、
/// 処理済みディレクトリへ同名で書き出す (既存ファイルは上書き)。
///
/// 出力幅は `round(肩幅cm × 較正係数 × 縮小係数)`。高さは元画像ごとの
/// アスペクト比を保存する。読めないファイルは警告してスキップし、
/// 残りの処理を続行する。
pub fn preprocess_garments(
    source_dir: &Path,
    processed_dir: &Path,
    measurements: BodyMeasurements,
    sizing: SizingConfig,
) -> Result<PreprocessReport> {
    let target_width =
        measurements.shoulder_width_cm * sizing.calibration_factor * sizing.size_reduction_factor;

    fs::create_dir_all(processed_dir)
        .with_context(|| format!("failed to create {}", processed_dir.display()))?;

    let mut names: Vec<String> = fs::read_dir(source_dir)
        .with_context(|| format!("failed to read {}", source_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_garment_file(name))
        .collect();
    names.sort();

    let mut report = PreprocessReport::default();
    for name in &names {
        let source_path = source_dir.join(name);
        match resize_garment(&source_path, target_width) {
            Ok(resized) => {
                let processed_path = processed_dir.join(name);
                let written = imgcodecs::imwrite(
                    &processed_path.to_string_lossy(),
                    &resized,
                    &Vector::<i32>::new(),
                )
                .unwrap_or(false);
                if written {
                    report.processed += 1;
                } else {
                    eprintln!("[garment] failed to write {}, skipping", processed_path.display());
                    report.skipped += 1;
                }
            }
            Err(e) => {
                eprintln!("[garment] skipping {}: {e:#}", source_path.display());
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

/// 1枚をターゲット幅へ縮小する。アルファチャンネルは保存される。
fn resize_garment(path: &Path, target_width: f32) -> Result<opencv::core::Mat> {
    let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_UNCHANGED)
        .ok()
        .filter(|m| !m.empty())
        .context("unreadable image")?;

    let aspect = image.rows() as f32 / image.cols() as f32;
    let width = target_width.round() as i32;
    let height = (target_width * aspect).round() as i32;
    if width < 1 || height < 1 {
        anyhow::bail!("degenerate target size {width}x{height}");
    }

    let mut resized = opencv::core::Mat::default();
    imgproc::resize(
        &image,
        &mut resized,
        Size::new(width, height),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;
    Ok(resized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Mat, Scalar, CV_8UC3, CV_8UC4};
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, rows: i32, cols: i32, channels: i32) {
        let typ = if channels == 4 { CV_8UC4 } else { CV_8UC3 };
        let mat =
            Mat::new_rows_cols_with_default(rows, cols, typ, Scalar::new(10.0, 20.0, 30.0, 255.0))
                .unwrap();
        let path = dir.join(name);
        assert!(imgcodecs::imwrite(&path.to_string_lossy(), &mat, &Vector::<i32>::new()).unwrap());
    }

    fn read_size(path: &Path) -> (i32, i32) {
        let mat =
            imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_UNCHANGED).unwrap();
        (mat.cols(), mat.rows())
    }

    #[test]
    fn test_measurements_must_be_positive() {
        assert!(BodyMeasurements::new(45.0, 60.0).is_ok());
        assert!(BodyMeasurements::new(0.0, 60.0).is_err());
        assert!(BodyMeasurements::new(45.0, -1.0).is_err());
    }

    #[test]
    fn test_target_width_follows_measurements() {
        // 肩幅45cm, 較正9px/cm, 縮小0.75 → 幅304px、400x600の元画像 → 304x456
        let source = TempDir::new().unwrap();
        let processed = TempDir::new().unwrap();
        write_image(source.path(), "shirt.png", 600, 400, 4);

        let report = preprocess_garments(
            source.path(),
            processed.path(),
            BodyMeasurements::new(45.0, 60.0).unwrap(),
            SizingConfig::default(),
        )
        .unwrap();

        assert_eq!(report, PreprocessReport { processed: 1, skipped: 0 });
        assert_eq!(read_size(&processed.path().join("shirt.png")), (304, 456));
    }

    #[test]
    fn test_aspect_ratio_preserved_per_image() {
        let source = TempDir::new().unwrap();
        let processed = TempDir::new().unwrap();
        write_image(source.path(), "wide.png", 200, 400, 4);
        write_image(source.path(), "tall.jpg", 900, 300, 3);

        preprocess_garments(
            source.path(),
            processed.path(),
            BodyMeasurements::new(40.0, 55.0).unwrap(),
            SizingConfig::default(),
        )
        .unwrap();

        // 幅 = round(40 * 9 * 0.75) = 270、高さは各画像のアスペクト比から
        assert_eq!(read_size(&processed.path().join("wide.png")), (270, 135));
        assert_eq!(read_size(&processed.path().join("tall.jpg")), (270, 810));
    }

    #[test]
    fn test_unreadable_source_is_skipped() {
        let source = TempDir::new().unwrap();
        let processed = TempDir::new().unwrap();
        write_image(source.path(), "good.png", 300, 300, 4);
        fs::write(source.path().join("broken.png"), b"not an image").unwrap();

        let report = preprocess_garments(
            source.path(),
            processed.path(),
            BodyMeasurements::new(45.0, 60.0).unwrap(),
            SizingConfig::default(),
        )
        .unwrap();

        assert_eq!(report, PreprocessReport { processed: 1, skipped: 1 });
        assert!(processed.path().join("good.png").exists());
        assert!(!processed.path().join("broken.png").exists());
    }

    #[test]
    fn test_existing_processed_files_are_kept() {
        let source = TempDir::new().unwrap();
        let processed = TempDir::new().unwrap();
        write_image(source.path(), "current.png", 300, 300, 4);
        write_image(processed.path(), "stale.png", 50, 50, 4);

        preprocess_garments(
            source.path(),
            processed.path(),
            BodyMeasurements::new(45.0, 60.0).unwrap(),
            SizingConfig::default(),
        )
        .unwrap();

        // 今回の元画像セットにないファイルは削除されない
        assert!(processed.path().join("stale.png").exists());
        assert!(processed.path().join("current.png").exists());
    }
}
