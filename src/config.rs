use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub garment: GarmentConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub pose: PoseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// 待ち受けアドレス
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// カメラデバイス番号
    #[serde(default)]
    pub index: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// 作業解像度の幅
    #[serde(default = "default_stream_width")]
    pub width: i32,
    /// 作業解像度の高さ
    #[serde(default = "default_stream_height")]
    pub height: i32,
    /// JPEG品質 (0〜100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GarmentConfig {
    /// 元画像ディレクトリ
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    /// 処理済み画像ディレクトリ
    #[serde(default = "default_processed_dir")]
    pub processed_dir: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SizingConfig {
    /// 較正係数 (ピクセル/cm)
    #[serde(default = "default_calibration_factor")]
    pub calibration_factor: f32,
    /// 縮小係数 (0 < f <= 1)
    #[serde(default = "default_size_reduction_factor")]
    pub size_reduction_factor: f32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PlacementConfig {
    /// 衣服上端を肩中心からどれだけ上げるかの比率 (衣服高さに対する割合)。
    /// 首元の位置を経験的に近似する値で、導出式はない。
    #[serde(default = "default_neckline_ratio")]
    pub neckline_ratio: f32,
    /// 位置調整1回あたりの移動量 (ピクセル)
    #[serde(default = "default_nudge_step")]
    pub nudge_step: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// MoveNet ONNXモデルのパス
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// 肩キーポイントの信頼度閾値。下回るティックは「姿勢なし」
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_stream_width() -> i32 {
    960
}
fn default_stream_height() -> i32 {
    720
}
fn default_jpeg_quality() -> i32 {
    80
}
fn default_source_dir() -> String {
    "shirts".to_string()
}
fn default_processed_dir() -> String {
    "processed_shirts".to_string()
}
fn default_calibration_factor() -> f32 {
    9.0
}
fn default_size_reduction_factor() -> f32 {
    0.75
}
fn default_neckline_ratio() -> f32 {
    0.6
}
fn default_nudge_step() -> i32 {
    10
}
fn default_model_path() -> String {
    "models/movenet_lightning.onnx".to_string()
}
fn default_min_confidence() -> f32 {
    0.3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0 }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: default_stream_width(),
            height: default_stream_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for GarmentConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            processed_dir: default_processed_dir(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            calibration_factor: default_calibration_factor(),
            size_reduction_factor: default_size_reduction_factor(),
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            neckline_ratio: default_neckline_ratio(),
            nudge_step: default_nudge_step(),
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルがなければデフォルト値を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(_) => {
                eprintln!(
                    "Config {} not found, using defaults",
                    path.as_ref().display()
                );
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stream.width, 960);
        assert_eq!(config.stream.height, 720);
        assert_eq!(config.sizing.calibration_factor, 9.0);
        assert_eq!(config.sizing.size_reduction_factor, 0.75);
        assert_eq!(config.placement.neckline_ratio, 0.6);
        assert_eq!(config.placement.nudge_step, 10);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [garment]
            source_dir = "my_shirts"

            [stream]
            jpeg_quality = 95
            "#,
        )
        .unwrap();
        assert_eq!(config.garment.source_dir, "my_shirts");
        assert_eq!(config.garment.processed_dir, "processed_shirts");
        assert_eq!(config.stream.jpeg_quality, 95);
        assert_eq!(config.stream.width, 960);
    }
}
