use anyhow::{Context, Result};
use bytes::Bytes;
use opencv::{
    core::{Mat, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::camera::OpenCvCamera;
use crate::config::Config;
use crate::garment::GarmentCatalog;
use crate::overlay::{composite, compute_anchor, PositionOffset};
use crate::pose::{PoseDetector, TorsoLandmarks};

/// multipart ストリームの境界文字列
pub const MULTIPART_BOUNDARY: &str = "frame";

/// ストリーミングレスポンスの Content-Type
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 全接続・全リクエストで共有する試着状態。
///
/// カタログ (カーソルとアクティブ衣服) とオフセットだけが接続を
/// またいで共有され、カメラハンドルとループは接続ごとに独立。
/// ティック途中の変更は現在のティックか次のティックで反映される
/// (結果整合で十分)。
pub struct SharedTryOn {
    pub catalog: Mutex<GarmentCatalog>,
    pub offset: PositionOffset,
}

impl SharedTryOn {
    pub fn new(catalog: GarmentCatalog, offset: PositionOffset) -> Arc<Self> {
        Arc::new(Self {
            catalog: Mutex::new(catalog),
            offset,
        })
    }
}

/// ストリーミングループのチューニング値
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// 作業解像度の幅
    pub width: i32,
    /// 作業解像度の高さ
    pub height: i32,
    /// JPEG品質
    pub jpeg_quality: i32,
    /// 配置の首元比率
    pub neckline_ratio: f32,
    /// 肩キーポイントの信頼度閾値
    pub min_confidence: f32,
}

impl From<&Config> for StreamSettings {
    fn from(config: &Config) -> Self {
        Self {
            width: config.stream.width,
            height: config.stream.height,
            jpeg_quality: config.stream.jpeg_quality,
            neckline_ratio: config.placement.neckline_ratio,
            min_confidence: config.pose.min_confidence,
        }
    }
}

/// 1クライアント接続分のオーバーレイストリーム。
///
/// キャプチャ → 姿勢検出 → 配置 → 合成 → エンコード → 送出、を
/// キャンセルされるかキャプチャデバイスが失敗するまで繰り返す。
/// ペース調整はブロッキングなキャプチャ呼び出しそのもの。
pub struct OverlayStream {
    camera: OpenCvCamera,
    detector: PoseDetector,
    shared: Arc<SharedTryOn>,
    settings: StreamSettings,
    cancel: CancellationToken,
}

impl OverlayStream {
    pub fn new(
        camera: OpenCvCamera,
        detector: PoseDetector,
        shared: Arc<SharedTryOn>,
        settings: StreamSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            camera,
            detector,
            shared,
            settings,
            cancel,
        }
    }

    /// 次の multipart チャンクを生成する。
    ///
    /// None は終端: キャンセル要求、またはキャプチャデバイスの失敗。
    /// drop 時にカメラハンドルは解放される。
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            // CAPTURING: ブロッキング読み込み + 作業解像度へリサイズ
            let captured = match self.camera.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    eprintln!("[stream] capture stopped: {e:#}");
                    return None;
                }
            };
            let mut frame = Mat::default();
            if let Err(e) = imgproc::resize(
                &captured,
                &mut frame,
                Size::new(self.settings.width, self.settings.height),
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            ) {
                eprintln!("[stream] frame resize failed: {e}");
                return None;
            }

            // DETECTING: 推論の失敗は「姿勢なし」として劣化継続
            let torso = match self.detector.detect(&frame) {
                Ok(pose) => TorsoLandmarks::from_pose(
                    &pose,
                    self.settings.width as u32,
                    self.settings.height as u32,
                    self.settings.min_confidence,
                ),
                Err(e) => {
                    eprintln!("[stream] pose detection failed: {e:#}");
                    None
                }
            };

            // PLACING + COMPOSITING: 姿勢なしのティックはフレームを素通し
            let output = match torso {
                Some(torso) => {
                    let garment = self.shared.catalog.lock().unwrap().active();
                    let offset = self.shared.offset.get();
                    let anchor = compute_anchor(
                        torso.left_shoulder,
                        torso.right_shoulder,
                        garment.cols(),
                        garment.rows(),
                        offset,
                        self.settings.neckline_ratio,
                    );
                    match composite(&frame, &garment, anchor) {
                        Ok(blended) => blended,
                        Err(e) => {
                            eprintln!("[stream] composite failed, passing frame through: {e:#}");
                            frame
                        }
                    }
                }
                None => frame,
            };

            // ENCODING: 失敗したティックは飛ばして次のキャプチャへ
            match jpeg_encode(&output, self.settings.jpeg_quality) {
                Ok(jpeg) => return Some(multipart_chunk(&jpeg)),
                Err(e) => {
                    eprintln!("[stream] jpeg encode failed, dropping tick: {e:#}");
                }
            }
        }
    }
}

/// フレームをJPEGへエンコードする
pub fn jpeg_encode(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf: Vector<u8> = Vector::new();

    // imencode は BGR 8UC3 を要求するので BGRA は変換する
    let mat = if frame.channels() == 4 {
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(frame, &mut bgr, imgproc::COLOR_BGRA2BGR)?;
        bgr
    } else {
        frame.clone()
    };

    imgcodecs::imencode(".jpg", &mat, &mut buf, &params).context("JPEG encode failed")?;
    Ok(buf.to_vec())
}

/// エンコード済みJPEGを multipart/x-mixed-replace の1チャンクに整形する
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 4);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n\r\n");
    Bytes::from(chunk)
}
