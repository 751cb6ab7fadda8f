use anyhow::{bail, Result};
use opencv::core::Mat;
use opencv::prelude::*;

/// 衣服画像をフレームへアルファ合成した新しいフレームを返す。
///
/// `anchor` は衣服の左上隅のフレーム座標で、フレーム外でもよい。
/// 描画は衣服とフレームの交差領域にクリップされ、交差がなければ
/// フレームの完全なコピーがそのまま返る。4チャンネル衣服は
/// アルファ値 (0=透過、255=不透過) でピクセル毎に線形補間し、
/// 3チャンネル衣服は不透過として置き換える。
///
/// 失敗時は Err を返すだけで、呼び出し側が元フレームへフォールバック
/// してストリームを継続する。
pub fn composite(frame: &Mat, garment: &Mat, anchor: (i32, i32)) -> Result<Mat> {
    if frame.channels() != 3 {
        bail!("expected 3-channel frame, got {}", frame.channels());
    }
    let garment_channels = garment.channels() as usize;
    if garment_channels != 3 && garment_channels != 4 {
        bail!("expected 3- or 4-channel garment, got {garment_channels}");
    }

    let mut out = frame.clone();
    let frame_width = out.cols();
    let frame_height = out.rows();
    let garment_width = garment.cols();
    let garment_height = garment.rows();
    let (anchor_x, anchor_y) = anchor;

    // 交差領域 (フレーム座標)
    let x0 = anchor_x.max(0);
    let y0 = anchor_y.max(0);
    let x1 = anchor_x.saturating_add(garment_width).min(frame_width);
    let y1 = anchor_y.saturating_add(garment_height).min(frame_height);
    if x0 >= x1 || y0 >= y1 {
        return Ok(out);
    }

    let garment_step = garment.mat_step().get(0);
    let frame_step = out.mat_step().get(0);
    let garment_data = garment.data_bytes()?;
    let frame_data = out.data_bytes_mut()?;

    for y in y0..y1 {
        let garment_row_start = (y - anchor_y) as usize * garment_step;
        let garment_row = &garment_data
            [garment_row_start..garment_row_start + garment_width as usize * garment_channels];
        let frame_row_start = y as usize * frame_step;
        let frame_row =
            &mut frame_data[frame_row_start..frame_row_start + frame_width as usize * 3];

        for x in x0..x1 {
            let gi = (x - anchor_x) as usize * garment_channels;
            let fi = x as usize * 3;

            if garment_channels == 4 {
                let alpha = garment_row[gi + 3] as u16;
                if alpha == 0 {
                    continue;
                }
                let inverse = 255 - alpha;
                for c in 0..3 {
                    let foreground = garment_row[gi + c] as u16;
                    let background = frame_row[fi + c] as u16;
                    frame_row[fi + c] =
                        ((foreground * alpha + background * inverse + 127) / 255) as u8;
                }
            } else {
                frame_row[fi..fi + 3].copy_from_slice(&garment_row[gi..gi + 3]);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vec3b, Vec4b, CV_8UC3, CV_8UC4};

    fn frame_filled(rows: i32, cols: i32, b: f64, g: f64, r: f64) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::new(b, g, r, 0.0)).unwrap()
    }

    fn garment_filled(rows: i32, cols: i32, b: f64, g: f64, r: f64, a: f64) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC4, Scalar::new(b, g, r, a)).unwrap()
    }

    fn pixels_equal(a: &Mat, b: &Mat) -> bool {
        a.data_bytes().unwrap() == b.data_bytes().unwrap()
    }

    #[test]
    fn test_opaque_garment_replaces_pixels_inside_bounds() {
        let frame = frame_filled(10, 10, 0.0, 0.0, 0.0);
        let garment = garment_filled(4, 4, 10.0, 20.0, 30.0, 255.0);

        let out = composite(&frame, &garment, (3, 2)).unwrap();

        let inside = *out.at_2d::<Vec3b>(3, 4).unwrap();
        assert_eq!([inside[0], inside[1], inside[2]], [10, 20, 30]);
        let outside = *out.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!([outside[0], outside[1], outside[2]], [0, 0, 0]);
        // 領域外の右下も無変更
        let below = *out.at_2d::<Vec3b>(7, 3).unwrap();
        assert_eq!([below[0], below[1], below[2]], [0, 0, 0]);
    }

    #[test]
    fn test_fully_outside_anchor_returns_identical_frame() {
        let frame = frame_filled(10, 10, 5.0, 6.0, 7.0);
        let garment = garment_filled(4, 4, 255.0, 255.0, 255.0, 255.0);

        for anchor in [(-100, -100), (100, 100), (-4, 0), (0, 10)] {
            let out = composite(&frame, &garment, anchor).unwrap();
            assert!(pixels_equal(&frame, &out), "anchor {anchor:?} changed pixels");
        }
    }

    #[test]
    fn test_partial_offscreen_blends_visible_portion_only() {
        let frame = frame_filled(8, 8, 0.0, 0.0, 0.0);
        let garment = garment_filled(4, 4, 100.0, 100.0, 100.0, 255.0);

        // 左上にはみ出すアンカー
        let out = composite(&frame, &garment, (-2, -2)).unwrap();

        let visible = *out.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!([visible[0], visible[1], visible[2]], [100, 100, 100]);
        let beyond = *out.at_2d::<Vec3b>(2, 2).unwrap();
        assert_eq!([beyond[0], beyond[1], beyond[2]], [0, 0, 0]);
    }

    #[test]
    fn test_transparent_pixels_pass_background_through() {
        let frame = frame_filled(6, 6, 40.0, 50.0, 60.0);
        let garment = garment_filled(3, 3, 200.0, 200.0, 200.0, 0.0);

        let out = composite(&frame, &garment, (1, 1)).unwrap();
        assert!(pixels_equal(&frame, &out));
    }

    #[test]
    fn test_alpha_interpolates_linearly() {
        let frame = frame_filled(4, 4, 0.0, 0.0, 0.0);
        let mut garment = garment_filled(2, 2, 0.0, 0.0, 0.0, 0.0);
        *garment.at_2d_mut::<Vec4b>(0, 0).unwrap() = Vec4b::from([200, 100, 50, 128]);

        let out = composite(&frame, &garment, (0, 0)).unwrap();
        let blended = *out.at_2d::<Vec3b>(0, 0).unwrap();
        // (値 * 128 + 0 * 127 + 127) / 255
        assert_eq!([blended[0], blended[1], blended[2]], [100, 50, 25]);
    }

    #[test]
    fn test_three_channel_garment_is_opaque() {
        let frame = frame_filled(6, 6, 1.0, 2.0, 3.0);
        let garment = frame_filled(2, 2, 9.0, 8.0, 7.0);

        let out = composite(&frame, &garment, (4, 4)).unwrap();
        let corner = *out.at_2d::<Vec3b>(5, 5).unwrap();
        assert_eq!([corner[0], corner[1], corner[2]], [9, 8, 7]);
    }

    #[test]
    fn test_rejects_unexpected_channel_counts() {
        let frame = frame_filled(4, 4, 0.0, 0.0, 0.0);
        let gray = Mat::new_rows_cols_with_default(2, 2, opencv::core::CV_8UC1, Scalar::all(9.0))
            .unwrap();
        assert!(composite(&frame, &gray, (0, 0)).is_err());
        assert!(composite(&gray, &frame, (0, 0)).is_err());
    }
}
