use crate::overlay::offset::OffsetValues;
use crate::pose::Landmark;

/// 衣服画像を合成する左上アンカー座標を計算する純粋関数。
///
/// 肩中心 (整数除算の中点) を基準に、衣服の幅の半分だけ左へ、
/// `衣服高さ × neckline_ratio` だけ上へずらし、手動オフセットを加算する。
/// この比率は首元の位置の経験的な近似で、設定値として渡される。
pub fn compute_anchor(
    left_shoulder: Landmark,
    right_shoulder: Landmark,
    garment_width: i32,
    garment_height: i32,
    offset: OffsetValues,
    neckline_ratio: f32,
) -> (i32, i32) {
    let center_x = (left_shoulder.x + right_shoulder.x) / 2;
    let center_y = (left_shoulder.y + right_shoulder.y) / 2;

    let anchor_x = center_x + offset.horizontal - garment_width / 2;
    let anchor_y = center_y - (garment_height as f32 * neckline_ratio) as i32 + offset.vertical;
    (anchor_x, anchor_y)
}
