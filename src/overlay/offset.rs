use serde::Deserialize;
use std::sync::atomic::{AtomicI32, Ordering};

/// 位置調整の方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// 1ティック分のオフセット読み取り値
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetValues {
    pub vertical: i32,
    pub horizontal: i32,
}

/// プロセス全体で共有する手動位置オフセット。
///
/// ストリーミングループの各ティックと調整リクエストから並行に
/// アクセスされる。値に上限はなく、常に加算的な変位として適用される。
#[derive(Debug, Default)]
pub struct PositionOffset {
    vertical: AtomicI32,
    horizontal: AtomicI32,
}

impl PositionOffset {
    pub fn new(vertical: i32, horizontal: i32) -> Self {
        Self {
            vertical: AtomicI32::new(vertical),
            horizontal: AtomicI32::new(horizontal),
        }
    }

    /// 1回の調整で `step` ピクセル移動する (up/left が負方向)。
    /// 調整後の値を返す。
    pub fn nudge(&self, direction: Direction, step: i32) -> OffsetValues {
        match direction {
            Direction::Up => self.vertical.fetch_sub(step, Ordering::Relaxed),
            Direction::Down => self.vertical.fetch_add(step, Ordering::Relaxed),
            Direction::Left => self.horizontal.fetch_sub(step, Ordering::Relaxed),
            Direction::Right => self.horizontal.fetch_add(step, Ordering::Relaxed),
        };
        self.get()
    }

    /// 現在値のスナップショット
    pub fn get(&self) -> OffsetValues {
        OffsetValues {
            vertical: self.vertical.load(Ordering::Relaxed),
            horizontal: self.horizontal.load(Ordering::Relaxed),
        }
    }
}
