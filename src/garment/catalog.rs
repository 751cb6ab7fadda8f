use opencv::{core::Mat, imgcodecs, prelude::*};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::preprocess::is_garment_file;

/// 衣服カタログのエラー
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to enumerate {dir}: {source}")]
    Enumerate {
        dir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no processed garment images in {dir}")]
    Empty { dir: String },
    /// アクティブ衣服が読めない。壊れた衣服を提示し続けることは
    /// できないため、呼び出し側はこれを致命的エラーとして扱う。
    #[error("unreadable garment image: {path}")]
    Unreadable { path: String },
}

/// 処理済み衣服画像の順序付きコレクション。
///
/// カーソルは常に `[0, len)` 内で巡回し、アクティブ画像は常に
/// カーソル位置のファイルを完全に読み込んだもの。読み込みに失敗した
/// 巡回はカーソルを動かさない。
pub struct GarmentCatalog {
    dir: PathBuf,
    files: Vec<String>,
    cursor: usize,
    active: Mat,
}

impl GarmentCatalog {
    /// 処理済みディレクトリを列挙し、先頭の衣服を読み込む。
    /// 列挙順はプロセス内で安定 (ファイル名の辞書順)。
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CatalogError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir).map_err(|source| CatalogError::Enumerate {
            dir: dir.display().to_string(),
            source,
        })?;

        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_garment_file(name))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CatalogError::Empty {
                dir: dir.display().to_string(),
            });
        }

        let active = load_garment(&dir, &files[0])?;
        Ok(Self {
            dir,
            files,
            cursor: 0,
            active,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 現在のカーソル位置
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 列挙済みファイル名 (プロセス内で順序は安定)
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// アクティブ衣服のファイル名
    pub fn active_file(&self) -> &str {
        &self.files[self.cursor]
    }

    /// アクティブ衣服画像の完全なコピーを返す。
    /// ロックを短く保ち、ティック中は呼び出し側が自分のコピーを使う。
    pub fn active(&self) -> Mat {
        self.active.clone()
    }

    /// 次の衣服へ巡回する。成功時は新しいカーソル位置を返す。
    pub fn advance(&mut self) -> Result<usize, CatalogError> {
        self.step(1)
    }

    /// 前の衣服へ巡回する。成功時は新しいカーソル位置を返す。
    pub fn retreat(&mut self) -> Result<usize, CatalogError> {
        self.step(-1)
    }

    fn step(&mut self, delta: isize) -> Result<usize, CatalogError> {
        let len = self.files.len() as isize;
        let next = (self.cursor as isize + delta).rem_euclid(len) as usize;
        // 読み込みに成功してからカーソルとアクティブ画像を同時に差し替える
        let image = load_garment(&self.dir, &self.files[next])?;
        self.cursor = next;
        self.active = image;
        Ok(next)
    }
}

fn load_garment(dir: &Path, name: &str) -> Result<Mat, CatalogError> {
    let path = dir.join(name);
    imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_UNCHANGED)
        .ok()
        .filter(|m| !m.empty())
        .ok_or_else(|| CatalogError::Unreadable {
            path: path.display().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vector, CV_8UC4};
    use tempfile::TempDir;

    fn write_garment(dir: &Path, name: &str, side: i32) {
        let mat = Mat::new_rows_cols_with_default(
            side,
            side,
            CV_8UC4,
            Scalar::new(0.0, 0.0, 255.0, 255.0),
        )
        .unwrap();
        assert!(imgcodecs::imwrite(&dir.join(name).to_string_lossy(), &mat, &Vector::<i32>::new()).unwrap());
    }

    fn catalog_with(names: &[&str]) -> (TempDir, GarmentCatalog) {
        let dir = TempDir::new().unwrap();
        for (i, name) in names.iter().enumerate() {
            write_garment(dir.path(), name, 8 + i as i32);
        }
        let catalog = GarmentCatalog::open(dir.path()).unwrap();
        (dir, catalog)
    }

    #[test]
    fn test_open_sorts_and_loads_first() {
        let (_dir, catalog) = catalog_with(&["b.png", "a.png", "c.jpg"]);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.cursor(), 0);
        assert_eq!(catalog.active_file(), "a.png");
        assert!(!catalog.active().empty());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            GarmentCatalog::open(dir.path()),
            Err(CatalogError::Empty { .. })
        ));
    }

    #[test]
    fn test_advance_then_retreat_restores_cursor() {
        let (_dir, mut catalog) = catalog_with(&["a.png", "b.png", "c.png"]);
        assert_eq!(catalog.advance().unwrap(), 1);
        assert_eq!(catalog.retreat().unwrap(), 0);
        assert_eq!(catalog.active_file(), "a.png");
    }

    #[test]
    fn test_retreat_wraps_to_last() {
        let (_dir, mut catalog) = catalog_with(&["a.png", "b.png", "c.png"]);
        assert_eq!(catalog.retreat().unwrap(), 2);
        assert_eq!(catalog.active_file(), "c.png");
    }

    #[test]
    fn test_full_cycle_returns_to_start() {
        let (_dir, mut catalog) = catalog_with(&["a.png", "b.png", "c.png"]);
        for _ in 0..catalog.len() {
            catalog.advance().unwrap();
        }
        assert_eq!(catalog.cursor(), 0);
    }

    #[test]
    fn test_failed_load_leaves_catalog_unchanged() {
        let (dir, mut catalog) = catalog_with(&["a.png", "b.png"]);
        fs::write(dir.path().join("b.png"), b"corrupted").unwrap();

        assert!(matches!(
            catalog.advance(),
            Err(CatalogError::Unreadable { .. })
        ));
        // カーソルは壊れた画像を指さない
        assert_eq!(catalog.cursor(), 0);
        assert_eq!(catalog.active_file(), "a.png");
        assert!(!catalog.active().empty());
    }
}
