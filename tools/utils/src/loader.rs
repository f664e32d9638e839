//! 对 `retina-berry::dataset` 的更一层封装. 提供更直接的数据集路径和图像源.

use retina_berry::dataset::{self, ImageSource};
use retina_berry::SegResult;
use std::env;
use std::path::PathBuf;

/// 指定 DiaRetDB1 图像目录的环境变量.
pub const IMAGE_DIR_ENV: &str = "DIARETDB_IMAGE_DIR";

/// 获取 DiaRetDB1 图像目录.
///
/// 1. 若环境变量 `$DIARETDB_IMAGE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/diaretdb1/images`;
/// 3. 用户主目录无法确定时返回 `None`.
pub fn image_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(IMAGE_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["diaretdb1", "images"]),
    }
}

/// 从 `$DIARETDB_IMAGE_DIR` 或者 `$HOME/dataset/diaretdb1/images` 下加载图像源.
pub fn source_from_env_or_home() -> Option<SegResult<ImageSource>> {
    image_dir_from_env_or_home().map(ImageSource::from_dir)
}
