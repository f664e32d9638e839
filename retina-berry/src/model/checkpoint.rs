use crate::error::{SegError, SegResult};
use ndarray::{Array, Dimension, OwnedRepr};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::{Path, PathBuf};

/// 权重键的候选前缀. 生成器风格的权重文件会给所有键加上 `g_` 前缀.
const KEY_PREFIXES: [&str; 2] = ["", "g_"];

/// 以 npz 归档保存的模型权重.
///
/// 归档中每个数组以 `{prefix}{key}` 或 `{prefix}{key}.npy` 命名.
/// `prefix` 在打开时根据是否存在 `weight` 或 `g_weight` 自动确定.
pub struct Checkpoint {
    path: PathBuf,
    reader: NpzReader<File>,
    names: Vec<String>,
    prefix: &'static str,
}

/// 在归档成员名中查找 `{prefix}{key}`. `numpy.savez` 会给成员名加上 `.npy` 后缀,
/// `NpzWriter` 则原样保存, 两种都接受.
fn resolve(names: &[String], prefix: &str, key: &str) -> Option<String> {
    let bare = format!("{prefix}{key}");
    let npy = format!("{bare}.npy");
    [bare, npy].into_iter().find(|c| names.contains(c))
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Checkpoint {
    /// 打开 `path` 处的权重文件.
    ///
    /// 文件不存在, 不是合法的 npz 归档, 或不含 `weight` 数组时返回
    /// [`SegError::ModelLoadFailure`].
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let path = path.as_ref().to_owned();
        if !path.is_file() {
            return Err(SegError::model_load(&path, "no checkpoint found"));
        }
        let file = File::open(&path).map_err(|e| SegError::model_load(&path, e))?;
        let mut reader = NpzReader::new(file).map_err(|e| SegError::model_load(&path, e))?;
        let names = reader
            .names()
            .map_err(|e| SegError::model_load(&path, e))?;

        let prefix = KEY_PREFIXES
            .into_iter()
            .find(|p| resolve(&names, p, "weight").is_some())
            .ok_or_else(|| SegError::model_load(&path, "neither `weight` nor `g_weight` found"))?;

        Ok(Self {
            path,
            reader,
            names,
            prefix,
        })
    }

    /// 权重文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 实际使用的键前缀 (`""` 或 `"g_"`).
    #[inline]
    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// 读取名为 `key` 的 `f32` 数组. 维数必须与 `D` 一致.
    pub fn array<D: Dimension>(&mut self, key: &str) -> SegResult<Array<f32, D>> {
        let name = resolve(&self.names, self.prefix, key).ok_or_else(|| {
            SegError::model_load(&self.path, format!("`{}{key}` not found", self.prefix))
        })?;
        self.reader
            .by_name::<OwnedRepr<f32>, D>(&name)
            .map_err(|e| SegError::model_load(&self.path, format!("`{name}`: {e}")))
    }
}
