//! 运行时错误.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 分块推理管线中的错误.
///
/// `InvalidGridInput`, `InvalidTileSize` 和 `ShapeMismatch` 属于编程或配置错误, 会被立即上报,
/// 不会被自动修正; `ModelLoadFailure` 对整个运行是致命的; `IoFailure`
/// 只中止当前图像, 由调用者决定是否继续处理下一张.
#[derive(Debug, Error)]
pub enum SegError {
    /// 分块网格的图像尺寸或块边长为 0.
    #[error("invalid tile grid input: height = {height}, width = {width}, tile = {tile}")]
    InvalidGridInput {
        /// 图像高.
        height: usize,
        /// 图像宽.
        width: usize,
        /// 块边长.
        tile: usize,
    },

    /// 管线配置的块边长为 0.
    #[error("invalid tile size {tile}: must be positive")]
    InvalidTileSize {
        /// 块边长.
        tile: usize,
    },

    /// 形状不符. 例如预测器输出与分块区域大小不一致,
    /// 或病灶名列表长度不等于 `num_classes - 2`.
    #[error("shape mismatch on {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// 出错的对象.
        what: &'static str,
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        found: Vec<usize>,
    },

    /// 模型权重文件不存在或无法加载.
    #[error("cannot load checkpoint `{}`: {reason}", path.display())]
    ModelLoadFailure {
        /// 权重文件路径.
        path: PathBuf,
        /// 失败原因.
        reason: String,
    },

    /// 读取源图像或写出结果时的 I/O 错误.
    #[error("I/O failure on `{}`", path.display())]
    IoFailure {
        /// 出错的文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: IoCause,
    },
}

/// [`SegError::IoFailure`] 的底层原因.
#[derive(Debug, Error)]
pub enum IoCause {
    /// 文件系统错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 图像编解码错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl SegError {
    /// 将底层错误包装为带路径的 [`SegError::IoFailure`].
    pub fn io<P: AsRef<Path>, E: Into<IoCause>>(path: P, source: E) -> Self {
        Self::IoFailure {
            path: path.as_ref().to_owned(),
            source: source.into(),
        }
    }

    /// 构造 [`SegError::ModelLoadFailure`].
    pub fn model_load<P: AsRef<Path>, S: ToString>(path: P, reason: S) -> Self {
        Self::ModelLoadFailure {
            path: path.as_ref().to_owned(),
            reason: reason.to_string(),
        }
    }

    /// 构造 [`SegError::ShapeMismatch`].
    pub(crate) fn shape(what: &'static str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// 该错误是否只影响单张图像 (调用者可以选择继续下一张)?
    #[inline]
    pub fn is_per_image(&self) -> bool {
        matches!(self, Self::IoFailure { .. })
    }
}

/// 分割管线运行时结果.
pub type SegResult<T> = Result<T, SegError>;
