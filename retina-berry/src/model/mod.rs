//! 分割网络: 分块预测器接口, 网络变体和权重加载.
//!
//! 网络内部的卷积拓扑不在本 crate 的范围内. 这里只约定预测器的输入输出,
//! 并提供两种可以从 npz 权重文件恢复的分类头.

mod checkpoint;
mod head;

use crate::data::ChannelNorm;
use crate::error::{SegError, SegResult};
use ndarray::{Array3, ArrayView3, Ix1, Ix2, Ix3};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use checkpoint::Checkpoint;
pub use head::{HedHead, PixelHead};

/// 分块预测器.
///
/// 输入为 `(3, tile_h, tile_w)` 的图像块 (边界块可能小于块边长), 输出为
/// `(num_classes, tile_h, tile_w)` 的原始 (未归一化) 分数. 对相同输入必须给出相同输出,
/// 且不得修改输入.
pub trait TilePredictor {
    /// 输出通道 (类别) 数.
    fn num_classes(&self) -> usize;

    /// 对单个图像块做前向推理.
    fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>>;
}

impl<T: TilePredictor + ?Sized> TilePredictor for &T {
    #[inline]
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    #[inline]
    fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
        (**self).predict(tile)
    }
}

impl<T: TilePredictor + ?Sized> TilePredictor for Box<T> {
    #[inline]
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    #[inline]
    fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
        (**self).predict(tile)
    }
}

/// 可跨线程共享的动态预测器.
pub type BoxedPredictor = Box<dyn TilePredictor + Send + Sync>;

/// 网络变体.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetVariant {
    /// U-Net 变体. 输入为 `[0, 1]` 的 RGB, 不做额外归一化.
    #[default]
    UNet,

    /// HED (holistically-nested edge detection) 风格网络. 输入按 ImageNet 统计量归一化,
    /// 推理时取最后一个 (融合) 输出.
    HedNet,
}

impl NetVariant {
    /// 所有变体.
    pub const ALL: [NetVariant; 2] = [NetVariant::UNet, NetVariant::HedNet];

    /// 命令行 / 配置中使用的名字.
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UNet => "unet",
            Self::HedNet => "hednet",
        }
    }

    /// 推理前需要对输入图像做的归一化. `None` 表示不做.
    #[inline]
    pub const fn normalization(&self) -> Option<ChannelNorm> {
        match self {
            Self::UNet => None,
            Self::HedNet => Some(ChannelNorm::imagenet()),
        }
    }
}

impl Display for NetVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 解析 [`NetVariant`] 错误.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown net name `{0}`, expected one of: unet, hednet")]
pub struct ParseVariantError(pub String);

impl FromStr for NetVariant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseVariantError(s.to_string()))
    }
}

/// 推理设备. 作为显式配置传入, 而不是全局状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum Device {
    /// 在 CPU 上以 `ndarray` 计算.
    #[default]
    Cpu,
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// 从 `path` 处的 npz 权重文件加载 `variant` 对应的预测器, 放置在 `device` 上.
///
/// - `UNet`: `weight` 为 `(num_classes, 3)`, `bias` 为 `(num_classes,)`;
/// - `HedNet`: `weight` 为 `(sides, num_classes, 3)`, `bias` 为 `(sides, num_classes)`.
///
/// 任何失败 (文件不存在, 归档损坏, 形状不符) 都返回 [`SegError::ModelLoadFailure`].
pub fn load_predictor<P: AsRef<Path>>(
    variant: NetVariant,
    path: P,
    device: Device,
) -> SegResult<BoxedPredictor> {
    let path = path.as_ref();
    let mut ckpt = Checkpoint::open(path)?;
    let as_load_failure = |e: SegError| match e {
        e @ SegError::ModelLoadFailure { .. } => e,
        other => SegError::model_load(path, other),
    };

    let predictor: BoxedPredictor = match variant {
        NetVariant::UNet => {
            let weight = ckpt.array::<Ix2>("weight")?;
            let bias = ckpt.array::<Ix1>("bias")?;
            Box::new(PixelHead::new(weight, bias).map_err(as_load_failure)?)
        }
        NetVariant::HedNet => {
            let weight = ckpt.array::<Ix3>("weight")?;
            let bias = ckpt.array::<Ix2>("bias")?;
            Box::new(HedHead::from_stacked(weight, bias).map_err(as_load_failure)?)
        }
    };

    if predictor.num_classes() < 3 {
        return Err(SegError::model_load(
            path,
            format!("{} classes is too few", predictor.num_classes()),
        ));
    }
    log::info!(
        "Model `{variant}` loaded from {} on {device} ({} classes)",
        path.display(),
        predictor.num_classes()
    );
    Ok(predictor)
}

#[cfg(test)]
mod tests {
    use super::{load_predictor, Device, NetVariant, TilePredictor};
    use crate::error::SegError;
    use ndarray::{Array1, Array2, Array3};
    use ndarray_npy::NpzWriter;
    use std::fs::File;
    use std::path::Path;

    fn write_npz(p: &Path, f: impl FnOnce(&mut NpzWriter<File>)) {
        let mut npz = NpzWriter::new(File::create(p).unwrap());
        f(&mut npz);
        npz.finish().unwrap();
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!("unet".parse::<NetVariant>(), Ok(NetVariant::UNet));
        assert_eq!("HEDNet".parse::<NetVariant>(), Ok(NetVariant::HedNet));
        assert!("resnet".parse::<NetVariant>().is_err());
        for v in NetVariant::ALL {
            assert_eq!(v.to_string().parse::<NetVariant>(), Ok(v));
        }
        assert!(NetVariant::UNet.normalization().is_none());
        assert!(NetVariant::HedNet.normalization().is_some());
    }

    #[test]
    fn test_load_unet() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("unet.npz");
        write_npz(&p, |npz| {
            npz.add_array("weight", &Array2::<f32>::zeros((6, 3))).unwrap();
            npz.add_array("bias", &Array1::<f32>::zeros(6)).unwrap();
        });
        let m = load_predictor(NetVariant::UNet, &p, Device::Cpu).unwrap();
        assert_eq!(m.num_classes(), 6);
        let out = m.predict(Array3::zeros((3, 5, 7)).view()).unwrap();
        assert_eq!(out.dim(), (6, 5, 7));
    }

    #[test]
    fn test_load_hednet() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("hed.npz");
        write_npz(&p, |npz| {
            npz.add_array("weight", &Array3::<f32>::zeros((5, 6, 3))).unwrap();
            npz.add_array("bias", &Array2::<f32>::zeros((5, 6))).unwrap();
        });
        let m = load_predictor(NetVariant::HedNet, &p, Device::Cpu).unwrap();
        assert_eq!(m.num_classes(), 6);

        // 同一个文件无法作为 UNet 加载.
        let err = load_predictor(NetVariant::UNet, &p, Device::Cpu);
        assert!(matches!(err, Err(SegError::ModelLoadFailure { .. })));
    }

    #[test]
    fn test_load_failures() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_predictor(NetVariant::UNet, dir.path().join("none.npz"), Device::Cpu);
        assert!(matches!(err, Err(SegError::ModelLoadFailure { .. })));

        let p = dir.path().join("bad_bias.npz");
        write_npz(&p, |npz| {
            npz.add_array("weight", &Array2::<f32>::zeros((6, 3))).unwrap();
            npz.add_array("bias", &Array1::<f32>::zeros(4)).unwrap();
        });
        let err = load_predictor(NetVariant::UNet, &p, Device::Cpu);
        assert!(matches!(err, Err(SegError::ModelLoadFailure { .. })));

        let p = dir.path().join("two_classes.npz");
        write_npz(&p, |npz| {
            npz.add_array("weight", &Array2::<f32>::zeros((2, 3))).unwrap();
            npz.add_array("bias", &Array1::<f32>::zeros(2)).unwrap();
        });
        let err = load_predictor(NetVariant::UNet, &p, Device::Cpu);
        assert!(matches!(err, Err(SegError::ModelLoadFailure { .. })));
    }
}
