use crate::consts::imagenet;
use ndarray::{ArrayViewMut3, Axis};

/// 逐通道归一化参数, 包含均值 (mean) 和标准差 (std).
///
/// 该对象是只读的. 若要修改参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelNorm {
    mean: [f32; 3],
    std: [f32; 3],
}

impl ChannelNorm {
    /// 构建归一化参数.
    ///
    /// `mean` 必须有限, `std` 必须有限且为正, 否则返回 `None`.
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Option<ChannelNorm> {
        let mean_ok = mean.iter().all(|m| m.is_finite());
        let std_ok = std.iter().all(|s| s.is_finite() && *s > 0.0);
        if mean_ok && std_ok {
            Some(Self { mean, std })
        } else {
            None
        }
    }

    /// ImageNet 统计量. 预训练骨干网络要求的输入分布.
    #[inline]
    pub const fn imagenet() -> ChannelNorm {
        Self {
            mean: imagenet::MEAN,
            std: imagenet::STD,
        }
    }

    /// 三通道均值.
    #[inline]
    pub fn mean(&self) -> [f32; 3] {
        self.mean
    }

    /// 三通道标准差.
    #[inline]
    pub fn std(&self) -> [f32; 3] {
        self.std
    }

    /// 求第 `channel` 通道上 `v` 归一化后的值.
    ///
    /// `channel >= 3` 时程序 panic.
    #[inline]
    pub fn eval(&self, channel: usize, v: f32) -> f32 {
        (v - self.mean[channel]) / self.std[channel]
    }

    /// 求第 `channel` 通道上归一化值 `v` 对应的原始值.
    #[inline]
    pub fn invert(&self, channel: usize, v: f32) -> f32 {
        v * self.std[channel] + self.mean[channel]
    }

    /// 就地归一化 `C × H × W` 图像. 仅处理前三个通道.
    pub fn apply(&self, mut data: ArrayViewMut3<f32>) {
        for (c, mut plane) in data.axis_iter_mut(Axis(0)).take(3).enumerate() {
            plane.mapv_inplace(|v| self.eval(c, v));
        }
    }
}
