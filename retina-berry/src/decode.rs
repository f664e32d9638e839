//! 原始分数张量到病灶概率图的解码.
//!
//! 解码分三步:
//!
//! 1. 在每个像素上沿类别轴做数值稳定的 softmax, 使该像素在所有类别上的概率之和为 1;
//! 2. 去掉首通道 (背景) 和末通道 (其它), 保留中间的病灶通道, 顺序不变;
//! 3. 将 `[0, 1]` 概率乘以 255 后按 `u8` 强制转换的语义 **截断** 为字节 (不四舍五入).
//!
//! 第 3 步会系统性地略微低估概率. 这与既有输出的字节值保持一致.

use crate::consts::LESIONS;
use crate::data::ScoreTensor;
use crate::error::{SegError, SegResult};
use crate::Idx2d;
use ndarray::iter::IndexedIter;
use ndarray::{s, Array2, Array3, ArrayView2, Axis, Ix2, Zip};

/// 单个病灶的概率图, 取值 `[0, 255]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilityMap {
    data: Array2<u8>,
}

impl ProbabilityMap {
    /// 直接从字节数组构建.
    #[inline]
    pub fn from_array(data: Array2<u8>) -> Self {
        Self { data }
    }

    /// 图像的分辨率 (高, 宽).
    #[inline]
    pub fn dim(&self) -> Idx2d {
        self.data.dim()
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn array_view(&self) -> ArrayView2<u8> {
        self.data.view()
    }

    /// 获取给定位置 (高, 宽) 的概率字节. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<&u8> {
        self.data.get(pos)
    }

    /// 带索引的行优先迭代器.
    #[inline]
    pub fn indexed_iter(&self) -> IndexedIter<'_, u8, Ix2> {
        self.data.indexed_iter()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_array(self) -> Array2<u8> {
        self.data
    }
}

/// 概率到字节的转换: 截断, 而非四舍五入.
#[inline]
pub fn prob_to_byte(p: f32) -> u8 {
    // `as` 在越界时饱和, NaN 映射为 0.
    (p * 255.0) as u8
}

/// 沿类别轴 (第 0 轴) 对 `(C, H, W)` 张量做 softmax. 每个像素独立计算.
///
/// 先减去该像素的最大分数再求指数, 避免溢出.
pub fn softmax_classes(scores: &ScoreTensor) -> Array3<f32> {
    let mut probs = scores.array_view().to_owned();
    if probs.is_empty() {
        return probs;
    }
    let lanes = Zip::from(probs.lanes_mut(Axis(0)));
    let stable = |mut lane: ndarray::ArrayViewMut1<f32>| {
        let max = lane.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    };
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            lanes.par_for_each(stable);
        } else {
            lanes.for_each(stable);
        }
    }
    probs
}

/// 病灶解码器. 持有与网络内部通道一一对应的病灶名列表.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecoder {
    lesions: Vec<String>,
}

impl Default for ClassDecoder {
    /// 标准病灶列表 [`LESIONS`].
    fn default() -> Self {
        Self::new(LESIONS)
    }
}

impl ClassDecoder {
    /// 用给定的病灶名列表创建解码器. 列表长度在解码时才与类别数核对.
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(lesions: I) -> Self {
        Self {
            lesions: lesions.into_iter().map(Into::into).collect(),
        }
    }

    /// 病灶名列表.
    #[inline]
    pub fn lesions(&self) -> &[String] {
        &self.lesions
    }

    /// 检查病灶名列表与 `num_classes` 是否匹配 (`len == num_classes - 2`).
    pub fn check(&self, num_classes: usize) -> SegResult<()> {
        let found = self.lesions.len();
        if num_classes < 2 || found != num_classes - 2 {
            return Err(SegError::shape(
                "lesion names",
                &[num_classes.saturating_sub(2)],
                &[found],
            ));
        }
        Ok(())
    }

    /// 解码拼装完成的分数张量, 返回按通道顺序排列的 `(病灶名, 概率图)`.
    ///
    /// 病灶名个数不等于 `num_classes - 2` 时返回 [`SegError::ShapeMismatch`].
    pub fn decode(&self, scores: &ScoreTensor) -> SegResult<Vec<(String, ProbabilityMap)>> {
        let c = scores.num_classes();
        self.check(c)?;
        let probs = softmax_classes(scores);
        let ans = probs
            .slice(s![1..c - 1, .., ..])
            .outer_iter()
            .zip(self.lesions.iter())
            .map(|(p, name)| {
                let map = ProbabilityMap::from_array(p.mapv(prob_to_byte));
                (name.clone(), map)
            })
            .collect();
        Ok(ans)
    }
}
