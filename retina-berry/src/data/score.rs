use crate::data::TileSpec;
use crate::error::{SegError, SegResult};
use crate::Idx2d;
use ndarray::{s, Array3, ArrayView2, ArrayView3, Axis};

/// 分块预测结果的拼装器.
///
/// 内部持有一张零初始化的 `(num_classes, H, W)` 原始分数张量.
/// 每个分块的预测结果以 **覆写** 方式写入对应区域 (分块互不重叠, 不做融合).
/// 全部写入后调用 [`ScoreAssembler::finish`] 得到只读的 [`ScoreTensor`].
#[derive(Debug)]
pub struct ScoreAssembler {
    data: Array3<f32>,
    written: usize,
}

impl ScoreAssembler {
    /// 为 `(height, width)` 的图像创建 `num_classes` 通道的零张量.
    pub fn new(num_classes: usize, (height, width): Idx2d) -> Self {
        Self {
            data: Array3::zeros((num_classes, height, width)),
            written: 0,
        }
    }

    /// 将 `scores` 写入 `tile` 区域.
    ///
    /// `scores` 的形状必须恰为 `(num_classes, tile.height(), tile.width())`,
    /// 且 `tile` 必须落在图像内, 否则返回 [`SegError::ShapeMismatch`], 张量保持不变.
    pub fn write(&mut self, tile: &TileSpec, scores: ArrayView3<f32>) -> SegResult<()> {
        let (c, h, w) = self.data.dim();
        let inside = tile.row_start <= tile.row_end
            && tile.col_start <= tile.col_end
            && tile.row_end <= h
            && tile.col_end <= w;
        if !inside {
            return Err(SegError::shape(
                "tile region",
                &[h, w],
                &[tile.row_end, tile.col_end],
            ));
        }
        let expected = [c, tile.height(), tile.width()];
        if scores.shape() != &expected[..] {
            return Err(SegError::shape("tile scores", &expected, scores.shape()));
        }
        self.data
            .slice_mut(s![.., tile.rows(), tile.cols()])
            .assign(&scores);
        self.written += 1;
        Ok(())
    }

    /// 已写入的分块个数.
    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    /// 结束拼装.
    #[inline]
    pub fn finish(self) -> ScoreTensor {
        ScoreTensor { data: self.data }
    }
}

/// 拼装完成的 `(num_classes, H, W)` 原始 (未归一化) 分数张量. 只读.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTensor {
    data: Array3<f32>,
}

impl ScoreTensor {
    /// 直接从数组构建. 主要用于测试和离线分析.
    #[inline]
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// 类别 (通道) 数.
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.data.dim().0
    }

    /// 空间分辨率 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let (_, h, w) = self.data.dim();
        (h, w)
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn array_view(&self) -> ArrayView3<f32> {
        self.data.view()
    }

    /// 第 `class` 个通道. 越界时程序 panic.
    #[inline]
    pub fn channel(&self, class: usize) -> ArrayView2<f32> {
        self.data.index_axis(Axis(0), class)
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_array(self) -> Array3<f32> {
        self.data
    }
}
