use super::TilePredictor;
use crate::error::{SegError, SegResult};
use ndarray::{Array, Array1, Array2, Array3, ArrayView3, Axis};

/// 逐像素线性分类头: 相当于 `1 × 1` 卷积, 将 `C_in` 通道映射为 `num_classes` 个原始分数.
///
/// `weight` 形状为 `(num_classes, C_in)`, `bias` 形状为 `(num_classes,)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelHead {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl PixelHead {
    /// 创建分类头. `weight` 行数与 `bias` 长度必须一致.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> SegResult<Self> {
        if weight.nrows() != bias.len() || weight.nrows() == 0 || weight.ncols() == 0 {
            return Err(SegError::shape(
                "pixel head bias",
                &[weight.nrows()],
                &[bias.len()],
            ));
        }
        Ok(Self { weight, bias })
    }

    /// 输入通道数.
    #[inline]
    pub fn in_channels(&self) -> usize {
        self.weight.ncols()
    }

    /// `(C_in, h, w)` -> `(num_classes, h, w)`.
    pub fn forward(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
        let (c, h, w) = tile.dim();
        if c != self.in_channels() {
            return Err(SegError::shape("tile channels", &[self.in_channels()], &[c]));
        }
        // `iter` 总是按逻辑 (行优先) 顺序迭代, 与视图的内存布局无关.
        let flat = Array2::from_shape_vec((c, h * w), tile.iter().copied().collect())
            .map_err(|_| SegError::shape("tile", &[c, h, w], tile.shape()))?;
        let mut out = self.weight.dot(&flat);
        out += &self.bias.view().insert_axis(Axis(1));
        let k = out.nrows();
        out.into_shape((k, h, w))
            .map_err(|_| SegError::shape("head output", &[k, h, w], &[k, h * w]))
    }
}

impl TilePredictor for PixelHead {
    #[inline]
    fn num_classes(&self) -> usize {
        self.weight.nrows()
    }

    #[inline]
    fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
        self.forward(tile)
    }
}

/// HED 风格的多侧输出头.
///
/// 每个侧输出 (side output) 是一个独立的 [`PixelHead`]; 前向时依次给出每个侧输出,
/// 最后追加一个融合输出 (各侧输出的逐元素均值). 推理只取最后一个, 即融合输出.
#[derive(Debug, Clone, PartialEq)]
pub struct HedHead {
    sides: Vec<PixelHead>,
}

impl HedHead {
    /// 由若干侧输出头创建. 至少需要一个, 且所有侧输出的类别数与输入通道数必须一致.
    pub fn new(sides: Vec<PixelHead>) -> SegResult<Self> {
        let first = sides
            .first()
            .ok_or_else(|| SegError::shape("hed sides", &[1], &[0]))?;
        let expected = [first.num_classes(), first.in_channels()];
        for s in sides.iter().skip(1) {
            let found = [s.num_classes(), s.in_channels()];
            if found != expected {
                return Err(SegError::shape("hed side", &expected, &found));
            }
        }
        Ok(Self { sides })
    }

    /// 从堆叠的权重创建.
    ///
    /// `weight` 为 `(sides, num_classes, C_in)`, `bias` 为 `(sides, num_classes)`.
    pub fn from_stacked(weight: Array3<f32>, bias: Array2<f32>) -> SegResult<Self> {
        if weight.len_of(Axis(0)) != bias.nrows() {
            return Err(SegError::shape(
                "hed bias",
                &[weight.len_of(Axis(0))],
                &[bias.nrows()],
            ));
        }
        let sides = weight
            .outer_iter()
            .zip(bias.outer_iter())
            .map(|(w, b)| PixelHead::new(w.to_owned(), b.to_owned()))
            .collect::<SegResult<Vec<_>>>()?;
        Self::new(sides)
    }

    /// 侧输出个数 (不含融合输出).
    #[inline]
    pub fn num_sides(&self) -> usize {
        self.sides.len()
    }

    /// 依次返回每个侧输出, 最后一个元素为融合输出.
    pub fn forward(&self, tile: ArrayView3<f32>) -> SegResult<Vec<Array3<f32>>> {
        let mut outs = self
            .sides
            .iter()
            .map(|s| s.forward(tile.view()))
            .collect::<SegResult<Vec<_>>>()?;
        let mut fused = Array::zeros(outs[0].raw_dim());
        for o in outs.iter() {
            fused += o;
        }
        let n = outs.len() as f32;
        fused.mapv_inplace(|v| v / n);
        outs.push(fused);
        Ok(outs)
    }
}

impl TilePredictor for HedHead {
    #[inline]
    fn num_classes(&self) -> usize {
        self.sides[0].num_classes()
    }

    fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
        self.forward(tile)?
            .pop()
            .ok_or_else(|| SegError::shape("hed outputs", &[self.num_sides() + 1], &[0]))
    }
}
