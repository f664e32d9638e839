use crate::error::{SegError, SegResult};
use crate::Idx2d;
use std::ops::Range;

/// 图像上一个半开矩形区域 `[row_start, row_end) × [col_start, col_end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileSpec {
    /// 起始行 (含).
    pub row_start: usize,
    /// 结束行 (不含).
    pub row_end: usize,
    /// 起始列 (含).
    pub col_start: usize,
    /// 结束列 (不含).
    pub col_end: usize,
}

impl TileSpec {
    /// 块高.
    #[inline]
    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }

    /// 块宽.
    #[inline]
    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }

    /// 块的 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        (self.height(), self.width())
    }

    /// 行范围.
    #[inline]
    pub fn rows(&self) -> Range<usize> {
        self.row_start..self.row_end
    }

    /// 列范围.
    #[inline]
    pub fn cols(&self) -> Range<usize> {
        self.col_start..self.col_end
    }

    /// 像素 `(h, w)` 是否落在块内?
    #[inline]
    pub fn contains(&self, (h, w): Idx2d) -> bool {
        self.rows().contains(&h) && self.cols().contains(&w)
    }
}

/// 将 `H × W` 图像划分为边长 `T` 的分块, 并按行优先顺序迭代.
///
/// 每个方向上的块数为 `ceil(dim / T)`. 最后一块的终止坐标被截断到图像边界
/// (而不是填充), 因此各块之间既无空隙也无重叠.
#[derive(Clone, Debug)]
pub struct TileGrid {
    height: usize,
    width: usize,
    tile: usize,
    rows: usize,
    cols: usize,
    cur: usize,
}

impl TileGrid {
    /// 为 `(height, width)` 的图像创建边长为 `tile` 的分块网格.
    ///
    /// 任一参数为 0 时返回 [`SegError::InvalidGridInput`].
    pub fn new((height, width): Idx2d, tile: usize) -> SegResult<Self> {
        if height == 0 || width == 0 || tile == 0 {
            return Err(SegError::InvalidGridInput {
                height,
                width,
                tile,
            });
        }
        Ok(Self {
            height,
            width,
            tile,
            rows: height.div_ceil(tile),
            cols: width.div_ceil(tile),
            cur: 0,
        })
    }

    /// 垂直方向的块数.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// 水平方向的块数.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// 块边长.
    #[inline]
    pub fn tile_size(&self) -> usize {
        self.tile
    }

    /// 被划分的图像的 (高, 宽).
    #[inline]
    pub fn image_shape(&self) -> Idx2d {
        (self.height, self.width)
    }

    /// 第 `row` 行、第 `col` 列的分块. 越界时返回 `None`.
    pub fn tile_at(&self, row: usize, col: usize) -> Option<TileSpec> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let row_start = row * self.tile;
        let col_start = col * self.tile;
        Some(TileSpec {
            row_start,
            row_end: (row_start + self.tile).min(self.height),
            col_start,
            col_end: (col_start + self.tile).min(self.width),
        })
    }
}

impl Iterator for TileGrid {
    type Item = TileSpec;

    fn next(&mut self) -> Option<Self::Item> {
        let ret = self.tile_at(self.cur / self.cols, self.cur % self.cols)?;
        self.cur += 1;
        Some(ret)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.rows * self.cols - self.cur;
        (n, Some(n))
    }
}

impl ExactSizeIterator for TileGrid {}
