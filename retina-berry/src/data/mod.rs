use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Axis};

use crate::consts::RGB_CHANNELS;
use crate::error::{SegError, SegResult};
use crate::Idx2d;

/// 逐通道归一化.
pub mod norm;
pub mod save;
/// 分数张量的拼装.
pub mod score;
/// 分块网格.
pub mod tile;

pub use norm::ChannelNorm;
pub use save::{mask_path, ImgWriteRaw, MaskWriter, PngMaskWriter};
pub use score::{ScoreAssembler, ScoreTensor};
pub use tile::{TileGrid, TileSpec};

/// 彩色眼底图. 以 `(C, H, W)` 布局保存 RGB 三通道, 像素值为 `[0, 1]` 的 `f32`
/// (归一化之后可能超出该范围).
#[derive(Debug, Clone, PartialEq)]
pub struct FundusImage {
    data: Array3<f32>,
}

impl FundusImage {
    /// 打开本地图像文件, 转换为 RGB 并缩放到 `[0, 1]`.
    ///
    /// 文件不存在或无法解码时返回 [`SegError::IoFailure`].
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| SegError::io(path, e))?;
        Ok(Self::from_rgb(&img.to_rgb8()))
    }

    /// 从 8-bit RGB 图像构建. `(H, W, C)` -> `(C, H, W)`.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let data = Array3::from_shape_fn((RGB_CHANNELS, h as usize, w as usize), |(c, y, x)| {
            f32::from(img.get_pixel(x as u32, y as u32)[c]) / 255.0
        });
        Self { data }
    }

    /// 直接从 `(3, H, W)` 数组构建.
    ///
    /// 通道数不为 3 或图像为空时返回 [`SegError::ShapeMismatch`].
    pub fn from_array(data: Array3<f32>) -> SegResult<Self> {
        let (c, h, w) = data.dim();
        if c != RGB_CHANNELS || h == 0 || w == 0 {
            return Err(SegError::shape(
                "fundus image",
                &[RGB_CHANNELS, h.max(1), w.max(1)],
                &[c, h, w],
            ));
        }
        Ok(Self { data })
    }

    /// 图像的分辨率 (高, 宽).
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

    /// 获得底层数据的一份可变 shallow copy.
    #[inline]
    pub fn array_view_mut(&mut self) -> ArrayViewMut3<f32> {
        self.data.view_mut()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_array(self) -> Array3<f32> {
        self.data
    }

    /// 取出 `tile` 对应区域的三通道视图. 不复制数据.
    ///
    /// `tile` 超出图像范围时程序 panic.
    #[inline]
    pub fn crop(&self, tile: &TileSpec) -> ArrayView3<f32> {
        self.data.slice(s![.., tile.rows(), tile.cols()])
    }

    /// 用 `norm` 就地归一化.
    #[inline]
    pub fn normalize(&mut self, norm: &ChannelNorm) {
        norm.apply(self.data.view_mut());
    }

    /// 每个通道的均值.
    pub fn channel_mean(&self) -> [f32; 3] {
        let mut ans = [0.0f32; 3];
        for (c, plane) in self.data.axis_iter(Axis(0)).enumerate() {
            ans[c] = plane.mean().unwrap_or(0.0);
        }
        ans
    }

    /// 转换回 8-bit RGB 图像. 值被截断到 `[0, 1]` 后缩放并四舍五入.
    pub fn to_rgb(&self) -> RgbImage {
        let (h, w) = self.shape();
        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let px = |c: usize| {
                let v = self.data[(c, y as usize, x as usize)].clamp(0.0, 1.0);
                (v * 255.0).round() as u8
            };
            Rgb([px(0), px(1), px(2)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FundusImage, TileSpec};
    use crate::error::SegError;
    use image::{Rgb, RgbImage};
    use ndarray::Array3;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_from_rgb_layout() {
        let img = RgbImage::from_fn(4, 2, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 255]));
        let f = FundusImage::from_rgb(&img);
        assert_eq!(f.shape(), (2, 4));
        let v = f.array_view();
        assert!(f32_eq(v[(0, 1, 3)], 30.0 / 255.0));
        assert!(f32_eq(v[(1, 1, 3)], 20.0 / 255.0));
        assert!(f32_eq(v[(2, 0, 0)], 1.0));
        assert_eq!(f.to_rgb(), img);
    }

    #[test]
    fn test_from_array_rejects_bad_shape() {
        let err = FundusImage::from_array(Array3::zeros((4, 2, 2))).unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { .. }));
        let err = FundusImage::from_array(Array3::zeros((3, 0, 2))).unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { .. }));
        assert!(FundusImage::from_array(Array3::zeros((3, 1, 1))).is_ok());
    }

    #[test]
    fn test_crop_region() {
        let data = Array3::from_shape_fn((3, 5, 6), |(c, h, w)| (c * 100 + h * 10 + w) as f32);
        let f = FundusImage::from_array(data).unwrap();
        let tile = TileSpec {
            row_start: 3,
            row_end: 5,
            col_start: 4,
            col_end: 6,
        };
        let crop = f.crop(&tile);
        assert_eq!(crop.dim(), (3, 2, 2));
        assert_eq!(crop[(2, 0, 0)], 234.0);
        assert_eq!(crop[(0, 1, 1)], 45.0);
    }

    #[test]
    fn test_open_missing_file() {
        let err = FundusImage::open("/definitely/not/here.png").unwrap_err();
        assert!(err.is_per_image());
    }
}
