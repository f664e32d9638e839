//! 眼底图数据集.
//!
//! 提供两种显式的变体:
//!
//! - [`ImageDataset`]: 只有图像, 用于推理;
//! - [`MaskedDataset`]: 图像与逐病灶掩码, 用于训练和评估.
//!
//! 二者都提供迭代器风格的加载器, 每次产出 `(索引, 加载结果)`.

use super::ImageSource;
use crate::data::FundusImage;
use crate::error::{SegError, SegResult};
use ndarray::{s, Array3, ArrayView2, Axis};
use std::path::{Path, PathBuf};

/// 掩码文件名构造器. 接受图像文件名主干和病灶名, 获得掩码文件名.
pub type MaskNameBuilder = fn(&str, &str) -> String;

/// 只有图像的数据集.
#[derive(Debug, Clone, Default)]
pub struct ImageDataset {
    paths: Vec<PathBuf>,
}

impl ImageDataset {
    /// 由图像源创建, 顺序不变.
    pub fn new(source: &ImageSource) -> Self {
        Self {
            paths: source.paths().to_vec(),
        }
    }

    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// 加载第 `idx` 个样本. 越界时程序 panic.
    pub fn get(&self, idx: usize) -> SegResult<FundusImage> {
        FundusImage::open(&self.paths[idx])
    }

    /// 按索引序迭代整个数据集.
    pub fn loader(&self) -> ImageLoader<'_> {
        ImageLoader {
            dataset: self,
            data_rev: (0..self.len()).rev().collect(),
        }
    }
}

/// [`ImageDataset`] 加载器.
#[derive(Debug)]
pub struct ImageLoader<'a> {
    dataset: &'a ImageDataset,
    data_rev: Vec<usize>,
}

impl Iterator for ImageLoader<'_> {
    type Item = (usize, SegResult<FundusImage>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.data_rev.pop()?;
        Some((idx, self.dataset.get(idx)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl ExactSizeIterator for ImageLoader<'_> {}

/// 带掩码的样本.
#[derive(Debug, Clone)]
pub struct LabeledSample {
    /// 输入图像.
    pub image: FundusImage,

    /// `(病灶数 + 1, H, W)` 的掩码. 通道 0 为背景 (`1 - Σ 病灶`), 之后依次为各病灶,
    /// 取值 `[0, 1]`.
    pub masks: Array3<f32>,
}

impl LabeledSample {
    /// 背景通道.
    #[inline]
    pub fn background(&self) -> ArrayView2<f32> {
        self.masks.index_axis(Axis(0), 0)
    }

    /// 第 `k` 个病灶 (从 0 开始) 的掩码. 越界时程序 panic.
    #[inline]
    pub fn lesion(&self, k: usize) -> ArrayView2<f32> {
        self.masks.index_axis(Axis(0), k + 1)
    }

    /// 病灶个数.
    #[inline]
    pub fn num_lesions(&self) -> usize {
        self.masks.len_of(Axis(0)) - 1
    }
}

/// 图像与逐病灶掩码组成的数据集. 某个病灶的掩码可以缺失, 此时视为全 0.
#[derive(Debug, Clone)]
pub struct MaskedDataset {
    images: Vec<PathBuf>,
    masks: Vec<Vec<Option<PathBuf>>>,
    num_lesions: usize,
}

impl MaskedDataset {
    /// 创建数据集. `masks[i]` 为第 `i` 张图像的各病灶掩码路径.
    ///
    /// 图像数与掩码组数不一致, 或任一掩码组长度不等于 `num_lesions` 时返回
    /// [`SegError::ShapeMismatch`].
    pub fn new(
        images: Vec<PathBuf>,
        masks: Vec<Vec<Option<PathBuf>>>,
        num_lesions: usize,
    ) -> SegResult<Self> {
        if images.len() != masks.len() {
            return Err(SegError::shape(
                "mask groups",
                &[images.len()],
                &[masks.len()],
            ));
        }
        if let Some(bad) = masks.iter().find(|m| m.len() != num_lesions) {
            return Err(SegError::shape(
                "lesion masks",
                &[num_lesions],
                &[bad.len()],
            ));
        }
        Ok(Self {
            images,
            masks,
            num_lesions,
        })
    }

    /// 从目录布局创建: 图像来自 `source`, 第 `k` 个病灶的掩码位于
    /// `<mask_root>/<lesions[k]>/<builder(图像主干, lesions[k])>`, 文件不存在即视为缺失.
    pub fn from_dirs<P: AsRef<Path>, S: AsRef<str>>(
        source: &ImageSource,
        mask_root: P,
        lesions: &[S],
        builder: MaskNameBuilder,
    ) -> Self {
        let mask_root = mask_root.as_ref();
        let images = source.paths().to_vec();
        let masks = images
            .iter()
            .map(|img| {
                let stem = img.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                lesions
                    .iter()
                    .map(|l| {
                        let p = mask_root.join(l.as_ref()).join(builder(stem, l.as_ref()));
                        p.is_file().then_some(p)
                    })
                    .collect()
            })
            .collect();
        Self {
            images,
            masks,
            num_lesions: lesions.len(),
        }
    }

    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 病灶个数.
    #[inline]
    pub fn num_lesions(&self) -> usize {
        self.num_lesions
    }

    /// 加载第 `idx` 个样本. 越界时程序 panic.
    ///
    /// 掩码取其第一个通道并除以 255. 掩码分辨率与图像不一致时返回
    /// [`SegError::ShapeMismatch`].
    pub fn get(&self, idx: usize) -> SegResult<LabeledSample> {
        let image = FundusImage::open(&self.images[idx])?;
        let (h, w) = image.shape();
        let mut masks = Array3::<f32>::zeros((self.num_lesions + 1, h, w));

        for (k, mask) in self.masks[idx].iter().enumerate() {
            let Some(path) = mask else {
                continue;
            };
            let m = image::open(path)
                .map_err(|e| SegError::io(path, e))?
                .to_rgb8();
            let found = (m.height() as usize, m.width() as usize);
            if found != (h, w) {
                return Err(SegError::shape("lesion mask", &[h, w], &[found.0, found.1]));
            }
            let mut plane = masks.index_axis_mut(Axis(0), k + 1);
            for ((y, x), v) in plane.indexed_iter_mut() {
                *v = f32::from(m.get_pixel(x as u32, y as u32)[0]) / 255.0;
            }
        }

        let lesion_sum = masks.slice(s![1.., .., ..]).sum_axis(Axis(0));
        masks
            .index_axis_mut(Axis(0), 0)
            .assign(&lesion_sum.mapv(|v| 1.0 - v));
        Ok(LabeledSample { image, masks })
    }

    /// 按索引序迭代整个数据集.
    pub fn loader(&self) -> MaskedLoader<'_> {
        MaskedLoader {
            dataset: self,
            data_rev: (0..self.len()).rev().collect(),
        }
    }
}

/// [`MaskedDataset`] 加载器.
#[derive(Debug)]
pub struct MaskedLoader<'a> {
    dataset: &'a MaskedDataset,
    data_rev: Vec<usize>,
}

impl Iterator for MaskedLoader<'_> {
    type Item = (usize, SegResult<LabeledSample>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.data_rev.pop()?;
        Some((idx, self.dataset.get(idx)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl ExactSizeIterator for MaskedLoader<'_> {}
