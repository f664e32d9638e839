//! 病灶概率图的持久化存储.

use crate::consts::IMAGE_ID_WIDTH;
use crate::decode::ProbabilityMap;
use crate::error::{SegError, SegResult};
use image::ImageResult;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

/// 表明一个可以通过 **按原样** 模式持久化存储的单通道图像对象.
///
/// 像素值直接作为 8-bit 灰度保存, 不做任何可视化映射.
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

macro_rules! impl_gray_raw {
    ($($map: ty),+) => {
        $(
            /// 按原样存储.
            impl ImgWriteRaw for $map {
                fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    let (height, width) = self.dim();
                    let mut buf = image::GrayImage::new(width as u32, height as u32);
                    for ((h, w), &pix) in self.indexed_iter() {
                        buf.put_pixel(w as u32, h as u32, image::Luma([pix]));
                    }
                    buf.save(path)
                }
            }
        )+
    };
}

impl_gray_raw!(ProbabilityMap, Array2<u8>);

/// 第 `id` 张图像的 `lesion` 概率图的输出路径: `<output_dir>/<lesion>/image<NNN>.png`.
///
/// `NNN` 为以 0 补齐到 3 位的图像序号. 序号超过 999 时按实际位数输出.
pub fn mask_path<P: AsRef<Path>>(output_dir: P, lesion: &str, id: u32) -> PathBuf {
    let mut ans = output_dir.as_ref().to_owned();
    ans.push(lesion);
    ans.push(format!("image{id:0width$}.png", width = IMAGE_ID_WIDTH));
    ans
}

/// 病灶概率图的接收方.
pub trait MaskWriter {
    /// 持久化第 `id` 张图像的 `lesion` 概率图.
    fn write(&self, id: u32, lesion: &str, map: &ProbabilityMap) -> SegResult<()>;

    /// 撤销第 `id` 张图像 `lesion` 概率图的写入. 用于同一图像后续写入失败时清理,
    /// 使每张图像的输出要么完整, 要么不存在. 默认什么也不做.
    fn discard(&self, id: u32, lesion: &str) -> SegResult<()> {
        let _ = (id, lesion);
        Ok(())
    }
}

/// 将概率图以 8-bit 灰度 PNG 写入 `<output_dir>/<lesion>/image<NNN>.png`.
#[derive(Debug, Clone)]
pub struct PngMaskWriter {
    output_dir: PathBuf,
}

impl PngMaskWriter {
    /// 在写入任何文件之前, 创建 `output_dir` 以及每个病灶的子目录.
    ///
    /// 目录已存在时不会报错.
    pub fn create<P, I, S>(output_dir: P, lesions: I) -> SegResult<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let output_dir = output_dir.as_ref().to_owned();
        for lesion in lesions {
            let dir = output_dir.join(lesion.as_ref());
            fs::create_dir_all(&dir).map_err(|e| SegError::io(&dir, e))?;
        }
        // 病灶列表为空时也要保证输出目录存在.
        fs::create_dir_all(&output_dir).map_err(|e| SegError::io(&output_dir, e))?;
        Ok(Self { output_dir })
    }

    /// 输出根目录.
    #[inline]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl MaskWriter for PngMaskWriter {
    fn write(&self, id: u32, lesion: &str, map: &ProbabilityMap) -> SegResult<()> {
        let path = mask_path(&self.output_dir, lesion, id);
        map.save_raw(&path).map_err(|e| SegError::io(&path, e))
    }

    fn discard(&self, id: u32, lesion: &str) -> SegResult<()> {
        let path = mask_path(&self.output_dir, lesion, id);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SegError::io(&path, e)),
            _ => Ok(()),
        }
    }
}
