use crate::consts::gray::NEUTRAL;
use crate::consts::{IMAGE_EXTENSIONS, IMAGE_ID_WIDTH};
use crate::error::{SegError, SegResult};
use image::{imageops, Rgb, RgbImage};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// 有序、有限、可重复迭代的图像路径序列.
///
/// 图像序号由路径在序列中的位置决定 (从 1 开始), 因此同一目录多次运行得到的输出命名一致.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSource {
    paths: Vec<PathBuf>,
}

/// 扩展名是否是可识别的图像格式?
fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl ImageSource {
    /// 列出 `dir` 下所有图像文件 (不递归), 按文件名排序.
    ///
    /// 目录无法读取时返回 [`SegError::IoFailure`].
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> SegResult<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| SegError::io(dir, e))? {
            let path = entry.map_err(|e| SegError::io(dir, e))?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort_unstable_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self { paths })
    }

    /// 按给定顺序使用 `paths`.
    pub fn from_paths<P: Into<PathBuf>, I: IntoIterator<Item = P>>(paths: I) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// 图像个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// 是否没有任何图像?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// 所有路径.
    #[inline]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// 按顺序迭代路径. 可以多次调用.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.paths.iter()
    }

    /// 按顺序迭代 `(图像序号, 路径)`, 序号从 1 开始.
    pub fn with_ids(&self) -> impl ExactSizeIterator<Item = (u32, &Path)> + '_ {
        self.paths
            .iter()
            .enumerate()
            .map(|(i, p)| (i as u32 + 1, p.as_path()))
    }

    /// 对每张图像做对比度增强 (见 [`enhance`]), 以 PNG 写入 `cache_dir`,
    /// 返回指向缓存文件的新序列, 顺序不变.
    ///
    /// 缓存文件名为 `<序号>_<源文件名>.png`, 同主干不同扩展名的源文件不会相互覆盖.
    /// 不早于源文件的缓存文件会被直接复用.
    ///
    /// 单张图像无法读取或写出时只输出警告, 新序列在该位置保留源路径,
    /// 错误留给推理阶段按图像上报. 只有缓存目录无法创建时返回错误.
    pub fn preprocess<P: AsRef<Path>>(&self, cache_dir: P) -> SegResult<Self> {
        let cache_dir = cache_dir.as_ref();
        fs::create_dir_all(cache_dir).map_err(|e| SegError::io(cache_dir, e))?;

        let mut paths = Vec::with_capacity(self.len());
        let mut enhanced = 0usize;
        for (id, src) in self.with_ids() {
            let dst = cache_dir.join(cache_name(id, src));
            if is_fresh(src, &dst) {
                log::debug!("Reusing preprocessed {}", dst.display());
            } else if let Err(e) = enhance_file(src, &dst) {
                log::warn!("Image #{id} not preprocessed, keeping the source: {e}");
                paths.push(src.to_owned());
                continue;
            } else {
                log::debug!("Preprocessed {} -> {}", src.display(), dst.display());
            }
            enhanced += 1;
            paths.push(dst);
        }
        log::info!(
            "{enhanced} of {} images preprocessed into {}",
            paths.len(),
            cache_dir.display()
        );
        Ok(Self { paths })
    }
}

/// 第 `id` 张图像 `src` 的缓存文件名.
fn cache_name(id: u32, src: &Path) -> OsString {
    let mut name = OsString::from(format!("{id:0width$}_", width = IMAGE_ID_WIDTH));
    name.push(src.file_name().unwrap_or(src.as_os_str()));
    name.push(".png");
    name
}

/// 缓存文件 `dst` 存在且不早于源文件 `src`?
fn is_fresh(src: &Path, dst: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(src), modified(dst)) {
        (Some(s), Some(d)) => d >= s,
        _ => false,
    }
}

/// 读取 `src`, 增强后写入 `dst`.
fn enhance_file(src: &Path, dst: &Path) -> SegResult<()> {
    let img = image::open(src).map_err(|e| SegError::io(src, e))?;
    enhance(&img.to_rgb8())
        .save(dst)
        .map_err(|e| SegError::io(dst, e))
}

impl<'a> IntoIterator for &'a ImageSource {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 眼底图局部对比度增强: `4 · I - 4 · blur(I, σ) + 128`, 逐通道截断到 `[0, 255]`.
///
/// `σ` 取图像宽度的 1/30 (至少为 1). 增强后光照不均被抑制, 小病灶的边缘更清晰.
pub fn enhance(img: &RgbImage) -> RgbImage {
    let sigma = (img.width() as f32 / 30.0).max(1.0);
    let blurred = imageops::blur(img, sigma);
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let (a, b) = (img.get_pixel(x, y), blurred.get_pixel(x, y));
        let px = |c: usize| {
            let v = 4 * i32::from(a[c]) - 4 * i32::from(b[c]) + i32::from(NEUTRAL);
            v.clamp(0, 255) as u8
        };
        Rgb([px(0), px(1), px(2)])
    })
}
