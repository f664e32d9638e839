//! 分块推理管线.
//!
//! 对每张图像: 加载, (按网络变体) 归一化, 划分分块网格, 逐块预测并拼装分数张量,
//! 解码为病灶概率图, 交给 [`MaskWriter`] 持久化. 单张图像内的分块严格按行优先顺序处理;
//! 图像之间可以以图像为粒度并行, 序号在分发前就已确定.

use crate::consts::{LESIONS, TILE_SIZE};
use crate::data::{FundusImage, MaskWriter, ScoreAssembler, ScoreTensor, TileGrid};
use crate::dataset::ImageSource;
use crate::decode::{ClassDecoder, ProbabilityMap};
use crate::error::{SegError, SegResult};
use crate::model::{Device, NetVariant, TilePredictor};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// 管线配置.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// 分块边长.
    pub tile_size: usize,

    /// 网络变体. 决定推理前的归一化方式.
    pub variant: NetVariant,

    /// 推理设备.
    pub device: Device,

    /// 病灶名列表, 与网络的中间输出通道一一对应.
    pub lesions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            variant: NetVariant::default(),
            device: Device::default(),
            lesions: LESIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 分块推理管线.
#[derive(Debug)]
pub struct Pipeline<P> {
    config: PipelineConfig,
    predictor: P,
    decoder: ClassDecoder,
}

impl<P: TilePredictor> Pipeline<P> {
    /// 创建管线.
    ///
    /// 块边长为 0 时返回 [`SegError::InvalidTileSize`];
    /// 病灶名个数不等于 `predictor.num_classes() - 2` 时返回 [`SegError::ShapeMismatch`].
    pub fn new(config: PipelineConfig, predictor: P) -> SegResult<Self> {
        if config.tile_size == 0 {
            return Err(SegError::InvalidTileSize {
                tile: config.tile_size,
            });
        }
        let decoder = ClassDecoder::new(config.lesions.iter().cloned());
        decoder.check(predictor.num_classes())?;
        log::debug!(
            "Pipeline ready: {} net on {}, tile {}, lesions {:?}",
            config.variant,
            config.device,
            config.tile_size,
            config.lesions
        );
        Ok(Self {
            config,
            predictor,
            decoder,
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 预测器.
    #[inline]
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// 解码器.
    #[inline]
    pub fn decoder(&self) -> &ClassDecoder {
        &self.decoder
    }

    /// 按网络变体对图像做推理前的归一化.
    pub fn prepare(&self, image: &mut FundusImage) {
        if let Some(norm) = self.config.variant.normalization() {
            image.normalize(&norm);
        }
    }

    /// 对已经准备好的图像做分块推理, 返回与图像同分辨率的分数张量.
    ///
    /// 任何一块预测失败或输出形状不符, 整张图像即告失败.
    pub fn infer(&self, image: &FundusImage) -> SegResult<ScoreTensor> {
        let grid = TileGrid::new(image.shape(), self.config.tile_size)?;
        let num_tiles = grid.len();
        let mut assembler = ScoreAssembler::new(self.predictor.num_classes(), image.shape());

        for tile in grid {
            let scores = self.predictor.predict(image.crop(&tile))?;
            assembler.write(&tile, scores.view())?;
            log::debug!(
                "Tile {}/{num_tiles}: rows {:?}, cols {:?}",
                assembler.written(),
                tile.rows(),
                tile.cols()
            );
        }
        Ok(assembler.finish())
    }

    /// 准备, 推理并解码一张图像.
    pub fn segment(&self, mut image: FundusImage) -> SegResult<Vec<(String, ProbabilityMap)>> {
        self.prepare(&mut image);
        let scores = self.infer(&image)?;
        self.decoder.decode(&scores)
    }

    /// 端到端处理 `path` 处的图像, 以 `id` 为序号写出所有病灶概率图.
    ///
    /// 所有概率图解码完成后才开始写出. 某个病灶写出失败时, 该图像已写出的概率图会通过
    /// [`MaskWriter::discard`] 撤销, 然后返回写出错误.
    pub fn run_image<W: MaskWriter + ?Sized>(
        &self,
        id: u32,
        path: &Path,
        writer: &W,
    ) -> SegResult<()> {
        let image = FundusImage::open(path)?;
        let (h, w) = image.shape();
        log::info!("Image #{id}: {} ({h} x {w})", path.display());
        let maps = self.segment(image)?;
        for (k, (lesion, map)) in maps.iter().enumerate() {
            if let Err(e) = writer.write(id, lesion, map) {
                for (done, _) in maps[..k].iter() {
                    if let Err(d) = writer.discard(id, done) {
                        log::warn!("Image #{id}: cannot discard `{done}`: {d}");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// 顺序处理 `source` 中的所有图像, 序号从 1 开始.
    ///
    /// 单张图像失败不会中止运行; 每个错误都被记录在返回的 [`RunReport`] 中.
    pub fn run<W: MaskWriter + ?Sized>(&self, source: &ImageSource, writer: &W) -> RunReport {
        let mut report = RunReport::default();
        for (id, path) in source.with_ids() {
            report.record(id, path, self.run_image(id, path, writer));
        }
        report
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        impl<P: TilePredictor + Sync> Pipeline<P> {
            /// 以 `batch_size` 张为一批处理 `source`. 同一批内的图像借助 `rayon` 并行处理,
            /// 序号在分发前按源顺序确定, 与 [`Pipeline::run`] 完全一致.
            pub fn run_batched<W: MaskWriter + Sync + ?Sized>(
                &self,
                source: &ImageSource,
                writer: &W,
                batch_size: NonZeroUsize,
            ) -> RunReport {
                let items: Vec<(u32, &Path)> = source.with_ids().collect();
                let mut report = RunReport::default();
                for batch in items.chunks(batch_size.get()) {
                    let results: Vec<_> = batch
                        .par_iter()
                        .map(|&(id, path)| (id, path, self.run_image(id, path, writer)))
                        .collect();
                    for (id, path, r) in results {
                        report.record(id, path, r);
                    }
                }
                report
            }
        }
    } else {
        impl<P: TilePredictor + Sync> Pipeline<P> {
            /// 以 `batch_size` 张为一批处理 `source`. 未启用 `rayon` 时与 [`Pipeline::run`]
            /// 相同.
            pub fn run_batched<W: MaskWriter + Sync + ?Sized>(
                &self,
                source: &ImageSource,
                writer: &W,
                batch_size: NonZeroUsize,
            ) -> RunReport {
                log::debug!("Batch size {batch_size} ignored without `rayon`");
                self.run(source, writer)
            }
        }
    }
}

/// 处理失败的图像.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FailedImage {
    /// 图像序号.
    pub id: u32,

    /// 源路径.
    pub path: PathBuf,

    /// 失败原因.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_display"))]
    pub error: SegError,
}

#[cfg(feature = "serde")]
fn serialize_display<S: serde::Serializer>(e: &SegError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

/// 一次运行的结果. 按序号升序记录成功和失败的图像.
#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RunReport {
    succeeded: Vec<u32>,
    failed: Vec<FailedImage>,
}

impl RunReport {
    /// 记录一张图像的结果. 失败时输出警告日志.
    pub fn record(&mut self, id: u32, path: &Path, result: SegResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(error) => {
                log::warn!("Image #{id} ({}) failed: {error}", path.display());
                self.failed.push(FailedImage {
                    id,
                    path: path.to_owned(),
                    error,
                });
            }
        }
    }

    /// 成功图像的序号.
    #[inline]
    pub fn succeeded(&self) -> &[u32] {
        &self.succeeded
    }

    /// 失败的图像.
    #[inline]
    pub fn failed(&self) -> &[FailedImage] {
        &self.failed
    }

    /// 处理过的图像总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// 是否所有图像都成功了?
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineConfig};
    use crate::consts::NUM_CLASSES;
    use crate::data::{mask_path, FundusImage, MaskWriter, PngMaskWriter};
    use crate::dataset::ImageSource;
    use crate::decode::ProbabilityMap;
    use crate::error::{SegError, SegResult};
    use crate::model::{NetVariant, TilePredictor};
    use image::{Rgb, RgbImage};
    use itertools::iproduct;
    use ndarray::{Array3, ArrayView3};
    use std::num::NonZeroUsize;
    use std::path::Path;
    use std::sync::Mutex;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    /// 所有分数恒为 0.
    #[derive(Debug)]
    struct Zeros;

    impl TilePredictor for Zeros {
        fn num_classes(&self) -> usize {
            NUM_CLASSES
        }

        fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
            let (_, h, w) = tile.dim();
            Ok(Array3::zeros((NUM_CLASSES, h, w)))
        }
    }

    /// 输出 `10 · tile[0, 0, 0] + k`, 并记录每次调用的分块尺寸.
    #[derive(Debug, Default)]
    struct TileEcho {
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl TilePredictor for TileEcho {
        fn num_classes(&self) -> usize {
            NUM_CLASSES
        }

        fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
            let (_, h, w) = tile.dim();
            self.calls.lock().unwrap().push((h, w));
            let base = tile[(0, 0, 0)] * 10.0;
            Ok(Array3::from_shape_fn((NUM_CLASSES, h, w), |(k, _, _)| {
                base + k as f32
            }))
        }
    }

    /// 输出少一列.
    #[derive(Debug)]
    struct Narrow;

    impl TilePredictor for Narrow {
        fn num_classes(&self) -> usize {
            NUM_CLASSES
        }

        fn predict(&self, tile: ArrayView3<f32>) -> SegResult<Array3<f32>> {
            let (_, h, w) = tile.dim();
            Ok(Array3::zeros((NUM_CLASSES, h, w.saturating_sub(1))))
        }
    }

    /// 将写入请求记录在内存中.
    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(u32, String)>>,
    }

    impl MaskWriter for Recorder {
        fn write(&self, id: u32, lesion: &str, _map: &ProbabilityMap) -> SegResult<()> {
            self.writes.lock().unwrap().push((id, lesion.to_string()));
            Ok(())
        }
    }

    /// 写到 `ma` 时失败, 并记录写入与撤销.
    #[derive(Default)]
    struct FailOnMa {
        written: Mutex<Vec<String>>,
        discarded: Mutex<Vec<String>>,
    }

    impl MaskWriter for FailOnMa {
        fn write(&self, _id: u32, lesion: &str, _map: &ProbabilityMap) -> SegResult<()> {
            if lesion == "ma" {
                return Err(SegError::io(lesion, std::io::Error::other("disk full")));
            }
            self.written.lock().unwrap().push(lesion.to_string());
            Ok(())
        }

        fn discard(&self, _id: u32, lesion: &str) -> SegResult<()> {
            self.discarded.lock().unwrap().push(lesion.to_string());
            Ok(())
        }
    }

    fn config(tile_size: usize) -> PipelineConfig {
        PipelineConfig {
            tile_size,
            ..Default::default()
        }
    }

    fn write_rgb(p: &Path, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([30, 60, 90])).save(p).unwrap();
    }

    #[test]
    fn test_new_validates_config() {
        assert!(Pipeline::new(PipelineConfig::default(), Zeros).is_ok());

        let err = Pipeline::new(config(0), Zeros).unwrap_err();
        assert!(matches!(err, SegError::InvalidTileSize { tile: 0 }));
        assert!(!err.to_string().contains("height"));

        let three = PipelineConfig {
            lesions: vec!["ex".into(), "he".into(), "ma".into()],
            ..Default::default()
        };
        let err = Pipeline::new(three, Zeros).unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { what: "lesion names", .. }));
    }

    #[test]
    fn test_zero_scores_decode_uniformly() {
        let p = Pipeline::new(config(16), Zeros).unwrap();
        let image = FundusImage::from_array(Array3::from_elem((3, 20, 37), 0.5)).unwrap();
        let maps = p.segment(image).unwrap();
        let names: Vec<_> = maps.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["ex", "he", "ma", "se"]);
        for (_, m) in maps.iter() {
            assert_eq!(m.dim(), (20, 37));
            // 1/6 * 255 = 42.5 -> 42.
            assert!(m.array_view().iter().all(|&v| v == 42));
        }
    }

    #[test]
    fn test_infer_assembles_tiles_in_place() {
        let (tile, tiles_per_row) = (512, 2);
        let image = FundusImage::from_array(Array3::from_shape_fn((3, 1024, 600), |(_, y, x)| {
            ((y / tile) * tiles_per_row + x / tile) as f32 / 10.0
        }))
        .unwrap();
        let p = Pipeline::new(config(tile), TileEcho::default()).unwrap();
        let scores = p.infer(&image).unwrap();
        assert_eq!(scores.num_classes(), NUM_CLASSES);
        assert_eq!(scores.shape(), (1024, 600));

        let calls = p.predictor().calls.lock().unwrap().clone();
        assert_eq!(calls, [(512, 512), (512, 88), (512, 512), (512, 88)]);

        // 采样检查: 每个像素的分数来自且仅来自包含它的分块.
        let v = scores.array_view();
        for (y, x) in iproduct!((0..1024).step_by(7), (0..600).step_by(5)) {
            let idx = ((y / tile) * tiles_per_row + x / tile) as f32;
            for k in [0, NUM_CLASSES - 1] {
                assert!(f32_eq(v[(k, y, x)], idx + k as f32), "({k}, {y}, {x})");
            }
        }
        for (y, x) in [(511, 511), (511, 512), (512, 511), (512, 512), (1023, 599)] {
            let idx = ((y / tile) * tiles_per_row + x / tile) as f32;
            assert!(f32_eq(v[(0, y, x)], idx));
        }
    }

    #[test]
    fn test_infer_rejects_bad_tile_output() {
        let p = Pipeline::new(config(8), Narrow).unwrap();
        let image = FundusImage::from_array(Array3::zeros((3, 10, 10))).unwrap();
        let err = p.infer(&image).unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { what: "tile scores", .. }));
    }

    #[test]
    fn test_prepare_hednet_normalizes() {
        let cfg = PipelineConfig {
            variant: NetVariant::HedNet,
            ..config(8)
        };
        let p = Pipeline::new(cfg, Zeros).unwrap();
        let mut image = FundusImage::from_array(Array3::from_elem((3, 2, 2), 0.5)).unwrap();
        p.prepare(&mut image);
        let mean = image.channel_mean();
        // (0.5 - 0.485) / 0.229
        assert!(f32_eq(mean[0], (0.5 - 0.485) / 0.229));

        let p = Pipeline::new(config(8), Zeros).unwrap();
        let mut image = FundusImage::from_array(Array3::from_elem((3, 2, 2), 0.5)).unwrap();
        p.prepare(&mut image);
        assert!(f32_eq(image.channel_mean()[0], 0.5));
    }

    #[test]
    fn test_run_writes_masks_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        write_rgb(&images.join("a.png"), 30, 20);
        std::fs::write(images.join("b.png"), b"not a png").unwrap();
        write_rgb(&images.join("c.jpg"), 17, 9);

        let out = dir.path().join("out");
        let p = Pipeline::new(config(16), Zeros).unwrap();
        let writer = PngMaskWriter::create(&out, &p.config().lesions).unwrap();
        let source = ImageSource::from_dir(&images).unwrap();
        let report = p.run(&source, &writer);

        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded(), [1, 3]);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].id, 2);
        assert!(report.failed()[0].error.is_per_image());
        assert!(!report.is_success());

        for lesion in ["ex", "he", "ma", "se"] {
            assert!(!mask_path(&out, lesion, 2).exists());
            let m = image::open(mask_path(&out, lesion, 3)).unwrap().to_luma8();
            assert_eq!(m.dimensions(), (17, 9));
            assert!(m.pixels().all(|p| p[0] == 42));
        }
        assert!(mask_path(&out, "ex", 1).is_file());
    }

    #[test]
    fn test_run_batched_matches_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_rgb(&dir.path().join(format!("img{i}.png")), 12, 10);
        }
        let source = ImageSource::from_dir(dir.path()).unwrap();
        let p = Pipeline::new(config(8), Zeros).unwrap();

        let sequential = Recorder::default();
        let a = p.run(&source, &sequential);
        let batched = Recorder::default();
        let b = p.run_batched(&source, &batched, NonZeroUsize::new(2).unwrap());

        assert_eq!(a.succeeded(), [1, 2, 3, 4, 5]);
        assert_eq!(b.succeeded(), a.succeeded());

        let mut x = sequential.writes.into_inner().unwrap();
        let mut y = batched.writes.into_inner().unwrap();
        assert_eq!(x.len(), 5 * 4);
        x.sort();
        y.sort();
        assert_eq!(x, y);
    }

    #[test]
    fn test_run_image_write_failure_discards_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("a.png");
        write_rgb(&img, 12, 10);

        let p = Pipeline::new(config(8), Zeros).unwrap();
        let writer = FailOnMa::default();
        let err = p.run_image(1, &img, &writer).unwrap_err();
        assert!(err.is_per_image());
        assert_eq!(*writer.written.lock().unwrap(), ["ex", "he"]);
        assert_eq!(*writer.discarded.lock().unwrap(), ["ex", "he"]);
    }

    #[test]
    fn test_preprocessed_unreadable_image_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        write_rgb(&images.join("a.png"), 20, 16);
        std::fs::write(images.join("b.png"), b"not a png").unwrap();
        write_rgb(&images.join("c.png"), 20, 16);

        let source = ImageSource::from_dir(&images)
            .unwrap()
            .preprocess(dir.path().join("cache"))
            .unwrap();
        assert_eq!(source.len(), 3);

        let out = dir.path().join("out");
        let p = Pipeline::new(config(16), Zeros).unwrap();
        let writer = PngMaskWriter::create(&out, &p.config().lesions).unwrap();
        let report = p.run(&source, &writer);
        assert_eq!(report.succeeded(), [1, 3]);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].id, 2);
        assert_eq!(report.failed()[0].path, images.join("b.png"));
        assert!(mask_path(&out, "se", 3).is_file());
    }
}
