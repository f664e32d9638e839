//! 程序运行函数.

use crate::args::Args;
use crate::result::InferResult;
use anyhow::{Context, Result};
use retina_berry::dataset::ImageSource;
use retina_berry::{load_predictor, Device, Pipeline, PipelineConfig, PngMaskWriter};
use std::time::Instant;
use utils::loader;

/// 预处理缓存所在的子目录.
const PREPROCESSED_DIR: &str = "preprocessed";

/// 实际运行.
///
/// 权重无法加载时, 在处理任何图像之前返回错误.
pub fn run(args: &Args) -> Result<InferResult> {
    let predictor = load_predictor(args.net_name, &args.model, Device::Cpu)
        .with_context(|| format!("loading `{}` model", args.net_name))?;

    let image_dir = match &args.image_dir {
        Some(d) => d.clone(),
        None => loader::image_dir_from_env_or_home()
            .context("cannot locate the home directory, pass `--image-dir`")?,
    };
    let mut source = ImageSource::from_dir(&image_dir)
        .with_context(|| format!("listing images in {}", image_dir.display()))?;
    if source.is_empty() {
        log::warn!("No images found in {}", image_dir.display());
    }
    if args.preprocess {
        source = source
            .preprocess(args.output_dir.join(PREPROCESSED_DIR))
            .context("preprocessing images")?;
    }

    let config = PipelineConfig {
        tile_size: args.tile_size,
        variant: args.net_name,
        ..Default::default()
    };
    let pipeline = Pipeline::new(config, predictor)?;
    let writer = PngMaskWriter::create(&args.output_dir, &pipeline.config().lesions)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(utils::cpus().min(args.batch_size.get()))
        .build()?;

    utils::sep();
    log::info!(
        "Running {} images from {} with batch size {}...",
        source.len(),
        image_dir.display(),
        args.batch_size
    );
    let start = Instant::now();
    let report = pool.install(|| pipeline.run_batched(&source, &writer, args.batch_size));
    Ok(InferResult::new(report, start.elapsed(), args.output_dir.clone()))
}
