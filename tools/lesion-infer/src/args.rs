//! 命令行参数.

use clap::Parser;
use log::LevelFilter;
use retina_berry::consts::TILE_SIZE;
use retina_berry::NetVariant;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// 对眼底彩照做分块推理, 输出逐病灶概率图.
#[derive(Debug, Parser)]
#[command(name = "lesion-infer", version, about)]
pub struct Args {
    /// 每批并行处理的图像数.
    #[arg(short, long, default_value = "2")]
    pub batch_size: NonZeroUsize,

    /// 输出目录. 每个病灶一个子目录.
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// npz 权重文件.
    #[arg(short, long, default_value = "MODEL.npz")]
    pub model: PathBuf,

    /// 网络变体: unet 或 hednet.
    #[arg(short, long = "net-name", default_value = "unet")]
    pub net_name: NetVariant,

    /// 推理前先做局部对比度增强, 结果缓存在 `<输出目录>/preprocessed`.
    #[arg(short = 'g', long)]
    pub preprocess: bool,

    /// 图像目录. 缺省时依次尝试 `$DIARETDB_IMAGE_DIR` 和 `$HOME/dataset/diaretdb1/images`.
    #[arg(short, long)]
    pub image_dir: Option<PathBuf>,

    /// 分块边长.
    #[arg(short, long, default_value_t = TILE_SIZE)]
    pub tile_size: usize,

    /// 日志详细程度. `-v` 为 debug, `-vv` 为 trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// 日志级别.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
