//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;

pub use crate::data::{
    mask_path, ChannelNorm, FundusImage, ImgWriteRaw, MaskWriter, PngMaskWriter, ScoreAssembler,
    ScoreTensor, TileGrid, TileSpec,
};
pub use crate::decode::{ClassDecoder, ProbabilityMap};
pub use crate::error::{SegError, SegResult};

pub use crate::consts::{LESIONS, NUM_CLASSES, TILE_SIZE};

pub use crate::dataset::{self, home_dataset_dir_with, ImageDataset, ImageSource, MaskedDataset};
pub use crate::metrics::dice_coeff;
pub use crate::model::{load_predictor, BoxedPredictor, Device, NetVariant, TilePredictor};
pub use crate::pipeline::{Pipeline, PipelineConfig, RunReport};
