#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供眼底彩照 (DiaRetDB1 / IDRiD 风格) 病灶分割的分块推理管线、
//! 概率图解码和数据集加载.
//!
//! 该 crate 只提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 网络的卷积拓扑不在本 crate 的范围内. 任何实现了 [`TilePredictor`] 的类型都可以接入管线;
//!   本 crate 自带两种可从 npz 权重恢复的分类头.
//! 2. 配置错误 (块边长为 0, 病灶名个数与类别数不符, 预测器输出形状不符) 会作为错误立即上报,
//!   不会被自动修正.
//!
//! # 开发计划
//!
//! ### 分块网格 ✅
//!
//! 将任意 `H × W` 的图像按行优先顺序划分为边长为 `T` 的分块, 末行/末列的分块被截断到图像边界.
//!
//! 实现位于 `retina-berry/src/data/tile.rs`.
//!
//! ### 分数拼装 ✅
//!
//! 将逐块预测的原始分数写回全分辨率张量. 块与块之间没有重叠, 也没有加权融合.
//!
//! 实现位于 `retina-berry/src/data/score.rs`.
//!
//! ### 病灶解码 ✅
//!
//! 沿类别轴做数值稳定的 softmax, 去掉首 (背景) 末 (其它) 两个通道,
//! 以截断方式量化为 8-bit 概率图.
//!
//! 实现位于 `retina-berry/src/decode.rs`.
//!
//! ### 概率图持久化 ✅
//!
//! 写入 `<输出目录>/<病灶>/image<NNN>.png`.
//!
//! 实现位于 `retina-berry/src/data/save.rs`.
//!
//! ### 数据集 & 预处理 ✅
//!
//! 1. 只有图像的数据集, 以及图像 + 逐病灶掩码的数据集. ✅
//! 2. 局部对比度增强预处理, 结果缓存到磁盘. ✅
//!
//! 实现位于 `retina-berry/src/dataset/*`.
//!
//! ### 网络变体 & 权重加载 ✅
//!
//! U-Net / HED 两种变体, npz 权重文件.
//!
//! 实现位于 `retina-berry/src/model/*`.
//!
//! ### 评估指标 ✅
//!
//! Dice 系数.
//!
//! ### GPU 推理 ⌛️
//!
//! [`Device`] 目前只有 CPU 一种.

/// 二维索引 `(h, w)`.
pub type Idx2d = (usize, usize);

pub mod consts;
/// 眼底图, 分块与分数张量等基础数据结构.
pub mod data;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod prelude;

pub use data::{
    FundusImage, MaskWriter, PngMaskWriter, ScoreAssembler, ScoreTensor, TileGrid, TileSpec,
};
pub use decode::{ClassDecoder, ProbabilityMap};
pub use error::{SegError, SegResult};
pub use model::{load_predictor, BoxedPredictor, Device, NetVariant, TilePredictor};
pub use pipeline::{Pipeline, PipelineConfig, RunReport};
