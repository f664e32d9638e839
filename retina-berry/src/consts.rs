//! 通用常量.

/// 病灶类别的短名, 顺序与网络输出的内部通道一一对应.
///
/// 依次为硬性渗出 (hard exudates), 出血 (haemorrhages), 微动脉瘤 (microaneurysms),
/// 软性渗出 (soft exudates).
pub const LESIONS: [&str; 4] = ["ex", "he", "ma", "se"];

/// 网络输出的通道数. 首通道为背景, 末通道为 "其它", 二者均不参与病灶输出.
pub const NUM_CLASSES: usize = LESIONS.len() + 2;

/// 分块推理的默认块边长. 与训练时网络的输入尺寸一致.
pub const TILE_SIZE: usize = 512;

/// 彩色眼底图的通道数.
pub const RGB_CHANNELS: usize = 3;

/// 输出文件中图像序号的位数. 序号以 0 补齐到该长度.
pub const IMAGE_ID_WIDTH: usize = 3;

/// 图像源可以识别的文件扩展名 (小写).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// ImageNet 统计量. 预训练骨干网络 (HED 变体) 要求输入按该统计量归一化.
pub mod imagenet {
    /// RGB 三通道均值.
    pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

    /// RGB 三通道标准差.
    pub const STD: [f32; 3] = [0.229, 0.224, 0.225];
}

/// 单通道灰度值.
pub mod gray {
    /// 掩码中的背景像素值.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 预处理增强时的中性灰.
    pub const NEUTRAL: u8 = 0b_1000_0000;

    /// 掩码中的前景像素值.
    pub const WHITE: u8 = 0b_1111_1111;
}
