//! 分割评估指标.

use crate::error::{SegError, SegResult};
use ndarray::{ArrayView2, Zip};

/// 真值掩码的二值化阈值.
const TRUTH_THRESHOLD: f32 = 0.5;

/// Dice 系数 `2|A ∩ B| / (|A| + |B|)`.
///
/// `pred` 以 `threshold` 二值化 (`> threshold` 为前景), `truth` 以 0.5 二值化.
/// 二者都没有前景时定义为 1.0. 形状不一致时返回 [`SegError::ShapeMismatch`].
pub fn dice_coeff(
    pred: ArrayView2<f32>,
    truth: ArrayView2<f32>,
    threshold: f32,
) -> SegResult<f64> {
    if pred.shape() != truth.shape() {
        return Err(SegError::shape("dice inputs", pred.shape(), truth.shape()));
    }
    let (mut inter, mut total) = (0usize, 0usize);
    Zip::from(&pred).and(&truth).for_each(|&p, &t| {
        let (a, b) = (p > threshold, t > TRUTH_THRESHOLD);
        inter += usize::from(a && b);
        total += usize::from(a) + usize::from(b);
    });
    if total == 0 {
        return Ok(1.0);
    }
    Ok(2.0 * inter as f64 / total as f64)
}

/// 对一组 `(预测, 真值)` 求平均 Dice 系数. 空输入返回 `None`.
pub fn mean_dice<'a, I>(pairs: I, threshold: f32) -> SegResult<Option<f64>>
where
    I: IntoIterator<Item = (ArrayView2<'a, f32>, ArrayView2<'a, f32>)>,
{
    let (mut sum, mut n) = (0.0, 0usize);
    for (pred, truth) in pairs {
        sum += dice_coeff(pred, truth, threshold)?;
        n += 1;
    }
    Ok((n > 0).then(|| sum / n as f64))
}
