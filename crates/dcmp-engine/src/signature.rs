//! 像素签名引擎
//!
//! 由解码后的像素数组计算两类签名：
//! - 内容哈希：对原生字节做128位摘要，字节完全一致才相等；
//! - 统计指纹：形状、均值、标准差、极值、中位数与50区间直方图，容忍位深/字节序等编码差异。

use dcmp_core::{CompareError, Instance, PixelArray, PixelDecoder, Result};
use serde::Serialize;

/// 直方图区间数
pub const HISTOGRAM_BINS: usize = 50;

/// 128位像素内容摘要
pub type ContentHash = [u8; 16];

/// 像素统计指纹
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelFingerprint {
    pub shape: Vec<usize>,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub histogram: Vec<u64>,
}

/// 指纹比较阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerprintTolerance {
    /// 各统计量允许的绝对误差
    pub stat_tolerance: f64,
    /// 直方图皮尔逊相关系数须严格大于该值
    pub min_correlation: f64,
}

impl Default for FingerprintTolerance {
    fn default() -> Self {
        Self {
            stat_tolerance: 1e-6,
            min_correlation: 0.999,
        }
    }
}

/// 计算像素数组的内容哈希
pub fn content_hash(pixels: &PixelArray) -> ContentHash {
    md5::compute(pixels.bytes()).0
}

/// 解码实例并计算内容哈希
pub fn hash_instance(decoder: &dyn PixelDecoder, instance: &Instance) -> Result<ContentHash> {
    let pixels = decoder.decode(instance)?;
    Ok(content_hash(&pixels))
}

/// 解码实例并计算统计指纹
pub fn fingerprint_instance(decoder: &dyn PixelDecoder, instance: &Instance) -> Result<PixelFingerprint> {
    let pixels = decoder.decode(instance)?;
    PixelFingerprint::from_pixels(&pixels)
        .ok_or_else(|| CompareError::pixel_unavailable(&instance.sop_instance_uid, "像素数组为空"))
}

/// 哈希的十六进制表示
pub fn hash_hex(hash: &ContentHash) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

impl PixelFingerprint {
    /// 由像素数组计算指纹，空数组返回 `None`
    pub fn from_pixels(pixels: &PixelArray) -> Option<Self> {
        let samples = pixels.samples();
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            shape: pixels.shape().to_vec(),
            mean,
            std: variance.sqrt(),
            min,
            max,
            median: median(samples),
            histogram: histogram(samples, min, max),
        })
    }

    /// 用于查找表的粗粒度键 (不同图像可能冲突)
    pub fn lookup_key(&self) -> String {
        let shape = self
            .shape
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x");
        format!("{}_{:.3}_{:.3}_{:?}_{:?}", shape, self.mean, self.std, self.min, self.max)
    }
}

fn median(samples: &[f64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// 等宽直方图，范围为 [min, max]；min == max 时范围扩展为 [min-0.5, max+0.5]
fn histogram(samples: &[f64], min: f64, max: f64) -> Vec<u64> {
    let (lo, hi) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };
    let width = hi - lo;
    let edges: Vec<f64> = (0..=HISTOGRAM_BINS)
        .map(|i| lo + width * i as f64 / HISTOGRAM_BINS as f64)
        .collect();

    let mut counts = vec![0u64; HISTOGRAM_BINS];
    for &value in samples {
        if value < lo || value > hi {
            continue;
        }
        let mut index = (((value - lo) / width) * HISTOGRAM_BINS as f64) as usize;
        index = index.min(HISTOGRAM_BINS - 1);
        // 浮点误差修正，保证 edges[i] <= value < edges[i+1]
        if index > 0 && value < edges[index] {
            index -= 1;
        } else if index + 1 < HISTOGRAM_BINS && value >= edges[index + 1] {
            index += 1;
        }
        counts[index] += 1;
    }
    counts
}

/// 皮尔逊相关系数，零方差时为 NaN
fn pearson(a: &[u64], b: &[u64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }

    let n = a.len() as f64;
    let mean_a = a.iter().map(|v| *v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|v| *v as f64).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = *x as f64 - mean_a;
        let dy = *y as f64 - mean_b;
        covariance += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    (covariance / (var_a * var_b).sqrt()).clamp(-1.0, 1.0)
}

/// 判断两个指纹是否代表同一幅图像 (默认阈值)
pub fn fingerprints_match(a: &PixelFingerprint, b: &PixelFingerprint) -> bool {
    fingerprints_match_with(a, b, &FingerprintTolerance::default())
}

/// 判断两个指纹是否代表同一幅图像
///
/// 形状必须完全一致；各统计量在绝对误差内一致；直方图相关系数严格大于阈值且不为NaN。
pub fn fingerprints_match_with(a: &PixelFingerprint, b: &PixelFingerprint, tolerance: &FingerprintTolerance) -> bool {
    if a.shape != b.shape {
        return false;
    }

    let stats = [
        (a.mean, b.mean),
        (a.std, b.std),
        (a.min, b.min),
        (a.max, b.max),
        (a.median, b.median),
    ];
    if stats.iter().any(|(x, y)| (x - y).abs() > tolerance.stat_tolerance) {
        return false;
    }

    let correlation = pearson(&a.histogram, &b.histogram);
    !correlation.is_nan() && correlation > tolerance.min_correlation
}
