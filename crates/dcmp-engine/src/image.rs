//! 像素容差比对
//!
//! 按SOP Instance UID对应实例，逐像素比较解码后的图像。可选地先应用
//! Rescale Slope/Intercept 与窗宽窗位，再在容差内判断是否一致。

use chrono::{DateTime, Utc};
use dcmp_core::{Instance, InstanceRef, PixelArray, PixelDecoder, StudySet};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// 图像比对结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageDifferenceType {
    ExactMatch,
    PixelValueDiff,
    DimensionDiff,
    MissingPixelData,
}

impl ImageDifferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDifferenceType::ExactMatch => "EXACT_MATCH",
            ImageDifferenceType::PixelValueDiff => "PIXEL_VALUE_DIFF",
            ImageDifferenceType::DimensionDiff => "DIMENSION_DIFF",
            ImageDifferenceType::MissingPixelData => "MISSING_PIXEL_DATA",
        }
    }
}

/// 单幅图像的统计信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageStats {
    pub shape: Vec<usize>,
    pub min_value: f64,
    pub max_value: f64,
    pub mean_value: f64,
    pub has_pixel_data: bool,
    pub bits_allocated: Option<f64>,
    pub photometric_interpretation: Option<String>,
}

impl ImageStats {
    fn missing() -> Self {
        Self {
            shape: Vec::new(),
            min_value: 0.0,
            max_value: 0.0,
            mean_value: 0.0,
            has_pixel_data: false,
            bits_allocated: None,
            photometric_interpretation: None,
        }
    }

    fn of(shape: &[usize], values: &[f64], instance: &Instance) -> Self {
        let n = values.len().max(1) as f64;
        Self {
            shape: shape.to_vec(),
            min_value: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_value: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_value: values.iter().sum::<f64>() / n,
            has_pixel_data: true,
            bits_allocated: instance.tag("BitsAllocated").and_then(|v| v.first_f64()),
            photometric_interpretation: instance.text_tag("PhotometricInterpretation").map(str::to_string),
        }
    }
}

/// 一对实例的图像比对结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageComparisonResult {
    pub sop_instance_uid: String,
    pub baseline_file: String,
    pub comparison_file: String,
    pub is_exact_match: bool,
    pub difference_type: ImageDifferenceType,
    /// 0.0 - 1.0
    pub similarity_score: f64,
    pub pixel_differences: Option<usize>,
    pub max_difference: Option<f64>,
    pub mean_difference: Option<f64>,
    pub rmse: Option<f64>,
    pub baseline_stats: ImageStats,
    pub comparison_stats: ImageStats,
    pub normalization_applied: bool,
    pub tolerance_used: f64,
}

/// 一个对比文件的图像比对结果
#[derive(Debug, Clone, Serialize)]
pub struct ImageFileComparisonResult {
    pub baseline_file: String,
    pub comparison_file: String,
    pub image_comparisons: Vec<ImageComparisonResult>,
    pub missing_instances: Vec<InstanceRef>,
    pub extra_instances: Vec<InstanceRef>,
    pub total_instances_baseline: usize,
    pub total_instances_comparison: usize,
    pub tolerance_used: f64,
}

impl ImageFileComparisonResult {
    pub fn exact_matches(&self) -> usize {
        self.image_comparisons.iter().filter(|c| c.is_exact_match).count()
    }

    pub fn pixel_differences(&self) -> usize {
        self.image_comparisons.len() - self.exact_matches()
    }

    pub fn average_similarity(&self) -> f64 {
        if self.image_comparisons.is_empty() {
            return 0.0;
        }
        self.image_comparisons.iter().map(|c| c.similarity_score).sum::<f64>() / self.image_comparisons.len() as f64
    }
}

/// 一次图像比对运行的汇总
#[derive(Debug, Clone, Serialize)]
pub struct ImageComparisonSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub baseline_file: String,
    pub comparison_files: Vec<String>,
    pub file_results: Vec<ImageFileComparisonResult>,
    pub tolerance_used: f64,
    pub normalization_applied: bool,
    pub total_images_compared: usize,
}

impl ImageComparisonSummary {
    pub fn new(baseline_file: impl Into<String>, file_results: Vec<ImageFileComparisonResult>, comparator: &ImageComparator) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            baseline_file: baseline_file.into(),
            comparison_files: file_results.iter().map(|r| r.comparison_file.clone()).collect(),
            total_images_compared: file_results.iter().map(|r| r.image_comparisons.len()).sum(),
            file_results,
            tolerance_used: comparator.tolerance(),
            normalization_applied: comparator.normalize(),
        }
    }

    pub fn overall_exact_matches(&self) -> usize {
        self.file_results.iter().map(ImageFileComparisonResult::exact_matches).sum()
    }

    /// 按比对数量加权的平均相似度
    pub fn overall_similarity(&self) -> f64 {
        let total: usize = self.file_results.iter().map(|r| r.image_comparisons.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .file_results
            .iter()
            .map(|r| r.average_similarity() * r.image_comparisons.len() as f64)
            .sum();
        weighted / total as f64
    }
}

/// 像素容差比对器
#[derive(Debug, Clone, Copy)]
pub struct ImageComparator {
    tolerance: f64,
    normalize: bool,
}

impl Default for ImageComparator {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            normalize: true,
        }
    }
}

impl ImageComparator {
    pub fn new(tolerance: f64, normalize: bool) -> Self {
        Self { tolerance, normalize }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// 解码并按需归一化，失败时返回 `None`
    fn load(&self, decoder: &dyn PixelDecoder, instance: &Instance) -> Option<(PixelArray, Vec<f64>)> {
        match decoder.decode(instance) {
            Ok(pixels) if !pixels.is_empty() => {
                let values = if self.normalize {
                    normalize(pixels.samples(), instance)
                } else {
                    pixels.samples().to_vec()
                };
                Some((pixels, values))
            }
            Ok(_) => {
                warn!("像素数组为空: {}", instance.sop_instance_uid);
                None
            }
            Err(e) => {
                warn!("提取像素数据失败 {}: {}", instance.sop_instance_uid, e);
                None
            }
        }
    }

    /// 比较两个实例的像素数据
    pub fn compare_images(
        &self,
        decoder: &dyn PixelDecoder,
        baseline: &Instance,
        comparison: &Instance,
    ) -> ImageComparisonResult {
        let baseline_pixels = self.load(decoder, baseline);
        let comparison_pixels = self.load(decoder, comparison);

        let stats = |loaded: &Option<(PixelArray, Vec<f64>)>, instance: &Instance| match loaded {
            Some((pixels, values)) => ImageStats::of(pixels.shape(), values, instance),
            None => ImageStats::missing(),
        };

        let mut result = ImageComparisonResult {
            sop_instance_uid: baseline.sop_instance_uid.clone(),
            baseline_file: baseline.source_file.clone(),
            comparison_file: comparison.source_file.clone(),
            is_exact_match: false,
            difference_type: ImageDifferenceType::MissingPixelData,
            similarity_score: 0.0,
            pixel_differences: None,
            max_difference: None,
            mean_difference: None,
            rmse: None,
            baseline_stats: stats(&baseline_pixels, baseline),
            comparison_stats: stats(&comparison_pixels, comparison),
            normalization_applied: self.normalize,
            tolerance_used: self.tolerance,
        };

        let (Some((a, a_values)), Some((b, b_values))) = (baseline_pixels, comparison_pixels) else {
            return result;
        };

        if a.shape() != b.shape() {
            result.difference_type = ImageDifferenceType::DimensionDiff;
            return result;
        }

        let total = a_values.len();
        let mut different = 0usize;
        let mut max_diff = 0.0f64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for (x, y) in a_values.iter().zip(&b_values) {
            let diff = (x - y).abs();
            if diff > self.tolerance {
                different += 1;
            }
            max_diff = max_diff.max(diff);
            sum += diff;
            sum_sq += diff * diff;
        }

        let is_exact = max_diff <= self.tolerance;
        result.is_exact_match = is_exact;
        result.difference_type = if is_exact {
            ImageDifferenceType::ExactMatch
        } else {
            ImageDifferenceType::PixelValueDiff
        };
        result.similarity_score = 1.0 - different as f64 / total as f64;
        result.pixel_differences = Some(different);
        result.max_difference = Some(max_diff);
        result.mean_difference = Some(sum / total as f64);
        result.rmse = Some((sum_sq / total as f64).sqrt());
        result
    }

    /// 比较两个压缩包的全部图像 (按SOP Instance UID对应)
    pub fn compare_sets(
        &self,
        decoder: &dyn PixelDecoder,
        baseline: &StudySet,
        comparison: &StudySet,
    ) -> ImageFileComparisonResult {
        let by_uid: HashMap<&str, &Instance> = comparison
            .instances()
            .map(|i| (i.sop_instance_uid.as_str(), i))
            .collect();

        let mut image_comparisons = Vec::new();
        let mut missing_instances = Vec::new();
        for instance in baseline.instances() {
            match by_uid.get(instance.sop_instance_uid.as_str()) {
                Some(other) => image_comparisons.push(self.compare_images(decoder, instance, other)),
                None => missing_instances.push(instance.to_ref()),
            }
        }

        let baseline_uids: std::collections::HashSet<&str> =
            baseline.instances().map(|i| i.sop_instance_uid.as_str()).collect();
        let extra_instances: Vec<InstanceRef> = comparison
            .instances()
            .filter(|i| !baseline_uids.contains(i.sop_instance_uid.as_str()))
            .map(Instance::to_ref)
            .collect();

        debug!(
            "图像比对 {} -> {}: {} 对, {} 缺失, {} 多余",
            baseline.source_file,
            comparison.source_file,
            image_comparisons.len(),
            missing_instances.len(),
            extra_instances.len()
        );

        ImageFileComparisonResult {
            baseline_file: baseline.source_file.clone(),
            comparison_file: comparison.source_file.clone(),
            image_comparisons,
            missing_instances,
            extra_instances,
            total_instances_baseline: baseline.instance_count(),
            total_instances_comparison: comparison.instance_count(),
            tolerance_used: self.tolerance,
        }
    }
}

/// 应用 Rescale Slope/Intercept (两者都存在时) 与窗宽窗位裁剪 (两者都存在时)
pub fn normalize(samples: &[f64], instance: &Instance) -> Vec<f64> {
    let mut values = samples.to_vec();

    let rescale = instance
        .tag("RescaleSlope")
        .and_then(|v| v.first_f64())
        .zip(instance.tag("RescaleIntercept").and_then(|v| v.first_f64()));
    if let Some((slope, intercept)) = rescale {
        for v in values.iter_mut() {
            *v = *v * slope + intercept;
        }
    }

    let window = instance
        .tag("WindowCenter")
        .and_then(|v| v.first_f64())
        .zip(instance.tag("WindowWidth").and_then(|v| v.first_f64()));
    if let Some((center, width)) = window {
        let lo = center - width / 2.0;
        let hi = center + width / 2.0;
        if lo <= hi {
            for v in values.iter_mut() {
                *v = v.clamp(lo, hi);
            }
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcmp_core::InMemoryPixelDecoder;

    fn instance(sop: &str, source: &str) -> Instance {
        Instance::new(sop, "1.1", "1").with_source(format!("/tmp/{}.dcm", sop), source)
    }

    #[test]
    fn test_normalize_rescale_then_window() {
        let ct = Instance::new("1", "1", "1")
            .with_tag("RescaleSlope", 1.0)
            .with_tag("RescaleIntercept", -1024.0)
            .with_tag("WindowCenter", vec![40.0, 400.0])
            .with_tag("WindowWidth", vec![400.0, 2000.0]);
        let values = normalize(&[0.0, 1024.0, 2000.0], &ct);
        assert_eq!(values, vec![-160.0, 0.0, 240.0]);

        // 只有斜率时不做变换
        let slope_only = Instance::new("1", "1", "1").with_tag("RescaleSlope", 2.0);
        assert_eq!(normalize(&[3.0], &slope_only), vec![3.0]);
    }

    #[test]
    fn test_exact_and_pixel_diff() {
        let a = instance("a", "a.zip");
        let b = instance("b", "b.zip");
        let c = instance("c", "c.zip");
        let decoder = InMemoryPixelDecoder::new()
            .with("a", PixelArray::from_u16(vec![2, 2], &[1, 2, 3, 4]).unwrap())
            .with("b", PixelArray::from_u16(vec![2, 2], &[1, 2, 3, 4]).unwrap())
            .with("c", PixelArray::from_u16(vec![2, 2], &[1, 2, 3, 8]).unwrap());

        let comparator = ImageComparator::default();
        let exact = comparator.compare_images(&decoder, &a, &b);
        assert!(exact.is_exact_match);
        assert_eq!(exact.difference_type, ImageDifferenceType::ExactMatch);
        assert_eq!(exact.similarity_score, 1.0);
        assert_eq!(exact.baseline_stats.mean_value, 2.5);

        let diff = comparator.compare_images(&decoder, &a, &c);
        assert_eq!(diff.difference_type, ImageDifferenceType::PixelValueDiff);
        assert_eq!(diff.pixel_differences, Some(1));
        assert_eq!(diff.max_difference, Some(4.0));
        assert_eq!(diff.mean_difference, Some(1.0));
        assert_eq!(diff.rmse, Some(2.0));
        assert_eq!(diff.similarity_score, 0.75);

        let tolerant = ImageComparator::new(4.0, false).compare_images(&decoder, &a, &c);
        assert!(tolerant.is_exact_match);
    }

    #[test]
    fn test_dimension_and_missing_pixels() {
        let a = instance("a", "a.zip");
        let b = instance("b", "b.zip");
        let none = instance("none", "b.zip");
        let decoder = InMemoryPixelDecoder::new()
            .with("a", PixelArray::from_u8(vec![2, 2], &[1, 2, 3, 4]).unwrap())
            .with("b", PixelArray::from_u8(vec![4, 1], &[1, 2, 3, 4]).unwrap());

        let comparator = ImageComparator::default();
        let dims = comparator.compare_images(&decoder, &a, &b);
        assert_eq!(dims.difference_type, ImageDifferenceType::DimensionDiff);
        assert_eq!(dims.similarity_score, 0.0);

        let missing = comparator.compare_images(&decoder, &a, &none);
        assert_eq!(missing.difference_type, ImageDifferenceType::MissingPixelData);
        assert!(!missing.comparison_stats.has_pixel_data);
    }

    #[test]
    fn test_compare_sets_and_summary() {
        let mut baseline = StudySet::new("a.zip");
        baseline.insert(instance("1", "a.zip"));
        baseline.insert(instance("2", "a.zip"));
        let mut comparison = StudySet::new("b.zip");
        comparison.insert(instance("1", "b.zip"));
        comparison.insert(instance("3", "b.zip"));

        let pixels = PixelArray::from_u8(vec![1, 2], &[5, 6]).unwrap();
        let decoder = InMemoryPixelDecoder::new().with("1", pixels);

        let comparator = ImageComparator::default();
        let result = comparator.compare_sets(&decoder, &baseline, &comparison);
        assert_eq!(result.exact_matches(), 1);
        assert_eq!(result.pixel_differences(), 0);
        assert_eq!(result.missing_instances[0].sop_instance_uid, "2");
        assert_eq!(result.extra_instances[0].sop_instance_uid, "3");

        let summary = ImageComparisonSummary::new("a.zip", vec![result], &comparator);
        assert_eq!(summary.total_images_compared, 1);
        assert_eq!(summary.overall_exact_matches(), 1);
        assert_eq!(summary.overall_similarity(), 1.0);
    }
}
