//! `image` 子命令

use crate::compare::extract_all;
use crate::report;
use anyhow::{Context, Result};
use clap::Args;
use dcmp_admin::CompareConfig;
use dcmp_core::utils::validate_inputs;
use dcmp_core::StudySet;
use dcmp_dicom::{CleanupRegistry, FilePixelDecoder, HierarchicalLoader};
use dcmp_engine::{ImageComparator, ImageComparisonSummary};
use std::path::PathBuf;
use tracing::info;

/// 比较DICOM图像的像素数据
#[derive(Args, Debug)]
pub struct ImageArgs {
    /// ZIP文件 (第一个为基线，至少两个)
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// 像素差异容差 (0.0 为精确匹配)
    #[arg(short = 't', long)]
    pub tolerance: Option<f64>,

    /// 不应用重缩放与窗宽窗位
    #[arg(long)]
    pub no_normalize: bool,
}

pub fn run(args: &ImageArgs, config: &CompareConfig, registry: &CleanupRegistry) -> Result<()> {
    validate_inputs(&args.files)?;

    let comparator = ImageComparator::new(
        args.tolerance.unwrap_or(config.image.tolerance),
        config.image.normalize && !args.no_normalize,
    );
    if !comparator.tolerance().is_finite() || comparator.tolerance() < 0.0 {
        anyhow::bail!("容差必须为非负有限数: {}", comparator.tolerance());
    }
    info!(
        "开始图像比对，容差: {}，归一化: {}",
        comparator.tolerance(),
        comparator.normalize()
    );

    let archives = extract_all(&args.files, config, registry)?;
    let loader = HierarchicalLoader::new(config.parser());
    let sets: Vec<StudySet> = archives.iter().map(|archive| loader.load(archive)).collect();
    let (baseline, comparisons) = sets.split_first().context("没有可比对的文件")?;

    let decoder = FilePixelDecoder::new();
    let file_results = comparisons
        .iter()
        .map(|comparison| comparator.compare_sets(&decoder, baseline, comparison))
        .collect();

    let summary = ImageComparisonSummary::new(baseline.source_file.clone(), file_results, &comparator);
    print!("{}", report::render_image_summary(&summary));
    Ok(())
}
