//! `compare` 子命令

use crate::report;
use anyhow::{Context, Result};
use clap::Args;
use dcmp_admin::CompareConfig;
use dcmp_core::utils::{display_name, validate_inputs};
use dcmp_core::{MatchingMode, StudySet};
use dcmp_dicom::{CleanupRegistry, ExtractedArchive, FilePixelDecoder, HierarchicalLoader};
use dcmp_engine::{summarize, Reconciler, TracingObserver};
use std::path::PathBuf;
use tracing::{debug, info};

/// 比对多个ZIP导出中的DICOM检查
#[derive(Args, Debug)]
pub struct CompareArgs {
    /// ZIP文件 (第一个为基线，至少两个)
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// 实例匹配模式 (uid, hash, fingerprint, smart)
    #[arg(short = 'm', long)]
    pub matching_mode: Option<MatchingMode>,

    /// 将比对汇总以JSON写入该文件
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// 输出详细信息
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: &CompareArgs, config: &CompareConfig, registry: &CleanupRegistry) -> Result<()> {
    validate_inputs(&args.files)?;
    let mode = match args.matching_mode {
        Some(mode) => mode,
        None => config.matching_mode()?,
    };
    info!("开始DICOM比对，匹配模式: {}", mode);

    let archives = extract_all(&args.files, config, registry)?;
    let loader = HierarchicalLoader::new(config.parser());
    let sets: Vec<StudySet> = archives
        .iter()
        .map(|archive| {
            let set = loader.load(archive);
            print_load_line(archive, &set, args.verbose);
            set
        })
        .collect();

    let (baseline, comparisons) = sets.split_first().context("没有可比对的文件")?;

    let decoder = FilePixelDecoder::new();
    let observer = TracingObserver;
    let reconciler = Reconciler::new(&decoder, &observer)
        .with_differ(config.tag_differ())
        .with_tolerance(config.fingerprint_tolerance());

    let results: Vec<_> = comparisons
        .iter()
        .map(|comparison| reconciler.compare_files(baseline, comparison, mode))
        .collect();

    if args.verbose {
        for result in &results {
            debug!(
                "{}: 基线 {} / 对比 {} / 匹配 {} / 完全一致 {} / 缺失 {} / 多余 {}",
                display_name(&result.comparison_file),
                result.total_instances_baseline,
                result.total_instances_comparison,
                result.matched_instances.len(),
                result.perfect_matches(),
                result.missing_count(),
                result.extra_count()
            );
        }
    }

    let summary = summarize(baseline, results, mode);
    print!("{}", report::render_comparison(&summary));

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&summary).context("比对汇总序列化失败")?;
        std::fs::write(path, json).with_context(|| format!("无法写入 {}", path.display()))?;
        println!("\n比对汇总已写入: {}", path.display());
    }

    info!("比对完成");
    Ok(())
}

/// 解压全部输入，返回的目录在调用方持有期间有效
pub fn extract_all(
    files: &[PathBuf],
    config: &CompareConfig,
    registry: &CleanupRegistry,
) -> Result<Vec<ExtractedArchive>> {
    let extractor = config.extractor().with_registry(registry.clone());
    files
        .iter()
        .map(|file| {
            extractor
                .extract(file)
                .with_context(|| format!("解压失败: {}", file.display()))
        })
        .collect()
}

fn print_load_line(archive: &ExtractedArchive, set: &StudySet, verbose: bool) {
    let stats = archive.stats();
    if stats.non_dicom_files > 0 {
        println!(
            "  {}: {} 个实例 ({}/{} 个文件为DICOM)",
            archive.source_name(),
            set.instance_count(),
            stats.dicom_files,
            stats.total_files
        );
    } else {
        println!(
            "  {}: {} 个实例 (全部 {} 个文件为DICOM)",
            archive.source_name(),
            set.instance_count(),
            stats.total_files
        );
    }
    if verbose {
        println!(
            "    文件夹: {}, DICOM文件: {}, 跳过: {}, 加载失败: {}",
            stats.total_folders,
            stats.dicom_files,
            stats.non_dicom_files,
            set.failed_files.len()
        );
    }
}
