//! `inspect` 子命令

use crate::compare::extract_all;
use crate::report;
use anyhow::Result;
use clap::Args;
use dcmp_admin::CompareConfig;
use dcmp_core::utils::validate_archives;
use dcmp_dicom::{CleanupRegistry, HierarchicalLoader};
use std::path::PathBuf;

/// 查看ZIP文件中的DICOM内容
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// 要检查的ZIP文件
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// 按序列列出该标签的不同取值 (精确关键字)
    #[arg(long)]
    pub tag: Option<String>,
}

pub fn run(args: &InspectArgs, config: &CompareConfig, registry: &CleanupRegistry) -> Result<()> {
    validate_archives(&args.files)?;

    let archives = extract_all(&args.files, config, registry)?;
    let loader = HierarchicalLoader::new(config.parser());
    for archive in &archives {
        let set = loader.load(archive);
        let stats = archive.stats();
        println!(
            "{}",
            report::render_inspection(archive.source_name(), &stats, &set, args.tag.as_deref())
        );
    }
    Ok(())
}
