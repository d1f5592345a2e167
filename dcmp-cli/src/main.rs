//! DICOM比对工具主程序

mod compare;
mod image;
mod inspect;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dcmp_admin::{init_logging, CompareConfig};
use dcmp_dicom::CleanupRegistry;
use std::path::PathBuf;
use tracing::{error, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "dicom-compare")]
#[command(about = "比较不同ZIP导出中的DICOM检查，识别实例与标签差异")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别 (覆盖配置文件)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 比对DICOM检查 (第一个文件为基线)
    Compare(compare::CompareArgs),
    /// 比较图像像素数据
    Image(image::ImageArgs),
    /// 查看ZIP文件中的DICOM内容
    Inspect(inspect::InspectArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CompareConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    } else if matches!(&cli.command, Command::Compare(args) if args.verbose) {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;

    let registry = CleanupRegistry::new();
    install_interrupt_cleanup(registry.clone())?;

    let result = match &cli.command {
        Command::Compare(args) => compare::run(args, &config, &registry),
        Command::Image(args) => image::run(args, &config, &registry),
        Command::Inspect(args) => inspect::run(args, &config, &registry),
    };

    if let Err(e) = &result {
        error!("执行失败: {:#}", e);
    }
    result
}

/// Ctrl-C 时删除尚未清理的解压目录，以130退出
fn install_interrupt_cleanup(registry: CleanupRegistry) -> Result<()> {
    ctrlc::set_handler(move || {
        let removed = registry.cleanup();
        warn!("收到中断信号，已删除 {} 个临时目录", removed);
        std::process::exit(130);
    })
    .context("无法注册中断处理")
}
