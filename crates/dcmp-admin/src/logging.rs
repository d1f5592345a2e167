//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读文本
    #[default]
    Text,
    /// 每行一个JSON对象
    Json,
}

/// 由级别字符串构建过滤器 (支持 `info`、`dcmp_engine=debug,warn` 等写法)
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("无效的日志级别: {}", level))
}

/// 初始化全局日志
///
/// 设置了 `RUST_LOG` 时以其为准，否则使用配置中的级别。
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("日志初始化失败: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parsing() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("dcmp_engine=debug,warn").is_ok());
        assert!(build_filter("dcmp=verbose").is_err());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
