//! 配置管理
//!
//! 配置分三层加载：内置默认值、可选的配置文件、`DCMP_` 前缀的环境变量。

use crate::logging::LogFormat;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use dcmp_core::MatchingMode;
use dcmp_dicom::{ArchiveExtractor, DicomParser};
use dcmp_engine::{FingerprintTolerance, ImageComparator, TagDiffer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "DCMP";

/// 比对工具完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// 实例匹配配置
    pub matching: MatchingConfig,
    /// 标签比对配置
    pub diff: DiffConfig,
    /// 像素比对配置
    pub image: ImageConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 解压与解析配置
    pub extraction: ExtractionConfig,
}

/// 实例匹配配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// 匹配模式 (uid, hash, fingerprint, smart)
    pub mode: String,
    /// 指纹统计量允许的绝对误差
    pub fingerprint_tolerance: f64,
    /// 直方图相关系数阈值
    pub histogram_correlation: f64,
}

/// 标签比对配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// 在固定忽略列表之外追加忽略的标签
    pub extra_ignored_tags: Vec<String>,
}

/// 像素比对配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 像素差异容差
    pub tolerance: f64,
    /// 是否应用重缩放与窗宽窗位
    pub normalize: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
}

/// 解压与解析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 序列保留的最大条目数
    pub max_sequence_items: usize,
    /// 小于该字节数的文件不视为DICOM
    pub min_file_size: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let tolerance = FingerprintTolerance::default();
        Self {
            mode: MatchingMode::default().as_str().to_string(),
            fingerprint_tolerance: tolerance.stat_tolerance,
            histogram_correlation: tolerance.min_correlation,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            normalize: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_sequence_items: dcmp_dicom::parser::DEFAULT_MAX_SEQUENCE_ITEMS,
            min_file_size: dcmp_dicom::extractor::DEFAULT_MIN_FILE_SIZE,
        }
    }
}

impl CompareConfig {
    /// 加载并校验配置
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(config_path, default_environment())
    }

    /// 使用指定的环境变量源加载配置
    pub fn load_with_env(config_path: Option<&Path>, environment: Environment) -> Result<Self> {
        let defaults = Config::try_from(&CompareConfig::default()).context("无法构建默认配置")?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!("配置文件不存在: {}", path.display());
            }
            builder = builder.add_source(File::from(path));
            debug!("使用配置文件: {}", path.display());
        }

        let settings = builder
            .add_source(environment)
            .build()
            .context("配置加载失败")?;

        let config: CompareConfig = settings.try_deserialize().context("配置反序列化失败")?;
        ConfigValidator::new().validate(&config)?;

        info!("配置加载完成，匹配模式: {}", config.matching.mode);
        Ok(config)
    }

    /// 解析后的匹配模式
    pub fn matching_mode(&self) -> Result<MatchingMode> {
        Ok(self.matching.mode.parse::<MatchingMode>()?)
    }

    pub fn fingerprint_tolerance(&self) -> FingerprintTolerance {
        FingerprintTolerance {
            stat_tolerance: self.matching.fingerprint_tolerance,
            min_correlation: self.matching.histogram_correlation,
        }
    }

    pub fn tag_differ(&self) -> TagDiffer {
        TagDiffer::new().with_extra_ignored(self.diff.extra_ignored_tags.iter().cloned())
    }

    pub fn image_comparator(&self) -> ImageComparator {
        ImageComparator::new(self.image.tolerance, self.image.normalize)
    }

    pub fn parser(&self) -> DicomParser {
        DicomParser::new().with_max_sequence_items(self.extraction.max_sequence_items)
    }

    pub fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new().with_min_file_size(self.extraction.min_file_size)
    }
}

/// `DCMP_MATCHING__MODE=smart` 形式的环境变量
fn default_environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("diff.extra_ignored_tags")
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&CompareConfig) -> Result<()>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "matching.mode",
                validator: |config| {
                    config.matching_mode()?;
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "matching.fingerprint_tolerance",
                validator: |config| non_negative(config.matching.fingerprint_tolerance),
            },
            ValidationRule {
                field_path: "matching.histogram_correlation",
                validator: |config| {
                    let value = config.matching.histogram_correlation;
                    if value.is_finite() && value > 0.0 && value <= 1.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("相关系数阈值必须在 (0, 1] 范围内，当前为 {}", value))
                    }
                },
            },
            ValidationRule {
                field_path: "image.tolerance",
                validator: |config| non_negative(config.image.tolerance),
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| crate::logging::build_filter(&config.logging.level).map(|_| ()),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &CompareConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("配置校验失败 {}: {}", rule.field_path, e);
                return Err(e.context(format!("无效的配置项 {}", rule.field_path)));
            }
        }
        debug!("配置校验通过");
        Ok(())
    }
}

fn non_negative(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(anyhow::anyhow!("容差必须为非负有限数，当前为 {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        default_environment().source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = CompareConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.matching_mode().unwrap(), MatchingMode::Uid);
        assert_eq!(config.matching.fingerprint_tolerance, 1e-6);
        assert_eq!(config.matching.histogram_correlation, 0.999);
        assert!(config.image.normalize);
        assert_eq!(config.extraction.max_sequence_items, 10);
        assert_eq!(config.extraction.min_file_size, 128);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcmp.toml");
        std::fs::write(
            &path,
            "[matching]\nmode = \"fingerprint\"\n\n[diff]\nextra_ignored_tags = [\"DeviceSerialNumber\"]\n\n[image]\ntolerance = 2.5\n",
        )
        .unwrap();

        let config = CompareConfig::load_with_env(Some(&path), env(&[("DCMP_MATCHING__MODE", "smart")])).unwrap();
        assert_eq!(config.matching_mode().unwrap(), MatchingMode::Smart);
        assert_eq!(config.image.tolerance, 2.5);
        assert!(config.tag_differ().is_ignored("DeviceSerialNumber"));
        assert!(config.tag_differ().is_ignored("StationName"));
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let bad_mode = CompareConfig::load_with_env(None, env(&[("DCMP_MATCHING__MODE", "fuzzy")]));
        assert!(bad_mode.is_err());

        let mut config = CompareConfig::default();
        config.matching.histogram_correlation = 1.5;
        assert!(ConfigValidator::new().validate(&config).is_err());

        let mut config = CompareConfig::default();
        config.image.tolerance = -1.0;
        assert!(ConfigValidator::new().validate(&config).is_err());

        let mut config = CompareConfig::default();
        config.matching.fingerprint_tolerance = f64::NAN;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(CompareConfig::load_with_env(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_conversions() {
        let mut config = CompareConfig::default();
        config.matching.fingerprint_tolerance = 0.01;
        config.image.tolerance = 3.0;
        config.image.normalize = false;

        assert_eq!(config.fingerprint_tolerance().stat_tolerance, 0.01);
        let comparator = config.image_comparator();
        assert_eq!(comparator.tolerance(), 3.0);
        assert!(!comparator.normalize());
    }
}
