//! 通用工具函数

use crate::error::{CompareError, Result};
use std::path::PathBuf;

/// 比对至少需要的压缩包数量 (基线 + 一个对比)
pub const MIN_COMPARISON_INPUTS: usize = 2;

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
        && !uid.contains("..")
}

/// 校验比对命令的输入文件
///
/// 第一个文件为基线，其余为对比文件；只接受存在的ZIP文件。
pub fn validate_inputs(files: &[PathBuf]) -> Result<()> {
    if files.len() < MIN_COMPARISON_INPUTS {
        return Err(CompareError::InvalidInput(format!(
            "至少需要 {} 个文件进行比对 (用法: -f baseline.zip -f comparison.zip ...)",
            MIN_COMPARISON_INPUTS
        )));
    }
    validate_archives(files)
}

/// 校验压缩包文件存在且扩展名为 .zip
pub fn validate_archives(files: &[PathBuf]) -> Result<()> {
    for file in files {
        if !file.exists() {
            return Err(CompareError::InvalidInput(format!("文件不存在: {}", file.display())));
        }

        let is_zip = file
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if !is_zip {
            return Err(CompareError::InvalidInput(format!("仅支持ZIP文件: {}", file.display())));
        }
    }
    Ok(())
}

/// 取路径的文件名部分用于展示
pub fn display_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_dicom_uid() {
        assert!(is_valid_dicom_uid("1.2.840.10008.5.1.4.1.1.4"));
        assert!(!is_valid_dicom_uid(""));
        assert!(!is_valid_dicom_uid("invalid.uid.with.letters"));
        assert!(!is_valid_dicom_uid(".1.2.3"));
        assert!(!is_valid_dicom_uid("1.2.3."));
        assert!(!is_valid_dicom_uid("1..2.3"));
    }

    #[test]
    fn test_validate_inputs_requires_two_files() {
        let err = validate_inputs(&[PathBuf::from("a.zip")]).unwrap_err();
        assert!(matches!(err, CompareError::InvalidInput(_)));
    }

    #[test]
    fn test_validate_inputs_rejects_missing_file() {
        let files = vec![
            PathBuf::from("/nonexistent/a.zip"),
            PathBuf::from("/nonexistent/b.zip"),
        ];
        assert!(validate_inputs(&files).is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("/tmp/exports/a.zip"), "a.zip");
        assert_eq!(display_name("b.zip"), "b.zip");
    }
}
