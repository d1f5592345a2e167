//! 元数据匹配键
//!
//! 五种相互独立的组合键推导函数。每个函数要么返回完整的键，要么表示必需标签缺失，
//! 不会产生部分键。数值取整用于吸收导出过程中的浮点噪声，键本身按严格相等比较。

use dcmp_core::{Instance, MatchStrategy, Result, TagValue};
use serde::Serialize;

/// 一次匹配键推导的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub success: bool,
    pub strategy: String,
    /// 成功时为策略的固定置信度，失败时为0
    pub confidence: f64,
    pub match_key: Option<String>,
    pub details: String,
}

impl MatchResult {
    fn matched(strategy: MatchStrategy, key: String) -> Self {
        Self {
            success: true,
            strategy: strategy.as_str().to_string(),
            confidence: strategy.confidence(),
            match_key: Some(key),
            details: strategy.description().to_string(),
        }
    }

    fn failed(strategy: &str, details: String) -> Self {
        Self {
            success: false,
            strategy: strategy.to_string(),
            confidence: 0.0,
            match_key: None,
            details,
        }
    }
}

/// 按策略名推导匹配键，未知策略返回失败结果
pub fn derive_by_name(instance: &Instance, strategy: &str) -> MatchResult {
    match strategy.parse::<MatchStrategy>() {
        Ok(strategy) => derive(instance, strategy),
        Err(_) => MatchResult::failed(strategy, format!("未知的匹配策略: {}", strategy)),
    }
}

/// 按策略推导匹配键
///
/// 标签格式错误被转换为失败结果，不向上传播。像素策略不属于元数据键，始终失败。
pub fn derive(instance: &Instance, strategy: MatchStrategy) -> MatchResult {
    let outcome = match strategy {
        MatchStrategy::Spatial => spatial_key(instance),
        MatchStrategy::Acquisition => acquisition_key(instance),
        MatchStrategy::Position => position_key(instance),
        MatchStrategy::Sequence => sequence_key(instance),
        MatchStrategy::Dimensional => dimensional_key(instance),
        MatchStrategy::PixelHash | MatchStrategy::PixelFingerprint => {
            return MatchResult::failed(strategy.as_str(), format!("{} 不是元数据策略", strategy));
        }
    };

    match outcome {
        Ok(Some(key)) => MatchResult::matched(strategy, key),
        Ok(None) => MatchResult::failed(
            strategy.as_str(),
            format!("缺少必需标签: {}", strategy.description()),
        ),
        Err(e) => MatchResult::failed(strategy.as_str(), format!("{}出错: {}", strategy.description(), e)),
    }
}

/// 推导匹配键，仅返回键本身
pub fn derive_key(instance: &Instance, strategy: MatchStrategy) -> Option<String> {
    derive(instance, strategy).match_key
}

fn number(instance: &Instance, keyword: &str) -> Result<Option<f64>> {
    instance.tag(keyword).map(|v| v.as_f64(keyword)).transpose()
}

/// 取多值数值标签，值为"假值"或个数不足时返回 `None`
fn numbers(instance: &Instance, keyword: &str, min_len: usize) -> Result<Option<Vec<f64>>> {
    match instance.tag(keyword) {
        Some(value) if !value.is_falsy() => {
            let values = value.as_f64_list(keyword)?;
            Ok((values.len() >= min_len).then_some(values))
        }
        _ => Ok(None),
    }
}

fn raw_or_zero(value: Option<&TagValue>) -> String {
    match value {
        Some(v) if !v.is_falsy() => v.to_string(),
        _ => "0".to_string(),
    }
}

fn spatial_key(instance: &Instance) -> Result<Option<String>> {
    let Some(slice_location) = number(instance, "SliceLocation")? else {
        return Ok(None);
    };

    let orientation = numbers(instance, "ImageOrientationPatient", 6)?
        .map(|v| v[..6].iter().map(|x| format!("{:.3}", x)).collect::<Vec<_>>().join("_"))
        .unwrap_or_default();

    let spacing = numbers(instance, "PixelSpacing", 2)?
        .map(|v| format!("{:.3}x{:.3}", v[0], v[1]))
        .unwrap_or_default();

    let dims = format!(
        "{}x{}",
        raw_or_zero(instance.tag("Rows")),
        raw_or_zero(instance.tag("Columns"))
    );

    Ok(Some(format!(
        "spatial_{:.3}_{}_{}_{}",
        slice_location, orientation, spacing, dims
    )))
}

fn acquisition_key(instance: &Instance) -> Result<Option<String>> {
    let (Some(series_number), Some(instance_number)) =
        (instance.tag("SeriesNumber"), instance.tag("InstanceNumber"))
    else {
        return Ok(None);
    };

    let mut parts = vec![format!("acq_{}_{}", series_number, instance_number)];
    if let Some(thickness) = number(instance, "SliceThickness")? {
        parts.push(format!("thick_{:.2}", thickness));
    }
    if let Some(te) = number(instance, "EchoTime")? {
        parts.push(format!("te_{:.2}", te));
    }
    if let Some(tr) = number(instance, "RepetitionTime")? {
        parts.push(format!("tr_{:.2}", tr));
    }
    Ok(Some(parts.join("_")))
}

fn position_key(instance: &Instance) -> Result<Option<String>> {
    let Some(position) = numbers(instance, "ImagePositionPatient", 3)? else {
        return Ok(None);
    };
    Ok(Some(format!(
        "pos_{:.2}_{:.2}_{:.2}",
        position[0], position[1], position[2]
    )))
}

fn sequence_key(instance: &Instance) -> Result<Option<String>> {
    if ["EchoTime", "RepetitionTime", "FlipAngle"]
        .iter()
        .all(|keyword| instance.tag(keyword).is_none())
    {
        return Ok(None);
    }

    let mut parts = vec!["seq".to_string()];
    if let Some(te) = number(instance, "EchoTime")? {
        parts.push(format!("te{:.2}", te));
    }
    if let Some(tr) = number(instance, "RepetitionTime")? {
        parts.push(format!("tr{:.2}", tr));
    }
    if let Some(fa) = number(instance, "FlipAngle")? {
        parts.push(format!("fa{:.1}", fa));
    }
    if let Some(ti) = number(instance, "InversionTime")? {
        parts.push(format!("ti{:.2}", ti));
    }
    Ok(Some(parts.join("_")))
}

fn dimensional_key(instance: &Instance) -> Result<Option<String>> {
    let (Some(rows), Some(columns)) = (instance.tag("Rows"), instance.tag("Columns")) else {
        return Ok(None);
    };

    let mut parts = vec![format!("dim_{}x{}", rows, columns)];
    if let Some(bits) = instance.tag("BitsAllocated") {
        parts.push(format!("bits{}", bits));
    }
    if let Some(spacing) = numbers(instance, "PixelSpacing", 2)? {
        parts.push(format!("ps{:.3}x{:.3}", spacing[0], spacing[1]));
    }
    if let Some(thickness) = number(instance, "SliceThickness")? {
        parts.push(format!("thick{:.2}", thickness));
    }
    Ok(Some(parts.join("_")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ct_slice() -> Instance {
        Instance::new("1.2.3.1", "1.2.3", "1.2")
            .with_tag("SliceLocation", 12.5)
            .with_tag("ImageOrientationPatient", vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
            .with_tag("PixelSpacing", vec![0.5, 0.5])
            .with_tag("Rows", 512i64)
            .with_tag("Columns", 512i64)
            .with_tag("SeriesNumber", 3i64)
            .with_tag("InstanceNumber", 17i64)
            .with_tag("SliceThickness", 1.25)
            .with_tag("ImagePositionPatient", vec![-120.0, -110.5, 33.333])
            .with_tag("BitsAllocated", 16i64)
    }

    #[test]
    fn test_spatial_key() {
        let result = derive(&ct_slice(), MatchStrategy::Spatial);
        assert!(result.success);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(
            result.match_key.as_deref(),
            Some("spatial_12.500_1.000_0.000_0.000_0.000_1.000_0.000_0.500x0.500_512x512")
        );
    }

    #[test]
    fn test_spatial_key_without_optional_tags() {
        let instance = Instance::new("1", "2", "3").with_tag("SliceLocation", "-4");
        assert_eq!(
            derive_key(&instance, MatchStrategy::Spatial).as_deref(),
            Some("spatial_-4.000___0x0")
        );
    }

    #[test]
    fn test_acquisition_requires_both_numbers() {
        let instance = ct_slice();
        assert_eq!(
            derive_key(&instance, MatchStrategy::Acquisition).as_deref(),
            Some("acq_3_17_thick_1.25")
        );

        let mut partial = instance.clone();
        partial.tags.remove("InstanceNumber");
        let result = derive(&partial, MatchStrategy::Acquisition);
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.match_key.is_none());
    }

    #[test]
    fn test_position_key() {
        assert_eq!(
            derive_key(&ct_slice(), MatchStrategy::Position).as_deref(),
            Some("pos_-120.00_-110.50_33.33")
        );

        let short = Instance::new("1", "2", "3").with_tag("ImagePositionPatient", vec![1.0, 2.0]);
        assert!(!derive(&short, MatchStrategy::Position).success);
    }

    #[test]
    fn test_sequence_key() {
        let mr = Instance::new("1", "2", "3")
            .with_tag("EchoTime", 4.5)
            .with_tag("FlipAngle", 90i64)
            .with_tag("InversionTime", 2200.0);
        assert_eq!(
            derive_key(&mr, MatchStrategy::Sequence).as_deref(),
            Some("seq_te4.50_fa90.0_ti2200.00")
        );

        // 仅有反转时间不足以构成键
        let ti_only = Instance::new("1", "2", "3").with_tag("InversionTime", 2200.0);
        assert!(!derive(&ti_only, MatchStrategy::Sequence).success);
    }

    #[test]
    fn test_dimensional_key() {
        assert_eq!(
            derive_key(&ct_slice(), MatchStrategy::Dimensional).as_deref(),
            Some("dim_512x512_bits16_ps0.500x0.500_thick1.25")
        );
    }

    #[test]
    fn test_malformed_tag_is_converted_to_failure() {
        let broken = ct_slice().with_tag("ImageOrientationPatient", "1\\0\\zero\\0\\1\\0");
        let result = derive(&broken, MatchStrategy::Spatial);
        assert!(!result.success);
        assert!(result.details.contains("ImageOrientationPatient"));

        // 其它策略不受影响
        assert!(derive(&broken, MatchStrategy::Position).success);
    }

    #[test]
    fn test_unknown_and_pixel_strategies_fail() {
        let instance = ct_slice();
        let unknown = derive_by_name(&instance, "telepathy");
        assert!(!unknown.success);
        assert_eq!(unknown.strategy, "telepathy");

        assert!(derive_by_name(&instance, "dimensional").success);
        assert!(!derive(&instance, MatchStrategy::PixelHash).success);
    }
}
