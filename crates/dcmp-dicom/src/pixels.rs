//! 基于文件的像素解码器

use dcmp_core::{CompareError, Instance, PixelArray, PixelDecoder, Result};
use dicom::dictionary_std::tags;
use dicom::object::open_file;
use dicom_pixeldata::PixelDecoder as _;
use tracing::debug;

/// 按需从实例的文件路径解码像素数据
///
/// 每次调用都重新读取文件，不做跨调用缓存。
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePixelDecoder;

impl FilePixelDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PixelDecoder for FilePixelDecoder {
    fn decode(&self, instance: &Instance) -> Result<PixelArray> {
        let uid = instance.sop_instance_uid.as_str();
        debug!("解码像素数据: {} ({:?})", uid, instance.file_path);

        let obj = open_file(&instance.file_path)
            .map_err(|e| CompareError::pixel_unavailable(uid, format!("无法打开文件: {}", e)))?;

        // 浮点像素数据不在整数解码路径上，按不可用处理
        if [tags::FLOAT_PIXEL_DATA, tags::DOUBLE_FLOAT_PIXEL_DATA]
            .into_iter()
            .any(|tag| obj.element(tag).is_ok())
        {
            return Err(CompareError::pixel_unavailable(uid, "不支持浮点像素数据"));
        }

        let signed = obj
            .element(tags::PIXEL_REPRESENTATION)
            .ok()
            .and_then(|element| element.to_int::<u16>().ok())
            .map(|representation| representation == 1)
            .unwrap_or(false);

        let decoded = obj
            .decode_pixel_data()
            .map_err(|e| CompareError::pixel_unavailable(uid, format!("像素解码失败: {}", e)))?;

        let mut shape = Vec::with_capacity(4);
        if decoded.number_of_frames() > 1 {
            shape.push(decoded.number_of_frames() as usize);
        }
        shape.push(decoded.rows() as usize);
        shape.push(decoded.columns() as usize);
        if decoded.samples_per_pixel() > 1 {
            shape.push(decoded.samples_per_pixel() as usize);
        }

        PixelArray::from_native(shape, decoded.data().to_vec(), decoded.bits_allocated(), signed)
            .map_err(|e| CompareError::pixel_unavailable(uid, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::meta::FileMetaTableBuilder;
    use dicom::object::InMemDicomObject;

    #[test]
    fn test_missing_file_is_pixel_unavailable() {
        let instance = Instance::new("1.2.3", "1.2", "1").with_source("/nonexistent/IM1", "a.zip");

        let err = FilePixelDecoder::new().decode(&instance).unwrap_err();
        assert!(matches!(err, CompareError::PixelUnavailable { ref sop_instance_uid, .. } if sop_instance_uid == "1.2.3"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_float_pixel_data_is_pixel_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IM1");
        let obj = InMemDicomObject::from_element_iter(vec![
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16)),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2u16)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2u16)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(32u16)),
            DataElement::new(tags::FLOAT_PIXEL_DATA, VR::OF, PrimitiveValue::from(vec![0u8; 16])),
        ]);
        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.30")
                .media_storage_sop_instance_uid("1.2.3"),
        )
        .unwrap()
        .write_to_file(&path)
        .unwrap();

        let instance = Instance::new("1.2.3", "1.2", "1").with_source(&path, "a.zip");
        let err = FilePixelDecoder::new().decode(&instance).unwrap_err();
        assert!(matches!(err, CompareError::PixelUnavailable { ref reason, .. } if reason.contains("浮点")));
    }
}
