//! DICOM文件解析器
//!
//! 将DICOM文件转换为扁平的 关键字→标签值 映射，像素数据不加载。

use dcmp_core::utils::is_valid_dicom_uid;
use dcmp_core::{CompareError, Instance, Result, SequenceItem, TagMap, TagValue};
use dicom::core::dictionary::{DataDictionary, TagRange};
use dicom::core::header::Header;
use dicom::core::value::{PrimitiveValue, Value};
use dicom::core::{Tag, VR};
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};
use std::path::Path;
use tracing::{debug, warn};

/// 序列默认只保留的条目数
pub const DEFAULT_MAX_SEQUENCE_ITEMS: usize = 10;

/// 二进制值以十六进制保留的长度上限
const MAX_HEX_BYTES: usize = 1000;

/// DICOM文件解析器
#[derive(Debug, Clone)]
pub struct DicomParser {
    max_sequence_items: usize,
}

impl Default for DicomParser {
    fn default() -> Self {
        Self {
            max_sequence_items: DEFAULT_MAX_SEQUENCE_ITEMS,
        }
    }
}

impl DicomParser {
    /// 创建新的DICOM解析器
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sequence_items(mut self, max_sequence_items: usize) -> Self {
        self.max_sequence_items = max_sequence_items;
        self
    }

    /// 读取DICOM文件 (读到像素数据为止)
    pub fn open(path: &Path) -> Result<DefaultDicomObject> {
        OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| CompareError::DicomParse(format!("无法解析DICOM文件 {:?}: {}", path, e)))
    }

    /// 解析DICOM文件
    ///
    /// 缺少SOP/Series/Study任一UID的文件返回 `Ok(None)`。
    pub fn parse_file(&self, path: &Path, source_file: &str) -> Result<Option<Instance>> {
        debug!("开始解析DICOM文件: {:?}", path);
        let obj = Self::open(path)?;

        let sop_instance_uid = uid_element(&obj, tags::SOP_INSTANCE_UID);
        let series_instance_uid = uid_element(&obj, tags::SERIES_INSTANCE_UID);
        let study_instance_uid = uid_element(&obj, tags::STUDY_INSTANCE_UID);

        let (sop_instance_uid, series_instance_uid, study_instance_uid) =
            match (sop_instance_uid, series_instance_uid, study_instance_uid) {
                (Some(sop), Some(series), Some(study)) => (sop, series, study),
                _ => {
                    warn!("DICOM文件缺少必需的UID: {:?}", path);
                    return Ok(None);
                }
            };

        for uid in [&sop_instance_uid, &series_instance_uid, &study_instance_uid] {
            if !is_valid_dicom_uid(uid) {
                warn!("UID格式不规范: {} ({:?})", uid, path);
            }
        }

        let mut instance = Instance::new(sop_instance_uid, series_instance_uid, study_instance_uid)
            .with_source(path, source_file);
        instance.tags = self.extract_tags(&obj);

        debug!("解析完成: {} 个标签", instance.tags.len());
        Ok(Some(instance))
    }

    /// 提取全部标签 (跳过像素数据)
    pub fn extract_tags(&self, obj: &InMemDicomObject) -> TagMap {
        let mut tags_map = TagMap::new();

        for element in obj.iter() {
            let tag = element.tag();
            if tag == tags::PIXEL_DATA {
                continue;
            }

            let keyword = keyword_or_tag(tag);
            let value = match element.value() {
                Value::Sequence(seq) => TagValue::Sequence(
                    seq.items()
                        .iter()
                        .take(self.max_sequence_items)
                        .map(sequence_item)
                        .collect(),
                ),
                Value::Primitive(primitive) => primitive_to_tag_value(element.vr(), primitive),
                Value::PixelSequence(_) => {
                    debug!("跳过封装的像素序列: {}", keyword);
                    continue;
                }
            };
            tags_map.insert(keyword, value);
        }

        tags_map
    }
}

/// 字典关键字，未知标签使用 `(gggg,eeee)`
///
/// 只采用精确匹配的字典条目。私有标签和按范围登记的标签 (如60xx、50xx重复组)
/// 一律以标签号为键。
pub fn keyword_or_tag(tag: Tag) -> String {
    exact_keyword(tag)
        .map(str::to_string)
        .unwrap_or_else(|| format!("({:04x},{:04x})", tag.group(), tag.element()))
}

fn exact_keyword(tag: Tag) -> Option<&'static str> {
    if tag.group() % 2 == 1 {
        return None;
    }
    StandardDataDictionary
        .by_tag(tag)
        .filter(|entry| entry.tag == TagRange::Single(tag))
        .map(|entry| entry.alias)
}

fn uid_element(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|uid| clean_text(&uid))
        .filter(|uid| !uid.is_empty())
}

/// 序列条目：只保留字典中有关键字的元素，值转换为字符串
fn sequence_item(item: &InMemDicomObject) -> SequenceItem {
    item.iter()
        .filter_map(|element| {
            let keyword = exact_keyword(element.tag())?;
            let text = match element.value() {
                Value::Primitive(primitive) => clean_text(&primitive.to_str()),
                Value::Sequence(seq) => format!("<sequence:{} items>", seq.items().len()),
                Value::PixelSequence(_) => "<pixel sequence>".to_string(),
            };
            Some((keyword.to_string(), text))
        })
        .collect()
}

fn primitive_to_tag_value(vr: VR, primitive: &PrimitiveValue) -> TagValue {
    if let PrimitiveValue::Empty = primitive {
        return TagValue::Text(String::new());
    }

    match vr {
        VR::OB | VR::OW | VR::OL | VR::OV | VR::UN => binary_value(&primitive.to_bytes()),
        VR::DS | VR::FL | VR::FD | VR::OF | VR::OD => match primitive.to_multi_float64() {
            Ok(values) if values.len() == 1 => TagValue::Float(values[0]),
            Ok(values) => TagValue::FloatList(values),
            Err(_) => text_value(primitive),
        },
        VR::IS | VR::US | VR::SS | VR::UL | VR::SL | VR::UV | VR::SV => match primitive.to_multi_int::<i64>() {
            Ok(values) if values.len() == 1 => TagValue::Int(values[0]),
            Ok(values) => TagValue::IntList(values),
            Err(_) => text_value(primitive),
        },
        _ => text_value(primitive),
    }
}

fn text_value(primitive: &PrimitiveValue) -> TagValue {
    let values: Vec<String> = primitive.to_multi_str().iter().map(|s| clean_text(s)).collect();
    match values.len() {
        0 => TagValue::Text(String::new()),
        1 => TagValue::Text(values.into_iter().next().unwrap_or_default()),
        _ => TagValue::TextList(values),
    }
}

fn binary_value(bytes: &[u8]) -> TagValue {
    if bytes.len() < MAX_HEX_BYTES {
        TagValue::Text(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    } else {
        TagValue::Text(format!("<binary:{} bytes>", bytes.len()))
    }
}

fn clean_text(value: &str) -> String {
    value.trim_matches(|c: char| c == '\0' || c == ' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue};
    use dicom::object::meta::FileMetaTableBuilder;

    fn object_with(elements: Vec<DataElement<InMemDicomObject>>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(elements)
    }

    #[test]
    fn test_numeric_vrs_keep_numeric_types() {
        let obj = object_with(vec![
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(512u16)),
            DataElement::new(
                tags::PIXEL_SPACING,
                VR::DS,
                PrimitiveValue::Strs(["0.5".to_string(), "0.5".to_string()].into_iter().collect()),
            ),
            DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from("1.25 ")),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from("7")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT ")),
            DataElement::new(
                tags::IMAGE_TYPE,
                VR::CS,
                PrimitiveValue::Strs(["ORIGINAL".to_string(), "PRIMARY".to_string()].into_iter().collect()),
            ),
        ]);

        let tags_map = DicomParser::new().extract_tags(&obj);
        assert_eq!(tags_map.get("Rows"), Some(&TagValue::Int(512)));
        assert_eq!(tags_map.get("PixelSpacing"), Some(&TagValue::FloatList(vec![0.5, 0.5])));
        assert_eq!(tags_map.get("SliceThickness"), Some(&TagValue::Float(1.25)));
        assert_eq!(tags_map.get("InstanceNumber"), Some(&TagValue::Int(7)));
        assert_eq!(tags_map.get("Modality"), Some(&TagValue::Text("CT".to_string())));
        assert_eq!(
            tags_map.get("ImageType"),
            Some(&TagValue::TextList(vec!["ORIGINAL".to_string(), "PRIMARY".to_string()]))
        );
    }

    #[test]
    fn test_binary_private_and_pixel_data() {
        let private = Tag(0x0009, 0x0010);
        let obj = object_with(vec![
            DataElement::new(private, VR::LO, PrimitiveValue::from("VENDOR")),
            DataElement::new(Tag(0x0029, 0x1010), VR::OB, PrimitiveValue::from(vec![0xabu8, 0x01])),
            DataElement::new(Tag(0x0029, 0x1020), VR::OB, PrimitiveValue::from(vec![0u8; 2048])),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(vec![0u8; 16])),
        ]);

        let tags_map = DicomParser::new().extract_tags(&obj);
        assert_eq!(tags_map.get("(0009,0010)"), Some(&TagValue::from("VENDOR")));
        assert_eq!(tags_map.get("(0029,1010)"), Some(&TagValue::from("ab01")));
        assert_eq!(tags_map.get("(0029,1020)"), Some(&TagValue::from("<binary:2048 bytes>")));
        assert!(!tags_map.contains_key("PixelData"));
    }

    #[test]
    fn test_private_creators_and_repeating_groups_keep_distinct_keys() {
        let obj = object_with(vec![
            DataElement::new(Tag(0x0009, 0x0010), VR::LO, PrimitiveValue::from("VENDOR")),
            DataElement::new(Tag(0x0009, 0x1001), VR::LO, PrimitiveValue::from("A")),
            DataElement::new(Tag(0x0011, 0x0010), VR::LO, PrimitiveValue::from("OTHER")),
            DataElement::new(Tag(0x6000, 0x0010), VR::US, PrimitiveValue::from(256u16)),
            DataElement::new(Tag(0x6002, 0x0010), VR::US, PrimitiveValue::from(128u16)),
        ]);

        let tags_map = DicomParser::new().extract_tags(&obj);
        assert_eq!(tags_map.len(), 5);
        assert_eq!(tags_map.get("(0009,0010)"), Some(&TagValue::from("VENDOR")));
        assert_eq!(tags_map.get("(0009,1001)"), Some(&TagValue::from("A")));
        assert_eq!(tags_map.get("(0011,0010)"), Some(&TagValue::from("OTHER")));
        assert_eq!(tags_map.get("(6000,0010)"), Some(&TagValue::Int(256)));
        assert_eq!(tags_map.get("(6002,0010)"), Some(&TagValue::Int(128)));
        assert!(!tags_map.contains_key("PrivateCreator"));
        assert_eq!(keyword_or_tag(tags::MODALITY), "Modality");
    }

    #[test]
    fn test_sequences_are_truncated() {
        let items: Vec<InMemDicomObject> = (0..15)
            .map(|i| {
                object_with(vec![DataElement::new(
                    tags::CODE_VALUE,
                    VR::SH,
                    PrimitiveValue::from(format!("C{}", i)),
                )])
            })
            .collect();
        let obj = object_with(vec![DataElement::new(
            tags::ANATOMIC_REGION_SEQUENCE,
            VR::SQ,
            dicom::core::value::DataSetSequence::from(items),
        )]);

        let tags_map = DicomParser::new().with_max_sequence_items(10).extract_tags(&obj);
        match tags_map.get("AnatomicRegionSequence") {
            Some(TagValue::Sequence(items)) => {
                assert_eq!(items.len(), 10);
                assert_eq!(items[0].get("CodeValue").map(String::as_str), Some("C0"));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    fn write_file(path: &Path, with_sop: bool) {
        let mut elements = vec![
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        ];
        if with_sop {
            elements.push(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4.5")));
        }
        let obj = object_with(elements);
        let file_obj = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax("1.2.840.10008.1.2.1")
                    .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                    .media_storage_sop_instance_uid("1.2.3.4.5"),
            )
            .unwrap();
        file_obj.write_to_file(path).unwrap();
    }

    #[test]
    fn test_parse_file_reads_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IM1");
        write_file(&path, true);

        let instance = DicomParser::new().parse_file(&path, "a.zip").unwrap().unwrap();
        assert_eq!(instance.sop_instance_uid, "1.2.3.4.5");
        assert_eq!(instance.series_instance_uid, "1.2.3.4");
        assert_eq!(instance.study_instance_uid, "1.2.3");
        assert_eq!(instance.source_file, "a.zip");
        assert_eq!(instance.text_tag("Modality"), Some("CT"));
    }

    #[test]
    fn test_missing_uid_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IM2");
        write_file(&path, false);

        assert!(DicomParser::new().parse_file(&path, "a.zip").unwrap().is_none());
    }

    #[test]
    fn test_unparseable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![1u8; 300]).unwrap();

        let err = DicomParser::new().parse_file(&path, "a.zip").unwrap_err();
        assert!(matches!(err, CompareError::DicomParse(_)));
    }
}
