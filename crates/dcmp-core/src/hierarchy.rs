//! 患者→检查→序列→实例 层级模型

use crate::models::Instance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 未知标识的占位值
pub const UNKNOWN: &str = "UNKNOWN";

/// 一个压缩包加载出的全部DICOM数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudySet {
    /// 来源压缩包
    pub source_file: String,
    /// 患者 (按Patient ID)
    pub patients: BTreeMap<String, PatientNode>,
    /// 加载失败的文件及原因
    pub failed_files: Vec<(PathBuf, String)>,
}

/// 患者节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientNode {
    pub patient_id: String,
    pub patient_name: String,
    pub studies: BTreeMap<String, StudyNode>,
}

/// 检查节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyNode {
    pub study_instance_uid: String,
    pub study_description: String,
    pub study_date: String,
    pub series: BTreeMap<String, SeriesNode>,
}

/// 序列节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesNode {
    pub series_instance_uid: String,
    pub series_description: String,
    pub modality: String,
    /// 实例 (按SOP Instance UID，同一UID后加载者覆盖先加载者)
    pub instances: BTreeMap<String, Instance>,
}

impl StudySet {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            ..Default::default()
        }
    }

    /// 将实例插入层级结构
    ///
    /// 返回被替换的同UID实例 (如有)。
    pub fn insert(&mut self, instance: Instance) -> Option<Instance> {
        let text = |keyword: &str| instance.text_tag(keyword).unwrap_or("").to_string();

        let patient_id = instance
            .text_tag("PatientID")
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string();

        let patient = self
            .patients
            .entry(patient_id.clone())
            .or_insert_with(|| PatientNode {
                patient_id,
                patient_name: text("PatientName"),
                studies: BTreeMap::new(),
            });

        let study = patient
            .studies
            .entry(instance.study_instance_uid.clone())
            .or_insert_with(|| StudyNode {
                study_instance_uid: instance.study_instance_uid.clone(),
                study_description: text("StudyDescription"),
                study_date: text("StudyDate"),
                series: BTreeMap::new(),
            });

        let series = study
            .series
            .entry(instance.series_instance_uid.clone())
            .or_insert_with(|| SeriesNode {
                series_instance_uid: instance.series_instance_uid.clone(),
                series_description: text("SeriesDescription"),
                modality: text("Modality"),
                instances: BTreeMap::new(),
            });

        series.instances.insert(instance.sop_instance_uid.clone(), instance)
    }

    /// 按层级顺序展开的全部实例
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.patients
            .values()
            .flat_map(|p| p.studies.values())
            .flat_map(|s| s.series.values())
            .flat_map(|s| s.instances.values())
    }

    /// 克隆出扁平实例列表 (稳定顺序)
    pub fn to_instance_list(&self) -> Vec<Instance> {
        self.instances().cloned().collect()
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn study_count(&self) -> usize {
        self.patients.values().map(|p| p.studies.len()).sum()
    }

    pub fn series_count(&self) -> usize {
        self.patients
            .values()
            .flat_map(|p| p.studies.values())
            .map(|s| s.series.len())
            .sum()
    }

    pub fn instance_count(&self) -> usize {
        self.instances().count()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

impl StudyNode {
    pub fn instance_count(&self) -> usize {
        self.series.values().map(|s| s.instances.len()).sum()
    }
}

impl PatientNode {
    pub fn instance_count(&self) -> usize {
        self.studies.values().map(StudyNode::instance_count).sum()
    }
}
