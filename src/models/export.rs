//! 导出文档模型
//!
//! 一次成功抓取产出一份文档：元数据、导师信息、学员列表

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 导出文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub mentor: MentorInfo,
    pub students: Vec<StudentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub generated_at_utc: String,
    pub source_url: String,
    pub student_total: usize,
    pub show_all_courses_clicked: usize,
    pub show_all_assignments_clicked: usize,
}

/// 导师信息块
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentorInfo {
    pub name: String,
    pub mentor_code: String,
    pub group: String,
    pub nav_items: Vec<String>,
    pub support_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub profile: StudentProfile,
    pub progress: StudentProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentProfile {
    pub name: String,
    pub status_badge: String,
    pub university: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentProgress {
    pub course_progress: CourseProgress,
    pub daily_checkins: PagedList,
    pub point_histories: PointHistoryList,
    pub assignment_submissions: PagedList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseProgress {
    pub items: Vec<CourseItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseItem {
    pub course: String,
    pub progress_percent: String,
    pub status: String,
}

/// 分页子列表的抓取结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagedList {
    /// 列表上方的“最后更新”文字
    pub last_updated: String,
    pub items: Vec<ExtractedRecord>,
    /// 列表为空时页面显示的提示文字
    pub empty_state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointHistoryList {
    #[serde(flatten)]
    pub list: PagedList,
    pub total_point: String,
}

/// 分页列表中的一行，以规范化内容的指纹标识
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub fingerprint: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_history_list_is_flat_in_json() {
        let list = PointHistoryList {
            list: PagedList {
                last_updated: "Updated today".to_string(),
                items: vec![],
                empty_state: "No point history".to_string(),
            },
            total_point: "120".to_string(),
        };

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["last_updated"], "Updated today");
        assert_eq!(json["total_point"], "120");
        assert!(json["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn record_fields_sit_next_to_fingerprint() {
        let mut fields = BTreeMap::new();
        fields.insert("date".to_string(), "2026-02-01".to_string());
        let record = ExtractedRecord {
            fingerprint: "abc".to_string(),
            fields,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"fingerprint": "abc", "date": "2026-02-01"}));
    }
}
