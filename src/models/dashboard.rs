//! 面板视图转换
//!
//! 把导出文档转换为前端面板使用的精简格式

use std::collections::BTreeMap;

use serde::Serialize;

use super::export::{ExportDocument, MentorInfo};

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub students: Vec<DashboardStudent>,
    pub metadata: DashboardMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetadata {
    pub parsed_at: String,
    pub total_students: usize,
    pub source_url: String,
    pub mentor: MentorInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStudent {
    pub name: String,
    /// 无法映射的徽章为 None
    pub status: Option<&'static str>,
    pub courses: Vec<DashboardCourse>,
    pub university: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardCourse {
    pub name: String,
    pub progress: String,
    pub status: &'static str,
}

/// 单门课程的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub name: String,
    pub total_enrolled: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub average_progress: u32,
    pub completion_rate: u32,
}

/// 学员状态徽章映射
pub fn map_status(status_badge: &str) -> Option<&'static str> {
    match status_badge {
        "Need Special Attention" | "Special Attention" => Some("Special Attention"),
        "Lagging Behind" | "Lagging" => Some("Lagging"),
        "On Ideal Schedule" | "Ideal" | "On Track" => Some("Ideal"),
        "Ahead of Schedule" | "Ahead" => Some("Ahead"),
        _ => None,
    }
}

/// 课程状态映射，未知状态视为未开始
pub fn map_course_status(status: &str) -> &'static str {
    match status {
        "Completed" => "Completed",
        "In Progress" => "In Progress",
        _ => "Not Started",
    }
}

impl DashboardView {
    pub fn from_export(doc: &ExportDocument) -> Self {
        let students: Vec<DashboardStudent> = doc
            .students
            .iter()
            .map(|student| DashboardStudent {
                name: student.profile.name.clone(),
                status: map_status(&student.profile.status_badge),
                courses: student
                    .progress
                    .course_progress
                    .items
                    .iter()
                    .map(|course| DashboardCourse {
                        name: course.course.clone(),
                        progress: if course.progress_percent.is_empty() {
                            "0%".to_string()
                        } else {
                            course.progress_percent.clone()
                        },
                        status: map_course_status(&course.status),
                    })
                    .collect(),
                university: student.profile.university.clone(),
            })
            .collect();

        Self {
            metadata: DashboardMetadata {
                parsed_at: doc.metadata.generated_at_utc.clone(),
                total_students: students.len(),
                source_url: doc.metadata.source_url.clone(),
                mentor: doc.mentor.clone(),
            },
            students,
        }
    }

    /// 按状态统计学员人数，四个固定分类总是出现
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> = ["Special Attention", "Lagging", "Ideal", "Ahead"]
            .into_iter()
            .map(|status| (status, 0))
            .collect();

        for status in self.students.iter().filter_map(|s| s.status) {
            *counts.entry(status).or_default() += 1;
        }
        counts
    }

    /// 按课程汇总，保持课程首次出现的顺序
    pub fn course_stats(&self) -> Vec<CourseStats> {
        let mut order: Vec<String> = Vec::new();
        let mut totals: BTreeMap<String, (CourseStats, u32)> = BTreeMap::new();

        for course in self.students.iter().flat_map(|s| s.courses.iter()) {
            let (stats, progress_sum) = totals.entry(course.name.clone()).or_insert_with(|| {
                order.push(course.name.clone());
                (
                    CourseStats {
                        name: course.name.clone(),
                        ..Default::default()
                    },
                    0,
                )
            });

            stats.total_enrolled += 1;
            *progress_sum += course.progress.trim_end_matches('%').trim().parse::<u32>().unwrap_or(0);
            match course.status {
                "Completed" => stats.completed += 1,
                "In Progress" => stats.in_progress += 1,
                _ => stats.not_started += 1,
            }
        }

        order
            .into_iter()
            .filter_map(|name| totals.remove(&name))
            .map(|(mut stats, progress_sum)| {
                if stats.total_enrolled > 0 {
                    let enrolled = stats.total_enrolled as f64;
                    stats.average_progress = (progress_sum as f64 / enrolled).round() as u32;
                    stats.completion_rate = (stats.completed as f64 / enrolled * 100.0).round() as u32;
                }
                stats
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::export::{
        CourseItem, CourseProgress, ExportMetadata, StudentProfile, StudentProgress, StudentRecord,
    };

    fn student(name: &str, badge: &str, courses: &[(&str, &str, &str)]) -> StudentRecord {
        StudentRecord {
            profile: StudentProfile {
                name: name.to_string(),
                status_badge: badge.to_string(),
                university: "Universitas Contoh".to_string(),
            },
            progress: StudentProgress {
                course_progress: CourseProgress {
                    items: courses
                        .iter()
                        .map(|(course, percent, status)| CourseItem {
                            course: course.to_string(),
                            progress_percent: percent.to_string(),
                            status: status.to_string(),
                        })
                        .collect(),
                },
                ..Default::default()
            },
        }
    }

    fn sample_doc() -> ExportDocument {
        ExportDocument {
            metadata: ExportMetadata {
                generated_at_utc: "2026-02-15T07:48:15+00:00".to_string(),
                source_url: "https://codingcamp.dicoding.com/".to_string(),
                student_total: 3,
                show_all_courses_clicked: 0,
                show_all_assignments_clicked: 0,
            },
            mentor: MentorInfo::default(),
            students: vec![
                student("Ayu", "Need Special Attention", &[("Web Dasar", "40%", "In Progress")]),
                student("Budi", "On Track", &[("Web Dasar", "100%", "Completed")]),
                student("Citra", "Unknown Badge", &[("Web Dasar", "", "Paused"), ("Git", "10%", "In Progress")]),
            ],
        }
    }

    #[test]
    fn statuses_are_mapped_and_counted() {
        let view = DashboardView::from_export(&sample_doc());
        assert_eq!(view.students[0].status, Some("Special Attention"));
        assert_eq!(view.students[1].status, Some("Ideal"));
        assert_eq!(view.students[2].status, None);

        let counts = view.status_counts();
        assert_eq!(counts["Special Attention"], 1);
        assert_eq!(counts["Ideal"], 1);
        assert_eq!(counts["Ahead"], 0);
    }

    #[test]
    fn course_stats_average_and_completion() {
        let view = DashboardView::from_export(&sample_doc());
        let stats = view.course_stats();

        assert_eq!(stats[0].name, "Web Dasar");
        assert_eq!(stats[0].total_enrolled, 3);
        assert_eq!(stats[0].completed, 1);
        assert_eq!(stats[0].not_started, 1);
        assert_eq!(stats[0].average_progress, 47);
        assert_eq!(stats[0].completion_rate, 33);
        assert_eq!(stats[1].name, "Git");
    }
}
