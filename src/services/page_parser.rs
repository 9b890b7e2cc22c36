//! 学员页面解析
//!
//! 页面 HTML 按学员容器标记切块，每块用结构化的文本模式提取字段

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use crate::models::{CourseItem, CourseProgress, StudentProfile, StudentProgress, StudentRecord};

/// 每个学员块的起始标记
pub const STUDENT_MARKER: &str = r#"<div class="container flex flex-col pb-8 border-b">"#;

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_FILENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-]+").unwrap());

static RE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<h3 class="text-3xl font-semibold">([^<]+)</h3>"#).unwrap());
static RE_STATUS_BADGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div class="inline-block text-xs font-medium[^>]*><p>([^<]+)</p></div>"#).unwrap()
});
static RE_UNIVERSITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<p class="text-sm text-gray-700">University</p></div><p class="font-normal text-black pl-4">([^<]+)</p>"#,
    )
    .unwrap()
});
static RE_COURSE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)(data-element="course-progress-title".*?</div></div></div></section>)"#).unwrap()
});
static RE_COURSE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)data-course="([^"]+)".*?<span[^>]*class="mr-2">([^<]+)</span><span[^>]*data-element="item-status-label">([^<]+)</span>"#,
    )
    .unwrap()
});

/// 折叠连续空白并去掉首尾空白
pub fn normalize_space(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// 解码 HTML 实体后规范化空白
pub fn clean_text(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let decoded: String = fragment.root_element().text().collect();
    normalize_space(&decoded)
}

/// 文件名片段：非 `[A-Za-z0-9_-]` 的连续字符替换为 `_`
pub fn sanitize_filename_part(text: &str) -> String {
    let cleaned = RE_FILENAME.replace_all(text.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "unknown_group".to_string()
    } else {
        cleaned.to_string()
    }
}

/// 第一个捕获组，解码并规范化；没有匹配返回空串
fn one(pattern: &Regex, text: &str) -> String {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_text(m.as_str()))
        .unwrap_or_default()
}

/// 所有匹配的全部捕获组
fn many(pattern: &Regex, text: &str) -> Vec<Vec<String>> {
    pattern
        .captures_iter(text)
        .map(|caps| {
            caps.iter()
                .skip(1)
                .map(|group| group.map(|m| clean_text(m.as_str())).unwrap_or_default())
                .collect()
        })
        .collect()
}

/// 按学员容器标记切块，标记之前的内容丢弃
pub fn student_blocks(page_html: &str) -> Vec<&str> {
    page_html.split(STUDENT_MARKER).skip(1).collect()
}

/// 解析单个学员块
pub fn parse_student(block_html: &str) -> StudentRecord {
    let profile = StudentProfile {
        name: one(&RE_NAME, block_html),
        status_badge: one(&RE_STATUS_BADGE, block_html),
        university: one(&RE_UNIVERSITY, block_html),
    };

    let course_section = RE_COURSE_SECTION
        .captures(block_html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();

    let items = many(&RE_COURSE_ROW, course_section)
        .into_iter()
        .filter_map(|row| match row.as_slice() {
            [course, percent, status] => Some(CourseItem {
                course: course.clone(),
                progress_percent: percent.clone(),
                status: status.clone(),
            }),
            _ => None,
        })
        .collect();

    StudentRecord {
        profile,
        progress: StudentProgress {
            course_progress: CourseProgress { items },
            ..Default::default()
        },
    }
}

/// 解析整页的所有学员
pub fn parse_students(page_html: &str) -> Vec<StudentRecord> {
    student_blocks(page_html).into_iter().map(parse_student).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(name: &str, badge: &str, university: &str, courses: &[(&str, &str, &str)]) -> String {
        let rows: String = courses
            .iter()
            .map(|(course, percent, status)| {
                format!(
                    r#"<div data-course="{course}"><div class="bar"></div><span class="mr-2">{percent}</span><span class="label" data-element="item-status-label">{status}</span></div>"#
                )
            })
            .collect();
        format!(
            r#"{marker}<h3 class="text-3xl font-semibold">{name}</h3><div class="inline-block text-xs font-medium bg-red"><p>{badge}</p></div><div><p class="text-sm text-gray-700">University</p></div><p class="font-normal text-black pl-4">{university}</p><section><h4 data-element="course-progress-title">Course</h4>{rows}</div></div></div></section>"#,
            marker = STUDENT_MARKER
        )
    }

    #[test]
    fn splits_blocks_after_marker() {
        let html = format!("<header>nav</header>{}", [block("A", "", "", &[]), block("B", "", "", &[])].concat());
        let blocks = student_blocks(&html);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains(">A</h3>"));
        assert!(!blocks[0].contains(">B</h3>"));
    }

    #[test]
    fn no_marker_means_no_students() {
        assert!(parse_students("<html><body>Login</body></html>").is_empty());
    }

    #[test]
    fn parses_profile_and_courses() {
        let html = block(
            "  Siti   Nur&amp;Aini ",
            "On Ideal Schedule",
            "Universitas Indonesia",
            &[("Belajar Dasar Git", "100%", "Completed"), ("Pemrograman Web", "35%", "In Progress")],
        );

        let students = parse_students(&html);
        let student = &students[0];
        assert_eq!(student.profile.name, "Siti Nur&Aini");
        assert_eq!(student.profile.status_badge, "On Ideal Schedule");
        assert_eq!(student.profile.university, "Universitas Indonesia");

        let courses = &student.progress.course_progress.items;
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[1].course, "Pemrograman Web");
        assert_eq!(courses[1].progress_percent, "35%");
        assert_eq!(courses[1].status, "In Progress");
    }

    #[test]
    fn missing_fields_are_empty_strings() {
        let students = parse_students(&format!("{}<p>nothing here</p>", STUDENT_MARKER));
        assert_eq!(students[0].profile, StudentProfile::default());
        assert!(students[0].progress.course_progress.items.is_empty());
    }

    #[test]
    fn filename_part_is_sanitized() {
        assert_eq!(sanitize_filename_part(" CFC-12 / Batch 3 "), "CFC-12_Batch_3");
        assert_eq!(sanitize_filename_part("///"), "unknown_group");
        assert_eq!(sanitize_filename_part(""), "unknown_group");
    }
}
