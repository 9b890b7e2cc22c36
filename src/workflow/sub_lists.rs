//! 学员的三个分页子列表
//!
//! 每个子列表位于学员容器内的一个区块中，
//! 通过 `PageDriver` 执行脚本读取行、翻页。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::AppResult;
use crate::infrastructure::PageDriver;
use crate::models::PagedList;
use crate::services::pagination::{self, ListViewport, NextControl, PagingLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubListKind {
    DailyCheckins,
    PointHistories,
    AssignmentSubmissions,
}

/// 子列表在页面上的位置和列定义
#[derive(Debug)]
pub struct SubListSpec {
    pub kind: SubListKind,
    /// 区块标题包含的文字（小写）
    pub title: &'static str,
    pub data_element: &'static str,
    pub row_selector: &'static str,
    pub columns: &'static [&'static str],
}

pub const DAILY_CHECKINS: SubListSpec = SubListSpec {
    kind: SubListKind::DailyCheckins,
    title: "daily check-in",
    data_element: "daily-checkin",
    row_selector: "tbody tr, [data-element='checkin-item']",
    columns: &["date", "status", "note"],
};

pub const POINT_HISTORIES: SubListSpec = SubListSpec {
    kind: SubListKind::PointHistories,
    title: "point histor",
    data_element: "point-history",
    row_selector: "tbody tr, [data-element='point-item']",
    columns: &["date", "activity", "point"],
};

pub const ASSIGNMENT_SUBMISSIONS: SubListSpec = SubListSpec {
    kind: SubListKind::AssignmentSubmissions,
    title: "assignment submission",
    data_element: "assignment-submission",
    row_selector: "tbody tr, [data-element='submission-item']",
    columns: &["assignment", "submitted_at", "status", "score"],
};

impl SubListSpec {
    pub fn label(&self) -> &'static str {
        match self.kind {
            SubListKind::DailyCheckins => "daily check-ins",
            SubListKind::PointHistories => "point histories",
            SubListKind::AssignmentSubmissions => "assignment submissions",
        }
    }
}

/// 区块外围信息
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SectionSummary {
    found: bool,
    last_updated: String,
    empty_state: String,
    total_point: String,
}

/// 单个子列表的抓取结果
#[derive(Debug, Default)]
pub struct SubListOutcome {
    pub list: PagedList,
    /// 只有积分历史有
    pub total_point: String,
}

/// 学员容器内某个子列表的视口
pub struct DomListViewport<'a> {
    driver: &'a dyn PageDriver,
    spec: &'static SubListSpec,
    student_index: usize,
}

impl<'a> DomListViewport<'a> {
    pub fn new(driver: &'a dyn PageDriver, spec: &'static SubListSpec, student_index: usize) -> Self {
        Self {
            driver,
            spec,
            student_index,
        }
    }

    /// 生成一段 JS：定位学员容器内的区块为 `section`，然后执行 `body`
    fn script(&self, marker: &str, body: &str) -> String {
        format!(
            r#"
            (() => {{
                // {marker}
                const norm = (t) => (t || "").replace(/\s+/g, " ").trim();
                const visible = (el) => !!el && el.getClientRects().length > 0;
                const containers = document.querySelectorAll("div.container.flex.flex-col.pb-8.border-b");
                const student = containers[{index}];
                const title = {title};
                const findSection = () => {{
                    if (!student) return null;
                    const tagged = student.querySelector('[data-element="{data_element}"]');
                    if (tagged) return tagged;
                    const headings = Array.from(student.querySelectorAll("h2, h3, h4, h5, p, span"))
                        .filter((el) => norm(el.textContent).toLowerCase().includes(title));
                    for (const heading of headings) {{
                        const section = heading.closest("section") || (heading.parentElement && heading.parentElement.parentElement);
                        if (section) return section;
                    }}
                    return null;
                }};
                const section = findSection();
                const nextButton = () => {{
                    if (!section) return null;
                    const direct = section.querySelector('[data-element="pagination-next"], button[aria-label*="next" i]');
                    if (direct) return direct;
                    return Array.from(section.querySelectorAll("button"))
                        .find((b) => ["next", "›", ">", "»"].includes(norm(b.textContent).toLowerCase())) || null;
                }};
                {body}
            }})()
            "#,
            marker = marker,
            index = self.student_index,
            title = serde_json::to_string(self.spec.title).unwrap_or_else(|_| "\"\"".to_string()),
            data_element = self.spec.data_element,
            body = body,
        )
    }

    async fn summary(&self) -> AppResult<SectionSummary> {
        let script = self.script(
            "summary",
            r#"
            if (!section) return { found: false };
            const lines = Array.from(section.querySelectorAll("p, span, div"))
                .map((el) => norm(el.textContent))
                .filter(Boolean);
            const pick = (re) => lines.find((line) => re.test(line) && line.length < 120) || "";
            const empty = section.querySelector('[data-element="empty-state"], .empty-state');
            const total = pick(/total point/i);
            const totalMatch = total.match(/(-?\d[\d.,]*)/);
            return {
                found: true,
                last_updated: pick(/last updated|terakhir diperbarui/i),
                empty_state: empty ? norm(empty.textContent) : pick(/no data|belum ada|tidak ada/i),
                total_point: totalMatch ? totalMatch[1] : "",
            };
            "#,
        );
        let value = self.driver.eval_json(&script).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

#[async_trait]
impl ListViewport for DomListViewport<'_> {
    fn columns(&self) -> &[&'static str] {
        self.spec.columns
    }

    async fn visible_rows(&self) -> AppResult<Vec<Vec<String>>> {
        let script = self.script(
            "rows",
            &format!(
                r#"
                if (!section) return [];
                return Array.from(section.querySelectorAll({selector}))
                    .filter(visible)
                    .map((row) => {{
                        const cells = Array.from(row.querySelectorAll("td, [data-cell]")).map((c) => norm(c.textContent));
                        return cells.length ? cells : [norm(row.textContent)];
                    }});
                "#,
                selector = serde_json::to_string(self.spec.row_selector)?
            ),
        );
        let value = self.driver.eval_json(&script).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn next_control(&self) -> AppResult<NextControl> {
        let script = self.script(
            "next",
            r#"
            const btn = nextButton();
            if (!btn || !visible(btn)) return "absent";
            const disabled = btn.disabled || btn.getAttribute("aria-disabled") === "true"
                || btn.classList.contains("disabled");
            return disabled ? "disabled" : "enabled";
            "#,
        );
        let control = match self.driver.eval_json(&script).await? {
            JsonValue::String(state) if state == "enabled" => NextControl::Enabled,
            JsonValue::String(state) if state == "disabled" => NextControl::Disabled,
            _ => NextControl::Absent,
        };
        Ok(control)
    }

    async fn signature(&self) -> AppResult<String> {
        let script = self.script("signature", r#"return section ? norm(section.textContent) : "";"#);
        Ok(self.driver.eval_json(&script).await?.as_str().unwrap_or_default().to_string())
    }

    async fn activate_next(&self) -> AppResult<()> {
        let script = self.script(
            "activate",
            r#"
            const btn = nextButton();
            if (!btn) return false;
            btn.scrollIntoView({ block: "center" });
            btn.click();
            return true;
            "#,
        );
        if self.driver.eval_json(&script).await? != JsonValue::Bool(true) {
            return Err(crate::error::AppError::element_not_found("next page control vanished"));
        }
        Ok(())
    }
}

/// 遍历一个学员的一个子列表
pub async fn collect_sub_list(
    driver: &dyn PageDriver,
    spec: &'static SubListSpec,
    student_index: usize,
    limits: PagingLimits,
) -> AppResult<SubListOutcome> {
    let viewport = DomListViewport::new(driver, spec, student_index);
    let summary = viewport.summary().await?;
    if !summary.found {
        debug!("学员 #{} 没有 {} 区块", student_index + 1, spec.label());
        return Ok(SubListOutcome::default());
    }

    let outcome = pagination::collect(&viewport, limits).await?;
    debug!(
        "学员 #{} {}: {} 行, {} 轮, 结束原因 {:?}",
        student_index + 1,
        spec.label(),
        outcome.records.len(),
        outcome.rounds,
        outcome.stop
    );

    Ok(SubListOutcome {
        list: PagedList {
            last_updated: summary.last_updated,
            empty_state: summary.empty_state,
            items: outcome.records,
        },
        total_point: summary.total_point,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::infrastructure::page_driver::testing::FakeDriver;

    #[tokio::test]
    async fn missing_section_yields_empty_list() {
        let driver = FakeDriver::default().with_eval_result(json!({"found": false}));
        let outcome = collect_sub_list(&driver, &DAILY_CHECKINS, 0, PagingLimits::default())
            .await
            .unwrap();
        assert!(outcome.list.items.is_empty());
        assert_eq!(outcome.list.empty_state, "");
    }

    #[tokio::test]
    async fn walks_pages_through_the_driver() {
        let page = Arc::new(AtomicUsize::new(0));
        let cursor = page.clone();
        let driver = FakeDriver::default().with_eval(move |script| {
            let current = cursor.load(Ordering::SeqCst);
            if script.contains("// summary") {
                json!({"found": true, "last_updated": "Last updated 2 Feb", "total_point": "120"})
            } else if script.contains("// rows") {
                match current {
                    0 => json!([["1 Feb", "Login", "+10"], ["2 Feb", "Quiz", "+20"]]),
                    _ => json!([["2 Feb", "Quiz", "+20"], ["3 Feb", "Submit", "+90"]]),
                }
            } else if script.contains("// next") {
                json!(if current == 0 { "enabled" } else { "disabled" })
            } else if script.contains("// signature") {
                json!(format!("page {}", current))
            } else if script.contains("// activate") {
                cursor.fetch_add(1, Ordering::SeqCst);
                json!(true)
            } else {
                JsonValue::Null
            }
        });

        let outcome = collect_sub_list(&driver, &POINT_HISTORIES, 2, PagingLimits::default())
            .await
            .unwrap();

        let activities: Vec<&str> = outcome.list.items.iter().map(|r| r.fields["activity"].as_str()).collect();
        assert_eq!(activities, vec!["Login", "Quiz", "Submit"]);
        assert_eq!(outcome.total_point, "120");
        assert_eq!(outcome.list.last_updated, "Last updated 2 Feb");
        assert_eq!(page.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn script_targets_student_container() {
        let driver = FakeDriver::default();
        let viewport = DomListViewport::new(&driver, &ASSIGNMENT_SUBMISSIONS, 4);
        let script = viewport.script("rows", "return [];");
        assert!(script.contains("containers[4]"));
        assert!(script.contains(r#""assignment submission""#));
    }
}
