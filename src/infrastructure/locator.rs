//! 元素定位策略
//!
//! 同一个页面元素往往有多种定位方式，按优先级依次尝试，
//! 返回第一个可见的匹配。

use serde::Serialize;

use super::page_driver::PageDriver;
use crate::error::AppResult;

/// 单个定位策略
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    /// 链接文字完全匹配（空白规范化后）
    LinkText(String),
    XPath(String),
    Name(String),
    Id(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn link_text(text: impl Into<String>) -> Self {
        Locator::LinkText(text.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Locator::Name(name.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    /// 按钮文字包含关键字（不区分大小写）
    pub fn button_containing(keyword: &str) -> Self {
        Locator::XPath(format!(
            "//button[contains(translate(normalize-space(.), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', \
             'abcdefghijklmnopqrstuvwxyz'), '{}')]",
            keyword.to_lowercase()
        ))
    }

    /// 生成一段 JS：解析该定位策略得到 `els` 数组后执行 `body`
    pub fn script(&self, body: &str) -> String {
        let locator = serde_json::to_string(self).unwrap_or_else(|_| "null".to_string());
        format!(
            r#"
            (() => {{
                const locator = {locator};
                const norm = (t) => (t || "").replace(/\s+/g, " ").trim();
                const resolve = (loc) => {{
                    if (!loc) return [];
                    switch (loc.kind) {{
                        case "css":
                            return Array.from(document.querySelectorAll(loc.value));
                        case "x_path": {{
                            const snap = document.evaluate(loc.value, document, null,
                                XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                            const out = [];
                            for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
                            return out;
                        }}
                        case "link_text":
                            return Array.from(document.querySelectorAll("a"))
                                .filter((a) => norm(a.textContent) === loc.value);
                        case "name":
                            return Array.from(document.getElementsByName(loc.value));
                        case "id": {{
                            const el = document.getElementById(loc.value);
                            return el ? [el] : [];
                        }}
                    }}
                    return [];
                }};
                const isVisible = (el) => {{
                    if (!el || !el.getClientRects) return false;
                    const style = window.getComputedStyle(el);
                    if (style.visibility === "hidden" || style.display === "none") return false;
                    return el.getClientRects().length > 0;
                }};
                const els = resolve(locator);
                {body}
            }})()
            "#
        )
    }
}

/// 对页面上某个元素的可重复解析引用：定位策略 + 匹配序号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub locator: Locator,
    pub index: usize,
}

/// 按优先级尝试每个定位策略，返回第一个可见元素
pub async fn locate_first_visible<D: PageDriver + ?Sized>(
    driver: &D,
    candidates: &[Locator],
) -> AppResult<Option<ElementRef>> {
    for locator in candidates {
        let visible = driver.visible_matches(locator).await?;
        if let Some(&index) = visible.first() {
            return Ok(Some(ElementRef {
                locator: locator.clone(),
                index,
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::page_driver::testing::FakeDriver;

    #[tokio::test]
    async fn earlier_strategy_wins() {
        let driver = FakeDriver::default()
            .with_visible(Locator::name("email"), vec![0])
            .with_visible(Locator::css("input[type='email']"), vec![2]);

        let found = locate_first_visible(
            &driver,
            &[Locator::css("input[type='email']"), Locator::name("email")],
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(found.locator, Locator::css("input[type='email']"));
        assert_eq!(found.index, 2);
    }

    #[tokio::test]
    async fn falls_through_to_later_strategy() {
        let driver = FakeDriver::default().with_visible(Locator::id("email"), vec![0]);

        let found = locate_first_visible(
            &driver,
            &[Locator::css("input[type='email']"), Locator::name("email"), Locator::id("email")],
        )
        .await
        .unwrap();

        assert_eq!(found.map(|el| el.locator), Some(Locator::id("email")));
    }

    #[tokio::test]
    async fn nothing_visible_is_none() {
        let driver = FakeDriver::default();
        let found = locate_first_visible(&driver, &[Locator::css("button")]).await.unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn script_embeds_locator_as_json() {
        let script = Locator::link_text("your password").script("return els.length;");
        assert!(script.contains(r#"{"kind":"link_text","value":"your password"}"#));
        assert!(script.contains("return els.length;"));
    }
}
