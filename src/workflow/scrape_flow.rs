//! 抓取流程 - 流程层
//!
//! 核心职责：定义"一次抓取"的完整流程
//!
//! 流程顺序：
//! 1. 打开登录页 → 切换到密码登录 → 提交凭据 → 判断登录结果
//! 2. 读取导师信息 → 展开所有学员 → 点开"show all"
//! 3. 解析学员 → 逐个遍历三个分页子列表
//! 4. 组装导出文档 → 保存 → 返回摘要

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::scrape_ctx::JobCtx;
use super::sub_lists::{self, ASSIGNMENT_SUBMISSIONS, DAILY_CHECKINS, POINT_HISTORIES};
use super::JobExecutor;
use crate::browser::BrowserSession;
use crate::config::Config;
use crate::error::{AppError, AppResult, ScrapeError};
use crate::infrastructure::{locate_first_visible, ElementRef, Locator, PageDriver};
use crate::models::{
    Credentials, ExportDocument, ExportMetadata, MentorInfo, PointHistoryList, ScrapeSummary, StudentRecord,
};
use crate::services::page_parser;
use crate::services::{ArtifactStore, PagingLimits, ProgressReporter};

/// 流程固定阶段数，学员子列表另行追加
pub const BASE_STEPS: u64 = 10;

const MAX_SHOW_ALL_CLICKS: usize = 500;
const CLICK_RETRY_DELAY: Duration = Duration::from_millis(400);
const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

const MENTOR_SCRIPT: &str = r#"
(() => {
    const text = (el) => ((el && el.textContent) || "").replace(/\s+/g, " ").trim();
    const nav = Array.from(document.querySelectorAll("a.nav-link")).map((el) => text(el)).filter(Boolean);
    const mail = document.querySelector("a[href^='mailto:']");
    return {
        name: text(document.querySelector(".sidebar-menu .text-xl")),
        mentor_code: text(document.querySelector(".sidebar-menu .text-id.uppercase")),
        group: text(document.querySelector("li .font-normal.text-black.pt-1.pl-5")),
        nav_items: nav,
        support_email: ((mail && mail.getAttribute("href")) || "").replace("mailto:", ""),
    };
})()
"#;

fn password_link_locators() -> Vec<Locator> {
    vec![
        Locator::link_text("your password"),
        Locator::xpath("//a[normalize-space()='your password']"),
        Locator::xpath("//a[contains(normalize-space(.), 'your password')]"),
    ]
}

fn email_locators() -> Vec<Locator> {
    vec![
        Locator::css("input[type='email']"),
        Locator::name("email"),
        Locator::id("email"),
    ]
}

fn password_locators() -> Vec<Locator> {
    vec![
        Locator::css("input[type='password']"),
        Locator::name("password"),
        Locator::id("password"),
    ]
}

fn submit_locators() -> Vec<Locator> {
    vec![
        Locator::css("button[type='submit']"),
        Locator::css("input[type='submit']"),
        Locator::xpath("//button[contains(., 'Sign in') or contains(., 'Login') or contains(., 'Masuk')]"),
    ]
}

/// 登录失败时页面上出现的提示
fn login_error_locators() -> Vec<Locator> {
    vec![
        Locator::css("[role='alert']"),
        Locator::css(".alert-danger, .invalid-feedback, .text-red-500"),
        Locator::xpath(
            "//*[contains(translate(normalize-space(.), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), \
             'email atau password salah') or contains(translate(normalize-space(.), \
             'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), 'invalid email or password')]",
        ),
    ]
}

fn student_search_locators() -> Vec<Locator> {
    vec![Locator::xpath(
        "//input[contains(translate(@placeholder, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), \
         'student') and contains(translate(@placeholder, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', \
         'abcdefghijklmnopqrstuvwxyz'), 'id')]",
    )]
}

/// 登录结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    Rejected,
}

/// 依次尝试定位策略并点击，直到成功或超时
pub async fn click_from_locators(
    driver: &dyn PageDriver,
    locators: &[Locator],
    action_label: &str,
    timeout: Duration,
) -> AppResult<()> {
    let deadline = Instant::now() + timeout;
    let mut last_error: Option<AppError> = None;

    loop {
        for locator in locators {
            let Some(element) = locate_first_visible(driver, std::slice::from_ref(locator)).await? else {
                continue;
            };
            match driver.click(&element).await {
                Ok(()) => {
                    debug!("已点击 '{}'", action_label);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        if Instant::now() >= deadline {
            break;
        }
        sleep(CLICK_RETRY_DELAY).await;
    }

    let message = match last_error {
        Some(e) => format!("Failed to click '{}'. Detail: {}", action_label, e),
        None => format!("Failed to click '{}'", action_label),
    };
    Err(AppError::element_not_found(message))
}

/// 等待任一定位策略出现可见元素
async fn wait_for_visible(
    driver: &dyn PageDriver,
    locators: &[Locator],
    what: &str,
    timeout: Duration,
) -> AppResult<ElementRef> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = locate_first_visible(driver, locators).await? {
            return Ok(element);
        }
        if Instant::now() >= deadline {
            return Err(AppError::element_not_found(format!("{} not found", what)));
        }
        sleep(CLICK_RETRY_DELAY).await;
    }
}

/// 点击所有文字包含关键字的可见按钮，返回点击次数
pub async fn click_all_by_keyword(driver: &dyn PageDriver, keyword: &str, max_clicks: usize) -> AppResult<usize> {
    let locator = Locator::button_containing(keyword);
    let mut clicked = 0;
    while clicked < max_clicks {
        let Some(target) = locate_first_visible(driver, std::slice::from_ref(&locator)).await? else {
            break;
        };
        driver.click(&target).await?;
        clicked += 1;
        sleep(Duration::from_millis(200)).await;
    }
    Ok(clicked)
}

/// 抓取流程
///
/// - 不持有浏览器资源，只通过 `PageDriver` 操作页面
/// - 每次执行的状态都在局部变量里，不跨任务共享
pub struct ScrapeFlow {
    config: Config,
    store: ArtifactStore,
    limits: PagingLimits,
}

impl ScrapeFlow {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            store: ArtifactStore::new(&config.output_dir),
            limits: PagingLimits::from_config(config),
        }
    }

    pub async fn run(
        &self,
        driver: &dyn PageDriver,
        ctx: &JobCtx,
        credentials: &Credentials,
        progress: &ProgressReporter,
    ) -> AppResult<ScrapeSummary> {
        // ========== 登录 ==========
        progress.milestone(10, "Opening login page");
        driver.navigate(&self.config.target_url).await?;
        driver.wait_until_ready(self.config.login_timeout()).await?;

        progress.milestone(15, "Switching to password login");
        click_from_locators(
            driver,
            &password_link_locators(),
            "your password",
            self.config.interaction_timeout(),
        )
        .await
        .map_err(|_| AppError::element_not_found("Link 'your password' not found"))?;

        progress.milestone(20, "Signing in");
        self.submit_credentials(driver, credentials).await?;

        if self.detect_login_outcome(driver).await? == LoginOutcome::Rejected {
            warn!("{} 🔐 登录被拒绝: {}", ctx, ctx.masked_email);
            return Err(ScrapeError::InvalidCredentials.into());
        }
        driver.wait_until_ready(self.config.login_timeout()).await?;
        info!("{} ✅ 登录成功", ctx);

        // ========== 导师信息 ==========
        progress.milestone(30, "Reading mentor info");
        let mentor = self.read_mentor(driver).await;
        info!("{} 👤 导师: {} | 班级: {}", ctx, mentor.name, mentor.group);
        progress.mentor_found(&mentor.name, &mentor.group);

        // ========== 展开页面 ==========
        progress.milestone(35, "Expanding student list");
        self.expand_all_students(driver).await?;

        progress.milestone(45, "Showing all courses and assignments");
        let show_all_courses_clicked = click_all_by_keyword(driver, "show all courses", MAX_SHOW_ALL_CLICKS).await?;
        let show_all_assignments_clicked =
            click_all_by_keyword(driver, "show all assignments", MAX_SHOW_ALL_CLICKS).await?;
        debug!(
            "{} show all courses: {} 次, show all assignments: {} 次",
            ctx, show_all_courses_clicked, show_all_assignments_clicked
        );
        sleep(Duration::from_millis(600)).await;

        // ========== 解析学员 ==========
        progress.milestone(50, "Parsing students");
        let html = driver.page_html().await?;
        let mut students = page_parser::parse_students(&html);
        if students.is_empty() {
            return Err(ScrapeError::extraction("No student blocks found").into());
        }
        info!("{} 📋 找到 {} 名学员", ctx, students.len());

        self.collect_sub_lists(driver, ctx, progress, &mut students).await?;

        // ========== 导出 ==========
        progress.milestone(96, "Saving export");
        let doc = ExportDocument {
            metadata: ExportMetadata {
                generated_at_utc: Utc::now().to_rfc3339(),
                source_url: driver.current_url().await?,
                student_total: students.len(),
                show_all_courses_clicked,
                show_all_assignments_clicked,
            },
            mentor,
            students,
        };

        let file = self
            .store
            .write(&doc)
            .await
            .map_err(|e| ScrapeError::extraction(format!("{:#}", e)))?;

        Ok(ScrapeSummary {
            file,
            students: doc.metadata.student_total,
            facilitator: doc.mentor.name,
            group: doc.mentor.group,
        })
    }

    async fn submit_credentials(&self, driver: &dyn PageDriver, credentials: &Credentials) -> AppResult<()> {
        let timeout = self.config.interaction_timeout();
        wait_for_visible(driver, &password_locators(), "Password input", timeout).await?;

        let email = locate_first_visible(driver, &email_locators()).await?;
        let password = locate_first_visible(driver, &password_locators()).await?;
        let submit = locate_first_visible(driver, &submit_locators()).await?;
        let (Some(email), Some(password), Some(submit)) = (email, password, submit) else {
            return Err(AppError::element_not_found("Login form components not found"));
        };

        driver.fill(&email, credentials.email()).await?;
        driver.fill(&password, credentials.expose_password()).await?;
        driver.click(&submit).await
    }

    /// 轮询登录结果：离开登录页为成功；出现错误提示或超时仍在登录页为凭据错误
    pub async fn detect_login_outcome(&self, driver: &dyn PageDriver) -> AppResult<LoginOutcome> {
        let deadline = Instant::now() + self.config.login_timeout();
        loop {
            if !driver.current_url().await?.contains("/login") {
                return Ok(LoginOutcome::LoggedIn);
            }
            if locate_first_visible(driver, &login_error_locators()).await?.is_some() {
                return Ok(LoginOutcome::Rejected);
            }
            if Instant::now() >= deadline {
                return Ok(LoginOutcome::Rejected);
            }
            sleep(LOGIN_POLL_INTERVAL).await;
        }
    }

    async fn read_mentor(&self, driver: &dyn PageDriver) -> MentorInfo {
        match driver.eval_json(MENTOR_SCRIPT).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                warn!("⚠️ 读取导师信息失败: {}", e);
                MentorInfo::default()
            }
        }
    }

    async fn expand_all_students(&self, driver: &dyn PageDriver) -> AppResult<()> {
        let timeout = self.config.interaction_timeout();
        click_from_locators(driver, &student_search_locators(), "Input student's name or ID", timeout).await?;
        sleep(Duration::from_secs(1)).await;
        click_from_locators(driver, &[Locator::button_containing("select all")], "Select All", timeout).await?;
        sleep(Duration::from_secs(1)).await;
        click_from_locators(driver, &[Locator::button_containing("expand all")], "Expand All", timeout).await?;
        sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    async fn collect_sub_lists(
        &self,
        driver: &dyn PageDriver,
        ctx: &JobCtx,
        progress: &ProgressReporter,
        students: &mut [StudentRecord],
    ) -> AppResult<()> {
        let total = students.len();
        progress.extend_total((total * 3) as u64);

        for (index, student) in students.iter_mut().enumerate() {
            let percent = |done: usize| (50 + (45 * done) / total.max(1)) as u8;
            let name = &student.profile.name;

            let checkins = sub_lists::collect_sub_list(driver, &DAILY_CHECKINS, index, self.limits).await?;
            progress.milestone(percent(index), format!("Student {}/{}: daily check-ins", index + 1, total));

            let points = sub_lists::collect_sub_list(driver, &POINT_HISTORIES, index, self.limits).await?;
            progress.milestone(percent(index), format!("Student {}/{}: point histories", index + 1, total));

            let submissions =
                sub_lists::collect_sub_list(driver, &ASSIGNMENT_SUBMISSIONS, index, self.limits).await?;
            progress.milestone(percent(index + 1), format!("Student {}/{}: assignments", index + 1, total));

            debug!(
                "{} 学员 {} | 签到 {} | 积分 {} | 作业 {}",
                ctx,
                name,
                checkins.list.items.len(),
                points.list.items.len(),
                submissions.list.items.len()
            );

            student.progress.daily_checkins = checkins.list;
            student.progress.point_histories = PointHistoryList {
                list: points.list,
                total_point: points.total_point,
            };
            student.progress.assignment_submissions = submissions.list;
        }
        Ok(())
    }
}

/// 真实浏览器上的抓取引擎
///
/// 每次执行打开独立的浏览器会话，结束时无论结果如何都释放
pub struct ExtractionEngine {
    config: Config,
    flow: ScrapeFlow,
}

impl ExtractionEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            flow: ScrapeFlow::new(config),
        }
    }
}

#[async_trait]
impl JobExecutor for ExtractionEngine {
    async fn execute(
        &self,
        ctx: &JobCtx,
        credentials: &Credentials,
        progress: &ProgressReporter,
    ) -> Result<ScrapeSummary, ScrapeError> {
        progress.milestone(5, "Connecting to browser");
        let session = BrowserSession::open(&self.config)
            .await
            .map_err(AppError::into_scrape_error)?;

        let run = self.flow.run(session.driver(), ctx, credentials, progress);
        let result = run_guarded(ctx, run, self.config.job_timeout()).await;
        session.close().await;

        result
    }
}

/// 在期限内执行抓取，超时和 panic 都转成抓取错误，保证调用方能走到释放会话
pub async fn run_guarded<F>(ctx: &JobCtx, run: F, deadline: Duration) -> Result<ScrapeSummary, ScrapeError>
where
    F: Future<Output = AppResult<ScrapeSummary>>,
{
    match tokio::time::timeout(deadline, AssertUnwindSafe(run).catch_unwind()).await {
        Ok(Ok(result)) => result.map_err(AppError::into_scrape_error),
        Ok(Err(_)) => {
            warn!("{} 💥 抓取过程 panic，释放会话", ctx);
            Err(ScrapeError::extraction("worker panicked during extraction"))
        }
        Err(_) => {
            warn!("{} ⏰ 抓取超时，释放会话", ctx);
            Err(ScrapeError::Timeout {
                seconds: deadline.as_secs(),
            })
        }
    }
}
