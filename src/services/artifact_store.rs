//! 导出文件存储 - 业务能力层
//!
//! 只负责读写输出目录里的 JSON 文件，不关心抓取流程

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::ExportDocument;
use crate::services::page_parser::sanitize_filename_part;

/// 输出目录中一个文件的信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 文件名：`<规范化的班级名>_<UTC 时间戳>.json`
    pub fn file_name_for(group: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}.json", sanitize_filename_part(group), at.format("%Y%m%dT%H%M%SZ"))
    }

    /// 写入导出文档，返回文件名
    pub async fn write(&self, doc: &ExportDocument) -> Result<String> {
        let name = Self::file_name_for(&doc.mentor.group, Utc::now());
        fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("无法创建输出目录 {}", self.output_dir.display()))?;

        let path = self.output_dir.join(&name);
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("写入文件失败: {}", path.display()))?;

        info!("💾 已保存导出文件: {} ({} 名学员)", name, doc.students.len());
        Ok(name)
    }

    /// 所有 JSON 文件，最新的在前
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut entries = match fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("无法读取输出目录"),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(ArtifactInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }

    /// 最新的导出文档
    pub async fn latest(&self) -> Result<Option<ExportDocument>> {
        match self.list().await?.first() {
            Some(info) => Ok(Some(self.read_file(&info.name).await?)),
            None => Ok(None),
        }
    }

    /// 按文件名读取
    pub async fn by_name(&self, name: &str) -> Result<ExportDocument> {
        let name = validate_name(name)?;
        if !fs::try_exists(self.output_dir.join(name)).await.unwrap_or(false) {
            return Err(StoreError::NotFound(name.to_string()).into());
        }
        self.read_file(name).await
    }

    /// 删除文件，不存在时返回 false
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let name = validate_name(name)?;
        match fs::remove_file(self.output_dir.join(name)).await {
            Ok(()) => {
                debug!("已删除导出文件: {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("删除文件失败: {}", name)),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    async fn read_file(&self, name: &str) -> Result<ExportDocument> {
        let path = self.output_dir.join(name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("读取文件失败: {}", name))?;
        serde_json::from_str(&content).with_context(|| format!("文件 {} 不是有效的导出文档", name))
    }
}

/// 文件名不能带路径
fn validate_name(name: &str) -> Result<&str, StoreError> {
    let invalid = name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == "..";
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportMetadata, MentorInfo};

    fn doc(group: &str) -> ExportDocument {
        ExportDocument {
            metadata: ExportMetadata {
                generated_at_utc: Utc::now().to_rfc3339(),
                source_url: "https://codingcamp.dicoding.com/".to_string(),
                student_total: 0,
                show_all_courses_clicked: 2,
                show_all_assignments_clicked: 1,
            },
            mentor: MentorInfo {
                name: "Mentor A".to_string(),
                group: group.to_string(),
                ..Default::default()
            },
            students: vec![],
        }
    }

    #[test]
    fn file_name_uses_group_and_timestamp() {
        let at = DateTime::parse_from_rfc3339("2026-02-15T07:48:15Z").unwrap().with_timezone(&Utc);
        assert_eq!(ArtifactStore::file_name_for("CFC 12", at), "CFC_12_20260215T074815Z.json");
        assert_eq!(ArtifactStore::file_name_for("", at), "unknown_group_20260215T074815Z.json");
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("output"));

        let name = store.write(&doc("CFC-12")).await.unwrap();
        assert!(name.starts_with("CFC-12_"));
        assert_eq!(store.count().await.unwrap(), 1);

        let loaded = store.by_name(&name).await.unwrap();
        assert_eq!(loaded.mentor.group, "CFC-12");
        assert_eq!(loaded.metadata.show_all_courses_clicked, 2);

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.mentor.name, "Mentor A");
    }

    #[tokio::test]
    async fn list_ignores_other_files_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.latest().await.unwrap().is_none());

        let store = ArtifactStore::new(dir.path());
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.json"]);
    }

    #[tokio::test]
    async fn path_like_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let err = store.by_name("../secret.json").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::InvalidName(_))));

        let err = store.by_name("missing.json").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_reports_whether_file_existed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = store.write(&doc("G")).await.unwrap();

        assert!(store.delete(&name).await.unwrap());
        assert!(!store.delete(&name).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
