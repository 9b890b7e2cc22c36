pub mod dashboard;
pub mod export;
pub mod job;
pub mod progress;

pub use dashboard::{CourseStats, DashboardView};
pub use export::{
    CourseItem, CourseProgress, ExportDocument, ExportMetadata, ExtractedRecord, MentorInfo, PagedList,
    PointHistoryList, StudentProfile, StudentProgress, StudentRecord,
};
pub use job::{Credentials, JobId, JobResult, JobStatus, ScrapeSummary};
pub use progress::ProgressSnapshot;
