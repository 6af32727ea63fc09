//! Merge-request code review: the fingerprint cache (C8), diff
//! preparation, the source-control interface (§6.2), and the review engine
//! pipeline (C9) that ties them together with an LLM.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod fingerprint_cache;
pub mod source_control;

pub use config::{
    CodeReviewConfig, CodeReviewConfigStore, FileExtensions, InMemoryCodeReviewConfigStore, RequiresText, ReviewExample,
    SqliteCodeReviewConfigStore,
};
pub use diff::{prepare_code_for_review, prepare_file_diff_for_review, split_hunks, KeptLine, PreparedCode};
pub use engine::{ReviewEngine, ReviewSummary};
pub use error::ReviewError;
pub use fingerprint_cache::{cache_document_id, FingerprintCache, InMemoryReviewCacheStore, ReviewCacheStore, SqliteReviewCacheStore};
pub use source_control::{
    CreatedMergeRequest, DiffRefs, DiscussionNote, DiscussionPosition, GitLabSourceControl, InMemorySourceControl, JobLog,
    MergeRequest, MrDiff, Project, SourceControl,
};
