//! The source-control interface (§6.2): projects, merge requests, diffs and
//! discussions. The code-review engine (C9) only needs the MR-shaped
//! subset; the broader `SourceControl` trait also carries the project and
//! job-log operations named in §6.2 so a single adapter backs both the
//! review pipeline and any other caller of the shared runtime.
//!
//! A GitLab-backed adapter is the real implementation (§6.5 names
//! `GITLAB_HOST`/`GITLAB_TOKEN`/`GITLAB_GROUPS`/`GITLAB_BOT_USER_ID`); an
//! in-memory fake exercises the review engine in tests without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedMergeRequest {
    pub id: String,
    pub iid: u64,
    pub url: String,
    pub title: String,
}

/// Diff refs anchor a discussion position to the three SHAs GitLab's API
/// requires (§4.6 step 8). Absent when the MR has no refs yet (e.g. a
/// draft with no diff), in which case comments are posted unpositioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub project_id: String,
    pub iid: u64,
    pub title: String,
    pub diff_refs: Option<DiffRefs>,
}

/// One file's unified diff within an MR, already split into old/new paths
/// and the raw hunk text the review engine's diff module (§4.6 step 4)
/// parses further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MrDiff {
    pub old_path: String,
    pub new_path: String,
    /// The raw unified-diff body for this file, including `@@ ... @@` hunk
    /// headers, exactly as the provider returns it.
    pub diff_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionNote {
    pub id: String,
    pub body: String,
    pub author_is_bot: bool,
}

/// Anchors a new discussion note to a specific line of a specific file
/// (§4.6 step 8). `None` posts an unpositioned (general) comment.
#[derive(Debug, Clone)]
pub struct DiscussionPosition {
    pub diff_refs: DiffRefs,
    pub old_path: String,
    pub new_path: String,
    pub new_line: u32,
}

#[derive(Debug, Clone)]
pub struct JobLog {
    pub job_id: String,
    pub text: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn get_projects(&self) -> Result<Vec<Project>, crate::error::ReviewError>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, crate::error::ReviewError>;

    /// Clones (or updates an existing shared clone of) a project to the
    /// on-disk layout in §6.4, optionally checking out `branch_or_commit`.
    async fn clone_project(
        &self,
        path_with_namespace: &str,
        branch_or_commit: Option<&str>,
    ) -> Result<std::path::PathBuf, crate::error::ReviewError>;

    async fn create_merge_request(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<CreatedMergeRequest, crate::error::ReviewError>;

    async fn get_job_logs(&self, project_id_or_path: &str, job_id: &str) -> Result<JobLog, crate::error::ReviewError>;

    async fn get_merge_request(&self, project_id: &str, mr_iid: u64) -> Result<MergeRequest, crate::error::ReviewError>;

    async fn get_merge_request_diffs(&self, project_id: &str, mr_iid: u64) -> Result<Vec<MrDiff>, crate::error::ReviewError>;

    async fn get_merge_request_discussions(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> Result<Vec<DiscussionNote>, crate::error::ReviewError>;

    /// Posts a new discussion note, anchored at `position` when given, else
    /// as a general (unpositioned) comment (§4.6 step 8).
    async fn create_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        body: &str,
        position: Option<DiscussionPosition>,
    ) -> Result<(), crate::error::ReviewError>;
}

/// In-memory fake backing the review engine's own test suite: fixed
/// projects/MRs/diffs, and discussions that accumulate as the pipeline
/// posts to them.
#[derive(Default)]
pub struct InMemorySourceControl {
    pub merge_requests: Mutex<HashMap<(String, u64), MergeRequest>>,
    pub diffs: Mutex<HashMap<(String, u64), Vec<MrDiff>>>,
    pub discussions: Mutex<HashMap<(String, u64), Vec<DiscussionNote>>>,
}

impl InMemorySourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_merge_request(&self, mr: MergeRequest, diffs: Vec<MrDiff>) {
        let key = (mr.project_id.clone(), mr.iid);
        self.merge_requests.lock().await.insert(key.clone(), mr);
        self.diffs.lock().await.insert(key, diffs);
    }
}

#[async_trait]
impl SourceControl for InMemorySourceControl {
    async fn get_projects(&self) -> Result<Vec<Project>, crate::error::ReviewError> {
        Ok(Vec::new())
    }

    async fn get_project(&self, _project_id: &str) -> Result<Option<Project>, crate::error::ReviewError> {
        Ok(None)
    }

    async fn clone_project(
        &self,
        _path_with_namespace: &str,
        _branch_or_commit: Option<&str>,
    ) -> Result<std::path::PathBuf, crate::error::ReviewError> {
        Err(crate::error::ReviewError::SourceControl("clone_project is not supported by the in-memory fake".into()))
    }

    async fn create_merge_request(
        &self,
        _project_id: &str,
        _title: &str,
        _description: &str,
        _source_branch: &str,
        _target_branch: &str,
    ) -> Result<CreatedMergeRequest, crate::error::ReviewError> {
        Err(crate::error::ReviewError::SourceControl(
            "create_merge_request is not supported by the in-memory fake".into(),
        ))
    }

    async fn get_job_logs(&self, _project_id_or_path: &str, job_id: &str) -> Result<JobLog, crate::error::ReviewError> {
        Ok(JobLog { job_id: job_id.to_string(), text: String::new() })
    }

    async fn get_merge_request(&self, project_id: &str, mr_iid: u64) -> Result<MergeRequest, crate::error::ReviewError> {
        self.merge_requests
            .lock()
            .await
            .get(&(project_id.to_string(), mr_iid))
            .cloned()
            .ok_or_else(|| crate::error::ReviewError::SourceControl(format!("no such MR {project_id}!{mr_iid}")))
    }

    async fn get_merge_request_diffs(&self, project_id: &str, mr_iid: u64) -> Result<Vec<MrDiff>, crate::error::ReviewError> {
        Ok(self
            .diffs
            .lock()
            .await
            .get(&(project_id.to_string(), mr_iid))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_merge_request_discussions(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> Result<Vec<DiscussionNote>, crate::error::ReviewError> {
        Ok(self
            .discussions
            .lock()
            .await
            .get(&(project_id.to_string(), mr_iid))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        body: &str,
        _position: Option<DiscussionPosition>,
    ) -> Result<(), crate::error::ReviewError> {
        let note = DiscussionNote {
            id: uuid::Uuid::new_v4().to_string(),
            body: body.to_string(),
            author_is_bot: true,
        };
        self.discussions
            .lock()
            .await
            .entry((project_id.to_string(), mr_iid))
            .or_default()
            .push(note);
        Ok(())
    }
}

/// GitLab REST v4 adapter. Reads `GITLAB_HOST`/`GITLAB_TOKEN` at
/// construction (§6.5); the bot's own discussion notes are recognized by
/// `GITLAB_BOT_USER_ID` so `DiscussionNote::author_is_bot` can be computed
/// without string-sniffing author names.
pub struct GitLabSourceControl {
    client: reqwest::Client,
    host: String,
    token: String,
    bot_user_id: Option<String>,
}

impl GitLabSourceControl {
    pub fn new(host: impl Into<String>, token: impl Into<String>, bot_user_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            token: token.into(),
            bot_user_id,
        }
    }

    /// Reads `GITLAB_HOST`/`GITLAB_TOKEN`/`GITLAB_BOT_USER_ID` from the
    /// environment (§6.5).
    pub fn from_env() -> Result<Self, crate::error::ReviewError> {
        let host = std::env::var("GITLAB_HOST")
            .map_err(|_| crate::error::ReviewError::SourceControl("GITLAB_HOST is not set".into()))?;
        let token = std::env::var("GITLAB_TOKEN")
            .map_err(|_| crate::error::ReviewError::SourceControl("GITLAB_TOKEN is not set".into()))?;
        let bot_user_id = std::env::var("GITLAB_BOT_USER_ID").ok();
        Ok(Self::new(host, token, bot_user_id))
    }

    fn api_url(&self, path: &str) -> String {
        format!("https://{}/api/v4{path}", self.host.trim_end_matches('/'))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, crate::error::ReviewError> {
        let resp = self
            .client
            .get(self.api_url(path))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?
            .error_for_status()
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?;
        resp.json::<T>().await.map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))
    }
}

#[derive(Deserialize)]
struct GitLabDiffEntry {
    old_path: String,
    new_path: String,
    diff: String,
}

#[derive(Deserialize)]
struct GitLabDiffRefs {
    base_sha: String,
    head_sha: String,
    start_sha: String,
}

#[derive(Deserialize)]
struct GitLabMergeRequest {
    iid: u64,
    title: String,
    diff_refs: Option<GitLabDiffRefs>,
}

#[derive(Deserialize)]
struct GitLabNote {
    id: u64,
    body: String,
    author: GitLabUser,
}

#[derive(Deserialize)]
struct GitLabUser {
    id: u64,
}

#[derive(Deserialize)]
struct GitLabDiscussion {
    notes: Vec<GitLabNote>,
}

#[async_trait]
impl SourceControl for GitLabSourceControl {
    async fn get_projects(&self) -> Result<Vec<Project>, crate::error::ReviewError> {
        #[derive(Deserialize)]
        struct GitLabProject {
            id: u64,
            path_with_namespace: String,
        }
        let projects: Vec<GitLabProject> = self.get_json("/projects?membership=true").await?;
        Ok(projects
            .into_iter()
            .map(|p| Project { id: p.id.to_string(), path_with_namespace: p.path_with_namespace })
            .collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, crate::error::ReviewError> {
        #[derive(Deserialize)]
        struct GitLabProject {
            id: u64,
            path_with_namespace: String,
        }
        let encoded = urlencoding_path(project_id);
        match self.get_json::<GitLabProject>(&format!("/projects/{encoded}")).await {
            Ok(p) => Ok(Some(Project { id: p.id.to_string(), path_with_namespace: p.path_with_namespace })),
            Err(_) => Ok(None),
        }
    }

    async fn clone_project(
        &self,
        path_with_namespace: &str,
        _branch_or_commit: Option<&str>,
    ) -> Result<std::path::PathBuf, crate::error::ReviewError> {
        // Actual `git clone`/`git fetch` shelling out is a boundary-glue
        // concern (working-directory scope, §5 "Scoped acquisition") the
        // runtime crate owns; this adapter only resolves the shared-clone
        // target path per the on-disk layout in §6.4.
        Ok(agentkit_core::scm_project_dir(&agentkit_core::system_dir(), "gitlab", path_with_namespace))
    }

    async fn create_merge_request(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<CreatedMergeRequest, crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id);
        #[derive(Serialize)]
        struct Body<'a> {
            title: &'a str,
            description: &'a str,
            source_branch: &'a str,
            target_branch: &'a str,
        }
        #[derive(Deserialize)]
        struct Created {
            id: u64,
            iid: u64,
            web_url: String,
            title: String,
        }
        let resp: Created = self
            .client
            .post(self.api_url(&format!("/projects/{encoded}/merge_requests")))
            .header("PRIVATE-TOKEN", &self.token)
            .json(&Body { title, description, source_branch, target_branch })
            .send()
            .await
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?
            .error_for_status()
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?
            .json()
            .await
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?;
        Ok(CreatedMergeRequest { id: resp.id.to_string(), iid: resp.iid, url: resp.web_url, title: resp.title })
    }

    async fn get_job_logs(&self, project_id_or_path: &str, job_id: &str) -> Result<JobLog, crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id_or_path);
        let resp = self
            .client
            .get(self.api_url(&format!("/projects/{encoded}/jobs/{job_id}/trace")))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?
            .error_for_status()
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?;
        let text = resp.text().await.map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?;
        Ok(JobLog { job_id: job_id.to_string(), text })
    }

    async fn get_merge_request(&self, project_id: &str, mr_iid: u64) -> Result<MergeRequest, crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id);
        let mr: GitLabMergeRequest = self.get_json(&format!("/projects/{encoded}/merge_requests/{mr_iid}")).await?;
        Ok(MergeRequest {
            project_id: project_id.to_string(),
            iid: mr.iid,
            title: mr.title,
            diff_refs: mr.diff_refs.map(|r| DiffRefs { base_sha: r.base_sha, head_sha: r.head_sha, start_sha: r.start_sha }),
        })
    }

    async fn get_merge_request_diffs(&self, project_id: &str, mr_iid: u64) -> Result<Vec<MrDiff>, crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id);
        let entries: Vec<GitLabDiffEntry> = self.get_json(&format!("/projects/{encoded}/merge_requests/{mr_iid}/diffs")).await?;
        Ok(entries
            .into_iter()
            .map(|e| MrDiff { old_path: e.old_path, new_path: e.new_path, diff_text: e.diff })
            .collect())
    }

    async fn get_merge_request_discussions(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> Result<Vec<DiscussionNote>, crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id);
        let discussions: Vec<GitLabDiscussion> =
            self.get_json(&format!("/projects/{encoded}/merge_requests/{mr_iid}/discussions")).await?;
        Ok(discussions
            .into_iter()
            .flat_map(|d| d.notes)
            .map(|n| DiscussionNote {
                id: n.id.to_string(),
                body: n.body,
                author_is_bot: self.bot_user_id.as_deref() == Some(n.author.id.to_string().as_str()),
            })
            .collect())
    }

    async fn create_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        body: &str,
        position: Option<DiscussionPosition>,
    ) -> Result<(), crate::error::ReviewError> {
        let encoded = urlencoding_path(project_id);
        #[derive(Serialize)]
        struct PositionBody<'a> {
            base_sha: &'a str,
            head_sha: &'a str,
            start_sha: &'a str,
            old_path: &'a str,
            new_path: &'a str,
            new_line: u32,
            position_type: &'static str,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            body: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            position: Option<PositionBody<'a>>,
        }
        let body_payload = Body {
            body,
            position: position.as_ref().map(|p| PositionBody {
                base_sha: &p.diff_refs.base_sha,
                head_sha: &p.diff_refs.head_sha,
                start_sha: &p.diff_refs.start_sha,
                old_path: &p.old_path,
                new_path: &p.new_path,
                new_line: p.new_line,
                position_type: "text",
            }),
        };
        self.client
            .post(self.api_url(&format!("/projects/{encoded}/merge_requests/{mr_iid}/discussions")))
            .header("PRIVATE-TOKEN", &self.token)
            .json(&body_payload)
            .send()
            .await
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?
            .error_for_status()
            .map_err(|e| crate::error::ReviewError::SourceControl(e.to_string()))?;
        Ok(())
    }
}

/// Minimal percent-encoding for a project path used as a URL path segment
/// (GitLab's API takes either a numeric id or a `/`-encoded path).
fn urlencoding_path(project_id: &str) -> String {
    project_id
        .chars()
        .map(|c| match c {
            '/' => "%2F".to_string(),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoding_path_encodes_slashes() {
        assert_eq!(urlencoding_path("group/project"), "group%2Fproject");
        assert_eq!(urlencoding_path("12345"), "12345");
    }

    #[tokio::test]
    async fn in_memory_fake_round_trips_a_seeded_merge_request() {
        let sc = InMemorySourceControl::new();
        sc.seed_merge_request(
            MergeRequest { project_id: "p".into(), iid: 1, title: "t".into(), diff_refs: None },
            vec![MrDiff { old_path: "a.rs".into(), new_path: "a.rs".into(), diff_text: "@@ -1,1 +1,1 @@\n+x".into() }],
        )
        .await;

        let mr = sc.get_merge_request("p", 1).await.unwrap();
        assert_eq!(mr.title, "t");
        let diffs = sc.get_merge_request_diffs("p", 1).await.unwrap();
        assert_eq!(diffs.len(), 1);
    }

    #[tokio::test]
    async fn gitlab_clone_project_resolves_under_the_shared_scm_layout() {
        let sc = GitLabSourceControl::new("gitlab.example.com", "tok", None);
        let path = sc.clone_project("group/project", None).await.unwrap();
        assert!(path.ends_with("gitlab/group/project"));
        assert!(path.to_string_lossy().contains(".typedai"));
    }

    #[tokio::test]
    async fn in_memory_fake_accumulates_posted_discussions() {
        let sc = InMemorySourceControl::new();
        sc.create_discussion("p", 1, "hello", None).await.unwrap();
        sc.create_discussion("p", 1, "world", None).await.unwrap();
        let discussions = sc.get_merge_request_discussions("p", 1).await.unwrap();
        assert_eq!(discussions.len(), 2);
        assert!(discussions.iter().all(|d| d.author_is_bot));
    }
}
