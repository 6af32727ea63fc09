//! The Code Review Engine (C9, §4.6): per `(projectId, mrIid)`, enumerates
//! `(diff, rule)` review units, skips units whose content fingerprint is
//! already in the cache, and otherwise asks the LLM for violations and
//! posts de-duplicated inline comments.

use crate::config::{CodeReviewConfig, CodeReviewConfigStore};
use crate::diff::{self, PreparedCode};
use crate::error::ReviewError;
use crate::fingerprint_cache::ReviewCacheStore;
use crate::source_control::{DiffRefs, DiscussionPosition, MrDiff, SourceControl};
use agentkit_core::tracing_shim::with_span;
use agentkit_llm::{GenerateOptions, LlmCall, LlmCallStore, LlmMessage, LlmProvider};
use serde::Deserialize;
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::Arc;

fn sha256_hex(input: &str) -> String {
    use sha2::Digest;
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn sha1_hex_16(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Derives the content fingerprint for one unit (§4.6 step 5): excludes
/// line numbers and head SHA so cosmetic re-pushes that don't touch
/// content still hit the cache.
pub fn fingerprint(project_id: &str, mr_iid: u64, file: &str, rule_id: &str, rule_version: u32, code_without_lines: &str) -> String {
    let content_hash = sha256_hex(code_without_lines);
    sha256_hex(&format!("prj:{project_id}|mr:{mr_iid}|file:{file}|rule:{rule_id}|ruleVer:{rule_version}|content:{content_hash}"))
}

/// The embedded marker identifying one violation comment, both for posting
/// and for de-duplication against existing discussions (§4.6 step 2, 8).
fn violation_identifier(rule_id: &str, file: &str, context_hash: &str) -> String {
    format!("bot-review-id: rule={rule_id}, file={file}, contextHash={context_hash}")
}

fn identifier_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"bot-review-id: rule=[^,]*, file=[^,]*, contextHash=[0-9a-f]+").unwrap())
}

/// Scans existing discussion bodies for embedded `bot-review-id: ...`
/// markers (§4.6 step 2).
fn extract_existing_identifiers(bodies: impl Iterator<Item = String>) -> HashSet<String> {
    bodies
        .filter_map(|body| identifier_re().find(&body).map(|m| m.as_str().to_string()))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
struct LlmViolation {
    #[serde(rename = "lineNumber")]
    line_number: u32,
    comment: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmReviewResponse {
    #[allow(dead_code)]
    thinking: String,
    violations: Vec<LlmViolation>,
}

impl LlmReviewResponse {
    /// Parses the LLM's structured output defensively: an invalid shape
    /// returns `None`, so the caller skips the unit without writing to the
    /// cache (§4.6 step 7).
    fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(text) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("LLM review response did not match the expected shape: {e}");
                None
            }
        }
    }
}

/// Builds the structured review prompt embedding the rule (as XML) and the
/// line-numbered code (§4.6 step 7).
fn build_prompt(rule: &CodeReviewConfig, prepared: &PreparedCode) -> String {
    let mut examples = String::new();
    for ex in &rule.examples {
        examples.push_str(&format!(
            "  <example>\n    <code><![CDATA[{}]]></code>\n    <review_comment>{}</review_comment>\n  </example>\n",
            ex.code, ex.review_comment
        ));
    }
    format!(
        "<rule>\n  <id>{}</id>\n  <title>{}</title>\n  <description>{}</description>\n{}</rule>\n\n\
         Review the following code for violations of the rule above. Each kept line is prefixed with its line number.\n\
         Respond with JSON shaped exactly {{\"thinking\": string, \"violations\": [{{\"lineNumber\": number, \"comment\": string}}]}}.\n\
         If there are no violations, respond with an empty violations array.\n\n\
         <code><![CDATA[{}]]></code>",
        rule.id, rule.title, rule.description, examples, prepared.code_with_lines
    )
}

/// Picks the new-file line to anchor a violation comment at: the kept line
/// whose number matches, or — per the heuristic named in the Open
/// Questions — the next kept line when the LLM points at an injected
/// line-number comment rather than an actual code line.
fn resolve_anchor_line(prepared: &PreparedCode, llm_line_number: u32) -> Option<u32> {
    if let Some(exact) = prepared.lines.iter().find(|l| l.line_number == llm_line_number) {
        return Some(exact.line_number);
    }
    let next = prepared.lines.iter().find(|l| l.line_number > llm_line_number).map(|l| l.line_number);
    if next.is_some() {
        log::warn!("LLM line {llm_line_number} did not match a kept line exactly; anchoring at the next kept line");
    }
    next
}

/// `±3` lines of code around `line_number` from the LLM's view, used in the
/// context hash (§4.6 step 8).
fn context_window(prepared: &PreparedCode, line_number: u32) -> String {
    let idx = prepared.lines.iter().position(|l| l.line_number == line_number);
    let Some(idx) = idx else {
        return String::new();
    };
    let start = idx.saturating_sub(3);
    let end = (idx + 4).min(prepared.lines.len());
    prepared.lines[start..end].iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
}

/// One review unit: a `(diff, rule)` pair that passed applicability (§4.6
/// step 3).
struct ReviewUnit<'a> {
    rule: &'a CodeReviewConfig,
    diff: &'a MrDiff,
}

/// Outcome of one `review_merge_request` run, returned for observability
/// and tests (§8 scenario 3: "first run: 1 LLM call, 0 violations...").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub units_enumerated: usize,
    pub units_skipped_by_cache: usize,
    pub llm_calls: usize,
    pub violations_posted: usize,
}

pub struct ReviewEngine {
    source_control: Arc<dyn SourceControl>,
    config_store: Arc<dyn CodeReviewConfigStore>,
    cache_store: Arc<dyn ReviewCacheStore>,
    llm: Arc<dyn LlmProvider>,
    llm_calls: Arc<dyn LlmCallStore>,
}

impl ReviewEngine {
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        config_store: Arc<dyn CodeReviewConfigStore>,
        cache_store: Arc<dyn ReviewCacheStore>,
        llm: Arc<dyn LlmProvider>,
        llm_calls: Arc<dyn LlmCallStore>,
    ) -> Self {
        Self { source_control, config_store, cache_store, llm, llm_calls }
    }

    /// Runs the full pipeline for one merge request (§4.6).
    pub async fn review_merge_request(&self, project_id: &str, mr_iid: u64) -> Result<ReviewSummary, ReviewError> {
        let mr = with_span("review.get_merge_request", self.source_control.get_merge_request(project_id, mr_iid)).await?;
        let diffs = with_span("review.get_diffs", self.source_control.get_merge_request_diffs(project_id, mr_iid)).await?;
        let discussions =
            with_span("review.get_discussions", self.source_control.get_merge_request_discussions(project_id, mr_iid)).await?;
        let mut cache = with_span("review_cache.get", self.cache_store.get(project_id, mr_iid)).await?;

        let mut existing_identifiers = extract_existing_identifiers(
            discussions.into_iter().filter(|d| d.author_is_bot).map(|d| d.body),
        );

        let rules = self.config_store.list_enabled().await?;

        let mut units = Vec::new();
        for diff in &diffs {
            for rule in &rules {
                if rule.is_applicable(project_id, &diff.new_path, &diff.diff_text) {
                    units.push(ReviewUnit { rule, diff });
                }
            }
        }
        let units_enumerated = units.len();

        // Prepare code and check the cache up front (cheap, sequential);
        // only units that miss the cache go on to the LLM fan-out.
        let mut pending = Vec::new();
        let mut units_skipped_by_cache = 0;
        for unit in units {
            let prepared = match diff::prepare_file_diff_for_review(&unit.diff.diff_text, &unit.diff.new_path) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!(
                        "skipping review unit {}/{}: {e}",
                        unit.rule.id,
                        unit.diff.new_path
                    );
                    continue;
                }
            };
            let fp = fingerprint(project_id, mr_iid, &unit.diff.new_path, &unit.rule.id, unit.rule.rule_version, &prepared.code_without_lines);
            if cache.fingerprints.contains(&fp) {
                units_skipped_by_cache += 1;
                continue;
            }
            pending.push((unit, prepared, fp));
        }

        // LLM calls for distinct pending units run in parallel (§4.6
        // "Concurrency"); result handling below is serial.
        let llm_calls_made = pending.len();
        let reviewed = futures::future::join_all(pending.into_iter().map(|(unit, prepared, fp)| async move {
            let prompt = build_prompt(unit.rule, &prepared);
            let response = self.call_llm(project_id, mr_iid, unit.rule, unit.diff, &prompt).await;
            (unit, prepared, fp, response)
        }))
        .await;

        let mut violations_posted = 0;

        for (unit, prepared, fp, response) in reviewed {
            let Some(response) = response else {
                // Invalid shape: skip the unit, no cache mutation (§4.6 step 7).
                continue;
            };

            if response.violations.is_empty() {
                cache.fingerprints.insert(fp);
                continue;
            }

            for violation in &response.violations {
                let context = context_window(&prepared, violation.line_number);
                let context_hash = sha1_hex_16(&format!(
                    "{}|{}|{}|{}",
                    unit.rule.id, unit.diff.new_path, violation.line_number, context
                ));
                let identifier = violation_identifier(&unit.rule.id, &unit.diff.new_path, &context_hash);
                if existing_identifiers.contains(&identifier) {
                    continue;
                }

                let body = format!("<!-- {identifier} -->\n\n{}", violation.comment);
                let position = mr.diff_refs.as_ref().and_then(|refs| {
                    resolve_anchor_line(&prepared, violation.line_number).map(|new_line| DiscussionPosition {
                        diff_refs: DiffRefs {
                            base_sha: refs.base_sha.clone(),
                            head_sha: refs.head_sha.clone(),
                            start_sha: refs.start_sha.clone(),
                        },
                        old_path: unit.diff.old_path.clone(),
                        new_path: unit.diff.new_path.clone(),
                        new_line,
                    })
                });

                with_span(
                    "review.create_discussion",
                    self.source_control.create_discussion(project_id, mr_iid, &body, position),
                )
                .await?;
                existing_identifiers.insert(identifier);
                violations_posted += 1;
            }
        }

        // §4.7's `update` unconditionally bumps `lastUpdated`; §8 requires a
        // no-op re-review (every unit skipped by the cache, no fingerprints
        // added) to still leave `lastUpdated` advanced, so this write happens
        // every run rather than only when the fingerprint set changed.
        let now_ms = agentkit_llm::call::now_ms();
        with_span("review_cache.update", self.cache_store.update(project_id, mr_iid, &cache, now_ms)).await?;

        Ok(ReviewSummary {
            units_enumerated,
            units_skipped_by_cache,
            llm_calls: llm_calls_made,
            violations_posted,
        })
    }

    async fn call_llm(
        &self,
        project_id: &str,
        mr_iid: u64,
        rule: &CodeReviewConfig,
        diff: &MrDiff,
        prompt: &str,
    ) -> Option<LlmReviewResponse> {
        let messages = vec![
            LlmMessage::system("You are a strict, precise code reviewer. Follow the rule exactly; do not invent violations."),
            LlmMessage::user(prompt.to_string()),
        ];

        let mut call = LlmCall::new(self.llm.get_id(), messages.clone());
        call.description = Some(format!("review:{project_id}:{mr_iid}:{}:{}", rule.id, diff.new_path));
        if let Err(e) = self.llm_calls.save_request(&call).await {
            log::warn!("failed to persist review LLM request: {e}");
        }

        let result = self.llm.generate(&messages, &GenerateOptions::default()).await;
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                log::warn!("review LLM call failed for {}/{}: {e}", rule.id, diff.new_path);
                return None;
            }
        };

        call.messages.push(result.message.clone());
        call.cost = result.usage.cost;
        call.input_tokens = Some(result.usage.input_tokens);
        call.output_tokens = Some(result.usage.output_tokens);
        if let Err(e) = self.llm_calls.save_response(&call).await {
            log::warn!("failed to persist review LLM response: {e}");
        }

        LlmReviewResponse::parse(&result.message.content.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileExtensions, InMemoryCodeReviewConfigStore, RequiresText};
    use crate::fingerprint_cache::InMemoryReviewCacheStore;
    use crate::source_control::{InMemorySourceControl, MergeRequest};
    use agentkit_llm::store::InMemoryLlmCallStore;
    use agentkit_llm::{GenerateResult, LlmError, Usage};
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedLlm {
        responses: AsyncMutex<Vec<&'static str>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&'static str>) -> Self {
            Self { responses: AsyncMutex::new(responses.into_iter().rev().collect()), calls: std::sync::atomic::AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn get_id(&self) -> &str {
            "scripted"
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn get_max_input_tokens(&self) -> u64 {
            1_000_000
        }
        async fn generate(&self, _messages: &[LlmMessage], _opts: &GenerateOptions) -> Result<GenerateResult, LlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut guard = self.responses.lock().await;
            let text = guard.pop().expect("scripted response exhausted");
            Ok(GenerateResult { message: LlmMessage::assistant(text), usage: Usage::default() })
        }
    }

    fn rule() -> CodeReviewConfig {
        CodeReviewConfig {
            id: "no-unwrap".into(),
            title: "No unwrap()".into(),
            enabled: true,
            description: "Flags unwrap() in non-test code".into(),
            file_extensions: FileExtensions { include: vec!["rs".into()] },
            requires: RequiresText { text: vec![".unwrap()".into()] },
            project_paths: vec![],
            examples: vec![],
            rule_version: 1,
        }
    }

    async fn engine(llm: ScriptedLlm) -> (Arc<InMemorySourceControl>, Arc<InMemoryReviewCacheStore>, ReviewEngine) {
        let sc = Arc::new(InMemorySourceControl::new());
        let config_store = Arc::new(InMemoryCodeReviewConfigStore::new());
        config_store.upsert(rule()).await.unwrap();
        let cache_store = Arc::new(InMemoryReviewCacheStore::new());
        let llm_calls = Arc::new(InMemoryLlmCallStore::new());
        let engine = ReviewEngine::new(sc.clone(), config_store, cache_store.clone(), Arc::new(llm), llm_calls);
        (sc, cache_store, engine)
    }

    #[tokio::test]
    async fn no_violations_caches_the_fingerprint_and_posts_nothing() {
        let llm = ScriptedLlm::new(vec![r#"{"thinking": "looks fine", "violations": []}"#]);
        let (sc, cache_store, engine) = engine(llm).await;

        sc.seed_merge_request(
            MergeRequest { project_id: "proj".into(), iid: 1, title: "t".into(), diff_refs: None },
            vec![MrDiff {
                old_path: "src/main.rs".into(),
                new_path: "src/main.rs".into(),
                diff_text: "@@ -1,1 +1,1 @@\n+x.unwrap();".into(),
            }],
        )
        .await;

        let summary = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(summary.units_enumerated, 1);
        assert_eq!(summary.llm_calls, 1);
        assert_eq!(summary.violations_posted, 0);

        let cache = cache_store.get("proj", 1).await.unwrap();
        assert_eq!(cache.fingerprints.len(), 1);
    }

    #[tokio::test]
    async fn a_second_review_of_the_same_diff_performs_zero_llm_calls() {
        let llm = ScriptedLlm::new(vec![r#"{"thinking": "looks fine", "violations": []}"#]);
        let (sc, cache_store, engine) = engine(llm).await;

        sc.seed_merge_request(
            MergeRequest { project_id: "proj".into(), iid: 1, title: "t".into(), diff_refs: None },
            vec![MrDiff {
                old_path: "src/main.rs".into(),
                new_path: "src/main.rs".into(),
                diff_text: "@@ -1,1 +1,1 @@\n+x.unwrap();".into(),
            }],
        )
        .await;

        let first = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(first.llm_calls, 1);
        let before = cache_store.get("proj", 1).await.unwrap();

        // Force the two `now_ms()` reads apart so the `last_updated` bump
        // below is actually observable rather than landing in the same
        // millisecond.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(second.llm_calls, 0);
        assert_eq!(second.units_skipped_by_cache, 1);

        let after = cache_store.get("proj", 1).await.unwrap();
        assert_eq!(after.fingerprints, before.fingerprints);
        assert!(after.last_updated > before.last_updated, "a no-op re-review must still bump last_updated (§4.7, §8)");
    }

    #[tokio::test]
    async fn a_violation_is_posted_as_a_discussion_with_the_embedded_identifier() {
        let llm = ScriptedLlm::new(vec![
            r#"{"thinking": "found one", "violations": [{"lineNumber": 1, "comment": "avoid unwrap"}]}"#,
        ]);
        let (sc, _cache_store, engine) = engine(llm).await;

        sc.seed_merge_request(
            MergeRequest { project_id: "proj".into(), iid: 1, title: "t".into(), diff_refs: None },
            vec![MrDiff {
                old_path: "src/main.rs".into(),
                new_path: "src/main.rs".into(),
                diff_text: "@@ -1,1 +1,1 @@\n+x.unwrap();".into(),
            }],
        )
        .await;

        let summary = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(summary.violations_posted, 1);

        let discussions = sc.get_merge_request_discussions("proj", 1).await.unwrap();
        assert_eq!(discussions.len(), 1);
        assert!(discussions[0].body.contains("bot-review-id: rule=no-unwrap, file=src/main.rs, contextHash="));
    }

    #[tokio::test]
    async fn a_duplicate_violation_identifier_is_not_reposted() {
        let llm = ScriptedLlm::new(vec![
            r#"{"thinking": "found one", "violations": [{"lineNumber": 1, "comment": "avoid unwrap"}]}"#,
            r#"{"thinking": "found one", "violations": [{"lineNumber": 1, "comment": "avoid unwrap"}]}"#,
        ]);
        let (sc, _cache_store, engine) = engine(llm).await;

        let diff = MrDiff {
            old_path: "src/main.rs".into(),
            new_path: "src/main.rs".into(),
            diff_text: "@@ -1,1 +1,1 @@\n+x.unwrap();".into(),
        };
        sc.seed_merge_request(
            MergeRequest { project_id: "proj".into(), iid: 1, title: "t".into(), diff_refs: None },
            vec![diff.clone()],
        )
        .await;

        let first = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(first.violations_posted, 1);

        // Re-seed with unchanged content under a new rule_version bump would
        // normally change the fingerprint; here we simply re-run against the
        // same diff with the cache untouched to exercise existing-identifier
        // dedup against prior discussions rather than the fingerprint cache.
        let second = engine.review_merge_request("proj", 1).await.unwrap();
        assert_eq!(second.violations_posted, 0);
        let discussions = sc.get_merge_request_discussions("proj", 1).await.unwrap();
        assert_eq!(discussions.len(), 1);
    }

    #[test]
    fn fingerprint_is_stable_for_identical_content() {
        let a = fingerprint("proj", 1, "f.rs", "rule", 1, "fn main() {}");
        let b = fingerprint("proj", 1, "f.rs", "rule", 1, "fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_when_rule_version_bumps() {
        let a = fingerprint("proj", 1, "f.rs", "rule", 1, "fn main() {}");
        let b = fingerprint("proj", 1, "f.rs", "rule", 2, "fn main() {}");
        assert_ne!(a, b);
    }

    #[test]
    fn extract_existing_identifiers_finds_embedded_markers() {
        let bodies = vec!["<!-- bot-review-id: rule=r1, file=f.rs, contextHash=abc123abc123abcd -->\n\nsome comment".to_string()];
        let found = extract_existing_identifiers(bodies.into_iter());
        assert_eq!(found.len(), 1);
        assert!(found.iter().next().unwrap().starts_with("bot-review-id: rule=r1"));
    }
}
