//! Feedback persistence and naive aggregates.
//!
//! One pretty-printed JSON file per submission; records are immutable
//! once written. The aggregates feed selector refinement: average rating
//! per task/domain and a keyword scan over free-text comments.

use crate::error::{QuarryError, Result};
use chrono::Utc;
use directories::ProjectDirs;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Keywords counted by [`FeedbackStore::common_issues`]. Deliberately a
/// small fixed table, not a classifier.
pub const ISSUE_KEYWORDS: &[&str] = &[
    "missing data",
    "wrong data",
    "incomplete",
    "error",
    "slow",
    "timeout",
    "blocked",
    "captcha",
    "wrong format",
    "duplicate",
    "empty",
    "not working",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: String,
    pub url: String,
    pub data_description: String,
    /// Expected range 1-10; not enforced.
    pub rating: Option<u8>,
    pub comment: Option<String>,
    /// Unix timestamp; also part of the filename.
    pub created_at: i64,
}

pub struct FeedbackStore {
    root: PathBuf,
}

impl FeedbackStore {
    /// Store under the platform data dir.
    pub fn new() -> Result<Self> {
        let proj = ProjectDirs::from("io", "quarry", "quarry").ok_or_else(|| {
            QuarryError::storage_error("initialization", "could not resolve data dir")
        })?;
        Self::at(proj.data_local_dir().join("feedback"))
    }

    /// Store under an explicit directory, created if absent.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("feedback store initialized in {}", root.display());
        Ok(Self { root })
    }

    /// Persist one submission. Failures are logged and reported as
    /// `false`; they never propagate.
    pub fn store(
        &self,
        task_id: &str,
        url: &str,
        data_description: &str,
        rating: Option<u8>,
        comment: Option<&str>,
    ) -> bool {
        let record = FeedbackRecord {
            task_id: task_id.to_string(),
            url: url.to_string(),
            data_description: data_description.to_string(),
            rating,
            comment: comment.map(str::to_string),
            created_at: Utc::now().timestamp(),
        };
        match self.write_record(&record) {
            Ok(()) => {
                info!("stored feedback for task {task_id}");
                true
            }
            Err(e) => {
                error!("failed to store feedback for task {task_id}: {e}");
                false
            }
        }
    }

    fn write_record(&self, record: &FeedbackRecord) -> Result<()> {
        let name = format!(
            "{}_{}.json",
            sanitize_task_id(&record.task_id),
            record.created_at
        );
        let file = fs::File::create(self.root.join(name))?;
        serde_json::to_writer_pretty(file, record)?;
        Ok(())
    }

    /// All feedback for a task, newest first.
    pub fn for_task(&self, task_id: &str) -> Vec<FeedbackRecord> {
        let prefix = format!("{}_", sanitize_task_id(task_id));
        self.read_matching(|name, _| name.starts_with(&prefix))
    }

    /// All feedback whose stored URL contains `domain`, newest first.
    pub fn for_domain(&self, domain: &str) -> Vec<FeedbackRecord> {
        self.read_matching(|_, record| record.url.contains(domain))
    }

    /// Average rating for a task, a domain, or everything. 0.0 when no
    /// rated records match.
    pub fn average_rating(&self, task_id: Option<&str>, domain: Option<&str>) -> f64 {
        let records = match (task_id, domain) {
            (Some(task), _) => self.for_task(task),
            (None, Some(domain)) => self.for_domain(domain),
            (None, None) => self.read_matching(|_, _| true),
        };
        let ratings: Vec<f64> = records
            .iter()
            .filter_map(|r| r.rating.map(f64::from))
            .collect();
        if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().sum::<f64>() / ratings.len() as f64
        }
    }

    /// Most recent submissions across all tasks.
    pub fn recent(&self, limit: usize) -> Vec<FeedbackRecord> {
        let mut records = self.read_matching(|_, _| true);
        records.truncate(limit);
        records
    }

    /// Case-insensitive substring counts of [`ISSUE_KEYWORDS`] across all
    /// stored comments.
    pub fn common_issues(&self) -> BTreeMap<&'static str, u32> {
        let mut issues = BTreeMap::new();
        for record in self.read_matching(|_, _| true) {
            let comment = match &record.comment {
                Some(text) if !text.is_empty() => text.to_lowercase(),
                _ => continue,
            };
            for keyword in ISSUE_KEYWORDS {
                if comment.contains(keyword) {
                    *issues.entry(*keyword).or_insert(0) += 1;
                }
            }
        }
        issues
    }

    /// Read every record passing the filter, newest first. Directory or
    /// file problems shrink the result instead of raising; corrupt files
    /// are skipped.
    fn read_matching(
        &self,
        keep: impl Fn(&str, &FeedbackRecord) -> bool,
    ) -> Vec<FeedbackRecord> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                error!("error reading feedback dir {}: {e}", self.root.display());
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_name().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            let record: FeedbackRecord = match serde_json::from_reader(file) {
                Ok(r) => r,
                Err(_) => continue, // skip corrupt files
            };
            if keep(&name, &record) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

/// Replace anything non-alphanumeric so a task id is safe in a filename.
pub(crate) fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::jitter_ms;

    fn temp_store(tag: &str) -> FeedbackStore {
        let root = std::env::temp_dir().join(format!(
            "quarry-feedback-{tag}-{}-{}",
            std::process::id(),
            jitter_ms(u64::MAX)
        ));
        FeedbackStore::at(root).expect("temp dir creatable")
    }

    fn write_at(store: &FeedbackStore, task_id: &str, url: &str, comment: &str, ts: i64) {
        let record = FeedbackRecord {
            task_id: task_id.to_string(),
            url: url.to_string(),
            data_description: "product names".to_string(),
            rating: Some(7),
            comment: Some(comment.to_string()),
            created_at: ts,
        };
        store.write_record(&record).expect("record written");
    }

    #[test]
    fn stored_record_is_first_for_its_task() {
        let store = temp_store("roundtrip");
        assert!(store.store("task-1", "https://example.com/a", "prices", Some(8), None));

        let records = store.for_task("task-1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, "task-1");
        assert_eq!(records[0].rating, Some(8));
    }

    #[test]
    fn for_task_sorts_newest_first_and_ignores_other_tasks() {
        let store = temp_store("sorting");
        write_at(&store, "alpha", "https://example.com/1", "old", 100);
        write_at(&store, "alpha", "https://example.com/2", "new", 200);
        write_at(&store, "beta", "https://example.com/3", "other", 300);

        let records = store.for_task("alpha");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].created_at, 200);
        assert_eq!(records[1].created_at, 100);
    }

    #[test]
    fn task_ids_with_separators_do_not_collide() {
        let store = temp_store("sanitize");
        write_at(&store, "job/1", "https://example.com/1", "a", 100);
        write_at(&store, "job.2", "https://example.com/2", "b", 200);

        // Both sanitize to job_<n>_ prefixes, but full prefixes differ.
        assert_eq!(store.for_task("job/1").len(), 1);
        assert_eq!(store.for_task("job.2").len(), 1);
    }

    #[test]
    fn for_domain_filters_by_url_substring() {
        let store = temp_store("domain");
        write_at(&store, "a", "https://shop.example.com/x", "one", 100);
        write_at(&store, "b", "https://other.net/y", "two", 200);

        let records = store.for_domain("example.com");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, "a");
    }

    #[test]
    fn average_rating_scopes_and_defaults_to_zero() {
        let store = temp_store("rating");
        assert_eq!(store.average_rating(None, None), 0.0);

        write_at(&store, "a", "https://example.com/1", "x", 100);
        write_at(&store, "a", "https://example.com/2", "y", 200);
        assert_eq!(store.average_rating(Some("a"), None), 7.0);
        assert_eq!(store.average_rating(None, Some("example.com")), 7.0);
        assert_eq!(store.average_rating(Some("missing"), None), 0.0);
    }

    #[test]
    fn recent_honors_the_limit() {
        let store = temp_store("recent");
        for ts in 1..=5 {
            write_at(&store, &format!("t{ts}"), "https://example.com", "c", ts);
        }
        let records = store.recent(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].created_at, 5);
    }

    #[test]
    fn common_issues_counts_keywords_case_insensitively() {
        let store = temp_store("issues");
        write_at(&store, "a", "https://example.com", "Hit a CAPTCHA, then a timeout", 100);
        write_at(&store, "b", "https://example.com", "page blocked us", 200);
        write_at(&store, "c", "https://example.com", "all good", 300);

        let issues = store.common_issues();
        assert_eq!(issues.get("captcha"), Some(&1));
        assert_eq!(issues.get("timeout"), Some(&1));
        assert_eq!(issues.get("blocked"), Some(&1));
        assert_eq!(issues.get("missing data"), None);
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let store = temp_store("corrupt");
        write_at(&store, "a", "https://example.com", "fine", 100);
        fs::write(store.root.join("broken_200.json"), "{not json").unwrap();

        assert_eq!(store.recent(10).len(), 1);
    }

    #[test]
    fn missing_directory_reads_as_empty() {
        let store = temp_store("missing");
        fs::remove_dir_all(&store.root).unwrap();
        assert!(store.for_task("a").is_empty());
        assert_eq!(store.average_rating(None, None), 0.0);
    }
}
