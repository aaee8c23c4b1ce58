//! Persistence for generated CSS selector sets.
//!
//! Selector generation itself (the LLM round-trip) lives outside this
//! crate; this module only stores its output per task and lets the
//! refinement flow reuse selectors from similar past tasks.

use crate::error::{QuarryError, Result};
use crate::feedback::sanitize_task_id;
use crate::urls;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Minimum description word-overlap score for a reuse candidate.
const SIMILARITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorRecord {
    pub task_id: String,
    pub url: String,
    pub data_description: String,
    /// Field name to CSS selector.
    pub selectors: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}

pub trait SelectorStore {
    fn get(&self, task_id: &str) -> Result<Option<SelectorRecord>>;
    fn save(&self, record: &SelectorRecord) -> Result<()>;
    fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>>;
    fn delete(&self, task_id: &str) -> Result<()>;
    /// Best same-domain record whose description overlaps enough with the
    /// request, if any.
    fn find_similar(&self, url: &str, data_description: &str) -> Result<Option<SelectorRecord>>;
}

pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new() -> Result<Self> {
        let proj = ProjectDirs::from("io", "quarry", "quarry").ok_or_else(|| {
            QuarryError::storage_error("initialization", "could not resolve data dir")
        })?;
        Self::at(proj.data_local_dir().join("selectors"))
    }

    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("selector store initialized in {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_task_id(task_id)))
    }

    fn read_all(&self) -> Vec<SelectorRecord> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            match serde_json::from_reader(file) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("skipping unreadable selector file {}: {e}", path.display());
                }
            }
        }
        records
    }
}

impl SelectorStore for LocalFsStore {
    fn get(&self, task_id: &str) -> Result<Option<SelectorRecord>> {
        let path = self.path_for(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path)?;
        let record = serde_json::from_reader(file)?;
        Ok(Some(record))
    }

    fn save(&self, record: &SelectorRecord) -> Result<()> {
        let file = fs::File::create(self.path_for(&record.task_id))?;
        serde_json::to_writer_pretty(file, record)?;
        info!("saved selectors for task {}", record.task_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let mut out: Vec<(String, DateTime<Utc>)> = self
            .read_all()
            .into_iter()
            .map(|record| (record.task_id, record.generated_at))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn delete(&self, task_id: &str) -> Result<()> {
        let path = self.path_for(task_id);
        if path.exists() {
            fs::remove_file(path)?;
            info!("deleted selectors for task {task_id}");
        }
        Ok(())
    }

    fn find_similar(&self, url: &str, data_description: &str) -> Result<Option<SelectorRecord>> {
        let target_domain = urls::domain(url).into_string();

        let mut best: Option<(f64, SelectorRecord)> = None;
        for record in self.read_all() {
            if urls::domain(&record.url).as_str() != target_domain {
                continue;
            }
            let score = description_similarity(data_description, &record.data_description);
            match &best {
                Some((highest, _)) if score <= *highest => {}
                _ => best = Some((score, record)),
            }
        }

        match best {
            Some((score, record)) if score > SIMILARITY_THRESHOLD => {
                info!("found similar selectors with similarity score {score:.2}");
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }
}

/// Word-overlap ratio of the two descriptions, in [0, 1].
fn description_similarity(a: &str, b: &str) -> f64 {
    let a_words: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let b_words: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }
    let common = a_words.intersection(&b_words).count();
    common as f64 / a_words.len().max(b_words.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::jitter_ms;

    fn temp_store(tag: &str) -> LocalFsStore {
        let root = std::env::temp_dir().join(format!(
            "quarry-selectors-{tag}-{}-{}",
            std::process::id(),
            jitter_ms(u64::MAX)
        ));
        LocalFsStore::at(root).expect("temp dir creatable")
    }

    fn record(task_id: &str, url: &str, description: &str) -> SelectorRecord {
        let mut selectors = BTreeMap::new();
        selectors.insert("title".to_string(), "h1.product".to_string());
        selectors.insert("price".to_string(), "span.price".to_string());
        SelectorRecord {
            task_id: task_id.to_string(),
            url: url.to_string(),
            data_description: description.to_string(),
            selectors,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn save_then_get_roundtrips() {
        let store = temp_store("roundtrip");
        let rec = record("task-1", "https://shop.example.com/items", "product prices");
        store.save(&rec).unwrap();

        let loaded = store.get("task-1").unwrap().expect("record present");
        assert_eq!(loaded.url, rec.url);
        assert_eq!(loaded.selectors.get("price").map(String::as_str), Some("span.price"));
    }

    #[test]
    fn get_missing_task_is_none() {
        let store = temp_store("missing");
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn list_and_delete() {
        let store = temp_store("list");
        store.save(&record("b-task", "https://example.com", "x")).unwrap();
        store.save(&record("a-task", "https://example.com", "y")).unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a-task", "b-task"]);

        store.delete("a-task").unwrap();
        assert!(store.get("a-task").unwrap().is_none());
        // Deleting again is not an error.
        store.delete("a-task").unwrap();
    }

    #[test]
    fn find_similar_matches_same_domain_and_description() {
        let store = temp_store("similar");
        store
            .save(&record("old", "https://shop.example.com/list", "product names and prices"))
            .unwrap();

        let found = store
            .find_similar("https://shop.example.com/other", "product names prices")
            .unwrap();
        assert_eq!(found.map(|r| r.task_id).as_deref(), Some("old"));
    }

    #[test]
    fn find_similar_rejects_other_domains_and_weak_overlap() {
        let store = temp_store("reject");
        store
            .save(&record("old", "https://shop.example.com/list", "product names and prices"))
            .unwrap();

        let other_domain = store
            .find_similar("https://news.example.org/x", "product prices")
            .unwrap();
        assert!(other_domain.is_none());

        let weak = store
            .find_similar("https://shop.example.com/x", "completely unrelated request")
            .unwrap();
        assert!(weak.is_none());
    }
}
