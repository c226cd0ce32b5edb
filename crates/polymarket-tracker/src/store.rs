//! Session persistence: one pretty-printed JSON file per slug
//!
//! Every save is a read-merge-write against whatever is already on disk, so repeated
//! checkpoints and reruns of the same window converge on one history:
//! - points are unioned on `t`, the stored entry wins on conflict
//! - a stored outcome survives a save that carries none
//! - unknown top-level fields in the stored file are carried forward
//!
//! There is no file locking; two processes saving the same slug can still race.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::Session;

#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("pm_session_{}.json", slug))
    }

    /// Stored session for `slug`; `Ok(None)` when no file exists
    pub async fn load(&self, slug: &str) -> Result<Option<Session>> {
        let path = self.path_for(slug);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let session = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(session))
    }

    /// Merge `session` into the stored file and write it back
    pub async fn save(&self, session: &Session) -> Result<PathBuf> {
        let path = self.path_for(&session.slug);

        let merged = match self.load(&session.slug).await {
            Ok(Some(existing)) => merge(existing, session),
            Ok(None) => sorted(session.clone()),
            Err(e) => {
                warn!("Existing session file unusable, overwriting: {:#}", e);
                sorted(session.clone())
            }
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(&merged).context("Failed to serialize session")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(
            "Saved {} ({} points, outcome={:?})",
            path.display(),
            merged.price_history.len(),
            merged.outcome
        );
        Ok(path)
    }
}

/// Combine a stored session with the in-memory one
pub fn merge(existing: Session, incoming: &Session) -> Session {
    let mut points = BTreeMap::new();
    for point in existing.price_history {
        points.entry(point.t).or_insert(point);
    }
    for point in &incoming.price_history {
        points.entry(point.t).or_insert_with(|| point.clone());
    }

    let (outcome, outcome_source) = if incoming.outcome.is_some() {
        (incoming.outcome.clone(), incoming.outcome_source)
    } else {
        (existing.outcome, existing.outcome_source)
    };

    let mut extra = existing.extra;
    for (key, value) in &incoming.extra {
        extra.insert(key.clone(), value.clone());
    }

    Session {
        slug: incoming.slug.clone(),
        resolution_ts: incoming.resolution_ts,
        question: if incoming.question.is_empty() { existing.question } else { incoming.question.clone() },
        outcome,
        outcome_source,
        price_history: points.into_values().collect(),
        extra,
    }
}

fn sorted(mut session: Session) -> Session {
    session.price_history.sort_by_key(|p| p.t);
    session.price_history.dedup_by_key(|p| p.t);
    session
}
