//! Query history and feedback.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::models::QueryHistory;
use crate::store::GraphStore;
use crate::{Error, Result};

/// Latency summary over all recorded queries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResponseTimeStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

pub struct QueryHistoryLog {
    store: Arc<dyn GraphStore>,
}

impl QueryHistoryLog {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, record: &QueryHistory) -> Result<()> {
        self.store.append_history(record).await
    }

    /// Attach a feedback label; the only mutation a record ever sees.
    pub async fn provide_feedback(&self, history_id: Uuid, label: &str) -> Result<()> {
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::InvalidArgument("feedback label is empty".to_string()));
        }
        self.store.set_feedback(history_id, label).await
    }

    /// Newest first.
    pub async fn list_history(&self, session_id: &str, limit: usize) -> Result<Vec<QueryHistory>> {
        self.store.history_for_session(session_id, limit).await
    }

    pub async fn response_time_stats(&self) -> Result<ResponseTimeStats> {
        let history = self.store.all_history().await?;
        if history.is_empty() {
            return Ok(ResponseTimeStats::default());
        }

        let times = history.iter().map(|h| h.response_time_ms);
        let total: u64 = times.clone().sum();
        Ok(ResponseTimeStats {
            count: history.len(),
            avg_ms: total as f64 / history.len() as f64,
            min_ms: times.clone().min().unwrap_or(0),
            max_ms: times.max().unwrap_or(0),
        })
    }

    /// Count of records per feedback label.
    pub async fn feedback_stats(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for record in self.store.all_history().await? {
            if let Some(label) = record.user_feedback {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
