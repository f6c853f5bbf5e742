//! Result aggregation
//!
//! Silent results and confirm-click results arrive at different times and in
//! any order. The aggregator keys them by `account_id`, keeps the first
//! terminal result per account, and presents them in the order the accounts
//! were requested.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::types::PostResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// False when the account already had a result or is not part of the
    /// dispatch
    pub recorded: bool,
    /// Every account now has a terminal result
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    /// Successful posts whose permalink could not be captured
    pub link_unavailable: usize,
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    order: Vec<String>,
    results: HashMap<String, PostResult>,
}

impl ResultAggregator {
    /// Duplicate ids keep their first position
    pub fn new<I, S>(account_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order: Vec<String> = Vec::new();
        for id in account_ids {
            let id = id.into();
            if !order.contains(&id) {
                order.push(id);
            }
        }
        Self {
            order,
            results: HashMap::new(),
        }
    }

    pub fn merge(&mut self, result: PostResult) -> MergeOutcome {
        let recorded = if !self.order.contains(&result.account_id) {
            tracing::debug!(account = %result.account_id, "Ignoring result for account outside the dispatch");
            false
        } else if self.results.contains_key(&result.account_id) {
            tracing::debug!(account = %result.account_id, "Account already terminal, keeping first result");
            false
        } else {
            self.results.insert(result.account_id.clone(), result);
            true
        };

        MergeOutcome {
            recorded,
            complete: self.is_complete(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.order.len()
    }

    pub fn get(&self, account_id: &str) -> Option<&PostResult> {
        self.results.get(account_id)
    }

    pub fn account_ids(&self) -> &[String] {
        &self.order
    }

    /// Accounts still waiting for a result, in request order
    pub fn pending(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| !self.results.contains_key(*id))
            .map(String::as_str)
            .collect()
    }

    /// Results so far, in request order
    pub fn snapshot(&self) -> Vec<PostResult> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).cloned())
            .collect()
    }

    /// The full report, only once every account is terminal
    pub fn report(&self) -> Option<Vec<PostResult>> {
        self.is_complete().then(|| self.snapshot())
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            pending: self.order.len() - self.results.len(),
            ..Default::default()
        };
        for result in self.results.values() {
            if result.success {
                summary.succeeded += 1;
                if result.is_link_unavailable() {
                    summary.link_unavailable += 1;
                }
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

/// Thread-safe aggregator shared by the dispatcher's tasks and its consumer
#[derive(Debug, Clone)]
pub struct SharedAggregator {
    inner: Arc<Mutex<ResultAggregator>>,
    completed: Arc<Notify>,
}

impl SharedAggregator {
    pub fn new(aggregator: ResultAggregator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregator)),
            completed: Arc::new(Notify::new()),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut ResultAggregator) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn merge(&self, result: PostResult) -> MergeOutcome {
        let outcome = self.with(|agg| agg.merge(result));
        if outcome.recorded && outcome.complete {
            self.completed.notify_waiters();
        }
        outcome
    }

    pub fn is_complete(&self) -> bool {
        self.with(|agg| agg.is_complete())
    }

    pub fn pending(&self) -> Vec<String> {
        self.with(|agg| agg.pending().into_iter().map(str::to_string).collect())
    }

    pub fn snapshot(&self) -> Vec<PostResult> {
        self.with(|agg| agg.snapshot())
    }

    pub fn report(&self) -> Option<Vec<PostResult>> {
        self.with(|agg| agg.report())
    }

    pub fn summary(&self) -> Summary {
        self.with(|agg| agg.summary())
    }

    /// Resolves with the full report once every account is terminal
    pub async fn wait_complete(&self) -> Vec<PostResult> {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            // register before checking so a merge in between is not missed
            notified.as_mut().enable();

            if let Some(report) = self.report() {
                return report;
            }
            notified.await;
        }
    }
}
