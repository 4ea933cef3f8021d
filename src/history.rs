use crate::models::{ComparisonItem, HistoryItem, QueryResult};
use crate::store::{keys, Store};
use tokio::sync::Mutex;

/// Number of past runs the history log retains.
pub const HISTORY_LIMIT: usize = 10;

/// Bounded, newest-first log of processing runs.
///
/// `record` serializes the whole read-prepend-truncate-persist cycle
/// behind one lock, so a scheduled job completing while a manual run
/// is writing cannot break the bound or the ordering.
pub struct HistoryLog {
    inner: Mutex<Vec<HistoryItem>>,
}

impl HistoryLog {
    pub fn new(mut items: Vec<HistoryItem>) -> Self {
        // Stored history may predate the current bound.
        items.truncate(HISTORY_LIMIT);
        Self {
            inner: Mutex::new(items),
        }
    }

    pub async fn load(store: &Store) -> Self {
        Self::new(store.load(keys::HISTORY).await)
    }

    /// Prepends a run, truncates to the retention bound and persists.
    pub async fn record(&self, store: &Store, item: HistoryItem) {
        let mut items = self.inner.lock().await;
        items.insert(0, item);
        items.truncate(HISTORY_LIMIT);
        store.save(keys::HISTORY, &*items).await;
    }

    /// Snapshot of the retained runs, newest first.
    pub async fn items(&self) -> Vec<HistoryItem> {
        self.inner.lock().await.clone()
    }

    /// The most recent retained run, if any.
    pub async fn latest(&self) -> Option<HistoryItem> {
        self.inner.lock().await.first().cloned()
    }
}

/// Period-over-period comparison of issued document counts.
///
/// Matches current results against the single most recent prior run by
/// exact client name; a renamed client silently drops out of the
/// comparison (kept as-is, see DESIGN.md). Clients with no prior match
/// or a prior count of zero are omitted rather than producing a
/// divide-by-zero or a synthetic infinite-growth entry.
pub fn compare(current: &[QueryResult], previous: Option<&HistoryItem>) -> Vec<ComparisonItem> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    current
        .iter()
        .filter_map(|cur| {
            let prev = previous
                .results
                .iter()
                .find(|p| p.client_name == cur.client_name)?;
            if prev.issued.document_count == 0 {
                return None;
            }
            let variance = (cur.issued.document_count as f64
                - prev.issued.document_count as f64)
                / prev.issued.document_count as f64
                * 100.0;
            Some(ComparisonItem {
                client_name: cur.client_name.clone(),
                current: cur.issued.document_count,
                previous: prev.issued.document_count,
                variance: format!("{:.1}", variance),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultSource, ResultStatus, ServiceData};

    fn result(name: &str, issued_count: u32) -> QueryResult {
        QueryResult {
            client_name: name.to_string(),
            tax_id: "12345678000190".to_string(),
            municipal_registration: "987654".to_string(),
            period: "01/2025".to_string(),
            issued: ServiceData {
                document_count: issued_count,
                total_value: "1000.00".to_string(),
                tax_amount: "50.00".to_string(),
                credits_generated: "15.00".to_string(),
                missing_recipient_count: Some(0),
            },
            received: ServiceData::default(),
            source: ResultSource::Synthetic,
            status: ResultStatus::Success,
        }
    }

    fn history_item(results: Vec<QueryResult>) -> HistoryItem {
        HistoryItem::from_results(results)
    }

    #[tokio::test]
    async fn record_is_bounded_and_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let log = HistoryLog::new(Vec::new());

        for n in 0..15u32 {
            log.record(&store, history_item(vec![result("Acme", n)])).await;
        }

        let items = log.items().await;
        assert_eq!(items.len(), HISTORY_LIMIT);
        // Newest first: the last recorded run leads.
        assert_eq!(items[0].results[0].issued.document_count, 14);
        assert_eq!(items[9].results[0].issued.document_count, 5);

        // The persisted copy honors the same bound.
        let stored: Vec<HistoryItem> = store.load(crate::store::keys::HISTORY).await;
        assert_eq!(stored.len(), HISTORY_LIMIT);
        assert_eq!(stored, items);
    }

    #[tokio::test]
    async fn load_truncates_oversized_stored_history() {
        let items: Vec<HistoryItem> = (0..20).map(|_| history_item(Vec::new())).collect();
        let log = HistoryLog::new(items);
        assert_eq!(log.items().await.len(), HISTORY_LIMIT);
    }

    #[test]
    fn compare_computes_one_decimal_variance() {
        let prev = history_item(vec![result("Acme", 2), result("Beta", 3)]);
        let current = vec![result("Acme", 3), result("Beta", 1)];

        let comp = compare(&current, Some(&prev));
        assert_eq!(comp.len(), 2);
        assert_eq!(comp[0].client_name, "Acme");
        assert_eq!(comp[0].variance, "50.0");
        assert_eq!(comp[1].variance, "-66.7");
    }

    #[test]
    fn compare_skips_zero_previous_count() {
        let prev = history_item(vec![result("Acme", 0)]);
        let current = vec![result("Acme", 10)];
        assert!(compare(&current, Some(&prev)).is_empty());
    }

    #[test]
    fn compare_skips_unmatched_names() {
        let prev = history_item(vec![result("Acme", 5)]);
        // Exact, case-sensitive match only.
        let current = vec![result("acme", 10), result("Gamma", 4)];
        assert!(compare(&current, Some(&prev)).is_empty());
    }

    #[test]
    fn compare_without_previous_run_is_empty() {
        let current = vec![result("Acme", 10)];
        assert!(compare(&current, None).is_empty());
    }
}
