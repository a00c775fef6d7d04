//! Staleness-driven reloads.
//!
//! A [`Refresher`] owns everything needed to bring a cache up to date: the
//! staleness oracle, the loader, both executors and the store. One refresh
//! compares a fresh fingerprint with the published one and reloads only on a
//! mismatch. The background task runs a refresh on every tick until told to
//! shut down.

use crate::error::Result;
use crate::executor::{ExecutorHandle, SourceHandle};
use crate::fingerprint::StalenessOracle;
use crate::loader::Loader;
use crate::snapshot::{Snapshot, Store};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::instrument;

/// What a single refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fingerprint matched; nothing was loaded.
    Unchanged,
    /// A new snapshot was published.
    Reloaded { keys: usize, records: usize },
}

/// Counters for refresh activity since the cache was built.
#[derive(Debug, Default)]
pub struct RefreshStats {
    checks: AtomicU64,
    reloads: AtomicU64,
    failures: AtomicU64,
}

impl RefreshStats {
    /// Get a copy of all counters.
    pub fn snapshot(&self) -> RefreshStatsSnapshot {
        RefreshStatsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Refresh counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStatsSnapshot {
    /// Fingerprint checks attempted (including the one at construction).
    pub checks: u64,
    /// Snapshots published (including the one at construction).
    pub reloads: u64,
    /// Refreshes that failed and kept the previous snapshot.
    pub failures: u64,
}

pub(crate) struct Refresher<R> {
    pub(crate) name: String,
    pub(crate) oracle: StalenessOracle,
    pub(crate) loader: Loader<R>,
    pub(crate) checker: ExecutorHandle,
    pub(crate) source: SourceHandle<R>,
    pub(crate) store: Store<R>,
    pub(crate) stats: RefreshStats,
    // Serialises manual refreshes with the background task.
    lock: Mutex<()>,
}

impl<R> Refresher<R>
where
    R: Send + Sync + 'static,
{
    /// Take the first fingerprint and load the first snapshot.
    ///
    /// There is no refresher (and so no cache) until this succeeds.
    pub(crate) async fn initialize(
        name: String,
        oracle: StalenessOracle,
        loader: Loader<R>,
        checker: ExecutorHandle,
        source: SourceHandle<R>,
    ) -> Result<Self> {
        let stats = RefreshStats::default();
        stats.checks.fetch_add(1, Ordering::Relaxed);
        let fingerprint = oracle.fingerprint(&*checker).await?;
        let records = loader.load(&*source).await?;
        let snapshot = Snapshot::new(records, fingerprint);
        stats.reloads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            cache = %name,
            keys = snapshot.key_count(),
            records = snapshot.len(),
            fingerprint = %snapshot.fingerprint(),
            "Cache loaded"
        );
        Ok(Self {
            name,
            oracle,
            loader,
            checker,
            source,
            store: Store::new(snapshot),
            stats,
            lock: Mutex::new(()),
        })
    }

    /// Reload if, and only if, the monitored tables changed.
    ///
    /// On any failure the published snapshot is left exactly as it was.
    #[instrument(level = "debug", skip_all, fields(cache = %self.name))]
    pub(crate) async fn refresh(&self) -> Result<RefreshOutcome> {
        let _guard = self.lock.lock().await;
        self.stats.checks.fetch_add(1, Ordering::Relaxed);
        let result = self.check_and_reload().await;
        if result.is_err() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn check_and_reload(&self) -> Result<RefreshOutcome> {
        // Fingerprint before loading: a change racing the load costs one
        // extra reload on the next tick, never a missed one.
        let fingerprint = self.oracle.fingerprint(&*self.checker).await?;
        if self.store.current().await.fingerprint() == &fingerprint {
            return Ok(RefreshOutcome::Unchanged);
        }
        let records = self.loader.load(&*self.source).await?;
        let snapshot = Snapshot::new(records, fingerprint);
        let outcome = RefreshOutcome::Reloaded {
            keys: snapshot.key_count(),
            records: snapshot.len(),
        };
        let previous = self.store.publish(snapshot).await;
        self.stats.reloads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            cache = %self.name,
            previous = %previous.fingerprint(),
            ?outcome,
            "Cache reloaded after upstream change"
        );
        Ok(outcome)
    }

    /// Refresh on every tick until `shutdown` flips to `true` (or its sender
    /// is dropped).
    ///
    /// Shutdown is only observed between ticks: a refresh that has started
    /// always runs to completion.
    pub(crate) async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(cache = %self.name, ?period, "Refresh task started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(RefreshOutcome::Unchanged) => {
                            tracing::debug!(cache = %self.name, "Cache is already up to date");
                        },
                        Ok(RefreshOutcome::Reloaded { .. }) => {},
                        Err(err) => {
                            tracing::warn!(cache = %self.name, error = ?err, "Cache refresh failed; keeping previous snapshot");
                        },
                    }
                }
            }
        }
        tracing::debug!(cache = %self.name, "Refresh task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::executor::MockExecutor;
    use crate::fingerprint::Staleness;
    use crate::key::KeyField;
    use crate::table::TableName;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: Option<&'static str>,
        val: i32,
    }

    fn row(key: &'static str, val: i32) -> Row {
        Row { key: Some(key), val }
    }

    async fn refresher(db: &Arc<MockExecutor<Row>>) -> Result<Refresher<Row>> {
        let oracle = StalenessOracle::new(TableName::parse_all(["rows"])?, Staleness::ChangeLog)?;
        let loader = Loader::new("select key, val from rows", vec![], KeyField::new("key", |r: &Row| r.key));
        Refresher::initialize("rows".to_string(), oracle, loader, db.clone(), db.clone()).await
    }

    #[tokio::test]
    async fn test_unchanged_skips_load() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = refresher(&db).await.unwrap();
        assert_eq!(refresher.refresh().await.unwrap(), RefreshOutcome::Unchanged);
        assert_eq!(refresher.refresh().await.unwrap(), RefreshOutcome::Unchanged);
        assert_eq!(db.load_calls(), 1);
        assert_eq!(db.fingerprint_calls(), 3);
        let stats = refresher.stats.snapshot();
        assert_eq!(stats, RefreshStatsSnapshot { checks: 3, reloads: 1, failures: 0 });
    }

    #[tokio::test]
    async fn test_reload_on_change() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = refresher(&db).await.unwrap();
        let before = refresher.store.current().await;
        db.mutate(|rows| rows.push(row("B", 2))).await;
        let outcome = refresher.refresh().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Reloaded { keys: 2, records: 2 });
        let after = refresher.store.current().await;
        assert_ne!(before.fingerprint(), after.fingerprint());
        assert_eq!(after.get("B"), &[row("B", 2)]);
        assert!(before.get("B").is_empty());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = refresher(&db).await.unwrap();
        let before = refresher.store.current().await;
        db.mutate(|rows| rows.push(Row { key: None, val: 2 })).await;
        let err = refresher.refresh().await.unwrap_err();
        assert_eq!(*err, ErrorKind::KeyFieldNil("key".to_string()));
        let after = refresher.store.current().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(refresher.stats.snapshot().failures, 1);
        // Once the bad row is gone, the next refresh recovers.
        db.mutate(|rows| rows.retain(|r| r.key.is_some())).await;
        assert!(matches!(refresher.refresh().await.unwrap(), RefreshOutcome::Reloaded { .. }));
    }

    #[tokio::test]
    async fn test_failed_check_keeps_snapshot() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = refresher(&db).await.unwrap();
        db.fail_fingerprint(true).await;
        let err = refresher.refresh().await.unwrap_err();
        assert_eq!(*err, ErrorKind::StalenessCheck);
        assert_eq!(refresher.store.current().await.get("A"), &[row("A", 1)]);
        assert_eq!(db.load_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = Arc::new(refresher(&db).await.unwrap());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(refresher.clone().run(Duration::from_secs(10), rx));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(db.fingerprint_calls(), 3);

        tx.send(true).unwrap();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(db.fingerprint_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_sender_dropped() {
        let db = Arc::new(MockExecutor::with_rows([row("A", 1)]));
        let refresher = Arc::new(refresher(&db).await.unwrap());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(refresher.run(Duration::from_secs(10), rx));
        drop(tx);
        task.await.unwrap();
        assert_eq!(db.fingerprint_calls(), 1);
    }
}
