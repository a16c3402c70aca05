//! Missing-asset download queue.
//!
//! A render enqueues what it needs and runs one batch. Tasks that exhaust the
//! fetch budget go back on the queue for the next batch, at most
//! `max_requeues` times, after which they are logged and dropped. An asset
//! another batch is already fetching is not queued again.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashSet;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::assets::{Asset, AssetStore};
use crate::error::Result;
use crate::fetch::{Fetcher, Request};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    pub asset: Asset,
    pub url: String,
    /// batches this task already failed in
    pub requeues: u32,
}

impl DownloadTask {
    pub fn new(asset: Asset, url: impl Into<String>) -> Self {
        Self {
            asset,
            url: url.into(),
            requeues: 0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: Vec<Asset>,
    /// already present when the worker got to it
    pub skipped: Vec<Asset>,
    pub requeued: Vec<Asset>,
    pub dropped: Vec<Asset>,
}

enum Outcome {
    Downloaded,
    Skipped,
    Failed,
}

pub struct Downloader {
    store: Arc<AssetStore>,
    fetcher: Fetcher,
    queue: Mutex<VecDeque<DownloadTask>>,
    in_flight: DashSet<Asset>,
    max_requeues: u32,
    max_workers: usize,
}

impl Downloader {
    pub fn new(store: Arc<AssetStore>, fetcher: Fetcher, max_requeues: u32, max_workers: usize) -> Self {
        Self {
            store,
            fetcher,
            queue: Mutex::new(VecDeque::new()),
            in_flight: DashSet::new(),
            max_requeues,
            max_workers: max_workers.max(1),
        }
    }

    /// Queues a task unless the asset is present, queued or being fetched.
    pub async fn enqueue(&self, task: DownloadTask) -> bool {
        if self.store.has(task.asset) || self.in_flight.contains(&task.asset) {
            return false;
        }
        let mut q = self.queue.lock().await;
        if q.iter().any(|t| t.asset == task.asset) {
            return false;
        }
        q.push_back(task);
        true
    }

    #[cfg(test)]
    pub async fn pending(&self) -> Vec<DownloadTask> {
        self.queue.lock().await.iter().cloned().collect()
    }

    /// Enqueues whatever of `needed` is missing and runs a batch.
    pub async fn ensure(&self, needed: impl IntoIterator<Item = DownloadTask>) -> BatchReport {
        for task in needed {
            self.enqueue(task).await;
        }
        self.run_batch().await
    }

    /// Drains the queue and waits until every drained task is terminal.
    pub async fn run_batch(&self) -> BatchReport {
        let batch: Vec<DownloadTask> = {
            let mut q = self.queue.lock().await;
            let batch: Vec<_> = q.drain(..).collect();
            for t in &batch {
                self.in_flight.insert(t.asset);
            }
            batch
        };
        let mut report = BatchReport::default();
        if batch.is_empty() {
            return report;
        }
        let workers = batch.len().min(self.max_workers);
        let results: Vec<(DownloadTask, Outcome)> = futures::stream::iter(batch)
            .map(|task| async move {
                let outcome = self.download(&task).await;
                (task, outcome)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut requeue = vec![];
        let mut done = Vec::with_capacity(results.len());
        for (mut task, outcome) in results {
            done.push(task.asset);
            match outcome {
                Outcome::Downloaded => report.downloaded.push(task.asset),
                Outcome::Skipped => report.skipped.push(task.asset),
                Outcome::Failed if task.requeues < self.max_requeues => {
                    task.requeues += 1;
                    report.requeued.push(task.asset);
                    requeue.push(task);
                }
                Outcome::Failed => {
                    warn!(asset = %task.asset, url = %task.url, requeues = task.requeues, "dead letter, dropping download");
                    report.dropped.push(task.asset);
                }
            }
        }
        {
            let mut q = self.queue.lock().await;
            for task in requeue {
                if !q.iter().any(|t| t.asset == task.asset) {
                    q.push_back(task);
                }
            }
            for a in done {
                self.in_flight.remove(&a);
            }
        }
        info!(
            workers,
            downloaded = report.downloaded.len(),
            requeued = report.requeued.len(),
            dropped = report.dropped.len(),
            "download batch done"
        );
        report
    }

    async fn download(&self, task: &DownloadTask) -> Outcome {
        if self.store.has(task.asset) {
            return Outcome::Skipped;
        }
        match self.fetch_into_store(task).await {
            Ok(()) => Outcome::Downloaded,
            Err(e) => {
                warn!(asset = %task.asset, url = %task.url, error = %e, "download failed");
                Outcome::Failed
            }
        }
    }

    async fn fetch_into_store(&self, task: &DownloadTask) -> Result<()> {
        let bytes = self.fetcher.fetch(&Request::get(&task.url)).await?;
        self.store.insert(task.asset, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Category;
    use crate::error::Error;
    use crate::fetch::tests::Scripted;

    fn setup(t: Arc<Scripted>, max_requeues: u32) -> (tempfile::TempDir, Downloader) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AssetStore::open(dir.path()).unwrap());
        (dir, Downloader::new(store, Fetcher::new(t, 3), max_requeues, 4))
    }

    #[tokio::test]
    async fn second_download_of_same_asset_makes_no_request() {
        let t = Arc::new(Scripted::ok(b"png"));
        let (_dir, d) = setup(t.clone(), 3);
        let a = Asset::new(Category::Avatar, 10000002);
        let r = d.ensure([DownloadTask::new(a, "https://x/a.png")]).await;
        assert_eq!(r.downloaded, [a]);
        assert!(d.store.has(a));
        assert_eq!(t.calls(), 1);

        let r = d.ensure([DownloadTask::new(a, "https://x/a.png")]).await;
        assert_eq!(r, BatchReport::default());
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn three_failures_requeue_instead_of_discarding() {
        let t = Arc::new(Scripted::failing());
        let (_dir, d) = setup(t.clone(), 3);
        let a = Asset::new(Category::Weapon, 11501);
        let r = d.ensure([DownloadTask::new(a, "https://x/w.png")]).await;
        assert_eq!(t.calls(), 3);
        assert_eq!(r.requeued, [a]);
        assert!(!d.store.has(a));
        let pending = d.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requeues, 1);
    }

    #[tokio::test]
    async fn fetch_error_is_fetch_failed_after_three() {
        let t = Arc::new(Scripted::failing());
        let (_dir, d) = setup(t.clone(), 3);
        let e = d
            .fetch_into_store(&DownloadTask::new(Asset::new(Category::Artifact, 1), "https://x"))
            .await
            .unwrap_err();
        assert!(matches!(e, Error::FetchFailed { attempts: 3, .. }));
        assert_eq!(t.calls(), 3);
    }

    #[tokio::test]
    async fn dead_letters_after_requeue_budget() {
        let t = Arc::new(Scripted::failing());
        let (_dir, d) = setup(t.clone(), 1);
        let a = Asset::new(Category::Artifact, 7);
        let r = d.ensure([DownloadTask::new(a, "https://x")]).await;
        assert_eq!(r.requeued, [a]);
        let r = d.run_batch().await;
        assert_eq!(r.dropped, [a]);
        assert!(d.pending().await.is_empty());
        assert_eq!(t.calls(), 6);
    }

    #[tokio::test]
    async fn requeued_tasks_ride_along_with_the_next_render() {
        let t = Arc::new(
            Scripted::ok(b"png")
                .then(Err(anyhow::anyhow!("x")))
                .then(Err(anyhow::anyhow!("x")))
                .then(Err(anyhow::anyhow!("x"))),
        );
        let (_dir, d) = setup(t.clone(), 3);
        let a = Asset::new(Category::Avatar, 1);
        let b = Asset::new(Category::Avatar, 2);
        d.ensure([DownloadTask::new(a, "https://x/1")]).await;
        let r = d.ensure([DownloadTask::new(b, "https://x/2")]).await;
        assert_eq!(r.downloaded.len(), 2);
        assert!(d.store.has(a) && d.store.has(b));
    }

    #[tokio::test]
    async fn duplicates_collapse_in_queue() {
        let t = Arc::new(Scripted::ok(b"png"));
        let (_dir, d) = setup(t.clone(), 3);
        let a = Asset::new(Category::Avatar, 3);
        assert!(d.enqueue(DownloadTask::new(a, "https://x")).await);
        assert!(!d.enqueue(DownloadTask::new(a, "https://x")).await);
        d.run_batch().await;
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_renders_fetch_a_shared_sprite_once() {
        let t = Arc::new(Scripted::ok(b"png"));
        let (_dir, d) = setup(t.clone(), 3);
        let a = Asset::new(Category::Weapon, 11509);
        let (first, second) = tokio::join!(
            d.ensure([DownloadTask::new(a, "https://x/w.png")]),
            d.ensure([DownloadTask::new(a, "https://x/w.png")]),
        );
        assert_eq!(first.downloaded, [a]);
        assert_eq!(second, BatchReport::default());
        assert_eq!(t.calls(), 1);
        assert!(d.store.has(a));
        assert!(d.in_flight.is_empty());
    }
}
