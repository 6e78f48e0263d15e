//! Catalog and online-count acquisition cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use biliwatch_client::{BrowserRuntime, CatalogResolver, ClientError, FetchClient, FetchOptions};
use biliwatch_core::{validate_bvid, VideoRecord};
use biliwatch_store::SnapshotStore;
use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::payload::{ApiEnvelope, OnlineTotal, PopularPage, VideoDetail};

/// Largest page the catalog endpoint serves.
const PAGE_SIZE_CAP: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The per-cycle-type guard rejected the start; nothing ran.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    AlreadyEnriched,
    Unknown,
}

/// Runs the two acquisition cycles against one shared fetch client and store.
/// Each cycle type carries its own in-flight guard, so a long catalog run
/// never blocks online-count sampling and vice versa.
pub struct AcquisitionService {
    client: FetchClient,
    resolver: CatalogResolver,
    store: Arc<SnapshotStore>,
    config: SyncConfig,
    catalog_in_flight: AtomicBool,
    online_in_flight: AtomicBool,
}

/// Compare-and-set ownership of a cycle slot, released on drop (including
/// error unwinds partway through a cycle).
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AcquisitionService {
    pub fn new(
        runtime: Arc<dyn BrowserRuntime>,
        store: Arc<SnapshotStore>,
        config: SyncConfig,
    ) -> Self {
        let client = FetchClient::new(
            runtime,
            FetchOptions {
                home_url: config.home_url.clone(),
                ..FetchOptions::default()
            },
        );
        let resolver = CatalogResolver::new(config.video_url_base.clone());
        Self {
            client,
            resolver,
            store,
            config,
            catalog_in_flight: AtomicBool::new(false),
            online_in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_catalog_running(&self) -> bool {
        self.catalog_in_flight.load(Ordering::Acquire)
    }

    pub fn is_online_running(&self) -> bool {
        self.online_in_flight.load(Ordering::Acquire)
    }

    /// One trending-catalog acquisition: paged listing fetch up to
    /// `max_videos`, detail enrichment for videos never enriched before, then
    /// a single batch upsert for today.
    pub async fn run_catalog_cycle(&self, max_videos: usize) -> Result<CycleOutcome> {
        let Some(_guard) = InFlight::acquire(&self.catalog_in_flight) else {
            info!("catalog cycle already in flight; skipping");
            return Ok(CycleOutcome::AlreadyRunning);
        };
        let report = self.catalog_cycle(max_videos).await?;
        Ok(CycleOutcome::Completed(report))
    }

    /// One live-viewer sampling pass over every video recorded today.
    pub async fn run_online_cycle(&self) -> Result<CycleOutcome> {
        let Some(_guard) = InFlight::acquire(&self.online_in_flight) else {
            info!("online-count cycle already in flight; skipping");
            return Ok(CycleOutcome::AlreadyRunning);
        };
        let report = self.online_cycle().await?;
        Ok(CycleOutcome::Completed(report))
    }

    async fn catalog_cycle(&self, max_videos: usize) -> Result<CycleReport> {
        if max_videos == 0 {
            return Ok(CycleReport::default());
        }
        self.client
            .establish_context()
            .await
            .context("establishing fetch context")?;

        let mut records: Vec<VideoRecord> = Vec::new();
        let mut failed = 0usize;
        let ps = max_videos.min(PAGE_SIZE_CAP);
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}/x/web-interface/popular?ps={}&pn={}",
                self.config.api_base, ps, page
            );
            let value = self
                .client
                .fetch_json(&url)
                .await
                .with_context(|| format!("fetching catalog page {page}"))?;
            let envelope: ApiEnvelope<PopularPage> =
                serde_json::from_value(value).context("decoding catalog page")?;
            let page_data = envelope.into_data()?;
            let batch = page_data.list.len();
            for item in page_data.list {
                if records.len() >= max_videos {
                    break;
                }
                let Some(title) = item.title.filter(|t| !t.is_empty()) else {
                    failed += 1;
                    continue;
                };
                // bvid is the preferred identity, aid the fallback; only items
                // carrying a malformed bvid or no identity at all are dropped
                let bvid = match item.bvid {
                    Some(b) if validate_bvid(&b) => Some(b),
                    Some(_) => {
                        warn!(%title, "skipping catalog item with a malformed bvid");
                        failed += 1;
                        continue;
                    }
                    None if item.aid.is_some() => None,
                    None => {
                        failed += 1;
                        continue;
                    }
                };
                records.push(VideoRecord {
                    bvid,
                    aid: item.aid,
                    cid: item.cid,
                    title,
                    pic: item.pic,
                    view: item.stat.as_ref().and_then(|s| s.play_count()),
                    // live viewers are sampled by the online cycle only
                    online_count: "0".to_string(),
                    tid_v2: None,
                    copyright: None,
                });
            }
            if records.len() >= max_videos || page_data.no_more || batch == 0 {
                break;
            }
            page += 1;
        }
        info!(collected = records.len(), failed, "catalog pages consumed");

        for record in &mut records {
            let Some(bvid) = record.bvid.clone() else {
                continue;
            };
            if self.store.has_enrichment(&bvid).await? {
                continue;
            }
            match self.fetch_detail(&bvid).await {
                Ok(detail) => {
                    record.tid_v2 = detail.tid_v2;
                    record.copyright = detail.copyright;
                    if record.cid.is_none() {
                        record.cid = detail.cid;
                    }
                    if record.view.is_none() {
                        record.view = detail.stat.as_ref().and_then(|s| s.play_count());
                    }
                }
                Err(err) => {
                    warn!(%bvid, %err, "detail enrichment failed");
                    failed += 1;
                }
            }
            tokio::time::sleep(self.config.detail_delay).await;
        }

        let crawl_date = today();
        let saved = self
            .store
            .save_videos(&records, &crawl_date, Utc::now())
            .await
            .context("persisting catalog batch")?;
        info!(saved, %crawl_date, "catalog cycle completed");
        Ok(CycleReport {
            processed: records.len(),
            updated: saved,
            failed,
        })
    }

    async fn online_cycle(&self) -> Result<CycleReport> {
        let crawl_date = today();
        let pending = self.store.videos_to_update(&crawl_date).await?;
        if pending.is_empty() {
            info!(%crawl_date, "no snapshots to sample today");
            return Ok(CycleReport::default());
        }
        self.client
            .establish_context()
            .await
            .context("establishing fetch context")?;

        let total = pending.len();
        let mut report = CycleReport {
            processed: total,
            ..CycleReport::default()
        };
        for (index, (bvid, cid)) in pending.into_iter().enumerate() {
            match self.sample_online(&bvid, cid).await {
                Ok(raw) => {
                    let applied = self
                        .store
                        .update_online_count(&bvid, &crawl_date, &raw, Utc::now())
                        .await?;
                    if applied {
                        report.updated += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(err) => {
                    warn!(%bvid, %err, "online-count sample failed");
                    report.failed += 1;
                }
            }
            if index + 1 < total {
                tokio::time::sleep(self.config.online_delay).await;
            }
        }
        // a pass that updated nothing is a failed cycle, so the scheduler
        // retries instead of waiting out the interval
        if report.updated == 0 {
            anyhow::bail!("all {} online-count samples failed", report.processed);
        }
        info!(
            updated = report.updated,
            failed = report.failed,
            "online-count cycle completed"
        );
        Ok(report)
    }

    /// Re-fetch detail for one known, not-yet-enriched video and replace its
    /// row for today.
    pub async fn refresh_video(&self, bvid: &str) -> Result<RefreshOutcome> {
        if !self.store.exists(bvid).await? {
            return Ok(RefreshOutcome::Unknown);
        }
        if self.store.has_enrichment(bvid).await? {
            return Ok(RefreshOutcome::AlreadyEnriched);
        }
        self.client
            .establish_context()
            .await
            .context("establishing fetch context")?;
        let detail = self.fetch_detail(bvid).await?;
        let title = detail
            .title
            .filter(|t| !t.is_empty())
            .context("detail response carried no title")?;
        let record = VideoRecord {
            bvid: Some(bvid.to_string()),
            aid: detail.aid,
            cid: detail.cid,
            title,
            pic: detail.pic,
            view: detail.stat.as_ref().and_then(|s| s.play_count()),
            online_count: "0".to_string(),
            tid_v2: detail.tid_v2,
            copyright: detail.copyright,
        };
        self.store.save_video(&record, &today(), Utc::now()).await?;
        Ok(RefreshOutcome::Updated)
    }

    pub async fn close(&self) {
        self.client.close().await;
    }

    async fn fetch_detail(&self, bvid: &str) -> Result<VideoDetail, ClientError> {
        let url = format!("{}/x/web-interface/view?bvid={}", self.config.api_base, bvid);
        let value = self.client.fetch_json(&url).await?;
        let envelope: ApiEnvelope<VideoDetail> = serde_json::from_value(value)
            .map_err(|err| ClientError::transient(format!("decoding video detail: {err}")))?;
        envelope.into_data()
    }

    async fn sample_online(&self, bvid: &str, cid: Option<i64>) -> Result<String, ClientError> {
        let cid = match cid {
            Some(cid) => cid,
            None => self.resolver.resolve(&self.client, bvid).await?,
        };
        let url = format!(
            "{}/x/player/online/total?bvid={}&cid={}",
            self.config.api_base, bvid, cid
        );
        let value = self.client.fetch_json(&url).await?;
        let envelope: ApiEnvelope<OnlineTotal> = serde_json::from_value(value)
            .map_err(|err| ClientError::transient(format!("decoding online total: {err}")))?;
        Ok(envelope.into_data()?.total.unwrap_or_else(|| "0".to_string()))
    }
}

/// Snapshot day key in local time, matching how the store partitions rows.
pub(crate) fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
