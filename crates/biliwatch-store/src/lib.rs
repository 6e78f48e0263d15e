//! SQLite-backed per-day video snapshots with a running live-viewer maximum.

use std::str::FromStr;

use biliwatch_core::{normalize_count, VideoRecord, VideoSnapshot, ZoneTable};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "biliwatch-store";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Sort keys exposed to the query surface. Unknown input falls back to
/// [`SortField::ViewCount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    ViewCount,
    OnlineCount,
    MaxOnlineCount,
    Title,
}

impl SortField {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "view_count" => Self::ViewCount,
            "online_count" => Self::OnlineCount,
            "max_online_count" => Self::MaxOnlineCount,
            "title" => Self::Title,
            _ => Self::ViewCount,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::ViewCount => "view_count",
            Self::OnlineCount => "online_count_num",
            Self::MaxOnlineCount => "max_online_count",
            Self::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Parameters for [`SnapshotStore::query`]. `date: None` means the most recent
/// day present in the store. A `sub_zone` filter wins over `main_zone`.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub date: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub main_zone: Option<String>,
    pub sub_zone: Option<i64>,
}

const SNAPSHOT_COLUMNS: &str = "bvid, aid, cid, title, pic, view_count, online_count, \
     online_count_num, max_online_count, max_online_time, tid_v2, copyright, \
     crawl_date, crawl_time";

/// Columns added after the first shipped schema; older database files gain
/// them in place on `init`.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("online_count_num", "INTEGER NOT NULL DEFAULT 0"),
    ("max_online_count", "INTEGER NOT NULL DEFAULT 0"),
    ("max_online_time", "TEXT"),
    ("tid_v2", "INTEGER"),
    ("copyright", "INTEGER"),
];

pub struct SnapshotStore {
    pool: SqlitePool,
    zones: ZoneTable,
}

impl SnapshotStore {
    /// Open (creating if missing) the database at `database_url`, e.g.
    /// `sqlite://videos.db` or `sqlite::memory:`.
    pub async fn connect(database_url: &str, zones: ZoneTable) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection serializes writers and keeps :memory: databases
        // coherent across acquisitions.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool, zones })
    }

    /// Create the schema if absent and add any columns an older database file
    /// predates. Idempotent.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bvid TEXT,
                aid INTEGER,
                cid INTEGER,
                title TEXT NOT NULL,
                pic TEXT,
                view_count INTEGER,
                online_count TEXT NOT NULL DEFAULT '0',
                online_count_num INTEGER NOT NULL DEFAULT 0,
                max_online_count INTEGER NOT NULL DEFAULT 0,
                max_online_time TEXT,
                tid_v2 INTEGER,
                copyright INTEGER,
                crawl_date TEXT NOT NULL,
                crawl_time TEXT NOT NULL,
                UNIQUE(bvid, crawl_date) ON CONFLICT REPLACE
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_videos_crawl_date ON videos (crawl_date)")
            .execute(&self.pool)
            .await?;

        let existing: Vec<String> = sqlx::query("PRAGMA table_info(videos)")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;
        for (name, decl) in ADDITIVE_COLUMNS {
            if !existing.iter().any(|c| c == name) {
                info!(column = name, "adding missing column to videos table");
                sqlx::query(&format!("ALTER TABLE videos ADD COLUMN {name} {decl}"))
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist a catalog batch for `crawl_date` in one transaction. Rows are
    /// keyed on bvid, falling back to aid when a record has none; records with
    /// neither identity are skipped. Each kept row's running maximum is
    /// reconciled against the highest value ever recorded for that bvid.
    /// Returns the number of rows written.
    pub async fn save_videos(
        &self,
        records: &[VideoRecord],
        crawl_date: &str,
        crawl_time: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut saved = 0usize;
        for record in records {
            if record.bvid.is_none() && record.aid.is_none() {
                debug!(title = %record.title, "skipping record without an identity");
                continue;
            }
            let online_num = normalize_count(&record.online_count);
            let (max_count, max_time) = match record.bvid.as_deref() {
                Some(bvid) => {
                    let prior = prior_max(&mut *tx, bvid).await?;
                    reconcile_max(prior, online_num, crawl_time)
                }
                None => {
                    // UNIQUE treats NULL bvids as distinct rows, so the
                    // same-day replacement for aid-keyed rows is done by hand
                    sqlx::query(
                        "DELETE FROM videos \
                         WHERE bvid IS NULL AND aid = ? AND crawl_date = ?",
                    )
                    .bind(record.aid)
                    .bind(crawl_date)
                    .execute(&mut *tx)
                    .await?;
                    reconcile_max((0, None), online_num, crawl_time)
                }
            };
            // UNIQUE(bvid, crawl_date) ON CONFLICT REPLACE turns this into an upsert
            sqlx::query(
                "INSERT INTO videos (bvid, aid, cid, title, pic, view_count, online_count, \
                 online_count_num, max_online_count, max_online_time, tid_v2, copyright, \
                 crawl_date, crawl_time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.bvid)
            .bind(record.aid)
            .bind(record.cid)
            .bind(&record.title)
            .bind(&record.pic)
            .bind(record.view)
            .bind(&record.online_count)
            .bind(online_num)
            .bind(max_count)
            .bind(max_time)
            .bind(record.tid_v2)
            .bind(record.copyright)
            .bind(crawl_date)
            .bind(crawl_time)
            .execute(&mut *tx)
            .await?;
            saved += 1;
        }
        tx.commit().await?;
        info!(saved, crawl_date, "snapshot batch committed");
        Ok(saved)
    }

    /// Update the live-viewer sample on an existing (bvid, day) row. The
    /// running maximum advances only when the new sample is strictly greater
    /// than any ever recorded. Returns false when no such row exists.
    pub async fn update_online_count(
        &self,
        bvid: &str,
        crawl_date: &str,
        raw_count: &str,
        sampled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let online_num = normalize_count(raw_count);
        let mut tx = self.pool.begin().await?;
        let prior = prior_max(&mut *tx, bvid).await?;
        let (max_count, max_time) = reconcile_max(prior, online_num, sampled_at);
        let result = sqlx::query(
            "UPDATE videos SET online_count = ?, online_count_num = ?, \
             max_online_count = ?, max_online_time = ? \
             WHERE bvid = ? AND crawl_date = ?",
        )
        .bind(raw_count)
        .bind(online_num)
        .bind(max_count)
        .bind(max_time)
        .bind(bvid)
        .bind(crawl_date)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a single (bvid, today) row with `record`, reconciling the
    /// running maximum the same way a batch save would.
    pub async fn save_video(
        &self,
        record: &VideoRecord,
        crawl_date: &str,
        crawl_time: DateTime<Utc>,
    ) -> Result<usize> {
        self.save_videos(std::slice::from_ref(record), crawl_date, crawl_time)
            .await
    }

    /// Snapshots for a day, filtered and sorted. See [`VideoQuery`].
    pub async fn query(&self, params: &VideoQuery) -> Result<Vec<VideoSnapshot>> {
        let date = match &params.date {
            Some(date) => date.clone(),
            None => match self.latest_date().await? {
                Some(date) => date,
                None => return Ok(Vec::new()),
            },
        };

        let mut tids: Vec<i64> = Vec::new();
        if let Some(sub) = params.sub_zone {
            tids.push(sub);
        } else if let Some(main) = &params.main_zone {
            tids.extend_from_slice(self.zones.sub_zones(main));
            if tids.is_empty() {
                // unknown main zone: match the id directly if numeric
                match main.parse::<i64>() {
                    Ok(id) => tids.push(id),
                    Err(_) => return Ok(Vec::new()),
                }
            }
        }

        let mut sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM videos WHERE crawl_date = ?");
        if !tids.is_empty() {
            let placeholders = vec!["?"; tids.len()].join(", ");
            sql.push_str(&format!(" AND tid_v2 IN ({placeholders})"));
        }
        sql.push_str(&format!(
            " ORDER BY {} {}",
            params.sort_by.column(),
            params.order.keyword()
        ));

        let mut query = sqlx::query(&sql).bind(&date);
        for tid in &tids {
            query = query.bind(tid);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(snapshot_from_row).collect()
    }

    /// Whether any snapshot exists for `bvid`, on any day.
    pub async fn exists(&self, bvid: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM videos WHERE bvid = ? LIMIT 1")
            .bind(bvid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Whether `bvid` already carries detail enrichment (a category id) on any
    /// day; enriched videos are not re-fetched.
    pub async fn has_enrichment(&self, bvid: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM videos WHERE bvid = ? AND tid_v2 IS NOT NULL LIMIT 1")
            .bind(bvid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Distinct (bvid, cid) pairs recorded for `crawl_date`, in first-seen
    /// order. Input to the online-count cycle; cid may be absent.
    pub async fn videos_to_update(&self, crawl_date: &str) -> Result<Vec<(String, Option<i64>)>> {
        let rows = sqlx::query(
            "SELECT bvid, cid FROM videos \
             WHERE crawl_date = ? AND bvid IS NOT NULL \
             GROUP BY bvid, cid ORDER BY MIN(id)",
        )
        .bind(crawl_date)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("bvid")?, row.try_get("cid")?)))
            .collect()
    }

    /// All days with at least one snapshot, most recent first.
    pub async fn available_dates(&self) -> Result<Vec<String>> {
        let rows =
            sqlx::query("SELECT DISTINCT crawl_date FROM videos ORDER BY crawl_date DESC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|row| Ok(row.try_get("crawl_date")?))
            .collect()
    }

    async fn latest_date(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT MAX(crawl_date) AS latest FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("latest")?)
    }
}

/// The highest live-viewer value ever recorded for `bvid`, with its timestamp.
async fn prior_max<'e, E>(executor: E, bvid: &str) -> Result<(i64, Option<DateTime<Utc>>)>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT max_online_count, max_online_time FROM videos \
         WHERE bvid = ? ORDER BY max_online_count DESC LIMIT 1",
    )
    .bind(bvid)
    .fetch_optional(executor)
    .await?;
    Ok(match row {
        Some(row) => (row.try_get(0)?, row.try_get(1)?),
        None => (0, None),
    })
}

/// Advance the running maximum only on a strictly greater sample; an equal
/// sample keeps the earlier timestamp.
fn reconcile_max(
    prior: (i64, Option<DateTime<Utc>>),
    incoming: i64,
    now: DateTime<Utc>,
) -> (i64, Option<DateTime<Utc>>) {
    if incoming > prior.0 {
        (incoming, Some(now))
    } else {
        prior
    }
}

fn snapshot_from_row(row: SqliteRow) -> Result<VideoSnapshot> {
    Ok(VideoSnapshot {
        bvid: row.try_get("bvid")?,
        aid: row.try_get("aid")?,
        cid: row.try_get("cid")?,
        title: row.try_get("title")?,
        pic: row.try_get("pic")?,
        view_count: row.try_get("view_count")?,
        online_count: row.try_get("online_count")?,
        online_count_num: row.try_get("online_count_num")?,
        max_online_count: row.try_get("max_online_count")?,
        max_online_time: row.try_get("max_online_time")?,
        tid_v2: row.try_get("tid_v2")?,
        copyright: row.try_get("copyright")?,
        crawl_date: row.try_get("crawl_date")?,
        crawl_time: row.try_get("crawl_time")?,
    })
}
