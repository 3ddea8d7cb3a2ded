//! Upstream HTTP fetch utilities + the contest store for contest hub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cphub_core::{Contest, ContestDraft, ContestStatus, Platform, StatusTransitions};
use reqwest::StatusCode;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub use reqwest::Method;

pub const CRATE_NAME: &str = "cphub-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One upstream call. Rebuilt into a fresh reqwest request on every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json_body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            json_body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch limiter closed")]
    LimiterClosed,
}

/// Shared upstream client: bounded per-request timeout, global concurrency cap,
/// and a short exponential retry for transient failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        self.send(run_id, source_id, &HttpRequest::get(url)).await
    }

    pub async fn send(
        &self,
        run_id: Uuid,
        source_id: &str,
        request: &HttpRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let span = info_span!("http_fetch", %run_id, source_id, url = %request.url);
        self.send_with_retries(request).instrument(span).await
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        builder
    }

    async fn send_with_retries(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let can_retry = attempt < self.backoff.max_retries;
            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable || !can_retry {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    tracing::debug!(%status, attempt, "retrying upstream status");
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable || !can_retry {
                        return Err(FetchError::Request(err));
                    }
                    tracing::debug!(error = %err, attempt, "retrying upstream request");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt contest row {id}: {reason}")]
    CorruptRow { id: Uuid, reason: String },
}

/// The single contest collection. Writes are clear+upsert per pass; reads are
/// bucketed by status and wall-clock time.
#[async_trait]
pub trait ContestStore: Send + Sync {
    /// Clears every row, then upserts each draft on `(platform, platform_id)` or
    /// `(platform, name)`. Returns the number of drafts written.
    async fn replace_all(&self, drafts: &[ContestDraft], now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Moves rows into finished, then running, then upcoming; only rows whose
    /// current status disagrees are touched.
    async fn recompute_status(&self, now: DateTime<Utc>) -> Result<StatusTransitions, StoreError>;

    async fn upcoming(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError>;

    async fn running(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Contest>, StoreError>;

    async fn past(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone)]
pub struct PgContestStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ContestRow {
    id: Uuid,
    name: String,
    platform: String,
    platform_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_secs: i64,
    url: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContestRow> for Contest {
    type Error = StoreError;

    fn try_from(row: ContestRow) -> Result<Self, Self::Error> {
        let platform = row.platform.parse::<Platform>().map_err(|e| StoreError::CorruptRow {
            id: row.id,
            reason: e.to_string(),
        })?;
        let status = row.status.parse::<ContestStatus>().map_err(|e| StoreError::CorruptRow {
            id: row.id,
            reason: e.to_string(),
        })?;
        Ok(Contest {
            id: row.id,
            name: row.name,
            platform,
            platform_id: row.platform_id,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_secs: row.duration_secs,
            url: row.url,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const CONTEST_COLUMNS: &str = "id, name, platform, platform_id, start_time, end_time, duration_secs, url, status, created_at, updated_at";

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl PgContestStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn set_status(
        &self,
        status: ContestStatus,
        predicate: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE contests SET status = $2, updated_at = $1 WHERE {predicate} AND status <> $2"
        );
        let done = sqlx::query(&sql)
            .bind(now)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn select(
        &self,
        predicate: &str,
        order: &str,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError> {
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests \
             WHERE {predicate} AND ($2::text IS NULL OR platform = $2) \
             ORDER BY start_time {order} LIMIT $3"
        );
        let rows: Vec<ContestRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(platform.map(|p| p.as_str()))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Contest::try_from).collect()
    }
}

#[async_trait]
impl ContestStore for PgContestStore {
    async fn replace_all(&self, drafts: &[ContestDraft], now: DateTime<Utc>) -> Result<usize, StoreError> {
        sqlx::query("DELETE FROM contests").execute(&self.pool).await?;

        let mut written = 0usize;
        for draft in drafts {
            let updated = sqlx::query(
                r#"
                UPDATE contests
                   SET name = $3,
                       platform_id = $2,
                       start_time = $4,
                       end_time = $5,
                       duration_secs = $6,
                       url = $7,
                       status = 'upcoming',
                       updated_at = $8
                 WHERE id = (
                       SELECT id FROM contests
                        WHERE platform = $1
                          AND (platform_id = $2 OR name = $3)
                        ORDER BY created_at
                        LIMIT 1)
                "#,
            )
            .bind(draft.platform.as_str())
            .bind(&draft.platform_id)
            .bind(&draft.name)
            .bind(draft.start_time)
            .bind(draft.end_time)
            .bind(draft.duration_secs)
            .bind(&draft.url)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO contests
                        (id, name, platform, platform_id, start_time, end_time,
                         duration_secs, url, status, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'upcoming', $9, $9)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&draft.name)
                .bind(draft.platform.as_str())
                .bind(&draft.platform_id)
                .bind(draft.start_time)
                .bind(draft.end_time)
                .bind(draft.duration_secs)
                .bind(&draft.url)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            written += 1;
        }
        Ok(written)
    }

    async fn recompute_status(&self, now: DateTime<Utc>) -> Result<StatusTransitions, StoreError> {
        let finished = self
            .set_status(ContestStatus::Finished, "end_time <= $1", now)
            .await?;
        let running = self
            .set_status(ContestStatus::Running, "start_time <= $1 AND end_time > $1", now)
            .await?;
        let upcoming = self
            .set_status(ContestStatus::Upcoming, "start_time > $1", now)
            .await?;
        Ok(StatusTransitions {
            finished,
            running,
            upcoming,
        })
    }

    async fn upcoming(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError> {
        self.select("status = 'upcoming' AND start_time > $1", "ASC", now, limit, platform)
            .await
    }

    async fn running(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Contest>, StoreError> {
        self.select(
            "status = 'running' AND start_time <= $1 AND end_time > $1",
            "ASC",
            now,
            limit,
            None,
        )
        .await
    }

    async fn past(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError> {
        self.select("status = 'finished' AND end_time < $1", "DESC", now, limit, platform)
            .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contests")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// In-process store with the same semantics as the Postgres backend.
#[derive(Debug, Default)]
pub struct MemoryContestStore {
    rows: RwLock<Vec<Contest>>,
}

impl MemoryContestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<Contest> {
        self.rows.read().await.clone()
    }
}

fn bucket_into(rows: &mut [Contest], target: ContestStatus, now: DateTime<Utc>) -> u64 {
    let mut moved = 0;
    for row in rows.iter_mut() {
        if row.status != target && row.derived_status(now) == target {
            row.status = target;
            row.updated_at = now;
            moved += 1;
        }
    }
    moved
}

#[async_trait]
impl ContestStore for MemoryContestStore {
    async fn replace_all(&self, drafts: &[ContestDraft], now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().await;
        rows.clear();
        for draft in drafts {
            match rows.iter_mut().find(|row| row.matches(draft)) {
                Some(row) => row.overwrite_from(draft, now),
                None => rows.push(Contest::from_draft(draft, now)),
            }
        }
        Ok(drafts.len())
    }

    async fn recompute_status(&self, now: DateTime<Utc>) -> Result<StatusTransitions, StoreError> {
        let mut rows = self.rows.write().await;
        Ok(StatusTransitions {
            finished: bucket_into(&mut rows, ContestStatus::Finished, now),
            running: bucket_into(&mut rows, ContestStatus::Running, now),
            upcoming: bucket_into(&mut rows, ContestStatus::Upcoming, now),
        })
    }

    async fn upcoming(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError> {
        let rows = self.rows.read().await;
        let mut out = rows
            .iter()
            .filter(|c| c.status == ContestStatus::Upcoming && c.start_time > now)
            .filter(|c| platform.map_or(true, |p| c.platform == p))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|c| c.start_time);
        out.truncate(limit);
        Ok(out)
    }

    async fn running(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Contest>, StoreError> {
        let rows = self.rows.read().await;
        let mut out = rows
            .iter()
            .filter(|c| c.status == ContestStatus::Running && c.start_time <= now && now < c.end_time)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|c| c.start_time);
        out.truncate(limit);
        Ok(out)
    }

    async fn past(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<Platform>,
    ) -> Result<Vec<Contest>, StoreError> {
        let rows = self.rows.read().await;
        let mut out = rows
            .iter()
            .filter(|c| c.status == ContestStatus::Finished && c.end_time < now)
            .filter(|c| platform.map_or(true, |p| c.platform == p))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        out.truncate(limit);
        Ok(out)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    fn draft(platform: Platform, id: &str, name: &str, start_h: i64, len_h: i64) -> ContestDraft {
        let start = t0() + ChronoDuration::hours(start_h);
        ContestDraft::new(
            platform,
            id,
            name,
            format!("https://example.test/{id}"),
            start,
            start + ChronoDuration::hours(len_h),
        )
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_are_retried() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
    }

    #[test]
    fn request_builder_collects_headers() {
        let req = HttpRequest::get("https://clist.by/api").header("Authorization", "ApiKey u:k");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.headers, vec![("Authorization".to_string(), "ApiKey u:k".to_string())]);
        assert!(req.json_body.is_none());
    }

    #[tokio::test]
    async fn replace_all_clears_rows_missing_from_the_new_set() {
        let store = MemoryContestStore::new();
        store
            .replace_all(
                &[
                    draft(Platform::Codeforces, "1", "Round 1", 1, 2),
                    draft(Platform::Codeforces, "2", "Round 2", 3, 2),
                ],
                t0(),
            )
            .await
            .unwrap();
        store
            .replace_all(&[draft(Platform::Codeforces, "2", "Round 2", 3, 2)], t0())
            .await
            .unwrap();

        let rows = store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].platform_id, "2");
    }

    #[tokio::test]
    async fn upsert_collapses_on_id_or_name_match() {
        let store = MemoryContestStore::new();
        let written = store
            .replace_all(
                &[
                    draft(Platform::Codechef, "START1", "Starters 1", 1, 2),
                    draft(Platform::Codechef, "START1", "Starters One", 1, 2),
                    draft(Platform::Codechef, "start-1", "Starters One", 1, 3),
                ],
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(written, 3);

        let rows = store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].platform_id, "start-1");
        assert_eq!(rows[0].duration_secs, 3 * 3600);
    }

    #[tokio::test]
    async fn recompute_partitions_rows_by_wall_clock() {
        let store = MemoryContestStore::new();
        store
            .replace_all(
                &[
                    draft(Platform::Atcoder, "abc1", "ABC 1", 1, 2),
                    draft(Platform::Atcoder, "abc2", "ABC 2", 5, 2),
                    draft(Platform::Atcoder, "abc3", "ABC 3", 10, 2),
                ],
                t0(),
            )
            .await
            .unwrap();

        let later = t0() + ChronoDuration::hours(6);
        let moved = store.recompute_status(later).await.unwrap();
        assert_eq!(
            moved,
            StatusTransitions {
                finished: 1,
                running: 1,
                upcoming: 0
            }
        );

        for row in store.snapshot().await {
            assert_eq!(row.status, row.derived_status(later));
        }

        let again = store.recompute_status(later).await.unwrap();
        assert_eq!(again.total(), 0);
    }

    #[tokio::test]
    async fn queries_filter_and_order_each_bucket() {
        let store = MemoryContestStore::new();
        store
            .replace_all(
                &[
                    draft(Platform::Leetcode, "w2", "Weekly 2", 30, 1),
                    draft(Platform::Codeforces, "9", "Round 9", 20, 2),
                    draft(Platform::Leetcode, "w1", "Weekly 1", 1, 1),
                    draft(Platform::Leetcode, "w0", "Weekly 0", 2, 3),
                ],
                t0(),
            )
            .await
            .unwrap();
        let now = t0() + ChronoDuration::hours(4);
        store.recompute_status(now).await.unwrap();

        let upcoming = store.upcoming(now, 10, None).await.unwrap();
        assert_eq!(
            upcoming.iter().map(|c| c.platform_id.as_str()).collect::<Vec<_>>(),
            vec!["9", "w2"]
        );
        let leetcode = store.upcoming(now, 10, Some(Platform::Leetcode)).await.unwrap();
        assert_eq!(leetcode.len(), 1);

        let running = store.running(now, 10).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].platform_id, "w0");

        let past = store.past(now, 10, Some(Platform::Leetcode)).await.unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].platform_id, "w1");

        assert_eq!(store.upcoming(now, 1, None).await.unwrap().len(), 1);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[derive(Debug, PartialEq)]
    struct Observation {
        transitions: StatusTransitions,
        upcoming: Vec<String>,
        running: Vec<String>,
        past_at_boundary: Vec<String>,
        past_later: Vec<String>,
        past_later_leetcode: Vec<String>,
        count: u64,
    }

    fn ids(rows: Vec<Contest>) -> Vec<String> {
        rows.into_iter().map(|c| c.platform_id).collect()
    }

    /// Same writes and reads against any backend. `now` sits exactly on two end times.
    async fn exercise(store: &dyn ContestStore) -> Observation {
        store
            .replace_all(
                &[
                    draft(Platform::Codeforces, "1", "Round 1", 1, 2),
                    draft(Platform::Codeforces, "2", "Round 2", 3, 2),
                ],
                t0(),
            )
            .await
            .unwrap();
        store
            .replace_all(
                &[
                    draft(Platform::Codechef, "START1", "Starters 1", 1, 2),
                    draft(Platform::Codechef, "START1", "Starters One", 1, 2),
                    draft(Platform::Codechef, "start-1", "Starters One", 1, 3),
                    draft(Platform::Leetcode, "w0", "Weekly 0", 2, 2),
                    draft(Platform::Leetcode, "w1", "Weekly 1", 3, 5),
                    draft(Platform::Leetcode, "w2", "Weekly 2", 30, 1),
                    draft(Platform::Codeforces, "9", "Round 9", 20, 2),
                ],
                t0(),
            )
            .await
            .unwrap();

        let now = t0() + ChronoDuration::hours(4);
        let later = now + ChronoDuration::hours(1);
        Observation {
            transitions: store.recompute_status(now).await.unwrap(),
            upcoming: ids(store.upcoming(now, 10, None).await.unwrap()),
            running: ids(store.running(now, 10).await.unwrap()),
            past_at_boundary: ids(store.past(now, 10, None).await.unwrap()),
            past_later: ids(store.past(later, 10, None).await.unwrap()),
            past_later_leetcode: ids(store.past(later, 10, Some(Platform::Leetcode)).await.unwrap()),
            count: store.count().await.unwrap(),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn rows_ending_exactly_now_are_finished_but_not_yet_past() {
        let seen = exercise(&MemoryContestStore::new()).await;
        assert_eq!(
            seen,
            Observation {
                transitions: StatusTransitions {
                    finished: 2,
                    running: 1,
                    upcoming: 0
                },
                upcoming: strings(&["9", "w2"]),
                running: strings(&["w1"]),
                past_at_boundary: Vec::new(),
                past_later: strings(&["w0", "start-1"]),
                past_later_leetcode: strings(&["w0"]),
                count: 5,
            }
        );
    }

    async fn scratch_pg_store() -> PgContestStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        let store = PgContestStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        sqlx::query("DELETE FROM contests")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn postgres_store_matches_memory_store() {
        let pg = scratch_pg_store().await;
        let expected = exercise(&MemoryContestStore::new()).await;
        assert_eq!(exercise(&pg).await, expected);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn postgres_upsert_rewrites_the_matched_row() {
        let pg = scratch_pg_store().await;
        pg.replace_all(
            &[
                draft(Platform::Codechef, "START1", "Starters 1", 1, 2),
                draft(Platform::Codechef, "start-1", "Starters 1", 1, 3),
            ],
            t0(),
        )
        .await
        .unwrap();

        let rows = pg.upcoming(t0(), 10, Some(Platform::Codechef)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].platform_id, "start-1");
        assert_eq!(rows[0].duration_secs, 3 * 3600);
        assert_eq!(rows[0].status, ContestStatus::Upcoming);
        assert!(pg.upcoming(t0(), 10, Some(Platform::Atcoder)).await.unwrap().is_empty());
    }
}
