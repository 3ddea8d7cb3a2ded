//! Source adapter contracts + live, synthesized and meta adapter implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc, Weekday};
use cphub_core::{ContestDraft, Platform};
use cphub_storage::{FetchError, HttpFetcher, HttpRequest};
use scraper::{ElementRef, Html, Selector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cphub-adapters";

/// Priority order used when no registry file overrides it.
pub const DEFAULT_SOURCE_ORDER: [&str; 6] = [
    "codeforces",
    "codechef",
    "leetcode",
    "atcoder",
    "geeksforgeeks-weekly",
    "clist",
];

const META_MAX_ITEMS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Live,
    Synthesized,
    Meta,
}

#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub max_items: usize,
    pub http: Arc<HttpFetcher>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {source_id} response: {source}")]
    Decode {
        source_id: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{source_id} reported failure: {message}")]
    Upstream {
        source_id: &'static str,
        message: String,
    },
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn kind(&self) -> AdapterKind;

    /// Candidates starting strictly after `ctx.now`, ascending by start time.
    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError>;
}

fn decode<T: DeserializeOwned>(source_id: &'static str, body: &[u8]) -> Result<T, AdapterError> {
    serde_json::from_slice(body).map_err(|source| AdapterError::Decode { source_id, source })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// `start + secs`, or `None` when the upstream length is out of range.
fn end_after(start: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::try_seconds(secs)?)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn finalize(mut drafts: Vec<ContestDraft>, now: DateTime<Utc>, max_items: usize) -> Vec<ContestDraft> {
    drafts.retain(|d| d.start_time > now);
    drafts.sort_by_key(|d| d.start_time);
    drafts.truncate(max_items);
    drafts
}

// ---- codeforces --------------------------------------------------------------

const CODEFORCES_API: &str = "https://codeforces.com/api/contest.list?gym=false";

#[derive(Debug, Deserialize)]
struct CodeforcesEnvelope {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Vec<CodeforcesContest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeforcesContest {
    id: i64,
    name: String,
    phase: String,
    duration_seconds: i64,
    #[serde(default)]
    start_time_seconds: Option<i64>,
}

pub fn parse_codeforces(
    body: &[u8],
    now: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<ContestDraft>, AdapterError> {
    let envelope: CodeforcesEnvelope = decode("codeforces", body)?;
    if envelope.status != "OK" {
        return Err(AdapterError::Upstream {
            source_id: "codeforces",
            message: envelope.comment.unwrap_or(envelope.status),
        });
    }

    let drafts = envelope
        .result
        .into_iter()
        .filter(|c| c.phase == "BEFORE")
        .filter_map(|c| {
            let start = timestamp(c.start_time_seconds?)?;
            let Some(end) = end_after(start, c.duration_seconds) else {
                debug!(id = c.id, "skipping codeforces contest with out-of-range duration");
                return None;
            };
            Some(ContestDraft::new(
                Platform::Codeforces,
                c.id.to_string(),
                c.name,
                format!("https://codeforces.com/contests/{}", c.id),
                start,
                end,
            ))
        })
        .collect();
    Ok(finalize(drafts, now, max_items))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeforcesAdapter;

#[async_trait]
impl SourceAdapter for CodeforcesAdapter {
    fn source_id(&self) -> &'static str {
        "codeforces"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Live
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        let resp = ctx.http.fetch_bytes(ctx.run_id, self.source_id(), CODEFORCES_API).await?;
        parse_codeforces(&resp.body, ctx.now, ctx.max_items)
    }
}

// ---- codechef ----------------------------------------------------------------

const CODECHEF_API: &str =
    "https://www.codechef.com/api/list/contests/all?sort_by=START&sorting_order=asc&offset=0&mode=all";

#[derive(Debug, Deserialize)]
struct CodechefEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    future_contests: Vec<CodechefContest>,
}

#[derive(Debug, Deserialize)]
struct CodechefContest {
    contest_code: String,
    contest_name: String,
    contest_start_date_iso: String,
    contest_end_date_iso: String,
}

pub fn parse_codechef(
    body: &[u8],
    now: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<ContestDraft>, AdapterError> {
    let envelope: CodechefEnvelope = decode("codechef", body)?;
    if envelope.status != "success" {
        return Err(AdapterError::Upstream {
            source_id: "codechef",
            message: envelope.message.unwrap_or(envelope.status),
        });
    }

    let drafts = envelope
        .future_contests
        .into_iter()
        .filter_map(|c| {
            let (Some(start), Some(end)) = (
                parse_rfc3339(&c.contest_start_date_iso),
                parse_rfc3339(&c.contest_end_date_iso),
            ) else {
                debug!(code = %c.contest_code, "skipping codechef contest with unparseable dates");
                return None;
            };
            let url = format!("https://www.codechef.com/{}", c.contest_code);
            Some(ContestDraft::new(
                Platform::Codechef,
                c.contest_code,
                c.contest_name,
                url,
                start,
                end,
            ))
        })
        .collect();
    Ok(finalize(drafts, now, max_items))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodechefAdapter;

#[async_trait]
impl SourceAdapter for CodechefAdapter {
    fn source_id(&self) -> &'static str {
        "codechef"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Live
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        let resp = ctx.http.fetch_bytes(ctx.run_id, self.source_id(), CODECHEF_API).await?;
        parse_codechef(&resp.body, ctx.now, ctx.max_items)
    }
}

// ---- leetcode ----------------------------------------------------------------

const LEETCODE_GRAPHQL: &str = "https://leetcode.com/graphql";
const LEETCODE_UPCOMING_QUERY: &str = "{ upcomingContests { title titleSlug startTime duration } }";

#[derive(Debug, Deserialize)]
struct LeetcodeEnvelope {
    #[serde(default)]
    data: Option<LeetcodeData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeetcodeData {
    #[serde(default)]
    upcoming_contests: Vec<LeetcodeContest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeetcodeContest {
    title: String,
    title_slug: String,
    start_time: i64,
    duration: i64,
}

pub fn parse_leetcode(
    body: &[u8],
    now: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<ContestDraft>, AdapterError> {
    let envelope: LeetcodeEnvelope = decode("leetcode", body)?;
    let Some(data) = envelope.data else {
        return Err(AdapterError::Upstream {
            source_id: "leetcode",
            message: format!("graphql returned no data ({} errors)", envelope.errors.len()),
        });
    };

    let drafts = data
        .upcoming_contests
        .into_iter()
        .filter_map(|c| {
            let start = timestamp(c.start_time)?;
            let Some(end) = end_after(start, c.duration) else {
                debug!(slug = %c.title_slug, "skipping leetcode contest with out-of-range duration");
                return None;
            };
            let url = format!("https://leetcode.com/contest/{}", c.title_slug);
            Some(ContestDraft::new(
                Platform::Leetcode,
                c.title_slug,
                c.title,
                url,
                start,
                end,
            ))
        })
        .collect();
    Ok(finalize(drafts, now, max_items))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeetcodeAdapter;

#[async_trait]
impl SourceAdapter for LeetcodeAdapter {
    fn source_id(&self) -> &'static str {
        "leetcode"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Live
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        let request = HttpRequest::post_json(
            LEETCODE_GRAPHQL,
            serde_json::json!({ "query": LEETCODE_UPCOMING_QUERY }),
        )
        .header("Referer", "https://leetcode.com/contest/");
        let resp = ctx.http.send(ctx.run_id, self.source_id(), &request).await?;
        parse_leetcode(&resp.body, ctx.now, ctx.max_items)
    }
}

// ---- atcoder -----------------------------------------------------------------

const ATCODER_BASE: &str = "https://atcoder.jp";

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn parse_atcoder_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `HH:MM`, where hours may exceed 24 for long heuristic contests.
fn parse_hours_minutes(text: &str) -> Option<Duration> {
    let (hours, minutes) = text.trim().split_once(':')?;
    let hours: i64 = hours.trim().parse().ok()?;
    let minutes: i64 = minutes.trim().parse().ok()?;
    Duration::try_hours(hours)?.checked_add(&Duration::try_minutes(minutes)?)
}

pub fn parse_atcoder_upcoming(
    html: &str,
    now: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<ContestDraft>, AdapterError> {
    let document = Html::parse_document(html);
    let rows = selector("#contest-table-upcoming tbody tr")?;
    let cells = selector("td")?;
    let time = selector("time")?;
    let link = selector("a[href^='/contests/']")?;

    let mut drafts = Vec::new();
    for row in document.select(&rows) {
        let tds = row.select(&cells).collect::<Vec<_>>();
        let [start_cell, name_cell, duration_cell, ..] = tds.as_slice() else {
            continue;
        };
        let Some(start) = start_cell
            .select(&time)
            .next()
            .and_then(|t| parse_atcoder_time(&element_text(t)))
        else {
            debug!("skipping atcoder row without a parseable start time");
            continue;
        };
        let Some(anchor) = name_cell.select(&link).next() else {
            continue;
        };
        let Some(slug) = anchor
            .value()
            .attr("href")
            .map(|href| href.trim_start_matches("/contests/").trim_matches('/').to_string())
            .filter(|slug| !slug.is_empty())
        else {
            continue;
        };
        let Some(end) = parse_hours_minutes(&element_text(*duration_cell))
            .and_then(|length| start.checked_add_signed(length))
        else {
            debug!(%slug, "skipping atcoder row with an unusable duration");
            continue;
        };

        let url = format!("{ATCODER_BASE}/contests/{slug}");
        drafts.push(ContestDraft::new(
            Platform::Atcoder,
            slug,
            element_text(anchor),
            url,
            start,
            end,
        ));
    }
    Ok(finalize(drafts, now, max_items))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtcoderAdapter;

#[async_trait]
impl SourceAdapter for AtcoderAdapter {
    fn source_id(&self) -> &'static str {
        "atcoder"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Live
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        let url = format!("{ATCODER_BASE}/contests/?lang=en");
        let resp = ctx.http.fetch_bytes(ctx.run_id, self.source_id(), &url).await?;
        parse_atcoder_upcoming(&resp.text(), ctx.now, ctx.max_items)
    }
}

// ---- synthesized weekly schedules -------------------------------------------

/// Next `weekday hour:minute` UTC strictly after `now`.
pub fn next_weekly_occurrence(
    now: DateTime<Utc>,
    weekday: Weekday,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let date = today + Duration::days(i64::from(ahead));
    let candidate = Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0)?);
    if candidate > now {
        Some(candidate)
    } else {
        Some(candidate + Duration::weeks(1))
    }
}

/// Recurring event without a reliable public feed. Emits the single next occurrence.
#[derive(Debug, Clone)]
pub struct WeeklyScheduleAdapter {
    pub source_id: &'static str,
    pub platform: Platform,
    pub name: &'static str,
    pub url: &'static str,
    pub id_prefix: &'static str,
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub length: Duration,
}

impl WeeklyScheduleAdapter {
    pub fn next_candidate(&self, now: DateTime<Utc>) -> Result<ContestDraft, AdapterError> {
        let start = next_weekly_occurrence(now, self.weekday, self.hour, self.minute).ok_or_else(|| {
            AdapterError::Message(format!(
                "{} schedule has an invalid time {:02}:{:02}",
                self.source_id, self.hour, self.minute
            ))
        })?;
        Ok(ContestDraft::new(
            self.platform,
            format!("{}-{}", self.id_prefix, start.timestamp()),
            self.name,
            self.url,
            start,
            start + self.length,
        ))
    }
}

#[async_trait]
impl SourceAdapter for WeeklyScheduleAdapter {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Synthesized
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        Ok(vec![self.next_candidate(ctx.now)?])
    }
}

/// GeeksforGeeks weekly contest: Sundays 19:00 IST.
pub fn geeksforgeeks_weekly_adapter() -> WeeklyScheduleAdapter {
    WeeklyScheduleAdapter {
        source_id: "geeksforgeeks-weekly",
        platform: Platform::Geeksforgeeks,
        name: "GeeksforGeeks Weekly Coding Contest",
        url: "https://practice.geeksforgeeks.org/events",
        id_prefix: "gfg-weekly",
        weekday: Weekday::Sun,
        hour: 13,
        minute: 30,
        length: Duration::minutes(90),
    }
}

// ---- clist (meta source) -----------------------------------------------------

const CLIST_API: &str = "https://clist.by/api/v4/contest/?upcoming=true&order_by=start&limit=100";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClistCredentials {
    pub username: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
struct ClistEnvelope {
    #[serde(default)]
    objects: Vec<ClistContest>,
}

#[derive(Debug, Deserialize)]
struct ClistContest {
    id: i64,
    event: String,
    host: String,
    href: String,
    start: String,
    end: String,
}

pub fn platform_for_host(host: &str) -> Option<Platform> {
    let host = host.trim().to_ascii_lowercase();
    match host.trim_start_matches("www.") {
        "codeforces.com" => Some(Platform::Codeforces),
        "codechef.com" => Some(Platform::Codechef),
        "leetcode.com" => Some(Platform::Leetcode),
        "atcoder.jp" => Some(Platform::Atcoder),
        "geeksforgeeks.org" | "practice.geeksforgeeks.org" => Some(Platform::Geeksforgeeks),
        "hackerrank.com" => Some(Platform::Hackerrank),
        "hackerearth.com" => Some(Platform::Hackerearth),
        "topcoder.com" | "community.topcoder.com" => Some(Platform::Topcoder),
        _ => None,
    }
}

fn parse_clist_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn parse_clist(
    body: &[u8],
    now: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<ContestDraft>, AdapterError> {
    let envelope: ClistEnvelope = decode("clist", body)?;
    let drafts = envelope
        .objects
        .into_iter()
        .filter_map(|c| {
            let platform = platform_for_host(&c.host)?;
            let start = parse_clist_time(&c.start)?;
            let end = parse_clist_time(&c.end)?;
            Some(ContestDraft::new(platform, c.id.to_string(), c.event, c.href, start, end))
        })
        .collect();
    Ok(finalize(drafts, now, max_items))
}

#[derive(Debug, Clone, Default)]
pub struct ClistAdapter {
    credentials: Option<ClistCredentials>,
}

impl ClistAdapter {
    pub fn new(credentials: Option<ClistCredentials>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl SourceAdapter for ClistAdapter {
    fn source_id(&self) -> &'static str {
        "clist"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Meta
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<ContestDraft>, AdapterError> {
        let Some(credentials) = &self.credentials else {
            debug!("clist credentials not configured; meta source contributes nothing");
            return Ok(Vec::new());
        };
        let request = HttpRequest::get(CLIST_API).header(
            "Authorization",
            format!("ApiKey {}:{}", credentials.username, credentials.api_key),
        );
        let resp = ctx.http.send(ctx.run_id, self.source_id(), &request).await?;
        parse_clist(&resp.body, ctx.now, META_MAX_ITEMS.max(ctx.max_items))
    }
}

// ---- registry ----------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub clist: Option<ClistCredentials>,
}

pub fn adapter_for_source(source_id: &str, settings: &AdapterSettings) -> Option<Arc<dyn SourceAdapter>> {
    match source_id {
        "codeforces" => Some(Arc::new(CodeforcesAdapter)),
        "codechef" => Some(Arc::new(CodechefAdapter)),
        "leetcode" => Some(Arc::new(LeetcodeAdapter)),
        "atcoder" => Some(Arc::new(AtcoderAdapter)),
        "geeksforgeeks-weekly" => Some(Arc::new(geeksforgeeks_weekly_adapter())),
        "clist" => Some(Arc::new(ClistAdapter::new(settings.clist.clone()))),
        _ => None,
    }
}
