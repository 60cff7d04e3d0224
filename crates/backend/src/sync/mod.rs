//! Email and calendar sync orchestration.
//!
//! A sync run fans out over an account's active Google/Microsoft connections
//! concurrently; each connection gets its own run record, its own DB
//! connection, and fails independently. Dedup keys on the storage layer make
//! page re-runs after partial failure safe.
//!
//! Cursor rules: the `last_synced` timestamp only ever moves past mail that
//! has been persisted. Ascending listings advance it page by page; a
//! newest-first listing keeps it still until the whole listing completes. A
//! run that ends at a cap completes without touching the cursor, so the next
//! invocation picks up the remainder.

pub mod adapter;
pub mod google;
pub mod microsoft;
pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel_async::AsyncPgConnection;
use futures::future::join_all;
use shared_types::{
    is_placeholder_meeting_id, placeholder_meeting_id, NormalizedCalendarEvent, NormalizedEmail,
    Provider, SyncReport, SyncState,
};
use uuid::Uuid;

use crate::config::{AppConfig, SyncConfig};
use crate::db::{self, DbPool};
use crate::meetgeek;
use crate::models::{NewCalendarEvent, NewEmail, NewMeeting, OAuthTokenRow};
use crate::oauth::get_valid_token;
use self::adapter::ProviderAdapter;
use self::google::GoogleAdapter;
use self::microsoft::MicrosoftAdapter;

/// Run a sync for every active syncable connection of an account,
/// optionally narrowed to one mailbox. Returns one report per connection.
pub async fn sync_account(
    pool: &DbPool,
    config: &AppConfig,
    http: &reqwest::Client,
    account_id: &str,
    email: Option<&str>,
) -> anyhow::Result<Vec<SyncReport>> {
    let rows = {
        let mut conn = db::get_conn(pool).await?;
        db::oauth_tokens::list_active_syncable(&mut conn, account_id, email).await?
    };

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let reports = join_all(
        rows.into_iter()
            .map(|row| sync_connection(pool, config, http, row)),
    )
    .await;

    Ok(reports)
}

#[derive(Debug, Default)]
struct RunCounters {
    emails_processed: usize,
    emails_saved: usize,
    emails_failed: usize,
    events_processed: usize,
    events_saved: usize,
    events_failed: usize,
}

impl RunCounters {
    fn report(&self, provider: Provider) -> SyncReport {
        SyncReport {
            provider: provider.as_str().to_string(),
            processed: self.emails_processed + self.events_processed,
            saved: self.emails_saved + self.events_saved,
            failed: self.emails_failed + self.events_failed,
        }
    }
}

/// Persistence seam between the page loops and the database, so the loop
/// semantics (caps, cursor movement, dedup accounting) stay testable
/// without Postgres.
#[async_trait]
trait SyncStore: Send {
    /// Store one email. `Ok(true)` for a new row, `Ok(false)` on a dedup hit.
    async fn store_email(&mut self, email: &NormalizedEmail) -> anyhow::Result<bool>;

    /// Store one event and its derived meeting row.
    async fn store_event(&mut self, event: &NormalizedCalendarEvent) -> anyhow::Result<()>;

    /// Move the `last_synced` cursor forward.
    async fn advance_cursor(&mut self, cursor: DateTime<Utc>) -> anyhow::Result<()>;
}

struct PgStore<'a> {
    conn: &'a mut AsyncPgConnection,
    config: &'a AppConfig,
    http: &'a reqwest::Client,
    token_id: Uuid,
}

#[async_trait]
impl SyncStore for PgStore<'_> {
    async fn store_email(&mut self, email: &NormalizedEmail) -> anyhow::Result<bool> {
        let inserted = db::emails::insert(self.conn, NewEmail::from(email)).await?;
        Ok(inserted.is_some())
    }

    async fn store_event(&mut self, event: &NormalizedCalendarEvent) -> anyhow::Result<()> {
        persist_event(self.conn, self.config, self.http, event).await
    }

    async fn advance_cursor(&mut self, cursor: DateTime<Utc>) -> anyhow::Result<()> {
        db::oauth_tokens::advance_cursor(self.conn, self.token_id, cursor).await
    }
}

/// Sync one connection end to end. Never returns an error: every failure
/// mode ends in a failed run record and a report.
async fn sync_connection(
    pool: &DbPool,
    config: &AppConfig,
    http: &reqwest::Client,
    row: OAuthTokenRow,
) -> SyncReport {
    let (provider, adapter): (Provider, Box<dyn ProviderAdapter>) = match row.provider_kind() {
        Some(Provider::Google) => (
            Provider::Google,
            Box::new(GoogleAdapter::new(http.clone(), row.account_id.clone())),
        ),
        Some(Provider::Microsoft) => (
            Provider::Microsoft,
            Box::new(MicrosoftAdapter::new(http.clone(), row.account_id.clone())),
        ),
        _ => {
            tracing::error!(
                "Connection {} has non-syncable provider '{}'",
                row.id,
                row.provider
            );
            return SyncReport {
                provider: row.provider.clone(),
                failed: 1,
                ..Default::default()
            };
        }
    };

    let mut counters = RunCounters::default();

    let mut conn = match db::get_conn(pool).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("No DB connection for {} sync: {}", provider, e);
            let mut report = counters.report(provider);
            report.failed += 1;
            return report;
        }
    };

    let run = match db::sync_runs::start(&mut conn, &row.account_id, provider.as_str()).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!("Could not record {} sync run start: {}", provider, e);
            let mut report = counters.report(provider);
            report.failed += 1;
            return report;
        }
    };
    let run_started = run.started_at;

    if let Err(e) =
        db::oauth_tokens::set_sync_status(&mut conn, row.id, SyncState::InProgress, None).await
    {
        tracing::warn!("Could not mark {} connection in progress: {}", provider, e);
    }

    let access_token = match get_valid_token(&mut conn, http, config, &row).await {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(
                "No valid token for {}/{} ({}): {}",
                row.account_id,
                provider,
                row.email_address,
                e
            );
            finish_failed(&mut conn, row.id, run.id, &counters, &e.to_string()).await;
            let mut report = counters.report(provider);
            report.failed += 1;
            return report;
        }
    };

    // First run looks back a fixed window; later runs resume from the cursor.
    let since = row
        .last_synced
        .unwrap_or(run_started - Duration::days(config.sync.lookback_days));

    tracing::info!(
        "Syncing {}/{} ({}) since {}",
        row.account_id,
        provider,
        row.email_address,
        since
    );

    let outcome = {
        let mut store = PgStore {
            conn: &mut conn,
            config,
            http,
            token_id: row.id,
        };
        async {
            let emails_capped = sync_emails(
                &mut store,
                &config.sync,
                adapter.as_ref(),
                &access_token,
                &row.account_id,
                since,
                run_started,
                &mut counters,
            )
            .await?;
            let events_capped = sync_events(
                &mut store,
                &config.sync,
                adapter.as_ref(),
                &access_token,
                &row.account_id,
                since,
                &mut counters,
            )
            .await?;
            Ok::<_, anyhow::Error>(emails_capped || events_capped)
        }
        .await
    };

    match outcome {
        Ok(capped) => {
            if let Err(e) = db::sync_runs::complete(
                &mut conn,
                run.id,
                counters.emails_saved as i32,
                counters.events_saved as i32,
            )
            .await
            {
                tracing::error!("Could not record {} run completion: {}", provider, e);
            }
            // An uncapped run has seen everything up to its start time. A
            // capped run has not: leave the cursor where the page loop put
            // it so the next run fetches the remainder.
            let cursor = if capped { None } else { Some(run_started) };
            if let Err(e) =
                db::oauth_tokens::set_sync_status(&mut conn, row.id, SyncState::Completed, cursor)
                    .await
            {
                tracing::error!("Could not mark {} connection completed: {}", provider, e);
            }
        }
        Err(e) => {
            tracing::error!(
                "Sync failed for {}/{} ({}): {}",
                row.account_id,
                provider,
                row.email_address,
                e
            );
            finish_failed(&mut conn, row.id, run.id, &counters, &e.to_string()).await;
        }
    }

    counters.report(provider)
}

/// Record a failed run; counts reflect what was persisted before the failure.
async fn finish_failed(
    conn: &mut AsyncPgConnection,
    token_id: Uuid,
    run_id: Uuid,
    counters: &RunCounters,
    error: &str,
) {
    if let Err(e) = db::sync_runs::fail(
        conn,
        run_id,
        counters.emails_saved as i32,
        counters.events_saved as i32,
        error,
    )
    .await
    {
        tracing::error!("Could not record run failure: {}", e);
    }
    if let Err(e) = db::oauth_tokens::set_sync_status(conn, token_id, SyncState::Failed, None).await
    {
        tracing::error!("Could not mark connection failed: {}", e);
    }
}

/// Page through the mailbox since the cursor. Returns `Ok(true)` when the
/// per-run email cap ended the listing early.
#[allow(clippy::too_many_arguments)]
async fn sync_emails(
    store: &mut dyn SyncStore,
    sync_config: &SyncConfig,
    adapter: &dyn ProviderAdapter,
    access_token: &str,
    account_id: &str,
    since: DateTime<Utc>,
    run_started: DateTime<Utc>,
    counters: &mut RunCounters,
) -> anyhow::Result<bool> {
    let cap = sync_config.max_emails_per_run;
    let mut page_token: Option<String> = None;

    loop {
        let page = adapter
            .list_emails(access_token, since, page_token.as_deref())
            .await?;

        counters.emails_processed += page.items.len() + page.skipped;
        counters.emails_failed += page.skipped;

        let mut page_newest: Option<DateTime<Utc>> = None;
        let mut page_store_failures = 0usize;
        let mut capped = false;

        for email in &page.items {
            if counters.emails_saved >= cap {
                capped = true;
                break;
            }

            match store.store_email(email).await {
                Ok(true) => counters.emails_saved += 1,
                // Dedup hit; already persisted by an earlier run or page.
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to store email {} for {}: {}",
                        email.provider_message_id,
                        account_id,
                        e
                    );
                    counters.emails_failed += 1;
                    page_store_failures += 1;
                }
            }

            page_newest = Some(match page_newest {
                Some(current) => current.max(email.received_at),
                None => email.received_at,
            });
        }

        // Only an ascending listing may advance the cursor mid-run: every
        // persisted page is then strictly older than whatever remains. A
        // newest-first listing holds the cursor until the run completes,
        // otherwise a later-page failure would strand the older messages
        // beyond it. Either way, never past a page with store failures.
        if adapter.emails_oldest_first() && page_store_failures == 0 && !capped {
            if let Some(newest) = page_newest {
                store.advance_cursor(newest.min(run_started)).await?;
            }
        }

        if capped {
            tracing::info!(
                "Email cap ({}) reached for {}/{}, ending run cleanly",
                cap,
                account_id,
                adapter.provider()
            );
            return Ok(true);
        }

        page_token = page.next_page;
        if page_token.is_none() {
            return Ok(false);
        }

        tokio::time::sleep(std::time::Duration::from_millis(sync_config.page_delay_ms)).await;
    }
}

/// Page through the calendar window. Returns `Ok(true)` when the per-run
/// event cap ended the listing early. The timestamp cursor never moves here;
/// event windows extend into the future and the upsert absorbs re-reads.
#[allow(clippy::too_many_arguments)]
async fn sync_events(
    store: &mut dyn SyncStore,
    sync_config: &SyncConfig,
    adapter: &dyn ProviderAdapter,
    access_token: &str,
    account_id: &str,
    since: DateTime<Utc>,
    counters: &mut RunCounters,
) -> anyhow::Result<bool> {
    let cap = sync_config.max_events_per_run;
    let mut page_token: Option<String> = None;

    loop {
        let page = adapter
            .list_events(access_token, since, page_token.as_deref())
            .await?;

        counters.events_processed += page.items.len() + page.skipped;

        for event in &page.items {
            if counters.events_saved >= cap {
                tracing::info!(
                    "Event cap ({}) reached for {}/{}, ending run cleanly",
                    cap,
                    account_id,
                    adapter.provider()
                );
                return Ok(true);
            }

            match store.store_event(event).await {
                Ok(()) => counters.events_saved += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to store event {} for {}: {}",
                        event.calendar_event_id,
                        account_id,
                        e
                    );
                    counters.events_failed += 1;
                }
            }
        }

        page_token = page.next_page;
        if page_token.is_none() {
            return Ok(false);
        }

        tokio::time::sleep(std::time::Duration::from_millis(sync_config.page_delay_ms)).await;
    }
}

/// Persist one calendar event and its derived meeting row, inviting the
/// notetaker bot for linked meetings that don't have a bot id yet.
async fn persist_event(
    conn: &mut AsyncPgConnection,
    config: &AppConfig,
    http: &reqwest::Client,
    event: &NormalizedCalendarEvent,
) -> anyhow::Result<()> {
    db::calendar_events::upsert(conn, NewCalendarEvent::from(event)).await?;

    let meeting = db::meetings::insert_if_absent(
        conn,
        NewMeeting {
            account_id: event.account_id.clone(),
            meeting_id: placeholder_meeting_id(&event.calendar_event_id),
            deal_id: None,
            calendar_event_id: event.calendar_event_id.clone(),
            title: event.title.clone(),
            host_email: event.organizer_email.clone(),
            participant_emails: event.attendees.iter().map(|a| Some(a.clone())).collect(),
            start_time: event.start_time,
            end_time: event.end_time,
            source: event.source.as_str().to_string(),
        },
    )
    .await?;

    // Invite the bot once per meeting: only while the row still carries the
    // placeholder id, and only for events with a joinable link. Invite
    // failures are soft; the placeholder stays until a later run succeeds.
    if let (Some(link), Some(api_key)) = (&event.meeting_link, &config.meetgeek_api_key) {
        if is_placeholder_meeting_id(&meeting.meeting_id) {
            if let Some(bot_id) = meetgeek::invite_bot(http, api_key, link, &event.title).await {
                db::meetings::set_meeting_id(conn, meeting.id, &bot_id).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::adapter::Page;
    use super::*;
    use chrono::TimeZone;
    use shared_types::EventSource;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeAdapter {
        oldest_first: bool,
        email_pages: Mutex<VecDeque<anyhow::Result<Page<NormalizedEmail>>>>,
        event_pages: Mutex<VecDeque<anyhow::Result<Page<NormalizedCalendarEvent>>>>,
    }

    impl FakeAdapter {
        fn emails(oldest_first: bool, pages: Vec<anyhow::Result<Page<NormalizedEmail>>>) -> Self {
            FakeAdapter {
                oldest_first,
                email_pages: Mutex::new(pages.into()),
                event_pages: Mutex::new(VecDeque::new()),
            }
        }

        fn events(pages: Vec<anyhow::Result<Page<NormalizedCalendarEvent>>>) -> Self {
            FakeAdapter {
                oldest_first: true,
                email_pages: Mutex::new(VecDeque::new()),
                event_pages: Mutex::new(pages.into()),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider(&self) -> Provider {
            Provider::Google
        }

        fn emails_oldest_first(&self) -> bool {
            self.oldest_first
        }

        async fn list_emails(
            &self,
            _access_token: &str,
            _since: DateTime<Utc>,
            _page_token: Option<&str>,
        ) -> anyhow::Result<Page<NormalizedEmail>> {
            self.email_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::empty()))
        }

        async fn list_events(
            &self,
            _access_token: &str,
            _since: DateTime<Utc>,
            _page_token: Option<&str>,
        ) -> anyhow::Result<Page<NormalizedCalendarEvent>> {
            self.event_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::empty()))
        }
    }

    #[derive(Default)]
    struct FakeStore {
        emails: Vec<String>,
        events: Vec<String>,
        cursor: Option<DateTime<Utc>>,
        failing_message_ids: Vec<String>,
    }

    #[async_trait]
    impl SyncStore for FakeStore {
        async fn store_email(&mut self, email: &NormalizedEmail) -> anyhow::Result<bool> {
            if self.failing_message_ids.contains(&email.provider_message_id) {
                anyhow::bail!("storage rejected {}", email.provider_message_id);
            }
            if self.emails.contains(&email.provider_message_id) {
                return Ok(false);
            }
            self.emails.push(email.provider_message_id.clone());
            Ok(true)
        }

        async fn store_event(&mut self, event: &NormalizedCalendarEvent) -> anyhow::Result<()> {
            self.events.push(event.calendar_event_id.clone());
            Ok(())
        }

        async fn advance_cursor(&mut self, cursor: DateTime<Utc>) -> anyhow::Result<()> {
            self.cursor = Some(cursor);
            Ok(())
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn email(id: &str, received_at: DateTime<Utc>) -> NormalizedEmail {
        NormalizedEmail {
            account_id: "acc1".to_string(),
            provider_message_id: id.to_string(),
            thread_id: None,
            from_address: "sender@example.com".to_string(),
            to_addresses: vec!["me@example.com".to_string()],
            cc_addresses: Vec::new(),
            bcc_addresses: Vec::new(),
            subject: "hello".to_string(),
            body_text: Some("body".to_string()),
            body_html: None,
            received_at,
            labels: Vec::new(),
            is_read: false,
            has_attachments: false,
        }
    }

    fn event(id: &str) -> NormalizedCalendarEvent {
        NormalizedCalendarEvent {
            account_id: "acc1".to_string(),
            calendar_event_id: format!("google_{}", id),
            title: "standup".to_string(),
            start_time: ts(9),
            end_time: ts(10),
            attendees: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            organizer_email: Some("a@example.com".to_string()),
            meeting_link: None,
            source: EventSource::GoogleCalendar,
        }
    }

    fn page<T>(items: Vec<T>, next_page: Option<&str>) -> Page<T> {
        Page {
            items,
            next_page: next_page.map(str::to_string),
            skipped: 0,
        }
    }

    fn test_sync_config() -> SyncConfig {
        SyncConfig {
            max_emails_per_run: 100,
            max_events_per_run: 100,
            lookback_days: 30,
            page_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn newest_first_listing_holds_cursor_when_a_later_page_fails() {
        // Newest-first mailboxes put the newest mail on page 1: a cursor
        // moved past it would strand everything on the pages that follow.
        let adapter = FakeAdapter::emails(
            false,
            vec![
                Ok(page(
                    vec![email("e1", ts(12)), email("e2", ts(11))],
                    Some("p2"),
                )),
                Err(anyhow::anyhow!("provider 500")),
            ],
        );
        let mut store = FakeStore::default();
        let mut counters = RunCounters::default();

        let result = sync_emails(
            &mut store,
            &test_sync_config(),
            &adapter,
            "tok",
            "acc1",
            ts(0),
            ts(13),
            &mut counters,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(store.emails, vec!["e1", "e2"]);
        assert_eq!(counters.emails_saved, 2);
        // The failed run keeps the old cursor; a rerun re-reads page 1 and
        // the dedup key absorbs the overlap.
        assert_eq!(store.cursor, None);
    }

    #[tokio::test]
    async fn ascending_listing_advances_cursor_past_persisted_pages() {
        let adapter = FakeAdapter::emails(
            true,
            vec![
                Ok(page(
                    vec![email("e1", ts(9)), email("e2", ts(10))],
                    Some("p2"),
                )),
                Err(anyhow::anyhow!("provider 500")),
            ],
        );
        let mut store = FakeStore::default();
        let mut counters = RunCounters::default();

        let result = sync_emails(
            &mut store,
            &test_sync_config(),
            &adapter,
            "tok",
            "acc1",
            ts(0),
            ts(13),
            &mut counters,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counters.emails_saved, 2);
        // Page 1 was fully persisted and is strictly older than the rest.
        assert_eq!(store.cursor, Some(ts(10)));
    }

    #[tokio::test]
    async fn page_with_store_failure_does_not_advance_cursor() {
        let adapter = FakeAdapter::emails(
            true,
            vec![Ok(page(vec![email("e1", ts(9)), email("e2", ts(10))], None))],
        );
        let mut store = FakeStore {
            failing_message_ids: vec!["e2".to_string()],
            ..Default::default()
        };
        let mut counters = RunCounters::default();

        let capped = sync_emails(
            &mut store,
            &test_sync_config(),
            &adapter,
            "tok",
            "acc1",
            ts(0),
            ts(13),
            &mut counters,
        )
        .await
        .unwrap();

        assert!(!capped);
        assert_eq!(counters.emails_saved, 1);
        assert_eq!(counters.emails_failed, 1);
        assert_eq!(store.cursor, None);
    }

    #[tokio::test]
    async fn email_cap_ends_run_cleanly_without_moving_cursor() {
        let adapter = FakeAdapter::emails(
            true,
            vec![Ok(page(
                vec![email("e1", ts(9)), email("e2", ts(10)), email("e3", ts(11))],
                None,
            ))],
        );
        let mut store = FakeStore::default();
        let mut counters = RunCounters::default();
        let config = SyncConfig {
            max_emails_per_run: 2,
            ..test_sync_config()
        };

        let capped = sync_emails(
            &mut store, &config, &adapter, "tok", "acc1", ts(0), ts(13), &mut counters,
        )
        .await
        .unwrap();

        assert!(capped);
        assert_eq!(store.emails, vec!["e1", "e2"]);
        // e3 was never persisted, so the cursor may not move past it.
        assert_eq!(store.cursor, None);
    }

    #[tokio::test]
    async fn dedup_hits_are_processed_but_not_saved() {
        let adapter = FakeAdapter::emails(
            true,
            vec![Ok(page(vec![email("e1", ts(9)), email("e2", ts(10))], None))],
        );
        let mut store = FakeStore {
            emails: vec!["e1".to_string()],
            ..Default::default()
        };
        let mut counters = RunCounters::default();

        let capped = sync_emails(
            &mut store,
            &test_sync_config(),
            &adapter,
            "tok",
            "acc1",
            ts(0),
            ts(13),
            &mut counters,
        )
        .await
        .unwrap();

        assert!(!capped);
        assert_eq!(counters.emails_processed, 2);
        assert_eq!(counters.emails_saved, 1);
        assert_eq!(counters.emails_failed, 0);
    }

    #[tokio::test]
    async fn event_cap_ends_run_cleanly() {
        let adapter = FakeAdapter::events(vec![Ok(page(
            vec![event("a"), event("b"), event("c")],
            Some("p2"),
        ))]);
        let mut store = FakeStore::default();
        let mut counters = RunCounters::default();
        let config = SyncConfig {
            max_events_per_run: 2,
            ..test_sync_config()
        };

        let capped = sync_events(
            &mut store, &config, &adapter, "tok", "acc1", ts(0), &mut counters,
        )
        .await
        .unwrap();

        assert!(capped);
        assert_eq!(store.events, vec!["google_a", "google_b"]);
        assert_eq!(counters.events_saved, 2);
    }

    #[tokio::test]
    async fn event_page_failure_counts_only_persisted_items() {
        let adapter = FakeAdapter::events(vec![
            Ok(page(vec![event("a"), event("b")], Some("p2"))),
            Err(anyhow::anyhow!("provider 500")),
        ]);
        let mut store = FakeStore::default();
        let mut counters = RunCounters::default();

        let result = sync_events(
            &mut store,
            &test_sync_config(),
            &adapter,
            "tok",
            "acc1",
            ts(0),
            &mut counters,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counters.events_saved, 2);
        assert_eq!(counters.events_failed, 0);
    }
}
