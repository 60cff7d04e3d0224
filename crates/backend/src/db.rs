use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use shared_types::SyncState;
use uuid::Uuid;

use crate::models::{
    MeetingRow, NewCalendarEvent, NewEmail, NewMeeting, NewOAuthToken, OAuthTokenRow, SyncRunRow,
};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup =
        Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

pub async fn get_conn(
    pool: &DbPool,
) -> anyhow::Result<diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>> {
    pool.get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get DB connection: {}", e))
}

// OAuth token store operations
pub mod oauth_tokens {
    use super::*;

    pub async fn list_for_account(
        conn: &mut AsyncPgConnection,
        account: &str,
    ) -> anyhow::Result<Vec<OAuthTokenRow>> {
        use crate::schema::oauth_tokens::dsl::*;

        let rows = oauth_tokens
            .filter(account_id.eq(account))
            .order_by(created_at.desc())
            .load::<OAuthTokenRow>(conn)
            .await?;

        Ok(rows)
    }

    /// Active connections that participate in email/calendar sync,
    /// optionally narrowed to a single mailbox.
    pub async fn list_active_syncable(
        conn: &mut AsyncPgConnection,
        account: &str,
        email: Option<&str>,
    ) -> anyhow::Result<Vec<OAuthTokenRow>> {
        use crate::schema::oauth_tokens::dsl::*;

        let mut query = oauth_tokens
            .filter(account_id.eq(account))
            .filter(is_active.eq(true))
            .filter(provider.eq_any(["google", "microsoft"]))
            .into_boxed();

        if let Some(addr) = email {
            query = query.filter(email_address.eq(addr));
        }

        let rows = query
            .order_by(created_at.asc())
            .load::<OAuthTokenRow>(conn)
            .await?;

        Ok(rows)
    }

    pub async fn get_by_id(
        conn: &mut AsyncPgConnection,
        token_id: Uuid,
    ) -> anyhow::Result<Option<OAuthTokenRow>> {
        use crate::schema::oauth_tokens::dsl::*;

        let row = oauth_tokens
            .filter(id.eq(token_id))
            .first::<OAuthTokenRow>(conn)
            .await
            .optional()?;

        Ok(row)
    }

    /// Create or replace the token row for (account, provider, email).
    ///
    /// The happy path is a single `ON CONFLICT` upsert on the unique key. If
    /// that errors (constraint drift between environments has happened), fall
    /// back to delete-then-insert, which is idempotent under retry and
    /// guarantees a single surviving row.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        token: NewOAuthToken,
    ) -> anyhow::Result<OAuthTokenRow> {
        use crate::schema::oauth_tokens::dsl::*;
        use diesel::upsert::excluded;

        let upserted = diesel::insert_into(oauth_tokens)
            .values(&token)
            .on_conflict((account_id, provider, email_address))
            .do_update()
            .set((
                access_token.eq(excluded(access_token)),
                refresh_token.eq(excluded(refresh_token)),
                expires_at.eq(excluded(expires_at)),
                scope.eq(excluded(scope)),
                tenant_id.eq(excluded(tenant_id)),
                api_domain.eq(excluded(api_domain)),
                is_active.eq(true),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<OAuthTokenRow>(conn)
            .await;

        match upserted {
            Ok(row) => Ok(row),
            Err(e) => {
                tracing::warn!(
                    "Token upsert failed for {}/{} ({}), falling back to delete-then-insert",
                    token.account_id,
                    token.provider,
                    e
                );

                diesel::delete(
                    oauth_tokens
                        .filter(account_id.eq(&token.account_id))
                        .filter(provider.eq(&token.provider))
                        .filter(email_address.eq(&token.email_address)),
                )
                .execute(conn)
                .await?;

                let row = diesel::insert_into(oauth_tokens)
                    .values(&token)
                    .get_result::<OAuthTokenRow>(conn)
                    .await?;

                Ok(row)
            }
        }
    }

    /// Persist a refreshed access token. Providers that rotate refresh
    /// tokens send a new one; keep the old one otherwise.
    pub async fn update_access_token(
        conn: &mut AsyncPgConnection,
        token_id: Uuid,
        new_access_token: &str,
        new_expires_at: DateTime<Utc>,
        rotated_refresh_token: Option<&str>,
    ) -> anyhow::Result<OAuthTokenRow> {
        use crate::schema::oauth_tokens::dsl::*;

        if let Some(rotated) = rotated_refresh_token {
            diesel::update(oauth_tokens.filter(id.eq(token_id)))
                .set(refresh_token.eq(Some(rotated)))
                .execute(conn)
                .await?;
        }

        let row = diesel::update(oauth_tokens.filter(id.eq(token_id)))
            .set((
                access_token.eq(new_access_token),
                expires_at.eq(new_expires_at),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<OAuthTokenRow>(conn)
            .await?;

        Ok(row)
    }

    pub async fn set_sync_status(
        conn: &mut AsyncPgConnection,
        token_id: Uuid,
        status: SyncState,
        synced_through: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        use crate::schema::oauth_tokens::dsl::*;

        if let Some(cursor) = synced_through {
            diesel::update(oauth_tokens.filter(id.eq(token_id)))
                .set((
                    sync_status.eq(status.as_str()),
                    last_synced.eq(Some(cursor)),
                    updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;
        } else {
            diesel::update(oauth_tokens.filter(id.eq(token_id)))
                .set((sync_status.eq(status.as_str()), updated_at.eq(Utc::now())))
                .execute(conn)
                .await?;
        }

        Ok(())
    }

    /// Advance the sync cursor. Called only after a page has been fully
    /// persisted, so a crash between pages re-reads at most one page.
    pub async fn advance_cursor(
        conn: &mut AsyncPgConnection,
        token_id: Uuid,
        cursor: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        use crate::schema::oauth_tokens::dsl::*;

        diesel::update(oauth_tokens.filter(id.eq(token_id)))
            .set((last_synced.eq(Some(cursor)), updated_at.eq(Utc::now())))
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Disconnect: the row is deleted outright. A sync racing this observes
    /// "token not found" and fails that run gracefully.
    pub async fn delete(conn: &mut AsyncPgConnection, token_id: Uuid) -> anyhow::Result<bool> {
        use crate::schema::oauth_tokens::dsl::*;

        let deleted = diesel::delete(oauth_tokens.filter(id.eq(token_id)))
            .execute(conn)
            .await?;

        Ok(deleted > 0)
    }
}

// Sync run bookkeeping
pub mod sync_runs {
    use super::*;

    pub async fn start(
        conn: &mut AsyncPgConnection,
        account: &str,
        provider_name: &str,
    ) -> anyhow::Result<SyncRunRow> {
        use crate::schema::sync_runs::dsl::*;

        let row = diesel::insert_into(sync_runs)
            .values((
                account_id.eq(account),
                provider.eq(provider_name),
                status.eq(SyncState::InProgress.as_str()),
                emails_synced.eq(0),
                events_synced.eq(0),
                started_at.eq(Utc::now()),
            ))
            .get_result::<SyncRunRow>(conn)
            .await?;

        Ok(row)
    }

    pub async fn complete(
        conn: &mut AsyncPgConnection,
        run_id: Uuid,
        emails: i32,
        events: i32,
    ) -> anyhow::Result<()> {
        use crate::schema::sync_runs::dsl::*;

        diesel::update(sync_runs.filter(id.eq(run_id)))
            .set((
                status.eq(SyncState::Completed.as_str()),
                emails_synced.eq(emails),
                events_synced.eq(events),
                completed_at.eq(Some(Utc::now())),
            ))
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Counts reflect what was persisted before the failure.
    pub async fn fail(
        conn: &mut AsyncPgConnection,
        run_id: Uuid,
        emails: i32,
        events: i32,
        error: &str,
    ) -> anyhow::Result<()> {
        use crate::schema::sync_runs::dsl::*;

        diesel::update(sync_runs.filter(id.eq(run_id)))
            .set((
                status.eq(SyncState::Failed.as_str()),
                emails_synced.eq(emails),
                events_synced.eq(events),
                error_message.eq(Some(error)),
                completed_at.eq(Some(Utc::now())),
            ))
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn list_for_account(
        conn: &mut AsyncPgConnection,
        account: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<SyncRunRow>> {
        use crate::schema::sync_runs::dsl::*;

        let rows = sync_runs
            .filter(account_id.eq(account))
            .order_by(started_at.desc())
            .limit(limit)
            .load::<SyncRunRow>(conn)
            .await?;

        Ok(rows)
    }
}

// Email storage
pub mod emails {
    use super::*;

    /// Insert a normalized email. Returns `None` when the dedup key
    /// (account_id, provider_message_id) already exists, so re-running a
    /// page never duplicates rows.
    pub async fn insert(
        conn: &mut AsyncPgConnection,
        email: NewEmail,
    ) -> anyhow::Result<Option<Uuid>> {
        use crate::schema::emails::dsl::*;

        let inserted = diesel::insert_into(emails)
            .values(&email)
            .on_conflict((account_id, provider_message_id))
            .do_nothing()
            .returning(id)
            .get_result::<Uuid>(conn)
            .await
            .optional()?;

        Ok(inserted)
    }
}

// Calendar event storage
pub mod calendar_events {
    use super::*;

    /// Upsert on (account_id, calendar_event_id). An existing row is
    /// refreshed in place (titles, times and links drift as organizers
    /// edit events); a later page may safely overwrite an earlier
    /// partial run's row.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        event: NewCalendarEvent,
    ) -> anyhow::Result<()> {
        use crate::schema::calendar_events::dsl::*;

        let inserted = diesel::insert_into(calendar_events)
            .values(&event)
            .on_conflict((account_id, calendar_event_id))
            .do_nothing()
            .returning(id)
            .get_result::<Uuid>(conn)
            .await
            .optional()?;

        if inserted.is_some() {
            return Ok(());
        }

        diesel::update(
            calendar_events
                .filter(account_id.eq(&event.account_id))
                .filter(calendar_event_id.eq(&event.calendar_event_id)),
        )
        .set((
            title.eq(&event.title),
            start_time.eq(event.start_time),
            end_time.eq(event.end_time),
            attendees.eq(&event.attendees),
            organizer_email.eq(&event.organizer_email),
            meeting_link.eq(&event.meeting_link),
            updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

        Ok(())
    }
}

// Meeting storage
pub mod meetings {
    use super::*;

    /// Insert a meeting for a calendar event, once. A second call for the
    /// same (account, calendar_event_id) returns the existing row untouched,
    /// preserving any bot-assigned meeting id.
    pub async fn insert_if_absent(
        conn: &mut AsyncPgConnection,
        meeting: NewMeeting,
    ) -> anyhow::Result<MeetingRow> {
        use crate::schema::meetings::dsl::*;

        let inserted = diesel::insert_into(meetings)
            .values(&meeting)
            .on_conflict((account_id, calendar_event_id))
            .do_nothing()
            .get_result::<MeetingRow>(conn)
            .await
            .optional()?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        let existing = meetings
            .filter(account_id.eq(&meeting.account_id))
            .filter(calendar_event_id.eq(&meeting.calendar_event_id))
            .first::<MeetingRow>(conn)
            .await?;

        Ok(existing)
    }

    /// Replace a placeholder meeting id with the bot-assigned one, in place.
    pub async fn set_meeting_id(
        conn: &mut AsyncPgConnection,
        row_id: Uuid,
        external_id: &str,
    ) -> anyhow::Result<()> {
        use crate::schema::meetings::dsl::*;

        diesel::update(meetings.filter(id.eq(row_id)))
            .set((meeting_id.eq(external_id), updated_at.eq(Utc::now())))
            .execute(conn)
            .await?;

        Ok(())
    }
}
