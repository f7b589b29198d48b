//! Google Calendar backend: OAuth flow, calendar resolution, and the
//! [`RemoteCalendar`] implementation used for mirroring.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use google_calendar::types::{EventDateTime, MinAccessRole, OrderBy, SendUpdates};
use google_calendar::Client;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use crate::config::{self, AccountTokens, GcalConfig};
use crate::error::{SyncError, SyncResult};
use crate::event::Event;
use crate::remote::{strip_mirror_prefix, RemoteCalendar, MIRROR_TITLE_PREFIX};

const REDIRECT_PORT: u16 = 8085;
const REDIRECT_URI: &str = "http://localhost:8085/callback";

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

/// A calendar visible to the authenticated account.
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    pub primary: bool,
}

/// Create a Google Calendar client from stored tokens
fn create_client(config: &GcalConfig, tokens: &AccountTokens) -> Client {
    Client::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        REDIRECT_URI.to_string(),
        tokens.access_token.clone(),
        tokens.refresh_token.clone(),
    )
}

/// Create a new client for initial authentication (no tokens yet)
fn create_auth_client(config: &GcalConfig) -> Client {
    Client::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        REDIRECT_URI.to_string(),
        String::new(),
        String::new(),
    )
}

/// Start a local HTTP server to receive the OAuth callback.
/// Returns (code, state).
fn wait_for_callback() -> Result<(String, String)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", REDIRECT_PORT))
        .with_context(|| format!("Failed to bind to port {}", REDIRECT_PORT))?;

    println!("Waiting for OAuth callback on port {}...", REDIRECT_PORT);

    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Request line looks like: GET /callback?code=xxx&state=yyy HTTP/1.1
    let url_part = request_line
        .split_whitespace()
        .nth(1)
        .context("Invalid request")?;

    let url = url::Url::parse(&format!("http://localhost{}", url_part))?;

    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .context("No code in callback")?;

    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .context("No state in callback")?;

    let response = "HTTP/1.1 200 OK\r\n\
        Content-Type: text/html\r\n\
        Connection: close\r\n\
        \r\n\
        <html><body>\
        <h1>Authentication successful!</h1>\
        <p>You can close this window and return to the terminal.</p>\
        </body></html>";

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok((code, state))
}

/// Run the full OAuth authentication flow and store the resulting tokens.
pub async fn authenticate(config: &GcalConfig) -> Result<()> {
    let mut client = create_auth_client(config);

    let scopes: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
    let auth_url = client.user_consent_url(&scopes);

    println!("\nOpen this URL in your browser to authenticate:\n");
    println!("{}\n", auth_url);

    if open::that(&auth_url).is_err() {
        println!("(Could not open browser automatically, please copy the URL above)");
    }

    let (code, state) = wait_for_callback()?;

    println!("\nReceived authorization code, exchanging for tokens...");

    let access_token = client
        .get_access_token(&code, &state)
        .await
        .context("Failed to exchange code for tokens")?;

    let expires_at = if access_token.expires_in > 0 {
        Some(Utc::now() + chrono::Duration::seconds(access_token.expires_in))
    } else {
        None
    };

    config::save_tokens(&AccountTokens {
        access_token: access_token.access_token,
        refresh_token: access_token.refresh_token,
        expires_at,
    })?;

    println!("✅ Google Calendar authenticated");

    Ok(())
}

/// Refresh an expired access token
async fn refresh_token(config: &GcalConfig, tokens: &AccountTokens) -> Result<AccountTokens> {
    let client = create_client(config, tokens);

    let access_token = client
        .refresh_access_token()
        .await
        .context("Failed to refresh token")?;

    let expires_at = if access_token.expires_in > 0 {
        Some(Utc::now() + chrono::Duration::seconds(access_token.expires_in))
    } else {
        None
    };

    // Google typically doesn't return a new refresh_token on refresh
    let refresh_token = if access_token.refresh_token.is_empty() {
        tokens.refresh_token.clone()
    } else {
        access_token.refresh_token
    };

    Ok(AccountTokens {
        access_token: access_token.access_token,
        refresh_token,
        expires_at,
    })
}

/// Load stored tokens, refreshing them when they are about to expire.
async fn get_valid_tokens(config: &GcalConfig) -> Result<AccountTokens> {
    let tokens = config::load_tokens()?.context(
        "Not authenticated with Google Calendar.\n\
        Run `invitesync auth` first.",
    )?;

    let needs_refresh = tokens
        .expires_at
        .map(|at| at <= Utc::now() + chrono::Duration::seconds(60))
        .unwrap_or(false);

    if needs_refresh {
        println!("Access token expired, refreshing...");
        let refreshed = refresh_token(config, &tokens).await?;
        config::save_tokens(&refreshed)?;
        return Ok(refreshed);
    }

    Ok(tokens)
}

/// Fetch the calendars visible to the authenticated account.
pub async fn list_calendars(config: &GcalConfig) -> Result<Vec<CalendarInfo>> {
    let tokens = get_valid_tokens(config).await?;
    let client = create_client(config, &tokens);

    let response = client
        .calendar_list()
        .list_all(MinAccessRole::default(), false, false)
        .await
        .context("Failed to fetch calendars")?;

    Ok(response
        .body
        .into_iter()
        .filter(|c| !c.id.is_empty())
        .map(|c| CalendarInfo {
            id: c.id,
            name: if c.summary.is_empty() {
                "(unnamed)".to_string()
            } else {
                c.summary
            },
            primary: c.primary,
        })
        .collect())
}

/// Google Calendar as a mirror target.
pub struct GcalRemote {
    client: Client,
    calendar_id: String,
    tz: Tz,
}

impl GcalRemote {
    /// Connect to the target calendar.
    ///
    /// `target` may be a calendar id (contains `@`) or a calendar name,
    /// which is resolved against the account's calendar list. Unset means
    /// the primary calendar.
    pub async fn connect(config: &GcalConfig, target: Option<&str>, tz: Tz) -> Result<Self> {
        let tokens = get_valid_tokens(config).await?;
        let client = create_client(config, &tokens);

        let calendar_id = match target {
            None => "primary".to_string(),
            Some(t) if t.contains('@') || t == "primary" => t.to_string(),
            Some(name) => {
                let calendars = list_calendars(config).await?;
                match calendars.iter().find(|c| c.name == name) {
                    Some(cal) => cal.id.clone(),
                    None => {
                        let available: Vec<&str> =
                            calendars.iter().map(|c| c.name.as_str()).collect();
                        anyhow::bail!(
                            "Calendar '{}' not found.\nAvailable calendars: {}",
                            name,
                            available.join(", ")
                        );
                    }
                }
            }
        };

        Ok(Self {
            client,
            calendar_id,
            tz,
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Interpret a source wall-clock time in the target timezone.
    fn localize(&self, naive: &NaiveDateTime) -> SyncResult<chrono::DateTime<Utc>> {
        self.tz
            .from_local_datetime(naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                SyncError::Remote(format!("Time {} does not exist in {}", naive, self.tz))
            })
    }

    fn event_time(&self, naive: &NaiveDateTime) -> SyncResult<EventDateTime> {
        Ok(EventDateTime {
            date: None,
            date_time: Some(self.localize(naive)?),
            time_zone: self.tz.name().to_string(),
        })
    }
}

#[async_trait]
impl RemoteCalendar for GcalRemote {
    async fn create(&self, event: &Event) -> SyncResult<String> {
        let mut description = format!(
            "🎯 Invited event from Outlook calendar: {}",
            event.source_calendar
        );
        if !event.organizer.is_empty() {
            description.push_str(&format!("\n👤 Organizer: {}", event.organizer));
        }

        let google_event = google_calendar::types::Event {
            summary: format!("{}{}", MIRROR_TITLE_PREFIX, event.title),
            description,
            location: event.location.clone(),
            start: Some(self.event_time(&event.start)?),
            end: Some(self.event_time(&event.end)?),
            ..Default::default()
        };

        let response = self
            .client
            .events()
            .insert(
                &self.calendar_id,
                0,     // conference_data_version
                0,     // max_attendees
                false, // send_notifications
                SendUpdates::None,
                false, // supports_attachments
                &google_event,
            )
            .await
            .map_err(|e| SyncError::Remote(format!("create '{}': {}", event.title, e)))?;

        Ok(response.body.id)
    }

    async fn find_by_title_and_day(
        &self,
        title: &str,
        start: &NaiveDateTime,
    ) -> SyncResult<Option<String>> {
        // Bound the search to the event's calendar day in the target zone.
        let day = start.date();
        let day_start = day.and_hms_opt(0, 0, 0).ok_or_else(|| {
            SyncError::Remote(format!("Invalid day for existence check: {}", day))
        })?;
        let day_end = day.and_hms_opt(23, 59, 59).ok_or_else(|| {
            SyncError::Remote(format!("Invalid day for existence check: {}", day))
        })?;

        let time_min = self.localize(&day_start)?.to_rfc3339();
        let time_max = self.localize(&day_end)?.to_rfc3339();

        let response = self
            .client
            .events()
            .list_all(
                &self.calendar_id,
                "",                 // i_cal_uid
                0,                  // max_attendees
                OrderBy::default(), // order_by
                &[],                // private_extended_property
                "",                 // q (search query)
                &[],                // shared_extended_property
                false,              // show_deleted
                false,              // show_hidden_invitations
                true,               // single_events
                &time_max,
                &time_min,
                "", // time_zone
                "", // updated_min
            )
            .await
            .map_err(|e| SyncError::Remote(format!("existence check '{}': {}", title, e)))?;

        Ok(response
            .body
            .into_iter()
            .find(|e| strip_mirror_prefix(&e.summary) == title)
            .map(|e| e.id))
    }

    async fn delete(&self, remote_id: &str) -> SyncResult<()> {
        let result = self
            .client
            .events()
            .delete(&self.calendar_id, remote_id, false, SendUpdates::None)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                // An already-deleted event counts as success.
                let error_str = e.to_string();
                if error_str.contains("404")
                    || error_str.contains("410")
                    || error_str.contains("Not Found")
                    || error_str.contains("Gone")
                {
                    Ok(())
                } else {
                    Err(SyncError::Remote(format!("delete '{}': {}", remote_id, e)))
                }
            }
        }
    }
}
