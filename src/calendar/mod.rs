//! Upcoming events from the primary Google Calendar.
//!
//! The last successful fetch is kept in memory and mirrored to a JSON file.
//! When the API or the credential is unavailable the cached events are
//! served with `stale: true` instead of failing the request.

use crate::config::CalendarConfig;
use crate::credentials::CredentialBinding;
use crate::error::{BoardError, Result};
use crate::services::{ApiDescriptor, ServiceClientFactory};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENTS_PATH: &str = "calendars/primary/events";
const UNTITLED: &str = "No Title";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    /// RFC 3339 timestamp, or a bare date for all-day events.
    pub start: String,
    pub end: Option<String>,
}

/// What the dashboard receives.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarSnapshot {
    pub events: Vec<CalendarEvent>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEvents {
    events: Vec<CalendarEvent>,
    fetched_at: DateTime<Utc>,
}

// Calendar API wire format

#[derive(Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: EventTime,
    #[serde(default)]
    end: Option<EventTime>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl EventTime {
    fn into_value(self) -> Option<String> {
        self.date_time.or(self.date)
    }
}

impl RawEvent {
    /// Events without any start time are dropped.
    fn into_event(self) -> Option<CalendarEvent> {
        let summary = self
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        Some(CalendarEvent {
            id: self.id,
            summary,
            start: self.start.into_value()?,
            end: self.end.and_then(EventTime::into_value),
        })
    }
}

pub struct CalendarService {
    factory: ServiceClientFactory,
    descriptor: ApiDescriptor,
    binding: CredentialBinding,
    config: CalendarConfig,
    last_good: RwLock<Option<CachedEvents>>,
}

impl CalendarService {
    pub fn new(
        factory: ServiceClientFactory,
        descriptor: ApiDescriptor,
        binding: CredentialBinding,
        config: CalendarConfig,
    ) -> Self {
        let last_good = load_cache(Path::new(&config.cache_path));
        Self {
            factory,
            descriptor,
            binding,
            config,
            last_good: RwLock::new(last_good),
        }
    }

    pub fn binding(&self) -> &CredentialBinding {
        &self.binding
    }

    /// Queries the API for events between now and the lookahead horizon.
    pub async fn fetch_events(&self) -> Result<Vec<CalendarEvent>> {
        let client = self.factory.build_client(&self.descriptor, &self.binding).await?;

        let now = Utc::now();
        let horizon = now + Duration::days(self.config.lookahead_days);
        let query = [
            ("timeMin", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("timeMax", horizon.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("maxResults", self.config.max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];

        let page: EventsPage = client.get_json(EVENTS_PATH, &query).await?;
        let events: Vec<CalendarEvent> = page.items.into_iter().filter_map(RawEvent::into_event).collect();
        debug!("Fetched {} calendar events", events.len());
        Ok(events)
    }

    /// Fetches and records events as the new last-known-good.
    pub async fn refresh(&self) -> Result<CalendarSnapshot> {
        let events = self.fetch_events().await?;
        let cached = CachedEvents {
            events,
            fetched_at: Utc::now(),
        };

        if let Err(e) = save_cache(Path::new(&self.config.cache_path), &cached) {
            warn!("Could not write calendar cache: {}", e);
        }
        *self.last_good.write() = Some(cached.clone());

        Ok(to_snapshot(cached, false))
    }

    /// Fresh events when possible, otherwise the last-known-good set marked stale.
    pub async fn snapshot(&self) -> Result<CalendarSnapshot> {
        match self.refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let cached = self.last_good.read().clone();
                match cached {
                    Some(cached) => {
                        warn!("Serving cached calendar events: {}", e);
                        let mut stale = to_snapshot(cached, true);
                        stale.message = Some(e.hint().to_string());
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Keeps the cache warm in the background.
    pub fn spawn_poller(self: Arc<Self>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.poll_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match self.refresh().await {
                    Ok(snapshot) => debug!("Calendar poll cached {} events", snapshot.events.len()),
                    Err(e @ BoardError::ServiceUnavailable { .. }) => {
                        error!("Calendar poll could not get a credential: {}", e)
                    }
                    Err(e) => warn!("Calendar poll failed: {}", e),
                }
            }
        })
    }
}

fn to_snapshot(cached: CachedEvents, stale: bool) -> CalendarSnapshot {
    let message = cached.events.is_empty().then(|| "No upcoming events.".to_string());
    CalendarSnapshot {
        events: cached.events,
        fetched_at: cached.fetched_at,
        stale,
        message,
    }
}

fn load_cache(path: &Path) -> Option<CachedEvents> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(cached) => {
            info!("Loaded cached calendar events from {}", path.display());
            Some(cached)
        }
        Err(e) => {
            warn!("Ignoring unreadable calendar cache {}: {}", path.display(), e);
            None
        }
    }
}

fn save_cache(path: &Path, cached: &CachedEvents) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, serde_json::to_vec_pretty(cached)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
