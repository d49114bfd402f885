use std::env;

use chrono::Utc;
use linkbio_core::config::{resolve_optional_firebase_config, FirebaseConfig};
use linkbio_core::models::{StatusKind, StatusMessage};
use linkbio_core::LinkEntry;
use serde::Serialize;

use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub const API_KEY_ENV: &str = "FIREBASE_API_KEY";
pub const DATABASE_URL_ENV: &str = "FIREBASE_DATABASE_URL";

#[derive(Debug, Serialize)]
pub struct LinkListItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: i64,
    pub created_at_iso: String,
    pub relative_time: String,
}

/// Resolved profile name and its Firebase settings.
pub struct ProfileContext {
    pub name: String,
    pub firebase: FirebaseConfig,
}

/// Environment values win over the stored profile.
pub fn load_profile_context(explicit_profile: Option<&str>) -> Result<ProfileContext, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let name = config.resolve_profile_name(explicit_profile);
    let profile = config.profile(&name).cloned().unwrap_or_default();

    let api_key =
        normalize_text_option(env::var(API_KEY_ENV).ok()).or_else(|| profile.api_key());
    let database_url =
        normalize_text_option(env::var(DATABASE_URL_ENV).ok()).or_else(|| profile.database_url());

    let mut firebase = resolve_optional_firebase_config(api_key, database_url)
        .map_err(|error| CliError::Config(error.to_string()))?
        .ok_or(CliError::NotConfigured)?;
    firebase.auth_domain = profile.auth_domain;
    firebase.project_id = profile.project_id;

    Ok(ProfileContext { name, firebase })
}

pub fn link_to_list_item(link: &LinkEntry, now_ms: i64) -> LinkListItem {
    LinkListItem {
        id: link.id.to_string(),
        title: link.title.clone(),
        url: link.url.clone(),
        created_at: link.created_at,
        created_at_iso: format_timestamp(link.created_at),
        relative_time: format_relative_time(link.created_at, now_ms),
    }
}

pub fn format_link_lines(links: &[LinkEntry]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    links
        .iter()
        .map(|link| {
            format!(
                "{}  {}  {}  ({})",
                link.id,
                truncate(&link.title, 40),
                link.url,
                format_relative_time(link.created_at, now_ms)
            )
        })
        .collect()
}

pub fn print_links(links: &[LinkEntry]) {
    if links.is_empty() {
        println!("No links yet.");
        return;
    }
    for line in format_link_lines(links) {
        println!("{line}");
    }
}

pub fn print_status(status: &StatusMessage) {
    match status.kind {
        StatusKind::Error => eprintln!("{}", status.text),
        StatusKind::Info | StatusKind::Success => println!("{}", status.text),
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
