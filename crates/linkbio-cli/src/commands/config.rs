use std::env;
use std::path::Path;

use linkbio_core::config::{parse_web_config, FirebaseConfig};
use linkbio_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::commands::common::{API_KEY_ENV, DATABASE_URL_ENV};
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_key,
            database_url,
            from_web_config,
            no_activate,
        } => run_config_init(
            global_profile,
            api_key,
            database_url,
            from_web_config.as_deref(),
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    profile_name: Option<&str>,
    api_key: Option<String>,
    database_url: Option<String>,
    web_config_path: Option<&Path>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let web_config = web_config_path.map(read_web_config).transpose()?;
    let existing_profile = config.profile(&profile_name).cloned().unwrap_or_default();
    let merged = merge_profile(
        existing_profile,
        web_config,
        normalize_text_option(api_key),
        normalize_text_option(database_url),
        normalize_text_option(env::var(API_KEY_ENV).ok()),
        normalize_text_option(env::var(DATABASE_URL_ENV).ok()),
    );
    validate_profile(&merged)?;

    *config.profile_mut_or_default(&profile_name) = merged;
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profiles
        .get(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing_fields = missing_fields(profile);
    if missing_fields.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Run `linkbio auth login --email <email> --password <password>`."
        );
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let unset = || "(unset)".to_string();
    println!("profile       {profile_name}");
    println!(
        "database_url  {}",
        profile.database_url().unwrap_or_else(unset)
    );
    println!(
        "api_key       {}",
        profile.api_key().map_or_else(unset, |key| mask_key(&key))
    );
    println!(
        "project_id    {}",
        profile.project_id.clone().unwrap_or_else(unset)
    );
    println!(
        "auth_domain   {}",
        profile.auth_domain.clone().unwrap_or_else(unset)
    );
    Ok(())
}

fn read_web_config(path: &Path) -> Result<FirebaseConfig, CliError> {
    let raw = std::fs::read_to_string(path)?;
    parse_web_config(&raw).map_err(CliError::Config)
}

/// Explicit flags, then the web config file, then the environment, then
/// whatever the profile already had.
pub fn merge_profile(
    existing: CliProfile,
    web_config: Option<FirebaseConfig>,
    explicit_api_key: Option<String>,
    explicit_database_url: Option<String>,
    env_api_key: Option<String>,
    env_database_url: Option<String>,
) -> CliProfile {
    let mut profile = existing;
    let from_file = web_config.is_some();
    if let Some(web_config) = web_config {
        profile.apply_web_config(web_config);
    }

    if let Some(value) = explicit_api_key.or(if from_file { None } else { env_api_key }) {
        profile.api_key = Some(value);
    }
    if let Some(value) =
        explicit_database_url.or(if from_file { None } else { env_database_url })
    {
        profile.database_url = Some(value);
    }
    profile
}

fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.database_url() {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "database_url must include http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.api_key().is_none() {
        missing.push("api_key");
    }
    if profile.database_url().is_none() {
        missing.push("database_url");
    }
    missing
}

pub fn mask_key(key: &str) -> String {
    let visible = key.chars().take(6).collect::<String>();
    if key.chars().count() <= 6 {
        "*".repeat(key.chars().count())
    } else {
        format!("{visible}...")
    }
}
