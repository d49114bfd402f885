use std::sync::Arc;

use linkbio_core::auth::validate_signup;
use linkbio_core::store::{AccessToken, RealtimeDatabaseStore};
use linkbio_core::LinkListViewModel;

use crate::auth::{clear_stored_session, identity_provider, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::{load_profile_context, print_status};
use crate::commands::links::{sign_out, OPERATION_TIMEOUT};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        AuthCommands::Signup {
            email,
            password,
            confirm_password,
        } => {
            validate_signup(&email, &password, &confirm_password)
                .map_err(|error| CliError::Auth(error.signup_message()))?;
            let context = load_profile_context(global_profile)?;
            let provider = identity_provider(&context.name, &context.firebase)
                .map_err(|error| CliError::Auth(error.to_string()))?;
            let session = provider
                .sign_up(&email, &password)
                .await
                .map_err(|error| CliError::Auth(error.signup_message()))?;
            let email_label = session.user.email.as_deref().unwrap_or(email.trim());
            println!("Account created successfully for {email_label}!");
            Ok(())
        }
        AuthCommands::Login { email, password } => {
            let context = load_profile_context(global_profile)?;
            let provider = identity_provider(&context.name, &context.firebase)
                .map_err(|error| CliError::Auth(error.to_string()))?;
            let session = provider
                .sign_in(&email, &password)
                .await
                .map_err(|error| CliError::Auth(error.login_message()))?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in profile '{}' as {}", context.name, email_label);
            Ok(())
        }
        AuthCommands::Status => {
            let context = match load_profile_context(global_profile) {
                Ok(context) => context,
                Err(CliError::NotConfigured) => {
                    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
                    let profile_name = config.resolve_profile_name(global_profile);
                    println!("Profile '{profile_name}' is not configured.");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };
            let provider = identity_provider(&context.name, &context.firebase)
                .map_err(|error| CliError::Auth(error.to_string()))?;
            let session = provider
                .restore()
                .await
                .map_err(|error| CliError::Auth(error.to_string()))?;

            if let Some(session) = session {
                let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Profile '{}' is signed in as {} (uid={}, expires_at={})",
                    context.name, email_label, session.user.uid, session.expires_at
                );
            } else {
                println!("Profile '{}' is not signed in.", context.name);
            }
            Ok(())
        }
        AuthCommands::Logout => {
            let context = match load_profile_context(global_profile) {
                Ok(context) => context,
                Err(CliError::NotConfigured) => {
                    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
                    let profile_name = config.resolve_profile_name(global_profile);
                    clear_stored_session(&profile_name)
                        .map_err(|error| CliError::Auth(error.to_string()))?;
                    println!("Signed out profile '{profile_name}'");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            if load_stored_session(&context.name)
                .map_err(|error| CliError::Auth(error.to_string()))?
                .is_none()
            {
                println!("Profile '{}' is not signed in.", context.name);
                return Ok(());
            }

            let provider = Arc::new(
                identity_provider(&context.name, &context.firebase)
                    .map_err(|error| CliError::Auth(error.to_string()))?,
            );
            let store = RealtimeDatabaseStore::new(
                &context.firebase.database_url,
                AccessToken::default(),
            )
            .map_err(linkbio_core::Error::from)?;
            let mut view = LinkListViewModel::new(Arc::new(store));
            view.watch_identity(provider.as_ref());

            let status = sign_out(&mut view, &provider, OPERATION_TIMEOUT).await;
            view.shutdown();
            let status = status?;
            if status.is_error() {
                return Err(CliError::Auth(status.text));
            }
            print_status(&status);
            Ok(())
        }
    }
}
