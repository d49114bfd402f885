use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "linkbio")]
#[command(about = "Manage your link-in-bio page from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// CLI profile name for Firebase configuration and session
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage your links
    Links {
        #[command(subcommand)]
        command: LinksCommands,
    },
    /// Authenticate CLI profile with Firebase
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum LinksCommands {
    /// List your links, newest first
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a link
    Add {
        /// Link title
        title: String,
        /// Link URL (https:// is assumed when no scheme is given)
        url: String,
    },
    /// Delete a link by id
    #[command(alias = "rm")]
    Delete {
        /// Link id as shown by `linkbio links list`
        id: String,
    },
    /// Print the link list every time it changes
    Watch,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Firebase web API key
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        /// Realtime Database URL
        #[arg(long, value_name = "URL")]
        database_url: Option<String>,
        /// Read values from a saved `firebaseConfig` JSON object
        #[arg(long, value_name = "FILE")]
        from_web_config: Option<PathBuf>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the resolved profile
    Show,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Create an account and store the session in the keychain
    Signup {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
        /// Password again
        #[arg(long, value_name = "PASSWORD")]
        confirm_password: String,
    },
    /// Login with email/password and store session in keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status for profile
    Status,
    /// Logout profile and clear stored session
    Logout,
}
