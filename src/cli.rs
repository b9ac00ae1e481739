//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::connections::{ConnectionMethod, ToolType};
use crate::dispatch::OutputFormat;

/// Agentic Fabric client: identity, applications, tool connections and secrets
#[derive(Parser, Debug)]
#[command(name = "fabric")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FABRIC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "FABRIC_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FABRIC_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Pre-issued access token used instead of the stored login
    #[arg(long, env = "AF_TOKEN", global = true, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level command groups
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive identity
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Application credentials
    #[command(subcommand, alias = "apps")]
    Applications(ApplicationsCommand),

    /// Tool connections and invocation
    #[command(subcommand)]
    Tools(ToolsCommand),

    /// Secret vault
    #[command(subcommand)]
    Secrets(SecretsCommand),

    /// Configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// `fabric auth`
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in through the browser (PKCE)
    Login {
        /// Identity provider hint (`kc_idp_hint`)
        #[arg(long)]
        tenant: Option<String>,

        /// Override the Keycloak base URL
        #[arg(long)]
        keycloak_url: Option<String>,

        /// Log in again without asking when already authenticated
        #[arg(short, long)]
        force: bool,
    },

    /// Forget the stored token
    Logout,

    /// Show login state without contacting the network
    Status,

    /// Print the access token (masked unless `--full`)
    Token {
        /// Print the whole token
        #[arg(long)]
        full: bool,
    },

    /// Refresh the access token now
    Refresh,
}

/// `fabric applications`
#[derive(Subcommand, Debug)]
pub enum ApplicationsCommand {
    /// Register an application and receive an activation token
    Register {
        /// Application id
        app_id: String,

        /// Comma-separated `tool:connection-id` list
        #[arg(long, required = true)]
        connections: String,

        /// Comma-separated scopes requested for every connection
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Exchange an activation token for the application secret
    Connect {
        /// Application id
        app_id: String,

        /// Activation token from `register`
        #[arg(long)]
        token: String,
    },

    /// List local applications
    List {
        /// Skip the server cross-check
        #[arg(long)]
        no_sync: bool,
    },

    /// Show one application
    Show {
        /// Application id
        app_id: String,

        /// Print the secret key
        #[arg(long)]
        reveal_secret: bool,
    },

    /// Delete the registration and the local config
    Delete {
        /// Application id
        app_id: String,
    },

    /// Exchange the stored secret for a token
    Test {
        /// Application id
        app_id: String,
    },
}

/// Listing filters for `fabric tools list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Page number (1-based)
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Records per page (defaults to the configured page size)
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Substring of connection id or display name
    #[arg(long)]
    pub search: Option<String>,

    /// Tool id or family (`google`)
    #[arg(long)]
    pub tool: Option<String>,
}

/// `fabric tools`
#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// List connections
    List(ListArgs),

    /// Show one connection
    Get {
        /// Connection id
        connection_id: String,
    },

    /// Pull the gateway's connection list into the local registry
    Sync,

    /// Create a connection
    Add {
        /// Tool id
        tool: ToolType,

        /// Connection id
        #[arg(long = "connection-id")]
        connection_id: String,

        /// `oauth3` or `api_credentials`
        #[arg(long)]
        method: ConnectionMethod,

        /// Display name
        #[arg(long)]
        display_name: Option<String>,

        /// Static API token
        #[arg(long, conflicts_with_all = ["client_id", "client_secret"])]
        token: Option<String>,

        /// OAuth app client id
        #[arg(long, requires = "client_secret")]
        client_id: Option<String>,

        /// OAuth app client secret
        #[arg(long, requires = "client_id")]
        client_secret: Option<String>,

        /// OAuth app redirect URI
        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Authorize a connection
    Connect {
        /// Connection id
        connection_id: String,
    },

    /// Clear a connection's credentials
    Disconnect {
        /// Connection id
        connection_id: String,
    },

    /// Delete a connection
    Remove {
        /// Connection id
        connection_id: String,
    },

    /// Invoke a method on a connection
    Invoke {
        /// Connection id
        connection_id: String,

        /// Method name
        #[arg(long)]
        method: String,

        /// JSON object of parameters
        #[arg(long)]
        params: Option<String>,

        /// Output format hint (json, table, yaml)
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
}

/// `fabric secrets`
#[derive(Subcommand, Debug)]
pub enum SecretsCommand {
    /// Read a secret
    Get {
        /// Secret path
        path: String,
    },

    /// Create a secret
    Create {
        /// Secret path
        path: String,

        /// Secret value
        #[arg(long)]
        value: String,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Replace a secret's value
    Update {
        /// Secret path
        path: String,

        /// Secret value
        #[arg(long)]
        value: String,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a secret
    Delete {
        /// Secret path
        path: String,
    },
}

/// `fabric config`
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
}
