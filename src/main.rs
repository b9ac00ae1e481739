//! fabric - Agentic Fabric command-line client
//!
//! Thin wiring from the clap tree onto a [`FabricContext`]. Every command
//! prints the plain result structure as pretty JSON on stdout.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fabric_runtime::{
    Error, FabricContext,
    applications::ConnectionRef,
    cli::{
        ApplicationsCommand, AuthCommand, Cli, Command, ConfigCommand, ListArgs, SecretsCommand,
        ToolsCommand,
    },
    config::Config,
    connections::{AddConnection, ListQuery},
    dispatch::InvocationRequest,
    interact::{AssumeYes, Confirm, StdinConfirm},
    oauth::LoginOptions,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Print `error[<kind>]: <message>` and map to the exit code for that kind
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<Error>() {
        Some(e) => {
            eprintln!("error[{}]: {e}", e.kind().as_str());
            ExitCode::from(e.exit_code())
        }
        None => {
            eprintln!("error[internal]: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{text}");
    Ok(())
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    let confirm: Arc<dyn Confirm> = if cli.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(StdinConfirm)
    };
    let mut builder = FabricContext::builder(config).confirm(confirm);
    if let Some(token) = cli.access_token {
        builder = builder.static_bearer(token);
    }
    let ctx = builder.build()?;

    match cli.command {
        Command::Auth(cmd) => run_auth(&ctx, cmd, cancel).await,
        Command::Applications(cmd) => run_applications(&ctx, cmd, cancel).await,
        Command::Tools(cmd) => run_tools(&ctx, cmd, cli.yes, cancel).await,
        Command::Secrets(cmd) => run_secrets(&ctx, cmd).await,
        Command::Config(ConfigCommand::Show) => emit(ctx.config()),
    }
}

async fn run_auth(
    ctx: &FabricContext,
    cmd: AuthCommand,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let session = ctx.session();
    match cmd {
        AuthCommand::Login {
            tenant,
            keycloak_url,
            force,
        } => {
            let options = LoginOptions {
                tenant_hint: tenant,
                keycloak_url,
                force,
            };
            session.login(&options, Some(cancel)).await?;
            emit(&session.status()?)
        }
        AuthCommand::Logout => {
            let removed = session.logout()?;
            emit(&json!({ "logged_out": removed }))
        }
        AuthCommand::Status => emit(&session.status()?),
        AuthCommand::Token { full } => {
            println!("{}", session.token(full)?);
            Ok(())
        }
        AuthCommand::Refresh => {
            session.refresh().await?;
            emit(&session.status()?)
        }
    }
}

async fn run_applications(
    ctx: &FabricContext,
    cmd: ApplicationsCommand,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let apps = ctx.applications();
    match cmd {
        ApplicationsCommand::Register {
            app_id,
            connections,
            scopes,
        } => {
            let refs = ConnectionRef::parse_list(&connections)?;
            let registration = apps.register(&app_id, &refs, &scopes).await?;
            emit(&registration)
        }
        ApplicationsCommand::Connect { app_id, token } => {
            let config = apps.connect(&app_id, &token).await?;
            emit(&config.view(false))
        }
        ApplicationsCommand::List { no_sync } => emit(&apps.list(!no_sync, Some(cancel)).await?),
        ApplicationsCommand::Show {
            app_id,
            reveal_secret,
        } => emit(&apps.show(&app_id, reveal_secret)?),
        ApplicationsCommand::Delete { app_id } => {
            if !ctx.confirm(&format!("Delete application '{app_id}'?")) {
                return Err(Error::Cancelled(format!("deletion of '{app_id}' declined")).into());
            }
            emit(&apps.delete(&app_id).await?)
        }
        ApplicationsCommand::Test { app_id } => emit(&apps.test(&app_id).await?),
    }
}

async fn run_tools(
    ctx: &FabricContext,
    cmd: ToolsCommand,
    yes: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let registry = ctx.connections();
    match cmd {
        ToolsCommand::List(ListArgs {
            page,
            page_size,
            search,
            tool,
        }) => {
            let query = ListQuery {
                page,
                page_size: page_size.unwrap_or(ctx.config().page_size),
                search,
                tool_filter: tool,
            };
            emit(&registry.list(&query)?)
        }
        ToolsCommand::Get { connection_id } => emit(&registry.get(&connection_id)?),
        ToolsCommand::Sync => emit(&registry.sync(Some(cancel)).await?),
        ToolsCommand::Add {
            tool,
            connection_id,
            method,
            display_name,
            token,
            client_id,
            client_secret,
            redirect_uri,
        } => {
            let mut spec = AddConnection::new(tool, connection_id, method);
            if let Some(name) = display_name {
                spec = spec.display_name(name);
            }
            if let Some(token) = token {
                spec = spec.token(token);
            }
            if let (Some(id), Some(secret)) = (client_id, client_secret) {
                spec = spec.client(id, secret);
            }
            if let Some(uri) = redirect_uri {
                spec = spec.redirect_uri(uri);
            }
            emit(&registry.add(spec).await?)
        }
        ToolsCommand::Connect { connection_id } => {
            emit(&registry.connect(&connection_id, yes, Some(cancel)).await?)
        }
        ToolsCommand::Disconnect { connection_id } => {
            emit(&registry.disconnect(&connection_id, yes).await?)
        }
        ToolsCommand::Remove { connection_id } => {
            emit(&registry.remove(&connection_id, yes).await?)
        }
        ToolsCommand::Invoke {
            connection_id,
            method,
            params,
            format,
        } => {
            let parameters = match params {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| Error::validation("params", format!("not valid JSON: {e}")))?,
                None => Value::Null,
            };
            let request = InvocationRequest::new(connection_id, method)
                .parameters(parameters)
                .format(format);
            emit(&ctx.dispatcher().invoke(request, Some(cancel)).await?)
        }
    }
}

async fn run_secrets(ctx: &FabricContext, cmd: SecretsCommand) -> anyhow::Result<()> {
    let vault = ctx.secrets();
    match cmd {
        SecretsCommand::Get { path } => emit(&vault.get(&path).await?),
        SecretsCommand::Create {
            path,
            value,
            description,
        } => emit(&vault.create(&path, &value, description.as_deref()).await?),
        SecretsCommand::Update {
            path,
            value,
            description,
        } => emit(&vault.update(&path, &value, description.as_deref()).await?),
        SecretsCommand::Delete { path } => {
            if !ctx.confirm(&format!("Delete secret '{path}'?")) {
                return Err(Error::Cancelled(format!("deletion of '{path}' declined")).into());
            }
            vault.delete(&path).await?;
            emit(&json!({ "deleted": path }))
        }
    }
}
