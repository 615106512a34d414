//! Command dispatch for both binaries

use secrecy::SecretString;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::app::options::{
    AgentCli, AgentCommand, ClientCli, ClientCommand, ConnectionOptions, DeployOptions,
    MachineCommand, SecretCommand, SecretOptions,
};
use crate::app::state::AppState;
use crate::errors::ShipError;
use crate::exec::local::LocalRunner;
use crate::exec::ssh::SshSession;
use crate::exec::{CommandRunner, FileTransfer};
use crate::installer::{AgentInstaller, AgentSource, Privilege};
use crate::logs::LogLevel;
use crate::machine::{bootstrap_plan, maintenance_plan};
use crate::reconcile::pipeline::Pipeline;
use crate::release::ident::{AppName, SecretName};
use crate::release::manager::ReleaseManager;
use crate::release::secrets::SecretStore;
use crate::release::stage::ReleaseStager;
use crate::release::ReleaseRequest;
use crate::storage::settings::Settings;
use crate::utils::version_info;

/// Environment variable consulted before stdin by `ship secret set`
pub const SECRET_VALUE_ENV: &str = "SHIP_SECRET_VALUE";

// ================================= CLIENT ======================================== //

/// Run one `ship` invocation
pub async fn run_client(cli: ClientCli) -> Result<(), ShipError> {
    let state = AppState::init(&cli.global).await?;
    match cli.command {
        ClientCommand::Machine(MachineCommand::Up { connection }) => {
            let source = connection.agent_source(&version_info().version);
            let session = connect(&state, &connection).await?;
            let result = run_remote_agent(
                &session,
                &state.settings,
                &source,
                cli.global.log_level,
                &["up"],
            )
            .await;
            finish(session, result).await
        }
        ClientCommand::Machine(MachineCommand::Maintain {
            connection,
            allow_reboot,
        }) => {
            let mut args = vec!["maintain"];
            if allow_reboot {
                args.push("--allow-reboot");
            }
            let source = connection.agent_source(&version_info().version);
            let session = connect(&state, &connection).await?;
            let result =
                run_remote_agent(&session, &state.settings, &source, cli.global.log_level, &args)
                    .await;
            finish(session, result).await
        }
        ClientCommand::Deploy(options) => deploy(&state, &options).await,
        ClientCommand::Secret(SecretCommand::Set { connection, secret }) => {
            let (app, name) = parse_secret(&secret)?;
            let value = read_secret_value().await?;
            let session = connect(&state, &connection).await?;
            let store = SecretStore::new(&session, state.layout(), state.settings.permissions);
            let result = store.set(&app, &name, &value).await;
            finish(session, result).await
        }
        ClientCommand::Secret(SecretCommand::Del { connection, secret }) => {
            let (app, name) = parse_secret(&secret)?;
            let session = connect(&state, &connection).await?;
            let store = SecretStore::new(&session, state.layout(), state.settings.permissions);
            let result = store.delete(&app, &name).await;
            finish(session, result).await
        }
    }
}

async fn connect(state: &AppState, connection: &ConnectionOptions) -> Result<SshSession, ShipError> {
    info!("Connecting to {}@{}:{}", connection.user, connection.host, connection.port);
    SshSession::connect(connection.target(), state.cancel.clone()).await
}

/// Close the connection, keeping the result of the work done over it
async fn finish<T>(session: SshSession, result: Result<T, ShipError>) -> Result<T, ShipError> {
    if let Err(e) = session.close().await {
        warn!("Failed to close the connection: {}", e);
    }
    result
}

/// Install the root agent if needed and run it with `args` and `settings`
async fn run_remote_agent<T: CommandRunner + FileTransfer>(
    transport: &T,
    settings: &Settings,
    source: &AgentSource,
    log_level: Option<LogLevel>,
    args: &[&str],
) -> Result<(), ShipError> {
    let installer = AgentInstaller::new(transport, settings.agent.clone());
    let agent = installer.prepare(source, Privilege::Root, settings).await?;

    let mut cmd = agent.command(args.iter().copied()).sudo(true);
    if let Some(level) = log_level {
        cmd = cmd.args(["--log-level", level.to_filter_string()]);
    }
    let result = transport.run(&cmd).await;
    installer.discard(&agent).await;
    result
}

async fn deploy(state: &AppState, options: &DeployOptions) -> Result<(), ShipError> {
    let release = &options.release;
    let request = ReleaseRequest::parse(&release.app_name, &release.app_version, &release.volume_names)?;
    if !options.project_dir.is_dir() {
        return Err(ShipError::PreconditionError(format!(
            "project directory {} not found",
            options.project_dir.display()
        )));
    }

    let session = connect(state, &options.connection).await?;
    let result = async {
        let installer = AgentInstaller::new(&session, state.settings.agent.clone());
        let source = options.connection.agent_source(&version_info().version);
        let agent = installer
            .prepare(&source, Privilege::Deploy, &state.settings)
            .await?;

        let result = ReleaseManager::new(&session, state.layout(), agent.clone(), state.cancel.clone())
            .deploy(&options.project_dir, &request)
            .await;
        installer.discard(&agent).await;
        result
    }
    .await;
    finish(session, result).await
}

fn parse_secret(options: &SecretOptions) -> Result<(AppName, SecretName), ShipError> {
    Ok((
        AppName::new(options.app_name.as_str())?,
        SecretName::new(options.secret_name.as_str())?,
    ))
}

async fn read_secret_value() -> Result<SecretString, ShipError> {
    if let Ok(value) = std::env::var(SECRET_VALUE_ENV) {
        return Ok(SecretString::from(value));
    }
    let mut value = String::new();
    tokio::io::stdin().read_to_string(&mut value).await?;
    Ok(SecretString::from(strip_line_ending(value)))
}

/// Drop the newline a shell pipe or heredoc appends
fn strip_line_ending(mut value: String) -> String {
    if value.ends_with('\n') {
        value.pop();
        if value.ends_with('\r') {
            value.pop();
        }
    }
    value
}

// ================================== AGENT ======================================== //

/// Run one `ship-agent` invocation on the target machine
pub async fn run_agent(cli: AgentCli) -> Result<(), ShipError> {
    if let AgentCommand::Version = cli.command {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(());
    }

    let state = AppState::init(&cli.global).await?;
    let runner = LocalRunner::new(state.cancel.clone());
    info!("ship-agent {} starting", version_info().version);

    match cli.command {
        AgentCommand::Up => {
            Pipeline::new(bootstrap_plan(&state.settings))
                .run(&runner, &state.cancel)
                .await
        }
        AgentCommand::Maintain { allow_reboot } => {
            Pipeline::new(maintenance_plan(allow_reboot))
                .run(&runner, &state.cancel)
                .await
        }
        AgentCommand::Deploy(release) => {
            let request = ReleaseRequest::parse(
                &release.app_name,
                &release.app_version,
                &release.volume_names,
            )?;
            let stager = ReleaseStager {
                runner: &runner,
                layout: state.layout(),
                permissions: state.settings.permissions,
                proxy_root: state.settings.proxy.root_dir.clone(),
            };
            let outcome = stager.stage(&request).await?;
            info!("{} {} reached {:?}", request.app, request.version, outcome);
            Ok(())
        }
        AgentCommand::Version => Ok(()),
    }
}
