//! Binary entry point for the armflow CLI.

mod cli;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
#[cfg(test)]
use std::{future::Future, pin::Pin};

use clap::Parser;
use thiserror::Error;
#[cfg(test)]
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use armflow::sample::{ADMIN_USERNAME, expand_home, read_ssh_public_key};
use armflow::test_support::ScriptedProvider;
use armflow::{
    AzureConfig, AzureProvider, ProviderClient, ProvisioningWorkflow, SampleError, SampleStack,
    Walkthrough,
};
use cli::{Cli, RunCommand};

const FAKE_PROVIDER_ENV: &str = "ARMFLOW_FAKE_PROVIDER";
const DEFAULT_LOG_FILTER: &str = "armflow=info";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("sample error: {0}")]
    Sample(#[from] SampleError),
    #[error("workflow error: {0}")]
    Workflow(String),
    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => exec_run(command).await,
    }
}

async fn exec_run(command: RunCommand) -> Result<i32, CliError> {
    #[cfg(test)]
    if let Some(hook) = RUN_COMMAND_HOOK.lock().await.as_ref() {
        return hook(command).await;
    }

    run_command(&command).await
}

async fn run_command(args: &RunCommand) -> Result<i32, CliError> {
    let config =
        AzureConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;

    if let Some(provider) = fake_provider_from_env()? {
        let stack = SampleStack::build(&config.sample_options(None))?;
        return execute(
            provider,
            &config,
            stack,
            args,
            &mut io::stdin().lock(),
            &mut io::stdout(),
        )
        .await;
    }

    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let stack = build_stack(&config)?;
    let provider = AzureProvider::connect(&config)
        .await
        .map_err(|err| CliError::Provider(err.to_string()))?;
    execute(
        provider,
        &config,
        stack,
        args,
        &mut io::stdin().lock(),
        &mut io::stdout(),
    )
    .await
}

fn build_stack(config: &AzureConfig) -> Result<SampleStack, CliError> {
    let key_path = expand_home(&config.ssh_public_key_path);
    let ssh_key = read_ssh_public_key(&key_path)?;
    if ssh_key.is_none() {
        tracing::info!(path = %key_path, "no SSH public key found, keeping password login");
    }
    Ok(SampleStack::build(&config.sample_options(ssh_key))?)
}

async fn execute<P, R, W>(
    provider: P,
    config: &AzureConfig,
    stack: SampleStack,
    args: &RunCommand,
    input: &mut R,
    out: &mut W,
) -> Result<i32, CliError>
where
    P: ProviderClient,
    R: BufRead,
    W: Write,
{
    let mut workflow = ProvisioningWorkflow::new(provider, config.workflow_settings());
    let order = workflow
        .plan(stack.target.clone(), stack.descriptors)
        .map_err(|err| CliError::Workflow(err.to_string()))?;
    writeln!(
        out,
        "Deploying into {} ({}): {}",
        stack.target.group_name,
        stack.target.location,
        order.names().join(" -> ")
    )?;
    if stack.password_login {
        writeln!(
            out,
            "Machine {} accepts password login for {ADMIN_USERNAME}: {}",
            stack.vm_resource, stack.admin_password
        )?;
    }

    let mut walkthrough = Walkthrough::new(workflow, stack.vm_resource);
    drive(&mut walkthrough, !args.yes, input, out).await?;
    Ok(0)
}

async fn drive<P, R, W>(
    walkthrough: &mut Walkthrough<P>,
    confirm: bool,
    input: &mut R,
    out: &mut W,
) -> Result<(), CliError>
where
    P: ProviderClient,
    R: BufRead,
    W: Write,
{
    while let Some(step) = walkthrough.peek() {
        if confirm && step.requires_confirmation() {
            write!(out, "Press Enter to {}... ", step.describe())?;
            out.flush()?;
            // End of input counts as confirmation.
            let mut answer = String::new();
            input.read_line(&mut answer)?;
        }

        match walkthrough.next().await {
            Some(Ok(report)) => writeln!(out, "{report}")?,
            Some(Err(err)) => {
                let message = err.to_string();
                if let Err(cleanup) = walkthrough.abort().await {
                    tracing::warn!(error = %cleanup, "cleanup after failed step did not finish");
                }
                return Err(CliError::Workflow(message));
            }
            None => break,
        }
    }
    Ok(())
}

fn fake_provider_from_env() -> Result<Option<ScriptedProvider>, CliError> {
    let Ok(mode) = env::var(FAKE_PROVIDER_ENV) else {
        return Ok(None);
    };
    let provider = ScriptedProvider::new();
    match mode.split_once(':') {
        None if mode == "ok" => {}
        Some(("fail-create", name)) if !name.is_empty() => provider.fail_create(name),
        Some(("fail-delete", times)) => {
            let count = times.parse().map_err(|_| {
                CliError::Config(format!("{FAKE_PROVIDER_ENV}: invalid count '{times}'"))
            })?;
            provider.fail_delete(count);
        }
        _ => {
            return Err(CliError::Config(format!(
                "{FAKE_PROVIDER_ENV}: unsupported mode '{mode}'"
            )));
        }
    }
    tracing::warn!(mode = %mode, "using scripted provider");
    Ok(Some(provider))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
type RunHook =
    dyn Fn(RunCommand) -> Pin<Box<dyn Future<Output = Result<i32, CliError>> + Send>> + Send + Sync;

#[cfg(test)]
static RUN_COMMAND_HOOK: Mutex<Option<Box<RunHook>>> = Mutex::const_new(None);

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
