//! The `run` and `build` pipelines.

use crate::gitpod_config::GitpodConfig;
use crate::runtime::{ContainerRuntime, StartOptions};
use crate::supervisor_client::SupervisorClient;
use crate::ui::{self, UiMode};
use anyhow::{Context, Result};
use rungp_core::supervisor::FAILURE_SEPARATOR;
use rungp_core::{
    ConsoleLog, Log, Observation, ObserveOptions, PipelineContext, RunConfig, Session,
    SessionConfig, SessionEnd, Shutdown, TaskFeeds, observe,
};
use rungp_proto::Outcome;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tag of the image built for `run`.
pub const WORKSPACE_IMAGE: &str = "workspace-image:latest";

pub const DEFAULT_SSH_PUBLIC_KEY: &str = "~/.ssh/id_rsa.pub";

/// How long the renderer gets to restore the terminal after the session.
const RENDERER_GRACE: Duration = Duration::from_secs(2);

/// Everything `run` needs, resolved from flags and config files.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub workdir: PathBuf,
    pub gitpod: GitpodConfig,
    pub runtime: ContainerRuntime,
    pub start: StartOptions,
    pub ssh_public_key_path: String,
    pub verbose: bool,
}

/// Options of the `run` command after flag parsing.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub workdir: PathBuf,
    pub gitpod_yaml: PathBuf,
    pub verbose: bool,
    pub ide_port: Option<u16>,
    pub ssh_port: Option<u16>,
    pub port_offset: u16,
    pub no_port_forwarding: bool,
    pub ssh_public_key_path: Option<String>,
    pub no_tasks: bool,
    pub ui: UiMode,
    pub assets_dir: Option<PathBuf>,
}

/// Builds and starts the workspace, observing it until it exits or the
/// operator quits.
pub async fn run_command(mut config: RunConfig, req: RunRequest) -> Result<SessionEnd> {
    if let Some(port) = req.ide_port {
        config.ide_port = port;
    }
    if let Some(port) = req.ssh_port {
        config.ssh_port = port;
    }
    if req.no_tasks {
        config.observe_tasks = false;
    }

    let gitpod = GitpodConfig::load(&req.workdir.join(&req.gitpod_yaml))?;
    let runtime = ContainerRuntime::detect(config.runtime).await?;
    let workspace_folder = gitpod.workspace_folder(&req.workdir);
    let session_config = config.session_config(&workspace_folder, req.port_offset);

    let start = StartOptions {
        image: WORKSPACE_IMAGE.to_string(),
        workdir: req.workdir.clone(),
        checkout_location: gitpod.checkout_location(&req.workdir),
        workspace_folder,
        tasks_json: gitpod.tasks_json()?,
        ports: gitpod.ports.iter().map(|p| p.port).collect(),
        port_offset: req.port_offset,
        no_port_forwarding: req.no_port_forwarding,
        ide_port: session_config.access.http_port,
        ssh_port: session_config.access.ssh_port,
        supervisor_port: session_config.access.supervisor_port,
        ssh_public_key: None,
        assets_dir: req.assets_dir.clone(),
    };
    let plan = RunPlan {
        workdir: req.workdir.clone(),
        gitpod,
        runtime,
        start,
        ssh_public_key_path: req
            .ssh_public_key_path
            .clone()
            .unwrap_or_else(|| DEFAULT_SSH_PUBLIC_KEY.to_string()),
        verbose: req.verbose,
    };

    let mode = req.ui.resolve(req.verbose);
    debug!(?mode, runtime = plan.runtime.command(), "Starting session");
    let ui = ui::attach(mode, &session_config);
    let session = Session::new(session_config, Arc::clone(&ui.log), Some(ui.bus.clone()));
    let end = session
        .run(move |ctx| run_pipeline(ctx, plan), ui.done())
        .await;
    ui.wait(RENDERER_GRACE).await;

    if end.shutdown == Shutdown::UserQuit {
        info!("Workspace stopped");
    }
    Ok(end)
}

/// Build, start, observe.
pub async fn run_pipeline(ctx: PipelineContext, plan: RunPlan) -> Outcome {
    let log = Arc::clone(&ctx.log);

    if let Err(reason) = build_phase(log.as_ref(), &plan, WORKSPACE_IMAGE, &ctx.cancel).await {
        return Outcome::Failure(reason);
    }
    if ctx.cancel.is_cancelled() {
        return Outcome::Success;
    }

    let ssh_public_key = read_ssh_key(&plan.ssh_public_key_path, plan.verbose, log.as_ref());
    let opts = ObserveOptions {
        tasks: task_feeds(&ctx.config, log.as_ref()),
        on_fail: Some(Arc::new(|reason: &str| {
            debug!(%reason, "Workspace phase failed");
        })),
        on_tasks_done: Some(Arc::new(|| debug!("Task supervision finished"))),
    };
    let Observation { mut sink, handle } = observe(
        Arc::clone(&log),
        ctx.config.access.clone(),
        opts,
        ctx.cancel.clone(),
    );

    let start = StartOptions {
        ssh_public_key,
        ..plan.start
    };
    let started = plan
        .runtime
        .start_workspace(&start, &mut sink, &ctx.cancel)
        .await;
    sink.close();

    let report = match handle.await {
        Ok(report) => report,
        Err(e) => return Outcome::Failure(format!("workspace observer failed: {e}")),
    };
    let stopped = ctx.cancel.is_cancelled();

    match (&started, report.open_phase) {
        (Ok(()), Some(phase)) => {
            phase.success();
        }
        (Err(e), Some(phase)) => {
            phase.failure(format!("{e:#}"));
        }
        (_, None) => {}
    }

    if let Err(e) = started {
        return Outcome::Failure(format!("{e:#}"));
    }
    log.discard_logs();

    let mut failures = report.failures;
    if !stopped
        && let Some(tasks) = &report.tasks
        && let Some(reason) = tasks.outcome.failure()
    {
        failures.push(reason.to_string());
    }
    if failures.is_empty() {
        Outcome::Success
    } else {
        Outcome::Failure(failures.join(FAILURE_SEPARATOR))
    }
}

/// Runs the `building` phase. Returns the failure reason on error.
async fn build_phase(
    log: &dyn Log,
    plan: &RunPlan,
    reference: &str,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let phase = log.start_phase("building", "workspace image");
    let mut build_log = log.writer();
    let built = match plan.gitpod.dockerfile(&plan.workdir) {
        Ok(dockerfile) => {
            plan.runtime
                .build_image(&dockerfile, reference, &mut build_log, cancel)
                .await
        }
        Err(e) => Err(e),
    };
    build_log.finish();

    match built {
        Ok(()) => {
            log.discard_logs();
            phase.success();
            Ok(())
        }
        Err(e) => {
            let reason = format!("{e:#}");
            phase.failure(reason.clone());
            Err(reason)
        }
    }
}

/// Builds the workspace image only, reporting phases on stdout.
pub async fn build_command(
    config: &RunConfig,
    workdir: &Path,
    gitpod_yaml: &Path,
    target: &str,
) -> Result<Outcome> {
    let gitpod = GitpodConfig::load(&workdir.join(gitpod_yaml))?;
    let runtime = ContainerRuntime::detect(config.runtime).await?;
    let plan = RunPlan {
        workdir: workdir.to_path_buf(),
        gitpod,
        runtime,
        start: StartOptions::default(),
        ssh_public_key_path: String::new(),
        verbose: false,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let log = ConsoleLog::stdout();
    Ok(match build_phase(&log, &plan, target, &cancel).await {
        Ok(()) => Outcome::Success,
        Err(reason) => Outcome::Failure(reason),
    })
}

/// Task feeds for the session, or `None` if tasks are not observed.
fn task_feeds(config: &SessionConfig, log: &dyn Log) -> Option<TaskFeeds> {
    if !config.observe_tasks || config.access.supervisor_port == 0 {
        return None;
    }
    match SupervisorClient::new(config.access.supervisor_port) {
        Ok(client) => {
            let client = Arc::new(client);
            Some(TaskFeeds {
                status: client.clone(),
                terminals: client,
            })
        }
        Err(e) => {
            log.warn(&format!("cannot observe tasks: {e}"));
            None
        }
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir().context("cannot find user home directory")?;
            Ok(home.join(rest.trim_start_matches('/')))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Reads the public key authorized for SSH into the workspace.
///
/// A missing key is not an error; it is only reported in verbose mode.
fn read_ssh_key(path: &str, verbose: bool, log: &dyn Log) -> Option<String> {
    let path = match expand_home(path) {
        Ok(path) => path,
        Err(e) => {
            log.warn(&format!("{e:#}"));
            return None;
        }
    };
    match std::fs::read_to_string(&path) {
        Ok(key) => Some(key),
        Err(e) => {
            if verbose {
                log.warn(&format!(
                    "cannot read public SSH key from {}: {e}",
                    path.display()
                ));
            }
            None
        }
    }
}
