//! Container runtime: builds the workspace image and runs the workspace.
//!
//! Both `docker` and `nerdctl` take the same arguments, so one
//! implementation drives either. Process output is streamed line by line
//! into whatever writer the caller passes in.

use anyhow::{Context, Result, bail};
use rungp_core::RuntimeKind;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Port the IDE and the supervisor API listen on inside the container.
const IDE_CONTAINER_PORT: u16 = 22999;
/// Port the SSH server listens on inside the container.
const SSH_CONTAINER_PORT: u16 = 23001;
const SUPERVISOR_ENTRYPOINT: [&str; 3] = ["/.supervisor/supervisor", "run", "--rungp"];

/// How to start a workspace container.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub image: String,
    /// Host directory mounted as the checkout.
    pub workdir: PathBuf,
    pub checkout_location: String,
    /// Folder the IDE opens, e.g. `/workspace/demo`.
    pub workspace_folder: String,
    pub tasks_json: String,
    /// Ports declared by the workspace config.
    pub ports: Vec<u16>,
    pub port_offset: u16,
    pub no_port_forwarding: bool,
    /// Host port for the IDE; 0 leaves it unpublished.
    pub ide_port: u16,
    /// Host port for SSH; 0 leaves it unpublished.
    pub ssh_port: u16,
    /// Host port for the supervisor API. Published separately when it
    /// differs from `ide_port`; 0 leaves it unpublished.
    pub supervisor_port: u16,
    pub ssh_public_key: Option<String>,
    /// Directory holding `ide/` and `supervisor/` to mount into the container.
    pub assets_dir: Option<PathBuf>,
}

/// A container CLI found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
    command: String,
}

impl ContainerRuntime {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Resolves `kind` to a runtime, probing `PATH` for `auto`.
    pub async fn detect(kind: RuntimeKind) -> Result<Self> {
        let command = match kind {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Nerdctl => "nerdctl",
            RuntimeKind::Auto => {
                let mut found = None;
                for candidate in ["docker", "nerdctl"] {
                    if is_available(candidate).await {
                        found = Some(candidate);
                        break;
                    }
                }
                found.context("no supported container runtime detected")?
            }
        };
        debug!("using {command} as container runtime");
        Ok(Self::new(command))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Builds `reference` from `dockerfile` in a scratch directory.
    ///
    /// Returns once the build finished or `cancel` fired.
    pub async fn build_image<W: Write>(
        &self,
        dockerfile: &str,
        reference: &str,
        output: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dir = tempfile::Builder::new().prefix("rungp-").tempdir()?;
        std::fs::write(dir.path().join("Dockerfile"), dockerfile)?;
        writeln!(output, "\nDockerfile:{dockerfile}")?;

        let mut child = Command::new(&self.command)
            .args(["build", "-t", reference, "."])
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot run {}", self.command))?;

        match stream_output(&mut child, output, cancel).await? {
            Some(status) if status.success() => Ok(()),
            Some(_) => bail!("workspace image build failed"),
            None => bail!("workspace image build was cancelled"),
        }
    }

    /// Runs the workspace container until it exits or `cancel` fires.
    ///
    /// On cancel the container process is killed and the container itself
    /// is stopped by name.
    pub async fn start_workspace<W: Write>(
        &self,
        opts: &StartOptions,
        output: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if opts.checkout_location.is_empty() {
            bail!("missing checkout location");
        }
        if opts.workspace_folder.is_empty() {
            bail!("missing workspace location");
        }

        let mut env_file = tempfile::Builder::new()
            .prefix("rungp-")
            .suffix(".env")
            .tempfile()?;
        for (name, value) in env_vars(opts) {
            writeln!(env_file, "{name}={value}")?;
        }
        env_file.flush()?;

        let key_file = match &opts.ssh_public_key {
            Some(key) => {
                let mut file = tempfile::Builder::new()
                    .prefix("rungp-")
                    .suffix(".pub")
                    .tempfile()?;
                file.write_all(key.as_bytes())?;
                file.flush()?;
                Some(file)
            }
            None => None,
        };

        let name = container_name();
        let args = self.run_args(
            opts,
            &name,
            env_file.path(),
            key_file.as_ref().map(|f| f.path()),
        );
        info!(container = %name, image = %opts.image, "Starting workspace");

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&opts.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot run {}", self.command))?;

        match stream_output(&mut child, output, cancel).await? {
            Some(status) if status.success() => Ok(()),
            Some(status) => bail!("workspace container exited with {status}"),
            None => {
                self.kill(&name).await;
                Ok(())
            }
        }
    }

    async fn kill(&self, name: &str) {
        debug!(container = %name, "Stopping container");
        let _ = Command::new(&self.command)
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    /// Arguments for `<runtime> run`.
    pub fn run_args(
        &self,
        opts: &StartOptions,
        name: &str,
        env_file: &Path,
        ssh_key_file: Option<&Path>,
    ) -> Vec<String> {
        let mut args: Vec<String> = ["run", "--rm", "--user", "root", "--privileged"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        push(
            "-v",
            format!(
                "{}:/workspace/{}",
                opts.workdir.display(),
                opts.checkout_location
            ),
        );
        if let Some(assets) = &opts.assets_dir {
            push("-v", format!("{}:/ide", assets.join("ide").display()));
            push(
                "-v",
                format!("{}:/.supervisor", assets.join("supervisor").display()),
            );
        }
        push("--name", name.to_string());

        if opts.ide_port > 0 {
            push("-p", format!("{}:{IDE_CONTAINER_PORT}", opts.ide_port));
        }
        if opts.supervisor_port > 0 && opts.supervisor_port != opts.ide_port {
            push("-p", format!("{}:{IDE_CONTAINER_PORT}", opts.supervisor_port));
        }
        if self.command == "docker" && cfg!(any(target_os = "linux", target_os = "macos")) {
            push("-v", "/var/run/docker.sock:/var/run/docker.sock".to_string());
        }
        push("--env-file", env_file.display().to_string());
        if let Some(key) = ssh_key_file {
            push(
                "-v",
                format!("{}:/home/gitpod/.ssh/authorized_keys", key.display()),
            );
        }
        if opts.ssh_port > 0 {
            push("-p", format!("{}:{SSH_CONTAINER_PORT}", opts.ssh_port));
        }
        if !opts.no_port_forwarding {
            for port in &opts.ports {
                push(
                    "-p",
                    format!("{}:{port}", port.saturating_add(opts.port_offset)),
                );
            }
        }

        args.push(opts.image.clone());
        args.extend(SUPERVISOR_ENTRYPOINT.iter().map(|s| (*s).to_string()));
        args
    }
}

async fn is_available(command: &str) -> bool {
    let result = Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    matches!(result, Ok(status) if status.success())
}

fn container_name() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("rungp-{nanos}")
}

/// Environment the in-container supervisor boots with.
pub fn env_vars(opts: &StartOptions) -> Vec<(&'static str, String)> {
    let expiry = chrono::Utc::now().to_rfc3339();
    vec![
        ("GITPOD_WORKSPACE_URL", "http://localhost".to_string()),
        ("GITPOD_THEIA_PORT", "23000".to_string()),
        ("GITPOD_IDE_ALIAS", "code".to_string()),
        ("THEIA_WORKSPACE_ROOT", opts.workspace_folder.clone()),
        (
            "GITPOD_REPO_ROOT",
            format!("/workspace/{}", opts.checkout_location),
        ),
        ("GITPOD_PREVENT_METADATA_ACCESS", "false".to_string()),
        ("GITPOD_WORKSPACE_ID", "a-random-name".to_string()),
        ("GITPOD_TASKS", opts.tasks_json.clone()),
        ("GITPOD_HEADLESS", "false".to_string()),
        ("GITPOD_HOST", "gitpod.local".to_string()),
        (
            "THEIA_SUPERVISOR_TOKENS",
            format!(
                r#"{{"token":"invalid","kind":"gitpod","host":"gitpod.local","scope":[],"expiryDate":"{expiry}","reuse":2}}"#
            ),
        ),
        ("VSX_REGISTRY_URL", "https://open-vsx.org/".to_string()),
    ]
}

/// Copies the child's stdout and stderr into `output` line by line.
///
/// Returns the exit status, or `None` if `cancel` fired first, in which
/// case the child has been killed.
async fn stream_output<W: Write>(
    child: &mut Child,
    output: &mut W,
    cancel: &CancellationToken,
) -> Result<Option<ExitStatus>> {
    let stdout = child.stdout.take().context("stdout was not captured")?;
    let stderr = child.stderr.take().context("stderr was not captured")?;
    let mut out = segments(stdout);
    let mut err = segments(stderr);
    let (mut out_open, mut err_open) = (true, true);

    let mut cancelled = false;
    while (out_open || err_open) && !cancelled {
        tokio::select! {
            line = out.next_segment(), if out_open => match line? {
                Some(line) => write_line(output, &line)?,
                None => out_open = false,
            },
            line = err.next_segment(), if err_open => match line? {
                Some(line) => write_line(output, &line)?,
                None => err_open = false,
            },
            () = cancel.cancelled() => cancelled = true,
        }
    }

    if !cancelled {
        tokio::select! {
            status = child.wait() => return Ok(Some(status?)),
            () = cancel.cancelled() => {}
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(None)
}

fn segments<R: AsyncRead + Unpin>(reader: R) -> tokio::io::Split<BufReader<R>> {
    BufReader::new(reader).split(b'\n')
}

fn write_line<W: Write>(output: &mut W, line: &[u8]) -> std::io::Result<()> {
    output.write_all(line)?;
    output.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> StartOptions {
        StartOptions {
            image: "workspace-image:latest".into(),
            workdir: PathBuf::from("/home/dev/demo"),
            checkout_location: "demo".into(),
            workspace_folder: "/workspace/demo".into(),
            tasks_json: "[]".into(),
            ports: vec![3000, 5432],
            port_offset: 0,
            no_port_forwarding: false,
            ide_port: 8080,
            ssh_port: 8082,
            supervisor_port: 8080,
            ssh_public_key: None,
            assets_dir: None,
        }
    }

    fn pairs(args: &[String]) -> Vec<(String, String)> {
        args.windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect()
    }

    #[test]
    fn test_run_args_layout() {
        let runtime = ContainerRuntime::new("nerdctl");
        let args = runtime.run_args(&options(), "rungp-1", Path::new("/tmp/x.env"), None);

        assert_eq!(&args[..5], ["run", "--rm", "--user", "root", "--privileged"]);
        assert_eq!(
            &args[args.len() - 4..],
            [
                "workspace-image:latest",
                "/.supervisor/supervisor",
                "run",
                "--rungp"
            ]
        );
        let pairs = pairs(&args);
        for expected in [
            ("-v", "/home/dev/demo:/workspace/demo"),
            ("--name", "rungp-1"),
            ("-p", "8080:22999"),
            ("--env-file", "/tmp/x.env"),
            ("-p", "8082:23001"),
            ("-p", "3000:3000"),
            ("-p", "5432:5432"),
        ] {
            assert!(
                pairs.contains(&(expected.0.to_string(), expected.1.to_string())),
                "missing {expected:?} in {args:?}"
            );
        }
        assert!(!args.iter().any(|a| a.contains("docker.sock")));
        assert_eq!(args.iter().filter(|a| a.ends_with(":22999")).count(), 1);

        let opts = StartOptions {
            supervisor_port: 9000,
            ..options()
        };
        let args = runtime.run_args(&opts, "rungp-1", Path::new("/tmp/x.env"), None);
        let pairs = self::pairs(&args);
        assert!(pairs.contains(&("-p".into(), "9000:22999".into())));
        assert!(pairs.contains(&("-p".into(), "8080:22999".into())));
    }

    #[test]
    fn test_port_offset_and_ssh_key() {
        let runtime = ContainerRuntime::new("nerdctl");
        let opts = StartOptions {
            port_offset: 10000,
            ide_port: 18080,
            ..options()
        };
        let args = runtime.run_args(
            &opts,
            "rungp-2",
            Path::new("/tmp/x.env"),
            Some(Path::new("/tmp/k.pub")),
        );
        let pairs = pairs(&args);

        assert!(pairs.contains(&("-p".into(), "13000:3000".into())));
        assert!(pairs.contains(&("-p".into(), "18080:22999".into())));
        assert!(pairs.contains(&(
            "-v".into(),
            "/tmp/k.pub:/home/gitpod/.ssh/authorized_keys".into()
        )));
    }

    #[test]
    fn test_no_port_forwarding_and_disabled_ports() {
        let runtime = ContainerRuntime::new("nerdctl");
        let opts = StartOptions {
            no_port_forwarding: true,
            ide_port: 0,
            ssh_port: 0,
            supervisor_port: 0,
            ..options()
        };
        let args = runtime.run_args(&opts, "rungp-3", Path::new("/tmp/x.env"), None);
        assert!(!args.iter().any(|a| a == "-p"));
    }

    #[test]
    fn test_assets_are_mounted() {
        let runtime = ContainerRuntime::new("nerdctl");
        let opts = StartOptions {
            assets_dir: Some(PathBuf::from("/opt/rungp")),
            ..options()
        };
        let args = runtime.run_args(&opts, "rungp-4", Path::new("/tmp/x.env"), None);
        let pairs = pairs(&args);
        assert!(pairs.contains(&("-v".into(), "/opt/rungp/ide:/ide".into())));
        assert!(pairs.contains(&("-v".into(), "/opt/rungp/supervisor:/.supervisor".into())));
    }

    #[test]
    fn test_env_vars() {
        let env = env_vars(&StartOptions {
            tasks_json: r#"[{"command":"npm start"}]"#.into(),
            ..options()
        });
        let get = |name: &str| {
            env.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("GITPOD_TASKS"), r#"[{"command":"npm start"}]"#);
        assert_eq!(get("THEIA_WORKSPACE_ROOT"), "/workspace/demo");
        assert_eq!(get("GITPOD_REPO_ROOT"), "/workspace/demo");
        let tokens: serde_json::Value =
            serde_json::from_str(&get("THEIA_SUPERVISOR_TOKENS")).unwrap();
        assert_eq!(tokens["host"], "gitpod.local");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_output_interleaves_both_pipes() {
        let mut child = Command::new("sh")
            .args(["-c", "echo one; echo two >&2; printf three"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut output = Vec::new();

        let status = stream_output(&mut child, &mut output, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert!(status.success());
        let text = String::from_utf8(output).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["one", "three", "two"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_output_stops_on_cancel() {
        let mut child = Command::new("sh")
            .args(["-c", "echo started; sleep 30"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let mut output = Vec::new();

        let status = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stream_output(&mut child, &mut output, &cancel),
        )
        .await
        .expect("cancel should stop streaming")
        .unwrap();

        assert!(status.is_none());
        assert_eq!(output, b"started\n");
    }
}
