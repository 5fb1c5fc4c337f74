//! Command step executor - runs each build step as an external program.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StepSettings;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::executor::StepExecutor;
use crate::orchestrator::types::{BuildContext, StepName};

/// Name of the step handled natively when no command is configured for it.
pub const CLEAN_STEP: &str = "clean";

/// Number of output lines quoted in a failure message.
const ERROR_TAIL_LINES: usize = 10;

/// Failure detail used when a command printed nothing.
const NO_OUTPUT: &str = "(no output)";

/// Executor mapping step names to command lines.
///
/// Templates may contain `{basename}`, `{source}`, `{source_dir}` and
/// `{working_dir}`. An argument that is exactly `{datadirs}` expands to one
/// argument per data directory. Commands run in the context's working
/// directory with `SBK_*` variables describing the build.
///
/// On unix each command is started in its own process group, so a
/// terminal interrupt aimed at the host does not reach the step; the host
/// decides between waiting for the step and [`kill_running`](Self::kill_running).
#[derive(Debug, Clone, Default)]
pub struct CommandStepExecutor {
    commands: BTreeMap<String, Vec<String>>,
    clean_extensions: Vec<String>,
    /// Pid (and process group) of the command in progress. Shared by clones.
    running: Arc<Mutex<Option<u32>>>,
}

impl CommandStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &StepSettings) -> Self {
        Self {
            commands: settings.commands.clone(),
            clean_extensions: settings.clean_extensions.clone(),
            running: Arc::default(),
        }
    }

    /// Set the command line for one step.
    pub fn with_command<I, S>(mut self, step: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands
            .insert(step.into(), argv.into_iter().map(Into::into).collect());
        self
    }

    /// Extensions removed by the built-in clean step.
    pub fn with_clean_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clean_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn command_for(&self, step: &str) -> Option<&[String]> {
        self.commands.get(step).map(Vec::as_slice)
    }

    /// Pid of the step command currently running, if any.
    pub fn running_pid(&self) -> Option<u32> {
        *self.running.lock()
    }

    /// Kill the running step command together with its children.
    ///
    /// Returns `false` when nothing was running or the signal could not be
    /// delivered. The interrupted step fails with `CommandKilled`.
    pub fn kill_running(&self) -> bool {
        match self.running_pid() {
            Some(pid) => kill_process_group(pid),
            None => false,
        }
    }

    /// Substitute context values into a command template.
    fn expand(&self, template: &[String], ctx: &BuildContext) -> Vec<String> {
        let source = ctx.source_path().display().to_string();
        let source_dir = ctx.descriptor().source_dir().display().to_string();
        let working_dir = ctx.working_dir().display().to_string();

        let mut argv = Vec::with_capacity(template.len());
        for arg in template {
            if arg == "{datadirs}" {
                argv.extend(
                    ctx.options()
                        .datadirs
                        .iter()
                        .map(|d| d.display().to_string()),
                );
                continue;
            }
            argv.push(
                arg.replace("{basename}", ctx.output_basename())
                    .replace("{source_dir}", &source_dir)
                    .replace("{source}", &source)
                    .replace("{working_dir}", &working_dir),
            );
        }
        argv
    }

    fn run_command(&self, ctx: &BuildContext, step: &StepName, template: &[String]) -> StepResult<()> {
        let argv = self.expand(template, ctx);
        let (program, args) = argv.split_first().ok_or_else(|| {
            StepError::precondition_failed(format!("empty command for step '{}'", step))
        })?;

        let working_dir = ctx.working_dir();
        tracing::info!("[{}] $ {}", step, argv.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&working_dir)
            .env("SBK_STEP", step.as_str())
            .env("SBK_BASENAME", ctx.output_basename())
            .env("SBK_CACHE", if ctx.cache_enabled() { "1" } else { "0" })
            .env("SBK_ERROR_MODE", ctx.options().error_mode.as_str())
            .env("SBK_UNSAFE", if ctx.options().unsafe_mode { "1" } else { "0" });
        if let Ok(joined) = std::env::join_paths(&ctx.options().datadirs) {
            command.env("SBK_DATADIRS", joined);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|e| StepError::io_error(format!("running {}", program), e))?;
        *self.running.lock() = Some(child.id());
        let output = child.wait_with_output();
        *self.running.lock() = None;

        let output =
            output.map_err(|e| StepError::io_error(format!("waiting for {}", program), e))?;
        check_output(program, &output)
    }

    /// Remove `<basename>.<ext>` for every configured extension.
    fn clean(&self, ctx: &BuildContext) -> StepResult<()> {
        let working_dir = ctx.working_dir();
        for ext in &self.clean_extensions {
            let path = working_dir.join(format!("{}.{}", ctx.output_basename(), ext));
            remove_if_present(&path)?;
        }
        Ok(())
    }
}

impl StepExecutor for CommandStepExecutor {
    fn execute(&self, ctx: &BuildContext, step: &StepName) -> StepResult<()> {
        match self.command_for(step.as_str()) {
            Some(template) => self.run_command(ctx, step, template),
            None if step.as_str() == CLEAN_STEP => self.clean(ctx),
            None => Err(StepError::precondition_failed(format!(
                "no command configured for step '{}'",
                step
            ))),
        }
    }

    fn name(&self) -> &str {
        "command"
    }
}

fn check_output(program: &str, output: &Output) -> StepResult<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        tracing::debug!("{}", line);
    }

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut detail = if stderr.trim().is_empty() {
        tail(&stdout)
    } else {
        tail(&stderr)
    };
    if detail.is_empty() {
        detail = NO_OUTPUT.to_string();
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = output.status.signal() {
            return Err(StepError::command_killed(program, signal, detail));
        }
    }

    Err(StepError::command_failed(
        program,
        output.status.code().unwrap_or(-1),
        detail,
    ))
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            tracing::warn!("Killed step process group {}", pid);
            true
        }
        Err(e) => {
            tracing::warn!("Cannot kill step process group {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) -> bool {
    tracing::warn!("Killing step process {} is not supported on this platform", pid);
    false
}

fn remove_if_present(path: &Path) -> StepResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StepError::io_error(format!("removing {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::BuildOptions;
    use crate::songbook::SongbookDescriptor;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    fn context(dir: &TempDir, datadirs: Vec<PathBuf>) -> BuildContext {
        let descriptor =
            SongbookDescriptor::from_entries(dir.path().join("book.sb"), Default::default());
        let options = BuildOptions {
            datadirs,
            working_dir: Some(dir.path().to_path_buf()),
            ..BuildOptions::default()
        };
        BuildContext::new(descriptor, options, "book".to_string())
    }

    #[test]
    fn expands_placeholders() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        let executor = CommandStepExecutor::new();

        let template: Vec<String> = ["lualatex", "{basename}.tex", "{datadirs}", "--in={source_dir}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let argv = executor.expand(&template, &ctx);

        assert_eq!(argv[0], "lualatex");
        assert_eq!(argv[1], "book.tex");
        assert_eq!(&argv[2..4], ["/a", "/b"]);
        assert_eq!(argv[4], format!("--in={}", dir.path().display()));
    }

    #[test]
    fn missing_command_is_a_precondition_failure() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());

        let err = CommandStepExecutor::new()
            .execute(&ctx, &StepName::from("sbx"))
            .unwrap_err();
        assert!(matches!(err, StepError::PreconditionFailed(_)));
    }

    #[test]
    fn clean_removes_intermediate_files() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        fs::write(dir.path().join("book.aux"), "").unwrap();
        fs::write(dir.path().join("book.pdf"), "").unwrap();

        let executor = CommandStepExecutor::new().with_clean_extensions(["aux", "log"]);
        executor.execute(&ctx, &StepName::from(CLEAN_STEP)).unwrap();

        assert!(!dir.path().join("book.aux").exists());
        assert!(dir.path().join("book.pdf").exists());
    }

    #[cfg(unix)]
    #[test]
    fn runs_command_in_working_dir() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor = CommandStepExecutor::new().with_command(
            "tex",
            ["sh", "-c", "echo \"$0 $SBK_ERROR_MODE $SBK_CACHE\" > out.txt", "{basename}"],
        );

        executor.execute(&ctx, &StepName::from("tex")).unwrap();

        let content = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content.trim(), "book fix 1");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_reports_stderr_tail() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor = CommandStepExecutor::new()
            .with_command("pdf", ["sh", "-c", "echo 'missing font' >&2; exit 3"]);

        let err = executor.execute(&ctx, &StepName::from("pdf")).unwrap_err();
        match err {
            StepError::CommandFailed {
                tool,
                exit_code,
                message,
            } => {
                assert_eq!(tool, "sh");
                assert_eq!(exit_code, 3);
                assert_eq!(message, "missing font");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn silent_failure_has_placeholder_detail() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor = CommandStepExecutor::new().with_command("pdf", ["sh", "-c", "exit 4"]);

        let err = executor.execute(&ctx, &StepName::from("pdf")).unwrap_err();
        assert_eq!(err.to_string(), "sh failed with exit code 4: (no output)");
    }

    #[cfg(unix)]
    #[test]
    fn killed_command_reports_signal() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor = CommandStepExecutor::new().with_command("pdf", ["sh", "-c", "kill -KILL $$"]);

        let err = executor.execute(&ctx, &StepName::from("pdf")).unwrap_err();
        match err {
            StepError::CommandKilled {
                tool,
                signal,
                message,
            } => {
                assert_eq!(tool, "sh");
                assert_eq!(signal, 9);
                assert_eq!(message, "(no output)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn kill_running_stops_the_step() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor = Arc::new(CommandStepExecutor::new().with_command("pdf", ["sh", "-c", "sleep 30"]));
        assert!(!executor.kill_running());

        let worker = {
            let executor = executor.clone();
            std::thread::spawn(move || executor.execute(&ctx, &StepName::from("pdf")))
        };
        let deadline = Instant::now() + Duration::from_secs(10);
        while executor.running_pid().is_none() {
            assert!(Instant::now() < deadline, "step never started");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(executor.kill_running());
        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, StepError::CommandKilled { signal: 9, .. }), "{err}");
        assert_eq!(executor.running_pid(), None);
    }

    /// Set by `terminal_interrupt_does_not_reach_step` to run a slow step
    /// in a child copy of this test binary.
    #[cfg(unix)]
    const INTERRUPT_HOST_DIR: &str = "SBK_INTERRUPT_HOST_DIR";

    #[cfg(unix)]
    #[test]
    fn interrupt_host() {
        let Some(dir) = std::env::var_os(INTERRUPT_HOST_DIR) else {
            return;
        };
        let dir = PathBuf::from(dir);
        let descriptor = SongbookDescriptor::from_entries(dir.join("book.sb"), Default::default());
        let options = BuildOptions {
            working_dir: Some(dir),
            ..BuildOptions::default()
        };
        let ctx = BuildContext::new(descriptor, options, "book".to_string());
        let executor = CommandStepExecutor::new().with_command(
            "slow",
            ["sh", "-c", "touch started; sleep 1; echo done > slow.txt"],
        );
        let _ = executor.execute(&ctx, &StepName::from("slow"));
    }

    #[cfg(unix)]
    #[test]
    fn terminal_interrupt_does_not_reach_step() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        use std::os::unix::process::CommandExt;

        let dir = tempdir().unwrap();
        // The host copy gets a group of its own, standing in for sbk in a terminal.
        let mut host = Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "orchestrator::steps::command::tests::interrupt_host",
                "--nocapture",
            ])
            .env(INTERRUPT_HOST_DIR, dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();

        assert!(wait_for_file(&dir.path().join("started"), Duration::from_secs(10)));
        killpg(Pid::from_raw(host.id() as i32), Signal::SIGINT).unwrap();
        let status = host.wait().unwrap();
        assert!(!status.success(), "host should die on SIGINT");

        let output = dir.path().join("slow.txt");
        assert!(wait_for_file(&output, Duration::from_secs(10)));
        assert_eq!(fs::read_to_string(output).unwrap().trim(), "done");
    }

    #[cfg(unix)]
    fn wait_for_file(path: &Path, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !path.exists() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        true
    }

    #[test]
    fn unknown_program_is_an_io_error() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, Vec::new());
        let executor =
            CommandStepExecutor::new().with_command("tex", ["definitely-not-a-real-program-sbk"]);

        let err = executor.execute(&ctx, &StepName::from("tex")).unwrap_err();
        assert!(matches!(err, StepError::IoError { .. }));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text: String = (0..15).map(|i| format!("line {}\n", i)).collect();
        let kept = tail(&text);
        assert!(kept.starts_with("line 5"));
        assert!(kept.ends_with("line 14"));
    }
}
