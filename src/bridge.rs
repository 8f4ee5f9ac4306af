//! Command bridge to the puter CLI.
//!
//! Every CLI-backed endpoint funnels through [`CommandBridge::execute`]: the
//! command line is classified once by its leading token, spawned either as a
//! one-shot `puter <args>` subprocess or as a single stdin line to a
//! `puter shell` session, raced against the caller's timeout, and its output
//! passed through the normalization pipeline before anything sees it.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::normalize;

/// Commands the puter CLI only accepts inside its REPL shell, not as direct
/// subcommand arguments.
const INTERACTIVE_ONLY: &[&str] = &[
    "ls", "cd", "pwd", "mkdir", "rm", "cp", "mv", "touch", "cat", "push", "pull", "update", "edit",
    "stat", "clean",
];

/// How a command line reaches the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// One-shot `puter <args>` invocation.
    Direct,
    /// One line of stdin to a `puter shell` subprocess.
    Interactive,
}

impl ExecMode {
    /// Classify a command line by its leading token.
    pub fn classify(command: &str) -> Self {
        let head = command.trim().split_whitespace().next().unwrap_or("");
        if INTERACTIVE_ONLY.contains(&head) {
            ExecMode::Interactive
        } else {
            ExecMode::Direct
        }
    }
}

/// Normalized output of a finished invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when the process exited non-zero but still produced output. The
    /// puter CLI is known to do this for some valid results, so the call is
    /// treated as a soft success.
    pub warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Machine-readable code for the envelope, where one exists.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            BridgeError::Timeout(_) => Some("TIMEOUT"),
            BridgeError::Spawn { .. } => Some("SPAWN_ERROR"),
            _ => None,
        }
    }
}

/// Split a command line into arguments, honoring double quotes so remote
/// paths with spaces survive (`push "my file.txt" /remote`).
pub fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in command.trim().chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Spawns the puter CLI and turns one command line into one normalized
/// result. Exactly one OS process per invocation; the executable name is a
/// field so tests can substitute stub programs.
pub struct CommandBridge {
    program: String,
}

impl CommandBridge {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run one command line with the given timeout. On expiry the child is
    /// killed and the call fails with [`BridgeError::Timeout`].
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, BridgeError> {
        match ExecMode::classify(command) {
            ExecMode::Direct => self.run_direct(command, timeout).await,
            ExecMode::Interactive => self.run_interactive(command, timeout).await,
        }
    }

    async fn run_direct(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, BridgeError> {
        debug!(command, "running direct puter invocation");
        let mut cmd = Command::new(&self.program);
        cmd.args(split_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| BridgeError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        // kill_on_drop tears the child down when the timeout wins the race.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => finish(output, false),
            Ok(Err(e)) => Err(BridgeError::Io(e)),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        }
    }

    async fn run_interactive(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, BridgeError> {
        debug!(command, "running command through puter shell");
        let mut cmd = Command::new(&self.program);
        cmd.arg("shell")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| BridgeError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        let mut stdin = match child.stdin.take() {
            Some(s) => s,
            None => return Err(BridgeError::Spawn {
                program: self.program.clone(),
                source: std::io::Error::other("stdin not captured"),
            }),
        };

        // One line of input, then EOF so the shell exits.
        let run = async move {
            stdin.write_all(command.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            drop(stdin);
            child.wait_with_output().await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => finish(output, true),
            Ok(Err(e)) => Err(BridgeError::Io(e)),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        }
    }
}

/// Apply the exit policy: non-zero with no stdout is a failure carrying
/// stderr; non-zero with stdout is a soft success carrying a warning.
fn finish(output: std::process::Output, shell_mode: bool) -> Result<ExecOutput, BridgeError> {
    let stdout = normalize::clean_output(&String::from_utf8_lossy(&output.stdout), shell_mode);
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() && stdout.is_empty() {
        let code = output.status.code().unwrap_or(-1);
        return Err(BridgeError::Failed {
            code,
            stderr: if stderr.is_empty() {
                "command execution failed".to_string()
            } else {
                stderr
            },
        });
    }

    let warning = if output.status.success() {
        None
    } else {
        let code = output.status.code().unwrap_or(-1);
        warn!(code, "puter exited non-zero but produced output, treating as success");
        Some(format!("puter exited with code {code}"))
    };

    Ok(ExecOutput {
        stdout,
        stderr,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn interactive_only_commands_classify_interactive() {
        for cmd in [
            "ls", "ls /docs", "cd /", "pwd", "mkdir photos", "rm old.txt", "cp a b", "mv a b",
            "touch x", "cat readme", "push \"a.txt\" /r", "pull a.txt", "update app .",
            "edit notes", "stat a", "clean",
        ] {
            assert_eq!(ExecMode::classify(cmd), ExecMode::Interactive, "{cmd}");
        }
    }

    #[test]
    fn other_commands_classify_direct() {
        for cmd in [
            "apps", "apps 7d", "whoami", "login --save", "logout", "df", "usage", "sites",
            "site:create \"blog\"", "site:delete \"uid\"", "app:create \"x\"", "app:delete -f \"x\"",
        ] {
            assert_eq!(ExecMode::classify(cmd), ExecMode::Direct, "{cmd}");
        }
    }

    #[test]
    fn classification_is_token_exact() {
        // A prefix of an interactive command is not interactive.
        assert_eq!(ExecMode::classify("lsx"), ExecMode::Direct);
        assert_eq!(ExecMode::classify("statue"), ExecMode::Direct);
        assert_eq!(ExecMode::classify("  ls  "), ExecMode::Interactive);
        assert_eq!(ExecMode::classify(""), ExecMode::Direct);
    }

    #[test]
    fn split_args_honors_double_quotes() {
        assert_eq!(
            split_args(r#"push "my file.txt" /remote"#),
            vec!["push", "my file.txt", "/remote"]
        );
        assert_eq!(
            split_args(r#"site:create "blog" --subdomain="my-blog""#),
            vec!["site:create", "blog", "--subdomain=my-blog"]
        );
        assert_eq!(split_args("  apps   7d "), vec!["apps", "7d"]);
        assert!(split_args("").is_empty());
    }

    #[cfg(unix)]
    fn stub_cli(script: &str) -> (tempfile::TempDir, String) {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("puter-stub");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let program = path.to_string_lossy().into_owned();
        (dir, program)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn direct_success_has_output_and_no_warning() {
        let (_dir, program) = stub_cli("#!/bin/sh\necho \"Listing of apps\"\necho \"my-app\"\n");
        let bridge = CommandBridge::new(program);
        let out = bridge
            .execute("apps", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "Listing of apps\nmy-app");
        assert!(out.warning.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_with_output_is_soft_success() {
        let (_dir, program) = stub_cli("#!/bin/sh\necho \"partial result\"\nexit 3\n");
        let bridge = CommandBridge::new(program);
        let out = bridge
            .execute("apps", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "partial result");
        assert_eq!(out.warning.as_deref(), Some("puter exited with code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_without_output_fails_with_stderr() {
        let (_dir, program) = stub_cli("#!/bin/sh\necho \"no such app\" >&2\nexit 4\n");
        let bridge = CommandBridge::new(program);
        let err = bridge
            .execute("apps", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BridgeError::Failed { code, stderr } => {
                assert_eq!(code, 4);
                assert_eq!(stderr, "no such app");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child_within_bounded_time() {
        let (_dir, program) = stub_cli("#!/bin/sh\nsleep 30\n");
        let bridge = CommandBridge::new(program);
        let start = Instant::now();
        let err = bridge
            .execute("apps", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
        assert_eq!(err.code(), Some("TIMEOUT"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interactive_path_feeds_stdin_and_strips_chrome() {
        // Stub shell: banner, prompt, echo each stdin line back, goodbye.
        let (_dir, program) = stub_cli(
            "#!/bin/sh\n\
             test \"$1\" = \"shell\" || exit 99\n\
             echo \"Welcome to Puter-CLI\"\n\
             echo \"puter@tester> \"\n\
             while read line; do echo \"got: $line\"; done\n\
             echo \"Goodbye!\"\n",
        );
        let bridge = CommandBridge::new(program);
        let out = bridge
            .execute("ls /docs", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "got: ls /docs");
        assert!(out.warning.is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let bridge = CommandBridge::new("definitely-not-a-real-binary-4851");
        let err = bridge
            .execute("apps", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert_eq!(err.code(), Some("SPAWN_ERROR"));
    }
}
