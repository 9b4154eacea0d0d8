use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::domain::FaultKind;
use crate::runner::traits::{RunError, RunReport, Runner};

/// Runs accepted source in a fresh `python3 -I` process per invocation:
/// cleared environment, null stdin, rlimit memory ceiling, no subprocess
/// creation, best-effort network namespace, hard SIGKILL at the wall-clock
/// ceiling. The process boundary is the security boundary; the validator's
/// verdict is only defense-in-depth on top of it.
#[derive(Debug)]
pub struct ProcessRunner {
    config: Arc<SandboxConfig>,
    scratch_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(config: Arc<SandboxConfig>) -> std::io::Result<Self> {
        let scratch_dir = std::env::temp_dir().join("sandrun");
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            config,
            scratch_dir,
        })
    }

    async fn execute(&self, source_path: &PathBuf, limit: Duration) -> Result<RunReport, RunError> {
        let mut cmd = Command::new(&self.config.python_path);
        cmd.arg("-I")
            .arg("-B")
            .arg(source_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.scratch_dir)
            .env_clear()
            // A fixed minimal PATH so interpreter lookup still works.
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .kill_on_drop(true);

        #[cfg(unix)]
        self.harden(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::FailedToLaunch {
                msg: format!("failed to spawn interpreter: {e}"),
            })?;

        let stdout_pipe = child.stdout.take().ok_or_else(|| RunError::Internal {
            msg: "child stdout pipe missing".to_string(),
        })?;
        let stderr_pipe = child.stderr.take().ok_or_else(|| RunError::Internal {
            msg: "child stderr pipe missing".to_string(),
        })?;

        // The readers always drain the pipes to EOF so the child can never
        // block on a full pipe; only the first `max_output_bytes` are kept.
        let cap = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, cap));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap));

        let start = Instant::now();
        let wait_result = timeout(limit, child.wait()).await;
        let (status, timed_out) = match wait_result {
            Ok(status) => {
                let status = status.map_err(|e| RunError::Internal {
                    msg: format!("failed to wait for child: {e}"),
                })?;
                (Some(status), false)
            }
            Err(_) => {
                tracing::debug!(limit_ms = limit.as_millis() as u64, "execution hit wall-clock ceiling, killing child");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill timed-out child");
                }
                let _ = child.wait().await;
                (None, true)
            }
        };
        let elapsed = start.elapsed();

        let (stdout, stdout_truncated) = stdout_task.await.map_err(|e| RunError::Internal {
            msg: format!("stdout reader failed: {e}"),
        })?;
        let (stderr, stderr_truncated) = stderr_task.await.map_err(|e| RunError::Internal {
            msg: format!("stderr reader failed: {e}"),
        })?;
        if stdout_truncated || stderr_truncated {
            tracing::debug!(stdout_truncated, stderr_truncated, "captured output truncated at cap");
        }

        match status {
            None => Ok(RunReport {
                stdout,
                stderr,
                fault: None,
                timed_out: true,
                elapsed,
            }),
            Some(status) if status.success() => {
                debug_assert!(!timed_out);
                Ok(RunReport::completed(stdout, stderr, elapsed))
            }
            Some(status) => Ok(RunReport {
                fault: Some(classify_fault(&status, &stderr)),
                stdout,
                stderr,
                timed_out: false,
                elapsed,
            }),
        }
    }

    #[cfg(unix)]
    fn harden(&self, cmd: &mut Command) {
        let memory = self.config.memory_limit_bytes;
        // Runs in the forked child before exec.
        unsafe {
            cmd.pre_exec(move || {
                let mem = libc::rlimit {
                    rlim_cur: memory as libc::rlim_t,
                    rlim_max: memory as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
                    return Err(std::io::Error::last_os_error());
                }

                let zero = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                if libc::setrlimit(libc::RLIMIT_CORE, &zero) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // No new processes: fork/clone from user code fails.
                if libc::setrlimit(libc::RLIMIT_NPROC, &zero) != 0 {
                    return Err(std::io::Error::last_os_error());
                }

                // Requires privileges (userns or CAP_SYS_ADMIN); without
                // them the submission keeps the host network namespace.
                libc::unshare(libc::CLONE_NEWNET);

                Ok(())
            });
        }
    }
}

#[async_trait::async_trait]
impl Runner for ProcessRunner {
    #[tracing::instrument(skip(source), fields(source_len = source.len()))]
    async fn run(&self, source: &str, limit: Duration) -> Result<RunReport, RunError> {
        let limit = limit.min(self.config.max_timeout);
        let source_path = self.scratch_dir.join(format!("{}.py", Uuid::new_v4()));

        tokio::fs::write(&source_path, source)
            .await
            .map_err(|e| RunError::Internal {
                msg: format!("failed to stage source file: {e}"),
            })?;

        let result = self.execute(&source_path, limit).await;
        let _ = tokio::fs::remove_file(&source_path).await;
        result
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (String, bool) {
    let mut retained = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if retained.len() < cap {
                    let take = (cap - retained.len()).min(n);
                    retained.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&retained).into_owned(), truncated)
}

/// Coarse categorization of an uncaught fault from the exit status and the
/// last line of the traceback.
fn classify_fault(status: &std::process::ExitStatus, stderr: &str) -> (FaultKind, String) {
    if let Some(line) = last_nonempty_line(stderr) {
        let name = line.split(':').next().unwrap_or(line).trim();
        let kind = match name {
            "ZeroDivisionError" => Some(FaultKind::DivisionByZero),
            "TypeError" => Some(FaultKind::Type),
            "ValueError" => Some(FaultKind::Value),
            "NameError" => Some(FaultKind::Name),
            "IndexError" => Some(FaultKind::Index),
            "KeyError" => Some(FaultKind::Key),
            "RecursionError" => Some(FaultKind::Recursion),
            "MemoryError" => Some(FaultKind::ResourceExceeded),
            _ => None,
        };
        if let Some(kind) = kind {
            return (kind, line.to_string());
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            if signal == libc::SIGKILL {
                return (
                    FaultKind::ResourceExceeded,
                    "execution killed by resource limit".to_string(),
                );
            }
            return (
                FaultKind::Uncategorized,
                format!("execution terminated by signal {signal}"),
            );
        }
    }

    let message = last_nonempty_line(stderr)
        .map(|l| l.to_string())
        .unwrap_or_else(|| format!("execution exited with status {status}"));
    (FaultKind::Uncategorized, message)
}

fn last_nonempty_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
