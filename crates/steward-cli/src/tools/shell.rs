//! Shell command execution

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000;
/// Maximum number of lines before truncation
const MAX_OUTPUT_LINES: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Contributes `execute_command`
pub struct ShellProvider {
    cwd: PathBuf,
}

impl ShellProvider {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl CapabilityProvider for ShellProvider {
    fn name(&self) -> &str {
        "shell"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        vec![Arc::new(ExecuteCommandTool {
            cwd: self.cwd.clone(),
        })]
    }
}

/// Runs a command through `sh -c` in the session directory
pub struct ExecuteCommandTool {
    cwd: PathBuf,
}

/// Accumulates one output stream up to the size and line limits
#[derive(Default)]
struct Captured {
    text: String,
    lines: usize,
    truncated: bool,
}

impl Captured {
    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.lines >= MAX_OUTPUT_LINES || self.text.len() + line.len() > MAX_OUTPUT_SIZE {
            self.truncated = true;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn finish(mut self, stream: &str) -> String {
        if self.truncated {
            self.text.push_str(&format!(
                "\n\n... ({} truncated at {} lines / {}KB)",
                stream,
                self.lines,
                MAX_OUTPUT_SIZE / 1024
            ));
        }
        self.text
    }
}

/// One line of raw output without its terminator; invalid UTF-8 becomes U+FFFD
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the session workspace. Returns stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Timeout in seconds (default 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let command = match arguments.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("Missing 'command' argument"),
        };

        let timeout_secs = arguments
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        tracing::debug!(command, cwd = %self.cwd.display(), "executing command");

        let mut child = match Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => return ToolResult::error("Failed to capture command output"),
        };

        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        // Partial lines survive a lost select race inside these buffers
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out = Captured::default();
        let mut err = Captured::default();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let deadline =
            tokio::time::Instant::now() + tokio::time::Duration::from_secs(timeout_secs);

        // Drain both pipes before waiting so a chatty child cannot block on a full pipe
        while stdout_open || stderr_open {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return ToolResult::error("Command cancelled");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = child.kill().await;
                    return ToolResult::error(format!(
                        "{}\n{}\n\nCommand timed out after {} seconds",
                        out.text, err.text, timeout_secs
                    ));
                }
                read = stdout_reader.read_until(b'\n', &mut out_buf), if stdout_open => match read {
                    Ok(n) => {
                        if !out_buf.is_empty() {
                            out.push_line(&decode_line(&out_buf));
                            out_buf.clear();
                        }
                        stdout_open = n > 0;
                    }
                    Err(e) => {
                        err.push_line(&format!("Stdout read error: {}", e));
                        stdout_open = false;
                    }
                },
                read = stderr_reader.read_until(b'\n', &mut err_buf), if stderr_open => match read {
                    Ok(n) => {
                        if !err_buf.is_empty() {
                            err.push_line(&decode_line(&err_buf));
                            err_buf.clear();
                        }
                        stderr_open = n > 0;
                    }
                    Err(e) => {
                        err.push_line(&format!("Stderr read error: {}", e));
                        stderr_open = false;
                    }
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return ToolResult::error("Command cancelled");
            }
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return ToolResult::error(format!(
                    "Command timed out after {} seconds", timeout_secs
                ));
            }
            status = child.wait() => status,
        };

        let mut result = out.finish("stdout");
        let error_output = err.finish("stderr");
        if !error_output.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&error_output);
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }

        match status {
            Ok(exit_status) if exit_status.success() => ToolResult::text(result),
            Ok(exit_status) => {
                let code = exit_status.code().unwrap_or(-1);
                ToolResult::error(format!("{}\n\nCommand exited with code {}", result, code))
            }
            Err(e) => ToolResult::error(format!("Failed to wait for command: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ExecuteCommandTool {
        ExecuteCommandTool {
            cwd: std::env::temp_dir(),
        }
    }

    async fn run(args: serde_json::Value) -> ToolResult {
        tool()
            .execute("call_1", args, CancellationToken::new())
            .await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo() {
        let result = run(json!({"command": "echo hello"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_captured() {
        let result = run(json!({"command": "echo out; echo err 1>&2"})).await;
        assert!(!result.is_error);
        let text = result.text_content();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let result = run(json!({"command": "exit 3"})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("exited with code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let result = run(json!({"command": "sleep 5", "timeout": 1})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = std::env::temp_dir().join(format!("steward-shell-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("marker.txt"), "x").unwrap();
        let tool = ExecuteCommandTool { cwd: dir };
        let result = tool
            .execute("call_1", json!({"command": "ls"}), CancellationToken::new())
            .await;
        assert!(result.text_content().contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let result = run(json!({})).await;
        assert!(result.is_error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let result = run(json!({"command": "printf 'a\\377b\\nnext\\n'"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "a\u{FFFD}b\nnext");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_binary_flood_does_not_stall() {
        let started = std::time::Instant::now();
        let result = run(json!({
            "command": "printf 'start\\n'; head -c 400000 /dev/urandom; echo; echo done",
            "timeout": 30
        }))
        .await;
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
        assert!(!result.is_error, "{}", result.text_content());
        let text = result.text_content();
        assert!(text.starts_with("start"));
        assert!(!text.contains("read error"));
        assert!(!text.contains("timed out"));
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"abc\r\n"), "abc");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\xff\n"), "\u{FFFD}");
    }

    #[test]
    fn test_captured_truncates_by_lines() {
        let mut captured = Captured::default();
        for i in 0..(MAX_OUTPUT_LINES + 10) {
            captured.push_line(&i.to_string());
        }
        assert_eq!(captured.lines, MAX_OUTPUT_LINES);
        assert!(captured.finish("stdout").contains("stdout truncated"));
    }
}
