//! External command stage tool
//!
//! Runs one process per stage invocation and translates its stdout into
//! progress reports and log lines.
//!
//! ## Line protocol (stdout)
//!
//! | line | effect |
//! |---|---|
//! | `PROGRESS <n> [detail]` | progress report, clamped below 100 |
//! | `RESULT <json>` | payload handed to the next stage |
//! | `INFO/WARN/ERROR/DEBUG <msg>` | log line at that level |
//! | anything else | INFO log line |
//!
//! Arguments may contain `{input}` (media path) and `{stage}` (stage key).
//! The process also receives `CINESUM_RUN_ID`, `CINESUM_STAGE`,
//! `CINESUM_CONFIG` (JSON) and, when present, `CINESUM_PREVIOUS` (JSON).

use std::process::Stdio;

use contracts::{
    CommandSpec, ContractError, LogLevel, ProgressReporter, StageId, StageInput, StageOutput,
    StageTool, MAX_RUNNING_PROGRESS,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::AdapterError;

/// One parsed stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum ToolLine {
    Progress { progress: f64, detail: Option<String> },
    Result(Value),
    Log(LogLevel, String),
}

/// Parse one stdout line of the tool protocol
pub fn parse_line(line: &str) -> ToolLine {
    let line = line.trim_end();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "PROGRESS" => {
            let (value, detail) = match rest.split_once(char::is_whitespace) {
                Some((value, detail)) => (value, Some(detail.trim().to_string())),
                None => (rest, None),
            };
            match value.trim_end_matches('%').parse::<f64>() {
                Ok(progress) => ToolLine::Progress { progress, detail },
                Err(_) => ToolLine::Log(LogLevel::Info, line.to_string()),
            }
        }
        "RESULT" => match serde_json::from_str(rest) {
            Ok(value) => ToolLine::Result(value),
            Err(_) => ToolLine::Log(LogLevel::Warn, format!("malformed RESULT line: {rest}")),
        },
        "INFO" => ToolLine::Log(LogLevel::Info, rest.to_string()),
        "WARN" | "WARNING" => ToolLine::Log(LogLevel::Warn, rest.to_string()),
        "ERROR" => ToolLine::Log(LogLevel::Error, rest.to_string()),
        "DEBUG" => ToolLine::Log(LogLevel::Debug, rest.to_string()),
        _ => ToolLine::Log(LogLevel::Info, line.to_string()),
    }
}

/// Stage tool backed by an external process
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    stage: StageId,
    spec: CommandSpec,
}

impl CommandTool {
    pub fn new(stage: StageId, spec: CommandSpec) -> Self {
        let name = format!("{}:{}", stage.key(), spec.program);
        Self { name, stage, spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn build_command(&self, input: &StageInput) -> Command {
        let media = input.media.path().display().to_string();
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(self.spec.args.iter().map(|arg| {
            arg.replace("{input}", &media)
                .replace("{stage}", self.stage.key())
        }));
        cmd.envs(&self.spec.env)
            .env("CINESUM_RUN_ID", input.run_id.to_string())
            .env("CINESUM_STAGE", self.stage.key())
            .env(
                "CINESUM_CONFIG",
                serde_json::to_string(input.config.as_ref()).unwrap_or_default(),
            );
        if let Some(previous) = &input.previous {
            cmd.env("CINESUM_PREVIOUS", previous.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn kill(&self, child: &mut Child) {
        if let Err(e) = child.kill().await {
            warn!(program = %self.spec.program, error = %e, "failed to kill cancelled tool");
        }
    }
}

impl StageTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        input: StageInput,
        progress: ProgressReporter,
    ) -> Result<StageOutput, ContractError> {
        let program = self.spec.program.clone();
        let mut child = self
            .build_command(&input)
            .spawn()
            .map_err(|source| AdapterError::Spawn {
                program: program.clone(),
                source,
            })?;
        info!(stage = %self.stage.key(), program = %program, pid = ?child.id(), "tool process spawned");

        let stdout = child.stdout.take().ok_or_else(|| AdapterError::Output {
            program: program.clone(),
            source: std::io::Error::other("stdout not captured"),
        })?;
        // Tools echo file names in whatever encoding they like
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut stdout = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut payload = None;
        loop {
            buf.clear();
            let read = tokio::select! {
                read = stdout.read_until(b'\n', &mut buf) => read,
                _ = progress.cancelled() => {
                    self.kill(&mut child).await;
                    return Err(ContractError::Cancelled { stage: self.stage });
                }
            };
            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(source) => {
                    self.kill(&mut child).await;
                    return Err(AdapterError::Output { program, source }.into());
                }
            }

            match parse_line(&String::from_utf8_lossy(&buf)) {
                ToolLine::Progress { progress: p, detail } => {
                    let p = p.min(MAX_RUNNING_PROGRESS);
                    match detail {
                        Some(detail) => progress.report_with_detail(p, detail)?,
                        None => progress.report(p)?,
                    }
                }
                ToolLine::Result(value) => payload = Some(value),
                ToolLine::Log(level, message) => progress.log(level, message),
            }
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|source| AdapterError::Output {
                program: program.clone(),
                source,
            })?,
            _ = progress.cancelled() => {
                self.kill(&mut child).await;
                return Err(ContractError::Cancelled { stage: self.stage });
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            progress.log(LogLevel::Debug, format!("stderr: {line}"));
        }

        if !status.success() {
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("{program} failed with {status}"));
            debug!(stage = %self.stage.key(), %status, "tool process failed");
            return Err(AdapterError::Exit {
                program,
                status: status.to_string(),
                message,
            }
            .into());
        }

        Ok(StageOutput { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_line("PROGRESS 42.5"),
            ToolLine::Progress {
                progress: 42.5,
                detail: None
            }
        );
        assert_eq!(
            parse_line("PROGRESS 10% decoding audio"),
            ToolLine::Progress {
                progress: 10.0,
                detail: Some("decoding audio".into())
            }
        );
        assert_eq!(
            parse_line("PROGRESS soon"),
            ToolLine::Log(LogLevel::Info, "PROGRESS soon".into())
        );
    }

    #[test]
    fn test_parse_levels_and_result() {
        assert_eq!(
            parse_line("WARN low disk space"),
            ToolLine::Log(LogLevel::Warn, "low disk space".into())
        );
        assert_eq!(
            parse_line("Found 2 unique speakers."),
            ToolLine::Log(LogLevel::Info, "Found 2 unique speakers.".into())
        );
        assert_eq!(
            parse_line(r#"RESULT {"topics": 5}"#),
            ToolLine::Result(serde_json::json!({"topics": 5}))
        );
        assert!(matches!(
            parse_line("RESULT {not json"),
            ToolLine::Log(LogLevel::Warn, _)
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use contracts::{MediaInput, PipelineConfig, StageReport};
        use std::collections::HashMap;
        use std::sync::Arc;
        use std::time::{Duration, Instant};
        use tokio_util::sync::CancellationToken;

        fn sh(script: &str) -> CommandSpec {
            CommandSpec {
                program: "sh".into(),
                args: vec!["-c".into(), script.into()],
                env: HashMap::new(),
                retries: 0,
                retry_backoff_ms: 10,
            }
        }

        fn input() -> StageInput {
            StageInput {
                run_id: 7,
                stage: StageId::Summarization,
                media: MediaInput::new("/media/talk.mp4"),
                previous: Some(serde_json::json!({"speakers": 2})),
                config: Arc::new(PipelineConfig::default()),
            }
        }

        #[tokio::test]
        async fn test_command_reports_progress_and_result() {
            let tool = CommandTool::new(
                StageId::Summarization,
                sh(r#"echo "PROGRESS 50 halfway"; echo "hello from $CINESUM_STAGE"; echo 'RESULT {"ok":true}'"#),
            );
            let (reporter, mut rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            let output = tool.run(input(), reporter).await.unwrap();
            assert_eq!(output.payload, Some(serde_json::json!({"ok": true})));

            let reports: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
            assert!(matches!(
                &reports[0],
                StageReport::Progress { progress, detail: Some(d) } if *progress == 50.0 && d == "halfway"
            ));
            assert!(matches!(
                &reports[1],
                StageReport::Log(entry) if entry.message == "hello from summarization"
            ));
        }

        #[tokio::test]
        async fn test_command_substitutes_input() {
            let mut spec = sh(r#"echo "INFO got $0""#);
            spec.args.push("{input}".into());
            let tool = CommandTool::new(StageId::Summarization, spec);
            let (reporter, mut rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            tool.run(input(), reporter).await.unwrap();
            match rx.try_recv().unwrap() {
                StageReport::Log(entry) => assert_eq!(entry.message, "got /media/talk.mp4"),
                other => panic!("unexpected report: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_command_failure_uses_stderr() {
            let tool = CommandTool::new(
                StageId::Summarization,
                sh("echo 'connection refused' >&2; exit 3"),
            );
            let (reporter, _rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            let err = tool.run(input(), reporter).await.unwrap_err();
            assert_eq!(err.stage_detail(), "connection refused");
        }

        #[tokio::test]
        async fn test_command_output_with_invalid_utf8() {
            let tool = CommandTool::new(
                StageId::Summarization,
                sh(r#"printf 'INFO writing caf\351.mp4\n'; echo 'PROGRESS 50'"#),
            );
            let (reporter, mut rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            tool.run(input(), reporter).await.unwrap();
            let reports: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
            assert!(matches!(
                &reports[0],
                StageReport::Log(entry) if entry.message == "writing caf\u{FFFD}.mp4"
            ));
            assert!(matches!(
                &reports[1],
                StageReport::Progress { progress, .. } if *progress == 50.0
            ));
        }

        #[tokio::test]
        async fn test_command_failure_keeps_invalid_utf8_stderr() {
            let tool = CommandTool::new(
                StageId::Summarization,
                sh(r#"printf 'cannot open caf\351.mp4\n' >&2; exit 1"#),
            );
            let (reporter, _rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            let err = tool.run(input(), reporter).await.unwrap_err();
            assert_eq!(err.stage_detail(), "cannot open caf\u{FFFD}.mp4");
        }

        #[tokio::test]
        async fn test_command_spawn_failure() {
            let tool = CommandTool::new(
                StageId::Summarization,
                CommandSpec {
                    program: "/nonexistent/cinesum-tool".into(),
                    ..sh("")
                },
            );
            let (reporter, _rx) =
                ProgressReporter::channel(StageId::Summarization, CancellationToken::new());

            let err = tool.run(input(), reporter).await.unwrap_err();
            assert!(matches!(err, ContractError::Tool { .. }), "got: {err}");
        }

        #[tokio::test]
        async fn test_command_killed_on_cancel() {
            let tool = CommandTool::new(StageId::Summarization, sh("sleep 10"));
            let cancel = CancellationToken::new();
            let (reporter, _rx) = ProgressReporter::channel(StageId::Summarization, cancel.clone());

            let started = Instant::now();
            let handle = tokio::spawn(async move { tool.run(input(), reporter).await });
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();

            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_cancelled());
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
