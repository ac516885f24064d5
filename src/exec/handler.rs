use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::exec::RunContext;
use crate::job::{HttpMethod, Job, JobKind};
use crate::proc::RunTracker;

/// Cap and default for HTTP job timeouts, seconds.
pub const HTTP_EXEC_TIMEOUT: i64 = 300;

/// Outcome of one handler invocation. Output is captured even when the
/// attempt failed.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: String) -> Self {
        Self {
            output,
            error: None,
        }
    }

    pub fn failure(output: String, error: impl Into<String>) -> Self {
        Self {
            output,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Closed set of handler variants, selected by the job's type
/// discriminator. Adding a job type means adding a variant here.
#[derive(Debug, Clone, Copy)]
pub enum JobHandler {
    Command(CommandHandler),
    Http(HttpHandler),
}

impl JobHandler {
    pub fn for_job(job: &Job) -> Self {
        match job.kind {
            JobKind::Command => JobHandler::Command(CommandHandler),
            JobKind::Http => JobHandler::Http(HttpHandler),
        }
    }

    pub async fn execute(&self, job: &Job, ctx: &RunContext) -> ExecutionResult {
        match self {
            JobHandler::Command(h) => h.execute(job, ctx).await,
            JobHandler::Http(h) => h.execute(job, ctx).await,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandHandler;

impl CommandHandler {
    pub async fn execute(&self, job: &Job, ctx: &RunContext) -> ExecutionResult {
        if job.argv.is_empty() {
            return ExecutionResult::failure(String::new(), "command is not tokenized");
        }

        let mut command = Command::new(&job.argv[0]);
        command
            .args(&job.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(job_id = job.id, error = %err, "failed to spawn command");
                return ExecutionResult::failure(String::new(), err.to_string());
            }
        };

        // the run is observable from the moment we know its pid
        let run_id = child.id().map(i64::from).unwrap_or(0);
        let tracker = RunTracker::new(
            ctx.coord.clone(),
            &job.run_on,
            job.id,
            run_id,
            ctx.proc_ttl_secs,
        );
        if let Err(err) = tracker.start().await {
            tracing::warn!(
                job_id = job.id,
                error = %err,
                "run heartbeat registration failed, continuing without crash tracking"
            );
        }

        let result = wait_with_output(child, job.timeout).await;
        tracker.stop().await;
        result
    }
}

/// Wait for the child, killing it when the deadline passes. Stdout and
/// stderr are drained concurrently into one combined buffer.
async fn wait_with_output(mut child: Child, timeout_secs: i64) -> ExecutionResult {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(drain(stdout));
    let err_task = tokio::spawn(drain(stderr));

    let mut timed_out = false;
    let status = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs as u64), child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                timed_out = true;
                let _ = child.start_kill();
                child.wait().await
            }
        }
    } else {
        child.wait().await
    };

    let mut output = String::new();
    if let Ok(bytes) = out_task.await {
        output.push_str(&String::from_utf8_lossy(&bytes));
    }
    if let Ok(bytes) = err_task.await {
        output.push_str(&String::from_utf8_lossy(&bytes));
    }

    if timed_out {
        return ExecutionResult::failure(output, format!("timed out after {timeout_secs}s"));
    }
    match status {
        Ok(status) if status.success() => ExecutionResult::success(output),
        Ok(status) => ExecutionResult::failure(output, format!("exit status {:?}", status.code())),
        Err(err) => ExecutionResult::failure(output, err.to_string()),
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

#[derive(Debug, Clone, Copy)]
pub struct HttpHandler;

impl HttpHandler {
    pub async fn execute(&self, job: &Job, ctx: &RunContext) -> ExecutionResult {
        // no OS process behind an HTTP run; run id 0 keeps it observable
        // through the same prefix
        let tracker = RunTracker::new(ctx.coord.clone(), &job.run_on, job.id, 0, ctx.proc_ttl_secs);
        if let Err(err) = tracker.start().await {
            tracing::warn!(
                job_id = job.id,
                error = %err,
                "run heartbeat registration failed, continuing without crash tracking"
            );
        }

        let result = self.dispatch(job, ctx).await;
        tracker.stop().await;
        result
    }

    async fn dispatch(&self, job: &Job, ctx: &RunContext) -> ExecutionResult {
        let mut timeout = job.timeout;
        if timeout <= 0 || timeout > HTTP_EXEC_TIMEOUT {
            timeout = HTTP_EXEC_TIMEOUT;
        }
        let deadline = Duration::from_secs(timeout as u64);

        let request = match job.http_method {
            HttpMethod::Get => ctx.http.get(&job.command).timeout(deadline),
            HttpMethod::Post => {
                let fields: Vec<&str> = job.command.split('?').collect();
                let url = fields[0];
                let body = fields.get(1).copied().unwrap_or("").to_string();
                ctx.http
                    .post(url)
                    .timeout(deadline)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
            }
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if status == reqwest::StatusCode::OK {
                    ExecutionResult::success(text)
                } else {
                    ExecutionResult::failure(text, format!("response status code is not 200 ({status})"))
                }
            }
            Err(err) => ExecutionResult::failure(String::new(), err.to_string()),
        }
    }
}
