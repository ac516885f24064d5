use serde::{Deserialize, Serialize};

use crate::cmdline;
use crate::error::{CronbeatError, Result};

/// What kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum JobKind {
    Command = 1,
    Http = 2,
}

impl TryFrom<i32> for JobKind {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(JobKind::Command),
            2 => Ok(JobKind::Http),
            other => Err(format!("unknown job type {other}")),
        }
    }
}

impl From<JobKind> for i32 {
    fn from(kind: JobKind) -> i32 {
        kind as i32
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Command => write!(f, "command"),
            JobKind::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum HttpMethod {
    #[default]
    Get = 1,
    Post = 2,
}

impl TryFrom<i32> for HttpMethod {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(HttpMethod::Get),
            2 => Ok(HttpMethod::Post),
            other => Err(format!("unknown http method {other}")),
        }
    }
}

impl From<HttpMethod> for i32 {
    fn from(method: HttpMethod) -> i32 {
        method as i32
    }
}

/// Channel a failure notification goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum NotifyChannel {
    #[default]
    Mail = 1,
    Webhook = 2,
}

impl TryFrom<i32> for NotifyChannel {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(NotifyChannel::Mail),
            2 => Ok(NotifyChannel::Webhook),
            other => Err(format!("unknown notify channel {other}")),
        }
    }
}

impl From<NotifyChannel> for i32 {
    fn from(channel: NotifyChannel) -> i32 {
        channel as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum AssignStatus {
    #[default]
    Unassigned = 0,
    Assigned = 1,
}

impl TryFrom<i32> for AssignStatus {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(AssignStatus::Unassigned),
            1 => Ok(AssignStatus::Assigned),
            other => Err(format!("unknown assignment status {other}")),
        }
    }
}

impl From<AssignStatus> for i32 {
    fn from(status: AssignStatus) -> i32 {
        status as i32
    }
}

/// A schedulable unit of work, mirrored into the coordination store under
/// the assignment key of the node it runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    /// Raw command line, or URL (`url?body` for POST) for HTTP jobs.
    pub command: String,
    /// Seconds; 0 means unbounded.
    #[serde(default)]
    pub timeout: i64,
    /// Extra attempts after the first failure; <= 0 means no retry.
    #[serde(default)]
    pub retry_times: i32,
    /// Seconds between retries; 0 falls back to the growing backoff.
    #[serde(default)]
    pub retry_interval: i64,
    #[serde(rename = "job_type")]
    pub kind: JobKind,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(rename = "notify_type", default)]
    pub notify_channel: NotifyChannel,
    #[serde(default)]
    pub status: AssignStatus,
    /// User ids to notify on terminal failure.
    #[serde(rename = "notify_to", default)]
    pub notify_to: Vec<i64>,
    /// Cron expression (standard 5-field, seconds optional as a 6th).
    pub spec: String,
    /// UUID of the node this job is assigned to.
    pub run_on: String,
    #[serde(rename = "host_name", default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    /// Tokenized command, populated by [`Job::check`]; never stored.
    #[serde(skip)]
    pub argv: Vec<String>,
}

impl Job {
    /// Validate and prepare the job for execution.
    ///
    /// Trims the name, forces at least one retry whenever the retry
    /// interval is unset, and pre-tokenizes command jobs.
    pub fn check(&mut self) -> Result<()> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(CronbeatError::Validation("empty job name"));
        }
        if self.retry_interval == 0 {
            self.retry_times = 1;
        }
        if self.command.trim().is_empty() {
            return Err(CronbeatError::Validation("empty job command"));
        }
        if self.argv.is_empty() && self.kind == JobKind::Command {
            self.split_cmd();
        }
        Ok(())
    }

    pub fn split_cmd(&mut self) {
        self.argv = cmdline::split_command(&self.command);
    }

    /// Total attempt budget for one trigger.
    pub fn attempts(&self) -> i32 {
        1 + self.retry_times.max(0)
    }

    /// Parse the cron expression, accepting the standard 5-field form by
    /// prepending a seconds field.
    pub fn schedule(&self) -> Result<cron::Schedule> {
        let normalized = normalize_spec(&self.spec);
        normalized
            .parse()
            .map_err(|source| CronbeatError::Schedule {
                spec: self.spec.clone(),
                source,
            })
    }
}

/// The `cron` crate wants 6/7 fields; control planes hand out standard
/// 5-field expressions.
fn normalize_spec(spec: &str) -> String {
    let trimmed = spec.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}
