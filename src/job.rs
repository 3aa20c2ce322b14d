use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::decode::decode_json;
use crate::error::{Error, Result};
use crate::transport::HttpResponse;

/// Identifier of an asynchronous backend operation. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument("job id is empty".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Job state as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Pending,
    Success,
    Fail,
    Error,
    Unknown(String),
}

impl JobState {
    pub fn parse(s: &str) -> Self {
        match s {
            "Submitted" => Self::Submitted,
            "Running" => Self::Running,
            "Pending" => Self::Pending,
            "Success" => Self::Success,
            "Fail" => Self::Fail,
            "Error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Pending => "Pending",
            Self::Success => "Success",
            Self::Fail => "Fail",
            Self::Error => "Error",
            Self::Unknown(s) => s,
        }
    }

    /// States that always mean "keep waiting".
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Submitted | Self::Running | Self::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    #[serde(default)]
    pub percent_complete: Option<u32>,
    #[serde(default)]
    pub time_remaining: Option<String>,
    #[serde(default)]
    pub time_spent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJobStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    progress: Option<JobProgress>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusEnvelope {
    #[serde(default)]
    data: RawJobStatus,
}

/// One observation of a job, decoded from a status response.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    /// `data.message`, or failing that `data.result.message`.
    pub message: Option<String>,
    pub result: Option<Value>,
    pub job_id: Option<String>,
    pub progress: Option<JobProgress>,
}

impl From<StatusEnvelope> for JobStatus {
    fn from(env: StatusEnvelope) -> Self {
        let raw = env.data;
        let message = raw.message.or_else(|| {
            raw.result
                .as_ref()
                .and_then(|r| r.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Self {
            state: JobState::parse(&raw.status),
            message,
            result: raw.result,
            job_id: raw.job_id,
            progress: raw.progress,
        }
    }
}

impl JobStatus {
    /// The result payload, if it carries anything at all.
    pub fn payload(&self) -> Option<&Value> {
        self.result.as_ref().filter(|v| has_payload(v))
    }
}

/// `null`, `{}`, `[]` and `""` count as no payload.
pub fn has_payload(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[derive(Debug, Default, Deserialize)]
struct JobInit {
    #[serde(default, rename = "jobId")]
    job_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobInitEnvelope {
    #[serde(default)]
    data: JobInit,
}

/// Pulls the job id out of the standard response to a job-creating call.
pub fn get_job_id(resp: &HttpResponse) -> Result<JobHandle> {
    let decoded = decode_json::<JobInitEnvelope>(resp.body.clone())?;
    match decoded.value.data.job_id {
        Some(id) if !id.trim().is_empty() => JobHandle::new(id),
        _ => Err(Error::MissingJobId {
            body: decoded.raw_text(),
        }),
    }
}
