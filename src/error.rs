use thiserror::Error;

#[derive(Error, Debug)]
pub enum CronbeatError {
    #[error("coordination store is not connected")]
    NotConnected,

    #[error("coordination store request timed out, endpoints {0:?} may be unreachable")]
    StoreTimeout(Vec<String>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("value may have changed: revision mismatch on {0}")]
    CasConflict(String),

    #[error("invalid job: {0}")]
    Validation(&'static str),

    #[error("invalid proc key [{0}]")]
    ProcKey(String),

    #[error("bad schedule expression {spec:?}: {source}")]
    Schedule {
        spec: String,
        source: cron::error::Error,
    },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CronbeatError>;
