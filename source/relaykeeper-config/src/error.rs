//! Error taxonomy for the supervised-core pipeline.
//!
//! Every variant here is surfaced to callers as a typed value; nothing in
//! this crate prints or formats for a terminal. The CLI boundary
//! (`relaykeeper`) is the only place these get wrapped into `miette::Report`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("parser directive sentinel not found in configuration file")]
    Missing,
    #[error("parser directive payload did not parse as JSONC: {0}")]
    Invalid(String),
    #[error("`@ParserSTART`/`@ParserEND` markers not found in configuration file")]
    MarkersMissing,
    #[error("configuration file exceeds the {cap_bytes} byte cap")]
    ConfigTooLarge { cap_bytes: u64 },
    #[error("directive schema version {found} is newer than the supported version {supported}")]
    UnsupportedVersionTooNew { found: u64, supported: u64 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching subscription: {0}")]
    Network(String),
    #[error("subscription endpoint returned status {0}")]
    Status(u16),
    #[error("subscription body exceeds the size cap")]
    TooLarge,
    #[error("subscription body could not be decoded as a URI list or base64 wrapper")]
    Decode,
}

#[derive(Debug, Error)]
#[error("invalid {scheme} URI: {reason}")]
pub struct DecodeError {
    pub scheme: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(scheme: &'static str, reason: impl Into<String>) -> Self {
        Self { scheme, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("core process is already running or starting")]
    AlreadyRunning,
    #[error("core binary not found at {0}")]
    BinaryMissing(String),
    #[error("failed to start core process: {0}")]
    StartFailed(String),
    #[error("restart attempts exhausted after {0} consecutive crashes")]
    RestartExhausted(u32),
    #[error("core process did not stop within the grace period")]
    StopTimeout,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control plane is disabled: core is not running")]
    ControlDisabled,
    #[error("control plane endpoint unreachable: {0}")]
    ControlUnreachable(String),
    #[error("control plane rejected the bearer token")]
    ControlAuth,
    #[error("control plane returned a bad request: {0}")]
    ControlBadRequest(String),
    #[error("latency probe timed out")]
    ProbeTimeout,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a refresh is already in progress")]
    RefreshBusy,
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("refresh would produce an empty outbound region; existing file preserved")]
    AssemblerEmpty,
    #[error("failed to commit configuration: {0}")]
    CommitFailed(String),
}

/// Non-fatal diagnostics the assembler logs and otherwise swallows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerWarning {
    SelectorEmptyOmitted { tag: String },
    SelectorCycleDetected { tags: Vec<String> },
    DuplicateTag { tag: String },
}

impl std::fmt::Display for AssemblerWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblerWarning::SelectorEmptyOmitted { tag } => {
                write!(f, "selector '{tag}' has no members after assembly; omitted")
            }
            AssemblerWarning::SelectorCycleDetected { tags } => {
                write!(f, "cycle detected among selectors: {}", tags.join(" -> "))
            }
            AssemblerWarning::DuplicateTag { tag } => {
                write!(f, "duplicate tag '{tag}' dropped on first collision")
            }
        }
    }
}
