/// Errors surfaced to the mediation layer through `AdEvent` and `show()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdError {
    /// Candidate fetch or a download failed for a structural reason.
    LoadServerError(String),
    /// A single candidate's resources could not be downloaded. Absorbed by the
    /// stock manager until every avenue in the cycle is exhausted.
    LoadDownloadFailed(String),
    NoUsableCandidates,
    ShowInvalidArgument(&'static str),
    ShowNotReady,
    ShowUnknownException(String),
}

impl AdError {
    pub fn is_download_failure(&self) -> bool {
        matches!(self, AdError::LoadDownloadFailed(_))
    }

    /// Stable short label, used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            AdError::LoadServerError(_) => "load_server_error",
            AdError::LoadDownloadFailed(_) => "load_download_failed",
            AdError::NoUsableCandidates => "no_usable_candidates",
            AdError::ShowInvalidArgument(_) => "show_invalid_argument",
            AdError::ShowNotReady => "show_not_ready",
            AdError::ShowUnknownException(_) => "show_unknown_exception",
        }
    }
}

impl std::fmt::Display for AdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdError::LoadServerError(msg) => write!(f, "load failed: server error: {msg}"),
            AdError::LoadDownloadFailed(msg) => write!(f, "load failed: resource download: {msg}"),
            AdError::NoUsableCandidates => write!(f, "load failed: no usable candidates"),
            AdError::ShowInvalidArgument(msg) => write!(f, "show failed: invalid argument: {msg}"),
            AdError::ShowNotReady => write!(f, "show failed: no ad ready"),
            AdError::ShowUnknownException(msg) => write!(f, "show failed: {msg}"),
        }
    }
}

impl std::error::Error for AdError {}
