use thiserror::Error;

/// Failure of an external lookup. Every check decides its own fail-safe policy
/// for these instead of relying on unwinding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("{resource} is unavailable: {reason}")]
    Unavailable { resource: String, reason: String },
    #[error("{resource} timed out")]
    Timeout { resource: String },
}

pub type LookupResult<T> = Result<T, LookupError>;

impl LookupError {
    pub fn unavailable(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            Self::Unavailable { resource, .. } | Self::Timeout { resource } => resource,
        }
    }

    /// Map an HTTP or decoding failure onto the lookup taxonomy.
    pub fn from_anyhow(resource: impl Into<String>, error: &anyhow::Error) -> Self {
        let resource = resource.into();
        let timed_out = error
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(reqwest::Error::is_timeout);
        if timed_out {
            Self::Timeout { resource }
        } else {
            Self::Unavailable {
                resource,
                reason: format!("{error:#}"),
            }
        }
    }
}
