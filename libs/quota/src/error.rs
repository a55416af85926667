use thiserror::Error;

/// How a quota error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad settings or a request the settings cannot satisfy. Rejected before
    /// any mutation.
    Configuration,
    /// The allocatable ceiling is reached. Rejected, usage unchanged.
    ResourceExhaustion,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ResourceExhaustion => "resource_exhaustion",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("{resource} over-commit rate must be at least 1")]
    InvalidOverCommitRate { resource: &'static str },

    #[error("default {resource} per device must be greater than zero")]
    InvalidResourceDefault { resource: &'static str },

    #[error("no GPU resource keys configured")]
    NoGpuResourceKeys,

    #[error("GPU resource key configured more than once: {0}")]
    DuplicateGpuResourceKey(String),

    #[error("unsupported GPU vendor: {0}")]
    UnsupportedGpuVendor(String),

    #[error("GPU requested but no default GPU driver is configured")]
    GpuDriverNotConfigured,

    #[error("allocatable limit reached: {in_use} of {limit} sandboxes running")]
    AllocatableExhausted { limit: u64, in_use: u64 },

    #[error("sandbox must request at least one device")]
    EmptyRequest,

    #[error("requested {device_count} devices exceeds what can be represented")]
    RequestTooLarge { device_count: u32 },
}

impl QuotaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AllocatableExhausted { .. } => ErrorClass::ResourceExhaustion,
            _ => ErrorClass::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class() {
        let exhausted = QuotaError::AllocatableExhausted { limit: 5, in_use: 5 };
        assert_eq!(exhausted.class(), ErrorClass::ResourceExhaustion);
        assert_eq!(
            QuotaError::UnsupportedGpuVendor("intel.com/gpu".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            QuotaError::InvalidOverCommitRate { resource: "cpu" }.class(),
            ErrorClass::Configuration
        );
    }

    #[test]
    fn test_error_display() {
        let err = QuotaError::AllocatableExhausted { limit: 5, in_use: 5 };
        assert_eq!(err.to_string(), "allocatable limit reached: 5 of 5 sandboxes running");
    }
}
