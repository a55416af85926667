use thiserror::Error;

/// Orchestrator client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkloadError {
    /// Lost a race with another write, or an old object is still going away.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The orchestrator refused the object.
    #[error("rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// Could not reach the orchestrator, or it is overloaded.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

impl WorkloadError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

impl From<kube::Error> for WorkloadError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict(resp.message),
            kube::Error::Api(resp) if resp.code == 429 || resp.code >= 500 => {
                Self::Unavailable(resp.message)
            }
            kube::Error::Api(resp) => Self::Rejected {
                code: resp.code,
                message: resp.message,
            },
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::error::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_from_kube_error() {
        assert!(matches!(
            WorkloadError::from(api_error(409)),
            WorkloadError::Conflict(_)
        ));
        assert!(WorkloadError::from(api_error(503)).is_retryable());
        assert!(WorkloadError::from(api_error(429)).is_retryable());

        let rejected = WorkloadError::from(api_error(422));
        assert_eq!(
            rejected,
            WorkloadError::Rejected {
                code: 422,
                message: "status 422".into()
            }
        );
        assert!(!rejected.is_retryable());
    }
}
