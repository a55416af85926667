//! ID types used across the control plane.

use crate::define_id;

define_id!(
    /// A user workspace sandbox.
    SandboxId,
    "sbx"
);

define_id!(
    /// One replica of the control-plane deployment. Used as the lease
    /// holder identity during leader election.
    ReplicaId,
    "rep"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_sandbox_id_roundtrip() {
        let id = SandboxId::new();
        let parsed: SandboxId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("sbx_"));
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let replica = ReplicaId::new().to_string();
        let err = SandboxId::parse(&replica).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_malformed_ids() {
        assert_eq!(SandboxId::parse(""), Err(IdError::Empty));
        assert_eq!(
            SandboxId::parse("sbx01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(IdError::MissingSeparator)
        );
        assert!(matches!(
            SandboxId::parse("sbx_not-a-ulid"),
            Err(IdError::InvalidUlid(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let id = ReplicaId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ReplicaId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_dns_label_is_lowercase() {
        let id = SandboxId::new();
        let label = id.dns_label();
        assert_eq!(label.len(), 26);
        assert!(label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in ".*") {
            let _ = SandboxId::parse(&s);
        }
    }
}
