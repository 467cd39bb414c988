//! Declarative MACsec profile validation.
//!
//! Each field is described once (name, required flag, parser) and the
//! whole schema is evaluated up front, so no profile reaches side effects
//! half-validated.

use super::types::{CipherSuite, MacsecPolicy, MacsecProfile};
use switchd_orch_common::FieldValue;
use thiserror::Error;

/// Validation failure for a profile SET.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing mandatory field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("{field} requires companion field {companion}")]
    MissingCompanion {
        field: &'static str,
        companion: &'static str,
    },
}

#[derive(Default)]
struct ProfileBuilder {
    cipher_suite: Option<CipherSuite>,
    primary_cak: Option<String>,
    primary_ckn: Option<String>,
    policy: Option<MacsecPolicy>,
    send_sci: Option<bool>,
    mka_priority: Option<u8>,
    rekey_period: Option<u32>,
    replay_protect: Option<bool>,
    replay_window: Option<u32>,
}

struct FieldSpec {
    name: &'static str,
    required: bool,
    apply: fn(&mut ProfileBuilder, &str) -> Result<(), String>,
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true/false, got {}", other)),
    }
}

fn is_hex(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_hexdigit())
}

const SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "cipher_suite",
        required: true,
        apply: |b, v| {
            b.cipher_suite = Some(v.parse().map_err(|_| format!("unknown suite {}", v))?);
            Ok(())
        },
    },
    FieldSpec {
        name: "primary_cak",
        required: true,
        apply: |b, v| {
            if !is_hex(v) {
                return Err("CAK must be hex".to_string());
            }
            b.primary_cak = Some(v.to_string());
            Ok(())
        },
    },
    FieldSpec {
        name: "primary_ckn",
        required: true,
        apply: |b, v| {
            if !is_hex(v) || v.len() > 64 {
                return Err("CKN must be hex, at most 64 chars".to_string());
            }
            b.primary_ckn = Some(v.to_string());
            Ok(())
        },
    },
    FieldSpec {
        name: "policy",
        required: false,
        apply: |b, v| {
            b.policy = Some(v.parse().map_err(|_| format!("unknown policy {}", v))?);
            Ok(())
        },
    },
    FieldSpec {
        name: "send_sci",
        required: false,
        apply: |b, v| {
            b.send_sci = Some(parse_bool(v)?);
            Ok(())
        },
    },
    FieldSpec {
        name: "priority",
        required: false,
        apply: |b, v| {
            b.mka_priority = Some(v.parse().map_err(|_| "expected 0-255".to_string())?);
            Ok(())
        },
    },
    FieldSpec {
        name: "rekey_period",
        required: false,
        apply: |b, v| {
            let period: u32 = v.parse().map_err(|_| "expected seconds".to_string())?;
            if period == 0 {
                return Err("rekey_period must be nonzero".to_string());
            }
            b.rekey_period = Some(period);
            Ok(())
        },
    },
    FieldSpec {
        name: "replay_protect",
        required: false,
        apply: |b, v| {
            b.replay_protect = Some(parse_bool(v)?);
            Ok(())
        },
    },
    FieldSpec {
        name: "replay_window",
        required: false,
        apply: |b, v| {
            b.replay_window = Some(v.parse().map_err(|_| "expected a frame count".to_string())?);
            Ok(())
        },
    },
];

/// Validates a profile SET's field-values against the schema.
pub fn validate_profile(fvs: &[FieldValue]) -> Result<MacsecProfile, ValidationError> {
    let mut builder = ProfileBuilder::default();

    for spec in SCHEMA {
        match fvs.iter().find(|(f, _)| f == spec.name) {
            Some((_, value)) => {
                (spec.apply)(&mut builder, value).map_err(|message| {
                    ValidationError::InvalidValue {
                        field: spec.name,
                        message,
                    }
                })?;
            }
            None if spec.required => return Err(ValidationError::MissingField(spec.name)),
            None => {}
        }
    }

    let cipher_suite = builder
        .cipher_suite
        .ok_or(ValidationError::MissingField("cipher_suite"))?;
    let primary_cak = builder
        .primary_cak
        .ok_or(ValidationError::MissingField("primary_cak"))?;

    if primary_cak.len() != cipher_suite.cak_hex_len() {
        return Err(ValidationError::InvalidValue {
            field: "primary_cak",
            message: format!(
                "{} requires a {}-char key",
                cipher_suite,
                cipher_suite.cak_hex_len()
            ),
        });
    }
    if builder.replay_window.is_some() && builder.replay_protect != Some(true) {
        return Err(ValidationError::MissingCompanion {
            field: "replay_window",
            companion: "replay_protect",
        });
    }

    Ok(MacsecProfile {
        cipher_suite,
        primary_cak,
        primary_ckn: builder
            .primary_ckn
            .ok_or(ValidationError::MissingField("primary_ckn"))?,
        policy: builder.policy.unwrap_or(MacsecPolicy::Security),
        send_sci: builder.send_sci.unwrap_or(true),
        mka_priority: builder.mka_priority.unwrap_or(255),
        rekey_period: builder.rekey_period,
        replay_protect: builder.replay_protect.unwrap_or(false),
        replay_window: builder.replay_window.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fv(field: &str, value: &str) -> FieldValue {
        (field.to_string(), value.to_string())
    }

    fn minimal() -> Vec<FieldValue> {
        vec![
            fv("cipher_suite", "GCM-AES-128"),
            fv("primary_cak", "0123456789abcdef0123456789abcdef"),
            fv("primary_ckn", "6162636465666768"),
        ]
    }

    #[test]
    fn test_minimal_profile_defaults() {
        let profile = validate_profile(&minimal()).unwrap();
        assert_eq!(profile.cipher_suite, CipherSuite::GcmAes128);
        assert_eq!(profile.policy, MacsecPolicy::Security);
        assert!(profile.send_sci);
        assert_eq!(profile.mka_priority, 255);
        assert!(!profile.replay_protect);
        assert_eq!(profile.rekey_period, None);
    }

    #[test]
    fn test_missing_mandatory_field() {
        let fvs = vec![
            fv("cipher_suite", "GCM-AES-128"),
            fv("primary_cak", "0123456789abcdef0123456789abcdef"),
        ];
        assert_eq!(
            validate_profile(&fvs),
            Err(ValidationError::MissingField("primary_ckn"))
        );
    }

    #[test]
    fn test_cak_length_must_match_suite() {
        let mut fvs = minimal();
        fvs[0] = fv("cipher_suite", "GCM-AES-256");
        let err = validate_profile(&fvs).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidValue { field: "primary_cak", .. }
        ));
    }

    #[test]
    fn test_non_hex_key_rejected() {
        let mut fvs = minimal();
        fvs[1] = fv("primary_cak", "not-hex-at-all-zzzzzzzzzzzzzzzzz");
        assert!(validate_profile(&fvs).is_err());
    }

    #[test]
    fn test_replay_window_requires_replay_protect() {
        let mut fvs = minimal();
        fvs.push(fv("replay_window", "64"));
        assert_eq!(
            validate_profile(&fvs),
            Err(ValidationError::MissingCompanion {
                field: "replay_window",
                companion: "replay_protect",
            })
        );

        fvs.push(fv("replay_protect", "true"));
        let profile = validate_profile(&fvs).unwrap();
        assert!(profile.replay_protect);
        assert_eq!(profile.replay_window, 64);
    }

    #[test]
    fn test_full_profile() {
        let mut fvs = minimal();
        fvs.extend([
            fv("policy", "integrity_only"),
            fv("send_sci", "false"),
            fv("priority", "32"),
            fv("rekey_period", "3600"),
        ]);
        let profile = validate_profile(&fvs).unwrap();
        assert_eq!(profile.policy, MacsecPolicy::IntegrityOnly);
        assert!(!profile.send_sci);
        assert_eq!(profile.mka_priority, 32);
        assert_eq!(profile.rekey_period, Some(3600));
    }
}
