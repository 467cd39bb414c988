//! MACsec types.

use std::fmt;
use std::str::FromStr;

/// MACsec cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    GcmAes128,
    GcmAes256,
    GcmAesXpn128,
    GcmAesXpn256,
}

impl CipherSuite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherSuite::GcmAes128 => "GCM-AES-128",
            CipherSuite::GcmAes256 => "GCM-AES-256",
            CipherSuite::GcmAesXpn128 => "GCM-AES-XPN-128",
            CipherSuite::GcmAesXpn256 => "GCM-AES-XPN-256",
        }
    }

    /// Key length in hex characters for this suite.
    pub fn cak_hex_len(&self) -> usize {
        match self {
            CipherSuite::GcmAes128 | CipherSuite::GcmAesXpn128 => 32,
            CipherSuite::GcmAes256 | CipherSuite::GcmAesXpn256 => 64,
        }
    }
}

impl FromStr for CipherSuite {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GCM-AES-128" => Ok(CipherSuite::GcmAes128),
            "GCM-AES-256" => Ok(CipherSuite::GcmAes256),
            "GCM-AES-XPN-128" => Ok(CipherSuite::GcmAesXpn128),
            "GCM-AES-XPN-256" => Ok(CipherSuite::GcmAesXpn256),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What MACsec does to traffic on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacsecPolicy {
    /// Authenticate only.
    IntegrityOnly,
    /// Authenticate and encrypt.
    Security,
}

impl MacsecPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacsecPolicy::IntegrityOnly => "integrity_only",
            MacsecPolicy::Security => "security",
        }
    }
}

impl FromStr for MacsecPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integrity_only" => Ok(MacsecPolicy::IntegrityOnly),
            "security" => Ok(MacsecPolicy::Security),
            _ => Err(()),
        }
    }
}

/// A fully-validated MACsec profile.
///
/// Construction goes through [`crate::macsec::validate_profile`]; a
/// profile held anywhere in the orchestrator has passed every field
/// check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacsecProfile {
    pub cipher_suite: CipherSuite,
    pub primary_cak: String,
    pub primary_ckn: String,
    pub policy: MacsecPolicy,
    pub send_sci: bool,
    pub mka_priority: u8,
    pub rekey_period: Option<u32>,
    pub replay_protect: bool,
    pub replay_window: u32,
}

/// MACsec orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct MacsecOrchStats {
    pub profiles_loaded: u64,
    pub profiles_removed: u64,
    pub ports_enabled: u64,
    pub ports_disabled: u64,
    pub enable_failures: u64,
    pub retries: u64,
    pub errors: u64,
}
