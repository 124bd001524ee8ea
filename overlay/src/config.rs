use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide overlay settings: the chain length every dial uses and the
/// legacy-variant gate (§6.4), plus the handshake watchdog this
/// implementation adds (§9, §10.2). Callers load this once and share it as
/// an `Arc<OverlayConfig>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Chain length (>=1) every `dial` and inbound `ConnectRequest` uses.
    pub level: u8,
    /// Gates the ASN.1/Curve448 legacy variant. Always rejected by this
    /// implementation regardless of this flag — kept only so config files
    /// written against the legacy source still parse (see DESIGN.md, Open
    /// Question i).
    pub allow_insecure: bool,
    /// How long a handshake (scrambler exchange plus the following
    /// `TargetHeader`/`StatusByte` round trip) may take before the dialer
    /// gives up and tears the circuit down.
    #[serde(with = "handshake_timeout_secs")]
    pub handshake_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig { level: 3, allow_insecure: false, handshake_timeout: Duration::from_secs(20) }
    }
}

/// `serde` has no built-in (de)serializer for `Duration` that round-trips
/// through a single human-friendly field, so config files store the
/// handshake timeout as whole seconds.
mod handshake_timeout_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
