//! Forwarding rule data model.
//!
//! A [`ForwardRule`] declares one forwarding intent: listen on a local port,
//! speak one of the supported protocols, and (for relay-style protocols)
//! hand traffic to a remote endpoint. Rules are persisted by the rule store
//! and realized as engine processes by the supervisor.

use crate::error::{AuroraError, AuroraResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Forwarding protocol spoken by the engine for one rule.
///
/// Serialized names match the engine's listener scheme names exactly
/// (`relay+tls`, not `relay_tls`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "socks5")]
    Socks5,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "ss")]
    Ss,
    #[serde(rename = "relay+tls")]
    RelayTls,
    #[serde(rename = "relay+ws")]
    RelayWs,
    #[serde(rename = "mwss")]
    Mwss,
    #[serde(rename = "relay+wss")]
    RelayWss,
}

impl Protocol {
    /// The engine's scheme name for this protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Socks5 => "socks5",
            Protocol::Http => "http",
            Protocol::Ss => "ss",
            Protocol::RelayTls => "relay+tls",
            Protocol::RelayWs => "relay+ws",
            Protocol::Mwss => "mwss",
            Protocol::RelayWss => "relay+wss",
        }
    }

    /// Proxy-style protocols open a listener only; the remote endpoint
    /// fields of the rule are ignored. Relay-style protocols forward every
    /// connection to `remote_ip:remote_port`.
    pub fn is_proxy_style(&self) -> bool {
        matches!(self, Protocol::Socks5 | Protocol::Http | Protocol::Ss)
    }

    /// Whether `username`/`password` are meaningful for this protocol.
    pub fn supports_credentials(&self) -> bool {
        self.is_proxy_style()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AuroraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "socks5" => Ok(Protocol::Socks5),
            "http" => Ok(Protocol::Http),
            "ss" => Ok(Protocol::Ss),
            "relay+tls" => Ok(Protocol::RelayTls),
            "relay+ws" => Ok(Protocol::RelayWs),
            "mwss" => Ok(Protocol::Mwss),
            "relay+wss" => Ok(Protocol::RelayWss),
            other => Err(AuroraError::Validation(format!(
                "unknown protocol: {other}"
            ))),
        }
    }
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}
fn default_enabled() -> bool {
    true
}

/// A persisted forwarding rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRule {
    /// Store-assigned identifier, immutable after creation.
    pub id: i64,
    /// Local listen port, unique across all rules.
    pub local_port: u16,
    /// Destination host; ignored for proxy-style protocols.
    #[serde(default)]
    pub remote_ip: String,
    /// Destination port; ignored for proxy-style protocols.
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    /// Listener credentials, meaningful only for authenticating protocols.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Desired run state; the supervisor's sole signal.
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// ISO-8601 date (`YYYY-MM-DD`). Display/billing metadata: an expired
    /// rule keeps running until an operator disables it.
    #[serde(default)]
    pub expire_date: Option<String>,
}

impl ForwardRule {
    /// Whether this rule's `expire_date` lies strictly before `today`
    /// (both ISO-8601 dates). Rules without an expiry never expire.
    pub fn is_expired(&self, today: &str) -> bool {
        match self.expire_date.as_deref() {
            Some(date) => {
                // Datetime strings compare on their date part.
                let date = date.get(..10).unwrap_or(date);
                let today = today.get(..10).unwrap_or(today);
                date < today
            }
            None => false,
        }
    }

    /// Apply a partial update, leaving unset fields unchanged.
    pub fn apply(&mut self, patch: RulePatch) {
        if let Some(v) = patch.local_port {
            self.local_port = v;
        }
        if let Some(v) = patch.remote_ip {
            self.remote_ip = v;
        }
        if let Some(v) = patch.remote_port {
            self.remote_port = v;
        }
        if let Some(v) = patch.protocol {
            self.protocol = v;
        }
        if let Some(v) = patch.username {
            self.username = Some(v);
        }
        if let Some(v) = patch.password {
            self.password = Some(v);
        }
        if let Some(v) = patch.is_enabled {
            self.is_enabled = v;
        }
        if let Some(v) = patch.description {
            self.description = Some(v);
        }
        if let Some(v) = patch.owner {
            self.owner = Some(v);
        }
        if let Some(v) = patch.expire_date {
            self.expire_date = Some(v);
        }
    }

    /// Validate field invariants (port ranges, relay destination presence).
    ///
    /// Port uniqueness across rules is a store-level check, not done here.
    pub fn validate(&self) -> AuroraResult<()> {
        if self.local_port == 0 {
            return Err(AuroraError::Validation("local_port must be 1-65535".into()));
        }
        if !self.protocol.is_proxy_style() {
            if self.remote_ip.trim().is_empty() {
                return Err(AuroraError::Validation(format!(
                    "protocol {} requires a remote_ip",
                    self.protocol
                )));
            }
            if self.remote_port == 0 {
                return Err(AuroraError::Validation(format!(
                    "protocol {} requires a remote_port",
                    self.protocol
                )));
            }
        }
        Ok(())
    }
}

/// Fields accepted when creating a rule; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    pub local_port: u16,
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub expire_date: Option<String>,
}

impl RuleDraft {
    /// Build the full rule record with the store-assigned id.
    pub fn into_rule(self, id: i64) -> ForwardRule {
        ForwardRule {
            id,
            local_port: self.local_port,
            remote_ip: self.remote_ip,
            remote_port: self.remote_port,
            protocol: self.protocol,
            username: self.username,
            password: self.password,
            is_enabled: self.is_enabled,
            description: self.description,
            owner: self.owner,
            expire_date: self.expire_date,
        }
    }
}

/// Partial update for an existing rule. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub remote_ip: Option<String>,
    #[serde(default)]
    pub remote_port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub expire_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_rule() -> ForwardRule {
        ForwardRule {
            id: 1,
            local_port: 8080,
            remote_ip: "1.2.3.4".into(),
            remote_port: 80,
            protocol: Protocol::Tcp,
            username: None,
            password: None,
            is_enabled: true,
            description: None,
            owner: None,
            expire_date: None,
        }
    }

    #[test]
    fn protocol_roundtrip_names() {
        for name in [
            "tcp",
            "udp",
            "socks5",
            "http",
            "ss",
            "relay+tls",
            "relay+ws",
            "mwss",
            "relay+wss",
        ] {
            let p: Protocol = name.parse().unwrap();
            assert_eq!(p.as_str(), name);
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
        assert!("quic".parse::<Protocol>().is_err());
    }

    #[test]
    fn proxy_style_split() {
        assert!(Protocol::Socks5.is_proxy_style());
        assert!(Protocol::Http.is_proxy_style());
        assert!(Protocol::Ss.is_proxy_style());
        assert!(!Protocol::Tcp.is_proxy_style());
        assert!(!Protocol::RelayWss.is_proxy_style());
        assert!(!Protocol::Mwss.is_proxy_style());
    }

    #[test]
    fn validate_rejects_zero_local_port() {
        let mut rule = tcp_rule();
        rule.local_port = 0;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn validate_requires_destination_for_relay() {
        let mut rule = tcp_rule();
        rule.remote_ip = "".into();
        assert!(rule.validate().is_err());

        let mut rule = tcp_rule();
        rule.remote_port = 0;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn validate_allows_bare_proxy_listener() {
        let mut rule = tcp_rule();
        rule.protocol = Protocol::Socks5;
        rule.remote_ip = "".into();
        rule.remote_port = 0;
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut rule = tcp_rule();
        rule.apply(RulePatch {
            is_enabled: Some(false),
            remote_port: Some(443),
            ..Default::default()
        });
        assert!(!rule.is_enabled);
        assert_eq!(rule.remote_port, 443);
        assert_eq!(rule.local_port, 8080);
        assert_eq!(rule.remote_ip, "1.2.3.4");
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let mut rule = tcp_rule();
        assert!(!rule.is_expired("2026-01-01"));

        rule.expire_date = Some("2025-12-31".into());
        assert!(rule.is_expired("2026-01-01"));

        rule.expire_date = Some("2026-01-01".into());
        assert!(!rule.is_expired("2026-01-01"));

        // Datetime strings compare on their date part.
        rule.expire_date = Some("2025-12-31T23:59:59".into());
        assert!(rule.is_expired("2026-01-01"));
    }

    #[test]
    fn draft_deserializes_with_defaults() {
        let draft: RuleDraft =
            serde_json::from_str(r#"{"local_port": 9000, "remote_ip": "10.0.0.1", "remote_port": 22}"#)
                .unwrap();
        assert_eq!(draft.protocol, Protocol::Tcp);
        assert!(draft.is_enabled);
        let rule = draft.into_rule(7);
        assert_eq!(rule.id, 7);
        assert_eq!(rule.local_port, 9000);
    }
}
