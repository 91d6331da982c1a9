// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Agent configuration with validation (spec §4.7, §6; SPEC_FULL §10.3).
//
// `load_config` is intentionally not implemented here: XML/profile parsing
// is an external collaborator (spec §1). `ConfigSource` names the hook by
// interface only so the middleware crate can provide it.

use crate::error::AgentError;

/// Configuration for the XRCE agent's session/stream subsystem.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// UDP listen port (default: 2019, the XRCE-DDS standard port).
    pub udp_port: u16,
    /// Optional serial device path (e.g. "/dev/ttyUSB0").
    pub serial_device: Option<String>,
    /// Serial baud rate (default: 115200). Configured out of band via the
    /// OS (spec §4.2 leaves line discipline external); kept here only so
    /// the binary that opens the device can report/validate it.
    pub serial_baud: u32,
    /// Local address byte used on the framed serial link (spec §4.2 SRC/DST).
    pub serial_local_addr: u8,
    /// Optional TCP listen port. If set, TCP transport is enabled.
    pub tcp_port: Option<u16>,
    /// Maximum concurrent clients.
    pub max_clients: usize,
    /// Session inactivity timeout in milliseconds (spec §3, §7).
    pub session_timeout_ms: u64,
    /// Heartbeat period in milliseconds for reliable streams, *T_hb* (spec §4.9).
    pub heartbeat_period_ms: u64,
    /// Default session MTU offered before CREATE_CLIENT negotiates one
    /// (spec §6 "MTU"). CREATE_CLIENT's own `mtu` field always takes
    /// precedence once a session exists.
    pub default_mtu: u16,
    /// Best-effort stream queue depth, *W_b* (spec §3, §4.4.2, §4.5.2).
    pub best_effort_window: usize,
    /// Reliable stream window depth, *W_r* (spec §3, §4.4.3, §4.5.3).
    pub reliable_window: u16,
    /// Timeout for a reliable `push_submessage` to wait for window space
    /// before returning `WouldBlock` (spec §4.5.3, §5).
    pub reliable_push_timeout_ms: u64,
    /// Agent vendor id echoed in STATUS_AGENT/INFO (spec §6).
    pub vendor_id: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            udp_port: 2019,
            serial_device: None,
            serial_baud: 115_200,
            serial_local_addr: 0x00,
            tcp_port: None,
            max_clients: 128,
            session_timeout_ms: 30_000,
            heartbeat_period_ms: 200,
            default_mtu: 512,
            best_effort_window: 16,
            reliable_window: 16,
            reliable_push_timeout_ms: 1_000,
            vendor_id: 0x0001,
        }
    }
}

impl AgentConfig {
    /// Validate configuration. Returns `Ok(())` if valid.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_clients == 0 {
            return Err(AgentError::Config("max_clients must be > 0".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(AgentError::Config("session_timeout_ms must be > 0".into()));
        }
        if self.heartbeat_period_ms == 0 {
            return Err(AgentError::Config("heartbeat_period_ms must be > 0".into()));
        }
        // A message header + one submessage header must fit.
        if self.default_mtu < 16 {
            return Err(AgentError::Config("default_mtu must be >= 16".into()));
        }
        if self.best_effort_window == 0 {
            return Err(AgentError::Config("best_effort_window must be > 0".into()));
        }
        if self.reliable_window == 0 || self.reliable_window as u32 > crate::seqnum::MAX_DISTANCE as u32 {
            return Err(AgentError::Config(
                "reliable_window must be in 1..=32767".into(),
            ));
        }
        if self.serial_baud == 0 {
            return Err(AgentError::Config("serial_baud must be > 0".into()));
        }
        if self.tcp_port.is_none() && self.serial_device.is_none() && self.udp_port == 0 {
            return Err(AgentError::Config(
                "at least one transport must be configured".into(),
            ));
        }
        Ok(())
    }
}

/// External collaborator: loading an agent profile/config file is delegated
/// to the middleware (spec §4.7 `load_config_file`). Named by interface
/// only — XML/reference-profile parsing is out of scope for this crate.
pub trait ConfigSource {
    fn load_config(&self, path: &str) -> Result<Vec<u8>, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_max_clients_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.max_clients = 0;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn reliable_window_out_of_range_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.reliable_window = 0;
        assert!(cfg.validate().is_err());
        cfg.reliable_window = 0x8000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn no_transport_configured_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.udp_port = 0;
        assert!(cfg.validate().is_err());
    }
}
