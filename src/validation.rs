//! Input validation and sanitization
//!
//! Everything validated here ends up inside a shell command line on the
//! router, so reject anything that could smuggle in metacharacters.

use crate::error::{RouterError, RouterResult};

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum SSID length in bytes (IEEE 802.11 limit)
const MAX_SSID_LEN: usize = 32;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> RouterResult<()> {
    if name.is_empty() {
        return Err(RouterError::InvalidParameter(
            "Interface name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(RouterError::InvalidParameter(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(RouterError::InvalidParameter(
                format!("Invalid interface name '{}': contains invalid character '{}'", name, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(RouterError::InvalidParameter(
            "Interface name cannot start with dash".to_string()
        ));
    }

    Ok(())
}

/// Validate an SSID before it is written into a daemon config file
pub fn validate_ssid(ssid: &str) -> RouterResult<()> {
    if ssid.is_empty() {
        return Err(RouterError::InvalidParameter(
            "SSID cannot be empty".to_string()
        ));
    }

    if ssid.len() > MAX_SSID_LEN {
        return Err(RouterError::InvalidParameter(
            format!("SSID too long (max {} bytes)", MAX_SSID_LEN)
        ));
    }

    for c in ssid.chars() {
        if c.is_control() || matches!(c, '`' | '"' | '\\' | '$') {
            return Err(RouterError::InvalidParameter(
                format!("Invalid SSID '{}': contains invalid character", ssid)
            ));
        }
    }

    Ok(())
}

/// Validate MAC address format
///
/// Accepts standard MAC format: XX:XX:XX:XX:XX:XX (hex digits)
pub fn validate_mac_address(mac: &str) -> RouterResult<()> {
    if mac.len() != 17 {
        return Err(RouterError::InvalidParameter(
            "MAC address must be in format XX:XX:XX:XX:XX:XX".to_string()
        ));
    }

    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(RouterError::InvalidParameter(
            "MAC address must have 6 octets separated by colons".to_string()
        ));
    }

    for part in parts {
        if part.len() != 2 {
            return Err(RouterError::InvalidParameter(
                "Each MAC address octet must be 2 hex digits".to_string()
            ));
        }

        if !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RouterError::InvalidParameter(
                format!("Invalid hex digit in MAC address: {}", part)
            ));
        }
    }

    Ok(())
}

/// Validate a WPA passphrase (hostapd requires 8-63 bytes)
pub fn validate_passphrase(passphrase: &str) -> RouterResult<()> {
    if passphrase.len() < 8 || passphrase.len() > 63 {
        return Err(RouterError::InvalidParameter(
            "Passphrase must be between 8 and 63 bytes".to_string()
        ));
    }

    for c in passphrase.chars() {
        if c.is_control() {
            return Err(RouterError::InvalidParameter(
                "Passphrase cannot contain control characters".to_string()
            ));
        }
    }

    Ok(())
}
