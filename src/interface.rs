//! Wireless interface allocation
//!
//! Maps a (frequency, mode) request onto a free physical interface and takes
//! it back afterwards.  The allocator is a seam: test beds with dynamic
//! interface creation plug in their own implementation.

use crate::error::{RouterError, RouterResult};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Operating mode requested for a wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WlanMode {
    Managed,
    Ibss,
    Monitor,
}

impl fmt::Display for WlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WlanMode::Managed => "managed",
            WlanMode::Ibss => "ibss",
            WlanMode::Monitor => "monitor",
        };
        write!(f, "{}", s)
    }
}

/// Hands out physical wireless interfaces and reclaims them
pub trait InterfaceAllocator: Send + Sync {
    /// Resolve a free interface able to serve |frequency| in |mode|
    fn get_interface(&mut self, frequency: u32, mode: WlanMode) -> RouterResult<String>;

    /// Return an interface to the pool
    fn release(&mut self, interface: &str);
}

/// One physical wireless device known to the allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WlanDev {
    pub name: String,
    /// Frequencies the device can serve; empty means any
    pub frequencies: Vec<u32>,
}

impl WlanDev {
    pub fn new(name: impl Into<String>, frequencies: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            frequencies,
        }
    }

    /// A device without frequency restrictions
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    fn supports(&self, frequency: u32) -> bool {
        self.frequencies.is_empty() || self.frequencies.contains(&frequency)
    }
}

/// Allocator backed by a fixed list of devices
///
/// Suitable for test beds where the wireless hardware is known up front.
pub struct StaticInterfaceAllocator {
    devices: Vec<WlanDev>,
    in_use: HashSet<String>,
}

impl StaticInterfaceAllocator {
    pub fn new(devices: Vec<WlanDev>) -> RouterResult<Self> {
        for dev in &devices {
            validation::validate_interface_name(&dev.name)?;
        }
        Ok(Self {
            devices,
            in_use: HashSet::new(),
        })
    }
}

impl InterfaceAllocator for StaticInterfaceAllocator {
    fn get_interface(&mut self, frequency: u32, mode: WlanMode) -> RouterResult<String> {
        let dev = self
            .devices
            .iter()
            .find(|dev| !self.in_use.contains(&dev.name) && dev.supports(frequency))
            .ok_or_else(|| {
                RouterError::ResourceExhausted(format!(
                    "no free wireless interface for {} MHz in {} mode",
                    frequency, mode
                ))
            })?;
        let name = dev.name.clone();
        self.in_use.insert(name.clone());
        debug!("allocated {} for {} MHz ({})", name, frequency, mode);
        Ok(name)
    }

    fn release(&mut self, interface: &str) {
        if !self.in_use.remove(interface) {
            debug!("release of {} which was not allocated", interface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_and_release() {
        let mut allocator = StaticInterfaceAllocator::new(vec![
            WlanDev::any("wlan0"),
            WlanDev::any("wlan1"),
        ])
        .unwrap();

        let first = allocator.get_interface(2412, WlanMode::Managed).unwrap();
        let second = allocator.get_interface(2412, WlanMode::Managed).unwrap();
        assert_ne!(first, second);

        assert!(allocator.get_interface(2412, WlanMode::Managed).is_err());

        allocator.release(&first);
        let again = allocator.get_interface(2412, WlanMode::Ibss).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_frequency_restriction() {
        let mut allocator = StaticInterfaceAllocator::new(vec![
            WlanDev::new("wlan0", vec![2412, 2437]),
            WlanDev::new("wlan1", vec![5180]),
        ])
        .unwrap();

        assert_eq!(allocator.get_interface(5180, WlanMode::Managed).unwrap(), "wlan1");
        let err = allocator.get_interface(5180, WlanMode::Managed).unwrap_err();
        assert!(matches!(err, RouterError::ResourceExhausted(_)));
        assert_eq!(allocator.get_interface(2437, WlanMode::Managed).unwrap(), "wlan0");
    }

    #[test]
    fn test_rejects_bad_device_names() {
        assert!(StaticInterfaceAllocator::new(vec![WlanDev::any("wlan0; ls")]).is_err());
    }
}
