//! Interface status snapshots.
//!
//! The stack owns the live interface. Observers only ever see an
//! [`InterfaceStatus`] copy taken on the engine thread after a change.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::util::addr::{netmask_from_prefix, prefix_from_netmask};

/// Number of IPv6 address slots per interface.
pub const IPV6_ADDRESS_SLOTS: usize = 3;

/// IPv4 configuration of the interface.
///
/// All fields are [`Ipv4Addr::UNSPECIFIED`] until an address is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Ipv4Settings {
    /// Interface address.
    pub address: Ipv4Addr,
    /// Netmask.
    pub netmask: Ipv4Addr,
    /// Default gateway.
    pub gateway: Ipv4Addr,
}

impl Ipv4Settings {
    /// Settings with no address assigned.
    pub const UNSPECIFIED: Self = Self {
        address: Ipv4Addr::UNSPECIFIED,
        netmask: Ipv4Addr::UNSPECIFIED,
        gateway: Ipv4Addr::UNSPECIFIED,
    };

    /// Build settings from an address, prefix length and optional gateway.
    pub fn new(address: Ipv4Addr, prefix_len: u8, gateway: Option<Ipv4Addr>) -> Self {
        Self {
            address,
            netmask: netmask_from_prefix(prefix_len),
            gateway: gateway.unwrap_or(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Check if an address is assigned.
    pub fn is_assigned(&self) -> bool {
        !self.address.is_unspecified()
    }

    /// Prefix length derived from the netmask.
    pub fn prefix_len(&self) -> u8 {
        prefix_from_netmask(self.netmask)
    }

    /// The gateway, if one is set.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        (!self.gateway.is_unspecified()).then_some(self.gateway)
    }
}

impl Default for Ipv4Settings {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

/// Autoconfiguration state of an IPv6 address slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Ipv6AddrState {
    /// Slot is empty.
    #[default]
    Invalid,
    /// Duplicate address detection has not finished.
    Tentative,
    /// Validated and usable for new traffic.
    Preferred,
    /// Still valid for existing traffic, not for new connections.
    Deprecated,
    /// Duplicate address detection found a conflict.
    Duplicated,
}

impl Ipv6AddrState {
    /// Check if the address passed validation and is usable.
    pub fn is_preferred(&self) -> bool {
        matches!(self, Self::Preferred)
    }

    /// Get the state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Tentative => "tentative",
            Self::Preferred => "preferred",
            Self::Deprecated => "deprecated",
            Self::Duplicated => "duplicated",
        }
    }
}

impl fmt::Display for Ipv6AddrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One IPv6 address slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Ipv6Slot {
    pub address: Ipv6Addr,
    pub state: Ipv6AddrState,
}

impl Ipv6Slot {
    /// An unused slot.
    pub const EMPTY: Self = Self {
        address: Ipv6Addr::UNSPECIFIED,
        state: Ipv6AddrState::Invalid,
    };

    pub fn new(address: Ipv6Addr, state: Ipv6AddrState) -> Self {
        Self { address, state }
    }

    /// Check if the slot holds an address.
    pub fn is_used(&self) -> bool {
        self.state != Ipv6AddrState::Invalid
    }
}

impl Default for Ipv6Slot {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Snapshot of the managed interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InterfaceStatus {
    /// Link-layer address of the attached device.
    pub hardware_addr: [u8; 6],
    /// Administratively up.
    pub up: bool,
    /// Marked as the default interface.
    pub default: bool,
    /// IPv4 configuration.
    pub ipv4: Ipv4Settings,
    /// IPv6 address slots.
    pub ipv6: [Ipv6Slot; IPV6_ADDRESS_SLOTS],
}

impl InterfaceStatus {
    /// Status of a freshly added interface: down, no addresses.
    pub fn new(hardware_addr: [u8; 6]) -> Self {
        Self {
            hardware_addr,
            up: false,
            default: false,
            ipv4: Ipv4Settings::UNSPECIFIED,
            ipv6: [Ipv6Slot::EMPTY; IPV6_ADDRESS_SLOTS],
        }
    }

    /// Index of the first unused IPv6 slot.
    pub fn free_ipv6_slot(&self) -> Option<usize> {
        self.ipv6.iter().position(|slot| !slot.is_used())
    }

    /// Iterate over preferred IPv6 addresses with their slot index.
    pub fn preferred_ipv6(&self) -> impl Iterator<Item = (usize, Ipv6Addr)> + '_ {
        self.ipv6
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.is_preferred())
            .map(|(idx, slot)| (idx, slot.address))
    }
}
