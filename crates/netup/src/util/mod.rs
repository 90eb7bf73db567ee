//! Shared utilities for netup.

pub mod addr;

pub use addr::{
    format_mac, link_local_from_id, link_local_from_mac, netmask_from_prefix, parse_ipv4_prefix,
    parse_mac, prefix_from_netmask,
};
