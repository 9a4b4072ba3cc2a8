//! IP prefix to Autonomous System Number resolution.
//!
//! [`PrefixMap`] is a generic longest-prefix-match structure over both IPv4
//! and IPv6; [`IpToAsn`] populates one from the public routeviews
//! prefix-to-AS datasets and refreshes it on a schedule.

#![deny(clippy::unwrap_used)]

mod filters;
mod ip_to_asn;
mod prefix_map;

pub use ip_to_asn::{IpToAsn, RefreshError};
pub use prefix_map::PrefixMap;
