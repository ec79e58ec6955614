use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An action surface of the booking system that a plan allows agents to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "booking.create")]
    BookingCreate,
    #[serde(rename = "booking.reschedule")]
    BookingReschedule,
    #[serde(rename = "booking.cancel")]
    BookingCancel,
    #[serde(rename = "vendor.availability")]
    VendorAvailability,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::BookingCreate,
        Capability::BookingReschedule,
        Capability::BookingCancel,
        Capability::VendorAvailability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::BookingCreate => "booking.create",
            Capability::BookingReschedule => "booking.reschedule",
            Capability::BookingCancel => "booking.cancel",
            Capability::VendorAvailability => "vendor.availability",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability {0:?}, expected one of booking.create, booking.reschedule, booking.cancel, vendor.availability")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::all()
    }
}

impl CapabilitySet {
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    /// Parse capability ids. An empty list means every capability.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, UnknownCapability> {
        if ids.is_empty() {
            return Ok(Self::all());
        }
        ids.iter()
            .map(|id| id.as_ref().parse())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.0.iter().map(Capability::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_ids() {
        let set = CapabilitySet::from_ids(&["booking.create", "booking.cancel"]).unwrap();
        assert!(set.contains(Capability::BookingCreate));
        assert!(!set.contains(Capability::BookingReschedule));
        assert_eq!(set.ids(), vec!["booking.create", "booking.cancel"]);

        assert_eq!(
            CapabilitySet::from_ids::<&str>(&[]).unwrap(),
            CapabilitySet::all()
        );
        assert!(CapabilitySet::from_ids(&["payments.refund"]).is_err());
    }
}
