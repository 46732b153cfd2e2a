//! Entitlement boundary.
//!
//! Subscription tiers live in an external package system; the engine
//! only asks "may this actor use this feature" before a gated
//! mutation. The trait is the whole interface — the engine never
//! computes tiers itself.

use uuid::Uuid;

/// Gateable engine features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    AdherenceTracking,
    VoiceReminders,
    CaregiverSharing,
    BulkImport,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdherenceTracking => "adherence_tracking",
            Self::VoiceReminders => "voice_reminders",
            Self::CaregiverSharing => "caregiver_sharing",
            Self::BulkImport => "bulk_import",
        }
    }
}

/// The external subscription collaborator, seen from the engine.
pub trait EntitlementProvider {
    fn allows(&self, actor_id: &Uuid, feature: Feature) -> bool;
}

/// Every feature enabled. The default for deployments without a
/// package system attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl EntitlementProvider for OpenAccess {
    fn allows(&self, _actor_id: &Uuid, _feature: Feature) -> bool {
        true
    }
}

/// Fixed deny-list provider. Test double, but also usable as a static
/// tier configuration.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: Vec<Feature>,
}

impl DenyList {
    pub fn new(denied: Vec<Feature>) -> Self {
        Self { denied }
    }
}

impl EntitlementProvider for DenyList {
    fn allows(&self, _actor_id: &Uuid, feature: Feature) -> bool {
        !self.denied.contains(&feature)
    }
}
