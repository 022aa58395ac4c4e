//! Conversion between the legacy and canonical publish schemas.

use std::collections::BTreeSet;

use super::{v1, v1alpha1};
use crate::domain::types::ExposureKey;

/// Per-request state carried from upconversion to downconversion.
///
/// Holds the regions named by a legacy request, which the canonical schema
/// has no field for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionBridge {
    regions: BTreeSet<String>,
    traveler: bool,
}

impl VersionBridge {
    pub fn new<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut named = 0usize;
        let regions = regions
            .into_iter()
            .inspect(|_| named += 1)
            .map(|r| r.as_ref().trim().to_ascii_uppercase())
            .filter(|r| !r.is_empty())
            .collect();
        Self {
            regions,
            traveler: named > 1,
        }
    }

    /// Convert a legacy request into the canonical shape.
    pub fn upconvert(legacy: v1alpha1::Publish) -> (v1::Publish, VersionBridge) {
        let bridge = VersionBridge::new(&legacy.regions);
        let keys = legacy
            .keys
            .into_iter()
            .map(|k| ExposureKey {
                key: k.key,
                interval_number: k.interval_number,
                interval_count: k.interval_count,
                transmission_risk: k.transmission_risk,
            })
            .collect();

        let canonical = v1::Publish {
            keys,
            health_authority_id: legacy.app_package_name,
            verification_payload: legacy.verification_payload,
            hmac_key: legacy.hmac_key,
            symptom_onset_interval: legacy.symptom_onset_interval,
            traveler: bridge.is_traveler(),
            revision_token: legacy.revision_token,
            padding: legacy.padding,
        };
        (canonical, bridge)
    }

    /// Convert a canonical response into the legacy shape.
    pub fn downconvert(&self, response: v1::PublishResponse) -> v1alpha1::PublishResponse {
        v1alpha1::PublishResponse {
            revision_token: response.revision_token,
            inserted_exposures: response.inserted_exposures,
            error: response.error_message,
            padding: response.padding,
            warnings: response.warnings,
        }
    }

    /// Normalized, de-duplicated regions forwarded to storage.
    pub fn regions(&self) -> &BTreeSet<String> {
        &self.regions
    }

    /// A request listing more than one region entry is a traveler's. Counted
    /// on the list as sent, before normalization.
    pub fn is_traveler(&self) -> bool {
        self.traveler
    }
}
