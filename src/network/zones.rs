//! Availability-zone coverage shared by all network kinds.

use crate::error::{NetworkError, Result};

/// Deduplicate zones, keeping the first occurrence of each
pub(crate) fn collect_zones<'a>(zones: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut collected: Vec<String> = Vec::new();
    for zone in zones {
        if !collected.iter().any(|known| known == zone) {
            collected.push(zone.to_string());
        }
    }
    collected
}

/// Fail with the list of `required` zones missing from `available`
pub(crate) fn ensure_zones_covered(
    network: &str,
    available: &[String],
    required: &[String],
    job: &str,
) -> Result<()> {
    let missing = collect_zones(
        required
            .iter()
            .filter(|zone| !available.contains(*zone))
            .map(String::as_str),
    );

    if missing.is_empty() {
        Ok(())
    } else {
        Err(NetworkError::JobNetworkMissingRequiredAvailabilityZone {
            job: job.to_string(),
            network: network.to_string(),
            zones: missing,
        })
    }
}
