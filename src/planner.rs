//! Deployment network planning.
//!
//! The `NetworkPlanner` owns the resolved networks of one deployment and
//! hands them to instance placement. For every instance of every job it
//! makes one reservation per job network: the instance's static IP when
//! the job lists one, a dynamic reservation otherwise. Placement is all or
//! nothing: if any reservation fails, everything placed by that call is
//! released and the error is returned.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{JobSpec, Manifest};
use crate::error::{NetworkError, Result};
use crate::ip::subnet::AddressSpan;
use crate::ip::{Requester, Reservation, ReservationStore, ReservationType};
use crate::network::{DefaultRole, GlobalNetworkResolver, Network, NetworkSettings};

/// One network binding of a placed instance
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkBinding {
    pub reservation: Reservation,
    pub default: Vec<DefaultRole>,
}

/// Reservations held by one job instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlacement {
    pub job: String,
    pub index: u32,
    pub networks: Vec<NetworkBinding>,
}

impl InstancePlacement {
    /// Requester identity used for this instance's reservations
    pub fn requester(&self) -> Requester {
        instance_requester(&self.job, self.index)
    }
}

/// Agent-facing settings of one placed instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceReport {
    pub job: String,
    pub index: u32,
    pub networks: BTreeMap<String, NetworkSettings>,
}

/// Settings of every placed instance in a deployment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementReport {
    pub deployment: String,
    pub instances: Vec<InstanceReport>,
}

/// Network view of one deployment plan
#[derive(Debug)]
pub struct NetworkPlanner {
    deployment: String,
    networks: Vec<Network>,
    store: Arc<dyn ReservationStore>,
}

impl NetworkPlanner {
    /// Resolve the manifest's networks against `store`
    pub fn new(manifest: &Manifest, store: Arc<dyn ReservationStore>) -> Result<Self> {
        let resolver = GlobalNetworkResolver::parse_foreign_ranges(&manifest.foreign_ranges)?;
        let networks = resolver.resolve(&manifest.networks, Arc::clone(&store))?;

        info!(
            "Planning networks for deployment '{}' ({} network(s))",
            manifest.name,
            networks.len()
        );
        Ok(NetworkPlanner {
            deployment: manifest.name.clone(),
            networks,
            store,
        })
    }

    /// Resolve the manifest's networks against the store it configures
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let store = manifest.reservation_store.open()?;
        Self::new(manifest, store)
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn network(&self, name: &str) -> Result<&Network> {
        self.networks
            .iter()
            .find(|network| network.name() == name)
            .ok_or_else(|| NetworkError::UnknownNetwork {
                name: name.to_string(),
            })
    }

    /// Check that every job's networks exist and cover the job's zones
    pub fn validate_jobs(&self, jobs: &[JobSpec]) -> Result<()> {
        for job in jobs {
            for job_network in &job.networks {
                let network = self.network(&job_network.name)?;
                network.validate_has_job(&job.availability_zones, &job.name)?;
            }
        }
        Ok(())
    }

    /// Place every instance of `jobs`, one at a time in declaration order.
    ///
    /// Dynamic addresses come out in a deterministic order for an unchanged
    /// store.
    pub fn place(&self, jobs: &[JobSpec]) -> Result<Vec<InstancePlacement>> {
        let mut placed = Vec::new();

        for job in jobs {
            let statics = match self.job_static_ips(job) {
                Ok(statics) => statics,
                Err(e) => return Err(self.abort(placed, e)),
            };

            for index in 0..job.instances {
                match self.place_instance(job, index, &statics) {
                    Ok(instance) => placed.push(instance),
                    Err(e) => return Err(self.abort(placed, e)),
                }
            }
        }

        info!("Placed {} instance(s) for '{}'", placed.len(), self.deployment);
        Ok(placed)
    }

    /// Place the instances of each job concurrently.
    ///
    /// Jobs are still handled one after another; within a job, instances race
    /// for dynamic addresses, so which instance gets which dynamic address is
    /// not fixed.
    pub fn place_parallel(&self, jobs: &[JobSpec]) -> Result<Vec<InstancePlacement>> {
        let mut placed = Vec::new();

        for job in jobs {
            let statics = match self.job_static_ips(job) {
                Ok(statics) => statics,
                Err(e) => return Err(self.abort(placed, e)),
            };

            let outcomes: Vec<Result<InstancePlacement>> = (0..job.instances)
                .into_par_iter()
                .map(|index| self.place_instance(job, index, &statics))
                .collect();

            let mut failure = None;
            for outcome in outcomes {
                match outcome {
                    Ok(instance) => placed.push(instance),
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(self.abort(placed, e));
            }
        }

        info!(
            "Placed {} instance(s) for '{}' in parallel",
            placed.len(),
            self.deployment
        );
        Ok(placed)
    }

    /// Release every reservation held by `placements`.
    ///
    /// A failed release does not stop the others; the first failure is
    /// returned once every binding has been tried.
    pub fn release_all(&self, placements: &mut [InstancePlacement]) -> Result<()> {
        let mut first_failure = None;

        for instance in placements.iter_mut() {
            for binding in instance.networks.iter_mut() {
                if !binding.reservation.is_reserved() {
                    continue;
                }
                let released = self
                    .network(binding.reservation.network())
                    .and_then(|network| network.release(&mut binding.reservation));
                if let Err(e) = released {
                    warn!(
                        "Could not release {} on network '{}': {}",
                        binding.reservation.requester(),
                        binding.reservation.network(),
                        e
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Agent settings for every network of every placed instance
    pub fn report(&self, placements: &[InstancePlacement]) -> Result<PlacementReport> {
        let instances = placements
            .iter()
            .map(|instance| {
                let networks = instance
                    .networks
                    .iter()
                    .map(|binding| {
                        let network = self.network(binding.reservation.network())?;
                        let settings = network.network_settings(&binding.reservation, &binding.default)?;
                        Ok((network.name().to_string(), settings))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(InstanceReport {
                    job: instance.job.clone(),
                    index: instance.index,
                    networks,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PlacementReport {
            deployment: self.deployment.clone(),
            instances,
        })
    }

    /// Static IPs of each job network, one per instance when present
    fn job_static_ips(&self, job: &JobSpec) -> Result<Vec<Vec<Ipv4Addr>>> {
        job.networks
            .iter()
            .map(|job_network| {
                let spans = job_network
                    .static_ips
                    .iter()
                    .map(|entry| AddressSpan::parse(&job_network.name, entry))
                    .collect::<Result<Vec<_>>>()?;

                // Count before expanding so a mistyped range is never materialized
                let count: u64 = spans.iter().map(AddressSpan::size).sum();
                if count != 0 && count != u64::from(job.instances) {
                    return Err(NetworkError::JobStaticIpCountMismatch {
                        job: job.name.clone(),
                        network: job_network.name.clone(),
                        instances: job.instances,
                        static_ips: usize::try_from(count).unwrap_or(usize::MAX),
                    });
                }
                Ok(spans.iter().flat_map(AddressSpan::addresses).collect::<Vec<_>>())
            })
            .collect()
    }

    fn place_instance(&self, job: &JobSpec, index: u32, statics: &[Vec<Ipv4Addr>]) -> Result<InstancePlacement> {
        let requester = instance_requester(&job.name, index);
        let zone = instance_zone(job, index);
        let mut instance = InstancePlacement {
            job: job.name.clone(),
            index,
            networks: Vec::with_capacity(job.networks.len()),
        };

        for (job_network, addresses) in job.networks.iter().zip(statics) {
            let requested = match addresses.get(index as usize) {
                Some(address) => ReservationType::Static(*address),
                None => ReservationType::Dynamic,
            };
            let mut reservation = Reservation::new(requester.clone(), &job_network.name, requested);
            if let Some(zone) = zone {
                reservation = reservation.with_availability_zone(zone);
            }

            let reserved = self
                .network(&job_network.name)
                .and_then(|network| network.reserve(&mut reservation));
            if let Err(e) = reserved {
                return Err(self.abort(vec![instance], e));
            }

            debug!(
                "Instance {} bound to network '{}' ({:?})",
                requester,
                job_network.name,
                reservation.state()
            );
            instance.networks.push(NetworkBinding {
                reservation,
                default: job.default_roles(job_network),
            });
        }

        Ok(instance)
    }

    /// Roll back `placed` and hand back the error that caused it
    fn abort(&self, mut placed: Vec<InstancePlacement>, error: NetworkError) -> NetworkError {
        if let Err(rollback) = self.release_all(&mut placed) {
            warn!(
                "Rolling back placement for '{}' failed: {}",
                self.deployment, rollback
            );
        }
        error
    }
}

fn instance_requester(job: &str, index: u32) -> Requester {
    Requester::new(format!("{}/{}", job, index))
}

/// Instances are spread round-robin over the job's zones
fn instance_zone(job: &JobSpec, index: u32) -> Option<&str> {
    if job.availability_zones.is_empty() {
        return None;
    }
    let slot = index as usize % job.availability_zones.len();
    Some(job.availability_zones[slot].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ip::{StoreResult, TransientStore};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Transient store whose next owner-checked release fails with an I/O error
    #[derive(Debug, Default)]
    struct FlakyReleaseStore {
        inner: TransientStore,
        fail_next_release: AtomicBool,
    }

    impl ReservationStore for FlakyReleaseStore {
        fn try_commit(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
            self.inner.try_commit(network, address, requester)
        }

        fn release(&self, network: &str, address: Ipv4Addr) -> StoreResult<()> {
            self.inner.release(network, address)
        }

        fn release_owned(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
            if self.fail_next_release.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Io {
                    path: "ledger.json".to_string(),
                    message: "disk unavailable".to_string(),
                });
            }
            self.inner.release_owned(network, address, requester)
        }

        fn is_reserved(&self, network: &str, address: Ipv4Addr) -> StoreResult<bool> {
            self.inner.is_reserved(network, address)
        }

        fn owner(&self, network: &str, address: Ipv4Addr) -> StoreResult<Option<Requester>> {
            self.inner.owner(network, address)
        }

        fn reserved_addresses(&self, network: &str) -> StoreResult<BTreeSet<Ipv4Addr>> {
            self.inner.reserved_addresses(network)
        }
    }

    const SMALL: &str = r#"
name: fleet
networks:
  - name: a
    subnets:
      - range: 10.1.0.0/29
        gateway: 10.1.0.1
jobs:
  - name: web
    instances: 3
    networks: [{name: a}]
"#;

    fn manifest(yaml: &str) -> Manifest {
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        manifest.validate().unwrap();
        manifest
    }

    const ZONED: &str = r#"
name: fleet
networks:
  - name: a
    subnets:
      - range: 10.1.0.0/29
        gateway: 10.1.0.1
        availability_zone: z1
      - range: 10.2.0.0/29
        gateway: 10.2.0.1
        availability_zone: z2
jobs:
  - name: web
    instances: 4
    availability_zones: [z1, z2]
    networks: [{name: a}]
"#;

    #[test]
    fn test_instances_follow_their_zone() {
        let manifest = manifest(ZONED);
        let planner = NetworkPlanner::new(&manifest, Arc::new(TransientStore::new())).unwrap();

        planner.validate_jobs(&manifest.jobs).unwrap();
        let placed = planner.place(&manifest.jobs).unwrap();

        let ips: Vec<Option<Ipv4Addr>> = placed
            .iter()
            .map(|instance| instance.networks[0].reservation.ip())
            .collect();
        assert_eq!(
            ips,
            vec![
                Some(Ipv4Addr::new(10, 1, 0, 2)),
                Some(Ipv4Addr::new(10, 2, 0, 2)),
                Some(Ipv4Addr::new(10, 1, 0, 3)),
                Some(Ipv4Addr::new(10, 2, 0, 3)),
            ]
        );
        assert_eq!(placed[3].requester(), Requester::new("web/3"));
    }

    #[test]
    fn test_unknown_zone_fails_validation() {
        let mut manifest = manifest(ZONED);
        manifest.jobs[0].availability_zones.push("z3".to_string());
        let planner = NetworkPlanner::new(&manifest, Arc::new(TransientStore::new())).unwrap();

        let result = planner.validate_jobs(&manifest.jobs);
        assert!(matches!(
            result,
            Err(NetworkError::JobNetworkMissingRequiredAvailabilityZone { ref zones, .. }) if zones == &vec!["z3".to_string()]
        ));
    }

    #[test]
    fn test_static_ip_count_must_match_instances() {
        let manifest = manifest(
            r#"
name: fleet
networks:
  - name: a
    subnets:
      - range: 10.1.0.0/24
        static: [10.1.0.10 - 10.1.0.20]
jobs:
  - name: web
    instances: 3
    networks:
      - name: a
        static_ips: [10.1.0.10 - 10.1.0.11]
"#,
        );
        let planner = NetworkPlanner::new(&manifest, Arc::new(TransientStore::new())).unwrap();

        assert_eq!(
            planner.place(&manifest.jobs).unwrap_err(),
            NetworkError::JobStaticIpCountMismatch {
                job: "web".to_string(),
                network: "a".to_string(),
                instances: 3,
                static_ips: 2,
            }
        );
    }

    #[test]
    fn test_release_all_continues_past_a_failed_release() {
        let manifest = manifest(SMALL);
        let store = Arc::new(FlakyReleaseStore::default());
        let planner = NetworkPlanner::new(&manifest, store.clone()).unwrap();
        let mut placed = planner.place(&manifest.jobs).unwrap();
        assert_eq!(store.inner.len(), 3);

        store.fail_next_release.store(true, Ordering::SeqCst);
        let result = planner.release_all(&mut placed);

        assert!(matches!(result, Err(NetworkError::Store(StoreError::Io { .. }))));
        assert_eq!(store.inner.len(), 1);
        assert!(placed[0].networks[0].reservation.is_reserved());
        assert!(!placed[1].networks[0].reservation.is_reserved());
        assert!(!placed[2].networks[0].reservation.is_reserved());
    }

    #[test]
    fn test_rollback_releases_past_a_failed_release() {
        // .2 to .6 are dynamic, so the sixth instance fails
        let manifest = manifest(&SMALL.replace("instances: 3", "instances: 6"));
        let store = Arc::new(FlakyReleaseStore::default());
        store.fail_next_release.store(true, Ordering::SeqCst);
        let planner = NetworkPlanner::new(&manifest, store.clone()).unwrap();

        let result = planner.place(&manifest.jobs);

        assert!(matches!(
            result,
            Err(NetworkError::NetworkReservationNotEnoughCapacity { .. })
        ));
        assert_eq!(store.inner.len(), 1);
    }

    #[test]
    fn test_oversized_static_range_is_counted_not_expanded() {
        let manifest = manifest(
            r#"
name: fleet
networks:
  - name: a
    subnets: [{range: 10.1.0.0/24}]
jobs:
  - name: web
    instances: 2
    networks:
      - name: a
        static_ips: [0.0.0.0 - 255.255.255.255]
"#,
        );
        let planner = NetworkPlanner::new(&manifest, Arc::new(TransientStore::new())).unwrap();

        assert!(matches!(
            planner.place(&manifest.jobs),
            Err(NetworkError::JobStaticIpCountMismatch { instances: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_network() {
        let planner = NetworkPlanner::new(&manifest(ZONED), Arc::new(TransientStore::new())).unwrap();
        assert_eq!(
            planner.network("missing").unwrap_err(),
            NetworkError::UnknownNetwork {
                name: "missing".to_string()
            }
        );
    }
}
