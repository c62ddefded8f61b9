//! GridSyncer — throttled grid sync and the periodic resync loop.
//!
//! A grid sync runs member discovery, then the settings sync, and stamps
//! the grid row. Unforced syncs respect the grid's minimum wait and its
//! `Grid Sync Support` switch; the loop re-syncs once the maximum wait has
//! elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ipamgrid_core::{GridId, GridSection, SyncSection, epoch_secs};
use ipamgrid_state::*;

use crate::error::{SyncError, SyncResult};
use crate::gateway::ApplianceGateway;
use crate::members::{MemberRegistry, SyncReport};
use crate::settings::GridConfigSync;

/// Why an unforced sync did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The last sync is more recent than the minimum wait.
    MinimumWait { remaining_secs: u64 },
    /// The grid turned periodic sync off.
    Disabled,
}

/// Result of [`GridSyncer::sync_grid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(SyncReport),
    Skipped(SkipReason),
}

/// Drives grid sync for the configured grid.
#[derive(Clone)]
pub struct GridSyncer {
    state: StateStore,
    gateway: Arc<dyn ApplianceGateway>,
    grid: GridSection,
    fallback: SyncSection,
}

impl GridSyncer {
    pub fn new(
        state: StateStore,
        gateway: Arc<dyn ApplianceGateway>,
        grid: GridSection,
        fallback: SyncSection,
    ) -> Self {
        Self {
            state,
            gateway,
            grid,
            fallback,
        }
    }

    pub fn grid_id(&self) -> GridId {
        self.grid.id
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Store the configured grid (keeping its sync bookkeeping) and make it
    /// the active grid.
    pub fn register_grid(&self) -> SyncResult<Grid> {
        self.state.write(|txn| {
            let grid = match txn.get_grid(self.grid.id)? {
                Some(mut grid) => {
                    grid.name = self.grid.name.clone();
                    grid.connection = self.grid.clone();
                    grid
                }
                None => {
                    info!(grid_id = self.grid.id, name = %self.grid.name, "grid registered");
                    Grid::new(self.grid.clone())
                }
            };
            txn.put_grid(&grid)?;
            txn.activate_grid(grid.id)?;
            Ok::<_, SyncError>(Grid {
                active: true,
                ..grid
            })
        })
    }

    /// Run member discovery and the settings sync.
    ///
    /// Without `force`, the sync is skipped inside the minimum wait and
    /// when the grid disabled periodic sync (once it has synced at all).
    pub fn sync_grid(&self, force: bool) -> SyncResult<SyncOutcome> {
        let grid = self.register_grid()?;
        let now = epoch_secs();

        if !force {
            if let Some(reason) = self.skip_reason(&grid, now) {
                debug!(grid_id = grid.id, ?reason, "grid sync skipped");
                return Ok(SyncOutcome::Skipped(reason));
            }
        }

        let report = MemberRegistry::new(self.state.clone(), self.gateway.clone())
            .sync(&self.grid)?;
        GridConfigSync::new(self.state.clone(), self.gateway.clone())
            .sync(self.grid.id, &self.fallback)?;

        let generation = self.state.write(|txn| {
            let mut grid = txn
                .get_grid(self.grid.id)?
                .ok_or(SyncError::GridNotFound(self.grid.id))?;
            grid.last_sync_time = Some(now);
            grid.sync_generation += 1;
            txn.put_grid(&grid)?;
            Ok::<_, SyncError>(grid.sync_generation)
        })?;

        info!(grid_id = self.grid.id, generation, forced = force, "grid synced");
        Ok(SyncOutcome::Synced(report))
    }

    /// Whether the grid has never synced or its maximum wait has elapsed.
    pub fn is_due(&self) -> SyncResult<bool> {
        let Some(grid) = self.state.get_grid(self.grid.id)? else {
            return Ok(true);
        };
        let Some(last) = grid.last_sync_time else {
            return Ok(true);
        };
        let (_, maximum) = self.window(&grid);
        Ok(epoch_secs().saturating_sub(last) >= maximum)
    }

    /// Run an unforced sync if one is due.
    pub fn sync_if_due(&self) -> SyncResult<Option<SyncOutcome>> {
        if !self.is_due()? {
            return Ok(None);
        }
        self.sync_grid(false).map(Some)
    }

    /// Periodically re-sync until `shutdown` flips or its sender drops.
    ///
    /// Ticks every minimum wait; store and gateway calls run on the
    /// blocking pool.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(grid_id = self.grid.id, "grid sync loop started");

        loop {
            let syncer = self.clone();
            let pass = tokio::task::spawn_blocking(move || {
                let outcome = syncer.sync_if_due();
                (outcome, syncer.tick_interval())
            })
            .await;

            let tick = match pass {
                Ok((outcome, tick)) => {
                    match outcome {
                        Ok(Some(SyncOutcome::Synced(report))) => {
                            debug!(
                                added = report.added,
                                updated = report.updated,
                                disabled = report.disabled,
                                "periodic grid sync complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "periodic grid sync failed"),
                    }
                    tick
                }
                Err(e) => {
                    error!(error = %e, "grid sync task failed");
                    fallback_tick(&self.fallback)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {
                    info!(grid_id = self.grid.id, "grid sync loop shutting down");
                    break;
                }
            }
        }
    }

    fn skip_reason(&self, grid: &Grid, now: u64) -> Option<SkipReason> {
        let last = grid.last_sync_time?;
        if grid.settings.as_ref().is_some_and(|s| !s.grid_sync_support) {
            return Some(SkipReason::Disabled);
        }
        let (minimum, _) = self.window(grid);
        let elapsed = now.saturating_sub(last);
        (elapsed < minimum).then(|| SkipReason::MinimumWait {
            remaining_secs: minimum - elapsed,
        })
    }

    /// (minimum, maximum) wait in seconds: grid settings first, config otherwise.
    fn window(&self, grid: &Grid) -> (u64, u64) {
        match &grid.settings {
            Some(s) => (s.grid_sync_minimum_wait_secs, s.grid_sync_maximum_wait_secs),
            None => (self.fallback.minimum_wait_secs, self.fallback.maximum_wait_secs),
        }
    }

    /// Loop period: the grid's minimum wait. Reads the store, so it runs on
    /// the blocking pool.
    fn tick_interval(&self) -> Duration {
        match self.state.get_grid(self.grid.id) {
            Ok(Some(grid)) => Duration::from_secs(self.window(&grid).0.max(1)),
            _ => fallback_tick(&self.fallback),
        }
    }
}

fn fallback_tick(fallback: &SyncSection) -> Duration {
    Duration::from_secs(fallback.minimum_wait_secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        AttributeMap, AttributeValue, CLOUD_API_LICENSE, LicenseRecord, MemberRecord,
        StaticGateway,
    };
    use crate::settings::attr;
    use std::net::Ipv4Addr;

    fn grid_section() -> GridSection {
        GridSection {
            id: 1,
            name: "Default Grid".to_string(),
            master_host: "10.0.0.1".to_string(),
            master_name: None,
            wapi_version: "2.3".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            ssl_verify: false,
            cloud_license_required: true,
        }
    }

    fn gateway(attrs: &[(&str, &str)]) -> Arc<StaticGateway> {
        let member = |host: &str, last: u8, cloud: bool| MemberRecord {
            member_ref: format!("member/{host}"),
            host_name: host.to_string(),
            ipv4_address: Some(Ipv4Addr::new(10, 0, 0, last)),
            ipv6_address: None,
            node_status: Some("WORKING".to_string()),
            cloud_platform: cloud,
        };
        let attributes: AttributeMap = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), AttributeValue::Single(v.to_string())))
            .collect();
        Arc::new(
            StaticGateway::new(vec![member("gm", 1, false), member("cpm1", 2, true)])
                .with_licenses(vec![LicenseRecord {
                    host_name: "cpm1".to_string(),
                    kind: CLOUD_API_LICENSE.to_string(),
                }])
                .with_attributes("member/gm", attributes),
        )
    }

    fn syncer(gateway: Arc<StaticGateway>) -> GridSyncer {
        GridSyncer::new(
            StateStore::open_in_memory().unwrap(),
            gateway,
            grid_section(),
            SyncSection::default(),
        )
    }

    #[test]
    fn first_sync_populates_store() {
        let syncer = syncer(gateway(&[]));
        let outcome = syncer.sync_grid(false).unwrap();

        assert!(matches!(outcome, SyncOutcome::Synced(ref r) if r.added == 2));
        let grid = syncer.state().get_grid(1).unwrap().unwrap();
        assert!(grid.active);
        assert!(grid.is_synced());
        assert_eq!(grid.sync_generation, 1);
        assert_eq!(grid.settings_version, 1);
    }

    #[test]
    fn unforced_sync_inside_minimum_wait_is_skipped() {
        let syncer = syncer(gateway(&[]));
        syncer.sync_grid(false).unwrap();

        let outcome = syncer.sync_grid(false).unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Skipped(SkipReason::MinimumWait { .. })
        ));
        assert_eq!(syncer.state().get_grid(1).unwrap().unwrap().sync_generation, 1);

        // Forcing bypasses the throttle.
        assert!(matches!(syncer.sync_grid(true).unwrap(), SyncOutcome::Synced(_)));
        assert_eq!(syncer.state().get_grid(1).unwrap().unwrap().sync_generation, 2);
    }

    #[test]
    fn disabled_grid_sync_only_runs_when_forced() {
        let syncer = syncer(gateway(&[
            (attr::GRID_SYNC_SUPPORT, "False"),
            (attr::GRID_SYNC_MINIMUM_WAIT_TIME, "0"),
        ]));
        syncer.sync_grid(false).unwrap();

        assert_eq!(
            syncer.sync_grid(false).unwrap(),
            SyncOutcome::Skipped(SkipReason::Disabled)
        );
        assert!(matches!(syncer.sync_grid(true).unwrap(), SyncOutcome::Synced(_)));
    }

    #[test]
    fn due_until_synced_then_after_maximum_wait() {
        let syncer = syncer(gateway(&[
            (attr::GRID_SYNC_MINIMUM_WAIT_TIME, "0"),
            (attr::GRID_SYNC_MAXIMUM_WAIT_TIME, "0"),
        ]));
        assert!(syncer.is_due().unwrap());
        syncer.sync_grid(false).unwrap();
        // A zero maximum wait is always due.
        assert!(syncer.is_due().unwrap());
        assert!(matches!(syncer.sync_if_due().unwrap(), Some(SyncOutcome::Synced(_))));
    }

    #[test]
    fn not_due_inside_maximum_wait() {
        let syncer = syncer(gateway(&[]));
        syncer.sync_grid(false).unwrap();
        assert!(!syncer.is_due().unwrap());
        assert_eq!(syncer.sync_if_due().unwrap(), None);
    }

    #[test]
    fn failed_discovery_leaves_grid_unsynced() {
        let gw = gateway(&[]);
        gw.set_unreachable(true);
        let syncer = syncer(gw);

        assert!(matches!(
            syncer.sync_grid(true),
            Err(SyncError::Gateway(_))
        ));
        let grid = syncer.state().get_grid(1).unwrap().unwrap();
        assert!(!grid.is_synced());
        assert_eq!(grid.sync_generation, 0);
    }

    #[test]
    fn register_keeps_sync_bookkeeping() {
        let syncer = syncer(gateway(&[]));
        syncer.sync_grid(true).unwrap();
        let grid = syncer.register_grid().unwrap();
        assert_eq!(grid.sync_generation, 1);
        assert!(grid.settings.is_some());
    }

    #[test]
    fn tick_follows_grid_minimum_wait_once_synced() {
        let syncer = syncer(gateway(&[(attr::GRID_SYNC_MINIMUM_WAIT_TIME, "15")]));
        assert_eq!(syncer.tick_interval(), Duration::from_secs(60));

        syncer.sync_grid(true).unwrap();
        assert_eq!(syncer.tick_interval(), Duration::from_secs(15));
    }

    #[test]
    fn zero_minimum_wait_still_ticks() {
        let syncer = syncer(gateway(&[(attr::GRID_SYNC_MINIMUM_WAIT_TIME, "0")]));
        syncer.sync_grid(true).unwrap();
        assert_eq!(syncer.tick_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn run_loop_syncs_and_stops_on_shutdown() {
        let syncer = syncer(gateway(&[]));
        let state = syncer.state().clone();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(syncer.run(rx));
        for _ in 0..200 {
            if state.get_grid(1).unwrap().is_some_and(|g| g.is_synced()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let grid = state.get_grid(1).unwrap().unwrap();
        assert!(grid.is_synced());
        assert_eq!(grid.sync_generation, 1);
    }
}
