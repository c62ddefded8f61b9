//! IpamEngine — the surface the IPAM orchestration layer calls.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use ipamgrid_core::{ConditionConfig, GridId, IpamConfig};
use ipamgrid_state::*;
use ipamgrid_sync::{ApplianceGateway, GridSyncer, SyncOutcome};

use crate::catalog::ConditionCatalog;
use crate::error::{MappingError, MappingResult};
use crate::resolver::{MappingContext, MappingResolver, release_subnet};
use crate::scope::{Network, Subnet};

/// Grid sync plus mapping resolution over one shared store.
///
/// Holds no reservation state of its own: every call reads the store
/// fresh. The validated catalog is cached per grid sync generation.
pub struct IpamEngine {
    state: StateStore,
    syncer: GridSyncer,
    conditions: Vec<ConditionConfig>,
    catalog: RwLock<Option<Arc<ConditionCatalog>>>,
}

impl IpamEngine {
    pub fn new(state: StateStore, gateway: Arc<dyn ApplianceGateway>, config: &IpamConfig) -> Self {
        let syncer = GridSyncer::new(
            state.clone(),
            gateway,
            config.grid.clone(),
            config.sync.clone(),
        );
        Self {
            state,
            syncer,
            conditions: config.conditions.clone(),
            catalog: RwLock::new(None),
        }
    }

    /// Open (or create) the store at `path` and build an engine over it.
    pub fn open(
        path: &Path,
        gateway: Arc<dyn ApplianceGateway>,
        config: &IpamConfig,
    ) -> MappingResult<Self> {
        Ok(Self::new(StateStore::open(path)?, gateway, config))
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn syncer(&self) -> &GridSyncer {
        &self.syncer
    }

    /// The catalog validated for the latest generation this engine has seen.
    pub fn catalog(&self) -> Option<Arc<ConditionCatalog>> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sync members and grid settings, then validate and bind the catalog.
    ///
    /// A catalog that fails validation fails the call; the grid sync itself
    /// has been recorded by then and the previous catalog stays cached.
    pub fn sync_grid(&self, force: bool) -> MappingResult<SyncOutcome> {
        let outcome = self.syncer.sync_grid(force)?;
        let grid_id = self.syncer.grid_id();

        let catalog = self.state.write(|txn| {
            let grid = synced_grid(txn, grid_id)?;
            match self.catalog() {
                Some(current) if current.generation() == grid.sync_generation => Ok(current),
                _ => self.load_catalog(txn, &grid),
            }
        })?;
        self.store_catalog(catalog);
        Ok(outcome)
    }

    /// Resolve the network view and members of a subnet.
    pub fn resolve_mapping(
        &self,
        network: &Network,
        subnet: &Subnet,
    ) -> MappingResult<MappingContext> {
        let grid_id = self.syncer.grid_id();
        let cached = self.catalog();
        let mut fresh = None;

        let context = self.state.write(|txn| {
            let grid = synced_grid(txn, grid_id)?;
            let resolver = MappingResolver::new(txn, &grid);
            if let Some(context) = resolver.existing(network, subnet)? {
                return Ok(context);
            }

            let catalog = match cached {
                Some(catalog) if catalog.generation() == grid.sync_generation => catalog,
                // Grid synced elsewhere since this catalog was validated.
                _ => {
                    let catalog = self.load_catalog(txn, &grid)?;
                    fresh = Some(catalog.clone());
                    catalog
                }
            };
            resolver.create(network, subnet, &catalog)
        })?;

        if let Some(catalog) = fresh {
            self.store_catalog(catalog);
        }
        Ok(context)
    }

    /// Forget a deleted subnet. Returns whether it was mapped.
    pub fn release_subnet(&self, network_id: &str, subnet_id: &str) -> MappingResult<bool> {
        self.state
            .write(|txn| release_subnet(txn, network_id, subnet_id))
    }

    fn load_catalog(&self, txn: &StoreTxn, grid: &Grid) -> MappingResult<Arc<ConditionCatalog>> {
        let members = txn.list_members(grid.id)?;
        let catalog =
            ConditionCatalog::validate(grid.id, grid.sync_generation, &self.conditions, &members)?;
        catalog.bind(txn)?;
        Ok(Arc::new(catalog))
    }

    fn store_catalog(&self, catalog: Arc<ConditionCatalog>) {
        let mut slot = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let newer = slot
            .as_ref()
            .is_none_or(|current| current.generation() < catalog.generation());
        if newer {
            info!(
                grid_id = catalog.grid_id(),
                generation = catalog.generation(),
                rules = catalog.entries().count(),
                "condition catalog loaded"
            );
            *slot = Some(catalog);
        }
    }
}

/// The grid row, provided it has completed a sync.
fn synced_grid(txn: &StoreTxn, grid_id: GridId) -> MappingResult<Grid> {
    match txn.get_grid(grid_id)? {
        Some(grid) if grid.is_synced() => Ok(grid),
        _ => Err(MappingError::SyncNotPerformed(grid_id)),
    }
}
