//! StateStore — redb-backed mapping store.
//!
//! Reads go through the [`StoreRead`] trait, implemented by the store itself
//! (one read transaction per call), by [`StoreReader`] (one consistent
//! snapshot for many reads) and by [`StoreTxn`] (reads inside a write).
//! Every read-modify-write runs in [`StateStore::write`]: redb admits one
//! write transaction at a time, so a check and the insert that depends on
//! it can never interleave with another writer.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use ipamgrid_core::{GridId, epoch_secs, network_view_id};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Result of an insert against a uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    /// The row was written by this transaction.
    Inserted(T),
    /// A row with the same key already existed and was kept.
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            InsertOutcome::Inserted(row) | InsertOutcome::Existing(row) => row,
        }
    }
}

/// Thread-safe mapping store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "mapping store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory mapping store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Open a consistent read snapshot.
    pub fn snapshot(&self) -> StateResult<StoreReader> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(StoreReader { txn })
    }

    /// Run `f` inside one serializable write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and is aborted otherwise,
    /// so nothing `f` wrote survives an error.
    pub fn write<T, E>(&self, f: impl FnOnce(&StoreTxn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = StoreTxn {
            txn: self.db.begin_write().map_err(map_err!(Transaction))?,
        };
        match f(&txn) {
            Ok(value) => {
                txn.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    // ── Grids ──────────────────────────────────────────────────────

    /// Insert or update a grid.
    pub fn put_grid(&self, grid: &Grid) -> StateResult<()> {
        self.write(|txn| txn.put_grid(grid))
    }

    /// Mark one grid active and every other grid inactive.
    pub fn activate_grid(&self, grid_id: GridId) -> StateResult<()> {
        self.write(|txn| txn.activate_grid(grid_id))
    }

    /// Delete a grid and everything scoped to it. Returns true if it existed.
    pub fn delete_grid(&self, grid_id: GridId) -> StateResult<bool> {
        self.write(|txn| txn.delete_grid(grid_id))
    }
}

impl StoreRead for StateStore {
    fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        self.snapshot()?.fetch(table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        self.snapshot()?.scan(table, prefix)
    }
}

// ── Reads ─────────────────────────────────────────────────────────

/// Typed reads over the mapping tables.
///
/// Only `fetch` and `scan` are implemented per transaction kind; every
/// other method is shared.
pub trait StoreRead {
    #[doc(hidden)]
    fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>>;

    #[doc(hidden)]
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>>;

    fn get_grid(&self, grid_id: GridId) -> StateResult<Option<Grid>> {
        self.fetch(GRIDS, &grid_id.to_string())
    }

    fn list_grids(&self) -> StateResult<Vec<Grid>> {
        self.scan(GRIDS, "")
    }

    /// The single active grid, if any.
    fn active_grid(&self) -> StateResult<Option<Grid>> {
        Ok(self.list_grids()?.into_iter().find(|g| g.active))
    }

    fn get_member(&self, grid_id: GridId, member_id: &str) -> StateResult<Option<GridMember>> {
        self.fetch(GRID_MEMBERS, &member_key(grid_id, member_id))
    }

    /// All members of a grid, in member id order.
    fn list_members(&self, grid_id: GridId) -> StateResult<Vec<GridMember>> {
        self.scan(GRID_MEMBERS, &format!("{grid_id}/"))
    }

    /// The grid master of a grid, if one has been discovered.
    fn authority_member(&self, grid_id: GridId) -> StateResult<Option<GridMember>> {
        Ok(self
            .list_members(grid_id)?
            .into_iter()
            .find(|m| m.role == ipamgrid_core::MemberRole::Authority))
    }

    fn get_network_view(&self, view_id: &str) -> StateResult<Option<NetworkView>> {
        self.fetch(NETWORK_VIEWS, view_id)
    }

    fn find_network_view(&self, grid_id: GridId, name: &str) -> StateResult<Option<NetworkView>> {
        self.get_network_view(&network_view_id(grid_id, name))
    }

    fn list_network_views(&self, grid_id: GridId) -> StateResult<Vec<NetworkView>> {
        let views: Vec<NetworkView> = self.scan(NETWORK_VIEWS, "")?;
        Ok(views.into_iter().filter(|v| v.grid_id == grid_id).collect())
    }

    fn get_condition(&self, grid_id: GridId, condition: &str) -> StateResult<Option<MappingCondition>> {
        self.fetch(MAPPING_CONDITIONS, &condition_key(grid_id, condition))
    }

    fn list_conditions(&self, grid_id: GridId) -> StateResult<Vec<MappingCondition>> {
        self.scan(MAPPING_CONDITIONS, &format!("{grid_id}/"))
    }

    fn get_mapping_member(&self, view_id: &str) -> StateResult<Option<MappingMember>> {
        self.fetch(MAPPING_MEMBERS, view_id)
    }

    fn list_mapping_members(&self, grid_id: GridId) -> StateResult<Vec<MappingMember>> {
        let rows: Vec<MappingMember> = self.scan(MAPPING_MEMBERS, "")?;
        Ok(rows.into_iter().filter(|m| m.grid_id == grid_id).collect())
    }

    fn list_service_members(&self, network_id: &str) -> StateResult<Vec<ServiceMember>> {
        self.scan(SERVICE_MEMBERS, &format!("{network_id}/"))
    }

    /// Service rows of a network within one view, DHCP before DNS.
    fn list_view_service_members(
        &self,
        network_id: &str,
        view_id: &str,
    ) -> StateResult<Vec<ServiceMember>> {
        self.scan(SERVICE_MEMBERS, &format!("{network_id}/{view_id}/"))
    }

    fn list_all_service_members(&self) -> StateResult<Vec<ServiceMember>> {
        self.scan(SERVICE_MEMBERS, "")
    }

    fn get_object_mapping(&self, network_id: &str, subnet_id: &str) -> StateResult<Option<ObjectMapping>> {
        self.fetch(NEUTRON_OBJECT_MAPPING, &object_key(network_id, subnet_id))
    }

    fn list_object_mappings_for_network(&self, network_id: &str) -> StateResult<Vec<ObjectMapping>> {
        self.scan(NEUTRON_OBJECT_MAPPING, &format!("{network_id}/"))
    }

    fn list_object_mappings_for_view(&self, view_id: &str) -> StateResult<Vec<ObjectMapping>> {
        let rows: Vec<ObjectMapping> = self.scan(NEUTRON_OBJECT_MAPPING, "")?;
        Ok(rows
            .into_iter()
            .filter(|m| m.network_view_id == view_id)
            .collect())
    }
}

/// A consistent read snapshot of the store.
pub struct StoreReader {
    txn: redb::ReadTransaction,
}

impl StoreRead for StoreReader {
    fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        get_json(&table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_json(&table, prefix)
    }
}

// ── Writes ────────────────────────────────────────────────────────

/// An open write transaction. Obtained through [`StateStore::write`].
pub struct StoreTxn {
    txn: redb::WriteTransaction,
}

impl StoreRead for StoreTxn {
    fn fetch<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        get_json(&table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_json(&table, prefix)
    }
}

impl StoreTxn {
    fn put<T: Serialize>(&self, table: Table, key: &str, row: &T) -> StateResult<()> {
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table
            .insert(key, value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Insert `row` unless `key` is taken, in which case the stored row wins.
    fn insert_unique<T: Serialize + DeserializeOwned>(
        &self,
        table: Table,
        key: &str,
        row: T,
    ) -> StateResult<InsertOutcome<T>> {
        if let Some(existing) = self.fetch(table, key)? {
            return Ok(InsertOutcome::Existing(existing));
        }
        self.put(table, key, &row)?;
        Ok(InsertOutcome::Inserted(row))
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    /// Remove every row under `prefix` that satisfies `pred`, returning them.
    fn remove_where<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
        pred: impl Fn(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let mut doomed = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                continue;
            }
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if pred(&row) {
                doomed.push((key.value().to_string(), row));
            }
        }
        let mut removed = Vec::with_capacity(doomed.len());
        for (key, row) in doomed {
            table.remove(key.as_str()).map_err(map_err!(Write))?;
            removed.push(row);
        }
        Ok(removed)
    }

    // ── Grids ──────────────────────────────────────────────────────

    /// Insert or update a grid.
    pub fn put_grid(&self, grid: &Grid) -> StateResult<()> {
        self.put(GRIDS, &grid.id.to_string(), grid)?;
        debug!(grid_id = grid.id, "grid stored");
        Ok(())
    }

    /// Mark one grid active and every other grid inactive.
    pub fn activate_grid(&self, grid_id: GridId) -> StateResult<()> {
        let grids = self.list_grids()?;
        if !grids.iter().any(|g| g.id == grid_id) {
            return Err(StateError::NotFound(format!("grid {grid_id}")));
        }
        for mut grid in grids {
            let active = grid.id == grid_id;
            if grid.active != active {
                grid.active = active;
                self.put_grid(&grid)?;
            }
        }
        info!(grid_id, "grid activated");
        Ok(())
    }

    /// Delete a grid with its members and network views. Returns true if it existed.
    pub fn delete_grid(&self, grid_id: GridId) -> StateResult<bool> {
        if !self.remove(GRIDS, &grid_id.to_string())? {
            return Ok(false);
        }
        let members: Vec<GridMember> =
            self.remove_where(GRID_MEMBERS, &format!("{grid_id}/"), |_| true)?;
        let mut views = 0;
        for view in self.list_network_views(grid_id)? {
            self.delete_network_view(&view.id)?;
            views += 1;
        }
        info!(grid_id, members = members.len(), views, "grid deleted");
        Ok(true)
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert or update a member.
    pub fn put_member(&self, member: &GridMember) -> StateResult<()> {
        self.put(GRID_MEMBERS, &member.table_key(), member)
    }

    // ── Network views ──────────────────────────────────────────────

    /// Return the view named `name` in `grid_id`, creating it if absent.
    pub fn find_or_create_network_view(
        &self,
        grid_id: GridId,
        name: &str,
    ) -> StateResult<InsertOutcome<NetworkView>> {
        let view = NetworkView {
            id: network_view_id(grid_id, name),
            grid_id,
            name: name.to_string(),
            created_at: epoch_secs(),
        };
        let key = view.id.clone();
        let outcome = self.insert_unique(NETWORK_VIEWS, &key, view)?;
        if outcome.is_inserted() {
            debug!(grid_id, network_view = %name, "network view created");
        }
        Ok(outcome)
    }

    /// Delete a view with its conditions and authority row. Returns true if it existed.
    pub fn delete_network_view(&self, view_id: &str) -> StateResult<bool> {
        let Some(view) = self.get_network_view(view_id)? else {
            return Ok(false);
        };
        self.remove(NETWORK_VIEWS, view_id)?;
        self.remove_where::<MappingCondition>(
            MAPPING_CONDITIONS,
            &format!("{}/", view.grid_id),
            |c| c.network_view_id == view_id,
        )?;
        self.remove(MAPPING_MEMBERS, view_id)?;
        debug!(network_view = %view.name, "network view deleted");
        Ok(true)
    }

    // ── Mapping conditions ─────────────────────────────────────────

    /// Insert or update a condition row.
    pub fn put_condition(&self, condition: &MappingCondition) -> StateResult<()> {
        self.put(MAPPING_CONDITIONS, &condition.table_key(), condition)
    }

    /// Delete a grid's conditions that are not in `keep`. Returns how many went.
    pub fn retain_conditions(&self, grid_id: GridId, keep: &[&str]) -> StateResult<usize> {
        let removed = self.remove_where::<MappingCondition>(
            MAPPING_CONDITIONS,
            &format!("{grid_id}/"),
            |c| !keep.contains(&c.condition.as_str()),
        )?;
        Ok(removed.len())
    }

    // ── Mapping members ────────────────────────────────────────────

    /// Record the authority of a view unless the view already has one.
    pub fn insert_mapping_member(
        &self,
        row: MappingMember,
    ) -> StateResult<InsertOutcome<MappingMember>> {
        let key = row.network_view_id.clone();
        self.insert_unique(MAPPING_MEMBERS, &key, row)
    }

    // ── Service members ────────────────────────────────────────────

    /// Record a (member, role, network) assignment unless it exists.
    pub fn insert_service_member(
        &self,
        row: ServiceMember,
    ) -> StateResult<InsertOutcome<ServiceMember>> {
        let key = row.table_key();
        self.insert_unique(SERVICE_MEMBERS, &key, row)
    }

    /// Delete every service assignment of a network.
    pub fn delete_service_members(&self, network_id: &str) -> StateResult<Vec<ServiceMember>> {
        self.remove_where(SERVICE_MEMBERS, &format!("{network_id}/"), |_| true)
    }

    /// Delete the service assignments of a network within one view.
    pub fn delete_view_service_members(
        &self,
        network_id: &str,
        view_id: &str,
    ) -> StateResult<Vec<ServiceMember>> {
        self.remove_where(SERVICE_MEMBERS, &format!("{network_id}/{view_id}/"), |_| true)
    }

    // ── Object mappings ────────────────────────────────────────────

    /// Link a network/subnet pair to a view unless the pair is linked already.
    pub fn insert_object_mapping(
        &self,
        row: ObjectMapping,
    ) -> StateResult<InsertOutcome<ObjectMapping>> {
        let key = row.table_key();
        self.insert_unique(NEUTRON_OBJECT_MAPPING, &key, row)
    }

    /// Remove the link of a network/subnet pair, returning it.
    pub fn delete_object_mapping(
        &self,
        network_id: &str,
        subnet_id: &str,
    ) -> StateResult<Option<ObjectMapping>> {
        let existing = self.get_object_mapping(network_id, subnet_id)?;
        if existing.is_some() {
            self.remove(NEUTRON_OBJECT_MAPPING, &object_key(network_id, subnet_id))?;
        }
        Ok(existing)
    }
}

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let row: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
    }
    Ok(results)
}
