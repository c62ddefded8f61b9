//! ipamgrid-sync — grid sync for ipamgrid.
//!
//! Discovers appliance members, reads grid-wide policy from the grid
//! master, and keeps both fresh in the `StateStore`.
//!
//! # Architecture
//!
//! ```text
//! GridSyncer
//!   ├── sync_grid(force)     throttled by the grid's minimum wait
//!   │   ├── MemberRegistry   list members → classify GM / CPM / REGULAR
//!   │   │                    → upsert, mark vanished members Off
//!   │   └── GridConfigSync   grid master extended attributes → GridSettings
//!   └── run(shutdown)        periodic resync once the maximum wait elapses
//!
//! ApplianceGateway (trait)   read-only discovery calls
//!   └── StaticGateway        fixed snapshot (replay, tests)
//! ```

pub mod error;
pub mod gateway;
pub mod members;
pub mod settings;
pub mod syncer;

pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use gateway::{
    ApplianceGateway, AttributeMap, AttributeValue, LicenseRecord, MemberRecord,
    ServiceSettingRecord, StaticGateway,
};
pub use members::{MemberRegistry, SyncReport};
pub use settings::{GridConfigSync, parse_settings};
pub use syncer::{GridSyncer, SkipReason, SyncOutcome};
