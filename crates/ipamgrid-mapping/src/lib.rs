//! ipamgrid mapping engine — condition catalog, network view resolution,
//! member reservation.
//!
//! Maps orchestration-platform subnets onto appliance network views. A
//! subnet's mapping is decided once and then read back: the catalog is
//! consulted only while no mapping is recorded for it.
//!
//! # Components
//!
//! - **`scope`** — network/subnet inputs, scope attributes, view templates
//! - **`catalog`** — condition validation, binding, precedence matching
//! - **`reservation`** — authority and service member reservation
//! - **`resolver`** — resolve and release inside one store transaction
//! - **`engine`** — `IpamEngine`, grid sync plus resolution

pub mod catalog;
pub mod engine;
pub mod error;
pub mod reservation;
pub mod resolver;
pub mod scope;

pub use catalog::{
    AuthorityPolicy, CatalogEntry, ConditionCatalog, ConditionKey, ReservationPolicy,
    ServicePolicy,
};
pub use engine::IpamEngine;
pub use error::{MappingError, MappingResult};
pub use reservation::{MemberReservationEngine, Reservation};
pub use resolver::{
    DnsMembers, MappingContext, MappingResolver, ResolvedMember, dns_view_name, release_subnet,
};
pub use scope::{AddressScope, Network, ScopeAttributes, Subnet, TemplateVar, ViewTemplate};
