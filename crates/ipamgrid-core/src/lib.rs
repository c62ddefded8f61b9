pub mod clock;
pub mod config;
pub mod ids;
pub mod types;

pub use config::{
    AuthoritySelector, ConditionConfig, GridSection, IpamConfig, MemberPolicy, SyncSection,
    NEXT_AVAILABLE_MEMBER,
};
pub use clock::epoch_secs;
pub use ids::{member_id, network_view_id};
pub use types::*;
