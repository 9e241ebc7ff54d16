//! Value types shared by the lookup service, its transports and its listeners

pub mod lookup;

pub use lookup::{
    LifecycleState, LookupKey, LookupResponse, LookupServiceStats, RefreshPolicy,
};
