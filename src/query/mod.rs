//! Read-side query surface: glob matching, traversal, observer views,
//! change subscriptions, and the point-query facade.

pub mod glob;
pub mod layer;
pub mod observer;
pub mod subscribe;
pub mod traversal;

pub use glob::GlobCache;
pub use layer::QueryLayer;
pub use observer::ObserverView;
pub use subscribe::{diff_states, StateDiff, SubscribeOptions, SubscriptionManager};
pub use traversal::{Direction, LabelFilter};
