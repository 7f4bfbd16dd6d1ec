pub mod engine;
pub mod eligibility;

pub use eligibility::StackPolicy;
pub use engine::{cluster, ClusterStats};
