pub mod policy;
pub mod rules;

pub use policy::AccessPolicy;
pub use rules::{AccessRule, Level};
