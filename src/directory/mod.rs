pub mod entry;

pub use entry::{dn_storage_id, dn_to_rdns, Entry};
