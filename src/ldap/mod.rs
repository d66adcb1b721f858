pub mod filters;
pub mod protocol;

pub use filters::{parse_filter, Filter};
pub use protocol::{MessageTag, Request, ResultCode};
