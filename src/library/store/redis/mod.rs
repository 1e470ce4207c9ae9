//! [`StreamStore`](super::StreamStore) implementation using [`redis`](::redis)

const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_RANGE_MIN: &str = "-";
const STREAM_RANGE_MAX: &str = "+";

const ERROR_CODE_BUSY_GROUP: &str = "BUSYGROUP";
const ERROR_CODE_NO_GROUP: &str = "NOGROUP";

mod factory;
mod store;

pub use factory::*;
pub use store::*;
