pub use crate::deque::DequeVariant;
pub use crate::job::Job;
pub use crate::pool::{Pool, PoolParams};
