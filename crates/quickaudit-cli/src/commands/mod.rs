pub mod audit;
pub mod common;
pub mod queue;
pub mod status;
pub mod sync;
pub mod watch;
