pub mod aggregator;
pub mod scheduler;
pub mod session;
