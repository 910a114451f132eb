pub mod activity;
pub mod events;
pub mod store;
pub mod subsystems;
