pub mod recognition;
pub mod store;
