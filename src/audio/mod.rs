pub mod analysis;
#[cfg(feature = "live")]
pub mod capture;
pub mod decode;
pub mod features;
pub mod pitch;
