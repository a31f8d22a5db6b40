mod base_address;
pub mod effects;
pub mod memory_accessors;
pub mod patches;
pub mod session;
pub mod settings;
mod sm64;
#[cfg(test)]
mod test_support;
pub mod watcher;

pub use crate::base_address::{find_base_address, BaseAddressNotFound};
pub use crate::sm64::*;
