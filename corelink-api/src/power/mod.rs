//! Power manager collaborator

pub mod interface;

pub use interface::PowerManager;
