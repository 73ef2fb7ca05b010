//! Service database access

pub mod init;

pub use init::*;
