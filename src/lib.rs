pub mod config;
pub mod connector;
pub mod device;
pub mod supervisor;
pub mod transport;
