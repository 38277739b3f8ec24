pub mod factory;
pub mod transport;
