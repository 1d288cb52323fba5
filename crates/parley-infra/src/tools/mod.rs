//! Tool host implementations.

pub mod gateway;

pub use gateway::HttpToolGateway;
