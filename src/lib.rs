pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod transform;
