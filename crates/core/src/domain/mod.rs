pub mod agent;
pub mod envelope;
