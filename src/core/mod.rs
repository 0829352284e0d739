pub mod automation;
pub mod browser;
pub mod config;
pub mod coordinator;
pub mod lifecycle;
pub mod notify;
pub mod reaper;
pub mod relay;
pub mod scheduler;
pub mod store;
pub mod terminal;
pub mod workflow;

#[cfg(test)]
pub mod tests;
