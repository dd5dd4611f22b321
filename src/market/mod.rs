pub mod api;
pub mod channel;
pub mod controller;
pub mod delta;
pub mod portfolio;
pub mod render;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;
