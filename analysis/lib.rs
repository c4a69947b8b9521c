#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod association;
pub mod config;
pub mod data;
pub mod effects;
pub mod estimate;
pub mod evaluate;
pub mod irls;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod types;

#[cfg(test)]
mod test_fixtures;
