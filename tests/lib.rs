// Test module declarations
pub mod common;

mod integration;
mod unit;
