//! Prediction cache and lifecycle manager.

mod engine;

pub use engine::PredictionEngine;

#[cfg(test)]
mod tests;
