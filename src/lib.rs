//! Orchestration of the crossotope ROI pipeline: generating mixed left/right
//! ROI variants and running seed-based connectivity over sampled variants.

// Module declarations
pub mod external;
pub mod parse;
pub mod process;
pub mod results;
pub mod sampler;

#[cfg(test)]
mod tests;
