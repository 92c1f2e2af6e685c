// Kiln - Distributed fine-tuning orchestrator
// Library exports

// Core modules
pub mod config;
pub mod dist; // Process identity and collective primitives
pub mod errors;
pub mod metrics;
pub mod persistence; // Save strategy and model persistence contract
pub mod providers; // Dataset, model, and generation collaborators
pub mod sampling; // In-training generation checks
pub mod training; // Epoch/step loop, checkpoints, schedules
