pub mod baseline;
pub mod cfg;
pub mod checkpoint;
pub mod resnet;

pub use baseline::{build_model, Baseline};
pub use cfg::Config;
