pub mod logger;
pub mod schedule;
pub mod train;

pub use logger::setup_logger;
pub use schedule::WarmupMultiStep;
pub use train::Trainer;
