pub mod bunch;
pub mod market1501;
pub mod sampler;
pub mod transforms;

pub use bunch::{get_data_bunch, DataBunch};
pub use market1501::{ImageItem, Market1501};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("cannot parse person/camera id from file name: {0}")]
    BadFileName(String),

    #[error("dataset split {0} contains no images")]
    EmptySplit(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
}
