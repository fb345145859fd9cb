pub mod check;
pub mod cmd;
pub mod convert;
pub mod downloader;
pub mod envconfig;
pub mod error;
pub mod format;
pub mod hub;
pub mod progress;
pub mod recipe;
pub mod store;

pub use convert::{load_weights, EncoderConfig, KeyRenamer, QuantizeConfig, TokenizerInfo, Weights};
pub use downloader::Downloader;
pub use envconfig::EnvConfig;
pub use error::PrepError;
pub use hub::{FileFilter, HubClient, RepoInfo, Snapshot};
pub use recipe::{Preparer, Recipe, Source, Transform};
pub use store::{Manifest, ModelStore, VerifyReport};
