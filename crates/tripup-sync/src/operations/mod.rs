//! Composite operations run on the asset manager's queues.

pub mod delete;
pub mod download;
pub mod import;
pub mod upload;

pub use delete::AssetDeleteOperation;
pub use download::AssetDownloadOperation;
pub use import::AssetImportOperation;
pub use upload::AssetUploadOperation;
