pub mod metadata;
pub mod rendition;
pub mod transcode;
