pub mod archive;
pub mod dedupe;
pub mod dependencies;
pub mod direct_downloader;
pub mod engine;
pub mod events;
pub mod exiftool;
pub mod ffmpeg;
pub mod filename;
pub mod http_client;
pub mod image_blend;
pub mod manifest;
pub mod media_name;
pub mod metadata_writer;
pub mod overlay;
pub mod process;
