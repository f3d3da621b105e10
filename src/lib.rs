pub mod common;
pub mod downloader;
pub mod post_process;
pub mod services;
pub mod transport;
