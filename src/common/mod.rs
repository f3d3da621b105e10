pub mod logger;
pub mod process;
pub mod utils;
