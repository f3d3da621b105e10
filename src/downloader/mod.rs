pub mod core;
pub mod error;
pub mod manager;
pub mod models;
pub mod processor;
pub mod progress;
pub mod remux;
pub mod retry;
pub mod task;

pub use self::core::{DownloadCore, RetrievalConfig, Retriever};
pub use manager::{QueueConfig, QueueManager};
pub use processor::{MediaProcessor, PipelineHooks, ReporterConfig};
pub use progress::{ProgressStage, ProgressTracker, ProgressUpdate};
pub use task::{Requester, Task, TaskEvent, TaskState};
