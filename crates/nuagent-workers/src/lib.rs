mod backoff;
mod critical_section;
mod jobs;
mod llm;
mod supervisor;

pub use backoff::retry_with_backoff;
pub use critical_section::{CriticalSectionCounter, CriticalSectionGuard};
pub use jobs::{ConversationSummarizer, EmbeddingGenerator, ExchangeSummarizer};
pub use llm::{collect_text, TextResponse};
pub use supervisor::{PausableTask, StatusHandle, Supervisor, WorkerJob, WorkerStatus};
