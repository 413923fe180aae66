pub mod types;
pub mod utils;
pub mod listing;
pub mod fetcher;
pub mod chunker;
pub mod prompts;
pub mod llm_adapter;
pub mod parser;
pub mod merger;
pub mod ledger;
pub mod state;
pub mod config;
pub mod pipeline;

pub use types::*;
pub use config::Config;
pub use fetcher::{RateLimitedFetcher, Transport};
pub use chunker::CorpusChunker;
pub use llm_adapter::{ModelGateway, OpenAiCompatibleGateway, ProviderConfig};
pub use parser::ResponseParser;
pub use merger::merge;
pub use ledger::{FileLedger, MemoryLedger, UsageLedger};
pub use state::{CorpusStore, ReportStore};
pub use pipeline::Pipeline;
