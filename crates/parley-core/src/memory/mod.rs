//! Post-response memory write-back.
//!
//! [`analyzer::ExchangeAnalyzer`] classifies a finished exchange with one LLM
//! call; [`writer::MemoryWriter`] decides what (if anything) to persist.
//! Both run only from background jobs, after the response has ended.

pub mod analyzer;
pub mod writer;

use parley_types::error::RepositoryError;

use analyzer::AnalysisError;

/// Failure of the background memory job. Logged, never retried.
#[derive(Debug, thiserror::Error)]
pub enum WriteBackError {
    #[error("exchange analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("memory write failed: {0}")]
    Storage(#[from] RepositoryError),
}
