//! Capped-concurrency batch execution with one overall deadline.
//!
//! Items are split into fixed-size chunks, each chunk runs as its own task,
//! at most `concurrency` tasks are in flight and results are concatenated in
//! input order. The first failing or panicking chunk fails the whole run and
//! partial results are discarded. When the deadline passes, outstanding
//! tasks are detached rather than aborted and their results are dropped.

use crate::error::CatalogError;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanoutError<E> {
    #[error("chunk failed: {0}")]
    Chunk(E),

    #[error("chunk task panicked: {0}")]
    Panicked(String),

    #[error("fan-out did not finish within {0:?}")]
    Timeout(Duration),
}

impl From<FanoutError<CatalogError>> for CatalogError {
    fn from(err: FanoutError<CatalogError>) -> Self {
        match err {
            FanoutError::Chunk(e) => e,
            FanoutError::Timeout(deadline) => CatalogError::Timeout(deadline),
            FanoutError::Panicked(msg) => {
                CatalogError::Upstream(format!("fan-out task panicked: {}", msg))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedFanout {
    concurrency: usize,
    deadline: Duration,
}

impl BoundedFanout {
    pub fn new(concurrency: usize, deadline: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            deadline,
        }
    }

    pub async fn run<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        per_chunk: F,
    ) -> Result<Vec<R>, FanoutError<E>>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let chunks = split_chunks(items, chunk_size.max(1));
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let work = stream::iter(chunks)
            .map(|chunk| tokio::spawn(per_chunk(chunk)))
            .buffered(self.concurrency)
            .map(|joined| match joined {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(FanoutError::Chunk(e)),
                Err(join_err) => Err(FanoutError::Panicked(join_err.to_string())),
            })
            .try_fold(Vec::new(), |mut acc, results| async move {
                acc.extend(results);
                Ok(acc)
            });

        match tokio::time::timeout(self.deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(FanoutError::Timeout(self.deadline)),
        }
    }
}

fn split_chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}
