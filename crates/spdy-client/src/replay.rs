//! Trace replay
//!
//! A trace is a tab-separated file with one request per line:
//! `host<TAB>path<TAB>offset_ms`. Each request is fired at its offset from
//! the start of the replay through a shared [`Client`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::Client;

/// Errors reading a trace
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// One request of a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub host: String,
    pub path: String,
    /// When to fire, relative to the start of the replay
    pub offset: Duration,
}

/// Parse trace text. Blank lines and lines starting with `#` are skipped.
pub fn parse_trace(input: &str) -> Result<Vec<TraceEntry>, TraceError> {
    let mut entries = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let parse_error = |reason: &str| TraceError::Parse {
            line: index + 1,
            reason: reason.to_string(),
        };
        let mut fields = line.split('\t');
        let host = fields.next().filter(|h| !h.is_empty()).ok_or_else(|| parse_error("missing host"))?;
        let path = fields.next().filter(|p| !p.is_empty()).ok_or_else(|| parse_error("missing path"))?;
        let offset = fields
            .next()
            .ok_or_else(|| parse_error("missing offset"))?
            .trim()
            .parse::<u64>()
            .map_err(|_| parse_error("offset is not a number of milliseconds"))?;

        entries.push(TraceEntry {
            host: host.to_string(),
            path: path.to_string(),
            offset: Duration::from_millis(offset),
        });
    }
    Ok(entries)
}

/// Read and parse a trace file
pub async fn load_trace(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_trace(&content)
}

/// Outcome of one replayed request
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub index: usize,
    pub host: String,
    pub path: String,
    pub status: Option<u16>,
    pub bytes: usize,
    /// Offset the request was fired at
    pub started_ms: u64,
    /// Time from firing to the last byte or the failure
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Result of a whole replay
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: usize,
    pub wall_time_ms: u64,
    pub completions: Vec<Completion>,
}

/// Fire every entry at its offset and wait for all of them
pub async fn replay(client: Arc<Client>, entries: Vec<TraceEntry>) -> Summary {
    let start = Instant::now();
    let requests = entries.len();
    let mut tasks = JoinSet::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            tokio::time::sleep_until(start + entry.offset).await;
            fire(&client, index, entry, start).await
        });
    }

    let mut completions = Vec::with_capacity(requests);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(completion) => completions.push(completion),
            Err(e) => warn!("Replay task failed: {}", e),
        }
    }
    completions.sort_by_key(|c| c.index);

    let succeeded = completions.iter().filter(|c| c.error.is_none()).count();
    let summary = Summary {
        requests,
        succeeded,
        failed: requests - succeeded,
        bytes: completions.iter().map(|c| c.bytes).sum(),
        wall_time_ms: start.elapsed().as_millis() as u64,
        completions,
    };
    info!(
        "Replayed {} requests: {} ok, {} failed in {} ms",
        summary.requests, summary.succeeded, summary.failed, summary.wall_time_ms
    );
    summary
}

async fn fire(client: &Client, index: usize, entry: TraceEntry, start: Instant) -> Completion {
    let fired = Instant::now();
    info!("Requesting {}-th url: {}{}", index, entry.host, entry.path);

    let result = match client.get(&entry.host, &entry.path) {
        Ok(handle) => handle.response().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let mut completion = Completion {
        index,
        host: entry.host,
        path: entry.path,
        status: None,
        bytes: 0,
        started_ms: fired.duration_since(start).as_millis() as u64,
        elapsed_ms: fired.elapsed().as_millis() as u64,
        error: None,
    };
    match result {
        Ok(response) => {
            info!(
                "Responding {} for {}-th url ({} bytes, {} ms)",
                response.reply.status,
                index,
                response.body.len(),
                completion.elapsed_ms
            );
            completion.status = Some(response.reply.status);
            completion.bytes = response.body.len();
        }
        Err(e) => {
            warn!("Request {} to {} failed: {}", index, completion.host, e);
            completion.error = Some(e);
        }
    }
    completion
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace() {
        let trace = "example.com\t/index.html\t0\n\
                     \n\
                     # static assets\n\
                     cdn.example.com\t/app.js\t150\r\n";
        let entries = parse_trace(trace).unwrap();
        assert_eq!(
            entries,
            vec![
                TraceEntry {
                    host: "example.com".to_string(),
                    path: "/index.html".to_string(),
                    offset: Duration::ZERO,
                },
                TraceEntry {
                    host: "cdn.example.com".to_string(),
                    path: "/app.js".to_string(),
                    offset: Duration::from_millis(150),
                },
            ]
        );
    }

    #[test]
    fn test_parse_trace_errors() {
        assert!(matches!(
            parse_trace("example.com\t/\tsoon\n"),
            Err(TraceError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_trace("a\t/\t1\nexample.com\n"),
            Err(TraceError::Parse { line: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_trace_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");
        std::fs::write(&path, "example.com\t/\t10\n").unwrap();

        let entries = load_trace(&path).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].offset, Duration::from_millis(10));

        assert!(matches!(
            load_trace(&dir.path().join("missing.tsv")).await,
            Err(TraceError::Io(_))
        ));
    }
}
