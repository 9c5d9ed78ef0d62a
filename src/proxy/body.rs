//! Replayable request bodies.
//!
//! Failover needs to resend the request body on every attempt, so the body
//! is materialized before the first connect: small bodies stay in memory,
//! large ones spool to a request-scoped temp file that is removed when the
//! last replay handle drops. Bodies over the configured ceiling are
//! rejected before any backend is dialed.

use hyper::body::{Bytes, HttpBody};
use hyper::Body;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{GateError, GateResult};

const REPLAY_CHUNK_SIZE: usize = 64 * 1024;

/// A fully-buffered request body that can produce a fresh [`Body`] per
/// proxy attempt.
#[derive(Clone, Debug)]
pub enum BufferedBody {
    Memory(Bytes),
    Spooled { path: Arc<TempPath>, len: u64 },
}

impl BufferedBody {
    /// Drain `body`, keeping up to `spool_threshold` bytes in memory and
    /// spooling beyond that. Fails with `PayloadTooLarge` past `max_bytes`.
    pub async fn buffer(mut body: Body, spool_threshold: u64, max_bytes: u64) -> GateResult<Self> {
        let mut in_memory: Vec<u8> = Vec::new();
        let mut spool: Option<tokio::fs::File> = None;
        let mut spool_path: Option<TempPath> = None;
        let mut total: u64 = 0;

        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|e| GateError::io(format!("body read failed: {}", e)))?;
            total += chunk.len() as u64;
            if total > max_bytes {
                return Err(GateError::payload_too_large(format!(
                    "request body exceeds {} bytes",
                    max_bytes
                )));
            }

            if spool.is_none() && total > spool_threshold {
                let (file, path) = tempfile::NamedTempFile::new()
                    .map_err(|e| GateError::io(format!("cannot create spool file: {}", e)))?
                    .into_parts();
                let mut file = tokio::fs::File::from_std(file);
                file.write_all(&in_memory).await?;
                in_memory.clear();
                spool = Some(file);
                spool_path = Some(path);
                debug!(bytes = total, "request body spooling to disk");
            }

            match spool.as_mut() {
                Some(file) => file.write_all(&chunk).await?,
                None => in_memory.extend_from_slice(&chunk),
            }
        }

        match (spool, spool_path) {
            (Some(mut file), Some(path)) => {
                file.flush().await?;
                Ok(BufferedBody::Spooled {
                    path: Arc::new(path),
                    len: total,
                })
            }
            _ => Ok(BufferedBody::Memory(Bytes::from(in_memory))),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            BufferedBody::Memory(bytes) => bytes.len() as u64,
            BufferedBody::Spooled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh body replaying the buffered content.
    pub fn to_body(&self) -> Body {
        match self {
            BufferedBody::Memory(bytes) => Body::from(bytes.clone()),
            BufferedBody::Spooled { path, .. } => {
                let (mut tx, body) = Body::channel();
                let path = Arc::clone(path);
                tokio::spawn(async move {
                    let mut file = match tokio::fs::File::open(&**path).await {
                        Ok(file) => file,
                        Err(e) => {
                            debug!(error = %e, "spool file open failed");
                            tx.abort();
                            return;
                        }
                    };
                    let mut buf = vec![0u8; REPLAY_CHUNK_SIZE];
                    loop {
                        match file.read(&mut buf).await {
                            Ok(0) => break,
                            Ok(n) => {
                                if tx.send_data(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "spool file read failed");
                                tx.abort();
                                break;
                            }
                        }
                    }
                });
                body
            }
        }
    }
}
