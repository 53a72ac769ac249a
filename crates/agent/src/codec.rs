// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON-RPC framing over agent stdio.
//!
//! One JSON object per line in each direction. Unrecognised or unparseable
//! lines from the agent are logged and skipped — agent CLIs interleave
//! diagnostics on stdout and a noisy line must not kill the stream.

use crate::AgentError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use vibe80_core::{AgentCommand, AgentEvent};

/// Reads agent events from the subprocess stdout.
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stdout: R) -> Self {
        Self { lines: BufReader::new(stdout).lines() }
    }

    /// Next recognised event, or `None` at end of stream (agent exited).
    pub async fn next_event(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| AgentError::Codec(e.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(trimmed) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    tracing::debug!(error = %e, line = trimmed, "skipping unrecognised agent line");
                }
            }
        }
    }
}

/// Writes supervisor commands to the subprocess stdin.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stdin: W) -> Self {
        Self { inner: stdin }
    }

    pub async fn write_command(&mut self, command: &AgentCommand) -> Result<(), AgentError> {
        let mut line =
            serde_json::to_vec(command).map_err(|e| AgentError::Codec(e.to_string()))?;
        line.push(b'\n');
        self.inner
            .write_all(&line)
            .await
            .map_err(|e| AgentError::Codec(e.to_string()))?;
        self.inner.flush().await.map_err(|e| AgentError::Codec(e.to_string()))
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
