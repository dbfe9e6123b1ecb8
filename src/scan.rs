//! Cursor-based iteration over a hash.
//!
//! [`HashScan`] pulls `HSCAN` pages on demand and hands out one
//! `(field, value)` pair at a time from a local lookahead queue. As with
//! any scan, entries changed during the iteration may show up zero or more
//! times.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::commands::ScanOptions;
use crate::engine::{Engine, WeakEngine};
use crate::error::{RedustError, Result};
use crate::request::ExecMode;

/// Default `COUNT` hint per page.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Pull-based `HSCAN` iterator.
#[derive(Debug, Clone)]
pub struct HashScan {
    engine: WeakEngine,
    key: Bytes,
    lookahead: VecDeque<(Bytes, Bytes)>,
    cursor: u64,
    /// The server returned cursor 0.
    finished: bool,
    page_size: u64,
    pattern: Option<Bytes>,
}

impl HashScan {
    pub fn new(engine: &Engine, key: impl Into<Bytes>) -> Self {
        Self {
            engine: engine.downgrade(),
            key: key.into(),
            lookahead: VecDeque::new(),
            cursor: 0,
            finished: false,
            page_size: DEFAULT_PAGE_SIZE,
            pattern: None,
        }
    }

    /// `COUNT` hint sent with every page (at least 1).
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Only return fields matching the glob-style `pattern`.
    pub fn pattern(mut self, pattern: impl Into<Bytes>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// No pairs left locally or on the server.
    pub fn is_exhausted(&self) -> bool {
        self.finished && self.lookahead.is_empty()
    }

    /// Next pair, or `None` once the scan is exhausted.
    pub async fn advance(&mut self) -> Result<Option<(Bytes, Bytes)>> {
        loop {
            if let Some(pair) = self.lookahead.pop_front() {
                return Ok(Some(pair));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drain the rest of the scan.
    pub async fn collect_all(&mut self) -> Result<Vec<(Bytes, Bytes)>> {
        let mut out = Vec::new();
        while let Some(pair) = self.advance().await? {
            out.push(pair);
        }
        Ok(out)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| RedustError::Closed("engine dropped during hash scan".into()))?;

        let opts = ScanOptions {
            pattern: self.pattern.clone(),
            count: Some(self.page_size),
        };
        let resp = engine
            .hscan(self.key.clone(), self.cursor, &opts, ExecMode::Syncron)
            .await
            .reply()
            .await?
            .into_result()?;

        let cursor = resp
            .cursor()
            .ok_or_else(|| RedustError::Protocol("HSCAN reply without cursor".into()))?;
        let items = resp
            .array()
            .ok_or_else(|| RedustError::Protocol("HSCAN reply without items".into()))?;
        if items.len() % 2 != 0 {
            return Err(RedustError::Protocol(format!(
                "HSCAN returned an odd number of items ({})",
                items.len()
            )));
        }

        for pair in items.chunks_exact(2) {
            match (&pair[0], &pair[1]) {
                (Some(field), Some(value)) => {
                    self.lookahead.push_back((field.clone(), value.clone()))
                }
                _ => return Err(RedustError::Protocol("HSCAN returned a null item".into())),
            }
        }
        tracing::trace!(cursor, fetched = items.len() / 2, "hash scan page");
        self.cursor = cursor;
        self.finished = cursor == 0;
        Ok(())
    }
}

/// Two exhausted scans are equal; an exhausted scan never equals a live
/// one. Live scans are equal when they sit at the same position of the
/// same hash.
impl PartialEq for HashScan {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_exhausted(), other.is_exhausted()) {
            (true, true) => true,
            (false, false) => {
                self.key == other.key
                    && self.cursor == other.cursor
                    && self.finished == other.finished
                    && self.lookahead == other.lookahead
            }
            _ => false,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
