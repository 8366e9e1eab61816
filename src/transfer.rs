// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Chunked file uploads, reassembly, and the per-password recent-files
//! list.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use base64::Engine as _;
use dashmap::DashMap;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{cfg::config::Config, utils::generate_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Transferring,
    Completed,
    Cancelled,
}

struct FileTransfer {
    file_name: String,
    file_size: u64,
    #[allow(dead_code)] // recorded for completeness; not branched on
    file_type: String,
    chunks: BTreeMap<u64, Vec<u8>>,
    received_size: u64,
    status: TransferStatus,
    start_time: Instant,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadStartError {
    #[error("File too large")]
    TooLarge,
    #[error("File type not allowed")]
    TypeNotAllowed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("unknown transfer")]
    NotFound,
    #[error("transfer already completed or cancelled")]
    NotActive,
}

pub struct UploadProgress {
    pub progress: u8,
    pub speed: f64,
}

pub struct CompletedUpload {
    pub file_name: String,
    pub file_size: u64,
    pub file_data_base64: String,
}

#[derive(Debug, Clone)]
pub struct RecentFileEntry {
    pub file_name: String,
    pub file_size: u64,
    pub received_at_ms: i64,
}

pub struct TransferEngine {
    transfers: DashMap<String, FileTransfer>,
    recent_files: DashMap<String, VecDeque<RecentFileEntry>>,
    recent_files_limit: usize,
    max_file_size: u64,
    grace_period: Duration,
}

impl TransferEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            transfers: DashMap::new(),
            recent_files: DashMap::new(),
            recent_files_limit: cfg.recent_files_limit,
            max_file_size: cfg.max_file_size,
            grace_period: cfg.transfer_grace_period,
        }
    }

    /// Validates size and MIME type and opens a new transfer.
    pub fn start_upload(
        &self,
        cfg: &Config,
        file_name: &str,
        file_size: u64,
        file_type: &str,
    ) -> Result<String, UploadStartError> {
        if file_size > self.max_file_size {
            return Err(UploadStartError::TooLarge);
        }
        if !cfg.mime_allowed(file_type) {
            return Err(UploadStartError::TypeNotAllowed);
        }
        let id = generate_token();
        self.transfers.insert(id.clone(), FileTransfer {
            file_name: file_name.to_string(),
            file_size,
            file_type: file_type.to_string(),
            chunks: BTreeMap::new(),
            received_size: 0,
            status: TransferStatus::Transferring,
            start_time: Instant::now(),
        });
        Ok(id)
    }

    /// Accepts one chunk. Chunks may arrive out of order; duplicate
    /// indices overwrite the previous bytes for that index, and
    /// `receivedSize` is recomputed from the stored set rather than
    /// accumulated, so a duplicate or replaced chunk can never inflate it
    /// past the real total.
    pub fn add_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u64,
        data_b64: &str,
    ) -> Result<UploadProgress, TransferError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .unwrap_or_default();

        let mut transfer = self
            .transfers
            .get_mut(transfer_id)
            .ok_or(TransferError::NotFound)?;
        if transfer.status != TransferStatus::Transferring {
            return Err(TransferError::NotActive);
        }

        transfer.chunks.insert(chunk_index, decoded);
        transfer.received_size =
            transfer.chunks.values().map(|c| c.len() as u64).sum();
        let received_size = transfer.received_size.min(transfer.file_size);

        let progress = if transfer.file_size == 0 {
            100
        } else {
            ((received_size as f64 / transfer.file_size as f64) * 100.0) as u8
        };

        let elapsed = transfer.start_time.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            received_size as f64 / elapsed
        } else {
            0.0
        };

        Ok(UploadProgress { progress, speed })
    }

    /// Concatenates present chunks in ascending index order. Missing
    /// indices are simply absent from the `BTreeMap` and contribute
    /// nothing; gap detection is not performed.
    pub fn complete_upload(
        &self,
        transfer_id: &str,
        password: &str,
    ) -> Result<CompletedUpload, TransferError> {
        let mut transfer = self
            .transfers
            .get_mut(transfer_id)
            .ok_or(TransferError::NotFound)?;
        if transfer.status != TransferStatus::Transferring {
            return Err(TransferError::NotActive);
        }

        let mut assembled = Vec::with_capacity(transfer.received_size as usize);
        for chunk in transfer.chunks.values() {
            assembled.extend_from_slice(chunk);
        }
        transfer.status = TransferStatus::Completed;

        let result = CompletedUpload {
            file_name: transfer.file_name.clone(),
            file_size: transfer.file_size,
            file_data_base64: base64::engine::general_purpose::STANDARD
                .encode(&assembled),
        };
        drop(transfer);

        self.push_recent_file(password, &result.file_name, result.file_size);
        Ok(result)
    }

    /// Marks cancelled and deletes immediately — no grace window, unlike a
    /// normal completion.
    pub fn cancel(&self, transfer_id: &str) {
        self.transfers.remove(transfer_id);
    }

    /// Schedules the grace-period purge after a successful completion,
    /// spawned as a detached background task rather than blocking the
    /// caller on it.
    pub fn schedule_purge(self: &Arc<Self>, transfer_id: String) {
        let engine = Arc::clone(self);
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if engine.transfers.remove(&transfer_id).is_some() {
                debug!(transfer_id, "purged completed transfer after grace period");
            }
        });
    }

    fn push_recent_file(&self, password: &str, file_name: &str, file_size: u64) {
        let mut list = self
            .recent_files
            .entry(password.to_string())
            .or_insert_with(VecDeque::new);
        list.push_front(RecentFileEntry {
            file_name: file_name.to_string(),
            file_size,
            received_at_ms: chrono::Utc::now().timestamp_millis(),
        });
        while list.len() > self.recent_files_limit {
            list.pop_back();
        }
    }

    pub fn recent_files_for(&self, password: &str) -> Vec<RecentFileEntry> {
        self.recent_files
            .get(password)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Builds the `file_command{command:"file_receive", ...}` payload forwarded
/// to the Host on upload completion.
pub fn file_receive_payload(transfer_id: &str, completed: &CompletedUpload) -> Value {
    json!({
        "transferId": transfer_id,
        "fileName": completed.file_name,
        "fileData": completed.file_data_base64,
        "fileSize": completed.file_size,
    })
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::*;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn rejects_oversize_and_disallowed_type() {
        let cfg = Config::default();
        let engine = TransferEngine::new(&cfg);
        assert_eq!(
            engine.start_upload(&cfg, "big.bin", cfg.max_file_size + 1, "text/plain"),
            Err(UploadStartError::TooLarge)
        );
        assert_eq!(
            engine.start_upload(&cfg, "evil.exe", 10, "application/x-msdownload"),
            Err(UploadStartError::TypeNotAllowed)
        );
    }

    #[test]
    fn out_of_order_chunks_reassemble_correctly() {
        let cfg = Config::default();
        let engine = TransferEngine::new(&cfg);
        let id = engine
            .start_upload(&cfg, "a.txt", 10, "text/plain")
            .expect("allowed");

        engine.add_chunk(&id, 1, &b64("56789")).expect("chunk 1");
        engine.add_chunk(&id, 0, &b64("01234")).expect("chunk 0");

        let completed = engine.complete_upload(&id, "alpha").expect("complete");
        assert_eq!(completed.file_name, "a.txt");
        assert_eq!(completed.file_size, 10);
        assert_eq!(completed.file_data_base64, b64("0123456789"));
    }

    #[test]
    fn duplicate_chunk_index_overwrites_not_accumulates() {
        let cfg = Config::default();
        let engine = TransferEngine::new(&cfg);
        let id = engine
            .start_upload(&cfg, "a.txt", 5, "text/plain")
            .expect("allowed");
        engine.add_chunk(&id, 0, &b64("wrong")).expect("first");
        engine.add_chunk(&id, 0, &b64("right")).expect("overwrite");
        let completed = engine.complete_upload(&id, "alpha").expect("complete");
        assert_eq!(completed.file_data_base64, b64("right"));
    }

    #[test]
    fn cancel_makes_transfer_unknown() {
        let cfg = Config::default();
        let engine = TransferEngine::new(&cfg);
        let id = engine
            .start_upload(&cfg, "a.txt", 5, "text/plain")
            .expect("allowed");
        engine.cancel(&id);
        assert_eq!(
            engine.add_chunk(&id, 0, &b64("x")),
            Err(TransferError::NotFound)
        );
    }

    #[test]
    fn recent_files_caps_and_orders_newest_first() {
        let mut cfg = Config::default();
        cfg.recent_files_limit = 2;
        let engine = TransferEngine::new(&cfg);
        for name in ["a.txt", "b.txt", "c.txt"] {
            let id = engine.start_upload(&cfg, name, 1, "text/plain").expect("ok");
            engine.add_chunk(&id, 0, &b64("x")).expect("chunk");
            engine.complete_upload(&id, "alpha").expect("complete");
        }
        let recent = engine.recent_files_for("alpha");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].file_name, "c.txt");
        assert_eq!(recent[1].file_name, "b.txt");
    }
}
