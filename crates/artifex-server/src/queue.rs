// SPDX-License-Identifier: BUSL-1.1
//! # Build request queue
//!
//! At most one pending [`BuildRequest`] exists per (user, machine).
//! Repeated submissions merge into it, each touch stamping the file with a
//! fresh sequence number. Workers take the oldest unselected record by
//! *first* submission, so a user editing continuously cannot starve
//! others, and build the record's most recently touched file.
//!
//! A record is removed by [`RequestQueue::completed`] whatever the build
//! outcome; files touched while the build was running are dropped with it
//! and re-requested by the client if still uncovered.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use artifex_core::{path, UserMachine, UserMachineFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Touch {
    at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub owner: UserMachine,
    files: HashMap<String, Touch>,
    pub first_requested: DateTime<Utc>,
    first_seq: u64,
    pub selected_at: Option<DateTime<Utc>>,
}

impl BuildRequest {
    /// The most recently touched file.
    pub fn file_of_interest(&self) -> Option<&str> {
        self.files
            .iter()
            .max_by_key(|(_, touch)| touch.seq)
            .map(|(name, _)| name.as_str())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn last_requested(&self, filename: &str) -> Option<DateTime<Utc>> {
        self.files.get(filename).map(|t| t.at)
    }

    pub fn is_selected(&self) -> bool {
        self.selected_at.is_some()
    }
}

/// A request claimed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRequest {
    pub owner: UserMachine,
    pub filename: String,
    pub file_count: usize,
    pub first_requested: DateTime<Utc>,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    records: HashMap<UserMachine, BuildRequest>,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a request into the record for its (user, machine).
    pub fn submit(&self, request: &UserMachineFile) {
        self.submit_at(request, Utc::now());
    }

    pub fn submit_at(&self, request: &UserMachineFile, now: DateTime<Utc>) {
        let filename = path::normalize(&request.filename);
        let owner = request.user_machine();
        {
            let mut state = self.state.lock();
            state.seq += 1;
            let touch = Touch { at: now, seq: state.seq };
            let record = state
                .records
                .entry(owner.clone())
                .or_insert_with(|| BuildRequest {
                    owner,
                    files: HashMap::new(),
                    first_requested: now,
                    first_seq: touch.seq,
                    selected_at: None,
                });
            record.files.insert(filename, touch);
        }
        self.notify.notify_one();
    }

    /// Claim the unselected record that was first submitted earliest.
    pub fn next(&self) -> Option<SelectedRequest> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state
            .records
            .values_mut()
            .filter(|r| !r.is_selected())
            .min_by_key(|r| r.first_seq)?;
        let filename = record.file_of_interest()?.to_string();
        record.selected_at = Some(now);
        Some(SelectedRequest {
            owner: record.owner.clone(),
            filename,
            file_count: record.files.len(),
            first_requested: record.first_requested,
            selected_at: now,
        })
    }

    /// Drop the record for `owner`, selected or not.
    pub fn completed(&self, owner: &UserMachine) {
        self.state.lock().records.remove(owner);
    }

    /// Resolves after the next submission (or immediately if one arrived
    /// since the last wait).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, owner: &UserMachine) -> Option<BuildRequest> {
        self.state.lock().records.get(owner).cloned()
    }

    /// Records in selection order.
    pub fn snapshot(&self) -> Vec<BuildRequest> {
        let mut records: Vec<BuildRequest> = self.state.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.first_seq);
        records
    }

    /// Plaintext table of pending requests for `GET /queue`.
    pub fn render_table(&self, now: DateTime<Utc>) -> String {
        let records = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<8} {:>10} {:>10} {:<24} {:>6} {:<8}",
            "POSITION", "WAIT", "USER", "MACHINE", "FILES", "STATE"
        );
        for (position, record) in records.iter().enumerate() {
            let wait = (now - record.first_requested).to_std().unwrap_or_default();
            let state = if record.is_selected() { "building" } else { "queued" };
            let _ = writeln!(
                out,
                "{:<8} {:>9.1}s {:>10} {:<24} {:>6} {:<8}",
                position,
                wait.as_secs_f64(),
                record.owner.user_id,
                record.owner.machine.as_str(),
                record.file_count(),
                state
            );
        }
        out
    }
}
