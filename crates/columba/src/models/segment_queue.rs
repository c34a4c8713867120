/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Segment Queue Model
//!
//! This module defines the domain structure for the debounced segment
//! recomputation queue. Contact changes enqueue the contact's email; a
//! consumer drains emails whose debounce window has elapsed and recomputes
//! which segments those contacts belong to.
//!
//! The queue is keyed by email alone. A burst of changes to one contact
//! collapses into a single row, and each re-enqueue restarts the debounce
//! clock so recomputation happens once, after the burst settles.

use serde::{Deserialize, Serialize};

use crate::database::universal_types::UniversalTimestamp;

/// Seconds an email must sit untouched in the queue before it is eligible
/// for draining. Fixed platform configuration, not per-entry.
pub const SEGMENT_QUEUE_DEBOUNCE_SECONDS: i64 = 15;

/// Represents a segment queue entry (domain type).
///
/// Entries are transient: the consumer removes them explicitly after the
/// recomputation for that email has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentQueueEntry {
    /// Email of the contact whose segment membership needs recomputing
    pub email: String,
    /// When the email was last enqueued; the debounce window counts from here
    pub queued_at: UniversalTimestamp,
}
