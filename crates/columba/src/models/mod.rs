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

//! Domain models for tasks and the segment queue.
//!
//! These are backend-independent types. The diesel row models with native
//! PostgreSQL or SQLite column types live next to the DAL implementations
//! and convert to and from these at the DAL boundary.

pub mod segment_queue;
pub mod task;

pub use segment_queue::{SegmentQueueEntry, SEGMENT_QUEUE_DEBOUNCE_SECONDS};
pub use task::{
    NewTask, SendBroadcastState, Task, TaskFilter, TaskListPage, TaskState, TaskStatus,
    TaskStatusCounts,
};
