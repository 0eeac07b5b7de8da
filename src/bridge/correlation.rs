//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Message id generation for request-response matching.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates message ids for outgoing sends.
///
/// Every `event-send` leaving a node carries an id from this generator,
/// and the matching `event-response` echoes it back. Ids are only unique
/// per node; packets from different senders are always keyed by the
/// `(from, id)` pair, never by the id alone.
///
/// # Thread Safety
///
/// The generator is lock-free and can be shared across tasks.
///
/// # Example
///
/// ```rust
/// use exbridge::MessageIdGenerator;
///
/// let generator = MessageIdGenerator::new();
/// assert_eq!(generator.next(), 1);
/// assert_eq!(generator.next(), 2);
/// ```
#[derive(Debug)]
pub struct MessageIdGenerator {
    next_id: AtomicU64,
}

impl MessageIdGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Claims the next id.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the id the next call to [`next`](Self::next) will claim,
    /// without claiming it.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}


// Made with Bob
