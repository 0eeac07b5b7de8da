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

//! Transport-level errors.

use thiserror::Error;

/// Errors raised by the port layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other end of the port has been dropped or disconnected.
    #[error("the port is closed")]
    Closed,

    /// The value could not be serialized for transmission.
    #[error("the value could not be encoded for transmission")]
    Encode {
        /// The serialization failure.
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Returns `true` when the failure means the peer is gone rather than
    /// the payload being at fault.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_predicate() {
        assert!(TransportError::Closed.is_closed());
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!TransportError::Encode { source: bad }.is_closed());
    }
}
