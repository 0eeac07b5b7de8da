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

//! Port transport for bridge traffic.
//!
//! The bridge never talks to a network. Every node holds one or more
//! [`Port`]s, each an ordered in-memory channel of JSON values, wired up
//! through a shared [`NativeRuntime`] that stands in for the extension
//! platform's connection machinery.

mod error;
mod port;
mod runtime;

pub use error::TransportError;
pub use port::{Port, PortReceiver};
pub use runtime::{NativeRuntime, PortListener};
