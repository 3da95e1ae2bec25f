// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured logging for the control plane
//
// Loggers are cheap cloneable handles. Each component is handed a clone
// at construction and tags its messages with its own `Facility`.

mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;
mod sink;

pub use entry::LogEntry;
pub use facility::Facility;
pub use logger::Logger;
pub use severity::Severity;
pub use sink::{LogSink, MemorySink, NullSink, StderrJsonSink, StdoutSink};
