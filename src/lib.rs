//! Analytics event pipeline for feature flag SDKs.
//!
//! # Overview
//!
//! The SDK reports every flag evaluation, identify call and custom event to an
//! [`EventProcessor`]. The processor never blocks the calling thread: events are handed to a
//! background thread that
//!
//! - counts flag evaluations into a per-flush summary,
//! - sends full user details once per user (an "index" event) and refers to users by key
//!   afterwards,
//! - produces debug events while a flag is in debug mode,
//! - redacts private user attributes,
//! - posts batches to the events collector, retrying once on transient failures,
//! - periodically reports diagnostic events about itself.
//!
//! Use [`new_event_processor`] to create a processor from a [`Config`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. They are only returned while constructing
//! components. Delivery failures are never surfaced to the caller: they are logged and counted in
//! diagnostic events. A collector response of 401 or 403 means the SDK key is invalid and stops
//! all further deliveries.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, under the `flag_events` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into the pipeline.

#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod diagnostics;
mod error;
mod event_processor;
mod events;
mod feature_store;
mod output;
mod sender;
mod str;
mod summarizer;
mod user;
mod user_filter;
mod user_keys;

pub use config::Config;
pub use diagnostics::{
    DiagnosticConfigData, DiagnosticCounters, DiagnosticId, DiagnosticInitEvent,
    DiagnosticPeriodicEvent, DiagnosticPlatformData, DiagnosticSdkData, DiagnosticsManager,
};
pub use error::{Error, Result};
pub use event_processor::{
    new_event_processor, DefaultEventProcessor, EventProcessor, NullEventProcessor,
};
pub use events::{
    CustomEvent, EvaluationErrorKind, EvaluationReason, Event, FeatureRequestEvent, IdentifyEvent,
};
pub use feature_store::{DataKind, FeatureStore, InMemoryFeatureStore, VersionedItem};
pub use str::Str;
pub use summarizer::{EventSummarizer, EventSummary, FlagCounter, FlagSummary};
pub use user::{AttributeValue, User, UserBuilder};
pub use user_filter::{FilteredUser, UserFilter, BUILTIN_ATTRIBUTES};
pub use user_keys::UserKeyCache;
