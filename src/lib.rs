//! Server-side core of a Statsig-protocol feature flagging and experimentation SDK.
//!
//! # Overview
//!
//! The crate revolves around a [`Statsig`] handle that evaluates feature gates, dynamic
//! configs, experiments, and layers for a [`StatsigUser`] against an in-memory ruleset
//! snapshot. Evaluations are pure CPU work; background workers keep the snapshot fresh by
//! polling (or streaming) the ruleset and ID-list endpoints, and ship exposure events to the
//! collector in batches.
//!
//! ```no_run
//! use statsig_core::{Statsig, StatsigOptions, StatsigUser};
//!
//! let statsig = Statsig::new("secret-key", StatsigOptions::new())?;
//! statsig.initialize();
//!
//! let user = StatsigUser::with_user_id("user-123");
//! if statsig.check_gate(&user, "new_checkout_flow")? {
//!     // ...
//! }
//! # Ok::<(), statsig_core::Error>(())
//! ```
//!
//! # Sources
//!
//! At initialize the store is populated from the first source that succeeds, in order: a
//! configured [`DataStore`], caller-provided bootstrap values, the network, and optionally the
//! default Statsig API as a fallback. Every evaluation result carries
//! [`EvaluationDetails`](evaluation::evaluation_types::EvaluationDetails) naming the source and
//! reason, so values can always be traced to their provenance.
//!
//! # Error handling
//!
//! Errors are represented by the [`Error`] enum. Caller programming errors (a user with no
//! identifier, an empty event name) surface synchronously; internal failures degrade to safe
//! defaults and are reported through the diagnostics sink.
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log/latest/log/) crate under the
//! `statsig` target. Install a `log`-compatible logger for visibility into sync and delivery
//! behavior.

pub mod client;
pub mod data_store;
mod error;
pub mod evaluation;
pub mod events;
pub mod hashing;
pub mod id_lists;
pub mod network;
pub mod options;
pub mod overrides;
pub(crate) mod poller;
pub mod spec_store;
pub mod spec_types;
pub mod spec_updater;
pub mod streaming;
pub mod user;

pub use client::{InitDetails, Statsig};
pub use data_store::DataStore;
pub use error::{Error, Result};
pub use evaluation::evaluation_types::{
    DynamicConfig, EvaluationDetails, EvaluationReason, FeatureGate, Layer, SpecsSource,
};
pub use options::{ProxyConfig, ProxyProtocol, StatsigOptions};
pub use spec_updater::SpecSourceKind;
pub use streaming::{SpecsUpdate, StreamingConnection, StreamingTransport};
pub use user::StatsigUser;
