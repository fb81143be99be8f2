//! Signal provider adapters.
//!
//! Uniform `SignalProvider` implementations over heterogeneous sources: two
//! built-in heuristics computed from OHLCV bars, an HTTP adapter for a
//! remote sequence-forecaster service, and a bridge that votes on behalf of
//! a sentiment collaborator. Model internals live elsewhere; these adapters
//! only translate answers into directional snapshots, and translate failure
//! into `ProviderUnavailable` so the combiner can renormalize around it.

mod heuristics;
mod remote;
mod sentiment_bridge;

pub use heuristics::{participation_from_bars, IndicatorVoterProvider, MomentumProvider};
pub use remote::{RemoteForecasterProvider, RemoteSentimentProvider};
pub use sentiment_bridge::SentimentSignalProvider;
