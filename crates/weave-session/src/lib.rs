//! Sessions and signals for weave.
//!
//! A [`SessionHost`] turns each client connection into an [`AppSession`]:
//! a view tree rendered by a dedicated loop on the tokio runtime, whose
//! output is pushed to a [`ClientSink`] as [`ClientMessage`]s. Sessions are
//! kept in a [`SessionStore`], which the [`SignalRouter`] consults to
//! deliver [`Signal`]s across sessions.

extern crate self as weave_session;

pub mod config;
pub mod error;
pub mod hooks;
pub mod host;
pub mod queue;
pub mod router;
pub mod session;
pub mod signal;
pub mod store;
pub mod transport;

pub use config::SessionConfig;
pub use error::SessionError;
pub use hooks::SignalHooks;
pub use host::{ConnectRequest, SessionHost};
pub use queue::EventQueue;
pub use router::{SignalRouter, SignalSender};
pub use session::{AppSession, ConnectionId, Disposables, SessionControl, SessionInfo, SessionState};
pub use signal::{BroadcastScope, Receiver, ReceiverId, Signal, SignalHub, Subscription};
pub use store::SessionStore;
pub use transport::{ChannelSink, ClientMessage, ClientSink};
pub use weave_macros::Signal;

pub mod prelude {
    pub use crate::{
        BroadcastScope, ConnectRequest, Signal, SignalHooks, SignalSender, SessionControl,
        SessionHost, SessionInfo,
    };
    pub use weave_core::{
        deps, view_fn, Cleanup, EffectTrigger, Element, RenderContext, View, ViewRegistry,
        ViewSpec, Widget,
    };
}

#[cfg(test)]
#[path = "tests/signal_tests.rs"]
mod signal_tests;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;
