//! SyncEvolution D-Bus binding layer
//!
//! Maps native Rust callables, signals and remote calls onto the D-Bus
//! wire protocol without per-method glue code:
//!
//! - [`DBusType`] - wire signature and encode/decode rules per native type
//! - [`MethodArg`] / [`ArgList`] - input, output and pseudo parameters
//! - [`ObjectHelper`] - dispatch table of one exported interface
//! - [`Reply`] - deferred reply of an asynchronous method
//! - [`EmitSignal`] / [`SignalWatch`] - signal emission and subscription
//! - [`DBusClientCall`] - asynchronous calls to remote objects
//! - [`PeerWatch`] - notification when a peer leaves the bus
//!
//! The transport is abstracted by [`Transport`]. [`ZbusBus`] connects to
//! the session or system bus through zbus; [`LocalBus`] provides an
//! in-process bus for tests. Both drive a single-threaded event loop and
//! none of the handles are `Send`: everything runs on the thread that
//! drives the loop.

pub mod args;
pub mod bus;
pub mod client;
pub mod codec;
pub mod error;
mod exports;
pub mod introspect;
pub mod local;
pub mod marshal;
pub mod message;
pub mod method;
pub mod object;
pub mod result;
pub mod signal;
pub mod signature;
pub mod transport;
pub mod value;
pub mod watch;

pub use args::{ArgList, Caller, CallerWatch, MethodArg, Out, ValueList};
pub use bus::{BusAddress, ZbusBus};
pub use client::DBusClientCall;
pub use error::{DBusError, Result};
pub use introspect::{InterfaceInfo, MethodInfo};
pub use local::LocalBus;
pub use marshal::{DBusType, DictKey, Variant, Variant2};
pub use message::{Message, MessageType};
pub use method::{IntoReply, MethodEntry, MethodHandler};
pub use object::{DBusObject, DBusRemoteObject, ObjectHelper, RemoteObject};
pub use result::{Reply, ReplyState};
pub use signal::{EmitSignal, SignalEntry, SignalWatch};
pub use signature::Signature;
pub use transport::{Connection, MatchRule, Transport};
pub use value::{ObjectPath, Value, ValueExt};
pub use watch::PeerWatch;
