//! Signal emission and subscription

use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::args::ValueList;
use crate::error::{DBusError, Result};
use crate::message::{self, Message};
use crate::object::{DBusObject, DBusRemoteObject};
use crate::signature::Signature;
use crate::transport::{Connection, MatchRule, SignalCallback, SubscriptionId};

/// Name and argument types of a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEntry {
    pub name: String,
    pub args: Vec<Signature>,
}

/// Emits one signal of a local object
pub struct EmitSignal<A> {
    conn: Connection,
    path: String,
    interface: String,
    name: String,
    _args: PhantomData<fn(A)>,
}

impl<A: ValueList> EmitSignal<A> {
    pub fn new(object: &impl DBusObject, name: &str) -> Result<Self> {
        message::validate_member(name)?;
        Ok(EmitSignal {
            conn: object.connection().clone(),
            path: object.path().to_string(),
            interface: object.interface().to_string(),
            name: name.to_string(),
            _args: PhantomData,
        })
    }

    /// Sends the signal with `args` as payload
    pub fn emit(&self, args: A) -> Result<()> {
        let mut msg = Message::signal(&self.path, &self.interface, &self.name)?;
        msg.extend(args.to_values()?);
        debug!(path = %self.path, signal = %self.name, signature = %msg.signature(), "Emitting signal");
        match self.conn.send(msg) {
            Ok(_) => Ok(()),
            Err(err @ DBusError::Transport(_)) => Err(err),
            Err(err) => Err(DBusError::Transport(err.to_string())),
        }
    }

    pub fn signal_entry(&self) -> SignalEntry {
        SignalEntry {
            name: self.name.clone(),
            args: A::signatures(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Subscription to one signal of a remote object
///
/// Dropping the watch ends the subscription.
pub struct SignalWatch<A> {
    conn: Connection,
    path: String,
    interface: String,
    name: String,
    subscription: Cell<Option<SubscriptionId>>,
    _args: PhantomData<fn(A)>,
}

impl<A: ValueList + 'static> SignalWatch<A> {
    pub fn new(object: &impl DBusRemoteObject, name: &str) -> Result<Self> {
        message::validate_member(name)?;
        Ok(SignalWatch {
            conn: object.connection().clone(),
            path: object.path().to_string(),
            interface: object.interface().to_string(),
            name: name.to_string(),
            subscription: Cell::new(None),
            _args: PhantomData,
        })
    }

    /// Subscribes; `callback` runs for every delivered signal
    ///
    /// Signals whose payload does not decode as `A` are logged and skipped.
    pub fn activate(&self, callback: impl Fn(A) + 'static) -> Result<()> {
        let rule = MatchRule::new()
            .path(self.path.as_str())
            .interface(self.interface.as_str())
            .member(self.name.as_str());
        let name = self.name.clone();
        let deliver: SignalCallback = Rc::new(move |msg: &Message| match A::from_values(msg.body()) {
            Ok(args) => callback(args),
            Err(err) => warn!(
                signal = %name,
                signature = %msg.signature(),
                error = %err,
                "Ignoring signal with unexpected payload"
            ),
        });
        let id = self.conn.subscribe_signal(rule, deliver)?;
        if let Some(previous) = self.subscription.replace(Some(id)) {
            self.conn.unsubscribe_signal(previous);
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.subscription.get().is_some()
    }
}

impl<A> Drop for SignalWatch<A> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.conn.unsubscribe_signal(id);
        }
    }
}
