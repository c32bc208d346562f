//! In-process message bus
//!
//! [`LocalBus`] implements the [`Transport`] contract for any number of
//! connections living in the same thread, and doubles as the event loop:
//! nothing is delivered until [`LocalBus::run_until_idle`] (or
//! [`LocalBus::run_once`]) is called. Queued messages are held as
//! [`zbus::Message`]s, so every message is marshaled to D-Bus wire format
//! and parsed back on the way through. The bus itself answers the
//! `org.freedesktop.DBus` methods the binding layer relies on.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::args::ValueList;
use crate::error::{DBusError, Result};
use crate::exports::{ObjectTable, Route};
use crate::message::{self, Message, MessageType};
use crate::transport::{
    Connection, MatchRule, ObjectHandler, RegistrationId, ReplyCallback, SignalCallback,
    SubscriptionId, Task, Transport, BUS_INTERFACE, BUS_NAME, BUS_PATH,
};
use crate::marshal::DBusType;
use crate::value::Value;

pub use crate::exports::{UNKNOWN_INTERFACE, UNKNOWN_OBJECT};

pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";

struct Subscription {
    id: SubscriptionId,
    rule: MatchRule,
    callback: SignalCallback,
}

struct PendingCall {
    /// Unique name the call was routed to at send time
    target: String,
    /// The call as queued, for answering it when the target leaves
    call: zbus::Message,
    callback: ReplyCallback,
}

#[derive(Default)]
struct Peer {
    objects: ObjectTable,
    subscriptions: Vec<Subscription>,
    pending: BTreeMap<u32, PendingCall>,
}

#[derive(Default)]
struct BusInner {
    next_peer: Cell<u64>,
    next_handle: Cell<u64>,
    peers: RefCell<BTreeMap<String, Peer>>,
    /// Well-known name to unique name of its owner
    names: RefCell<BTreeMap<String, String>>,
    queue: RefCell<VecDeque<zbus::Message>>,
    idle: RefCell<VecDeque<Task>>,
}

/// Shared in-process bus and event loop
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Rc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection with a fresh unique name
    pub fn connect(&self) -> Connection {
        let n = self.inner.next_peer.get() + 1;
        self.inner.next_peer.set(n);
        let name = format!(":1.{n}");
        self.inner
            .peers
            .borrow_mut()
            .insert(name.clone(), Peer::default());
        info!(peer = %name, "Connection opened");
        self.inner.owner_changed(&name, "", &name);
        Connection::new(Rc::new(LocalConnection {
            bus: Rc::downgrade(&self.inner),
            name,
        }))
    }

    /// Delivers one queued message, or runs one idle task if no message is
    /// queued. Returns false if there was nothing to do.
    pub fn run_once(&self) -> bool {
        let wire = self.inner.queue.borrow_mut().pop_front();
        if let Some(wire) = wire {
            match Message::from_zbus(&wire) {
                Ok(msg) => self.inner.deliver(msg),
                Err(err) => warn!(error = %err, "Dropping undecodable message"),
            }
            return true;
        }
        let task = self.inner.idle.borrow_mut().pop_front();
        if let Some(task) = task {
            task();
            return true;
        }
        false
    }

    /// Runs until no messages and no idle tasks are left
    ///
    /// Returns the number of steps taken.
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        while self.run_once() {
            steps += 1;
        }
        steps
    }

    /// Queues `msg` as if `sender` had sent it
    pub fn inject(&self, sender: &str, msg: Message) -> Result<u32> {
        self.inner.enqueue(sender, msg).map(|wire| serial_of(&wire))
    }

    /// Names currently known to the bus, including its own
    pub fn list_names(&self) -> Vec<String> {
        self.inner.list_names()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty() && self.inner.idle.borrow().is_empty()
    }
}

fn bus_error(name: &str, message: impl Into<String>) -> DBusError {
    DBusError::callable(name, message)
}

fn serial_of(wire: &zbus::Message) -> u32 {
    wire.primary_header().serial_num().get()
}

impl BusInner {
    fn next_handle(&self) -> u64 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }

    /// Encodes `msg` as sent by `sender` and queues it
    fn enqueue(&self, sender: &str, msg: Message) -> Result<zbus::Message> {
        let wire = msg.to_zbus(Some(sender))?;
        self.queue.borrow_mut().push_back(wire.clone());
        Ok(wire)
    }

    fn is_connected(&self, unique: &str) -> bool {
        self.peers.borrow().contains_key(unique)
    }

    /// Unique name owning `name`, if any
    fn resolve(&self, name: &str) -> Option<String> {
        if name.starts_with(':') {
            self.is_connected(name).then(|| name.to_string())
        } else {
            self.names.borrow().get(name).cloned()
        }
    }

    fn list_names(&self) -> Vec<String> {
        let mut names = vec![BUS_NAME.to_string()];
        names.extend(self.peers.borrow().keys().cloned());
        names.extend(self.names.borrow().keys().cloned());
        names
    }

    fn owner_changed(&self, name: &str, old: &str, new: &str) {
        let mut msg = match Message::signal(BUS_PATH, BUS_INTERFACE, "NameOwnerChanged") {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "Cannot build NameOwnerChanged");
                return;
            }
        };
        let queued = (name.to_string(), old.to_string(), new.to_string())
            .to_values()
            .and_then(|values| {
                msg.extend(values);
                self.enqueue(BUS_NAME, msg)
            });
        if let Err(err) = queued {
            warn!(error = %err, "Cannot queue NameOwnerChanged");
        }
    }

    fn deliver(&self, msg: Message) {
        debug!(
            kind = ?msg.message_type(),
            sender = msg.sender().unwrap_or_default(),
            destination = msg.destination().unwrap_or_default(),
            member = msg.member().unwrap_or_default(),
            serial = msg.serial(),
            "Delivering message"
        );
        match msg.message_type() {
            MessageType::MethodCall => self.deliver_call(msg),
            MessageType::MethodReturn | MessageType::Error => self.deliver_reply(msg),
            MessageType::Signal => self.deliver_signal(msg),
        }
    }

    fn deliver_call(&self, msg: Message) {
        let destination = msg.destination().unwrap_or_default().to_string();
        let (from, reply) = if destination == BUS_NAME {
            (BUS_NAME.to_string(), Some(self.bus_method(&msg)))
        } else {
            match self.resolve(&destination) {
                Some(target) => {
                    let reply = self.call_object(&target, &msg);
                    (target, reply)
                }
                None => {
                    let err = bus_error(
                        SERVICE_UNKNOWN,
                        format!("The name {destination} was not provided by any .service files"),
                    );
                    (BUS_NAME.to_string(), Some(Message::error(&msg, &err)))
                }
            }
        };
        if let Some(reply) = reply {
            if let Err(err) = self.enqueue(&from, reply) {
                warn!(error = %err, "Dropping unmarshalable reply");
                let failure = Message::error(&msg, &err);
                if let Err(err) = self.enqueue(&from, failure) {
                    warn!(error = %err, "Cannot send error reply");
                }
            }
        }
    }

    fn call_object(&self, target: &str, msg: &Message) -> Option<Message> {
        let route = match self.peers.borrow().get(target) {
            Some(peer) => peer.objects.route(msg),
            None => return None,
        };
        match route {
            Route::Object(handler) => handler.handle_call(msg),
            Route::Reply(reply) => Some(reply),
        }
    }

    fn bus_method(&self, msg: &Message) -> Message {
        let result: Result<Vec<Value>> = match msg.member().unwrap_or_default() {
            "NameHasOwner" => <(String,)>::from_values(msg.body()).map(|(name,)| {
                let owned = name == BUS_NAME || self.resolve(&name).is_some();
                vec![Value::Bool(owned)]
            }),
            "GetNameOwner" => <(String,)>::from_values(msg.body()).and_then(|(name,)| {
                if name == BUS_NAME {
                    return Ok(vec![Value::from(BUS_NAME)]);
                }
                self.resolve(&name).map(|owner| vec![Value::from(owner)]).ok_or_else(|| {
                    bus_error(
                        NAME_HAS_NO_OWNER,
                        format!("Could not get owner of name '{name}': no such name"),
                    )
                })
            }),
            "ListNames" => <()>::from_values(msg.body())
                .and_then(|()| self.list_names().to_value())
                .map(|names| vec![names]),
            other => Err(bus_error(
                UNKNOWN_METHOD,
                format!("{BUS_INTERFACE} does not understand message {other}"),
            )),
        };
        match result {
            Ok(values) => {
                let mut reply = Message::method_return(msg);
                reply.extend(values);
                reply
            }
            Err(err) => Message::error(msg, &err),
        }
    }

    fn deliver_reply(&self, msg: Message) {
        let destination = msg.destination().unwrap_or_default();
        let Some(serial) = msg.reply_serial() else {
            warn!("Dropping reply without reply serial");
            return;
        };
        let pending = self
            .peers
            .borrow_mut()
            .get_mut(destination)
            .and_then(|peer| peer.pending.remove(&serial));
        match pending {
            Some(pending) => (pending.callback)(Ok(msg)),
            None => debug!(destination, serial, "No pending call for reply"),
        }
    }

    fn deliver_signal(&self, msg: Message) {
        let sender = msg.sender().unwrap_or_default().to_string();
        let callbacks: Vec<SignalCallback> = {
            let peers = self.peers.borrow();
            let names = self.names.borrow();
            let sender_owns = |name: &str| names.get(name) == Some(&sender);
            peers
                .iter()
                .filter(|(unique, _)| msg.destination().map_or(true, |d| d == unique.as_str()))
                .flat_map(|(_, peer)| peer.subscriptions.iter())
                .filter(|sub| sub.rule.matches(&msg, sender_owns))
                .map(|sub| sub.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(&msg);
        }
    }

    fn disconnect(&self, unique: &str) {
        let Some(peer) = self.peers.borrow_mut().remove(unique) else {
            return;
        };
        let owned: Vec<String> = {
            let mut names = self.names.borrow_mut();
            let owned: Vec<String> = names
                .iter()
                .filter(|(_, owner)| owner.as_str() == unique)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &owned {
                names.remove(name);
            }
            owned
        };
        info!(peer = unique, names = ?owned, "Connection closed");

        // Calls still waiting for this peer will never be answered.
        let orphaned: Vec<zbus::Message> = self
            .peers
            .borrow()
            .values()
            .flat_map(|p| p.pending.values())
            .filter(|pending| pending.target == unique)
            .map(|pending| pending.call.clone())
            .collect();
        for wire in orphaned {
            let err = bus_error(
                NO_REPLY,
                "Message recipient disconnected from message bus without replying",
            );
            let queued = Message::from_zbus(&wire)
                .and_then(|call| self.enqueue(BUS_NAME, Message::error(&call, &err)));
            if let Err(err) = queued {
                warn!(error = %err, "Cannot queue NoReply error");
            }
        }

        for name in &owned {
            self.owner_changed(name, unique, "");
        }
        self.owner_changed(unique, unique, "");

        let Peer { objects, pending, .. } = peer;
        drop(objects);
        for (_, call) in pending {
            (call.callback)(Err(DBusError::Transport("connection closed".to_string())));
        }
    }
}

/// One connection to a [`LocalBus`]
struct LocalConnection {
    bus: Weak<BusInner>,
    name: String,
}

impl LocalConnection {
    fn bus(&self) -> Result<Rc<BusInner>> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| DBusError::Transport("message bus is gone".to_string()))?;
        if !bus.is_connected(&self.name) {
            return Err(DBusError::Transport(format!(
                "connection {} is closed",
                self.name
            )));
        }
        Ok(bus)
    }
}

impl Transport for LocalConnection {
    fn unique_name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, msg: Message) -> Result<u32> {
        self.bus()?
            .enqueue(&self.name, msg)
            .map(|wire| serial_of(&wire))
    }

    fn send_with_reply(&self, msg: Message, callback: ReplyCallback) -> Result<u32> {
        if msg.message_type() != MessageType::MethodCall {
            return Err(DBusError::InvalidArgument(
                "only method calls have replies".to_string(),
            ));
        }
        let bus = self.bus()?;
        let destination = msg.destination().unwrap_or_default().to_string();
        let target = if destination == BUS_NAME {
            destination
        } else {
            bus.resolve(&destination).unwrap_or(destination)
        };
        let call = bus.enqueue(&self.name, msg)?;
        let serial = serial_of(&call);
        if let Some(peer) = bus.peers.borrow_mut().get_mut(&self.name) {
            peer.pending.insert(
                serial,
                PendingCall {
                    target,
                    call,
                    callback,
                },
            );
        }
        Ok(serial)
    }

    fn subscribe_signal(&self, rule: MatchRule, callback: SignalCallback) -> Result<SubscriptionId> {
        let bus = self.bus()?;
        let id = SubscriptionId(bus.next_handle());
        debug!(peer = %self.name, ?rule, "Subscribing to signal");
        if let Some(peer) = bus.peers.borrow_mut().get_mut(&self.name) {
            peer.subscriptions.push(Subscription { id, rule, callback });
        }
        Ok(id)
    }

    fn unsubscribe_signal(&self, id: SubscriptionId) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        // Dropped outside of the borrow; the callback may own other handles.
        let removed: Vec<Subscription> = match bus.peers.borrow_mut().get_mut(&self.name) {
            Some(peer) => {
                let (removed, kept) = std::mem::take(&mut peer.subscriptions)
                    .into_iter()
                    .partition(|s| s.id == id);
                peer.subscriptions = kept;
                removed
            }
            None => Vec::new(),
        };
        drop(removed);
    }

    fn name_has_owner(&self, name: &str) -> Result<bool> {
        let bus = self.bus()?;
        Ok(name == BUS_NAME || bus.resolve(name).is_some())
    }

    fn register_object(
        &self,
        path: &str,
        interface: &str,
        handler: Rc<dyn ObjectHandler>,
    ) -> Result<RegistrationId> {
        let bus = self.bus()?;
        let id = RegistrationId(bus.next_handle());
        let mut peers = bus.peers.borrow_mut();
        let Some(peer) = peers.get_mut(&self.name) else {
            return Err(DBusError::Transport(format!("connection {} is closed", self.name)));
        };
        peer.objects.insert(id, path, interface, handler)?;
        Ok(id)
    }

    fn unregister_object(&self, id: RegistrationId) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let removed = match bus.peers.borrow_mut().get_mut(&self.name) {
            Some(peer) => peer.objects.remove(id),
            None => Vec::new(),
        };
        drop(removed);
    }

    fn request_name(&self, name: &str) -> Result<()> {
        message::validate_bus_name(name)?;
        if name.starts_with(':') || name == BUS_NAME {
            return Err(DBusError::InvalidName(format!(
                "cannot acquire reserved name '{name}'"
            )));
        }
        let bus = self.bus()?;
        let previous = bus.names.borrow().get(name).cloned();
        match previous {
            Some(owner) if owner == self.name => Ok(()),
            Some(owner) => Err(DBusError::Failed(format!(
                "name '{name}' is already owned by {owner}"
            ))),
            None => {
                bus.names
                    .borrow_mut()
                    .insert(name.to_string(), self.name.clone());
                info!(peer = %self.name, name, "Acquired bus name");
                bus.owner_changed(name, "", &self.name);
                Ok(())
            }
        }
    }

    fn idle_add(&self, task: Task) {
        match self.bus.upgrade() {
            Some(bus) => bus.idle.borrow_mut().push_back(task),
            None => debug!(peer = %self.name, "Dropping idle task, bus is gone"),
        }
    }

    fn close(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.disconnect(&self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.bus().is_ok()
    }
}
