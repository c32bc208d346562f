//! Objects exported on, and referenced over, the bus
//!
//! [`ObjectHelper`] owns the dispatch table of one (path, interface) pair
//! and registers it with the connection while active. [`RemoteObject`]
//! names an object of another peer for signal watches and client calls.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::args::{ArgList, ValueList};
use crate::error::{DBusError, Result};
use crate::introspect::InterfaceInfo;
use crate::message::{self, Message};
use crate::method::{MethodEntry, MethodHandler};
use crate::signal::{EmitSignal, SignalEntry};
use crate::transport::{Connection, ObjectHandler, RegistrationId};
use crate::value::ObjectPath;

/// An object identified by connection, path and interface
pub trait DBusObject {
    fn connection(&self) -> &Connection;
    fn path(&self) -> &str;
    fn interface(&self) -> &str;
}

/// An object owned by another peer
pub trait DBusRemoteObject: DBusObject {
    /// Bus name of the peer owning the object
    fn destination(&self) -> &str;
}

/// Address of an object owned by another peer
#[derive(Debug, Clone)]
pub struct RemoteObject {
    conn: Connection,
    destination: String,
    path: String,
    interface: String,
}

impl RemoteObject {
    pub fn new(conn: Connection, destination: &str, path: &str, interface: &str) -> Result<Self> {
        message::validate_bus_name(destination)?;
        ObjectPath::new(path)?;
        message::validate_interface(interface)?;
        Ok(RemoteObject {
            conn,
            destination: destination.to_string(),
            path: path.to_string(),
            interface: interface.to_string(),
        })
    }
}

impl DBusObject for RemoteObject {
    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}

impl DBusRemoteObject for RemoteObject {
    fn destination(&self) -> &str {
        &self.destination
    }
}

/// Dispatch table of one interface
struct InterfaceTable {
    conn: Connection,
    interface: String,
    methods: RefCell<BTreeMap<String, Rc<MethodEntry>>>,
    signals: RefCell<Vec<SignalEntry>>,
}

impl ObjectHandler for InterfaceTable {
    fn handle_call(&self, msg: &Message) -> Option<Message> {
        let member = msg.member().unwrap_or_default();
        // Cloned out so the handler may modify the table.
        let entry = self.methods.borrow().get(member).cloned();
        match entry {
            Some(entry) => entry.dispatch(&self.conn, msg),
            None => {
                debug!(interface = %self.interface, member, "No method registered");
                let err = DBusError::NoMatchingMethod {
                    method: member.to_string(),
                };
                Some(Message::error(msg, &err))
            }
        }
    }

    fn interface_info(&self) -> InterfaceInfo {
        InterfaceInfo {
            name: self.interface.clone(),
            methods: self.methods.borrow().values().map(|m| m.info()).collect(),
            signals: self.signals.borrow().clone(),
        }
    }
}

/// Exports methods and signals of one interface at one object path
pub struct ObjectHelper {
    path: String,
    table: Rc<InterfaceTable>,
    registration: Cell<Option<RegistrationId>>,
}

impl ObjectHelper {
    pub fn new(conn: Connection, path: &str, interface: &str) -> Result<Self> {
        ObjectPath::new(path)?;
        message::validate_interface(interface)?;
        Ok(ObjectHelper {
            path: path.to_string(),
            table: Rc::new(InterfaceTable {
                conn,
                interface: interface.to_string(),
                methods: RefCell::new(BTreeMap::new()),
                signals: RefCell::new(Vec::new()),
            }),
            registration: Cell::new(None),
        })
    }

    /// Binds `handler` as method `name`, replacing an existing entry
    pub fn add_method<Args, H>(&self, name: &str, handler: H) -> Result<()>
    where
        Args: ArgList + 'static,
        H: MethodHandler<Args>,
    {
        self.add_entry(MethodEntry::new(name, handler)?);
        Ok(())
    }

    pub fn add_entry(&self, entry: MethodEntry) {
        let name = entry.name().to_string();
        debug!(
            path = %self.path,
            interface = %self.table.interface,
            method = %name,
            in_signature = %entry.in_signature(),
            out_signature = %entry.out_signature(),
            "Adding method"
        );
        let previous = self
            .table
            .methods
            .borrow_mut()
            .insert(name.clone(), Rc::new(entry));
        if previous.is_some() {
            warn!(
                path = %self.path,
                interface = %self.table.interface,
                method = %name,
                "Replacing existing method"
            );
        }
    }

    /// Lists a signal in the introspection data of the interface
    pub fn add_signal<A: ValueList>(&self, signal: &EmitSignal<A>) {
        let entry = signal.signal_entry();
        let mut signals = self.table.signals.borrow_mut();
        signals.retain(|s| s.name != entry.name);
        signals.push(entry);
    }

    /// Registers the interface with the connection
    pub fn activate(&self) -> Result<()> {
        if self.registration.get().is_some() {
            return Ok(());
        }
        let id = self.table.conn.register_object(
            &self.path,
            &self.table.interface,
            self.table.clone(),
        )?;
        self.registration.set(Some(id));
        info!(path = %self.path, interface = %self.table.interface, "Object activated");
        Ok(())
    }

    /// Unregisters the interface; calls are answered with errors afterwards
    pub fn deactivate(&self) {
        if let Some(id) = self.registration.take() {
            self.table.conn.unregister_object(id);
            info!(path = %self.path, interface = %self.table.interface, "Object deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.registration.get().is_some()
    }

    pub fn interface_info(&self) -> InterfaceInfo {
        self.table.interface_info()
    }
}

impl DBusObject for ObjectHelper {
    fn connection(&self) -> &Connection {
        &self.table.conn
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn interface(&self) -> &str {
        &self.table.interface
    }
}

impl Drop for ObjectHelper {
    fn drop(&mut self) {
        self.deactivate();
    }
}
