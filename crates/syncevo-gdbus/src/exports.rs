//! Objects exported by one connection
//!
//! Both transports keep an [`ObjectTable`] per connection and route inbound
//! calls through it. Calls for unknown paths or interfaces, and
//! `Introspect` calls, are answered by the table itself.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::error::{DBusError, Result};
use crate::introspect::{self, INTROSPECTABLE};
use crate::message::Message;
use crate::transport::{ObjectHandler, RegistrationId};
use crate::value::{ObjectPath, Value};

pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";

pub(crate) struct ExportedObject {
    id: RegistrationId,
    path: String,
    interface: String,
    handler: Rc<dyn ObjectHandler>,
}

/// Where an inbound call goes
pub(crate) enum Route {
    /// Hand the call to this object
    Object(Rc<dyn ObjectHandler>),
    /// Send this reply instead
    Reply(Message),
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    objects: Vec<ExportedObject>,
}

impl ObjectTable {
    pub fn insert(
        &mut self,
        id: RegistrationId,
        path: &str,
        interface: &str,
        handler: Rc<dyn ObjectHandler>,
    ) -> Result<()> {
        ObjectPath::new(path)?;
        if self
            .objects
            .iter()
            .any(|o| o.path == path && o.interface == interface)
        {
            return Err(DBusError::Failed(format!(
                "an object is already exported for interface {interface} at {path}"
            )));
        }
        self.objects.push(ExportedObject {
            id,
            path: path.to_string(),
            interface: interface.to_string(),
            handler,
        });
        Ok(())
    }

    /// Removes a registration
    ///
    /// The removed entries are returned so the caller can drop them after
    /// releasing its own borrows.
    pub fn remove(&mut self, id: RegistrationId) -> Vec<ExportedObject> {
        let (removed, kept) = std::mem::take(&mut self.objects)
            .into_iter()
            .partition(|o| o.id == id);
        self.objects = kept;
        removed
    }

    pub fn clear(&mut self) -> Vec<ExportedObject> {
        std::mem::take(&mut self.objects)
    }

    pub fn route(&self, msg: &Message) -> Route {
        let path = msg.path().unwrap_or_default();
        let interface = msg.interface().unwrap_or_default();
        if interface == INTROSPECTABLE && msg.member() == Some("Introspect") {
            return Route::Reply(self.introspect(path, msg));
        }
        if let Some(object) = self
            .objects
            .iter()
            .find(|o| o.path == path && o.interface == interface)
        {
            return Route::Object(object.handler.clone());
        }
        let err = if self.objects.iter().any(|o| o.path == path) {
            DBusError::callable(
                UNKNOWN_INTERFACE,
                format!("No such interface '{interface}' at object path '{path}'"),
            )
        } else {
            DBusError::callable(UNKNOWN_OBJECT, format!("No such object path '{path}'"))
        };
        Route::Reply(Message::error(msg, &err))
    }

    fn introspect(&self, path: &str, msg: &Message) -> Message {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let interfaces: Vec<_> = self
            .objects
            .iter()
            .filter(|o| o.path == path)
            .map(|o| o.handler.interface_info())
            .collect();
        let children: BTreeSet<&str> = self
            .objects
            .iter()
            .filter_map(|o| o.path.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .collect();
        if interfaces.is_empty() && children.is_empty() {
            return Message::error(
                msg,
                &DBusError::callable(UNKNOWN_OBJECT, format!("No such object path '{path}'")),
            );
        }
        let children: Vec<String> = children.into_iter().map(str::to_string).collect();
        let mut reply = Message::method_return(msg);
        reply.append(Value::from(introspect::node_xml(&interfaces, &children)));
        reply
    }
}
