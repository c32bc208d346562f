//! Remote-call proxy

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::debug;

use crate::args::ValueList;
use crate::error::{DBusError, Result};
use crate::message::{self, Message};
use crate::object::DBusRemoteObject;
use crate::transport::Connection;

type Completion<R> = Rc<RefCell<Option<Box<dyn FnOnce(Result<R>)>>>>;

/// Calls one method of a remote object, delivering results of type `R`
pub struct DBusClientCall<R> {
    conn: Connection,
    destination: String,
    path: String,
    interface: String,
    method: String,
    _result: PhantomData<fn() -> R>,
}

impl<R: ValueList + 'static> DBusClientCall<R> {
    pub fn new(object: &impl DBusRemoteObject, method: &str) -> Result<Self> {
        message::validate_member(method)?;
        Ok(DBusClientCall {
            conn: object.connection().clone(),
            destination: object.destination().to_string(),
            path: object.path().to_string(),
            interface: object.interface().to_string(),
            method: method.to_string(),
            _result: PhantomData,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Sends the call without waiting
    ///
    /// `callback` runs exactly once: with the decoded reply, the remote
    /// error, or the transport error (possibly before `call` returns).
    pub fn call<A: ValueList>(&self, args: A, callback: impl FnOnce(Result<R>) + 'static) {
        let completion: Completion<R> = Rc::new(RefCell::new(Some(Box::new(callback))));
        let complete = |completion: &Completion<R>, result: Result<R>| {
            let callback = completion.borrow_mut().take();
            if let Some(callback) = callback {
                callback(result);
            }
        };

        let mut msg = match Message::method_call(
            Some(&self.destination),
            &self.path,
            &self.interface,
            &self.method,
        ) {
            Ok(msg) => msg,
            Err(err) => return complete(&completion, Err(err)),
        };
        match args.to_values() {
            Ok(values) => msg.extend(values),
            Err(err) => return complete(&completion, Err(err)),
        }
        debug!(
            destination = %self.destination,
            method = %self.method,
            signature = %msg.signature(),
            "Calling remote method"
        );

        let pending = completion.clone();
        let method = self.method.clone();
        let sent = self.conn.send_with_reply(
            msg,
            Box::new(move |reply: Result<Message>| {
                let result = reply.and_then(|reply| decode_reply::<R>(&reply));
                if let Err(err) = &result {
                    debug!(%method, error = %err, "Remote call failed");
                }
                complete(&pending, result);
            }),
        );
        if let Err(err) = sent {
            let err = match err {
                DBusError::Transport(_) => err,
                other => DBusError::Transport(other.to_string()),
            };
            complete(&completion, Err(err));
        }
    }
}

fn decode_reply<R: ValueList>(reply: &Message) -> Result<R> {
    if let Some(err) = DBusError::from_reply(reply) {
        return Err(err);
    }
    R::from_values(reply.body())
}
