//! Deferred method replies
//!
//! A method that takes a [`Reply<T>`] parameter is asynchronous: the
//! dispatcher sends nothing when the handler returns, and the reply goes
//! out once the handler (or whatever it handed the `Reply` to) calls
//! [`Reply::done`] or [`Reply::failed`].

use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::args::{ExtractArgs, MethodArg, ValueList};
use crate::error::{DBusError, Result};
use crate::message::Message;
use crate::signature::Signature;
use crate::transport::Connection;
use crate::watch::PeerWatch;

/// Lifecycle of a deferred reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    Pending,
    Completed,
    Failed,
}

struct ReplyInner {
    conn: Connection,
    call: Message,
    state: Rc<Cell<ReplyState>>,
}

impl Drop for ReplyInner {
    fn drop(&mut self) {
        // While the dispatcher still holds the state it reports the outcome
        // itself.
        if self.state.get() == ReplyState::Pending && Rc::strong_count(&self.state) == 1 {
            warn!(
                caller = self.call.sender().unwrap_or_default(),
                member = self.call.member().unwrap_or_default(),
                serial = self.call.serial(),
                "Reply handle dropped without sending a reply"
            );
        }
    }
}

/// Completion handle of an asynchronous method call
///
/// Clones share the same call; exactly one `done` or `failed` succeeds.
pub struct Reply<T> {
    inner: Rc<ReplyInner>,
    _values: PhantomData<fn(T)>,
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Reply {
            inner: self.inner.clone(),
            _values: PhantomData,
        }
    }
}

impl<T> Reply<T> {
    pub fn state(&self) -> ReplyState {
        self.inner.state.get()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ReplyState::Pending
    }

    /// Bus name of the peer waiting for the reply
    pub fn caller(&self) -> &str {
        self.inner.call.sender().unwrap_or_default()
    }

    /// Watches the caller; `callback` runs once if it disconnects
    pub fn create_watch(&self, callback: impl FnOnce() + 'static) -> Result<PeerWatch> {
        let watch = PeerWatch::with_callback(self.inner.conn.clone(), callback);
        watch.activate(self.caller())?;
        Ok(watch)
    }

    fn finish(&self, state: ReplyState) -> Result<()> {
        if !self.is_pending() {
            debug!(
                member = self.inner.call.member().unwrap_or_default(),
                state = ?self.state(),
                "Rejecting second reply"
            );
            return Err(DBusError::AlreadyReplied);
        }
        self.inner.state.set(state);
        Ok(())
    }

    /// Sends an error reply
    pub fn failed(&self, error: impl Into<DBusError>) -> Result<()> {
        self.finish(ReplyState::Failed)?;
        let reply = Message::error(&self.inner.call, &error.into());
        self.inner.conn.send(reply).map(|_| ())
    }
}

impl<T: ValueList> Reply<T> {
    /// Sends the method return carrying `values`
    pub fn done(&self, values: T) -> Result<()> {
        let values = values.to_values()?;
        self.finish(ReplyState::Completed)?;
        let mut reply = Message::method_return(&self.inner.call);
        reply.extend(values);
        self.inner.conn.send(reply).map(|_| ())
    }
}

impl<T: ValueList + 'static> MethodArg for Reply<T> {
    const ASYNCHRONOUS: bool = true;

    fn in_signature() -> Signature {
        Signature::empty()
    }

    fn out_signature() -> Signature {
        T::combined_signature()
    }

    fn extract(args: &mut ExtractArgs<'_>) -> Result<Self> {
        Ok(Reply {
            inner: Rc::new(ReplyInner {
                conn: args.connection().clone(),
                call: args.message().header_only(),
                state: args.reply_state(),
            }),
            _values: PhantomData,
        })
    }
}
