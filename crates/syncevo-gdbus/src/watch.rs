//! Peer liveness watch
//!
//! A [`PeerWatch`] tracks one bus name and runs its callback once that name
//! loses its owner. It listens for the bus's `NameOwnerChanged` signal and
//! also asks the bus directly on activation, so a peer that is already gone
//! is detected immediately.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, info};

use crate::args::ValueList;
use crate::error::Result;
use crate::message::Message;
use crate::transport::{
    Connection, MatchRule, SignalCallback, SubscriptionId, BUS_INTERFACE, BUS_NAME, BUS_PATH,
};

type Callback = Box<dyn FnOnce()>;

#[derive(Default)]
struct WatchState {
    peer: RefCell<String>,
    disconnected: Cell<bool>,
    callback: RefCell<Option<Callback>>,
}

impl WatchState {
    /// Marks the peer as gone; only the first call has an effect
    fn disconnected(&self) {
        if self.disconnected.replace(true) {
            return;
        }
        info!(peer = %self.peer.borrow(), "Watched peer disconnected");
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Watches a peer and reports its disconnect once
pub struct PeerWatch {
    conn: Connection,
    state: Rc<WatchState>,
    subscription: Cell<Option<SubscriptionId>>,
}

impl PeerWatch {
    pub fn new(conn: Connection) -> Self {
        PeerWatch {
            conn,
            state: Rc::new(WatchState::default()),
            subscription: Cell::new(None),
        }
    }

    pub fn with_callback(conn: Connection, callback: impl FnOnce() + 'static) -> Self {
        let watch = PeerWatch::new(conn);
        *watch.state.callback.borrow_mut() = Some(Box::new(callback));
        watch
    }

    /// Installs the disconnect callback
    ///
    /// Runs it right away if the peer is already known to be gone.
    pub fn set_callback(&self, callback: impl FnOnce() + 'static) {
        if self.state.disconnected.get() {
            callback();
        } else {
            *self.state.callback.borrow_mut() = Some(Box::new(callback));
        }
    }

    /// Starts watching `peer`
    ///
    /// If the peer has no owner at this point the callback runs before this
    /// returns.
    pub fn activate(&self, peer: &str) -> Result<()> {
        *self.state.peer.borrow_mut() = peer.to_string();

        let rule = MatchRule::new()
            .sender(BUS_NAME)
            .path(BUS_PATH)
            .interface(BUS_INTERFACE)
            .member("NameOwnerChanged")
            .arg0(peer);
        let state: Weak<WatchState> = Rc::downgrade(&self.state);
        let callback: SignalCallback = Rc::new(move |msg: &Message| {
            let Some(state) = state.upgrade() else {
                return;
            };
            match <(String, String, String)>::from_values(msg.body()) {
                Ok((name, _old, new)) if new.is_empty() => {
                    debug!(%name, "Name lost its owner");
                    state.disconnected();
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "Ignoring malformed NameOwnerChanged"),
            }
        });
        let id = self.conn.subscribe_signal(rule, callback)?;
        if let Some(previous) = self.subscription.replace(Some(id)) {
            self.conn.unsubscribe_signal(previous);
        }

        if !self.conn.name_has_owner(peer)? {
            debug!(peer, "Watched peer is already gone");
            self.state.disconnected();
        }
        Ok(())
    }

    pub fn peer(&self) -> String {
        self.state.peer.borrow().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.disconnected.get()
    }
}

impl Drop for PeerWatch {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.conn.unsubscribe_signal(id);
        }
    }
}
