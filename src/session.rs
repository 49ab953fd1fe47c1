//! Session Module
//!
//! Flush and transaction discipline around a host unit of work.
//!
//! This module provides:
//! - `Session`, which wraps every flush in a transaction and refuses flushes
//!   issued from inside lifecycle callbacks
//! - `LifecycleListener`, an opt-in set of hooks (`subscribes` names the events
//!   a listener handles; unhandled hooks are no-ops)
//! - Nested `start_transaction`/`commit_transaction` counting, where only the
//!   outermost pair reaches the unit of work
//! - Post-flush callbacks queued by listeners during a flush
//! - Change-set recomputation for entities modified by hooks, run once the
//!   hook returns
//! - `can_delete`, a trial delete that is always rolled back

use crate::entity::{distinct_entities, type_of, EntityRef, Key};
use crate::gateway::GatewayError;
use std::fmt;

/// Host persistence unit of work driven by a [`Session`]
pub trait UnitOfWork {
    fn begin(&mut self) -> Result<(), GatewayError>;
    fn commit(&mut self) -> Result<(), GatewayError>;
    fn rollback(&mut self) -> Result<(), GatewayError>;

    /// Write all scheduled changes
    fn flush(&mut self) -> Result<(), GatewayError>;

    /// Scheduled inserts and updates that have not been written, as
    /// `"<type> <key>"`
    fn pending_changes(&mut self) -> Vec<String>;

    /// Delete one row immediately, bypassing the change tracking
    ///
    /// A referencing row must surface as `GatewayError::ConstraintViolation`.
    fn delete(&mut self, entity_type: &str, key: &Key) -> Result<(), GatewayError>;

    /// Set a savepoint inside the open transaction
    fn savepoint(&mut self, name: &str) -> Result<(), GatewayError>;

    /// Undo everything since the savepoint `name`, keeping the transaction open
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), GatewayError>;

    /// Compute the change set of an entity first scheduled during a hook
    fn compute_change_set(&mut self, entity: &EntityRef) -> Result<(), GatewayError>;

    /// Recompute the change set of an already scheduled entity after a hook
    /// modified it
    fn recompute_change_set(&mut self, entity: &EntityRef) -> Result<(), GatewayError>;

    /// Whether `property` of `entity` differs from its originally loaded value
    fn is_property_changed(&self, entity: &EntityRef, property: &str) -> bool;
}

const CAN_DELETE_SAVEPOINT: &str = "postfetch_can_delete";

/// Whether the session currently accepts flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Writable,
    /// A lifecycle hook is running
    Callback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    OnFlush,
    PostFlush,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::PrePersist => "prePersist",
            LifecycleEvent::PostPersist => "postPersist",
            LifecycleEvent::PreUpdate => "preUpdate",
            LifecycleEvent::PostUpdate => "postUpdate",
            LifecycleEvent::OnFlush => "onFlush",
            LifecycleEvent::PostFlush => "postFlush",
        };
        f.write_str(name)
    }
}

/// Session error type
#[derive(Debug)]
pub enum SessionError {
    /// `flush` was called from inside a lifecycle hook
    FlushNotAllowed,
    /// `commit_transaction` without a matching `start_transaction`
    NoOpenTransaction,
    /// The listener must subscribe to the event to use the operation
    NotSubscribed(LifecycleEvent),
    /// Changes were still scheduled after the flush
    UnrecomputedChanges(Vec<String>),
    /// A listener hook or post-flush callback failed
    Callback(String),
    /// Error from the unit of work
    Gateway(GatewayError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::FlushNotAllowed => {
                write!(f, "Flush is not allowed inside a lifecycle callback")
            }
            SessionError::NoOpenTransaction => {
                write!(f, "No transaction is open to commit")
            }
            SessionError::NotSubscribed(event) => {
                write!(f, "Listener is not subscribed to {event}")
            }
            SessionError::UnrecomputedChanges(changes) => {
                write!(f, "Changes were not recomputed: {}", changes.join("; "))
            }
            SessionError::Callback(s) => {
                write!(f, "Callback error: {s}")
            }
            SessionError::Gateway(e) => {
                write!(f, "Gateway error: {e}")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Gateway(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        SessionError::Gateway(err)
    }
}

/// Lifecycle hooks run by a [`Session`]
///
/// Hooks are only called for events the listener subscribes to. While a hook
/// runs the session is in [`Phase::Callback`] and refuses to flush. A hook
/// that modifies entities queues them with [`Session::schedule_compute`] or
/// [`Session::schedule_recompute`]; their change sets are refreshed as soon as
/// the hooks of the event have returned.
#[allow(unused_variables)]
pub trait LifecycleListener<U: UnitOfWork> {
    fn subscribes(&self, event: LifecycleEvent) -> bool;

    fn pre_persist(&mut self, session: &mut Session<U>, entity: &EntityRef) -> Result<(), SessionError> {
        Ok(())
    }

    fn post_persist(&mut self, session: &mut Session<U>, entity: &EntityRef) -> Result<(), SessionError> {
        Ok(())
    }

    fn pre_update(&mut self, session: &mut Session<U>, entity: &EntityRef) -> Result<(), SessionError> {
        Ok(())
    }

    fn post_update(&mut self, session: &mut Session<U>, entity: &EntityRef) -> Result<(), SessionError> {
        Ok(())
    }

    fn on_flush(&mut self, session: &mut Session<U>) -> Result<(), SessionError> {
        Ok(())
    }

    fn post_flush(&mut self, session: &mut Session<U>) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Callback run once after the next successful flush
pub type PostFlushCallback<U> = Box<dyn FnOnce(&mut Session<U>) -> Result<(), SessionError>>;

/// Flush and transaction discipline over a unit of work
pub struct Session<U: UnitOfWork> {
    uow: U,
    phase: Phase,
    depth: usize,
    listeners: Vec<Box<dyn LifecycleListener<U>>>,
    post_flush: Vec<PostFlushCallback<U>>,
    to_compute: Vec<EntityRef>,
    to_recompute: Vec<EntityRef>,
}

impl<U: UnitOfWork> Session<U> {
    pub fn new(uow: U) -> Self {
        Self {
            uow,
            phase: Phase::Writable,
            depth: 0,
            listeners: Vec::new(),
            post_flush: Vec::new(),
            to_compute: Vec::new(),
            to_recompute: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn LifecycleListener<U>>) {
        self.listeners.push(listener);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of open `start_transaction` calls
    pub fn transaction_depth(&self) -> usize {
        self.depth
    }

    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    pub fn unit_of_work_mut(&mut self) -> &mut U {
        &mut self.uow
    }

    pub fn into_inner(self) -> U {
        self.uow
    }

    /// Open a transaction; only the outermost call begins one
    pub fn start_transaction(&mut self) -> Result<(), SessionError> {
        if self.depth == 0 {
            self.uow.begin()?;
        }
        self.depth += 1;
        Ok(())
    }

    /// Close a transaction; only the outermost call commits
    pub fn commit_transaction(&mut self) -> Result<(), SessionError> {
        match self.depth {
            0 => Err(SessionError::NoOpenTransaction),
            1 => {
                self.uow.commit()?;
                self.depth = 0;
                Ok(())
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Flush inside a transaction
    ///
    /// Runs `on_flush` hooks, the unit-of-work flush, then commits every
    /// transaction opened during the flush. On success `post_flush` hooks and
    /// queued callbacks run; on failure the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// `SessionError::FlushNotAllowed` while a lifecycle hook is running,
    /// `SessionError::UnrecomputedChanges` when changes remain scheduled after
    /// the flush, and any hook or unit-of-work error.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        if self.phase == Phase::Callback {
            return Err(SessionError::FlushNotAllowed);
        }

        let outer = self.depth;
        self.start_transaction()?;

        if let Err(e) = self.flush_in_transaction(outer) {
            log::warn!("flush failed, rolling back: {e}");
            self.rollback_to(outer);
            // Callbacks belong to the failed flush
            self.post_flush.clear();
            return Err(e);
        }

        self.dispatch(LifecycleEvent::PostFlush, |listener, session| {
            listener.post_flush(session)
        })?;

        for callback in std::mem::take(&mut self.post_flush) {
            callback(self)?;
        }
        Ok(())
    }

    fn flush_in_transaction(&mut self, outer: usize) -> Result<(), SessionError> {
        self.dispatch(LifecycleEvent::OnFlush, |listener, session| {
            listener.on_flush(session)
        })?;
        self.uow.flush()?;

        let pending = self.uow.pending_changes();
        if !pending.is_empty() {
            return Err(SessionError::UnrecomputedChanges(pending));
        }

        while self.depth > outer {
            self.commit_transaction()?;
        }
        Ok(())
    }

    fn rollback_to(&mut self, outer: usize) {
        if outer == 0 && self.depth > 0 {
            if let Err(e) = self.uow.rollback() {
                log::error!("rollback failed: {e}");
            }
        }
        self.depth = outer;
    }

    /// Queue `callback` to run after the current flush commits
    ///
    /// # Errors
    ///
    /// `SessionError::NotSubscribed` unless `listener` subscribes to
    /// `LifecycleEvent::PostFlush`.
    pub fn add_post_flush(
        &mut self,
        listener: &dyn LifecycleListener<U>,
        callback: PostFlushCallback<U>,
    ) -> Result<(), SessionError> {
        if !listener.subscribes(LifecycleEvent::PostFlush) {
            return Err(SessionError::NotSubscribed(LifecycleEvent::PostFlush));
        }
        self.post_flush.push(callback);
        Ok(())
    }

    /// Run the per-entity hooks of `event` for `entity`
    ///
    /// Called by the host when it persists or updates an entity. `OnFlush`
    /// and `PostFlush` are driven by [`Session::flush`] and ignored here.
    pub fn notify(&mut self, event: LifecycleEvent, entity: &EntityRef) -> Result<(), SessionError> {
        match event {
            LifecycleEvent::PrePersist => self.dispatch(event, |l, s| l.pre_persist(s, entity)),
            LifecycleEvent::PostPersist => self.dispatch(event, |l, s| l.post_persist(s, entity)),
            LifecycleEvent::PreUpdate => self.dispatch(event, |l, s| l.pre_update(s, entity)),
            LifecycleEvent::PostUpdate => self.dispatch(event, |l, s| l.post_update(s, entity)),
            LifecycleEvent::OnFlush | LifecycleEvent::PostFlush => {
                log::debug!("{event} is dispatched by flush, ignoring notify");
                Ok(())
            }
        }
    }

    /// Queue `entity`, newly scheduled by a hook, for change-set computation
    pub fn schedule_compute(&mut self, entity: &EntityRef) {
        self.to_compute.push(entity.clone());
    }

    /// Queue `entity`, modified by a hook, for change-set recomputation
    pub fn schedule_recompute(&mut self, entity: &EntityRef) {
        self.to_recompute.push(entity.clone());
    }

    pub fn is_property_changed(&self, entity: &EntityRef, property: &str) -> bool {
        self.uow.is_property_changed(entity, property)
    }

    /// Whether `key` of `entity_type` could be deleted right now
    ///
    /// The delete is always undone: outside a transaction it runs in one that
    /// is rolled back, inside an open transaction it is rolled back to a
    /// savepoint so the caller's transaction stays intact.
    pub fn can_delete(&mut self, entity_type: &str, key: &Key) -> Result<bool, SessionError> {
        if self.depth == 0 {
            self.uow.begin()?;
        } else {
            self.uow.savepoint(CAN_DELETE_SAVEPOINT)?;
        }

        let outcome = match self.uow.delete(entity_type, key) {
            Ok(()) => Ok(true),
            Err(GatewayError::ConstraintViolation(reason)) => {
                log::debug!("{entity_type} {key} is still referenced: {reason}");
                Ok(false)
            }
            Err(e) => Err(SessionError::from(e)),
        };

        if self.depth == 0 {
            self.uow.rollback()?;
        } else {
            self.uow.rollback_to_savepoint(CAN_DELETE_SAVEPOINT)?;
        }
        outcome
    }

    /// Refresh the change sets of entities queued by hooks, each instance once
    fn recalculate_entities(&mut self) -> Result<(), SessionError> {
        for entity in distinct_entities(std::mem::take(&mut self.to_compute)) {
            log::debug!("computing change set of {} {}", type_of(&entity), entity.borrow().id());
            self.uow.compute_change_set(&entity)?;
        }
        for entity in distinct_entities(std::mem::take(&mut self.to_recompute)) {
            log::debug!("recomputing change set of {} {}", type_of(&entity), entity.borrow().id());
            self.uow.recompute_change_set(&entity)?;
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        event: LifecycleEvent,
        mut hook: impl FnMut(&mut dyn LifecycleListener<U>, &mut Self) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let mut listeners = std::mem::take(&mut self.listeners);
        let previous = std::mem::replace(&mut self.phase, Phase::Callback);

        let mut result = Ok(());
        for listener in listeners.iter_mut() {
            if !listener.subscribes(event) {
                continue;
            }
            result = hook(listener.as_mut(), self);
            if result.is_err() {
                break;
            }
        }

        self.phase = previous;
        // Keep listeners registered from inside a hook
        listeners.append(&mut self.listeners);
        self.listeners = listeners;

        if result.is_err() {
            self.to_compute.clear();
            self.to_recompute.clear();
            return result;
        }
        self.recalculate_entities()
    }
}
