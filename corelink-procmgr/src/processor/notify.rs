//! State-change listeners
//!
//! A listener watches a set of states and fires once: when the processor
//! enters one of them, when its optional deadline passes, or when the
//! backend is deleted underneath it.

use std::fmt;
use std::time::{Duration, Instant};

use corelink_api::error::{self, Result};
use corelink_api::{Error, ProcId, ProcState};

/// Why a listener fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    /// The processor entered a watched state
    StateReached,
    /// The listener's deadline passed first
    Timeout,
    /// The backend was deleted before either happened
    Canceled,
}

/// Event delivered to a listener callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyEvent {
    /// Processor the listener was registered on
    pub proc_id: ProcId,
    /// Processor state when the listener fired
    pub state: ProcState,
    /// Why it fired
    pub status: NotifyStatus,
}

/// Listener callback
pub type NotifyCallback = Box<dyn FnMut(&NotifyEvent) + Send>;

/// Handle returned by [`NotifyRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

struct Listener {
    id: ListenerId,
    states: Vec<ProcState>,
    deadline: Option<Instant>,
    callback: NotifyCallback,
}

impl Listener {
    fn fire(mut self, proc_id: ProcId, state: ProcState, status: NotifyStatus) {
        (self.callback)(&NotifyEvent { proc_id, state, status });
    }
}

/// Bounded set of one-shot listeners
pub struct NotifyRegistry {
    listeners: Vec<Listener>,
    capacity: usize,
    next_id: u32,
}

impl NotifyRegistry {
    /// Creates a registry holding at most `capacity` listeners
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: Vec::new(),
            capacity,
            next_id: 1,
        }
    }

    /// Registers a listener for `states`, optionally expiring after `timeout`
    pub fn register(
        &mut self,
        states: &[ProcState],
        timeout: Option<Duration>,
        callback: NotifyCallback,
    ) -> Result<ListenerId> {
        if states.is_empty() {
            return Err(error::invalid_argument("listener watches no state"));
        }
        if self.listeners.len() >= self.capacity {
            return Err(Error::TableFull(format!("{} listeners registered", self.capacity)));
        }

        let id = ListenerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.listeners.push(Listener {
            id,
            states: states.to_vec(),
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            callback,
        });
        Ok(id)
    }

    /// Removes a listener without firing it
    pub fn unregister(&mut self, id: ListenerId) -> Result<()> {
        let position = self
            .listeners
            .iter()
            .position(|listener| listener.id == id)
            .ok_or_else(|| Error::HandleNotFound(format!("listener {}", id.0)))?;
        self.listeners.remove(position);
        Ok(())
    }

    /// Fires every listener watching `state`, returning how many fired
    pub fn state_changed(&mut self, proc_id: ProcId, state: ProcState) -> usize {
        self.fire_where(proc_id, state, NotifyStatus::StateReached, |listener| {
            listener.states.contains(&state)
        })
    }

    /// Fires every listener whose deadline is at or before `now`
    pub fn expire(&mut self, proc_id: ProcId, state: ProcState, now: Instant) -> usize {
        self.fire_where(proc_id, state, NotifyStatus::Timeout, |listener| {
            listener.deadline.is_some_and(|deadline| deadline <= now)
        })
    }

    /// Fires every listener with `Canceled`, leaving the registry empty
    pub fn cancel_all(&mut self, proc_id: ProcId, state: ProcState) -> usize {
        self.fire_where(proc_id, state, NotifyStatus::Canceled, |_| true)
    }

    /// Number of outstanding listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is outstanding
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn fire_where<F>(&mut self, proc_id: ProcId, state: ProcState, status: NotifyStatus, mut matches: F) -> usize
    where
        F: FnMut(&Listener) -> bool,
    {
        let mut fired = Vec::new();
        let mut index = 0;
        while index < self.listeners.len() {
            if matches(&self.listeners[index]) {
                fired.push(self.listeners.remove(index));
            } else {
                index += 1;
            }
        }

        let count = fired.len();
        for listener in fired {
            listener.fire(proc_id, state, status);
        }
        count
    }
}

impl fmt::Debug for NotifyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyRegistry")
            .field("listeners", &self.listeners.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<NotifyEvent>>>, NotifyCallback) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: NotifyCallback = Box::new(move |event: &NotifyEvent| sink.lock().unwrap().push(*event));
        (events, callback)
    }

    fn proc1() -> ProcId {
        ProcId::new(1).unwrap()
    }

    #[test]
    fn test_listener_fires_once_on_state() {
        let mut registry = NotifyRegistry::new(4);
        let (events, callback) = recorder();
        registry.register(&[ProcState::Running], None, callback).unwrap();

        assert_eq!(registry.state_changed(proc1(), ProcState::Loaded), 0);
        assert_eq!(registry.state_changed(proc1(), ProcState::Running), 1);
        assert_eq!(registry.state_changed(proc1(), ProcState::Running), 0);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, NotifyStatus::StateReached);
    }

    #[test]
    fn test_deadline_expiry() {
        let mut registry = NotifyRegistry::new(4);
        let (events, callback) = recorder();
        registry
            .register(&[ProcState::Running], Some(Duration::from_millis(5)), callback)
            .unwrap();
        let (_, untimed) = recorder();
        registry.register(&[ProcState::Running], None, untimed).unwrap();

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(registry.expire(proc1(), ProcState::Reset, later), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(events.lock().unwrap()[0].status, NotifyStatus::Timeout);
    }

    #[test]
    fn test_capacity_and_unregister() {
        let mut registry = NotifyRegistry::new(1);
        let (_, first) = recorder();
        let id = registry.register(&[ProcState::Reset], None, first).unwrap();
        let (_, second) = recorder();
        assert!(matches!(
            registry.register(&[ProcState::Reset], None, second),
            Err(Error::TableFull(_))
        ));
        registry.unregister(id).unwrap();
        assert!(registry.unregister(id).is_err());
        assert!(registry.is_empty());
    }
}
