//! Forward-only lifecycle state machines for connections and servers

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// A lifecycle whose states are totally ordered
pub trait Lifecycle: Copy + fmt::Debug {
    fn to_u8(self) -> u8;
    fn from_u8(value: u8) -> Self;
}

/// Per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticating = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl Lifecycle for ConnectionState {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Authenticating,
            2 => ConnectionState::Active,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Initializing = 1,
    Running = 2,
    Stopping = 3,
    Closed = 4,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Created => "created",
            ServerState::Initializing => "initializing",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Closed => "closed",
        }
    }
}

impl Lifecycle for ServerState {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Initializing,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Closed,
        }
    }
}

/// Atomic state cell that only ever moves forward.
///
/// States may be skipped (e.g. a connection failing its handshake goes
/// straight from `Authenticating` to `Closing`) but never revisited.
pub struct StateCell<S> {
    value: AtomicU8,
    _state: PhantomData<S>,
}

impl<S: Lifecycle> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            value: AtomicU8::new(initial.to_u8()),
            _state: PhantomData,
        }
    }

    pub fn get(&self) -> S {
        S::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Move to `next` if it lies strictly ahead of the current state
    pub fn advance(&self, next: S) -> bool {
        let target = next.to_u8();
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if target <= current {
                return false;
            }
            match self.value.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from exactly `from` to `to`
    pub fn transition(&self, from: S, to: S) -> bool {
        to.to_u8() > from.to_u8()
            && self
                .value
                .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

impl<S: Lifecycle> fmt::Debug for StateCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}
