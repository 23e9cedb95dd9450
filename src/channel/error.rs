use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::task::Interrupted;

/// Failure cause attached to an errored channel, shared by every
/// consumer that observes it.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Sticky terminal state of a channel.
#[derive(Clone, Debug)]
pub enum Closed {
    /// The producer closed normally; no more elements will arrive.
    Done,
    /// The producer closed with a failure.
    Error(Cause),
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closed::Done => write!(f, "channel is done"),
            Closed::Error(cause) => write!(f, "channel failed: {cause}"),
        }
    }
}

impl Error for Closed {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Closed::Done => None,
            Closed::Error(cause) => Some(cause.as_ref()),
        }
    }
}

/// Why a receive produced no element.
#[derive(Clone, Debug)]
pub enum ReceiveError {
    /// The channel is done and its buffer is drained.
    Done,
    /// The channel failed; the cause is shared by all consumers.
    Error(Cause),
    /// The receiving task was interrupted while blocked.
    Interrupted,
}

impl From<Closed> for ReceiveError {
    fn from(closed: Closed) -> Self {
        match closed {
            Closed::Done => ReceiveError::Done,
            Closed::Error(cause) => ReceiveError::Error(cause),
        }
    }
}

impl From<Interrupted> for ReceiveError {
    fn from(_: Interrupted) -> Self {
        ReceiveError::Interrupted
    }
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::Done => write!(f, "channel is done"),
            ReceiveError::Error(cause) => write!(f, "channel failed: {cause}"),
            ReceiveError::Interrupted => write!(f, "receive interrupted"),
        }
    }
}

impl Error for ReceiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReceiveError::Error(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Why a send failed; the element is handed back to the caller.
#[derive(Debug)]
pub enum SendError<T> {
    /// The channel reached its terminal state.
    Closed(T),
    /// The sending task was interrupted while blocked.
    Interrupted(T),
}

impl<T> SendError<T> {
    /// Recovers the element that was not delivered.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(value) | SendError::Interrupted(value) => value,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "send on closed channel"),
            SendError::Interrupted(_) => write!(f, "send interrupted"),
        }
    }
}

impl<T: fmt::Debug> Error for SendError<T> {}
