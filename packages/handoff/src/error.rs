use std::error::Error;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Indicates that a slot resolved without a value.
///
/// A consumer observes this when the producer side was dropped without
/// setting anything, when a queue was closed under it, or when it was kicked
/// out of a distributor.
#[derive(Debug, Eq, PartialEq)]
pub struct Canceled;

impl Error for Canceled {}

impl Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the operation was canceled before a value was produced")
    }
}

/// Indicates an operation attempted on a slot in a state that forbids it.
#[derive(Debug, Eq, PartialEq)]
pub struct InvalidState;

impl Error for InvalidState {}

impl Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the slot is in a state that does not allow this operation")
    }
}

/// A captured producer error, shared and cheap to clone.
///
/// Producers deliver failure as a value rather than by unwinding; a fault
/// travels through the slot to whoever awaits it, and the same fault may be
/// observed from several places (a clone of a resolved slot, an aggregator
/// wrapper), hence the shared representation.
#[derive(Clone)]
pub struct Fault(Arc<dyn Error + Send + Sync + 'static>);

impl Fault {
    /// Wraps a concrete error.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Creates a fault carrying only a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// Returns the concrete error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        (&*self.0 as &(dyn Error + 'static)).downcast_ref::<E>()
    }

    /// Borrows the error object.
    #[must_use]
    pub fn as_error(&self) -> &(dyn Error + 'static) {
        &*self.0
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault({:?})", self.0)
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// A message-only fault payload.
#[derive(Debug)]
struct Message(String);

impl Error for Message {}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why awaiting a slot did not yield a value.
#[derive(Clone, Debug)]
pub enum Failure {
    /// The slot resolved empty; see [`Canceled`].
    Canceled,
    /// The producer delivered an error.
    Faulted(Fault),
}

impl Failure {
    /// Whether this is the canceled case.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The fault, when the producer delivered one.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Canceled => None,
            Self::Faulted(fault) => Some(fault),
        }
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Canceled => None,
            Self::Faulted(fault) => Some(fault.as_error()),
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => Display::fmt(&Canceled, f),
            Self::Faulted(fault) => Display::fmt(fault, f),
        }
    }
}

impl From<Canceled> for Failure {
    fn from(_: Canceled) -> Self {
        Self::Canceled
    }
}

impl From<Fault> for Failure {
    fn from(fault: Fault) -> Self {
        Self::Faulted(fault)
    }
}

/// A failure of one source inside an aggregated set of generators.
///
/// Carries the position of the failing source; the original fault is exposed
/// through [`Error::source`] and [`SourceError::cause`].
#[derive(Debug)]
pub struct SourceError {
    index: usize,
    cause: Fault,
}

impl SourceError {
    /// Wraps the fault of the source at `index`.
    #[must_use]
    pub fn new(index: usize, cause: Fault) -> Self {
        Self { index, cause }
    }

    /// Position of the failing source in the aggregated set.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The source's own fault.
    #[must_use]
    pub fn cause(&self) -> &Fault {
        &self.cause
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_error())
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generator at index {} failed", self.index)
    }
}
