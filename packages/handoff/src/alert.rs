use std::sync::atomic::{AtomicBool, Ordering};

/// A one-bit gate shared between a subscriber and whoever may need to expel
/// it from a [`Distributor`](crate::Distributor).
///
/// Removing a subscriber by key can race its registration: the kick-out can
/// run before the subscribe. Raising the flag together with the kick-out
/// (see [`Distributor::alert`](crate::Distributor::alert)) closes that gap -
/// a gated subscription that finds the flag raised refuses to register and
/// resolves canceled instead.
///
/// The flag's address doubles as its subscription key.
#[derive(Debug, Default)]
pub struct AlertFlag {
    raised: AtomicBool,
}

impl AlertFlag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the flag has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    /// Raises the flag, blocking future gated subscriptions.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    /// Lowers the flag again.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Relaxed);
    }

    /// Lowers the flag and reports whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::Relaxed)
    }

    /// The subscription key identifying this flag.
    #[must_use]
    pub fn key(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_take_round_trip() {
        let flag = AlertFlag::new();
        assert!(!flag.is_raised());
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.is_raised());
        assert!(!flag.take());
    }

    #[test]
    fn keys_identify_flags() {
        let a = AlertFlag::new();
        let b = AlertFlag::new();
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.key());
    }
}
