//! Persisted station selection.

/// Abstract persistence backend for the selected station index.
///
/// `load` returns `Ok(None)` when nothing usable is stored (first boot,
/// erased flash, corrupt record). Range validation against the catalog is
/// the caller's job, via [`resolve_stored_index`].
pub trait SelectionStore {
    type Error;

    fn load(&mut self) -> Result<Option<u8>, Self::Error>;
    fn save(&mut self, index: u8) -> Result<(), Self::Error>;
}

/// A missing backend behaves as an empty store: loads resolve to the
/// default station and saves are accepted but volatile.
impl<S: SelectionStore> SelectionStore for Option<S> {
    type Error = S::Error;

    fn load(&mut self) -> Result<Option<u8>, Self::Error> {
        match self {
            Some(store) => store.load(),
            None => Ok(None),
        }
    }

    fn save(&mut self, index: u8) -> Result<(), Self::Error> {
        match self {
            Some(store) => store.save(index),
            None => Ok(()),
        }
    }
}

/// Result of validating a stored index against the catalog bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedSelection {
    pub index: usize,
    /// The stored value was absent or out of range; 0 must be written back.
    pub repaired: bool,
}

/// Clamp a raw stored byte to `0 <= index < station_count`. Anything out of
/// range (including garbage left by an older firmware) resolves to station 0.
pub fn resolve_stored_index(raw: Option<u8>, station_count: usize) -> ResolvedSelection {
    match raw {
        Some(value) if (value as usize) < station_count => ResolvedSelection {
            index: value as usize,
            repaired: false,
        },
        _ => ResolvedSelection {
            index: 0,
            repaired: true,
        },
    }
}
