use crate::address::AddressSet;
use crate::topic::Versioned;

/// The payload half of a snapshot: either a populated address set, or a
/// no-endpoints notification carrying whether the backing service/workload
/// is known to exist at all.
///
/// This collapses the portPublisher's three-state machine (`Unknown`,
/// `Empty`, `Populated`) into what subscribers actually observe: `Unknown`
/// and `Empty` both deliver `NoEndpoints`, distinguished only by `exists`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotState {
    NoEndpoints { exists: bool },
    Exists(AddressSet),
}

impl SnapshotState {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::NoEndpoints { .. } => true,
            Self::Exists(set) => set.is_empty(),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Self::NoEndpoints { exists } => *exists,
            Self::Exists(_) => true,
        }
    }

    pub fn as_address_set(&self) -> Option<&AddressSet> {
        match self {
            Self::NoEndpoints { .. } => None,
            Self::Exists(set) => Some(set),
        }
    }
}

/// An immutable, versioned snapshot delivered to subscribers of a `Topic`.
///
/// Producers must never mutate an `AddressSet` once it has been wrapped in a
/// published snapshot: deriving a new one always starts from a clone.
pub type AddressSnapshot = Versioned<SnapshotState>;

pub fn unknown_snapshot() -> AddressSnapshot {
    Versioned::new(SnapshotState::NoEndpoints { exists: false })
}
