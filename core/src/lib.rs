#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Value types and the snapshot fan-out primitive shared by every watcher:
//! no informer wiring lives here, only the data model and `Topic`.

pub mod address;
pub mod error;
pub mod ids;
pub mod snapshot;
pub mod topic;

pub use address::{Address, AddressSet, Zone};
pub use error::{DiscoveryError, Result};
pub use ids::{AddressId, ExternalWorkloadId, IpFamily, IpPort, PodId, ProfileId, ServiceId};
pub use snapshot::{unknown_snapshot, AddressSnapshot, SnapshotState};
pub use topic::{Topic, TopicWriter, Versioned};

/// The subscriber-facing handle for `EndpointsWatcher`/`WorkloadWatcher`
/// subscriptions.
pub type AddressTopic = Topic<SnapshotState>;
pub type AddressTopicWriter = TopicWriter<SnapshotState>;

impl AddressTopicWriter {
    pub fn new_unknown() -> (Self, AddressTopic) {
        TopicWriter::new(SnapshotState::NoEndpoints { exists: false })
    }
}
