/// Errors returned synchronously from a subscription API (`Topic`,
/// `Subscribe`) before any listener is installed, plus the informer-path
/// failure kinds used to label logged-and-dropped events.
///
/// Only the first three variants are ever returned from a subscribe call;
/// `Transient` and `Malformed` never reach a listener directly (see §7) —
/// they exist here so that logging and metrics code share one vocabulary of
/// failure kinds instead of ad hoc strings.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The subscription target is an `ExternalName` service, or otherwise
    /// unresolvable by design.
    #[error("{0} is not resolvable by this controller (ExternalName or equivalent)")]
    InvalidService(String),

    /// A hostname-qualified subscription has no matching endpoint in the
    /// service's slices/endpoints.
    #[error("no endpoint found for hostname {0:?}")]
    NotFound(String),

    /// An IP-qualified subscription matched more than one pod/workload.
    #[error("{0} matches more than one backing pod or workload")]
    FailedPrecondition(String),

    /// An informer lookup returned an unexpected error; the caller logs this
    /// and treats the affected publisher as though it started empty.
    #[error("transient lookup failure: {0}")]
    Transient(String),

    /// An event object was the wrong type or shape; the event is dropped
    /// without affecting any subscription.
    #[error("malformed object: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
