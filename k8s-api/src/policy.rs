pub mod server;
pub mod service_profile;
pub mod traffic_split;

pub use self::{
    server::{Server, ServerSpec},
    service_profile::{ServiceProfile, ServiceProfileSpec},
    traffic_split::{TrafficSplit, TrafficSplitBackend, TrafficSplitSpec},
};
