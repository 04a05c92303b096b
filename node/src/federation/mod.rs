pub mod client;
pub mod tickets;
pub mod validators;

pub use client::{
    BroadcastReport, ConfigFormat, ConfigType, FederationClient, MiningPoolAnnouncement,
    NodeIdentity, ProvisionedConfig, VpnRequestParams, WorkerBroadcastEntry, WorkersBroadcast,
};
pub use tickets::{TicketStatus, TicketStore};
pub use validators::{NeuronInfo, ValidatorDescriptor, ValidatorRegistry};
