// racelobby-api: async client for the lobby master list, per-server INFO and LAN discovery

pub mod error;
pub mod lan;
pub mod lobby;
pub mod models;
pub mod transport;

pub use error::Error;
pub use lan::{LanDiscovery, LanReply};
pub use lobby::LobbyClient;
pub use models::RawServer;
pub use transport::TransportConfig;
