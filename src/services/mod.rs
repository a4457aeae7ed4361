pub mod classifier;
pub mod cluster_session;
pub mod prefix_table;
pub mod shutdown;
pub mod simulated_feed;
pub mod spot_parser;
mod spot_store;
pub mod supervisor;

pub use cluster_session::{ClusterSession, Connector, Endpoint, SessionState, SessionStatus, TcpConnector};
pub use prefix_table::{PrefixTable, SharedPrefixTable};
pub use simulated_feed::SimulatedFeed;
pub use spot_parser::{DxSpotParser, SpotParse};
pub use spot_store::SpotStore;
pub use supervisor::{ClusterStatus, Supervisor};
