pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod link;
pub mod main_loop;
pub mod mock_loom;
pub mod net;
pub mod phrases;
pub mod position;
pub mod protocol;
pub mod reduce;
pub mod store;
pub mod transport;

pub use config::{LoomPort, ServerConfig};
pub use error::{CommandError, LinkError, StoreError};
pub use main_loop::MainLoop;
pub use net::NetworkThread;
pub use protocol::{ClientId, InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP};
