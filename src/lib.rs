// Library modules
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod fileid;
pub mod fleet;
pub mod http;
pub mod keepalive;
pub mod links;
pub mod props;
pub mod range;
pub mod session;
pub mod stream;
pub mod upstream;

// Re-export commonly used types
pub use config::Config;
pub use error::StreamError;
pub use fileid::{FileId, FileKind, InputLocation};
pub use fleet::{ClientFleet, ClientIdentity};
pub use http::{router, AppState};
pub use props::{FileProperties, PropsCache};
pub use range::RangePlan;
pub use session::{AuthStore, SessionPool};
pub use upstream::{Connector, RpcSession, TcpConnector};
