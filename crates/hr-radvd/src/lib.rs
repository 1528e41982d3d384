pub mod daemon;
pub mod deprecation;
pub mod error;
pub mod packet;
pub mod params;
pub mod responder;
pub mod socket;
pub mod transmitter;

pub use daemon::RaDaemon;
pub use error::{RaError, RaResult};
pub use packet::{AssembledRa, ParsedRa, assemble_ra, parse_ra};
pub use params::{RaParams, deprecated_params};
pub use socket::InterfaceParams;
