pub mod codec;
pub mod correlate;
pub mod icmp;
pub mod session;
pub mod socket;
pub mod udp;

pub use codec::*;
pub use correlate::*;
pub use icmp::*;
pub use session::*;
pub use socket::*;
pub use udp::*;
