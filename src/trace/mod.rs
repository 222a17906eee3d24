pub mod flow;
pub mod paris;
pub mod ping;
pub mod traceroute;

pub use flow::*;
pub use paris::*;
pub use ping::*;
pub use traceroute::*;
