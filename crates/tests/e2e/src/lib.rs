//! Black-box test harness: spins up the full `platform-server` stack
//! in-process against an ephemeral port and a temporary data directory,
//! then drives it over HTTP the same way a real client would.

pub mod fixtures;
pub mod harness;

pub use fixtures::Fixtures;
pub use harness::TestServer;
