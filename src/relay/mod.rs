pub mod connection;
pub mod groups;
pub mod presence;
pub mod protocol;

pub use connection::{ConnState, Connection, RoomTarget};
pub use groups::{ConnectionId, Groups};
pub use presence::Presence;
pub use protocol::{Inbound, Outbound};
