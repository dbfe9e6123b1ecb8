pub mod pool;
pub mod tcp;

pub use pool::{
    BlockedConnection, Connection, ConnectionPool, ConnectionRole, ReplySink, SharedWriter,
};
pub use tcp::RedisConnection;
