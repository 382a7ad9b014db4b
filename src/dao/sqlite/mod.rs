mod connection;
mod error;

pub use connection::SqliteHandle;
pub use error::{SqliteDaoError, SqliteResult};
