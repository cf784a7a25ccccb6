pub mod sqlite;

pub use sqlite::{
    DatabaseManager, SqliteChannelRepository, SqliteTestJobRepository,
    SqliteTestResultRepository,
};
