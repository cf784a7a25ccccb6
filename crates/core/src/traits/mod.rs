pub mod channel_directory;
pub mod channel_tester;
pub mod policy;
pub mod repository;

pub use channel_directory::*;
pub use channel_tester::*;
pub use policy::*;
pub use repository::*;
