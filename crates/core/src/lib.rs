pub mod config;
pub mod error;
pub mod lane;

pub use config::{load_dotenv, SchedulerConfig};
pub use error::*;
pub use lane::Lane;
