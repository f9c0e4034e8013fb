mod aggregate;
mod config;
mod crosswalk;
mod error;
mod geo;
mod ioutil;
mod measure;
mod megacounty;
mod progress;
mod resolution;
mod store;
mod timeseries;

pub use aggregate::*;
pub use config::*;
pub use crosswalk::*;
pub use error::*;
pub use geo::*;
pub use ioutil::magic_open;
pub use measure::*;
pub use megacounty::*;
pub use progress::*;
pub use resolution::*;
pub use store::*;
pub use timeseries::*;
