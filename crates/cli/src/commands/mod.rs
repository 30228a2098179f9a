pub mod check_config;
pub mod duration;
pub mod normalize;
pub mod run;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use normalize::{run_normalize, NormalizeArgs};
pub use run::{run_arbitrage, RunArgs};
