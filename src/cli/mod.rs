mod args;
mod config;

pub use args::{Args, CheckArgs, Command, InitArgs, ListArgs, RunArgs};
pub use config::{BrokerConfig, BrokerSettings, StaticServers};
