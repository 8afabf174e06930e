use std::process::exit;

use clap::Parser;
use log::error;

use weave_netplugin::{daemon, DaemonArgs};

fn main() {
    let args = DaemonArgs::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    if let Err(e) = daemon(args) {
        error!("Failed to run the plugin: {:?}", e);
        exit(-1);
    }
}
