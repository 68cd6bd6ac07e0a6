use std::{env, process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};

mod api;
mod args;
mod auth;
mod backend;
mod note;
mod policy;
mod securenotes;
mod session;
mod strength;
mod time;
mod user;

use args::Args;
use backend::Backend;
use securenotes::SecureNotes;

#[tokio::main]
async fn main() -> ExitCode {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();

    let args = Args::parse();

    let Ok(backend) = Backend::new(args.data_dir()).await else {
        error!("couldn't open data directory {:?}", args.data_dir());
        return ExitCode::FAILURE;
    };

    let sync = Arc::new(SecureNotes::new(backend, args.policy()));

    if args.demo_data() {
        match sync.seed_demo_users().await {
            Ok(0) => {}
            Ok(n) => info!("created {n} demo account(s)"),
            Err(e) => {
                error!("couldn't create demo accounts: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("listening on {addr}");
    warp::serve(api::routes(sync, args.secure())).run(addr).await;

    ExitCode::SUCCESS
}
