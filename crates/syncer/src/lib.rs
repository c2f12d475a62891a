pub mod accrual;
pub mod arguments;
pub mod events;
pub mod housekeeper;
pub mod node;
pub mod projector;
pub mod queue;
pub mod run;
pub mod scanner;
mod shutdown;

use clap::Parser;

pub async fn start(args: impl Iterator<Item = String>) {
    let args = arguments::Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter);
    observe::panic_hook::install();
    observe::metrics::setup_registry(Some("orderbook_syncer".into()));
    tracing::info!("running syncer with validated arguments:\n{args}");
    run::run(args).await;
}
