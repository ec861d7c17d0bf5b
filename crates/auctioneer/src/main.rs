use clap::Parser;

#[tokio::main]
async fn main() {
    let args = auctioneer::arguments::Arguments::parse();
    observe::tracing::initialize(args.log_filter.as_str(), args.log_stderr_threshold);
    observe::metrics::setup_registry(Some("auctioneer".into()), None);
    tracing::info!("running auctioneer with validated arguments:\n{}", args);
    auctioneer::run(args).await;
}
