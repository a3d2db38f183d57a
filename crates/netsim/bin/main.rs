//! The `netsim` cli
use clap::Parser;
use netsim::cmd::SimArgs;

#[derive(Debug, Parser)]
#[clap(name = "netsim", version = netsim::config::VERSION_MESSAGE)]
pub struct App {
    #[clap(flatten)]
    pub sim: SimArgs,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let app = App::parse();
    app.sim.run().await
}
