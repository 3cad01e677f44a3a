/// WayFlow entry point
///
/// Parses the command line and dispatches to the server, the validator or the
/// terminal chat.

use clap::Parser;
use wayflow::cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run(Cli::parse()).await
}
