//! kyverno-mutate
//!
//! Applies the mutate rules of Kyverno policies to resource manifests.

use clap::Parser;

use kyverno_cli::{init_tracing, Cli, Result};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    cli.run()
}
