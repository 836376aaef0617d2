use hashledger::cli::run_cli;

fn main() -> anyhow::Result<()> {
    // Logging is initialized inside run_cli once the debug flag is known.
    run_cli()
}
