fn main() -> anyhow::Result<()> {
    railyard::cli::run_cli()
}
