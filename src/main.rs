fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    carrier_dmd::app::run()
}
