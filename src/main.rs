use anyhow::Result;

mod app;
mod cli;
mod logging;

fn main() -> Result<()> {
    let args = cli::parse();
    let code = app::run(args)?;
    std::process::exit(code);
}
