use anyhow::Result;
use clap::Parser;
use webwallcli::{exit_code, Args, WebwallCliApp};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = WebwallCliApp::new(Args::parse())?;
    let outcome = app.run()?;

    let code = exit_code(&outcome);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
