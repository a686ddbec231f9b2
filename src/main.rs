use issue_triage_bot::{app, cli, config};
use log::warn;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let matches = cli::build_cli().get_matches();
    let opts = cli::parse_matches(&matches);

    if opts.invocation == cli::Invocation::Version {
        println!("issue-triage-bot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load .env before logging so LOG_LEVEL from the file takes effect.
    let dotenv = config::load_dotenv(opts.env_file.as_deref());
    cli::init_logging(opts.log_level.as_deref());
    match dotenv {
        Ok(Some(path)) => log::debug!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            if opts.env_file.is_some() {
                return Err(anyhow::anyhow!("failed to load env file: {e}"));
            }
            warn!("Ignoring unreadable .env file: {}", e);
        }
    }

    match opts.invocation {
        cli::Invocation::Version => {}
        cli::Invocation::Run { repos, dry_run } => {
            app::run(&repos, dry_run).await?;
        }
        cli::Invocation::Installations => app::installations().await?,
        cli::Invocation::Schedule {
            kind,
            binary,
            workdir,
            log_file,
        } => app::schedule(kind, binary, workdir, log_file)?,
    }
    Ok(())
}
