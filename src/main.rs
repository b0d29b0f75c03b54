use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use imagen_batch::auth::AuthClient;
use imagen_batch::cancel::CancelToken;
use imagen_batch::config::{self, Backend, Config};
use imagen_batch::db;
use imagen_batch::generator::{Generator, ImageFxClient, ProxyClient};
use imagen_batch::log::JobLog;
use imagen_batch::model::{AspectRatio, JobId, JobStatus, PromptJob, RunConfig};
use imagen_batch::runner::{BatchRunner, RunSummary};
use imagen_batch::session::{Session, SqliteCredentialStore};
use imagen_batch::sink::DirectorySink;

#[derive(Debug, Parser)]
#[command(author, version, about = "Generate images for a batch of prompts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a sample config file
    InitConfig,
    /// Log in through the intermediary and remember the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the stored session and whether it is still valid
    Whoami,
    /// Run one prompt per line of input (file, or stdin when omitted or `-`)
    Generate {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Aspect ratio: landscape-4-3, landscape, portrait-3-4, portrait, square
        #[arg(long)]
        aspect: Option<AspectRatio>,
        /// Do not save images automatically
        #[arg(long)]
        no_auto_save: bool,
    },
    /// Re-run failed jobs from the last log (one job with --id, otherwise all)
    Retry {
        #[arg(long)]
        id: Option<u64>,
        #[arg(long)]
        aspect: Option<AspectRatio>,
        #[arg(long)]
        no_auto_save: bool,
    },
    /// Print the last job log
    Log,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let command = match args.command {
        Command::InitConfig => {
            print!("{}", config::example());
            return Ok(());
        }
        command => command,
    };

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        format!(
            "sqlite://{}/imagen.db",
            cfg.app.data_dir.trim_end_matches('/')
        )
    });
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = SqliteCredentialStore::new(pool.clone());

    match command {
        // Printed above, before any config is loaded.
        Command::InitConfig => {}
        Command::Login { username, password } => {
            let client = AuthClient::new(cfg.base_url()?, cfg.timeout())?;
            let resp = client.login(&username, &password).await?;
            Session::store(&store, &resp.token, resp.expires_at.as_deref()).await?;
            let role = Session::load(&store).await?.validate(Utc::now())?;
            println!("Logged in as {} ({:?}).", username, role);
        }
        Command::Logout => {
            Session::clear(&store).await?;
            println!("Logged out.");
        }
        Command::Whoami => {
            let session = Session::load(&store).await?;
            match session.validate(Utc::now()) {
                Ok(role) => {
                    let expiry = session
                        .expires_at
                        .map(|e| e.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".into());
                    println!("{:?} session, expires: {}", role, expiry);
                }
                Err(err) => println!("{}", err),
            }
        }
        Command::Generate {
            file,
            aspect,
            no_auto_save,
        } => {
            let (session, role) = Session::require(&store, Utc::now()).await?;
            info!(?role, "session valid");
            let input = read_input(file.as_deref())?;
            let runner = build_runner(&cfg, &session)?;
            let run_cfg = run_config(&cfg, aspect, no_auto_save);
            let cancel = cancel_on_ctrl_c();

            let mut log = db::load_log(&pool).await?;
            let summary = log
                .generate(&runner, &input, &run_cfg, &cancel, print_job)
                .await;
            db::save_log(&pool, &log).await?;
            print_summary(&summary);
        }
        Command::Retry {
            id,
            aspect,
            no_auto_save,
        } => {
            let (session, role) = Session::require(&store, Utc::now()).await?;
            info!(?role, "session valid");
            let runner = build_runner(&cfg, &session)?;
            let run_cfg = run_config(&cfg, aspect, no_auto_save);
            let cancel = cancel_on_ctrl_c();

            let mut log = db::load_log(&pool).await?;
            let summary = match id {
                Some(id) => {
                    log.retry_one(&runner, JobId(id), &run_cfg, &cancel, print_job)
                        .await
                }
                None => {
                    log.retry_all_failed(&runner, &run_cfg, &cancel, print_job)
                        .await
                }
            };
            db::save_log(&pool, &log).await?;
            match summary {
                Some(summary) => print_summary(&summary),
                None => println!("Nothing to retry."),
            }
        }
        Command::Log => {
            let log = db::load_log(&pool).await?;
            print_log(&log);
        }
    }

    Ok(())
}

fn read_input(file: Option<&std::path::Path>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompts from {}", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read prompts from stdin")?;
            Ok(buf)
        }
    }
}

fn build_runner(cfg: &Config, session: &Session) -> Result<BatchRunner> {
    let generator: Arc<dyn Generator> = match cfg.generation.backend {
        Backend::Proxy => {
            let token = session
                .token
                .clone()
                .ok_or_else(|| anyhow!("no session token"))?;
            Arc::new(ProxyClient::new(cfg.base_url()?, token, cfg.timeout())?)
        }
        Backend::Imagefx => {
            let fx = cfg
                .imagefx
                .as_ref()
                .ok_or_else(|| anyhow!("imagefx section missing"))?;
            let endpoint = reqwest::Url::parse(fx.endpoint.trim())
                .context("invalid imagefx.endpoint")?;
            Arc::new(ImageFxClient::new(
                endpoint,
                fx.token.clone(),
                fx.candidates,
                fx.model.clone(),
                cfg.timeout(),
            )?)
        }
    };
    let sink = DirectorySink::new(cfg.resolved_save_dir());
    info!(backend = ?cfg.generation.backend, save_dir = %sink.dir().display(), "runner ready");
    Ok(BatchRunner::new(generator).with_sink(Arc::new(sink)))
}

fn run_config(cfg: &Config, aspect: Option<AspectRatio>, no_auto_save: bool) -> RunConfig {
    let mut run_cfg = cfg.run_config();
    if let Some(aspect) = aspect {
        run_cfg.aspect_ratio = aspect;
    }
    if no_auto_save {
        run_cfg.auto_save = false;
    }
    run_cfg
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; cancelling batch");
                token.cancel();
            }
            Err(err) => warn!(?err, "failed to listen for ctrl-c"),
        }
    });
    cancel
}

fn print_job(job: &PromptJob) {
    match &job.status {
        JobStatus::Pending => println!("{} [..] {}", job.id, job.prompt),
        JobStatus::Success { images } => {
            println!("{} [ok] {} ({} images)", job.id, job.prompt, images.len());
            for image in images {
                println!("      {}", image.filename);
            }
        }
        JobStatus::Error { kind, message } => {
            println!("{} [{}] {}: {}", job.id, kind.as_str(), job.prompt, message)
        }
    }
}

fn print_log(log: &JobLog) {
    if log.is_empty() {
        println!("No jobs yet.");
        return;
    }
    for job in log.jobs() {
        print_job(job);
    }
    let failed = log.failed().count();
    if failed > 0 {
        println!("{} failed; run `imagen-batch retry` to try them again.", failed);
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Done: {} submitted, {} succeeded, {} failed{}",
        summary.submitted,
        summary.succeeded,
        summary.failed,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    if summary.failed > 0 {
        println!("Run `imagen-batch retry` to re-run failed prompts.");
    }
}
