use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

use terrarium_deploy::config::{apply_env_overrides, load_config, DeployConfig};
use terrarium_deploy::system::paths::ProjectPaths;
use terrarium_deploy::{Action, AuthMode, Environment, LogCollector, Orchestrator};

/// Edge Terrarium deployment driver
#[derive(Parser, Debug)]
#[command(name = "terrarium_deploy", version, about = "Build, deploy, provision and test Edge Terrarium")]
struct Args {
    /// Target environment: local (compose) or cluster (k3d/minikube)
    environment: Environment,

    /// deploy | test | clean | logs | secrets
    action: Action,

    /// Configuration file (default: ./terrarium.toml, then ~/.config/terrarium/)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Rebuild every image regardless of timestamps
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// static | rbac | both
    #[arg(long = "auth-mode")]
    auth_mode: Option<AuthMode>,

    #[arg(long = "namespace")]
    namespace: Option<String>,

    #[arg(long = "vault-addr")]
    vault_addr: Option<String>,
}

impl Args {
    fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Info
        }
    }

    /// CLI flags win over the file and the environment.
    fn apply_overrides(&self, config: &mut DeployConfig) {
        config.no_cache = self.no_cache;
        if let Some(mode) = self.auth_mode {
            config.vault.auth_mode = mode;
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(addr) = &self.vault_addr {
            config.vault.addr = addr.trim_end_matches('/').to_string();
        }
    }
}

fn load(args: &Args, cwd: &std::path::Path) -> terrarium_deploy::Result<DeployConfig> {
    let mut config = load_config(args.config.as_deref(), cwd)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut paths = ProjectPaths::discover(&cwd);

    // =========================================================================
    // LOGGING INITIALIZATION - MUST BE FIRST
    // =========================================================================
    let handle = match LogCollector::new(&paths.logs_dir(), args.level()).and_then(|c| c.install()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("[Main] WARNING: logging to file disabled: {}", e);
            None
        }
    };

    let config = match load(&args, &cwd) {
        Ok(config) => config,
        Err(e) => {
            log::error!("[Config] {}", e);
            flush(&handle);
            std::process::exit(1);
        }
    };
    if let Some(root) = &config.project_root {
        paths = ProjectPaths::new(root.clone());
    }
    log::debug!("[Main] Project root: {}", paths.root().display());

    let mut orchestrator = Orchestrator::new(config, paths);
    let code = match orchestrator.run(args.environment, args.action).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("[Terrarium] {} {} failed: {}", args.environment, args.action, e);
            1
        }
    };

    flush(&handle);
    std::process::exit(code);
}

fn flush(handle: &Option<terrarium_deploy::LogHandle>) {
    if let Some(handle) = handle {
        if let Err(e) = handle.wait_for_empty() {
            eprintln!("[Main] WARNING: log flush failed: {}", e);
        }
    }
}
