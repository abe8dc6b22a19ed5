mod app;
mod auth_commands;
mod package_commands;

use std::path::PathBuf;

use {
    clap::{Args, Parser, Subcommand},
    claude_skills_common::{ContentType, Scope},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::app::App;

#[derive(Parser)]
#[command(
    name = "claude-skills",
    version,
    about = "Install skills, agents, commands, hooks, plugins, MCP servers and settings presets from the marketplace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Marketplace base URL (overrides config and environment).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Config file to use instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// `-g` / `-l`. Neither means "detect" for writes and "both" for reads.
#[derive(Args, Debug, Clone, Copy, Default)]
struct ScopeArgs {
    /// Use the user-global directory (~/.claude).
    #[arg(short, long, conflicts_with = "local")]
    global: bool,
    /// Use the project-local directory (./.claude).
    #[arg(short, long)]
    local: bool,
}

impl ScopeArgs {
    fn explicit(self) -> Option<Scope> {
        if self.global {
            Some(Scope::Global)
        } else if self.local {
            Some(Scope::Local)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with the device authorization flow.
    Login,
    /// Remove the stored session.
    Logout,
    /// Show the logged-in account.
    Whoami,
    /// Install one or more packages with their dependencies.
    #[command(visible_alias = "i")]
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Content type of the packages.
        #[arg(short = 't', long = "type", default_value = "skill")]
        content_type: ContentType,
        /// Version to install instead of the latest.
        #[arg(long = "version")]
        version: Option<String>,
        /// Do not install declared dependencies.
        #[arg(long)]
        skip_dependencies: bool,
    },
    /// Reinstall installed packages at their latest version.
    #[command(visible_alias = "upgrade")]
    Update {
        packages: Vec<String>,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(short = 't', long = "type")]
        content_type: Option<ContentType>,
        /// Update every package installed in the scope.
        #[arg(long, conflicts_with = "packages")]
        all: bool,
    },
    /// Create the directory layout and an empty registry for a scope.
    Init {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove an installed package.
    #[command(visible_aliases = ["remove", "rm"])]
    Uninstall {
        package: String,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(short = 't', long = "type")]
        content_type: Option<ContentType>,
    },
    /// List installed packages.
    #[command(visible_alias = "ls")]
    List {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(short = 't', long = "type")]
        content_type: Option<ContentType>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Search the marketplace.
    #[command(visible_alias = "s")]
    Search {
        query: String,
        #[arg(short = 't', long = "type")]
        content_type: Option<ContentType>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
    /// Show recent entries of the security audit log.
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List earlier versions of a package that can be reinstalled.
    RollbackVersions {
        package: String,
        #[arg(short = 't', long = "type", default_value = "skill")]
        content_type: ContentType,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "claude-skills starting");

    let app = App::load(cli.config.as_deref(), cli.api_url.as_deref())?;

    match cli.command {
        Commands::Login => auth_commands::login(&app).await,
        Commands::Logout => auth_commands::logout(&app),
        Commands::Whoami => auth_commands::whoami(&app).await,
        Commands::Install {
            packages,
            scope,
            content_type,
            version,
            skip_dependencies,
        } => {
            let scope = scope
                .explicit()
                .unwrap_or_else(|| app.paths.detect_scope());
            package_commands::install(&app, &packages, scope, content_type, version, skip_dependencies)
                .await
        },
        Commands::Update {
            packages,
            scope,
            content_type,
            all,
        } => {
            let scope = scope
                .explicit()
                .unwrap_or_else(|| app.paths.detect_scope());
            package_commands::update(&app, &packages, scope, content_type, all).await
        },
        Commands::Init { scope } => {
            package_commands::init(&app, scope.explicit().unwrap_or(Scope::Local))
        },
        Commands::Uninstall {
            package,
            scope,
            content_type,
        } => package_commands::uninstall(&app, &package, scope.explicit(), content_type),
        Commands::List {
            scope,
            content_type,
            json,
        } => package_commands::list(&app, scope.explicit(), content_type, json),
        Commands::Search {
            query,
            content_type,
            category,
            limit,
            json,
        } => package_commands::search(&app, &query, content_type, category, limit, json).await,
        Commands::Audit { limit } => package_commands::audit(&app, limit),
        Commands::RollbackVersions {
            package,
            content_type,
            scope,
        } => {
            let scope = scope
                .explicit()
                .unwrap_or_else(|| app.paths.detect_scope());
            package_commands::rollback_versions(&app, &package, content_type, scope)
        },
    }
}
