use crate::config::Config;
use crate::feedback::FeedbackStore;
use crate::proxy::ProxyManager;
use crate::selectors::{LocalFsStore, SelectorStore};
use crate::urls;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

/// Envelope for all CLI output, so callers can script against it.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Parser)]
#[command(name = "quarry", version, about = "Scraper support toolkit (JSON output)")]
pub struct Cli {
    #[command(subcommand)]
    cmd: Command,

    #[arg(long, short, action = clap::ArgAction::Count, global = true, default_value_t = 2,
          help = "Output v(v...)erbosity: error (0), warn (1), info (2), debug (3), trace (4)")]
    pub verbose: u8,

    /// Path to a settings.json overriding the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Sanitize a URL: normalize its query string, fail open on garbage
    Clean { url: String },
    #[command(subcommand)]
    Proxy(ProxyCmd),
    #[command(subcommand)]
    Feedback(FeedbackCmd),
    #[command(subcommand)]
    Selector(SelectorCmd),
}

#[derive(Subcommand)]
enum ProxyCmd {
    /// Check out the least-used proxy
    Get,
    /// Pick a proxy at random, ignoring usage counts
    Random,
    /// Probe every pool member and blacklist the failures
    TestAll,
}

#[derive(Subcommand)]
enum FeedbackCmd {
    /// Record feedback for a scrape task
    Add(AddArgs),
    /// List feedback for a task (or a domain with --domain)
    List {
        target: String,
        #[arg(long)]
        domain: bool,
    },
    /// Average rating, scoped by --task or --domain if given
    Rating {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Keyword counts over all stored comments
    Issues,
}

#[derive(Args)]
struct AddArgs {
    task_id: String,
    url: String,
    data_description: String,
    #[arg(long)]
    rating: Option<u8>,
    #[arg(long)]
    comment: Option<String>,
}

#[derive(Subcommand)]
enum SelectorCmd {
    /// List stored selector sets with their generation times
    List,
    Delete {
        task_id: String,
        #[arg(long = "yes")]
        yes: bool,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match cli.cmd {
        Command::Clean { url } => {
            let out = urls::parse(&url);
            print_json(ApiResponse::ok(serde_json::json!({
                "url": out.as_str(),
                "fallback": out.used_fallback(),
            })));
        }
        Command::Proxy(cmd) => proxy_cmd(&config, cmd),
        Command::Feedback(cmd) => feedback_cmd(&config, cmd),
        Command::Selector(cmd) => selector_cmd(&config, cmd),
    }
    Ok(())
}

fn proxy_cmd(config: &Config, cmd: ProxyCmd) {
    let manager = ProxyManager::new(&config.proxy);
    match cmd {
        ProxyCmd::Get => {
            print_json(ApiResponse::ok(serde_json::json!({
                "proxy": manager.get_proxy(),
            })));
        }
        ProxyCmd::Random => {
            print_json(ApiResponse::ok(serde_json::json!({
                "proxy": manager.get_random_proxy(),
            })));
        }
        ProxyCmd::TestAll => {
            print_json(ApiResponse::ok(manager.test_all()));
        }
    }
}

fn feedback_cmd(config: &Config, cmd: FeedbackCmd) {
    let store = match open_feedback_store(config) {
        Ok(store) => store,
        Err(e) => return print_json(ApiResponse::<()>::err(e.to_string())),
    };
    match cmd {
        FeedbackCmd::Add(args) => {
            let stored = store.store(
                &args.task_id,
                &args.url,
                &args.data_description,
                args.rating,
                args.comment.as_deref(),
            );
            if stored {
                print_json(ApiResponse::ok(serde_json::json!({"stored": args.task_id})));
            } else {
                print_json(ApiResponse::<()>::err("failed to store feedback"));
            }
        }
        FeedbackCmd::List { target, domain } => {
            let records = if domain {
                store.for_domain(&target)
            } else {
                store.for_task(&target)
            };
            print_json(ApiResponse::ok(records));
        }
        FeedbackCmd::Rating { task, domain } => {
            let average = store.average_rating(task.as_deref(), domain.as_deref());
            print_json(ApiResponse::ok(serde_json::json!({"average_rating": average})));
        }
        FeedbackCmd::Issues => print_json(ApiResponse::ok(store.common_issues())),
    }
}

fn selector_cmd(config: &Config, cmd: SelectorCmd) {
    let store = match open_selector_store(config) {
        Ok(store) => store,
        Err(e) => return print_json(ApiResponse::<()>::err(e.to_string())),
    };
    match cmd {
        SelectorCmd::List => match store.list() {
            Ok(listed) => print_json(ApiResponse::ok(listed)),
            Err(e) => print_json(ApiResponse::<()>::err(e.to_string())),
        },
        SelectorCmd::Delete { task_id, yes } => {
            if !yes {
                return print_json(ApiResponse::<()>::err("refusing to delete without --yes"));
            }
            match store.delete(&task_id) {
                Ok(()) => print_json(ApiResponse::ok(serde_json::json!({"deleted": task_id}))),
                Err(e) => print_json(ApiResponse::<()>::err(e.to_string())),
            }
        }
    }
}

fn open_feedback_store(config: &Config) -> crate::Result<FeedbackStore> {
    match &config.storage.feedback_dir {
        Some(dir) => FeedbackStore::at(dir.clone()),
        None => FeedbackStore::new(),
    }
}

fn open_selector_store(config: &Config) -> crate::Result<LocalFsStore> {
    match &config.storage.selector_dir {
        Some(dir) => LocalFsStore::at(dir.clone()),
        None => LocalFsStore::new(),
    }
}

fn print_json<T: Serialize>(resp: ApiResponse<T>) {
    match serde_json::to_string_pretty(&resp) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{{\"ok\":false,\"error\":\"serialization failed: {e}\"}}"),
    }
}
