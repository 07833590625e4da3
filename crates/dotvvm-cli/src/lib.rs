use clap::{ArgAction, Parser, Subcommand};
use dotvvm_core::{DotvvmConfiguration, ProjectFile};
use dotvvm_web::{AxumDotvvmAdapter, DotvvmPipeline};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dotvvm", version, about = "Tooling for dotvvm-rs projects")]
pub struct Cli {
    /// More log output (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Compile a view and print its resolved tree as JSON.
    Compile {
        /// Virtual path of the view, e.g. `views/home.dothtml`.
        view: String,
        #[arg(long, default_value = "dotvvm.json")]
        project: PathBuf,
    },
    /// Write the serialized configuration to `.dotvvm/` for tooling.
    DumpConfig {
        #[arg(default_value = "dotvvm.json")]
        project: PathBuf,
    },
    /// Host the application.
    Serve {
        #[arg(default_value = "dotvvm.json")]
        project: PathBuf,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Recompile views when their files change.
        #[arg(long)]
        watch: bool,
    },
    /// Write the browser runtime to a file.
    InitClient {
        #[arg(long, default_value = "dotvvm-runtime.js")]
        out: PathBuf,
    },
}

pub async fn run_from_env() -> Result<(), String> {
    run_from_args(std::env::args().skip(1).collect()).await
}

pub async fn run_from_args(args: Vec<String>) -> Result<(), String> {
    let cli = Cli::try_parse_from(std::iter::once("dotvvm".to_string()).chain(args)).map_err(|e| e.to_string())?;
    init_tracing(cli.verbose);

    match cli.command {
        CliCommand::Compile { view, project } => {
            println!("{}", compile_view(&project, &view)?);
            Ok(())
        }
        CliCommand::DumpConfig { project } => {
            let path = dump_config(&project)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        CliCommand::Serve { project, port, watch } => run_server(&project, port, watch).await,
        CliCommand::InitClient { out } => {
            fs::write(&out, dotvvm_web::DOTVVM_RUNTIME_JS)
                .map_err(|e| format!("failed to write {}: {e}", out.display()))?;
            println!("wrote {}", out.display());
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_configuration(project: &Path) -> Result<Arc<DotvvmConfiguration>, String> {
    let project = ProjectFile::load(project).map_err(|e| e.to_string())?;
    DotvvmConfiguration::from_project(&project).map_err(|e| e.to_string())
}

/// Resolved tree of `view` as pretty JSON.
pub fn compile_view(project: &Path, view: &str) -> Result<String, String> {
    let config = load_configuration(project)?;
    let tree = config
        .view_compiler
        .compile_view(view)
        .map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&*tree).map_err(|e| e.to_string())
}

pub fn dump_config(project: &Path) -> Result<PathBuf, String> {
    load_configuration(project)?
        .write_dump()
        .map_err(|e| e.to_string())
}

async fn run_server(project: &Path, port: u16, watch: bool) -> Result<(), String> {
    let config = load_configuration(project)?;
    let root = config.application_physical_path.clone();
    let pipeline = Arc::new(DotvvmPipeline::new(config.clone()));
    let app = AxumDotvvmAdapter::new(pipeline).router();

    let _watcher = if watch {
        let (watcher, rx) = start_fs_watcher(&root)?;
        tokio::spawn(watch_loop(config.clone(), rx));
        Some(watcher)
    } else {
        None
    };

    let host = format!("0.0.0.0:{port}");
    info!(
        root = %root.display(),
        url = %format!("http://localhost:{port}{}", config.virtual_directory),
        watch,
        "serving"
    );
    let listener = tokio::net::TcpListener::bind(&host)
        .await
        .map_err(|e| format!("failed to bind {host}: {e}"))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server failed: {e}"))
}

async fn watch_loop(config: Arc<DotvvmConfiguration>, mut rx: mpsc::UnboundedReceiver<Vec<PathBuf>>) {
    while let Some(first) = rx.recv().await {
        let changed = debounce_fs_events(&mut rx, first).await;
        let views = changed_views(&config, &changed);
        if views.is_empty() {
            continue;
        }
        config.view_compiler.invalidate(&views);
        info!(views = ?views, "views changed, cache invalidated");
    }
    warn!("filesystem watcher channel closed");
}

async fn debounce_fs_events(rx: &mut mpsc::UnboundedReceiver<Vec<PathBuf>>, mut changed: Vec<PathBuf>) -> Vec<PathBuf> {
    let debounce_window = Duration::from_millis(120);
    let sleep = tokio::time::sleep_until(Instant::now() + debounce_window);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => break,
            maybe = rx.recv() => {
                let Some(paths) = maybe else {
                    break;
                };
                changed.extend(paths);
                sleep.as_mut().reset(Instant::now() + debounce_window);
            }
        }
    }
    changed
}

fn changed_views(config: &DotvvmConfiguration, changed: &[PathBuf]) -> Vec<String> {
    let mut views: Vec<String> = changed
        .iter()
        .filter(|path| is_view_file(path))
        .filter_map(|path| config.view_compiler.virtual_path_of(path))
        .collect();
    views.sort();
    views.dedup();
    views
}

fn start_fs_watcher(root: &Path) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<Vec<PathBuf>>), String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let paths: Vec<PathBuf> = event
                .paths
                .into_iter()
                .filter(|p| !path_has_ignored_segment(p))
                .collect();
            if !paths.is_empty() {
                let _ = tx.send(paths);
            }
        }
        Err(err) => warn!(error = %err, "filesystem watcher error"),
    })
    .map_err(|e| format!("failed to initialize filesystem watcher: {e}"))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| format!("failed to watch {}: {e}", root.display()))?;

    Ok((watcher, rx))
}

fn is_view_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("dothtml" | "dotmaster" | "dotcontrol")
    )
}

fn path_has_ignored_segment(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(seg) => {
            let s = seg.to_string_lossy();
            matches!(s.as_ref(), ".git" | ".dotvvm" | "target" | "node_modules")
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn project(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir.join("views")).unwrap();
        fs::write(
            dir.join("views").join("home.dothtml"),
            "@viewModel HomePage\n<h1>{{value: Title}}</h1>",
        )
        .unwrap();
        let path = dir.join("dotvvm.json");
        fs::write(
            &path,
            json!({
                "virtualDirectory": "app",
                "debug": true,
                "types": [{"name": "HomePage", "properties": [{"name": "Title", "type": "string"}]}],
                "routes": [{"name": "home", "url": "", "virtualPath": "views/home.dothtml", "viewModel": {"Title": "Hi"}}]
            })
            .to_string(),
        )
        .unwrap();
        path
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["dotvvm", "-v", "serve", "site.json", "--port", "9000", "--watch"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(
            cli.command,
            CliCommand::Serve {
                project: PathBuf::from("site.json"),
                port: 9000,
                watch: true
            }
        );

        let cli = Cli::try_parse_from(["dotvvm", "compile", "views/home.dothtml"]).unwrap();
        assert_eq!(
            cli.command,
            CliCommand::Compile {
                view: "views/home.dothtml".into(),
                project: PathBuf::from("dotvvm.json")
            }
        );
        assert!(Cli::try_parse_from(["dotvvm", "publish"]).is_err());
    }

    #[test]
    fn compile_prints_the_resolved_tree() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());

        let tree: Value = serde_json::from_str(&compile_view(&project, "views/home.dothtml").unwrap()).unwrap();
        assert_eq!(tree["viewModelType"], "HomePage");
        assert!(tree["content"].as_array().is_some_and(|c| !c.is_empty()));

        let err = compile_view(&project, "views/missing.dothtml").unwrap_err();
        assert!(err.contains("missing.dothtml"));
    }

    #[test]
    fn dump_config_writes_into_the_cli_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());

        let path = dump_config(&project).unwrap();
        assert!(path.starts_with(dir.path().join(".dotvvm")));
        let dump: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(dump["virtualDirectory"], "/app");
        assert_eq!(dump["routes"][0]["name"], "home");
    }

    #[test]
    fn only_view_files_invalidate_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_configuration(&project(dir.path())).unwrap();
        let changed = vec![
            dir.path().join("views").join("home.dothtml"),
            dir.path().join("views").join("home.dothtml"),
            dir.path().join("styles.css"),
        ];
        assert_eq!(changed_views(&config, &changed), ["views/home.dothtml"]);
        assert!(path_has_ignored_segment(Path::new("/srv/app/.dotvvm/dump.json")));
    }
}
