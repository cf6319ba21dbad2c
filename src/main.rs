use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use test_catalog::{CommandBackend, Config, FileEntries, TestModel, WorkspaceWatcher};

const CONFIG_FILE: &str = "test-catalog.toml";

#[derive(Parser)]
#[command(name = "test-catalog")]
#[command(about = "Keep a test catalog in sync with a test runner and the workspace")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: test-catalog.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects and their test files
    List,

    /// Discover tests in the given files (all files if none given)
    Discover {
        files: Vec<PathBuf>,
    },

    /// Keep the catalog in sync with workspace changes
    Watch,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    // Canonicalize config path to get absolute path, then get parent
    let config_path = std::fs::canonicalize(&config_path)
        .with_context(|| format!("Could not find config file: {}", config_path.display()))?;

    let base_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = Config::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;

    let model = TestModel::new(config.test_config(&base_dir), Arc::new(CommandBackend::new()));

    match cli.command {
        Commands::List => cmd_list(&model),
        Commands::Discover { files } => cmd_discover(&model, &base_dir, files),
        Commands::Watch => cmd_watch(model, &config, &base_dir),
    }
}

fn cmd_list(model: &TestModel) -> Result<()> {
    println!("{} Listing test files...", "🔍".cyan());
    model.list_files();
    print_catalog(model);
    Ok(())
}

#[tokio::main]
async fn cmd_discover(model: &TestModel, base_dir: &Path, files: Vec<PathBuf>) -> Result<()> {
    model.list_files();

    let files: Vec<String> = if files.is_empty() {
        let mut all: Vec<String> = model.all_files().into_iter().collect();
        all.sort();
        all
    } else {
        files
            .iter()
            .map(|f| base_dir.join(f).to_string_lossy().to_string())
            .collect()
    };

    println!("{} Discovering tests in {} file(s)...", "🔍".cyan(), files.len());
    model.list_tests(&files).await;

    for project in model.project_names() {
        let mut tests = model.test_entries(&project);
        tests.sort_by(|a, b| {
            (&a.location.file, a.location.line, &a.title).cmp(&(&b.location.file, b.location.line, &b.title))
        });

        println!("\n{} {} ({} tests)", "📦".cyan(), project.bold(), tests.len());
        for test in tests {
            println!(
                "  {} {} {}",
                "•".green(),
                test.title,
                format!("{}:{}", relative(&test.location.file, base_dir), test.location.line).dimmed()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn cmd_watch(model: TestModel, config: &Config, base_dir: &Path) -> Result<()> {
    model.list_files();
    print_catalog(&model);

    let reader = model.clone();
    let _subscription = model.on_updated(move || {
        let (projects, files) = reader.read(|c| (c.projects().len(), c.all_files().len()));
        println!(
            "{} Catalog updated: {} project(s), {} file(s)",
            "↻".yellow(),
            projects,
            files
        );
    });

    let watcher = WorkspaceWatcher::new(model, base_dir, &config.watch)?;

    println!(
        "\n{} {} {}\n",
        "👀".cyan(),
        "Watching for changes in".bold(),
        base_dir.display()
    );
    println!("{}", "Press Ctrl+C to stop\n".dimmed());

    tokio::task::spawn_blocking(move || watcher.start())
        .await
        .context("Watcher thread panicked")?
}

fn print_catalog(model: &TestModel) {
    let base_dir = model.config().workspace_folder.clone();

    model.read(|catalog| {
        if catalog.is_empty() {
            println!("  {}", "No projects reported".dimmed());
            return;
        }

        for name in catalog.project_names() {
            let Some(project) = catalog.project(&name) else {
                continue;
            };
            let marker = if project.is_first { " (default)".dimmed().to_string() } else { String::new() };
            println!("\n{} {}{}", "📦".cyan(), project.name.bold(), marker);
            println!("    {} {}", "testDir:".dimmed(), project.test_dir);
            println!(
                "    {} {}/{}",
                "discovered:".dimmed(),
                project.discovered_count(),
                project.files.len()
            );

            let mut files: Vec<_> = project.files.values().collect();
            files.sort_by(|a, b| a.file.cmp(&b.file));
            for file in files {
                let state = match &file.entries {
                    FileEntries::NotDiscovered => "not discovered".dimmed().to_string(),
                    FileEntries::Discovered(entries) => format!("{} entries", entries.len()).green().to_string(),
                };
                println!("  {} {} {}", "•".green(), relative(&file.file, &base_dir).cyan(), state);
            }
        }
    });
}

fn relative(file: &str, base_dir: &Path) -> String {
    Path::new(file)
        .strip_prefix(base_dir)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| file.to_string())
}
