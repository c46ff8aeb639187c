use clap::{Args, Parser, Subcommand, ValueEnum};
use phpunit_docker::host::{LocalWorkspace, PassiveDebugSessions, ShellExecutor};
use phpunit_docker::report::RunReport;
use phpunit_docker::runner::{self, CancellationToken, RemoteTestExecutor};
use phpunit_docker::tree::{TestNode, TestTreeRegistry};
use phpunit_docker::{Settings, loader, schema};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum TreeFormat {
    /// Indented tree
    #[default]
    Human,
    /// The tree as JSON
    Json,
}

#[derive(Parser)]
#[command(name = "phpunit-docker")]
#[command(about = "Discover PHPUnit tests and run them inside a Docker container")]
#[command(version)]
struct Cli {
    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

/// Settings that override the settings file.
#[derive(Args)]
struct Overrides {
    /// Docker container to run tests in
    #[arg(long)]
    container: Option<String>,
    /// Workspace root inside the container
    #[arg(long)]
    container_path: Option<String>,
    /// PHPUnit executable inside the container
    #[arg(long)]
    phpunit_path: Option<String>,
    /// Glob selecting test files
    #[arg(long)]
    pattern: Option<String>,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(container) = self.container {
            settings.container_name = Some(container);
        }
        if let Some(path) = self.container_path {
            settings.container_path = path;
        }
        if let Some(path) = self.phpunit_path {
            settings.phpunit_path = path;
        }
        if let Some(pattern) = self.pattern {
            settings.test_file_pattern = pattern;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List the test files and methods in the workspace
    Discover {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Glob selecting test files
        #[arg(long)]
        pattern: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: TreeFormat,
    },
    /// Run tests inside the container
    Run {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Run with Xdebug enabled
        #[arg(long)]
        debug: bool,
        /// Only run files and methods whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Scaffold a settings file
    Init {
        /// Output path for the settings file
        #[arg(default_value = "phpunit-docker.yaml")]
        path: PathBuf,
    },
    /// Output the settings JSON Schema
    Schema,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Discover {
            workspace,
            pattern,
            output,
        } => {
            let (root, mut settings) = open_workspace(&workspace);
            if let Some(pattern) = pattern {
                settings.test_file_pattern = pattern;
            }
            let tree = discover(&root, &settings);

            match output {
                TreeFormat::Human => print!("{}", format_tree(&tree, &root, cli.verbose)),
                TreeFormat::Json => {
                    let roots: Vec<&TestNode> = tree.roots().collect();
                    print_json(&serde_json::json!({
                        "workspace": root.display().to_string(),
                        "files": roots,
                    }));
                }
            }
        }
        Command::Run {
            workspace,
            debug,
            filter,
            output,
            overrides,
        } => {
            let (root, mut settings) = open_workspace(&workspace);
            overrides.apply(&mut settings);
            let tree = discover(&root, &settings);

            let include = match filter.as_deref() {
                Some(text) => {
                    let nodes = runner::matching(&tree, text);
                    if nodes.is_empty() {
                        eprintln!("No tests match filter: {text:?}");
                        exit(1);
                    }
                    nodes
                }
                None => Vec::new(),
            };
            let selection = runner::selection(&tree, include);
            if selection.is_empty() {
                eprintln!("No test files found in: {}", root.display());
                exit(1);
            }

            let commands = ShellExecutor::new()
                .with_timeout(settings.timeout.map(Duration::from_secs))
                .with_working_dir(&root);
            let executor =
                RemoteTestExecutor::new(settings, &root, commands, PassiveDebugSessions);

            let mut report = RunReport::new(&root, &selection);
            let run_start = Instant::now();
            let summary = match executor.run(
                &selection,
                debug,
                &CancellationToken::new(),
                &mut |event| report.record(event),
            ) {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("Error: {e}");
                    exit(1);
                }
            };
            report.finish(&summary, run_start.elapsed());

            match output {
                OutputFormat::Human => print!("{}", report.render_human(cli.verbose)),
                OutputFormat::Json => print_json(&report.to_json()),
                OutputFormat::Junit => print!("{}", report.render_junit()),
            }

            if report.failed() > 0 || report.skipped() > 0 {
                exit(1);
            }
        }
        Command::Init { path } => {
            let template = r#"# phpunit-docker settings

# Name of the running container that has PHP and PHPUnit installed.
containerName: my-php-container

# Where the workspace root is mounted inside the container.
containerPath: /var/www

# PHPUnit executable, relative to containerPath.
phpunitPath: vendor/bin/phpunit

# Which files hold tests.
testFilePattern: "**/*Test.php"
excludePattern: "**/vendor/**"

# Seconds before a single PHPUnit invocation is killed.
# timeout: 300

# Pass -t to docker exec.
# tty: true

# Debug adapter started for `run --debug`.
# debugConfiguration:
#   type: php
#   name: Listen for Xdebug
#   request: launch
#   port: 9003
#   pathMappings:
#     /var/www: ${workspaceFolder}
"#;
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                exit(1);
            }
            if let Err(e) = fs::write(&path, template) {
                eprintln!("Error writing file: {e}");
                exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => print_json(&schema::generate_schema()),
    }
}

/// Resolve the workspace root and load its settings, exiting on error.
fn open_workspace(workspace: &Path) -> (PathBuf, Settings) {
    let root = match fs::canonicalize(workspace) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error opening workspace {}: {e}", workspace.display());
            exit(1);
        }
    };
    match loader::load_settings(&root) {
        Ok(settings) => (root, settings),
        Err(e) => {
            eprintln!("Error loading settings: {e}");
            exit(1);
        }
    }
}

fn discover(root: &Path, settings: &Settings) -> TestTreeRegistry<LocalWorkspace> {
    let mut tree = TestTreeRegistry::new(
        LocalWorkspace::new(root),
        &settings.test_file_pattern,
        &settings.exclude_pattern,
    );
    if let Err(e) = tree.discover_all() {
        eprintln!("Error discovering tests: {e}");
        exit(1);
    }
    tree
}

fn format_tree(tree: &TestTreeRegistry<LocalWorkspace>, root: &Path, verbose: bool) -> String {
    use std::fmt::Write as _;

    let line_of = |node: &TestNode| node.range.map(|r| r.start.line + 1);
    let mut out = String::new();
    let mut methods = 0;
    for file in tree.roots() {
        let path = file.uri.strip_prefix(root).unwrap_or(&file.uri);
        match line_of(file) {
            Some(line) => {
                let _ = writeln!(out, "{} ({}:{line})", path.display(), file.label);
            }
            None => {
                let _ = writeln!(out, "{} (no test class)", path.display());
            }
        }
        for method in &file.children {
            methods += 1;
            let _ = write!(out, "  {}", method.label);
            if let Some(line) = line_of(method) {
                let _ = write!(out, ":{line}");
            }
            if verbose {
                let _ = write!(out, "  {}", method.id);
            }
            out.push('\n');
        }
    }
    let _ = writeln!(out, "\n{} files, {methods} tests", tree.len());
    out
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            exit(1);
        }
    }
}
