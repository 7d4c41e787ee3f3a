// ABOUTME: Main application orchestration for the skein CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands::{self, RunOptions};
use super::{Args, Commands, Config};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let installed = match self.config.logging.format.as_str() {
            "compact" => tracing_subscriber::fmt()
                .compact()
                .with_env_filter(env_filter)
                .with_ansi(!no_color)
                .with_target(false)
                .try_init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(!no_color)
                .with_target(false)
                .try_init(),
        };
        installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting skein v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        match args.command {
            Commands::Run {
                workflow,
                input,
                input_file,
                output,
                max_concurrent,
            } => {
                let options = RunOptions {
                    workflow,
                    input,
                    input_file,
                    output,
                    max_concurrent: max_concurrent.unwrap_or(self.config.max_concurrent_tasks),
                };
                commands::run_workflow(options, &self.config).await
            }

            Commands::Validate { workflow, strict } => {
                commands::validate_workflow(workflow, strict, &self.config).await
            }
        }
    }

    /// Create application from already parsed arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Config::load(args.config.clone())?;
        Ok(Self::new(config))
    }
}
