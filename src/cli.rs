use crate::config::Config;
use crate::core::traits::PinReader;
use crate::dispatch::{self, load_commands};
use crate::error::{GitshuError, Result};
use crate::install::{ArchiveUnpacker, Installer};
use crate::lifecycle::{Lifecycle, RequestState};
use crate::models::{ANY, LATEST};
use crate::pin::{find_pin, write_pin, FilePinReader};
use crate::registry::NpmRegistry;
use crate::resolver::Resolver;
use crate::store::VersionStore;
use crate::utils::{expand_path, print_info, print_success, print_warning};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "gitshu")]
#[command(about = "GitShu version manager", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Specify GitShu version to use
    #[arg(short = 'v', long = "gitshu", value_name = "VERSION", global = true)]
    pub gitshu: Option<String>,

    /// Enable verbose error
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[arg(skip)]
    config: Option<Config>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed versions
    #[command(name = "versions")]
    Versions,

    /// Print current version to use in the current directory
    #[command(name = "versions:print")]
    Print,

    /// List available versions in the registry
    #[command(name = "versions:available")]
    Available,

    /// Force install a specific version of GitShu
    #[command(name = "versions:install")]
    Install {
        /// Version or tag to install (default: latest)
        version: Option<String>,
    },

    /// Link a version to a local folder
    #[command(name = "versions:link")]
    Link {
        /// Folder to link (default: current directory)
        folder: Option<String>,

        /// Version to link (default: latest)
        version: Option<String>,
    },

    /// Remove the version link of a local folder
    #[command(name = "versions:unlink")]
    Unlink {
        /// Linked folder (default: current directory)
        folder: Option<String>,
    },

    /// Create a tag pointing to an installed version
    #[command(name = "versions:alias")]
    Alias {
        /// Tag name (e.g. stable)
        name: String,

        /// Version to alias (default: latest)
        version: Option<String>,
    },

    /// Pin a version for the current directory, or show the pin in effect
    #[command(name = "versions:pin")]
    Pin {
        /// Version to pin (omit to show the current pin)
        version: Option<String>,
    },

    /// Uninstall a specific version of GitShu
    #[command(name = "versions:uninstall")]
    Uninstall {
        /// Version or tag to uninstall
        version: String,
    },

    /// Update to the latest version of GitShu
    #[command(name = "versions:update")]
    Update {
        /// Registry tag to follow (default: tag of the latest installed version)
        tag: Option<String>,
    },

    /// List commands for a specific version of GitShu
    Help,

    /// Run a command with a specific GitShu version
    #[command(external_subcommand)]
    Run(Vec<String>),
}

impl Cli {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    fn config(&self) -> Result<&Config> {
        self.config
            .as_ref()
            .ok_or_else(|| GitshuError::ConfigError("configuration not loaded".to_string()))
    }

    fn installer(&self) -> Result<Installer> {
        let config = self.config()?;
        let registry = NpmRegistry::new(config)?;

        Ok(Installer::new(
            VersionStore::new(config),
            Arc::new(registry),
            Arc::new(ArchiveUnpacker),
        ))
    }

    fn cwd() -> Result<PathBuf> {
        Ok(std::env::current_dir()?)
    }

    pub async fn run(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let installer = self.installer()?;

        match &self.command {
            Commands::Versions => self.versions(&installer),
            Commands::Print => self.print(&installer, lifecycle).await,
            Commands::Available => self.available(&installer).await,
            Commands::Install { version } => {
                lifecycle.advance(RequestState::Installing);
                let version = version.as_deref().unwrap_or(ANY);
                let installed = installer.install(version).await?;
                println!();
                print_success(&format!("GitShu {} has been installed", installed));
                Ok(())
            }
            Commands::Link { folder, version } => {
                lifecycle.advance(RequestState::Installing);
                let cwd = Self::cwd()?;
                let folder = folder
                    .as_deref()
                    .map(|f| expand_path(f, &cwd))
                    .unwrap_or(cwd);
                let version = version.as_deref().unwrap_or(LATEST);
                let linked = installer.link(version, &folder).await?;
                println!();
                print_success(&format!(
                    "GitShu {} point to {}",
                    linked.label(),
                    folder.display()
                ));
                Ok(())
            }
            Commands::Unlink { folder } => {
                let cwd = Self::cwd()?;
                let folder = folder
                    .as_deref()
                    .map(|f| expand_path(f, &cwd))
                    .unwrap_or(cwd);
                let removed = installer.unlink(&folder)?;
                print_success(&format!(
                    "{} no longer points to GitShu {}",
                    folder.display(),
                    removed.version
                ));
                Ok(())
            }
            Commands::Alias { name, version } => {
                lifecycle.advance(RequestState::Installing);
                let version = version.as_deref().unwrap_or(LATEST);
                let linked = installer.link_tag(version, name).await?;
                print_success(&format!("Set tag '{}' to GitShu {}", name, linked.version));
                Ok(())
            }
            Commands::Pin { version } => self.pin(&installer, version.as_deref()),
            Commands::Uninstall { version } => {
                let removed = installer.uninstall(version)?;
                println!();
                print_success(&format!("GitShu {} has been uninstalled", removed));
                Ok(())
            }
            Commands::Update { tag } => {
                lifecycle.advance(RequestState::Installing);
                match installer.update(tag.as_deref()).await? {
                    Some(version) => {
                        println!();
                        print_success(&format!("GitShu has been updated to {}", version));
                    }
                    None => println!("No update found!"),
                }
                Ok(())
            }
            Commands::Help => self.help(&installer, lifecycle).await,
            Commands::Run(argv) => self.exec(&installer, argv, lifecycle).await,
        }
    }

    fn versions(&self, installer: &Installer) -> Result<()> {
        let versions = installer.store().list();

        if versions.is_empty() {
            println!("There is no versions installed");
            println!(
                "You can install the latest version using: \"{}\"",
                "gitshu versions:install latest".cyan()
            );
            return Ok(());
        }

        println!("{}", "GitShu Versions Installed:".green().bold());
        println!();

        for descriptor in versions {
            let marker = if descriptor.latest {
                "*".green().bold()
            } else {
                " ".normal()
            };

            let text = match &descriptor.link {
                Some(link) => format!(
                    "{} (-> {} = {})",
                    descriptor.tag,
                    link.display(),
                    descriptor.version
                ),
                None if descriptor.tag != descriptor.version => {
                    format!("{} (-> {})", descriptor.tag, descriptor.version)
                }
                None => descriptor.tag.clone(),
            };

            println!("    {} {}", marker, text.cyan());
        }
        println!();

        Ok(())
    }

    async fn print(&self, installer: &Installer, lifecycle: &mut Lifecycle) -> Result<()> {
        let cwd = Self::cwd()?;
        let resolver = Resolver::new(installer, &FilePinReader, &cwd);
        let descriptor = resolver.resolve(self.gitshu.as_deref(), lifecycle).await?;

        if descriptor.tag != descriptor.version {
            println!(
                "GitShu version is {} ({})",
                descriptor.tag.cyan(),
                descriptor.version
            );
        } else {
            println!("GitShu version is {}", descriptor.version.cyan());
        }

        Ok(())
    }

    async fn available(&self, installer: &Installer) -> Result<()> {
        print_info("Fetching available GitShu versions...");
        let available = installer.available().await?;

        println!("{}", "Available GitShu Versions:".green().bold());
        println!();
        println!("     {}", available.versions.join(", "));
        println!();
        println!("{}", "Tags:".green().bold());
        println!();
        for (tag, version) in &available.tags {
            println!("     {} : {}", tag.cyan(), version);
        }
        println!();

        Ok(())
    }

    fn pin(&self, installer: &Installer, version: Option<&str>) -> Result<()> {
        let cwd = Self::cwd()?;

        match version {
            Some(version) => {
                let descriptor = installer.store().find(version)?;
                let path = write_pin(&cwd, version)?;
                print_success(&format!(
                    "Pinned GitShu {} for {}",
                    descriptor.label(),
                    cwd.display()
                ));
                println!("  Created {}", path.display().to_string().dimmed());
            }
            None => match find_pin(&FilePinReader, &cwd)? {
                Some((dir, specifier)) => {
                    println!(
                        "{} {} (from {})",
                        "Pinned GitShu version:".green().bold(),
                        specifier.cyan(),
                        dir.display()
                    );
                }
                None => {
                    print_warning("No version pinned for this directory");
                    println!("\n{}", "Pin a version:".yellow());
                    println!("  gitshu versions:pin <version>");
                }
            },
        }

        Ok(())
    }

    async fn help(&self, installer: &Installer, lifecycle: &mut Lifecycle) -> Result<()> {
        let cwd = Self::cwd()?;
        let resolver = Resolver::new(installer, &FilePinReader, &cwd);
        let descriptor = resolver.ensure(self.gitshu.as_deref(), lifecycle).await?;

        let table = load_commands(&descriptor)?;
        lifecycle.advance(RequestState::Dispatching);
        if table.is_empty() {
            print_warning(&format!("GitShu {} exposes no commands", descriptor.version));
            return Ok(());
        }
        print!("{}", dispatch::help(&table));
        Ok(())
    }

    async fn exec(
        &self,
        installer: &Installer,
        argv: &[String],
        lifecycle: &mut Lifecycle,
    ) -> Result<()> {
        let cwd = Self::cwd()?;
        run_external(
            installer,
            &FilePinReader,
            &cwd,
            self.gitshu.as_deref(),
            argv,
            lifecycle,
        )
        .await
    }
}

/// Failure to report for a clap parse error; `None` for `--help` and `--version`
pub fn usage_failure(error: &clap::Error) -> Option<GitshuError> {
    use clap::error::ErrorKind;

    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => None,
        _ => Some(GitshuError::InvalidArguments(error.kind().to_string())),
    }
}

/// Resolve a version and run `argv[0]` from it with the rest of `argv`
async fn run_external(
    installer: &Installer,
    pins: &dyn PinReader,
    cwd: &Path,
    global: Option<&str>,
    argv: &[String],
    lifecycle: &mut Lifecycle,
) -> Result<()> {
    let (name, rest) = argv
        .split_first()
        .ok_or_else(|| GitshuError::UnknownCommand {
            name: String::new(),
            available: Vec::new(),
        })?;

    let (trailing, forwarded) = take_version_flag(rest);
    let explicit = global.map(str::to_string).or(trailing);

    let resolver = Resolver::new(installer, pins, cwd);
    let descriptor = resolver.ensure(explicit.as_deref(), lifecycle).await?;
    debug!("Running {} with GitShu {}", name, descriptor.version);

    let table = load_commands(&descriptor)?;
    lifecycle.advance(RequestState::Dispatching);
    let result = dispatch::exec_argv(&table, name, &forwarded).await?;
    debug!("{} finished: {}", name, result);

    Ok(())
}

/// `--gitshu <v>` after the command name belongs to the manager, not the command
fn take_version_flag(argv: &[String]) -> (Option<String>, Vec<String>) {
    let mut version = None;
    let mut forwarded = Vec::with_capacity(argv.len());
    let mut iter = argv.iter();

    while let Some(arg) = iter.next() {
        if arg == "--" {
            forwarded.push(arg.clone());
            forwarded.extend(iter.by_ref().cloned());
            break;
        }

        if let Some(value) = arg.strip_prefix("--gitshu=") {
            version = Some(value.to_string());
        } else if arg == "--gitshu" {
            match iter.next() {
                Some(value) => version = Some(value.clone()),
                None => forwarded.push(arg.clone()),
            }
        } else {
            forwarded.push(arg.clone());
        }
    }

    (version, forwarded)
}
