use crate::core::commands::CommandTable;
use crate::core::traits::{CommandOption, Flags, ToolCommand};
use crate::error::{GitshuError, Result};
use crate::install::PACKAGE_MANIFEST;
use crate::models::VersionDescriptor;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Run `name` from `table` with arguments and flags passed through as given.
pub async fn exec(
    table: &CommandTable,
    name: &str,
    args: &[String],
    flags: &Flags,
) -> Result<serde_json::Value> {
    let command = table.get(name).ok_or_else(|| GitshuError::UnknownCommand {
        name: name.to_string(),
        available: table.names(),
    })?;

    debug!("Dispatching {} with {} argument(s)", name, args.len());
    command.exec(args, flags).await
}

/// Run `name` from `table` with the command line that followed it.
///
/// Commands backed by a process receive `argv` verbatim; the parsed
/// arguments and flags are offered alongside for in-process commands.
pub async fn exec_argv(
    table: &CommandTable,
    name: &str,
    argv: &[String],
) -> Result<serde_json::Value> {
    let command = table.get(name).ok_or_else(|| GitshuError::UnknownCommand {
        name: name.to_string(),
        available: table.names(),
    })?;

    let (args, flags) = parse_forwarded(argv);
    debug!("Dispatching {} with argv {:?}", name, argv);
    command.run(argv, &args, &flags).await
}

/// Human-readable listing of the commands in `table`.
pub fn help(table: &CommandTable) -> String {
    let mut out = String::new();

    for command in table.iter() {
        let _ = writeln!(out, "    {} \t {}", command.name(), command.description());

        for option in command.options() {
            let mut after = Vec::new();
            if let Some(defaults) = &option.defaults {
                after.push(format!("Default is {}", display_value(defaults)));
            }
            if !option.values.is_empty() {
                after.push(format!("Values are {}", option.values.join(", ")));
            }

            let negatable = if matches!(option.defaults, Some(serde_json::Value::Bool(_))) {
                "[no-]"
            } else {
                ""
            };

            let mut line = format!("        --{}{} \t {}", negatable, option.name, option.description);
            if !after.is_empty() {
                let _ = write!(line, " ({})", after.join("; "));
            }
            let _ = writeln!(out, "{}", line);
        }

        out.push('\n');
    }

    out
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinField {
    Single(String),
    Named(BTreeMap<String, String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandSpec {
    name: String,
    description: String,
    options: Vec<CommandOption>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GitshuSection {
    commands: Vec<CommandSpec>,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    name: Option<String>,
    bin: Option<BinField>,
    #[serde(default)]
    gitshu: GitshuSection,
}

/// Command of an installed version, run as a child process of its executable
pub struct ProcessCommand {
    name: String,
    description: String,
    options: Vec<CommandOption>,
    program: PathBuf,
    version: String,
    home: PathBuf,
}

#[async_trait]
impl ToolCommand for ProcessCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn options(&self) -> &[CommandOption] {
        &self.options
    }

    /// Positional arguments on the command line, flags as JSON in `GITSHU_FLAGS`
    async fn exec(&self, args: &[String], flags: &Flags) -> Result<serde_json::Value> {
        let flags = serde_json::to_string(flags)?;
        self.spawn(args, Some(&flags)).await
    }

    async fn run(
        &self,
        argv: &[String],
        _args: &[String],
        _flags: &Flags,
    ) -> Result<serde_json::Value> {
        self.spawn(argv, None).await
    }
}

impl ProcessCommand {
    async fn spawn(&self, argv: &[String], flags: Option<&str>) -> Result<serde_json::Value> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg(&self.name)
            .args(argv)
            .env("GITSHU_VERSION", &self.version)
            .env("GITSHU_HOME", &self.home);
        if let Some(flags) = flags {
            command.env("GITSHU_FLAGS", flags);
        }

        let status = command.status().await?;

        match status.code() {
            Some(0) => Ok(serde_json::json!({ "status": 0 })),
            code => Err(GitshuError::CommandFailed {
                name: self.name.clone(),
                code: code.unwrap_or(1),
            }),
        }
    }
}

/// Executable declared by the manifest `bin` field
fn executable(manifest: &PackageManifest, root: &Path) -> Option<PathBuf> {
    let relative = match manifest.bin.as_ref()? {
        BinField::Single(path) => path.clone(),
        BinField::Named(bins) => {
            let name = manifest.name.as_deref().unwrap_or("gitshu");
            bins.get(name).or_else(|| bins.values().next())?.clone()
        }
    };
    Some(root.join(relative))
}

/// Load the command table exposed by an installed version.
pub fn load_commands(descriptor: &VersionDescriptor) -> Result<CommandTable> {
    let manifest_path = descriptor.path.join(PACKAGE_MANIFEST);
    let invalid = |reason: String| GitshuError::InvalidPackage {
        path: descriptor.path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(&manifest_path)
        .map_err(|e| invalid(format!("cannot read {}: {}", PACKAGE_MANIFEST, e)))?;
    let manifest: PackageManifest = serde_json::from_str(&contents)?;

    let program = executable(&manifest, &descriptor.path)
        .ok_or_else(|| invalid("no \"bin\" entry".to_string()))?;

    let table: CommandTable = manifest
        .gitshu
        .commands
        .into_iter()
        .filter(|spec| !spec.name.is_empty())
        .map(|spec| -> Arc<dyn ToolCommand> {
            Arc::new(ProcessCommand {
                name: spec.name,
                description: spec.description,
                options: spec.options,
                program: program.clone(),
                version: descriptor.version.clone(),
                home: descriptor.path.clone(),
            })
        })
        .collect();

    debug!(
        "Loaded {} command(s) from GitShu {}",
        table.len(),
        descriptor.version
    );
    Ok(table)
}

/// Decode a flag value; numbers only when they print back identically
fn decode_value(raw: &str) -> serde_json::Value {
    match raw {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => {
            let number = raw
                .parse::<i64>()
                .ok()
                .map(serde_json::Number::from)
                .or_else(|| raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64))
                .filter(|n| n.to_string() == raw);

            match number {
                Some(n) => serde_json::Value::Number(n),
                None => serde_json::Value::String(raw.to_string()),
            }
        }
    }
}

fn is_number(arg: &str) -> bool {
    arg.parse::<f64>().is_ok()
}

fn set_flag(flags: &mut Flags, key: &str, value: serde_json::Value) {
    match flags.get_mut(key) {
        Some(serde_json::Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = serde_json::Value::Array(vec![first, value]);
        }
        None => {
            flags.insert(key.to_string(), value);
        }
    }
}

/// Split forwarded argv into positional arguments and keyword flags.
///
/// Understands `--key=value`, `--key value`, `--no-key`, bare `--key`,
/// short clusters such as `-abc` and the `--` terminator.
pub fn parse_forwarded(argv: &[String]) -> (Vec<String>, Flags) {
    let mut args = Vec::new();
    let mut flags = Flags::new();
    let mut iter = argv.iter().peekable();

    let takes_value = |next: Option<&&String>| -> bool {
        next.map(|n| !n.starts_with('-') || is_number(n))
            .unwrap_or(false)
    };

    while let Some(arg) = iter.next() {
        if arg == "--" {
            args.extend(iter.by_ref().cloned());
            break;
        }

        if let Some(long) = arg.strip_prefix("--") {
            if let Some((key, value)) = long.split_once('=') {
                set_flag(&mut flags, key, decode_value(value));
            } else if let Some(key) = long.strip_prefix("no-") {
                set_flag(&mut flags, key, serde_json::Value::Bool(false));
            } else if takes_value(iter.peek()) {
                let value = iter.next().map(|v| decode_value(v)).unwrap_or_default();
                set_flag(&mut flags, long, value);
            } else {
                set_flag(&mut flags, long, serde_json::Value::Bool(true));
            }
            continue;
        }

        if arg.len() > 1 && arg.starts_with('-') && !is_number(arg) {
            let letters: Vec<char> = arg[1..].chars().collect();
            let (last, rest) = match letters.split_last() {
                Some(split) => split,
                None => continue,
            };
            for letter in rest {
                set_flag(&mut flags, &letter.to_string(), serde_json::Value::Bool(true));
            }
            if takes_value(iter.peek()) {
                let value = iter.next().map(|v| decode_value(v)).unwrap_or_default();
                set_flag(&mut flags, &last.to_string(), value);
            } else {
                set_flag(&mut flags, &last.to_string(), serde_json::Value::Bool(true));
            }
            continue;
        }

        args.push(arg.clone());
    }

    (args, flags)
}
