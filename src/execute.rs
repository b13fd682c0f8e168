use std::path::{Path, PathBuf};
use std::process::ExitCode;
use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use semver::Version;
use shimkit::{
    CommandResolver, LocalToolCommandResolver, ManifestFinder, PackageId, PathCommandResolver,
    ResolverChain, RestoreCommandIdentifier, Settings, ToolCommandName, ToolInstaller, Transaction,
};
use shimkit::manifest::{add_tool, create_default_manifest, remove_tool};
use crate::cli::{CLI, ShimkitCommand};

pub fn execute(cli: CLI) -> Result<ExitCode> {
    let cwd = std::env::current_dir()?;
    match cli.command {
        ShimkitCommand::Init => execute_init(&cwd),
        ShimkitCommand::List => execute_list(&cwd),
        ShimkitCommand::Add {
            package_at_version,
            commands,
            manifest,
        } => execute_add(&cwd, &package_at_version, &commands, manifest),
        ShimkitCommand::Remove { package, manifest } => execute_remove(&cwd, &package, manifest),
        ShimkitCommand::Install {
            package_at_version,
            commands,
            manifest,
        } => execute_install(&cwd, &package_at_version, &commands, manifest),
        ShimkitCommand::Uninstall { package, manifest } => {
            execute_uninstall(&cwd, &package, manifest)
        }
        ShimkitCommand::Restore { manifest } => execute_restore(&cwd, manifest),
        ShimkitCommand::Run { command, args } => execute_run(&cwd, &command, args),
        ShimkitCommand::Which { command } => execute_which(&cwd, &command),
    }
}

pub fn execute_init(cwd: &Path) -> Result<ExitCode> {
    let mut tx = Transaction::new();
    let path = create_default_manifest(&mut tx, cwd)?;
    tx.commit();
    println!("{} {}", "Created".green().bold(), path.display());
    Ok(ExitCode::SUCCESS)
}

pub fn execute_list(cwd: &Path) -> Result<ExitCode> {
    let entries = ManifestFinder::new(cwd).find(None)?;
    if entries.is_empty() {
        println!("No tools declared");
        return Ok(ExitCode::SUCCESS);
    }

    // status is best effort: without a usable config every tool shows as unknown
    let settings = Settings::load().ok();
    for entry in &entries {
        println!("{}: {}", entry.package_id.to_string().bold(), entry.version);
        for command in &entry.commands {
            let status = match &settings {
                Some(settings) => {
                    if is_restored(settings, &entry.package_id, &entry.version, command) {
                        "restored".green()
                    } else {
                        "not restored".yellow()
                    }
                }
                None => "unknown".dimmed(),
            };
            println!("   {command} ({status})");
        }
        println!("   declared in {}", entry.manifest_path.display());
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

fn is_restored(
    settings: &Settings,
    package_id: &PackageId,
    version: &Version,
    command: &ToolCommandName,
) -> bool {
    let id = RestoreCommandIdentifier::new(
        package_id.clone(),
        version.clone(),
        &settings.platform_identifier,
        &settings.execution_platform_tag,
        command.clone(),
    );
    matches!(
        settings.resolver_cache().try_load(&id, &settings.tools_root),
        Ok(Some(restored)) if restored.executable.exists()
    )
}

fn extract_package_at_version(package_at_version: &str) -> Result<(PackageId, Version)> {
    let (package, version) = package_at_version
        .split_once('@')
        .ok_or_else(|| anyhow!("expected <package>@<version>, got '{package_at_version}'"))?;
    let package = PackageId::new(package)?;
    let version = Version::parse(version.trim_start_matches('v'))
        .with_context(|| format!("invalid version '{version}'"))?;
    Ok((package, version))
}

fn parse_commands(commands: &[String]) -> Result<Vec<ToolCommandName>> {
    commands
        .iter()
        .map(|c| ToolCommandName::new(c.as_str()).map_err(Into::into))
        .collect()
}

fn target_manifest(cwd: &Path, explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => ManifestFinder::new(cwd)
            .nearest_manifest_path()
            .ok_or_else(|| anyhow!("no shimkit-tools.toml found. Run `shimkit init` to create one.")),
    }
}

/// The manifest declaring `package`: `explicit` if given, otherwise the
/// nearest manifest in the chain that declares it.
fn declaring_manifest(cwd: &Path, package: &PackageId, explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    ManifestFinder::new(cwd)
        .find_package(package)?
        .map(|entry| entry.manifest_path)
        .ok_or_else(|| anyhow!("package '{package}' is not declared in any manifest visible from {}", cwd.display()))
}

pub fn execute_add(
    cwd: &Path,
    package_at_version: &str,
    commands: &[String],
    manifest: Option<PathBuf>,
) -> Result<ExitCode> {
    let (package, version) = extract_package_at_version(package_at_version)?;
    let mut commands = parse_commands(commands)?;
    if commands.is_empty() {
        commands.push(ToolCommandName::new(package.as_str())?);
    }
    let path = target_manifest(cwd, manifest)?;

    let mut tx = Transaction::new();
    add_tool(&mut tx, &path, &package, &version, &commands)?;
    tx.commit();
    println!("{} {package}@{version}", "Added".green().bold());
    Ok(ExitCode::SUCCESS)
}

pub fn execute_remove(cwd: &Path, package: &str, manifest: Option<PathBuf>) -> Result<ExitCode> {
    let package = PackageId::new(package)?;
    let path = declaring_manifest(cwd, &package, manifest)?;

    let mut tx = Transaction::new();
    let removed = remove_tool(&mut tx, &path, &package)?;
    tx.commit();
    println!("{} {}@{}", "Removed".green().bold(), removed.package_id, removed.version);
    Ok(ExitCode::SUCCESS)
}

pub fn execute_install(
    cwd: &Path,
    package_at_version: &str,
    commands: &[String],
    manifest: Option<PathBuf>,
) -> Result<ExitCode> {
    let (package, version) = extract_package_at_version(package_at_version)?;
    let commands = parse_commands(commands)?;
    let path = target_manifest(cwd, manifest)?;
    let settings = Settings::load()?;
    let installer = ToolInstaller::from_settings(&settings, settings.restorer());

    let mut tx = Transaction::new();
    let restored = installer.install(&mut tx, &path, &package, &version, &commands)?;
    tx.commit();

    println!("{} {package}@{version}", "Installed".green().bold());
    for command in &restored.commands {
        println!(
            "   {} -> {}",
            command.name,
            installer.shims().shim_path(&command.name).display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_uninstall(cwd: &Path, package: &str, manifest: Option<PathBuf>) -> Result<ExitCode> {
    let package = PackageId::new(package)?;
    let path = declaring_manifest(cwd, &package, manifest)?;
    let settings = Settings::load()?;
    let installer = ToolInstaller::from_settings(&settings, settings.restorer());

    let mut tx = Transaction::new();
    let removed = installer.uninstall(&mut tx, &path, &package)?;
    tx.commit();
    println!("{} {}@{}", "Uninstalled".green().bold(), removed.package_id, removed.version);
    Ok(ExitCode::SUCCESS)
}

pub fn execute_restore(cwd: &Path, manifest: Option<PathBuf>) -> Result<ExitCode> {
    let settings = Settings::load()?;
    let installer = ToolInstaller::from_settings(&settings, settings.restorer());

    let mut tx = Transaction::new();
    let report = installer.restore_all(&mut tx, &ManifestFinder::new(cwd), manifest.as_deref())?;
    tx.commit();

    for package in &report.restored {
        println!("{} {}@{}", "Restored".green().bold(), package.package_id, package.version);
    }
    for entry in &report.up_to_date {
        println!("{} {}@{}", "Up to date".dimmed(), entry.package_id, entry.version);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_run(cwd: &Path, command: &str, args: Vec<String>) -> Result<ExitCode> {
    let name = ToolCommandName::new(command)?;
    let settings = Settings::load()?;
    let spec = LocalToolCommandResolver::from_settings(&settings, cwd)
        .resolve_tool(&name, &args)?
        .ok_or_else(|| anyhow!("no tool manifest declares command '{command}'"))?;

    let status = spec
        .to_command()
        .status()
        .with_context(|| format!("failed to start {}", spec.program.display()))?;
    match status.code() {
        Some(0) => Ok(ExitCode::SUCCESS),
        Some(code) => Ok(ExitCode::from(u8::try_from(code).unwrap_or(1))),
        None => bail!("'{command}' was terminated by a signal"),
    }
}

pub fn execute_which(cwd: &Path, command: &str) -> Result<ExitCode> {
    let settings = Settings::load()?;
    let local = LocalToolCommandResolver::from_settings(&settings, cwd);
    let declared = match ToolCommandName::new(command) {
        Ok(name) => local.resolve_tool(&name, &[])?,
        Err(_) => None,
    };
    let spec = match declared {
        Some(spec) => Some(spec),
        None => ResolverChain::new()
            .with(local)
            .with(PathCommandResolver::from_env())
            .resolve(command, &[])?,
    };

    let Some(spec) = spec else {
        println!("'{command}' does not resolve to anything");
        return Ok(ExitCode::FAILURE);
    };
    println!("{}", spec.command_line());
    if let Ok(name) = ToolCommandName::new(command) {
        let shim = settings.shim_installer().shim_path(&name);
        if shim.exists() {
            println!("{} {}", "shim:".dimmed(), shim.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
