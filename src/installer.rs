//! Install, uninstall and restore flows.
//!
//! Each flow composes the restorer, the resolver cache, the shim installer
//! and the manifest editor inside one [`Transaction`], so a failure at any
//! step leaves no partial state behind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use semver::Version;
use tracing::{debug, info};
use crate::Result;
use crate::cache::{ResolverCache, RestoreCommandIdentifier, RestoredCommand};
use crate::global::config::{Settings, package_dir};
use crate::manifest::{self, ManifestEntry, ManifestFinder};
use crate::names::{PackageId, ToolCommandName};
use crate::resolver::EXECUTABLE_RUNNER;
use crate::restore::{RestoreError, RestoreRequest, RestoredPackage, ToolRestorer};
use crate::shims::ShimInstaller;
use crate::transaction::Transaction;
use crate::util::create_dir_all_tracked;

/// What [`ToolInstaller::restore_all`] did.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<RestoredPackage>,
    /// Declarations whose commands were already cached and present on disk.
    pub up_to_date: Vec<ManifestEntry>,
}

pub struct ToolInstaller<R> {
    restorer: R,
    cache: ResolverCache,
    shims: ShimInstaller,
    tools_root: PathBuf,
    platform_identifier: String,
    execution_platform_tag: String,
}

impl<R: ToolRestorer> ToolInstaller<R> {
    pub fn new(
        restorer: R,
        cache: ResolverCache,
        shims: ShimInstaller,
        tools_root: impl Into<PathBuf>,
        platform_identifier: impl Into<String>,
        execution_platform_tag: impl Into<String>,
    ) -> Self {
        Self {
            restorer,
            cache,
            shims,
            tools_root: tools_root.into(),
            platform_identifier: platform_identifier.into(),
            execution_platform_tag: execution_platform_tag.into(),
        }
    }

    pub fn from_settings(settings: &Settings, restorer: R) -> Self {
        Self::new(
            restorer,
            settings.resolver_cache(),
            settings.shim_installer(),
            &settings.tools_root,
            &settings.platform_identifier,
            &settings.execution_platform_tag,
        )
    }

    pub fn shims(&self) -> &ShimInstaller {
        &self.shims
    }

    /// Restores `package_id@version`, records it in the resolver cache,
    /// creates a shim per command and declares it in the manifest at
    /// `manifest_path`. An empty `commands` list installs every command the
    /// package provides.
    ///
    /// # Arguments
    ///
    /// * `tx` - Outer transaction; it takes over every step only once the whole install succeeded.
    /// * `manifest_path` - Manifest the package is declared in.
    /// * `package_id`, `version` - Package to restore.
    /// * `commands` - Commands to install, or empty for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::NoCommands`] when the restore yields no
    /// commands, and the restore, cache, shim or manifest error of the first
    /// step that fails. Everything written up to that point has been undone.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use semver::Version;
    /// use shimkit::{PackageId, Settings, ToolInstaller, Transaction};
    ///
    /// let settings = Settings::load().unwrap();
    /// let installer = ToolInstaller::from_settings(&settings, settings.restorer());
    /// let mut tx = Transaction::new();
    /// installer
    ///     .install(
    ///         &mut tx,
    ///         Path::new(".config/shimkit-tools.toml"),
    ///         &PackageId::new("t-rex").unwrap(),
    ///         &Version::new(1, 0, 53),
    ///         &[],
    ///     )
    ///     .unwrap();
    /// tx.commit();
    /// ```
    pub fn install(
        &self,
        tx: &mut Transaction,
        manifest_path: &Path,
        package_id: &PackageId,
        version: &Version,
        commands: &[ToolCommandName],
    ) -> Result<RestoredPackage> {
        let mut local = Transaction::new();
        let package = self.restore_into(&mut local, package_id, version, commands)?;
        if package.commands.is_empty() {
            return Err(RestoreError::NoCommands {
                package: package_id.clone(),
                version: version.clone(),
            }
            .into());
        }

        for command in &package.commands {
            let shims = if command.runner == EXECUTABLE_RUNNER {
                self.shims.without_host()
            } else {
                self.shims.clone()
            };
            shims.create(&mut local, &command.executable, &command.name, None)?;
        }

        let names: Vec<ToolCommandName> = package.commands.iter().map(|c| c.name.clone()).collect();
        manifest::add_tool(&mut local, manifest_path, package_id, version, &names)?;

        tx.absorb(local);
        info!("installed {package_id}@{version}");
        Ok(package)
    }

    /// Removes the declaration of `package_id` from `manifest_path`, its
    /// shims and its resolver cache rows.
    pub fn uninstall(
        &self,
        tx: &mut Transaction,
        manifest_path: &Path,
        package_id: &PackageId,
    ) -> Result<ManifestEntry> {
        let mut local = Transaction::new();
        let entry = manifest::remove_tool(&mut local, manifest_path, package_id)?;
        for command in &entry.commands {
            self.shims.remove(&mut local, command)?;
        }
        let evicted = self.cache.evict(&mut local, package_id, &entry.version)?;
        debug!("evicted {evicted} cache rows for {package_id}");

        tx.absorb(local);
        info!("uninstalled {package_id}@{}", entry.version);
        Ok(entry)
    }

    /// Restores every tool declared along the manifest chain that is not
    /// already usable from the cache.
    pub fn restore_all(
        &self,
        tx: &mut Transaction,
        finder: &ManifestFinder,
        explicit: Option<&Path>,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let mut seen = HashSet::new();
        let mut local = Transaction::new();

        for entry in finder.find(explicit)? {
            if !seen.insert((entry.package_id.clone(), entry.version.clone())) {
                continue;
            }
            if self.is_restored(&entry)? {
                debug!("{}@{} already restored", entry.package_id, entry.version);
                report.up_to_date.push(entry);
                continue;
            }
            let package =
                self.restore_into(&mut local, &entry.package_id, &entry.version, &entry.commands)?;
            report.restored.push(package);
        }

        tx.absorb(local);
        Ok(report)
    }

    fn is_restored(&self, entry: &ManifestEntry) -> Result<bool> {
        for command in &entry.commands {
            let id = self.identifier(&entry.package_id, &entry.version, command);
            match self.cache.try_load(&id, &self.tools_root)? {
                Some(restored) if restored.executable.exists() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn identifier(
        &self,
        package_id: &PackageId,
        version: &Version,
        command: &ToolCommandName,
    ) -> RestoreCommandIdentifier {
        RestoreCommandIdentifier::new(
            package_id.clone(),
            version.clone(),
            &self.platform_identifier,
            &self.execution_platform_tag,
            command.clone(),
        )
    }

    /// Runs the restorer and records its commands in the resolver cache.
    fn restore_into(
        &self,
        tx: &mut Transaction,
        package_id: &PackageId,
        version: &Version,
        commands: &[ToolCommandName],
    ) -> Result<RestoredPackage> {
        let output_dir = package_dir(&self.tools_root, package_id, version);
        create_dir_all_tracked(tx, &output_dir).map_err(|source| RestoreError::Io {
            path: output_dir.clone(),
            source,
        })?;
        let request = RestoreRequest {
            package_id: package_id.clone(),
            version: version.clone(),
            platform_identifier: self.platform_identifier.clone(),
            execution_platform_tag: self.execution_platform_tag.clone(),
            commands: commands.to_vec(),
            output_dir,
        };
        let package = self.restorer.restore(&request)?;

        let entries: HashMap<RestoreCommandIdentifier, RestoredCommand> = package
            .commands
            .iter()
            .map(|c| (self.identifier(package_id, version, &c.name), c.clone()))
            .collect();
        self.cache.save(tx, &entries, &self.tools_root)?;
        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use tempfile::{TempDir, tempdir};
    use crate::Error;
    use crate::manifest::ToolManifest;
    use crate::restore::RestoreError;
    use crate::shims::ShimKind;

    /// Writes one file per requested command into the output directory.
    struct FakeRestorer {
        runner: &'static str,
        calls: Cell<usize>,
    }

    impl FakeRestorer {
        fn new(runner: &'static str) -> Self {
            Self {
                runner,
                calls: Cell::new(0),
            }
        }
    }

    impl ToolRestorer for FakeRestorer {
        fn restore(&self, request: &RestoreRequest) -> std::result::Result<RestoredPackage, RestoreError> {
            self.calls.set(self.calls.get() + 1);
            fs::create_dir_all(&request.output_dir).unwrap();
            let names = if request.commands.is_empty() {
                vec![ToolCommandName::new(request.package_id.as_str()).unwrap()]
            } else {
                request.commands.clone()
            };
            let commands = names
                .into_iter()
                .map(|name| {
                    let executable = request.output_dir.join(format!("{name}.dll"));
                    fs::write(&executable, "tool").unwrap();
                    RestoredCommand {
                        name,
                        runner: self.runner.to_string(),
                        executable,
                    }
                })
                .collect();
            Ok(RestoredPackage {
                package_id: request.package_id.clone(),
                version: request.version.clone(),
                commands,
            })
        }
    }

    struct Env {
        dir: TempDir,
        manifest: PathBuf,
    }

    impl Env {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let project = dir.path().join("project");
            fs::create_dir_all(&project).unwrap();
            let manifest = project.join("shimkit-tools.toml");
            fs::write(&manifest, "version = 1\nisRoot = true\n").unwrap();
            Self { dir, manifest }
        }

        fn data(&self) -> PathBuf {
            self.dir.path().join("data")
        }

        fn installer(&self, runner: &'static str) -> ToolInstaller<FakeRestorer> {
            self.installer_with(FakeRestorer::new(runner))
        }

        fn installer_with<R: ToolRestorer>(&self, restorer: R) -> ToolInstaller<R> {
            ToolInstaller::new(
                restorer,
                ResolverCache::new(self.data().join("cache")),
                ShimInstaller::new(
                    self.data().join("shims"),
                    Some(PathBuf::from("/usr/bin/host")),
                    ShimKind::Script,
                ),
                self.data().join("tools"),
                "native",
                "any",
            )
        }

        /// Every path below the temp dir, sorted.
        fn tree(&self) -> Vec<PathBuf> {
            walkdir::WalkDir::new(self.dir.path())
                .sort_by_file_name()
                .into_iter()
                .map(|e| e.unwrap().into_path())
                .collect()
        }
    }

    /// Unpacks a package that turns out to provide no commands.
    struct EmptyRestorer;

    impl ToolRestorer for EmptyRestorer {
        fn restore(&self, request: &RestoreRequest) -> std::result::Result<RestoredPackage, RestoreError> {
            fs::write(request.output_dir.join("readme.txt"), "no tools here").unwrap();
            Ok(RestoredPackage {
                package_id: request.package_id.clone(),
                version: request.version.clone(),
                commands: Vec::new(),
            })
        }
    }

    fn id(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn cmd(s: &str) -> ToolCommandName {
        ToolCommandName::new(s).unwrap()
    }

    #[test]
    fn install_restores_caches_shims_and_declares() {
        let env = Env::new();
        let installer = env.installer("host");
        let mut tx = Transaction::new();
        let package = installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[cmd("t-rex")])
            .unwrap();
        tx.commit();

        assert_eq!(package.commands.len(), 1);
        assert!(installer.shims().shim_exists(&cmd("t-rex")));
        let manifest = ToolManifest::load(&env.manifest).unwrap();
        assert_eq!(manifest.get(&id("t-rex")).unwrap().version, v("1.0.53"));

        let cached = installer
            .cache
            .try_load(&installer.identifier(&id("t-rex"), &v("1.0.53"), &cmd("t-rex")), &installer.tools_root)
            .unwrap()
            .unwrap();
        assert_eq!(cached.executable, package.commands[0].executable);
    }

    #[test]
    fn failed_install_leaves_nothing_behind() {
        let env = Env::new();
        let installer = env.installer("host");
        // a foreign file where the shim would go makes shim creation fail
        fs::create_dir_all(installer.shims().shim_dir()).unwrap();
        fs::write(installer.shims().shim_path(&cmd("t-rex")), "mine").unwrap();
        let manifest_before = fs::read(&env.manifest).unwrap();
        let tree_before = env.tree();

        let mut tx = Transaction::new();
        let err = installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[cmd("t-rex")])
            .unwrap_err();
        tx.rollback();

        assert!(matches!(err, Error::Shim(_)));
        assert_eq!(fs::read(&env.manifest).unwrap(), manifest_before);
        assert_eq!(env.tree(), tree_before);
        assert_eq!(
            fs::read_to_string(installer.shims().shim_path(&cmd("t-rex"))).unwrap(),
            "mine"
        );
    }

    #[test]
    fn conflicting_declaration_rolls_back_shims() {
        let env = Env::new();
        fs::write(
            &env.manifest,
            "version = 1\nisRoot = true\n\n[tools.t-rex]\nversion = \"1.0.0\"\ncommands = [\"t-rex\"]\n",
        )
        .unwrap();
        let installer = env.installer("host");
        let tree_before = env.tree();

        let mut tx = Transaction::new();
        let err = installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[cmd("t-rex")])
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, Error::Manifest(_)));
        assert!(!installer.shims().shim_exists(&cmd("t-rex")));
        assert!(!installer.cache.package_file(&id("t-rex")).exists());
        // the data root did not exist before, so none of it may remain
        assert!(!env.data().exists());
        assert_eq!(env.tree(), tree_before);
    }

    #[test]
    fn install_of_package_without_commands_fails() {
        let env = Env::new();
        let installer = env.installer_with(EmptyRestorer);
        let manifest_before = fs::read(&env.manifest).unwrap();

        let mut tx = Transaction::new();
        let err = installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[])
            .unwrap_err();
        tx.rollback();

        assert!(matches!(err, Error::Restore(RestoreError::NoCommands { .. })));
        assert_eq!(fs::read(&env.manifest).unwrap(), manifest_before);
        assert!(ManifestFinder::new(env.manifest.parent().unwrap()).find(None).unwrap().is_empty());
        assert!(!env.data().exists());
    }

    #[test]
    fn uninstall_reverses_install() {
        let env = Env::new();
        let installer = env.installer(EXECUTABLE_RUNNER);
        let mut tx = Transaction::new();
        installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[])
            .unwrap();
        tx.commit();

        let mut tx = Transaction::new();
        let entry = installer.uninstall(&mut tx, &env.manifest, &id("T-REX")).unwrap();
        tx.commit();

        assert_eq!(entry.commands, vec![cmd("t-rex")]);
        assert!(!installer.shims().shim_exists(&cmd("t-rex")));
        assert!(ToolManifest::load(&env.manifest).unwrap().tools.is_empty());
        assert!(
            installer
                .cache
                .try_load(&installer.identifier(&id("t-rex"), &v("1.0.53"), &cmd("t-rex")), &installer.tools_root)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn rolled_back_uninstall_restores_everything() {
        let env = Env::new();
        let installer = env.installer("host");
        let mut tx = Transaction::new();
        installer
            .install(&mut tx, &env.manifest, &id("t-rex"), &v("1.0.53"), &[cmd("t-rex")])
            .unwrap();
        tx.commit();
        let manifest_before = fs::read(&env.manifest).unwrap();

        let mut tx = Transaction::new();
        installer.uninstall(&mut tx, &env.manifest, &id("t-rex")).unwrap();
        tx.rollback();

        assert_eq!(fs::read(&env.manifest).unwrap(), manifest_before);
        assert!(installer.shims().shim_exists(&cmd("t-rex")));
        assert!(installer.is_restored(&ToolManifest::load(&env.manifest).unwrap().tools[0]).unwrap());
    }

    #[test]
    fn uninstall_of_undeclared_package_fails() {
        let env = Env::new();
        let installer = env.installer("host");
        let mut tx = Transaction::new();
        assert!(matches!(
            installer.uninstall(&mut tx, &env.manifest, &id("nope")),
            Err(Error::Manifest(crate::manifest::ManifestError::PackageNotFound { .. }))
        ));
    }

    #[test]
    fn restore_all_skips_restored_tools() {
        let env = Env::new();
        fs::write(
            &env.manifest,
            "version = 1\nisRoot = true\n\n[tools.t-rex]\nversion = \"1.0.53\"\ncommands = [\"t-rex\"]\n\n[tools.raptor]\nversion = \"2.0.0\"\ncommands = [\"raptor\", \"claw\"]\n",
        )
        .unwrap();
        let installer = env.installer("host");
        let finder = ManifestFinder::new(env.manifest.parent().unwrap());

        let mut tx = Transaction::new();
        let report = installer.restore_all(&mut tx, &finder, None).unwrap();
        tx.commit();
        assert_eq!(report.restored.len(), 2);
        assert!(report.up_to_date.is_empty());
        assert_eq!(installer.restorer.calls.get(), 2);

        let mut tx = Transaction::new();
        let report = installer.restore_all(&mut tx, &finder, None).unwrap();
        tx.commit();
        assert!(report.restored.is_empty());
        assert_eq!(report.up_to_date.len(), 2);
        assert_eq!(installer.restorer.calls.get(), 2);
    }
}
