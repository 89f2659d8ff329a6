//! Dependency resolution into per-session sandboxes.
//!
//! `resolve` turns a `name[@version]` specifier into a loadable unit:
//! preinstalled modules short-circuit, modules already present in the
//! sandbox are returned as-is, and anything else is installed by the
//! external installer subprocess with the sandbox as its working
//! directory. Installs are synchronous and idempotent; a failed install
//! is an [`AppError::Install`] carrying the captured installer output,
//! never a crashed session.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

pub mod manifest;

pub use manifest::{Manifest, MANIFEST_FILE};

/// Default version constraint when a specifier names no version.
pub const LATEST: &str = "latest";

/// A resolved module: its name, the version constraint it was resolved
/// under, and where it lives. `location` is `None` for preinstalled
/// modules the engine loads from its own search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadableUnit {
    /// Module name without any version suffix.
    pub name: String,
    /// Version constraint the unit satisfies.
    pub version: String,
    /// Filesystem location inside the sandbox, when sandbox-installed.
    pub location: Option<PathBuf>,
}

/// Outcome of a single resolution.
#[derive(Debug)]
pub struct Resolution {
    /// The loadable unit.
    pub unit: LoadableUnit,
    /// Captured installer output when this resolution ran an install.
    pub install_output: Option<String>,
}

/// Captured stdout and stderr of one installer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallerOutput {
    /// Installer standard output.
    pub stdout: String,
    /// Installer standard error.
    pub stderr: String,
}

impl InstallerOutput {
    /// Stderr followed by stdout, the order they are logged in.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}{}", self.stderr, self.stdout)
    }
}

/// Resolver scoped to one session's sandbox directory.
#[derive(Debug)]
pub struct DependencyResolver {
    token: String,
    sandbox_dir: PathBuf,
    installer_command: String,
    installer_registry: Option<String>,
    preinstalled: HashSet<String>,
}

impl DependencyResolver {
    /// Build a resolver for `token`, scoped to its sandbox directory.
    #[must_use]
    pub fn new(token: &str, config: &GlobalConfig) -> Self {
        Self {
            token: token.to_owned(),
            sandbox_dir: config.sandbox_dir(token),
            installer_command: config.installer_command.clone(),
            installer_registry: config.installer_registry.clone(),
            preinstalled: config.preinstalled_modules.iter().cloned().collect(),
        }
    }

    /// The sandbox directory this resolver installs into.
    #[must_use]
    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }

    /// Whether the sandbox directory exists on disk yet.
    #[must_use]
    pub fn sandbox_exists(&self) -> bool {
        self.sandbox_dir.is_dir()
    }

    /// Current manifest, defaulting to `{"name": <token>}` when the
    /// sandbox has none.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        Manifest::load_or_stub(&self.sandbox_dir.join(MANIFEST_FILE), &self.token)
    }

    /// Resolve `spec` (`name` or `name@version`) to a loadable unit,
    /// installing it into the sandbox when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Install` when the install subprocess fails,
    /// or `AppError::Io` when the sandbox cannot be created.
    pub async fn resolve(&self, spec: &str) -> Result<Resolution> {
        let (name, version) = split_spec(spec);
        debug!(module = name, version, "resolving dependency");

        if self.preinstalled.contains(name) {
            return Ok(Resolution {
                unit: LoadableUnit {
                    name: name.to_owned(),
                    version: version.to_owned(),
                    location: None,
                },
                install_output: None,
            });
        }

        self.ensure_sandbox()?;

        let location = self.module_dir(name);
        if location.is_dir() {
            // Already satisfied; repeat resolution is a no-op.
            return Ok(Resolution {
                unit: LoadableUnit {
                    name: name.to_owned(),
                    version: version.to_owned(),
                    location: Some(location),
                },
                install_output: None,
            });
        }

        let output = self
            .run_installer(&["install".to_owned(), format!("{name}@{version}")])
            .await?;
        let manifest = self.manifest();
        info!(
            module = name,
            version,
            dependencies = manifest.dependencies.len(),
            "dependency installed into sandbox"
        );

        let location = self.module_dir(name);
        if location.is_dir() {
            Ok(Resolution {
                unit: LoadableUnit {
                    name: name.to_owned(),
                    version: version.to_owned(),
                    location: Some(location),
                },
                install_output: Some(output.combined()),
            })
        } else {
            Err(AppError::Install(format!(
                "installer reported success but {name} is not present in the sandbox"
            )))
        }
    }

    /// Run a production-only install of the sandbox's manifest, as used
    /// by the export endpoint. Returns the captured installer output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Install` when the install subprocess fails,
    /// or `AppError::Io` when the sandbox cannot be created.
    pub async fn install_from_manifest(&self) -> Result<InstallerOutput> {
        self.ensure_sandbox()?;
        self.run_installer(&["install".to_owned(), "--production".to_owned()])
            .await
    }

    /// Write `value` as the sandbox manifest, creating the sandbox
    /// directory first if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on filesystem failure.
    pub fn write_manifest_value(&self, value: &serde_json::Value) -> Result<()> {
        std::fs::create_dir_all(&self.sandbox_dir)?;
        let raw = serde_json::to_string_pretty(value)
            .map_err(|err| AppError::Io(format!("failed to serialize manifest: {err}")))?;
        std::fs::write(self.sandbox_dir.join(MANIFEST_FILE), raw + "\n")?;
        Ok(())
    }

    /// Create the sandbox directory and its default manifest on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on filesystem failure.
    pub fn ensure_sandbox(&self) -> Result<()> {
        if self.sandbox_exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.sandbox_dir)?;
        let manifest_path = self.sandbox_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            Manifest::stub(&self.token).save(&manifest_path)?;
        }
        info!(sandbox = %self.sandbox_dir.display(), "sandbox created");
        Ok(())
    }

    fn module_dir(&self, name: &str) -> PathBuf {
        self.sandbox_dir.join("node_modules").join(name)
    }

    async fn run_installer(&self, args: &[String]) -> Result<InstallerOutput> {
        let mut cmd = Command::new(&self.installer_command);
        cmd.args(args);
        if let Some(ref registry) = self.installer_registry {
            cmd.arg(format!("--registry={registry}"));
        }
        cmd.current_dir(&self.sandbox_dir).kill_on_drop(true);

        let output = cmd.output().await.map_err(|err| {
            AppError::Install(format!(
                "failed to run installer {}: {err}",
                self.installer_command
            ))
        })?;

        let captured = InstallerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.status.success() {
            Ok(captured)
        } else {
            Err(AppError::Install(format!(
                "installer exited with {}: {}",
                output.status,
                captured.combined()
            )))
        }
    }
}

/// Split a `name[@version]` specifier. The version defaults to
/// [`LATEST`]. A leading `@` belongs to a scoped name, not a version.
#[must_use]
pub fn split_spec(spec: &str) -> (&str, &str) {
    match spec.rfind('@') {
        Some(idx) if idx > 0 => (&spec[..idx], &spec[idx + 1..]),
        _ => (spec, LATEST),
    }
}

/// Extract module specifiers referenced by `require("...")` calls in a
/// script, in order of appearance, deduplicated.
///
/// Submitted scripts are pre-scanned so missing dependencies are
/// installed before the engine evaluates the reference.
#[must_use]
pub fn extract_requires(script: &str) -> Vec<String> {
    static REQUIRE_RE: OnceLock<Regex> = OnceLock::new();
    let re = REQUIRE_RE.get_or_init(|| {
        Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
            .unwrap_or_else(|err| unreachable!("require pattern is a valid regex: {err}"))
    });

    let mut seen = HashSet::new();
    let mut specs = Vec::new();
    for cap in re.captures_iter(script) {
        let spec = cap[1].to_owned();
        // Relative and absolute paths are engine-local files, not
        // installable packages.
        if spec.starts_with('.') || spec.starts_with('/') {
            continue;
        }
        if seen.insert(spec.clone()) {
            specs.push(spec);
        }
    }
    specs
}
