//! Unit tests for dependency resolution.
//!
//! Subprocess-backed tests use a tiny shell script standing in for the
//! real installer, so install behavior is observable without network
//! access. Those tests are unix-only.

use std::path::Path;

use repl_relay::resolver::{extract_requires, split_spec, DependencyResolver, MANIFEST_FILE};
use repl_relay::{AppError, GlobalConfig};

fn test_config(sandbox_root: &Path, installer: &str) -> GlobalConfig {
    GlobalConfig {
        sandbox_root: sandbox_root.to_path_buf(),
        installer_command: installer.to_owned(),
        ..GlobalConfig::default()
    }
}

/// Write an executable fake installer into `dir` and return its path.
///
/// `install <name@version>` creates `node_modules/<name>` in the
/// working directory; `install --production` just reports success.
#[cfg(unix)]
fn write_fake_installer(dir: &Path) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-npm");
    std::fs::write(
        &path,
        "#!/bin/sh\n\
         if [ \"$2\" = \"--production\" ]; then\n\
         \techo \"installed from manifest\"\n\
         \texit 0\n\
         fi\n\
         spec=\"$2\"\n\
         name=\"${spec%@*}\"\n\
         mkdir -p \"node_modules/$name\"\n\
         echo \"added 1 package: $spec\"\n",
    )
    .expect("write fake installer");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake installer");
    path.to_string_lossy().into_owned()
}

// ── Specifier parsing ────────────────────────────────────────

#[test]
fn split_spec_defaults_to_latest() {
    assert_eq!(split_spec("left-pad"), ("left-pad", "latest"));
}

#[test]
fn split_spec_extracts_version() {
    assert_eq!(split_spec("left-pad@1.0.0"), ("left-pad", "1.0.0"));
}

#[test]
fn split_spec_keeps_scope_marker() {
    assert_eq!(split_spec("@scope/pkg"), ("@scope/pkg", "latest"));
    assert_eq!(split_spec("@scope/pkg@2.1.0"), ("@scope/pkg", "2.1.0"));
}

#[test]
fn extract_requires_finds_specifiers_in_order() {
    let script = r#"const a = require('left-pad'); const b = require("lodash@4");"#;
    assert_eq!(extract_requires(script), vec!["left-pad", "lodash@4"]);
}

#[test]
fn extract_requires_deduplicates() {
    let script = "require('x'); require('x'); require('y')";
    assert_eq!(extract_requires(script), vec!["x", "y"]);
}

#[test]
fn extract_requires_skips_local_paths() {
    let script = "require('./local'); require('/abs'); require('pkg')";
    assert_eq!(extract_requires(script), vec!["pkg"]);
}

#[test]
fn extract_requires_ignores_non_require_text() {
    assert!(extract_requires("1 + 1").is_empty());
}

// ── Sandbox lifecycle ────────────────────────────────────────

#[tokio::test]
async fn ensure_sandbox_writes_default_manifest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), "false");
    let resolver = DependencyResolver::new("abc123", &config);

    assert!(!resolver.sandbox_exists());
    resolver.ensure_sandbox().expect("create sandbox");
    assert!(resolver.sandbox_exists());

    let raw = std::fs::read_to_string(resolver.sandbox_dir().join(MANIFEST_FILE))
        .expect("manifest exists");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(value["name"], "abc123");
}

#[tokio::test]
async fn manifest_defaults_to_stub_before_sandbox_exists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), "false");
    let resolver = DependencyResolver::new("abc123", &config);

    let manifest = resolver.manifest();
    assert_eq!(manifest.name, "abc123");
    assert!(manifest.dependencies.is_empty());
}

#[tokio::test]
async fn preinstalled_modules_resolve_without_side_effects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path(), "false");
    config.preinstalled_modules = vec!["fs".into()];
    let resolver = DependencyResolver::new("abc123", &config);

    let resolution = resolver.resolve("fs").await.expect("resolve preinstalled");
    assert!(resolution.unit.location.is_none());
    assert!(resolution.install_output.is_none());
    assert!(!resolver.sandbox_exists(), "no sandbox for preinstalled modules");
}

/// A module already present in the sandbox never invokes the installer:
/// the configured installer here fails unconditionally, so resolution
/// succeeding proves it was not run.
#[tokio::test]
async fn present_module_skips_the_installer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), "false");
    let resolver = DependencyResolver::new("abc123", &config);

    let module_dir = resolver.sandbox_dir().join("node_modules").join("left-pad");
    std::fs::create_dir_all(&module_dir).expect("seed module");

    let resolution = resolver.resolve("left-pad").await.expect("resolve present");
    assert_eq!(resolution.unit.location.as_deref(), Some(module_dir.as_path()));
    assert!(resolution.install_output.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn absent_module_is_installed_and_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let installer = write_fake_installer(dir.path());
    let config = test_config(&dir.path().join("sandboxes"), &installer);
    let resolver = DependencyResolver::new("abc123", &config);

    let resolution = resolver.resolve("left-pad@1.3.0").await.expect("resolve installs");
    assert_eq!(resolution.unit.name, "left-pad");
    assert_eq!(resolution.unit.version, "1.3.0");
    assert!(resolution
        .unit
        .location
        .as_deref()
        .is_some_and(Path::is_dir));
    assert!(resolution
        .install_output
        .is_some_and(|out| out.contains("added 1 package: left-pad@1.3.0")));
}

/// Repeating a satisfied resolution is a no-op, not an error.
#[cfg(unix)]
#[tokio::test]
async fn repeat_resolution_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let installer = write_fake_installer(dir.path());
    let config = test_config(&dir.path().join("sandboxes"), &installer);
    let resolver = DependencyResolver::new("abc123", &config);

    resolver.resolve("left-pad").await.expect("first resolve");
    let second = resolver.resolve("left-pad").await.expect("second resolve");
    assert!(second.install_output.is_none(), "no reinstall for a satisfied module");
}

#[tokio::test]
async fn failed_install_carries_captured_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), "false");
    let resolver = DependencyResolver::new("abc123", &config);

    let err = resolver
        .resolve("left-pad")
        .await
        .expect_err("failing installer must error");
    assert!(matches!(err, AppError::Install(_)));
    assert!(err.to_string().contains("installer exited with"));
}

#[tokio::test]
async fn missing_installer_binary_is_an_install_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), "/nonexistent/installer-binary");
    let resolver = DependencyResolver::new("abc123", &config);

    let err = resolver.resolve("left-pad").await.expect_err("spawn failure");
    assert!(matches!(err, AppError::Install(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn manifest_install_reports_captured_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let installer = write_fake_installer(dir.path());
    let config = test_config(&dir.path().join("sandboxes"), &installer);
    let resolver = DependencyResolver::new("abc123", &config);

    let output = resolver.install_from_manifest().await.expect("manifest install");
    assert!(output.stdout.contains("installed from manifest"));
    assert!(output.stderr.is_empty());
}
