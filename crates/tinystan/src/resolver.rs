//! Locating, and if necessary building, a model's compiled library.
//!
//! A `.stan` path is compiled with TinyStan's makefile; any other path is
//! taken to be a compiled library already.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::config::BuildConfig;
use crate::error::{Result, TinyStanError};
use crate::library::model_library_name;

const SOURCE_EXTENSION: &str = "stan";

/// Checkout of the TinyStan sources the makefile runs in.
///
/// Configured value first, then `$TINYSTAN`, then
/// `~/.tinystan/tinystan-<version>`.
pub fn tinystan_home(config: &BuildConfig) -> Result<PathBuf> {
    if let Some(home) = &config.tinystan_home {
        return Ok(home.clone());
    }
    if let Some(home) = env::var_os("TINYSTAN").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| {
            home.join(".tinystan")
                .join(format!("tinystan-{}", env!("CARGO_PKG_VERSION")))
        })
        .ok_or_else(|| {
            TinyStanError::Config(
                "cannot locate TinyStan: no home directory; set TINYSTAN".to_string(),
            )
        })
}

pub fn make_command(config: &BuildConfig) -> String {
    match &config.make_command {
        Some(make) => make.clone(),
        None if cfg!(windows) => "mingw32-make".to_string(),
        None => "make".to_string(),
    }
}

/// Where the makefile writes the library for `source`.
pub fn library_path_for(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(model_library_name(&stem))
}

fn make_arguments(config: &BuildConfig, source: &Path) -> Vec<String> {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let mut stancflags = format!("STANCFLAGS=--include-paths={}", dir.display());
    for arg in &config.stanc_args {
        stancflags.push(' ');
        stancflags.push_str(arg);
    }

    let mut args = config.make_args.clone();
    args.push(stancflags);
    args.push(library_path_for(source).display().to_string());
    args
}

fn is_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
}

/// Build the library for a `.stan` file and return its path.
pub fn compile_model(source: &Path, config: &BuildConfig) -> Result<PathBuf> {
    if !is_source(source) {
        return Err(TinyStanError::argument(
            "model",
            format!("'{}' is not a .stan file", source.display()),
        ));
    }
    let source = source
        .canonicalize()
        .map_err(|_| TinyStanError::NotFound(source.to_path_buf()))?;

    let home = tinystan_home(config)?;
    if !home.is_dir() {
        return Err(TinyStanError::Config(format!(
            "TinyStan home '{}' does not exist; set TINYSTAN or build.tinystan_home",
            home.display()
        )));
    }

    let make = make_command(config);
    let args = make_arguments(config, &source);
    info!("compiling {} with {make} in {}", source.display(), home.display());
    debug!("{make} {}", args.join(" "));

    let output = Command::new(&make)
        .args(&args)
        .current_dir(&home)
        .output()
        .map_err(|e| TinyStanError::Compilation {
            path: source.clone(),
            status: format!("could not run '{make}': {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    if !output.status.success() {
        return Err(TinyStanError::Compilation {
            path: source,
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let library = library_path_for(&source);
    info!("compiled {}", library.display());
    Ok(library)
}

/// Turn a model path into the path of a loadable library.
pub fn resolve_artifact(path: &Path, config: &BuildConfig) -> Result<PathBuf> {
    if !path.exists() {
        return Err(TinyStanError::NotFound(path.to_path_buf()));
    }
    if is_source(path) {
        return compile_model(path, config);
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::ENV_GUARD;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn library_path_sits_next_to_source() {
        assert_eq!(
            library_path_for(Path::new("/models/bernoulli.stan")),
            PathBuf::from("/models/bernoulli_model.so")
        );
    }

    #[test]
    fn make_arguments_order() {
        let config = BuildConfig {
            stanc_args: vec!["--O1".to_string(), "--warn-pedantic".to_string()],
            make_args: vec!["-j2".to_string(), "STAN_THREADS=true".to_string()],
            ..Default::default()
        };
        let args = make_arguments(&config, Path::new("/models/bernoulli.stan"));
        assert_eq!(
            args,
            vec![
                "-j2",
                "STAN_THREADS=true",
                "STANCFLAGS=--include-paths=/models --O1 --warn-pedantic",
                "/models/bernoulli_model.so",
            ]
        );
    }

    #[test]
    fn missing_paths_are_not_found() {
        let config = BuildConfig::default();
        for path in ["/no/such/model.stan", "/no/such/model_model.so"] {
            let err = resolve_artifact(Path::new(path), &config).unwrap_err();
            assert!(matches!(err, TinyStanError::NotFound(_)), "{path}");
            assert!(err.to_string().starts_with("tinystan:"));
        }
    }

    #[test]
    fn existing_library_is_used_directly() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("bernoulli_model.so");
        fs::write(&lib, b"").unwrap();
        assert_eq!(resolve_artifact(&lib, &BuildConfig::default()).unwrap(), lib);
    }

    #[test]
    fn configured_home_wins() {
        let _lock = ENV_GUARD.lock().unwrap();
        env::set_var("TINYSTAN", "/from/env");
        let config = BuildConfig {
            tinystan_home: Some(PathBuf::from("/from/config")),
            ..Default::default()
        };
        assert_eq!(tinystan_home(&config).unwrap(), PathBuf::from("/from/config"));
        assert_eq!(
            tinystan_home(&BuildConfig::default()).unwrap(),
            PathBuf::from("/from/env")
        );
        env::remove_var("TINYSTAN");

        let fallback = tinystan_home(&BuildConfig::default()).unwrap();
        assert!(fallback.ends_with(format!("tinystan-{}", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn missing_home_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bernoulli.stan");
        fs::write(&source, "parameters { real mu; }").unwrap();
        let config = BuildConfig {
            tinystan_home: Some(dir.path().join("not-a-checkout")),
            ..Default::default()
        };
        let err = compile_model(&source, &config).unwrap_err();
        assert!(matches!(err, TinyStanError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failing_build_is_compilation_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bernoulli.stan");
        fs::write(&source, "parameters { real mu; }").unwrap();
        let config = BuildConfig {
            tinystan_home: Some(dir.path().to_path_buf()),
            make_command: Some("false".to_string()),
            ..Default::default()
        };
        let err = resolve_artifact(&source, &config).unwrap_err();
        assert!(matches!(err, TinyStanError::Compilation { .. }));
        assert!(err.to_string().starts_with("tinystan: compilation of"));
    }

    #[cfg(unix)]
    #[test]
    fn successful_build_returns_library_path() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bernoulli.stan");
        fs::write(&source, "parameters { real mu; }").unwrap();
        let config = BuildConfig {
            tinystan_home: Some(dir.path().to_path_buf()),
            make_command: Some("true".to_string()),
            ..Default::default()
        };
        let lib = resolve_artifact(&source, &config).unwrap();
        assert_eq!(lib.file_name().unwrap(), "bernoulli_model.so");
        assert_eq!(lib.parent(), source.canonicalize().unwrap().parent());
    }

    #[test]
    fn unknown_make_binary_is_compilation_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bernoulli.stan");
        fs::write(&source, "").unwrap();
        let config = BuildConfig {
            tinystan_home: Some(dir.path().to_path_buf()),
            make_command: Some("definitely-not-a-make-binary".to_string()),
            ..Default::default()
        };
        let err = compile_model(&source, &config).unwrap_err();
        let TinyStanError::Compilation { status, .. } = err else {
            panic!("expected a compilation error");
        };
        assert!(status.contains("could not run"));
    }
}
