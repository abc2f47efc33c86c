use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".autoreview";
pub const DB_FILENAME: &str = "autoreview.db";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !config_exists {
        warnings.push(format!(
            "{} is missing; built-in defaults apply (run `autoreview init` to create it)",
            normalize_for_display(&paths.config_path)
        ));
    }
    if !db_exists {
        warnings.push("content store has not been created yet; lookups start cold".to_string());
    }

    Ok(RuntimeStatus {
        state_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) = resolve_override(
        overrides.data_dir.as_deref(),
        lookup_env("AUTOREVIEW_DATA_DIR"),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));

    let (config_path, config_source) = resolve_override(
        overrides.config.as_deref(),
        lookup_env("AUTOREVIEW_CONFIG"),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join(CONFIG_FILENAME), ValueSource::Default));

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

fn resolve_override(
    flag: Option<&Path>,
    env_value: Option<String>,
    project_root: &Path,
) -> Option<(PathBuf, ValueSource)> {
    if let Some(path) = flag {
        return Some((absolutize(path, project_root), ValueSource::Flag));
    }
    env_value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (absolutize(Path::new(&value), project_root), ValueSource::Env))
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.data_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_text_file(&paths.config_path, DEFAULT_CONFIG, options.force)?;
    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

const DEFAULT_CONFIG: &str = r#"# autoreview configuration (written by `autoreview init`)
# Every key is optional; commented values show the built-in defaults.

[wiki]
code = "en"
family = "wikipedia"
# api_url = "https://en.wikipedia.org/w/api.php"
# user_agent = "autoreview/0.1"

[policy]
# Groups whose edits are approved outright. Empty means: use the
# autoreview rights derived from the user's groups.
auto_approved_groups = []
# Pages in these categories always need a human reviewer.
blocking_categories = []
# Redirect magic word aliases; empty means: ask the wiki.
redirect_aliases = []
# superseded_similarity_threshold = 0.2
# Per-wiki ORES overrides; 0 falls back to [ores].
# ores_damaging_threshold = 0.0
# ores_goodfaith_threshold = 0.0
# ores_damaging_threshold_living = 0.0
# ores_goodfaith_threshold_living = 0.0
# Managed by `autoreview configure`; empty means the default catalog.
# enabled_checks = []

[ores]
# base_url = "https://ores.wikimedia.org"
# 0 disables a model.
damaging_threshold = 0.0
goodfaith_threshold = 0.0
damaging_threshold_living = 0.0
goodfaith_threshold_living = 0.0

[http]
# timeout_ms = 30000
# retries = 2
# retry_delay_ms = 500
# rate_limit_ms = 100

[cache]
# block_capacity = 1000
# block_ttl_secs = 21600
"#;

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("AUTOREVIEW_PROJECT_ROOT")
        && !value.trim().is_empty()
    {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    match detect_project_root(&context.cwd) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

/// Nearest ancestor of `cwd` holding a state directory.
fn detect_project_root(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, init_layout, inspect_runtime,
        resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd: cwd.clone() };
        let env = HashMap::from([(
            "AUTOREVIEW_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn env_overrides_are_relative_to_the_project_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext { cwd: temp.path().to_path_buf() };
        let env = HashMap::from([
            (
                "AUTOREVIEW_PROJECT_ROOT".to_string(),
                root.to_string_lossy().to_string(),
            ),
            ("AUTOREVIEW_DATA_DIR".to_string(), "state".to_string()),
            ("AUTOREVIEW_CONFIG".to_string(), " ".to_string()),
        ]);
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
            env.get(key).cloned()
        })
        .expect("resolve paths");
        assert_eq!(resolved.root_source, ValueSource::Env);
        assert_eq!(resolved.data_dir, root.join("state"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.db_path, root.join("state").join("autoreview.db"));
        assert_eq!(resolved.config_source, ValueSource::Default);
        assert!(resolved.diagnostics().contains("data_dir="));
    }

    #[test]
    fn project_root_is_found_from_a_nested_directory() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("a").join("b");
        fs::create_dir_all(root.join(".autoreview")).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let context = ResolutionContext { cwd: nested };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_writes_a_loadable_default_config_once() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext { cwd: root.clone() };
        let paths = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert!(!inspect_runtime(&paths).expect("inspect").warnings.is_empty());

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert!(report.wrote_config);
        assert_eq!(report.created_dirs.len(), 2);
        assert!(paths.data_dir.exists());

        let config = load_config(&paths.config_path).expect("default config parses");
        assert_eq!(config.wiki_id().code, "en");
        assert!(config.enabled_checks().is_empty());

        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(!again.wrote_config);
        assert!(again.created_dirs.is_empty());
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(status.config_exists);
        assert!(status.state_dir_exists);
    }
}
