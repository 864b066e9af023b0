//! Declarative extensions.
//!
//! An extension is a `*.hook.toml` manifest listing interceptions to apply
//! to registered instances:
//!
//! ```toml
//! name = "chat-audit"
//! description = "Logs and censors chat"
//!
//! [[hook]]
//! class = "MockServer"
//! instance = "*"
//! method = "chat"
//! kind = "before"
//! priority = 20
//! action = { type = "log", message = "chat seen" }
//! ```
//!
//! The loader remembers every callback it applied so that unloading removes
//! exactly those and nothing installed by other code.

use hook_system::{
    reject, Callback, HookError, InjectError, Injectable, InjectionEngine, InjectionKind,
    InstanceRegistry, MethodError, Reply, DEFAULT_PRIORITY,
};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File suffix of extension manifests.
pub const MANIFEST_SUFFIX: &str = ".hook.toml";

/// Instance selector matching every registered instance of a class.
pub const ANY_INSTANCE: &str = "*";

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("extension {extension}: {reason}")]
    Invalid { extension: String, reason: String },
    #[error(transparent)]
    Inject(#[from] InjectError),
}

fn any_instance() -> String {
    ANY_INSTANCE.to_string()
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// A parsed extension manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "hook")]
    pub hooks: Vec<HookSpec>,
}

/// One `[[hook]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HookSpec {
    pub class: String,
    #[serde(default = "any_instance")]
    pub instance: String,
    pub method: String,
    #[serde(default)]
    pub kind: InjectionKind,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub action: HookAction,
}

/// What a hook does when it fires.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookAction {
    /// Log the call. Valid for every kind.
    Log {
        #[serde(default)]
        message: Option<String>,
    },
    /// Return `reply` without running the method.
    Block {
        #[serde(default)]
        reply: Value,
    },
    /// Fail the call with `reason`.
    Reject { reason: String },
    /// Prefix the string argument at `index`, then proceed.
    PrefixArg { index: usize, text: String },
}

impl HookAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Block { .. } => "block",
            Self::Reject { .. } => "reject",
            Self::PrefixArg { .. } => "prefix_arg",
        }
    }
}

impl ExtensionManifest {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ExtensionError> {
        let manifest: Self = toml::from_str(content).map_err(|source| ExtensionError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ExtensionError> {
        let invalid = |reason: String| ExtensionError::Invalid {
            extension: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        for (i, hook) in self.hooks.iter().enumerate() {
            if hook.class.trim().is_empty() || hook.method.trim().is_empty() {
                return Err(invalid(format!("hook {i} needs a class and a method")));
            }
            if hook.instance.trim().is_empty() {
                return Err(invalid(format!("hook {i} has an empty instance selector")));
            }
            let log_only = matches!(hook.action, HookAction::Log { .. });
            if !log_only && hook.kind != InjectionKind::Around {
                return Err(invalid(format!(
                    "hook {i}: action `{}` needs kind `around`, not `{}`",
                    hook.action.name(),
                    hook.kind
                )));
            }
        }
        Ok(())
    }
}

impl HookSpec {
    /// Builds the callback this hook installs.
    pub fn callback(&self, extension: &str) -> Callback {
        let extension = extension.to_string();
        match (&self.action, self.kind) {
            (HookAction::Log { message }, InjectionKind::Before) => {
                let message = message.clone().unwrap_or_else(|| "call".to_string());
                Callback::before(move |ctx| {
                    info!(
                        extension = %extension,
                        class = ctx.target.kind(),
                        method = ctx.method,
                        args = ?ctx.args,
                        "🔎 {}",
                        message
                    );
                    Ok(())
                })
            }
            (HookAction::Log { message }, InjectionKind::After) => {
                let message = message.clone().unwrap_or_else(|| "returned".to_string());
                Callback::after(move |ctx| {
                    let result = match ctx.result.as_ready() {
                        Some(value) => value.to_string(),
                        None => "<pending>".to_string(),
                    };
                    info!(
                        extension = %extension,
                        class = ctx.target.kind(),
                        method = ctx.method,
                        result = %result,
                        "🔎 {}",
                        message
                    );
                    Ok(())
                })
            }
            (HookAction::Log { message }, InjectionKind::Around) => {
                let message = message.clone().unwrap_or_else(|| "call".to_string());
                Callback::around(move |ctx| {
                    info!(
                        extension = %extension,
                        class = ctx.target.kind(),
                        method = ctx.method,
                        args = ?ctx.args,
                        "🔎 {}",
                        message
                    );
                    Ok(ctx.proceed()?)
                })
            }
            (HookAction::Block { reply }, _) => {
                let reply = reply.clone();
                Callback::around(move |ctx| {
                    debug!(extension = %extension, method = ctx.method, "Blocked call");
                    Ok(Reply::Ready(reply.clone()))
                })
            }
            (HookAction::Reject { reason }, _) => {
                let reason = reason.clone();
                Callback::around(move |_| reject(MethodError::failed(reason.clone())))
            }
            (HookAction::PrefixArg { index, text }, _) => {
                let index = *index;
                let text = text.clone();
                Callback::around(move |ctx| {
                    let mut args = ctx.args.clone();
                    match args.get_mut(index) {
                        Some(Value::String(arg)) => arg.insert_str(0, &text),
                        _ => {
                            return Err(HookError::callback(format!(
                                "{extension}: argument {index} of {} is not a string",
                                ctx.method
                            )))
                        }
                    }
                    Ok(ctx.proceed_with(args)?)
                })
            }
        }
    }
}

struct AppliedHook {
    extension: String,
    target: Weak<dyn Injectable>,
    method: String,
    callback: Callback,
}

/// Outcome of a load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Extensions applied, in load order
    pub loaded: Vec<String>,
    /// Files or hooks that failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Injections installed
    pub injections: usize,
    /// Hooks that matched no registered instance
    pub unmatched: usize,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} extension(s) loaded, {} injection(s) applied",
            self.loaded.len(),
            self.injections
        )?;
        if self.unmatched > 0 {
            write!(f, ", {} hook(s) matched no instance", self.unmatched)?;
        }
        if !self.failed.is_empty() {
            write!(f, ", {} failure(s)", self.failed.len())?;
        }
        Ok(())
    }
}

/// Discovers manifests and applies them to registered instances.
pub struct ExtensionLoader {
    directory: PathBuf,
    applied: Vec<AppliedHook>,
}

impl ExtensionLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            applied: Vec::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of injections currently applied by this loader.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Names of extensions with at least one applied injection.
    pub fn active_extensions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.applied.iter().map(|a| a.extension.clone()).collect();
        names.dedup();
        names
    }

    /// Manifest files in the directory, sorted by path.
    pub async fn discover(&self) -> Result<Vec<PathBuf>, ExtensionError> {
        let io_error = |source| ExtensionError::Io {
            path: self.directory.clone(),
            source,
        };
        if !tokio::fs::try_exists(&self.directory).await.map_err(io_error)? {
            debug!("Extension directory {} does not exist", self.directory.display());
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await.map_err(io_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            let is_manifest = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX));
            if is_manifest && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Reads and validates one manifest.
    pub async fn read_manifest(path: &Path) -> Result<ExtensionManifest, ExtensionError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExtensionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        ExtensionManifest::parse(&content, path)
    }

    /// Applies every manifest in the directory. A failing manifest is
    /// reported and skipped.
    pub async fn load_all(&mut self, registry: &InstanceRegistry, engine: &InjectionEngine) -> LoadReport {
        let mut report = LoadReport::default();
        let paths = match self.discover().await {
            Ok(paths) => paths,
            Err(e) => {
                warn!("❌ {}", e);
                report.failed.push((self.directory.display().to_string(), e.to_string()));
                return report;
            }
        };

        for path in paths {
            match Self::read_manifest(&path).await {
                Ok(manifest) => self.apply(&manifest, registry, engine, &mut report),
                Err(e) => {
                    warn!("❌ Skipping extension {}: {}", path.display(), e);
                    report.failed.push((path.display().to_string(), e.to_string()));
                }
            }
        }

        info!("🧩 {}", report);
        report
    }

    /// Applies one manifest's hooks to the instances they select.
    pub fn apply(
        &mut self,
        manifest: &ExtensionManifest,
        registry: &InstanceRegistry,
        engine: &InjectionEngine,
        report: &mut LoadReport,
    ) {
        for hook in &manifest.hooks {
            let targets = if hook.instance == ANY_INSTANCE {
                registry.get_instances(&hook.class)
            } else {
                registry
                    .get_instance(&hook.class, &hook.instance)
                    .into_iter()
                    .collect()
            };
            if targets.is_empty() {
                debug!(
                    "Extension {} hook {}.{} matched no instance of `{}`",
                    manifest.name, hook.class, hook.method, hook.instance
                );
                report.unmatched += 1;
                continue;
            }

            let callback = hook.callback(&manifest.name);
            for target in targets {
                match engine.inject(target.as_ref(), &hook.method, callback.clone(), hook.priority) {
                    Ok(()) => {
                        self.applied.push(AppliedHook {
                            extension: manifest.name.clone(),
                            target: Arc::downgrade(&target),
                            method: hook.method.clone(),
                            callback: callback.clone(),
                        });
                        report.injections += 1;
                    }
                    Err(e) => {
                        warn!("❌ Extension {}: {}", manifest.name, e);
                        report.failed.push((manifest.name.clone(), e.to_string()));
                    }
                }
            }
        }
        report.loaded.push(manifest.name.clone());
    }

    /// Removes everything this loader applied. Returns how many injections
    /// were still active.
    pub fn unload_all(&mut self, engine: &InjectionEngine) -> usize {
        let mut removed = 0;
        for applied in self.applied.drain(..) {
            let Some(target) = applied.target.upgrade() else {
                continue;
            };
            if engine.remove_injection(target.as_ref(), &applied.method, &applied.callback) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("🧹 Unloaded {} extension injection(s)", removed);
        }
        removed
    }

    /// Unloads, then loads the directory again.
    pub async fn reload(&mut self, registry: &InstanceRegistry, engine: &InjectionEngine) -> LoadReport {
        self.unload_all(engine);
        self.load_all(registry, engine).await
    }
}
