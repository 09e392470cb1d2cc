//! Project configuration.
//!
//! Parses `kiln.toml` from the project root and resolves the selected
//! profile through its `inherits` chain.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the project file.
pub const PROJECT_FILE: &str = "kiln.toml";

/// Profile used when none is requested.
pub const DEFAULT_PROFILE: &str = "default";

/// Top-level configuration loaded from `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectMeta,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// `[project]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMeta {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.0.0".into()
}

/// `[toolchain]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolchainConfig {
    #[serde(default = "default_cc")]
    pub cc: String,
    /// Assembler; the C compiler driver assembles when unset.
    #[serde(default, rename = "as")]
    pub assembler: Option<String>,
    #[serde(default = "default_ar")]
    pub ar: String,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub asflags: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,
    #[serde(default)]
    pub linker_scripts: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cc: default_cc(),
            assembler: None,
            ar: default_ar(),
            cflags: Vec::new(),
            asflags: Vec::new(),
            ldflags: Vec::new(),
            linker_scripts: Vec::new(),
        }
    }
}

fn default_cc() -> String {
    "cc".into()
}
fn default_ar() -> String {
    "ar".into()
}

/// `[target]` section: what to build.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    pub sources: Vec<PathBuf>,
    /// Static library collecting every object, relative to the output directory.
    #[serde(default)]
    pub archive: Option<PathBuf>,
    /// Linked binary, relative to the output directory.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub keep_symbols: Vec<String>,
    /// Prebuilt elf library linked into the binary.
    #[serde(default)]
    pub elf_lib: Option<PathBuf>,
    /// Files copied verbatim into the output directory.
    #[serde(default)]
    pub copy: Vec<PathBuf>,
    #[serde(default)]
    pub link_options: BTreeMap<String, bool>,
}

/// `[profiles.<name>]` entry.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileConfig {
    pub inherits: Option<String>,
    pub opt_level: Option<String>,
    pub debug_info: Option<bool>,
    #[serde(default)]
    pub cflags: Vec<String>,
}

/// Configuration after profile resolution.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub project: ProjectMeta,
    pub root: PathBuf,
    pub toolchain: ToolchainConfig,
    pub target: TargetConfig,
    pub profile: ResolvedProfile,
}

impl ResolvedConfig {
    /// Output directory, relative to the project root.
    pub fn out_dir(&self) -> PathBuf {
        Path::new("build").join(&self.profile.name)
    }
}

/// A fully resolved build profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: String,
    pub opt_level: String,
    pub debug_info: bool,
    /// Parent flags first, then the child's.
    pub cflags: Vec<String>,
}

/// Find the project root by looking for `kiln.toml`.
pub fn find_project_root() -> Result<PathBuf> {
    let mut dir = std::env::current_dir()?;
    loop {
        if dir.join(PROJECT_FILE).exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            bail!("could not find {PROJECT_FILE} in any parent directory");
        }
    }
}

/// Load and resolve `kiln.toml` under `root`.
pub fn load_config(root: &Path, profile_name: Option<&str>) -> Result<ResolvedConfig> {
    let toml_path = root.join(PROJECT_FILE);
    let contents = std::fs::read_to_string(&toml_path)
        .with_context(|| format!("failed to read {}", toml_path.display()))?;
    parse_config(root, &contents, profile_name)
}

/// Resolve configuration from `kiln.toml` contents.
pub fn parse_config(
    root: &Path,
    contents: &str,
    profile_name: Option<&str>,
) -> Result<ResolvedConfig> {
    let project_config: ProjectConfig =
        toml::from_str(contents).with_context(|| format!("failed to parse {PROJECT_FILE}"))?;

    if project_config.target.sources.is_empty() {
        bail!("[target] lists no sources");
    }

    let profile_name = profile_name.unwrap_or(DEFAULT_PROFILE);
    let profile = resolve_profile(&project_config.profiles, profile_name, &mut Vec::new())?;

    Ok(ResolvedConfig {
        project: project_config.project,
        root: root.to_path_buf(),
        toolchain: project_config.toolchain,
        target: project_config.target,
        profile,
    })
}

/// Resolve a profile by applying its inheritance chain.
///
/// `default` resolves to built-in settings when it is not declared.
fn resolve_profile(
    profiles: &BTreeMap<String, ProfileConfig>,
    name: &str,
    chain: &mut Vec<String>,
) -> Result<ResolvedProfile> {
    if chain.iter().any(|n| n == name) {
        bail!("profile inheritance cycle: {} -> {name}", chain.join(" -> "));
    }

    let profile = match profiles.get(name) {
        Some(p) => p.clone(),
        None if name == DEFAULT_PROFILE => ProfileConfig::default(),
        None => bail!("profile '{name}' not found in {PROJECT_FILE}"),
    };

    chain.push(name.to_string());
    let parent = match profile.inherits {
        Some(ref parent_name) => Some(resolve_profile(profiles, parent_name, chain)?),
        None => None,
    };
    chain.pop();

    // Child overrides parent.
    let opt_level = profile
        .opt_level
        .clone()
        .or_else(|| parent.as_ref().map(|p| p.opt_level.clone()))
        .unwrap_or_else(|| "0".into());

    let debug_info = profile
        .debug_info
        .or(parent.as_ref().map(|p| p.debug_info))
        .unwrap_or(true);

    let mut cflags = parent.map(|p| p.cflags).unwrap_or_default();
    cflags.extend(profile.cflags);

    Ok(ResolvedProfile {
        name: name.into(),
        opt_level,
        debug_info,
        cflags,
    })
}

/// Print resolved config to stdout.
pub fn print_resolved(config: &ResolvedConfig) {
    println!("Project: {} v{}", config.project.name, config.project.version);
    println!("Root: {}", config.root.display());
    println!("Profile: {}", config.profile.name);
    println!("  opt-level: {}", config.profile.opt_level);
    println!("  debug-info: {}", config.profile.debug_info);
    if !config.profile.cflags.is_empty() {
        println!("  cflags: {}", config.profile.cflags.join(" "));
    }
    println!("Output: {}", config.out_dir().display());
    println!("Toolchain:");
    println!("  cc: {}", config.toolchain.cc);
    if let Some(ref asm) = config.toolchain.assembler {
        println!("  as: {asm}");
    }
    println!("  ar: {}", config.toolchain.ar);
    for ls in &config.toolchain.linker_scripts {
        println!("  linker-script: {}", ls.display());
    }
    println!("Target:");
    println!("  sources: {}", config.target.sources.len());
    if let Some(ref a) = config.target.archive {
        println!("  archive: {}", a.display());
    }
    if let Some(ref b) = config.target.binary {
        println!("  binary: {}", b.display());
    }
}
