//! Toolchain command construction.
//!
//! Every compile, archive and link command is built with [`ToolCommand`],
//! which can both execute the command and render it as the canonical string
//! stored in the artifact's `.cmd` fingerprint.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use kiln_stale::{BoxError, BuildCommands, LinkOptions, Stage};

use crate::config::ResolvedConfig;

/// A typed builder for toolchain invocations.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Create a new builder for `program`.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append a list of flags verbatim.
    pub fn flags(&mut self, flags: &[String]) -> &mut Self {
        self.args.extend(flags.iter().cloned());
        self
    }

    /// Append a path argument.
    pub fn path(&mut self, path: &Path) -> &mut Self {
        self.arg(path.display().to_string())
    }

    /// Set the output file (`-o <path>`).
    pub fn output(&mut self, path: &Path) -> &mut Self {
        self.arg("-o").path(path)
    }

    /// Compile or assemble only (`-c`).
    pub fn compile_only(&mut self) -> &mut Self {
        self.arg("-c")
    }

    /// Use a linker script (`-T<path>`).
    pub fn linker_script(&mut self, path: &Path) -> &mut Self {
        self.arg(format!("-T{}", path.display()))
    }

    /// Keep a symbol alive through garbage collection (`-Wl,--undefined=<sym>`).
    pub fn keep_symbol(&mut self, sym: &str) -> &mut Self {
        self.arg(format!("-Wl,--undefined={sym}"))
    }

    /// Canonical text of the command: program and arguments joined by spaces.
    pub fn render(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }

    /// Execute the command and return its output.
    pub fn run(&self) -> Result<Output> {
        Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("failed to run {}", self.program))
    }

    /// Execute the command and bail if it fails.
    pub fn run_checked(&self, verb: &str, what: &Path) -> Result<Output> {
        let output = self.run()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("failed to {verb} '{}':\n{stderr}", what.display());
        }
        Ok(output)
    }
}

/// Toolchain settings for one build target and profile.
pub struct Toolchain {
    cc: String,
    assembler: String,
    ar: String,
    cflags: Vec<String>,
    asflags: Vec<String>,
    ldflags: Vec<String>,
    linker_scripts: Vec<PathBuf>,
    out_dir: PathBuf,
}

impl Toolchain {
    /// Combine the `[toolchain]` section with the resolved profile.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let tc = &config.toolchain;
        let profile = &config.profile;

        let mut cflags = tc.cflags.clone();
        cflags.push(format!("-O{}", profile.opt_level));
        if profile.debug_info {
            cflags.push("-g".into());
        }
        cflags.extend(profile.cflags.iter().cloned());

        let mut asflags = tc.asflags.clone();
        if profile.debug_info {
            asflags.push("-g".into());
        }

        Self {
            cc: tc.cc.clone(),
            assembler: tc.assembler.clone().unwrap_or_else(|| tc.cc.clone()),
            ar: tc.ar.clone(),
            cflags,
            asflags,
            ldflags: tc.ldflags.clone(),
            linker_scripts: tc.linker_scripts.clone(),
            out_dir: config.out_dir(),
        }
    }

    fn stage_flags(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Compiler => &self.cflags,
            Stage::Assembler => &self.asflags,
        }
    }

    /// `<cc|as> <flags> -c -o <object> <source>`
    pub fn compile(&self, source: &Path, stage: Stage) -> ToolCommand {
        let program = match stage {
            Stage::Compiler => &self.cc,
            Stage::Assembler => &self.assembler,
        };
        let object = kiln_stale::object_path(&self.out_dir, source);

        let mut cmd = ToolCommand::new(program);
        cmd.flags(self.stage_flags(stage))
            .compile_only()
            .output(&object)
            .path(source);
        cmd
    }

    /// `<cc> <flags> -MM -MT <object> -MF <listing> <source>`
    ///
    /// Always uses the C compiler driver: a bare assembler cannot emit
    /// dependency listings.
    pub fn dep_listing(&self, source: &Path, stage: Stage) -> ToolCommand {
        let object = kiln_stale::object_path(&self.out_dir, source);
        let listing = kiln_stale::dep_listing_path(&self.out_dir, source);

        let mut cmd = ToolCommand::new(&self.cc);
        cmd.flags(self.stage_flags(stage))
            .arg("-MM")
            .arg("-MT")
            .path(&object)
            .arg("-MF")
            .path(&listing)
            .path(source);
        cmd
    }

    /// `<ar> rcs <dest> <members...>`
    pub fn archive(&self, dest: &Path, members: &[PathBuf]) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.ar);
        cmd.arg("rcs").path(dest);
        for m in members {
            cmd.path(m);
        }
        cmd
    }

    /// `<cc> <ldflags> [-T...] [-Wl,--undefined=...] [-<option>...] -o <dest> <members...> [<elf-lib>]`
    pub fn link(
        &self,
        dest: &Path,
        options: &LinkOptions,
        members: &[PathBuf],
        keep_symbols: &[String],
        elf_lib: Option<&Path>,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.cc);
        cmd.flags(&self.ldflags);
        for ls in &self.linker_scripts {
            cmd.linker_script(ls);
        }
        for sym in keep_symbols {
            cmd.keep_symbol(sym);
        }
        for (name, _) in options.iter().filter(|(_, enabled)| **enabled) {
            cmd.arg(format!("-{name}"));
        }
        cmd.output(dest);
        for m in members {
            cmd.path(m);
        }
        if let Some(elf) = elf_lib {
            cmd.path(elf);
        }
        cmd
    }
}

impl BuildCommands for Toolchain {
    fn compile_command(&self, source: &Path, stage: Stage) -> Result<String, BoxError> {
        Ok(self.compile(source, stage).render())
    }

    fn archive_command(&self, dest: &Path, members: &[PathBuf]) -> String {
        self.archive(dest, members).render()
    }

    fn link_command(
        &self,
        dest: &Path,
        options: &LinkOptions,
        members: &[PathBuf],
        keep_symbols: &[String],
        elf_lib: Option<&Path>,
    ) -> String {
        self.link(dest, options, members, keep_symbols, elf_lib)
            .render()
    }

    fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn linker_scripts(&self) -> &[PathBuf] {
        &self.linker_scripts
    }
}

/// Pick the tool for a source file from its extension.
pub fn stage_for(source: &Path) -> Stage {
    match source.extension().and_then(|e| e.to_str()) {
        Some("s" | "S" | "asm") => Stage::Assembler,
        _ => Stage::Compiler,
    }
}
