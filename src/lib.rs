pub mod ast;
pub mod codegen;
pub mod ident;
pub mod parser;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(not(target_arch = "wasm32"))]
pub mod manifest;

#[cfg(not(target_arch = "wasm32"))]
pub mod transpiler;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

#[cfg(not(target_arch = "wasm32"))]
use anyhow::Result;
#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};

/// Transpiles one object script. Malformed scripts produce a program with no
/// declarations rather than an error.
pub fn transpile_script(raw_script: &str, object_id: &str) -> String {
    let program = parser::build_program(raw_script, Some(object_id));
    codegen::emit_program(&program, Some(object_id))
}

/// Transpiles a project-level function body stored under `function_id`.
pub fn transpile_function(raw_script: &str, function_id: &str) -> String {
    let program = parser::build_function_program(raw_script, function_id);
    codegen::emit_program(&program, None)
}

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    if args.dump_ast {
        return dump_ast(args);
    }

    let progress = CliProgress::new("Transpile", 3, args.quiet);
    progress.emit(1, "Resolving input path");
    let input = canonicalize_file(&args.input)?;

    progress.emit(2, "Transpiling scripts");
    let units = CliProgress::new("Unit", 1, args.quiet);
    let mut unit_cb = |state: &transpiler::TranspileProgress, label: &str| {
        units.emit_with_total(state.processed, state.started, label);
    };
    let mut transpiler = transpiler::Transpiler::new(args.transpile_options());
    let report = transpiler.run_with_progress(&input, Some(&mut unit_cb))?;

    progress.emit(3, "Updated project manifest");
    for (id, message) in &report.failed {
        eprintln!("[Transpile] '{}' failed: {}", id, message);
    }
    if !args.quiet {
        eprintln!(
            "[Transpile] {} succeeded, {} failed; output in '{}'.",
            report.succeeded.len(),
            report.failed.len(),
            pretty_path(&report.output_dir)
        );
    }
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
fn dump_ast(args: &cli::Args) -> Result<()> {
    let progress = CliProgress::new("Dump AST", 2, args.quiet);
    progress.emit(1, "Resolving input path");
    let input = canonicalize_file(&args.input)?;
    let manifest = manifest::ProjectManifest::load(&input)?;

    progress.emit(2, "Building programs");
    for entry in manifest.script_entries() {
        let program = match entry.kind {
            manifest::UnitKind::Object => parser::build_program(&entry.script, Some(&entry.id)),
            manifest::UnitKind::Function => {
                parser::build_function_program(&entry.script, &entry.id)
            }
        };
        println!("== {:?} '{}' ({}) ==", entry.kind, entry.name, entry.id);
        println!("{:#?}", program);
    }
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
pub fn canonicalize_file(path: &Path) -> Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
    }
    Ok(path.canonicalize()?)
}

#[cfg(not(target_arch = "wasm32"))]
fn pretty_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if let Some(stripped) = raw.strip_prefix(r"\\?\") {
        stripped.to_string()
    } else {
        raw
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
    quiet: bool,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize, quiet: bool) -> Self {
        Self {
            prefix,
            total: total.max(1),
            quiet,
        }
    }

    fn emit(&self, step: usize, label: &str) {
        self.emit_with_total(step, self.total, label);
    }

    fn emit_with_total(&self, step: usize, total: usize, label: &str) {
        if self.quiet {
            return;
        }
        let total = total.max(1);
        let step = step.clamp(1, total);
        let bar = render_progress_bar(step, total, 14);
        eprintln!(
            "[{}] {}... ({}/{}) {}",
            self.prefix, label, step, total, bar
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}
