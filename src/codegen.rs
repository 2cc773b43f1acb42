pub mod events;
pub mod expr;
pub mod stmt;

use crate::ast::{EventHandler, FunctionDefinition, Node, Program};
use crate::parser::local_variable_ident;
use events::Guard;
use expr::{callee_ident, emit_node, is_value_block, quote, variable_getter, PREC_TOP};
use stmt::{comment_line, line, StatementTable};

/// Per-call emission state. Copied into each nested emitter call so that
/// sibling statements never observe each other's loop depth.
#[derive(Debug, Clone, Copy)]
pub struct CodegenContext<'a> {
    pub object_id: Option<&'a str>,
    pub loop_level: usize,
}

impl<'a> CodegenContext<'a> {
    pub fn new(object_id: Option<&'a str>) -> Self {
        Self {
            object_id,
            loop_level: 0,
        }
    }

    pub fn nested_loop(self) -> Self {
        Self {
            loop_level: self.loop_level + 1,
            ..self
        }
    }
}

pub fn banner() -> String {
    format!(
        "// Generated by {} {} ({}). Do not edit by hand.\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS")
    )
}

/// Renders one output unit. `object_id` is `None` for project-level function
/// units, which receive `self` as an argument instead of binding it.
pub fn emit_program(program: &Program, object_id: Option<&str>) -> String {
    ProgramEmitter::new(object_id).emit(program)
}

pub struct ProgramEmitter<'a> {
    object_id: Option<&'a str>,
    statements: StatementTable,
}

impl<'a> ProgramEmitter<'a> {
    pub fn new(object_id: Option<&'a str>) -> Self {
        Self {
            object_id,
            statements: StatementTable::new(),
        }
    }

    pub fn emit(&self, program: &Program) -> String {
        let mut out = banner();
        out.push_str("\"use strict\";\n\n");
        out.push_str("const Func = runtime.functions;\n");
        if let Some(object_id) = self.object_id {
            out.push_str(&format!("const self = runtime.object({});\n", quote(object_id)));
        }

        for def in program.functions() {
            out.push('\n');
            out.push_str(&self.emit_function(def));
        }
        for handler in program.handlers() {
            out.push('\n');
            out.push_str(&self.emit_handler(handler));
        }
        out
    }

    fn ctx(&self) -> CodegenContext<'a> {
        CodegenContext::new(self.object_id)
    }

    fn emit_function(&self, def: &FunctionDefinition) -> String {
        let mut signature = vec!["self".to_string()];
        signature.extend(def.params.iter().map(ToString::to_string));

        let mut out = line(
            0,
            &format!(
                "Func.{} = async ({}) => {{",
                callee_ident(&def.id),
                signature.join(", ")
            ),
        );
        for local in &def.local_variables {
            out.push_str(&line(1, &format!("let {} = 0;", local)));
        }
        out.push_str(&self.emit_function_body(def));
        out.push_str(&line(0, "};"));
        out
    }

    fn emit_function_body(&self, def: &FunctionDefinition) -> String {
        let ctx = self.ctx();
        let rendered = self.statements.emit_block(&def.body, 1, ctx);
        if !def.is_value_returning || has_return(&rendered) {
            return rendered;
        }

        match def.body.split_last() {
            Some((last, rest)) if is_value_block(last) => {
                let mut out = self.statements.emit_block(rest, 1, ctx);
                match emit_node(last, ctx, PREC_TOP) {
                    Ok(value) => out.push_str(&line(1, &format!("return {};", value))),
                    Err(failure) => {
                        out.push_str(&comment_line(1, &format!("skipped return: {}", failure)))
                    }
                }
                out
            }
            _ => {
                let mut out = rendered;
                if let Some(getter) = last_assigned(&def.body) {
                    out.push_str(&line(1, &format!("return {};", getter)));
                }
                out
            }
        }
    }

    fn emit_handler(&self, handler: &EventHandler) -> String {
        let Some(binding) = events::binding(&handler.event_name) else {
            return comment_line(
                0,
                &format!("TODO: unsupported event '{}'", handler.event_name),
            );
        };
        let guard = match binding.guard {
            Guard::None => None,
            Guard::Literal(condition) => Some(condition.to_string()),
            Guard::Builder(build) => match build(&handler.arguments) {
                Some(condition) => Some(condition),
                None => {
                    return comment_line(
                        0,
                        &format!(
                            "skipped handler '{}': missing event argument",
                            handler.event_name
                        ),
                    )
                }
            },
        };

        let mut out = line(
            0,
            &format!(
                "runtime.on({}, self, async ({}) => {{",
                quote(binding.target_event),
                binding.bound_param.unwrap_or_default()
            ),
        );
        let body_indent = 1 + binding.extra_indent;
        let body = self
            .statements
            .emit_block(&handler.handler_body, body_indent, self.ctx());
        match guard {
            Some(condition) => {
                out.push_str(&line(1, &format!("if ({}) {{", condition)));
                out.push_str(&body);
                out.push_str(&line(1, "}"));
            }
            None => out.push_str(&body),
        }
        out.push_str(&line(0, "});"));
        out
    }
}

fn has_return(rendered: &str) -> bool {
    rendered.lines().map(str::trim).any(|l| l == "return;" || l.starts_with("return "))
}

/// Getter of a variable written by `node` itself, ignoring nested branches.
fn assigned_variable(node: &Node) -> Option<String> {
    match node.block_type.as_str() {
        "set_func_variable" | "change_func_variable" => node
            .literal(0)
            .map(|_| local_variable_ident(node).to_string()),
        "set_variable" | "change_variable" => variable_getter(node).ok(),
        _ => None,
    }
}

/// The most recently assigned variable when reading `nodes` backwards. Later
/// branches are searched before earlier ones, so an `else` that assigns wins
/// over an `if` that does not.
fn last_assigned(nodes: &[Node]) -> Option<String> {
    nodes.iter().rev().find_map(|node| {
        assigned_variable(node).or_else(|| {
            node.statements
                .iter()
                .rev()
                .find_map(|branch| last_assigned(branch))
        })
    })
}
