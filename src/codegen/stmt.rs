use super::expr::{
    call_arguments, callee_id, callee_ident, emit_expr, id_literal, ExprFailure, ExprResult,
    PREC_TOP, PREC_UNARY,
};
use super::CodegenContext;
use crate::ast::Node;
use crate::ident::sanitize;
use crate::parser::local_variable_ident;
use std::collections::HashMap;

pub const INDENT: &str = "    ";

// Blocks that already hand control back to the scheduler.
const SUSPENDING_BLOCKS: &[&str] = &[
    "wait_second",
    "wait_until_true",
    "locate_xy_time",
    "move_xy_time",
    "rotate_by_time",
    "direction_relative_duration",
    "dialog_time",
    "ask_and_wait",
    "message_cast_wait",
    "sound_something_wait_with_block",
    "sound_something_second_wait_with_block",
];

#[derive(Debug, Clone, Copy)]
pub enum Input {
    Expr(usize),
    // Quoted variable, list or message id.
    Id(usize),
    Local(usize),
}

pub type Render = fn(&Node, &[String]) -> String;
pub type ControlRender = fn(&StatementTable, &Node, usize, CodegenContext<'_>) -> String;

pub enum StatementRule {
    // Any input failure replaces the whole statement with one comment line.
    Safe {
        inputs: &'static [Input],
        render: Render,
    },
    Control(ControlRender),
}

pub struct StatementTable {
    rules: HashMap<&'static str, StatementRule>,
}

impl Default for StatementTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTable {
    pub fn new() -> Self {
        let mut table = Self {
            rules: HashMap::new(),
        };
        table.register_motion();
        table.register_looks();
        table.register_sound();
        table.register_flow();
        table.register_data();
        table.register_misc();
        table
    }

    pub fn insert(&mut self, block_type: &'static str, rule: StatementRule) {
        self.rules.insert(block_type, rule);
    }

    fn safe(&mut self, block_type: &'static str, inputs: &'static [Input], render: Render) {
        self.insert(block_type, StatementRule::Safe { inputs, render });
    }

    fn control(&mut self, block_type: &'static str, render: ControlRender) {
        self.insert(block_type, StatementRule::Control(render));
    }

    pub fn emit(&self, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
        match self.rules.get(node.block_type.as_str()) {
            Some(StatementRule::Safe { inputs, render }) => match resolve(node, inputs, ctx) {
                Ok(values) => lines(indent, &render(node, &values)),
                Err(failure) => skip_line(indent, node, &failure),
            },
            Some(StatementRule::Control(render)) => render(self, node, indent, ctx),
            None if callee_id(node).is_some() => emit_call(node, indent, ctx),
            None => comment_line(
                indent,
                &format!("TODO: unsupported block '{}'", node.block_type),
            ),
        }
    }

    pub fn emit_block(&self, nodes: &[Node], indent: usize, ctx: CodegenContext<'_>) -> String {
        nodes
            .iter()
            .map(|node| self.emit(node, indent, ctx))
            .collect()
    }

    fn register_motion(&mut self) {
        self.safe("move_direction", &[Input::Expr(0)], |_, v| format!("self.move({});", v[0]));
        self.safe("move_x", &[Input::Expr(0)], |_, v| format!("self.x += {};", v[0]));
        self.safe("move_y", &[Input::Expr(0)], |_, v| format!("self.y += {};", v[0]));
        self.safe("locate_x", &[Input::Expr(0)], |_, v| format!("self.x = {};", v[0]));
        self.safe("locate_y", &[Input::Expr(0)], |_, v| format!("self.y = {};", v[0]));
        self.safe("locate_xy", &[Input::Expr(0), Input::Expr(1)], |_, v| {
            format!("self.setXY({}, {});", v[0], v[1])
        });
        self.safe("locate", &[Input::Expr(0)], |_, v| format!("self.goTo({});", v[0]));
        self.safe(
            "locate_xy_time",
            &[Input::Expr(0), Input::Expr(1), Input::Expr(2)],
            |_, v| format!("await self.glideTo({}, {}, {});", v[1], v[2], v[0]),
        );
        self.safe(
            "move_xy_time",
            &[Input::Expr(0), Input::Expr(1), Input::Expr(2)],
            |_, v| format!("await self.glideBy({}, {}, {});", v[1], v[2], v[0]),
        );
        self.safe("rotate_relative", &[Input::Expr(0)], |_, v| {
            format!("self.rotation += {};", v[0])
        });
        self.safe("direction_relative", &[Input::Expr(0)], |_, v| {
            format!("self.direction += {};", v[0])
        });
        self.safe("rotate_absolute", &[Input::Expr(0)], |_, v| {
            format!("self.rotation = {};", v[0])
        });
        self.safe("direction_absolute", &[Input::Expr(0)], |_, v| {
            format!("self.direction = {};", v[0])
        });
        self.safe("rotate_by_time", &[Input::Expr(0), Input::Expr(1)], |_, v| {
            format!("await self.rotateBy({}, {});", v[1], v[0])
        });
        self.safe(
            "direction_relative_duration",
            &[Input::Expr(0), Input::Expr(1)],
            |_, v| format!("await self.turnBy({}, {});", v[1], v[0]),
        );
        self.safe("see_angle_object", &[Input::Expr(0)], |_, v| {
            format!("self.pointTowards({});", v[0])
        });
        self.safe("bounce_wall", &[], |_, _| "self.bounceOnEdge();".to_string());
    }

    fn register_looks(&mut self) {
        self.safe("dialog", &[Input::Expr(0)], |node, v| {
            format!("self.{}({});", speech_method(node, 1), v[0])
        });
        self.safe("dialog_time", &[Input::Expr(0), Input::Expr(1)], |node, v| {
            format!("await self.{}For({}, {});", speech_method(node, 2), v[0], v[1])
        });
        self.safe("remove_dialog", &[], |_, _| "self.say(\"\");".to_string());
        self.safe("show", &[], |_, _| "self.visible = true;".to_string());
        self.safe("hide", &[], |_, _| "self.visible = false;".to_string());
        self.safe("change_to_next_shape", &[], |node, _| match node.literal(0).as_deref() {
            Some("prev") => "self.previousCostume();".to_string(),
            _ => "self.nextCostume();".to_string(),
        });
        self.safe("change_to_some_shape", &[Input::Expr(0)], |_, v| {
            format!("self.setCostume({});", v[0])
        });
        self.safe("add_effect_amount", &[Input::Expr(0), Input::Expr(1)], |_, v| {
            format!("self.changeEffect({}, {});", v[0], v[1])
        });
        self.safe("change_effect_amount", &[Input::Expr(0), Input::Expr(1)], |_, v| {
            format!("self.setEffect({}, {});", v[0], v[1])
        });
        self.safe("erase_all_effects", &[], |_, _| "self.clearEffects();".to_string());
        self.safe("change_scale_size", &[Input::Expr(0)], |_, v| {
            format!("self.size += {};", v[0])
        });
        self.safe("set_scale_size", &[Input::Expr(0)], |_, v| format!("self.size = {};", v[0]));
        self.safe("start_drawing", &[], |_, _| "self.pen.down();".to_string());
        self.safe("stop_drawing", &[], |_, _| "self.pen.up();".to_string());
        self.safe("brush_erase_all", &[], |_, _| "self.pen.clear();".to_string());
        self.safe("brush_stamp", &[], |_, _| "self.stamp();".to_string());
        self.safe("set_color", &[Input::Expr(0)], |_, v| format!("self.pen.color = {};", v[0]));
        self.safe("change_thickness", &[Input::Expr(0)], |_, v| {
            format!("self.pen.size += {};", v[0])
        });
        self.safe("set_thickness", &[Input::Expr(0)], |_, v| {
            format!("self.pen.size = {};", v[0])
        });
    }

    fn register_sound(&mut self) {
        self.safe("sound_something_with_block", &[Input::Expr(0)], |_, v| {
            format!("runtime.playSound({});", v[0])
        });
        self.safe(
            "sound_something_second_with_block",
            &[Input::Expr(0), Input::Expr(1)],
            |_, v| format!("runtime.playSoundFor({}, {});", v[0], v[1]),
        );
        self.safe("sound_something_wait_with_block", &[Input::Expr(0)], |_, v| {
            format!("await runtime.playSoundAndWait({});", v[0])
        });
        self.safe(
            "sound_something_second_wait_with_block",
            &[Input::Expr(0), Input::Expr(1)],
            |_, v| format!("await runtime.playSoundFor({}, {});", v[0], v[1]),
        );
        self.safe("sound_silent_all", &[], |_, _| "runtime.stopAllSounds();".to_string());
        self.safe("sound_volume_change", &[Input::Expr(0)], |_, v| {
            format!("runtime.volume += {};", v[0])
        });
        self.safe("sound_volume_set", &[Input::Expr(0)], |_, v| {
            format!("runtime.volume = {};", v[0])
        });
    }

    fn register_flow(&mut self) {
        self.safe("wait_second", &[Input::Expr(0)], |_, v| {
            format!("await runtime.wait({});", v[0])
        });
        self.safe("stop_repeat", &[], |_, _| "break;".to_string());
        self.safe("continue_repeat", &[], |_, _| "continue;".to_string());
        self.safe("stop_object", &[], |node, _| match node.literal(0).as_deref() {
            Some("thisThread") => "return;".to_string(),
            Some("otherThread") => "runtime.stopOtherThreads(self);".to_string(),
            Some("thisOnly") | Some("thisObject") => {
                "runtime.stopObject(self);\nreturn;".to_string()
            }
            _ => "runtime.stopAll();\nreturn;".to_string(),
        });
        self.safe("create_clone", &[Input::Expr(0)], |_, v| {
            format!("runtime.createClone({});", v[0])
        });
        self.safe("delete_clone", &[], |_, _| "self.deleteClone();\nreturn;".to_string());
        self.safe("message_cast", &[Input::Id(0)], |_, v| {
            format!("runtime.broadcast({});", v[0])
        });
        self.safe("message_cast_wait", &[Input::Id(0)], |_, v| {
            format!("await runtime.broadcastAndWait({});", v[0])
        });
        self.safe("start_scene", &[Input::Id(0)], |_, v| {
            format!("runtime.startScene({});", v[0])
        });
        self.safe("start_neighbor_scene", &[Input::Expr(0)], |_, v| {
            format!("runtime.startNeighborScene({});", v[0])
        });

        self.control("repeat_basic", emit_repeat);
        self.control("repeat_inf", emit_forever);
        self.control("repeat_while_true", emit_repeat_while);
        self.control("wait_until_true", emit_wait_until);
        self.control("_if", emit_if);
        self.control("if_else", emit_if_else);
    }

    fn register_data(&mut self) {
        self.safe("set_variable", &[Input::Id(0), Input::Expr(1)], |_, v| {
            format!("runtime.setVariable({}, {});", v[0], v[1])
        });
        self.safe("change_variable", &[Input::Id(0), Input::Expr(1)], |_, v| {
            format!("runtime.changeVariable({}, {});", v[0], v[1])
        });
        self.safe("show_variable", &[Input::Id(0)], |_, v| {
            format!("runtime.showVariable({});", v[0])
        });
        self.safe("hide_variable", &[Input::Id(0)], |_, v| {
            format!("runtime.hideVariable({});", v[0])
        });
        self.safe("set_func_variable", &[Input::Local(0), Input::Expr(1)], |_, v| {
            format!("{} = {};", v[0], v[1])
        });
        self.safe("change_func_variable", &[Input::Local(0), Input::Expr(1)], |_, v| {
            format!("{} += {};", v[0], v[1])
        });
        self.safe("add_value_to_list", &[Input::Expr(0), Input::Id(1)], |_, v| {
            format!("runtime.list({}).push({});", v[1], v[0])
        });
        self.safe("remove_value_from_list", &[Input::Expr(0), Input::Id(1)], |_, v| {
            format!("runtime.list({}).removeAt({});", v[1], v[0])
        });
        self.safe(
            "insert_value_to_list",
            &[Input::Expr(0), Input::Id(1), Input::Expr(2)],
            |_, v| format!("runtime.list({}).insertAt({}, {});", v[1], v[2], v[0]),
        );
        self.safe(
            "change_value_list_index",
            &[Input::Id(0), Input::Expr(1), Input::Expr(2)],
            |_, v| format!("runtime.list({}).set({}, {});", v[0], v[1], v[2]),
        );
        self.safe("show_list", &[Input::Id(0)], |_, v| format!("runtime.showList({});", v[0]));
        self.safe("hide_list", &[Input::Id(0)], |_, v| format!("runtime.hideList({});", v[0]));
    }

    fn register_misc(&mut self) {
        self.safe("ask_and_wait", &[Input::Expr(0)], |_, v| {
            format!("await runtime.ask({});", v[0])
        });
    }
}

pub fn contains_suspending(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| {
        SUSPENDING_BLOCKS.contains(&node.block_type.as_str())
            || callee_id(node).is_some()
            || node.statements.iter().any(|branch| contains_suspending(branch))
    })
}

pub fn line(indent: usize, text: &str) -> String {
    format!("{}{}\n", INDENT.repeat(indent), text)
}

// Source type tags are untrusted; a line terminator would end the comment early.
pub fn comment_line(indent: usize, text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\u{2028}' | '\u{2029}' => ' ',
            c => c,
        })
        .collect();
    line(indent, &format!("// {}", text))
}

fn lines(indent: usize, text: &str) -> String {
    text.lines().map(|l| line(indent, l)).collect()
}

fn skip_line(indent: usize, node: &Node, failure: &ExprFailure) -> String {
    comment_line(
        indent,
        &format!("skipped {}: {}", node.block_type, failure),
    )
}

fn resolve(node: &Node, inputs: &[Input], ctx: CodegenContext<'_>) -> Result<Vec<String>, ExprFailure> {
    inputs
        .iter()
        .map(|input| match *input {
            Input::Expr(index) => expr_input(node, index, ctx, PREC_TOP),
            Input::Id(index) => id_literal(node, index),
            Input::Local(index) => match node.literal(index) {
                Some(_) => Ok(local_variable_ident(node).to_string()),
                None => Err(ExprFailure::MissingArgument {
                    block_type: node.block_type.clone(),
                    index,
                }),
            },
        })
        .collect()
}

fn expr_input(node: &Node, index: usize, ctx: CodegenContext<'_>, parent: u8) -> ExprResult {
    let arg = node
        .argument(index)
        .ok_or_else(|| ExprFailure::MissingArgument {
            block_type: node.block_type.clone(),
            index,
        })?;
    emit_expr(arg, ctx, parent)
}

fn speech_method(node: &Node, index: usize) -> &'static str {
    match node.literal(index).as_deref() {
        Some("think") => "think",
        _ => "say",
    }
}

fn emit_call(node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let Some(func_id) = callee_id(node) else {
        return comment_line(indent, &format!("TODO: unsupported block '{}'", node.block_type));
    };
    match call_arguments(node, ctx) {
        Ok(args) => line(
            indent,
            &format!("await Func.{}({});", callee_ident(&func_id), args),
        ),
        Err(failure) => skip_line(indent, node, &failure),
    }
}

pub fn loop_counter(node: &Node, ctx: CodegenContext<'_>) -> String {
    match node.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => format!("i{}_{}", ctx.loop_level, sanitize(id)),
        None => format!("i{}", ctx.loop_level),
    }
}

// Holds the iteration count of a `repeat_basic` loop, evaluated once.
fn loop_limit(counter: &str) -> String {
    format!("n{}", &counter[1..])
}

fn contains_continue(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| {
        node.block_type == "continue_repeat"
            || node.statements.iter().any(|branch| contains_continue(branch))
    })
}

// The yield opens the body so that a `continue` cannot jump past it.
fn loop_body(table: &StatementTable, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let body = node.branch(0);
    let mut out = String::new();
    if !contains_suspending(body) || contains_continue(body) {
        out.push_str(&line(indent + 1, "await runtime.yield();"));
    }
    out.push_str(&table.emit_block(body, indent + 1, ctx.nested_loop()));
    out
}

fn emit_repeat(table: &StatementTable, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let count = match expr_input(node, 0, ctx, PREC_TOP) {
        Ok(count) => count,
        Err(failure) => return skip_line(indent, node, &failure),
    };
    let counter = loop_counter(node, ctx);
    let mut out = line(
        indent,
        &format!(
            "for (let {c} = 0, {n} = {count}; {c} < {n}; {c}++) {{",
            c = counter,
            n = loop_limit(&counter),
            count = count
        ),
    );
    out.push_str(&loop_body(table, node, indent, ctx));
    out.push_str(&line(indent, "}"));
    out
}

fn emit_forever(table: &StatementTable, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let mut out = line(indent, "while (true) {");
    out.push_str(&loop_body(table, node, indent, ctx));
    out.push_str(&line(indent, "}"));
    out
}

fn emit_repeat_while(
    table: &StatementTable,
    node: &Node,
    indent: usize,
    ctx: CodegenContext<'_>,
) -> String {
    let until = node.literal(1).as_deref() != Some("while");
    let condition = if until {
        expr_input(node, 0, ctx, PREC_UNARY).map(|c| format!("!{}", c))
    } else {
        expr_input(node, 0, ctx, PREC_TOP)
    };
    let condition = match condition {
        Ok(condition) => condition,
        Err(failure) => return skip_line(indent, node, &failure),
    };
    let mut out = line(indent, &format!("while ({}) {{", condition));
    out.push_str(&loop_body(table, node, indent, ctx));
    out.push_str(&line(indent, "}"));
    out
}

fn emit_wait_until(
    _table: &StatementTable,
    node: &Node,
    indent: usize,
    ctx: CodegenContext<'_>,
) -> String {
    match expr_input(node, 0, ctx, PREC_UNARY) {
        Ok(condition) => {
            let mut out = line(indent, &format!("while (!{}) {{", condition));
            out.push_str(&line(indent + 1, "await runtime.yield();"));
            out.push_str(&line(indent, "}"));
            out
        }
        Err(failure) => skip_line(indent, node, &failure),
    }
}

fn emit_if(table: &StatementTable, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let condition = match expr_input(node, 0, ctx, PREC_TOP) {
        Ok(condition) => condition,
        Err(failure) => return skip_line(indent, node, &failure),
    };
    let mut out = line(indent, &format!("if ({}) {{", condition));
    out.push_str(&table.emit_block(node.branch(0), indent + 1, ctx));
    out.push_str(&line(indent, "}"));
    out
}

fn emit_if_else(table: &StatementTable, node: &Node, indent: usize, ctx: CodegenContext<'_>) -> String {
    let condition = match expr_input(node, 0, ctx, PREC_TOP) {
        Ok(condition) => condition,
        Err(failure) => return skip_line(indent, node, &failure),
    };
    let mut out = line(indent, &format!("if ({}) {{", condition));
    out.push_str(&table.emit_block(node.branch(0), indent + 1, ctx));
    out.push_str(&line(indent, "} else {"));
    out.push_str(&table.emit_block(node.branch(1), indent + 1, ctx));
    out.push_str(&line(indent, "}"));
    out
}
