use super::CodegenContext;
use crate::ast::{Argument, Node};
use crate::ident::Identifier;
use crate::parser::{local_variable_ident, param_ident};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

pub const PREC_TOP: u8 = 0;
pub const PREC_OR: u8 = 1;
pub const PREC_AND: u8 = 2;
pub const PREC_COMPARE: u8 = 3;
pub const PREC_ADD: u8 = 4;
pub const PREC_MUL: u8 = 5;
pub const PREC_UNARY: u8 = 6;
pub const PREC_ATOM: u8 = 7;

// Besides parameter and local variable references.
pub const VALUE_BLOCKS: &[&str] = &[
    "number",
    "text",
    "True",
    "False",
    "calc_basic",
    "quotient_and_mod",
    "calc_operation",
    "calc_rand",
    "boolean_basic_operator",
    "boolean_and_or",
    "boolean_not",
    "length_of_string",
    "combine_something",
    "char_at",
    "substring",
    "change_string_case",
    "index_of_string",
    "replace_string",
    "reverse_of_string",
    "value_of_index_from_list",
    "length_of_list",
    "is_included_in_list",
    "get_value_from_table",
    "coordinate_mouse",
    "coordinate_object",
    "get_canvas_input_value",
    "is_press_some_key",
    "is_clicked",
    "get_date",
    "get_variable",
    "get_func_variable",
];

static FUNCTION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^func_(?P<id>[A-Za-z0-9_$]+)$").expect("call pattern"));

static NUMERIC_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sign>[+-])?(?:(?P<radix>0[xX][0-9a-fA-F]+|0[oO][0-7]+|0[bB][01]+)|(?P<int>[0-9]*)(?P<rest>(?:\.[0-9]*)?(?:[eE][+-]?[0-9]+)?))$",
    )
    .expect("numeric literal pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprFailure {
    #[error("unsupported expression '{0}'")]
    Unsupported(String),
    #[error("'{block_type}' is missing argument {index}")]
    MissingArgument { block_type: String, index: usize },
}

impl ExprFailure {
    pub fn block_type(&self) -> &str {
        match self {
            ExprFailure::Unsupported(block_type) => block_type,
            ExprFailure::MissingArgument { block_type, .. } => block_type,
        }
    }

    fn missing(node: &Node, index: usize) -> Self {
        ExprFailure::MissingArgument {
            block_type: node.block_type.clone(),
            index,
        }
    }
}

pub type ExprResult = Result<String, ExprFailure>;

struct Rendered {
    text: String,
    rank: u8,
}

impl Rendered {
    fn new(text: String, rank: u8) -> Self {
        Self { text, rank }
    }

    fn atom(text: String) -> Self {
        Self::new(text, PREC_ATOM)
    }

    fn wrap(self, parent: u8) -> String {
        if self.rank < parent {
            format!("({})", self.text)
        } else {
            self.text
        }
    }
}

pub fn emit_expr(arg: &Argument, ctx: CodegenContext<'_>, parent: u8) -> ExprResult {
    match arg {
        Argument::Literal(value) => Ok(render_literal(value)),
        Argument::Expression(node) => emit_node(node, ctx, parent),
    }
}

pub fn emit_node(node: &Node, ctx: CodegenContext<'_>, parent: u8) -> ExprResult {
    Ok(render_node(node, ctx)?.wrap(parent))
}

// Calls to user functions count as statements even when they return a value.
pub fn is_value_block(node: &Node) -> bool {
    callee_id(node).is_none()
        && (node.param_id.is_some() || VALUE_BLOCKS.contains(&node.block_type.as_str()))
}

// The explicit `funcId` field, else the id embedded in a `func_<id>` type tag.
pub fn callee_id(node: &Node) -> Option<String> {
    node.func_id.clone().or_else(|| {
        FUNCTION_CALL
            .captures(&node.block_type)
            .map(|caps| caps["id"].to_string())
    })
}

pub fn callee_ident(func_id: &str) -> Identifier {
    Identifier::from_source_id("f", Some(func_id))
}

pub fn call_arguments(node: &Node, ctx: CodegenContext<'_>) -> ExprResult {
    let mut args = vec!["self".to_string()];
    for arg in &node.arguments {
        args.push(emit_expr(arg, ctx, PREC_TOP)?);
    }
    Ok(args.join(", "))
}

fn render_node(node: &Node, ctx: CodegenContext<'_>) -> Result<Rendered, ExprFailure> {
    if node.param_id.is_some() {
        return Ok(Rendered::atom(param_ident(node).to_string()));
    }
    if let Some(func_id) = callee_id(node) {
        return Ok(Rendered::atom(format!(
            "(await Func.{}({}))",
            callee_ident(&func_id),
            call_arguments(node, ctx)?
        )));
    }

    let rendered = match node.block_type.as_str() {
        "number" | "text" => match node.argument(0) {
            Some(arg) => Rendered::atom(emit_expr(arg, ctx, PREC_ATOM)?),
            None if node.block_type == "text" => Rendered::atom("\"\"".to_string()),
            None => return Err(ExprFailure::missing(node, 0)),
        },
        "True" => Rendered::atom("true".to_string()),
        "False" => Rendered::atom("false".to_string()),
        "calc_basic" => {
            let (op, rank) = match operator_token(node).as_deref() {
                Some("PLUS") => ("+", PREC_ADD),
                Some("MINUS") => ("-", PREC_ADD),
                Some("MULTI") => ("*", PREC_MUL),
                Some("DIVIDE") => ("/", PREC_MUL),
                _ => return Err(unsupported_variant(node)),
            };
            left_assoc(node, op, rank, ctx)?
        }
        "boolean_basic_operator" => {
            let op = match operator_token(node).as_deref() {
                Some("EQUAL") => "==",
                Some("NOT_EQUAL") => "!=",
                Some("GREATER") => ">",
                Some("LESS") => "<",
                Some("GREATER_OR_EQUAL") => ">=",
                Some("LESS_OR_EQUAL") => "<=",
                _ => return Err(unsupported_variant(node)),
            };
            let [left, right] = operands(node)?;
            Rendered::new(
                format!(
                    "{} {} {}",
                    emit_expr(left, ctx, PREC_COMPARE + 1)?,
                    op,
                    emit_expr(right, ctx, PREC_COMPARE + 1)?
                ),
                PREC_COMPARE,
            )
        }
        "boolean_and_or" => match operator_token(node).as_deref() {
            Some("AND") => left_assoc(node, "&&", PREC_AND, ctx)?,
            Some("OR") => left_assoc(node, "||", PREC_OR, ctx)?,
            _ => return Err(unsupported_variant(node)),
        },
        "boolean_not" => Rendered::new(
            format!("!{}", operand(node, 0, ctx, PREC_UNARY)?),
            PREC_UNARY,
        ),
        "quotient_and_mod" => match operator_token(node).as_deref() {
            Some("QUOTIENT") => {
                let [left, right] = operands(node)?;
                Rendered::atom(format!(
                    "Math.floor({} / {})",
                    emit_expr(left, ctx, PREC_MUL)?,
                    emit_expr(right, ctx, PREC_MUL + 1)?
                ))
            }
            Some("MOD") => left_assoc(node, "%", PREC_MUL, ctx)?,
            _ => return Err(unsupported_variant(node)),
        },
        "calc_operation" => math_operation(node, ctx)?,
        "calc_rand" => Rendered::atom(format!(
            "runtime.random({}, {})",
            operand(node, 0, ctx, PREC_TOP)?,
            operand(node, 1, ctx, PREC_TOP)?
        )),
        "length_of_string" => {
            Rendered::atom(format!("String({}).length", operand(node, 0, ctx, PREC_TOP)?))
        }
        "combine_something" => Rendered::new(
            format!(
                "String({}) + String({})",
                operand(node, 0, ctx, PREC_TOP)?,
                operand(node, 1, ctx, PREC_TOP)?
            ),
            PREC_ADD,
        ),
        "char_at" => Rendered::atom(format!(
            "String({}).charAt({} - 1)",
            operand(node, 0, ctx, PREC_TOP)?,
            operand(node, 1, ctx, PREC_ADD)?
        )),
        "substring" => Rendered::atom(format!(
            "String({}).substring({} - 1, {})",
            operand(node, 0, ctx, PREC_TOP)?,
            operand(node, 1, ctx, PREC_ADD)?,
            operand(node, 2, ctx, PREC_TOP)?
        )),
        "change_string_case" => {
            let method = match node.literal(1).as_deref() {
                Some("toUpperCase") | Some("upper") => "toUpperCase",
                Some("toLowerCase") | Some("lower") => "toLowerCase",
                _ => return Err(unsupported_variant(node)),
            };
            Rendered::atom(format!(
                "String({}).{}()",
                operand(node, 0, ctx, PREC_TOP)?,
                method
            ))
        }
        "index_of_string" => Rendered::new(
            format!(
                "String({}).indexOf(String({})) + 1",
                operand(node, 0, ctx, PREC_TOP)?,
                operand(node, 1, ctx, PREC_TOP)?
            ),
            PREC_ADD,
        ),
        "replace_string" => Rendered::atom(format!(
            "String({}).replaceAll(String({}), String({}))",
            operand(node, 0, ctx, PREC_TOP)?,
            operand(node, 1, ctx, PREC_TOP)?,
            operand(node, 2, ctx, PREC_TOP)?
        )),
        "reverse_of_string" => Rendered::atom(format!(
            "[...String({})].reverse().join(\"\")",
            operand(node, 0, ctx, PREC_TOP)?
        )),
        "value_of_index_from_list" => Rendered::atom(format!(
            "runtime.list({}).get({})",
            id_literal(node, 0)?,
            operand(node, 1, ctx, PREC_TOP)?
        )),
        "length_of_list" => {
            Rendered::atom(format!("runtime.list({}).length", id_literal(node, 0)?))
        }
        "is_included_in_list" => Rendered::atom(format!(
            "runtime.list({}).includes({})",
            id_literal(node, 0)?,
            operand(node, 1, ctx, PREC_TOP)?
        )),
        "get_value_from_table" => Rendered::atom(format!(
            "runtime.table({}).get({}, {})",
            id_literal(node, 0)?,
            operand(node, 1, ctx, PREC_TOP)?,
            operand(node, 2, ctx, PREC_TOP)?
        )),
        "coordinate_mouse" => match node.literal(0).as_deref() {
            Some(axis @ ("x" | "y")) => Rendered::atom(format!("runtime.mouse.{}", axis)),
            _ => return Err(unsupported_variant(node)),
        },
        "coordinate_object" => {
            let target = node
                .literal(0)
                .ok_or_else(|| ExprFailure::missing(node, 0))?;
            let property = match node.literal(1).as_deref() {
                Some("x") => "x",
                Some("y") => "y",
                Some("rotation") => "rotation",
                Some("direction") => "direction",
                Some("size") => "size",
                Some("picture_index") => "costumeIndex",
                Some("picture_name") => "costumeName",
                _ => return Err(unsupported_variant(node)),
            };
            Rendered::atom(format!("{}.{}", object_ref(&target), property))
        }
        "get_canvas_input_value" => Rendered::atom("runtime.answer".to_string()),
        "is_press_some_key" => Rendered::atom(format!(
            "runtime.isKeyPressed({})",
            operand(node, 0, ctx, PREC_TOP)?
        )),
        "is_clicked" => Rendered::atom("runtime.mouse.pressed".to_string()),
        "get_date" => date_part(node)?,
        "get_variable" => Rendered::atom(variable_getter(node)?),
        "get_func_variable" => {
            if node.literal(0).is_none() {
                return Err(ExprFailure::missing(node, 0));
            }
            Rendered::atom(local_variable_ident(node).to_string())
        }
        other => return Err(ExprFailure::Unsupported(other.to_string())),
    };
    Ok(rendered)
}

fn left_assoc(
    node: &Node,
    op: &str,
    rank: u8,
    ctx: CodegenContext<'_>,
) -> Result<Rendered, ExprFailure> {
    let [left, right] = operands(node)?;
    Ok(Rendered::new(
        format!(
            "{} {} {}",
            emit_expr(left, ctx, rank)?,
            op,
            emit_expr(right, ctx, rank + 1)?
        ),
        rank,
    ))
}

// Collapsed `null` slots shift the operator's position.
fn operator_token(node: &Node) -> Option<String> {
    node.arguments.iter().find_map(|arg| match arg {
        Argument::Literal(Value::String(s)) if is_operator_token(s) => Some(s.clone()),
        _ => None,
    })
}

fn is_operator_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

fn operands(node: &Node) -> Result<[&Argument; 2], ExprFailure> {
    let mut found = node.arguments.iter().filter(|arg| {
        !matches!(arg, Argument::Literal(Value::String(s)) if is_operator_token(s))
    });
    let left = found.next().ok_or_else(|| ExprFailure::missing(node, 0))?;
    let right = found.next().ok_or_else(|| ExprFailure::missing(node, 1))?;
    Ok([left, right])
}

fn operand(node: &Node, index: usize, ctx: CodegenContext<'_>, parent: u8) -> ExprResult {
    let arg = node
        .argument(index)
        .ok_or_else(|| ExprFailure::missing(node, index))?;
    emit_expr(arg, ctx, parent)
}

fn unsupported_variant(node: &Node) -> ExprFailure {
    let variant = node
        .arguments
        .iter()
        .filter_map(Argument::literal_text)
        .last()
        .unwrap_or_default();
    ExprFailure::Unsupported(format!("{}:{}", node.block_type, variant))
}

fn math_operation(node: &Node, ctx: CodegenContext<'_>) -> Result<Rendered, ExprFailure> {
    let op = node
        .literal(1)
        .ok_or_else(|| ExprFailure::missing(node, 1))?;
    let value = |prec| operand(node, 0, ctx, prec);
    let rendered = match op.as_str() {
        "square" => Rendered::new(format!("{} * {}", value(PREC_MUL)?, value(PREC_MUL + 1)?), PREC_MUL),
        "root" => Rendered::atom(format!("Math.sqrt({})", value(PREC_TOP)?)),
        "sin" | "cos" | "tan" => Rendered::atom(format!(
            "Math.{}({} * Math.PI / 180)",
            op,
            value(PREC_MUL)?
        )),
        "asin_radian" | "acos_radian" | "atan_radian" => Rendered::new(
            format!(
                "Math.{}({}) * 180 / Math.PI",
                op.trim_end_matches("_radian"),
                value(PREC_TOP)?
            ),
            PREC_MUL,
        ),
        "log" => Rendered::atom(format!("Math.log10({})", value(PREC_TOP)?)),
        "ln" => Rendered::atom(format!("Math.log({})", value(PREC_TOP)?)),
        "floor" | "ceil" | "round" | "abs" => {
            Rendered::atom(format!("Math.{}({})", op, value(PREC_TOP)?))
        }
        "factorial" => Rendered::atom(format!("runtime.factorial({})", value(PREC_TOP)?)),
        _ => return Err(unsupported_variant(node)),
    };
    Ok(rendered)
}

fn date_part(node: &Node) -> Result<Rendered, ExprFailure> {
    let rendered = match node.literal(0).as_deref() {
        Some("YEAR") => Rendered::atom("new Date().getFullYear()".to_string()),
        Some("MONTH") => Rendered::new("new Date().getMonth() + 1".to_string(), PREC_ADD),
        Some("DAY") => Rendered::atom("new Date().getDate()".to_string()),
        Some("HOUR") => Rendered::atom("new Date().getHours()".to_string()),
        Some("MINUTE") => Rendered::atom("new Date().getMinutes()".to_string()),
        Some("SECOND") => Rendered::atom("new Date().getSeconds()".to_string()),
        _ => return Err(unsupported_variant(node)),
    };
    Ok(rendered)
}

pub fn id_literal(node: &Node, index: usize) -> ExprResult {
    node.literal(index)
        .map(|id| quote(&id))
        .ok_or_else(|| ExprFailure::missing(node, index))
}

pub fn variable_getter(node: &Node) -> ExprResult {
    Ok(format!("runtime.getVariable({})", id_literal(node, 0)?))
}

pub fn object_ref(target: &str) -> String {
    if target == "self" {
        "self".to_string()
    } else {
        format!("runtime.object({})", quote(target))
    }
}

pub fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => render_text_literal(s),
        other => other.to_string(),
    }
}

pub fn render_text_literal(text: &str) -> String {
    numeric_literal(text).unwrap_or_else(|| quote(text))
}

fn numeric_literal(text: &str) -> Option<String> {
    let caps = NUMERIC_LITERAL.captures(text)?;
    let sign = match caps.name("sign").map(|m| m.as_str()) {
        Some("-") => "-",
        _ => "",
    };
    if let Some(radix) = caps.name("radix") {
        return Some(format!("{}{}", sign, radix.as_str().to_ascii_lowercase()));
    }
    let int = caps.name("int").map_or("", |m| m.as_str());
    let rest = caps.name("rest").map_or("", |m| m.as_str());
    let fraction_digits = rest
        .strip_prefix('.')
        .map(|r| r.split(['e', 'E']).next().unwrap_or(""));
    if int.is_empty() && fraction_digits.map_or(true, str::is_empty) {
        return None;
    }
    let trimmed = int.trim_start_matches('0');
    let int = if trimmed.is_empty() { "0" } else { trimmed };
    Some(format!("{}{}{}", sign, int, rest))
}
