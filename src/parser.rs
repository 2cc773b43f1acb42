use crate::ast::{Argument, Declaration, EventHandler, FunctionDefinition, Node, Program};
use crate::ident::Identifier;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashSet;

const START_PREFIXES: &[&str] = &["when_", "message_cast_"];
const START_TYPES: &[&str] = &["mouse_clicked", "mouse_click_cancled"];
const FUNCTION_DEFINITIONS: &[&str] = &["function_create", "function_create_value"];
const PARAM_PREFIXES: &[&str] = &["stringParam_", "booleanParam_"];
const LOCAL_VARIABLE_TYPES: &[&str] = &[
    "get_func_variable",
    "set_func_variable",
    "change_func_variable",
];

pub fn is_start_block(block_type: &str) -> bool {
    START_PREFIXES.iter().any(|p| block_type.starts_with(p)) || START_TYPES.contains(&block_type)
}

/// Decodes a script's outer JSON into its block stacks. `None` when the text
/// is not JSON or is not an array of stacks.
pub fn parse_stacks(raw: &str) -> Option<Vec<Value>> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(stacks)) => Some(stacks),
        Ok(_) => {
            warn!("Script JSON is not an array of block stacks; ignoring it.");
            None
        }
        Err(err) => {
            warn!("Script JSON could not be parsed: {}", err);
            None
        }
    }
}

/// Builds the program of an object script. Never fails: malformed input
/// yields an empty program.
pub fn build_program(raw: &str, object_id: Option<&str>) -> Program {
    ProgramBuilder::new(object_id, None).build(raw)
}

/// Builds a project-level function body, whose definition is named by
/// `function_id` rather than by its block id.
pub fn build_function_program(raw: &str, function_id: &str) -> Program {
    ProgramBuilder::new(None, Some(function_id)).build(raw)
}

struct ProgramBuilder<'a> {
    object_id: Option<&'a str>,
    function_id: Option<&'a str>,
}

impl<'a> ProgramBuilder<'a> {
    fn new(object_id: Option<&'a str>, function_id: Option<&'a str>) -> Self {
        Self {
            object_id,
            function_id,
        }
    }

    fn build(&self, raw: &str) -> Program {
        let Some(stacks) = parse_stacks(raw) else {
            return Program::default();
        };
        let mut program = Program::default();
        for stack in &stacks {
            let Some(blocks) = stack.as_array() else {
                continue;
            };
            let Some(first) = blocks.first() else {
                continue;
            };
            let Some(first_type) = first.get("type").and_then(Value::as_str) else {
                continue;
            };

            if is_start_block(first_type) {
                program
                    .body
                    .push(Declaration::Event(self.build_handler(first_type, blocks)));
            } else if FUNCTION_DEFINITIONS.contains(&first_type) {
                program
                    .body
                    .push(Declaration::Function(self.build_function(first_type, first)));
            } else {
                debug!("Dropping top-level stack starting with '{}'.", first_type);
            }
        }
        program
    }

    fn build_handler(&self, event_name: &str, blocks: &[Value]) -> EventHandler {
        let arguments = self.convert_params(&blocks[0]);
        let handler_body = blocks[1..]
            .iter()
            .filter_map(|block| self.convert_block(block))
            .collect();
        EventHandler {
            event_name: event_name.to_string(),
            arguments,
            handler_body,
        }
    }

    fn build_function(&self, block_type: &str, definition: &Value) -> FunctionDefinition {
        let id = self
            .function_id
            .map(ToString::to_string)
            .or_else(|| string_field(definition, "funcId"))
            .or_else(|| string_field(definition, "id"))
            .unwrap_or_else(|| Identifier::unique("fn").to_string());

        let params = collect_params(raw_params(definition).and_then(|p| p.first()));

        let body: Vec<Node> = definition
            .get("statements")
            .and_then(Value::as_array)
            .and_then(|branches| branches.first())
            .map(|branch| self.convert_stack(branch))
            .unwrap_or_default();

        let mut local_variables = Vec::new();
        let mut seen = HashSet::new();
        for node in &body {
            collect_locals(node, &mut seen, &mut local_variables);
        }

        FunctionDefinition {
            id,
            is_value_returning: block_type == "function_create_value",
            params,
            body,
            local_variables,
        }
    }

    fn convert_stack(&self, stack: &Value) -> Vec<Node> {
        stack
            .as_array()
            .map(|blocks| blocks.iter().filter_map(|b| self.convert_block(b)).collect())
            .unwrap_or_default()
    }

    fn convert_params(&self, block: &Value) -> Vec<Argument> {
        let Some(params) = raw_params(block) else {
            return Vec::new();
        };
        params
            .iter()
            .filter(|param| !param.is_null())
            .map(|param| match self.convert_block(param) {
                Some(node) => Argument::Expression(node),
                None => Argument::Literal(param.clone()),
            })
            .collect()
    }

    fn convert_block(&self, block: &Value) -> Option<Node> {
        let block_type = block.get("type")?.as_str()?;
        let statements = block
            .get("statements")
            .and_then(Value::as_array)
            .map(|branches| branches.iter().map(|b| self.convert_stack(b)).collect())
            .unwrap_or_default();
        let func_id = string_field(block, "funcId").or_else(|| {
            block_type
                .strip_prefix("func_")
                .filter(|suffix| !suffix.is_empty())
                .map(ToString::to_string)
        });
        let param_id = PARAM_PREFIXES
            .iter()
            .any(|p| block_type.starts_with(p))
            .then(|| block_type.to_string());

        Some(Node {
            block_type: block_type.to_string(),
            id: string_field(block, "id"),
            arguments: self.convert_params(block),
            statements,
            func_id,
            param_id,
            object_id: self.object_id.map(ToString::to_string),
        })
    }
}

/// Walks the singly-linked chain of `function_field_*` wrappers. Each wrapper
/// holds its leaf parameter block first and the next wrapper second.
fn collect_params(first_field: Option<&Value>) -> Vec<Identifier> {
    let mut params = Vec::new();
    let mut current = first_field;
    while let Some(field) = current {
        let Some(field_type) = field.get("type").and_then(Value::as_str) else {
            break;
        };
        let field_params = raw_params(field);
        match field_type {
            "function_field_string" | "function_field_boolean" => {
                let leaf_type = field_params
                    .and_then(|p| p.first())
                    .and_then(|leaf| leaf.get("type"))
                    .and_then(Value::as_str);
                params.push(Identifier::from_source_id("p", leaf_type));
            }
            "function_field_label" => {}
            other => {
                debug!("Unexpected function field '{}'; stopping parameter walk.", other);
                break;
            }
        }
        current = field_params
            .and_then(|p| p.get(1))
            .filter(|next| next.is_object());
    }
    params
}

fn collect_locals(node: &Node, seen: &mut HashSet<Identifier>, out: &mut Vec<Identifier>) {
    for argument in &node.arguments {
        if let Argument::Expression(inner) = argument {
            collect_locals(inner, seen, out);
        }
    }
    for branch in &node.statements {
        for inner in branch {
            collect_locals(inner, seen, out);
        }
    }
    if LOCAL_VARIABLE_TYPES.contains(&node.block_type.as_str()) {
        let ident = local_variable_ident(node);
        if seen.insert(ident.clone()) {
            out.push(ident);
        }
    }
}

pub fn local_variable_ident(node: &Node) -> Identifier {
    Identifier::from_source_id("lv", node.literal(0).as_deref())
}

pub fn param_ident(node: &Node) -> Identifier {
    Identifier::from_source_id("p", node.param_id.as_deref())
}

fn raw_params(block: &Value) -> Option<&Vec<Value>> {
    block.get("params").and_then(Value::as_array)
}

fn string_field(block: &Value, key: &str) -> Option<String> {
    block
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn only_function(program: &Program) -> &FunctionDefinition {
        program.functions().next().expect("function declaration")
    }

    #[test]
    fn malformed_json_yields_empty_program() {
        assert!(build_program("{not json", Some("obj")).is_empty());
        assert!(build_program("", Some("obj")).is_empty());
        assert!(build_program("{\"a\": 1}", Some("obj")).is_empty());
    }

    #[test]
    fn start_stack_becomes_handler_with_rest_as_body() {
        let script = json!([[
            {"id": "h", "type": "when_message_cast", "params": [null, "msg1"], "statements": []},
            {"id": "a", "type": "move_direction", "params": [{"id": "n", "type": "number", "params": ["10"]}, null], "statements": []},
            {"id": "b", "type": "show", "params": [], "statements": []}
        ]])
        .to_string();
        let program = build_program(&script, Some("obj1"));
        let handler = program.handlers().next().expect("handler");
        assert_eq!(handler.event_name, "when_message_cast");
        assert_eq!(handler.arguments, vec![Argument::Literal(json!("msg1"))]);
        assert_eq!(handler.handler_body.len(), 2);
        let mover = &handler.handler_body[0];
        assert_eq!(mover.arguments.len(), 1);
        assert_eq!(mover.object_id.as_deref(), Some("obj1"));
        assert_eq!(mover.arguments[0].as_node().map(|n| n.block_type.as_str()), Some("number"));
    }

    #[test]
    fn unattached_and_invalid_stacks_are_dropped() {
        let script = json!([
            [{"type": "move_direction", "params": [], "statements": []}],
            [{"params": []}],
            [],
            "junk"
        ])
        .to_string();
        assert!(build_program(&script, None).is_empty());
    }

    #[test]
    fn branches_keep_their_positions() {
        let script = json!([[
            {"type": "when_run_button_click", "params": [], "statements": []},
            {"type": "if_else", "params": [{"type": "True", "params": []}, null],
             "statements": [[], [{"type": "show", "params": []}]]}
        ]])
        .to_string();
        let program = build_program(&script, None);
        let body = &program.handlers().next().expect("handler").handler_body;
        assert_eq!(body[0].statements.len(), 2);
        assert!(body[0].branch(0).is_empty());
        assert_eq!(body[0].branch(1)[0].block_type, "show");
    }

    #[test]
    fn function_params_follow_the_field_chain() {
        let script = json!([[{
            "id": "def1",
            "type": "function_create_value",
            "params": [{
                "type": "function_field_label",
                "params": ["sum", {
                    "type": "function_field_string",
                    "params": [{"type": "stringParam_ab12", "params": []}, {
                        "type": "function_field_boolean",
                        "params": [{"type": "booleanParam_cd34", "params": []}, null]
                    }]
                }]
            }, null],
            "statements": [[
                {"type": "set_func_variable", "params": ["tmp", {"type": "stringParam_ab12", "params": []}]},
                {"type": "repeat_basic", "params": [{"type": "number", "params": ["3"]}],
                 "statements": [[{"type": "set_func_variable", "params": ["acc", {"type": "get_func_variable", "params": ["tmp"]}]}]]}
            ]]
        }]])
        .to_string();
        let program = build_program(&script, None);
        let def = only_function(&program);
        assert_eq!(def.id, "def1");
        assert!(def.is_value_returning);
        let params: Vec<&str> = def.params.iter().map(Identifier::as_str).collect();
        assert_eq!(params, vec!["p_stringParam_ab12", "p_booleanParam_cd34"]);
        let mut locals: Vec<&str> = def.local_variables.iter().map(Identifier::as_str).collect();
        locals.sort();
        assert_eq!(locals, vec!["lv_acc", "lv_tmp"]);
        assert_eq!(def.body.len(), 2);
    }

    #[test]
    fn explicit_function_id_wins() {
        let script = json!([[{"id": "blk", "type": "function_create", "params": [], "statements": [[]]}]])
            .to_string();
        let program = build_function_program(&script, "fn9");
        assert_eq!(only_function(&program).id, "fn9");
        assert!(!only_function(&program).is_value_returning);
    }

    #[test]
    fn call_targets_come_from_field_or_type_suffix() {
        let script = json!([[
            {"type": "when_run_button_click", "params": []},
            {"type": "func_k3j9", "params": [{"type": "text", "params": ["hi"]}]},
            {"type": "function_general", "funcId": "zz1", "params": []}
        ]])
        .to_string();
        let program = build_program(&script, None);
        let body = &program.handlers().next().expect("handler").handler_body;
        assert_eq!(body[0].func_id.as_deref(), Some("k3j9"));
        assert_eq!(body[1].func_id.as_deref(), Some("zz1"));
    }
}
