use crate::ident::Identifier;
use serde_json::Value;

/// One operand slot of a block: either a raw literal or a nested block.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Value),
    Expression(Node),
}

impl Argument {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Argument::Expression(node) => Some(node),
            Argument::Literal(_) => None,
        }
    }

    /// Textual form of a literal slot, used for dropdown values and ids.
    pub fn literal_text(&self) -> Option<String> {
        match self {
            Argument::Literal(Value::String(s)) => Some(s.clone()),
            Argument::Literal(Value::Number(n)) => Some(n.to_string()),
            Argument::Literal(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub block_type: String,
    pub id: Option<String>,
    pub arguments: Vec<Argument>,
    /// One flat list per branch (`if_else` carries two).
    pub statements: Vec<Vec<Node>>,
    pub func_id: Option<String>,
    pub param_id: Option<String>,
    pub object_id: Option<String>,
}

impl Node {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            ..Self::default()
        }
    }

    pub fn argument(&self, index: usize) -> Option<&Argument> {
        self.arguments.get(index)
    }

    pub fn literal(&self, index: usize) -> Option<String> {
        self.arguments.get(index).and_then(Argument::literal_text)
    }

    pub fn branch(&self, index: usize) -> &[Node] {
        self.statements.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventHandler {
    pub event_name: String,
    pub arguments: Vec<Argument>,
    pub handler_body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub id: String,
    pub is_value_returning: bool,
    pub params: Vec<Identifier>,
    pub body: Vec<Node>,
    pub local_variables: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Event(EventHandler),
    Function(FunctionDefinition),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Declaration>,
}

impl Program {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.body.iter().filter_map(|decl| match decl {
            Declaration::Function(def) => Some(def),
            Declaration::Event(_) => None,
        })
    }

    pub fn handlers(&self) -> impl Iterator<Item = &EventHandler> {
        self.body.iter().filter_map(|decl| match decl {
            Declaration::Event(handler) => Some(handler),
            Declaration::Function(_) => None,
        })
    }
}
