use super::expr::{quote, render_text_literal};
use crate::ast::Argument;

/// Extra condition wrapped around a handler body.
#[derive(Clone, Copy)]
pub enum Guard {
    None,
    Literal(&'static str),
    /// Builds the condition from the start block's arguments. `None` means a
    /// required argument is missing and the handler cannot be bound.
    Builder(fn(&[Argument]) -> Option<String>),
}

#[derive(Clone, Copy)]
pub struct EventBinding {
    pub target_event: &'static str,
    pub bound_param: Option<&'static str>,
    pub guard: Guard,
    /// Levels the body sits below the callback's own indentation.
    pub extra_indent: usize,
}

const fn plain(target_event: &'static str) -> EventBinding {
    EventBinding {
        target_event,
        bound_param: None,
        guard: Guard::None,
        extra_indent: 0,
    }
}

const EVENT_BINDINGS: &[(&str, EventBinding)] = &[
    ("when_run_button_click", plain("start")),
    (
        "when_some_key_pressed",
        EventBinding {
            target_event: "keydown",
            bound_param: Some("key"),
            guard: Guard::Builder(key_guard),
            extra_indent: 1,
        },
    ),
    ("when_object_click", plain("click")),
    ("when_object_click_canceled", plain("clickEnd")),
    ("mouse_clicked", plain("mouseDown")),
    ("mouse_click_cancled", plain("mouseUp")),
    (
        "when_message_cast",
        EventBinding {
            target_event: "message",
            bound_param: Some("messageId"),
            guard: Guard::Builder(message_guard),
            extra_indent: 1,
        },
    ),
    ("when_scene_start", plain("sceneStart")),
    (
        "when_clone_start",
        EventBinding {
            target_event: "cloneStart",
            bound_param: None,
            guard: Guard::Literal("self.isClone"),
            extra_indent: 1,
        },
    ),
];

pub fn binding(event_name: &str) -> Option<&'static EventBinding> {
    EVENT_BINDINGS
        .iter()
        .find(|(name, _)| *name == event_name)
        .map(|(_, binding)| binding)
}

fn first_literal(arguments: &[Argument]) -> Option<String> {
    arguments
        .iter()
        .find_map(Argument::literal_text)
        .filter(|text| !text.is_empty())
}

fn key_guard(arguments: &[Argument]) -> Option<String> {
    first_literal(arguments).map(|key| format!("key === {}", render_text_literal(&key)))
}

fn message_guard(arguments: &[Argument]) -> Option<String> {
    first_literal(arguments).map(|id| format!("messageId === {}", quote(&id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn guard_text(event: &str, args: &[Argument]) -> Option<String> {
        match binding(event).expect("bound event").guard {
            Guard::Builder(build) => build(args),
            Guard::Literal(text) => Some(text.to_string()),
            Guard::None => None,
        }
    }

    #[test]
    fn key_and_message_guards_use_the_start_block_literal() {
        assert_eq!(
            guard_text("when_some_key_pressed", &[Argument::Literal(json!("81"))]).as_deref(),
            Some("key === 81")
        );
        assert_eq!(
            guard_text("when_message_cast", &[Argument::Literal(json!("m1"))]).as_deref(),
            Some("messageId === \"m1\"")
        );
    }

    #[test]
    fn missing_guard_argument_yields_none() {
        assert_eq!(guard_text("when_message_cast", &[]), None);
        assert_eq!(
            guard_text("when_some_key_pressed", &[Argument::Literal(Value::Null)]),
            None
        );
    }

    #[test]
    fn unknown_events_have_no_binding() {
        assert!(binding("when_moon_rises").is_none());
        assert_eq!(binding("mouse_clicked").map(|b| b.target_event), Some("mouseDown"));
        assert_eq!(binding("when_clone_start").map(|b| b.extra_indent), Some(1));
    }
}
