//! Line-oriented command parser for `deck join`.

use deck_collab::{Command, StylePatch};
use deck_core::{FontStyle, FontWeight, Role, TextAlign};

pub const USAGE: &str = "\
commands:
  add                          add a text block to the current slide
  move <id> <x> <y>            move a block
  resize <id> <width> <height> resize a block
  style <id> [size=N] [weight=bold|normal] [style=italic|normal] [align=left|center|right]
  edit <id>                    start editing a block
  text <id> <content...>       change a block's text (debounced)
  done                         stop editing
  raw <json>                   commit a whole block as JSON
  delete <id>                  delete a block
  select [id]                  select a block, or clear the selection
  slide <index>                go to a slide
  new-slide                    append a slide
  role <user-id> <role>        change a participant's role
  save | leave | reconnect | hide | show | quit";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Missing argument <{0}>")]
    Missing(&'static str),
    #[error("Invalid number for <{name}>: {value}")]
    Number { name: &'static str, value: String },
    #[error("Invalid style option: {0}")]
    Style(String),
    #[error("Invalid JSON: {0}")]
    Json(String),
}

fn arg<'a>(args: &mut impl Iterator<Item = &'a str>, name: &'static str) -> Result<&'a str, ParseError> {
    args.next().ok_or(ParseError::Missing(name))
}

fn number<'a, T: std::str::FromStr>(args: &mut impl Iterator<Item = &'a str>, name: &'static str) -> Result<T, ParseError> {
    let value = arg(args, name)?;
    value.parse().map_err(|_| ParseError::Number {
        name,
        value: value.to_string(),
    })
}

fn style_patch<'a>(options: impl Iterator<Item = &'a str>) -> Result<StylePatch, ParseError> {
    let mut patch = StylePatch::default();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| ParseError::Style(option.to_string()))?;
        match key {
            "size" => {
                patch.font_size = Some(value.parse().map_err(|_| ParseError::Style(option.to_string()))?);
            }
            "weight" => patch.font_weight = Some(FontWeight::parse(value)),
            "style" => patch.font_style = Some(FontStyle::parse(value)),
            "align" => patch.text_align = Some(TextAlign::parse(value)),
            _ => return Err(ParseError::Style(option.to_string())),
        }
    }
    Ok(patch)
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let command = match word {
        "" => return Ok(None),
        "add" => Command::AddTextBlock,
        "move" => Command::MoveTextBlock {
            id: arg(&mut args, "id")?.to_string(),
            x: number(&mut args, "x")?,
            y: number(&mut args, "y")?,
        },
        "resize" => Command::ResizeTextBlock {
            id: arg(&mut args, "id")?.to_string(),
            width: number(&mut args, "width")?,
            height: number(&mut args, "height")?,
        },
        "style" => Command::RestyleTextBlock {
            id: arg(&mut args, "id")?.to_string(),
            style: style_patch(args)?,
        },
        "edit" => Command::BeginEdit {
            id: arg(&mut args, "id")?.to_string(),
        },
        "text" => {
            let id = arg(&mut args, "id")?.to_string();
            let content = rest[id.len()..].trim().to_string();
            Command::EditContent { id, content }
        }
        "done" => Command::EndEdit,
        "raw" => Command::CommitEdit(serde_json::from_str(rest).map_err(|e| ParseError::Json(e.to_string()))?),
        "delete" => Command::DeleteTextBlock {
            id: arg(&mut args, "id")?.to_string(),
        },
        "select" => Command::Select {
            id: args.next().map(str::to_string),
        },
        "slide" => Command::GoToSlide {
            index: number(&mut args, "index")?,
        },
        "new-slide" => Command::AddSlide,
        "role" => Command::ChangeRole {
            user_id: arg(&mut args, "user-id")?.to_string(),
            role: Role::parse(arg(&mut args, "role")?),
        },
        "save" => Command::Save,
        "leave" => Command::Leave,
        "reconnect" => Command::Reconnect,
        "hide" => Command::Visibility { visible: false },
        "show" => Command::Visibility { visible: true },
        "quit" | "exit" => Command::Shutdown,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse("  "), Ok(None));
        assert_eq!(parse("add"), Ok(Some(Command::AddTextBlock)));
        assert_eq!(
            parse("move t1 10 20"),
            Ok(Some(Command::MoveTextBlock {
                id: "t1".into(),
                x: 10,
                y: 20
            }))
        );
        assert_eq!(
            parse("role u2 Editor"),
            Ok(Some(Command::ChangeRole {
                user_id: "u2".into(),
                role: Role::Editor
            }))
        );
        assert_eq!(parse("select"), Ok(Some(Command::Select { id: None })));
        assert_eq!(parse("quit"), Ok(Some(Command::Shutdown)));
    }

    #[test]
    fn test_text_keeps_spacing() {
        assert_eq!(
            parse("text t1 Hello,  world"),
            Ok(Some(Command::EditContent {
                id: "t1".into(),
                content: "Hello,  world".into()
            }))
        );
    }

    #[test]
    fn test_style_options() {
        let Ok(Some(Command::RestyleTextBlock { style, .. })) = parse("style t1 size=24 weight=bold align=center") else {
            panic!("expected restyle");
        };
        assert_eq!(style.font_size, Some(24));
        assert_eq!(style.font_weight, Some(FontWeight::Bold));
        assert_eq!(style.text_align, Some(TextAlign::Center));
        assert_eq!(style.font_style, None);
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("fly"), Err(ParseError::Unknown("fly".into())));
        assert_eq!(parse("move t1"), Err(ParseError::Missing("x")));
        assert!(matches!(parse("move t1 a 2"), Err(ParseError::Number { name: "x", .. })));
        assert!(matches!(parse("style t1 colour=red"), Err(ParseError::Style(_))));
        assert!(matches!(parse("raw {"), Err(ParseError::Json(_))));
    }
}
