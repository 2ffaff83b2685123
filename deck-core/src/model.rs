//! Document model shared by the local store, the reconciler and the wire.
//!
//! Every type here deserializes leniently: incoming payloads are routed
//! through [`crate::sanitize`], so a value that made it into one of these
//! structs always has canonical field types.

use serde::{Deserialize, Deserializer, Serialize};

use crate::sanitize;

/// Smallest width a text block may have, in pixels.
pub const MIN_WIDTH: u32 = 50;
/// Smallest height a text block may have, in pixels.
pub const MIN_HEIGHT: u32 = 20;
/// Font size used when none (or a non-positive one) is given.
pub const DEFAULT_FONT_SIZE: u32 = 16;
/// Width assigned when the payload carries none.
pub const DEFAULT_WIDTH: u32 = 200;
/// Height assigned when the payload carries none.
pub const DEFAULT_HEIGHT: u32 = 60;

// ───────────────────────────────────────────────────────────────────
// Text styling
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

impl FontWeight {
    /// Parse a CSS-ish weight. `"bold"`, `"bolder"` and numeric weights of
    /// 600 and above are bold, everything else is normal.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "bold" | "bolder" => FontWeight::Bold,
            other => match other.parse::<u32>() {
                Ok(weight) if weight >= 600 => FontWeight::Bold,
                _ => FontWeight::Normal,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

impl FontStyle {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "italic" | "oblique" => FontStyle::Italic,
            _ => FontStyle::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "center" => TextAlign::Center,
            "right" | "end" => TextAlign::Right,
            _ => TextAlign::Left,
        }
    }
}

macro_rules! lenient_enum_deserialize {
    ($($ty:ty),*) => {$(
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = serde_json::Value::deserialize(deserializer)?;
                Ok(match &value {
                    serde_json::Value::String(s) => <$ty>::parse(s),
                    serde_json::Value::Number(n) => <$ty>::parse(&n.to_string()),
                    _ => <$ty>::default(),
                })
            }
        }
    )*};
}

lenient_enum_deserialize!(FontWeight, FontStyle, TextAlign);

/// Discriminator carried on the wire as `"type": "textBlock"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentKind {
    #[default]
    #[serde(rename = "textBlock")]
    TextBlock,
}

// ───────────────────────────────────────────────────────────────────
// Text block
// ───────────────────────────────────────────────────────────────────

/// A positioned, styled content unit on a slide.
///
/// `content` is opaque rich text; nothing in the sync core parses it.
/// `timestamp` is informational and never used for conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub content: String,
    pub font_size: u32,
    pub font_weight: FontWeight,
    pub font_style: FontStyle,
    pub text_align: TextAlign,
    pub created_by: String,
    pub timestamp: u64,
}

impl TextBlock {
    /// A block with the given id and every other field at its default.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ContentKind::TextBlock,
            x: 0,
            y: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            content: String::new(),
            font_size: DEFAULT_FONT_SIZE,
            font_weight: FontWeight::Normal,
            font_style: FontStyle::Normal,
            text_align: TextAlign::Left,
            created_by: String::new(),
            timestamp: 0,
        }
    }

    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(MIN_WIDTH);
        self.height = height.max(MIN_HEIGHT);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

impl<'de> Deserialize<'de> for TextBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(sanitize::sanitize(&value))
    }
}

// ───────────────────────────────────────────────────────────────────
// Slides, presentations, users
// ───────────────────────────────────────────────────────────────────

/// Ordered container of text blocks. Display order is array order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "sanitize::de_lenient_usize")]
    pub index: usize,
    #[serde(default, deserialize_with = "sanitize::de_lenient_blocks")]
    pub content: Vec<TextBlock>,
}

impl Slide {
    pub fn new(id: impl Into<String>, index: usize) -> Self {
        Self {
            id: id.into(),
            index,
            content: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub creator_id: String,
}

/// Participant role. The derived order is the privilege order:
/// `Viewer < Editor < Creator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    Editor,
    Creator,
}

impl Role {
    /// Unknown role names map to the least privileged role.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "creator" => Role::Creator,
            "editor" => Role::Editor,
            _ => Role::Viewer,
        }
    }

    pub fn can_edit(self) -> bool {
        self >= Role::Editor
    }

    pub fn can_manage_users(self) -> bool {
        self == Role::Creator
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Creator => "creator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().map(Role::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "sanitize::de_lenient_string")]
    pub nickname: String,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            role,
        }
    }
}

/// Write permissions derived from a role. Never stored, always recomputed
/// from the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub can_edit: bool,
    pub can_manage_users: bool,
}

impl Permissions {
    pub fn for_role(role: Option<Role>) -> Self {
        match role {
            Some(role) => Self {
                can_edit: role.can_edit(),
                can_manage_users: role.can_manage_users(),
            },
            None => Self::default(),
        }
    }
}
