//! Normalization of loosely-typed edit payloads.
//!
//! [`sanitize`] is total: any JSON value yields a [`TextBlock`] whose fields
//! all carry their canonical type. Numbers may arrive as numbers, floats or
//! strings such as `"120px"`; anything unparsable falls back to the field
//! default instead of failing. The function is idempotent, so sanitizing an
//! already-sanitized block (or its serialized form) is a no-op.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::model::{
    ContentKind, FontStyle, FontWeight, TextAlign, TextBlock, DEFAULT_FONT_SIZE, DEFAULT_HEIGHT,
    DEFAULT_WIDTH, MIN_HEIGHT, MIN_WIDTH,
};

/// Coerce an arbitrary payload into a canonical [`TextBlock`].
pub fn sanitize(raw: &Value) -> TextBlock {
    let field = |name: &str| raw.get(name).unwrap_or(&Value::Null);

    let width = int_field(raw, "width").map_or(DEFAULT_WIDTH, clamp_u32);
    let height = int_field(raw, "height").map_or(DEFAULT_HEIGHT, clamp_u32);
    let font_size = match int_field(raw, "fontSize") {
        Some(size) if size > 0 => clamp_u32(size),
        _ => DEFAULT_FONT_SIZE,
    };

    TextBlock {
        id: lenient_string(field("id")).unwrap_or_default(),
        kind: ContentKind::TextBlock,
        x: int_field(raw, "x").map_or(0, clamp_u32),
        y: int_field(raw, "y").map_or(0, clamp_u32),
        width: width.max(MIN_WIDTH),
        height: height.max(MIN_HEIGHT),
        content: lenient_string(field("content")).unwrap_or_default(),
        font_size,
        font_weight: lenient_string(field("fontWeight"))
            .map(|w| FontWeight::parse(&w))
            .unwrap_or_default(),
        font_style: lenient_string(field("fontStyle"))
            .map(|s| FontStyle::parse(&s))
            .unwrap_or_default(),
        text_align: lenient_string(field("textAlign"))
            .map(|a| TextAlign::parse(&a))
            .unwrap_or_default(),
        created_by: lenient_string(field("createdBy")).unwrap_or_default(),
        timestamp: int_field(raw, "timestamp").map_or(0, |t| t.max(0) as u64),
    }
}

/// Integer field of an object payload. A present but unparsable value is
/// logged before the caller falls back to its default.
fn int_field(raw: &Value, name: &str) -> Option<i64> {
    let value = raw.get(name)?;
    let parsed = lenient_int(value);
    if parsed.is_none() && !value.is_null() {
        log::debug!("Unparsable {name} {value}, using default");
    }
    parsed
}

/// Re-sanitize a block that was mutated locally (a move past the origin,
/// a resize below the minimum). Equivalent to `sanitize(&to_value(block))`
/// without the round trip.
pub fn normalize(mut block: TextBlock) -> TextBlock {
    block.kind = ContentKind::TextBlock;
    block.width = block.width.max(MIN_WIDTH);
    block.height = block.height.max(MIN_HEIGHT);
    if block.font_size == 0 {
        block.font_size = DEFAULT_FONT_SIZE;
    }
    block
}

/// Integer reading with `parseInt`-like semantics: numbers truncate,
/// strings contribute their leading (optionally signed) digits.
pub fn lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64)
        }),
        Value::String(s) => parse_leading_int(s),
        _ => None,
    }
}

/// String reading that accepts numbers and booleans as their text form.
pub fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Non-negative index reading; negative or missing values are `None`.
pub fn lenient_index(value: &Value) -> Option<usize> {
    lenient_int(value).and_then(|i| usize::try_from(i).ok())
}

fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

// ───────────────────────────────────────────────────────────────────
// serde helpers for lenient struct fields
// ───────────────────────────────────────────────────────────────────

pub(crate) fn de_lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(lenient_string(&value).unwrap_or_default())
}

pub(crate) fn de_lenient_usize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(lenient_index(&value).unwrap_or_default())
}

pub(crate) fn de_lenient_blocks<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<TextBlock>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(sanitize_blocks(&value))
}

/// Sanitize every object in an array; anything that is not an object with
/// an id is skipped.
pub fn sanitize_blocks(value: &Value) -> Vec<TextBlock> {
    let Some(items) = value.as_array() else {
        if !value.is_null() {
            log::debug!("Expected an array of blocks, got {value}");
        }
        return Vec::new();
    };
    let blocks: Vec<TextBlock> = items
        .iter()
        .filter(|item| item.is_object())
        .map(sanitize)
        .filter(|block| !block.id.is_empty())
        .collect();
    if blocks.len() < items.len() {
        log::debug!("Skipped {} malformed blocks", items.len() - blocks.len());
    }
    blocks
}
