//! JSON text layer on top of the relation model.
//!
//! The parser produces [`Value`] trees (objects keep insertion order,
//! numbers keep arbitrary precision); the writer renders them back.
//! Objects serialize through the model's enumeration contract:
//! non-private, non-transient relations in stable insertion order,
//! keyed by relation type name, and reconstruct through a registry.

use std::str::FromStr;

use pest::Parser;
use pest_derive::Parser;

use crate::construct::{Relatable, Relation, RelatedObject};
use crate::datatype::{Decimal, Value, ValueMap};
use crate::error::{RelataError, Result};
use crate::schema::{Modifiers, TypeRegistry};

#[derive(Parser)]
#[grammar = "json.pest"]
struct TextParser;

// ------------- Reading -------------
/// Parses a JSON document into a [`Value`].
pub fn parse_text(text: &str) -> Result<Value> {
    let mut pairs = TextParser::parse(Rule::json, text).map_err(parse_error)?;
    let json = pairs.next().expect("grammar yields a json node");
    let value = json.into_inner().next().expect("json node holds a value");
    build_value(value)
}

fn parse_error(error: pest::error::Error<Rule>) -> RelataError {
    let (line, col) = match error.line_col {
        pest::error::LineColLocation::Pos((line, col)) => (line, col),
        pest::error::LineColLocation::Span((line, col), _) => (line, col),
    };
    RelataError::Parse {
        message: error.variant.message().into_owned(),
        line: Some(line),
        col: Some(col),
    }
}

fn build_value(pair: pest::iterators::Pair<Rule>) -> Result<Value> {
    match pair.as_rule() {
        Rule::object => {
            let mut map = ValueMap::default();
            for entry in pair.into_inner() {
                let mut parts = entry.into_inner();
                let key = unescape(raw_string(parts.next().expect("pair holds a key")))?;
                let value = build_value(parts.next().expect("pair holds a value"))?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        Rule::array => {
            let mut list = Vec::new();
            for item in pair.into_inner() {
                list.push(build_value(item)?);
            }
            Ok(Value::List(list))
        }
        Rule::string => Ok(Value::Text(unescape(raw_string(pair))?)),
        Rule::number => build_number(pair.as_str()),
        Rule::boolean => Ok(Value::Bool(pair.as_str() == "true")),
        Rule::null => Ok(Value::Null),
        other => Err(RelataError::Parse {
            message: format!("unexpected rule {other:?}"),
            line: None,
            col: None,
        }),
    }
}

fn raw_string(pair: pest::iterators::Pair<Rule>) -> &str {
    pair.into_inner()
        .next()
        .expect("string holds its inner text")
        .as_str()
}

// Integral literals become Int, everything else keeps arbitrary
// precision as Decimal. Integers beyond i64 fall back to Decimal too.
fn build_number(literal: &str) -> Result<Value> {
    let fractional = literal.contains(['.', 'e', 'E']);
    if !fractional {
        if let Ok(i) = i64::from_str(literal) {
            return Ok(Value::Int(i));
        }
    }
    match Decimal::from_str(literal) {
        Some(d) => Ok(Value::Decimal(d)),
        None => Err(RelataError::Parse {
            message: format!("invalid number literal '{literal}'"),
            line: None,
            col: None,
        }),
    }
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => out.push(unescape_unicode(&mut chars)?),
            other => {
                return Err(RelataError::Parse {
                    message: format!("invalid escape '\\{}'", other.map(String::from).unwrap_or_default()),
                    line: None,
                    col: None,
                });
            }
        }
    }
    Ok(out)
}

fn unescape_unicode(chars: &mut std::str::Chars) -> Result<char> {
    let high = hex4(chars)?;
    let code = if (0xD800..=0xDBFF).contains(&high) {
        // surrogate pair: the low half must follow as another \uXXXX
        if chars.next() != Some('\\') || chars.next() != Some('u') {
            return Err(bad_unicode(high));
        }
        let low = hex4(chars)?;
        if !(0xDC00..=0xDFFF).contains(&low) {
            return Err(bad_unicode(low));
        }
        0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
    } else {
        high
    };
    char::from_u32(code).ok_or_else(|| bad_unicode(code))
}

fn hex4(chars: &mut std::str::Chars) -> Result<u32> {
    let mut code = 0u32;
    for _ in 0..4 {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| RelataError::Parse {
                message: "truncated unicode escape".to_owned(),
                line: None,
                col: None,
            })?;
        code = code * 16 + digit;
    }
    Ok(code)
}

fn bad_unicode(code: u32) -> RelataError {
    RelataError::Parse {
        message: format!("invalid unicode escape U+{code:04X}"),
        line: None,
        col: None,
    }
}

// ------------- Writing -------------
/// Renders a [`Value`] as compact JSON text.
pub fn to_text(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, None, 0);
    out
}

/// Renders a [`Value`] as indented JSON text.
pub fn to_pretty(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, Some(2), 0);
    out
}

fn write_value(out: &mut String, value: &Value, indent: Option<usize>, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Decimal(d) => out.push_str(&d.to_string()),
        Value::Text(s) => write_string(out, s),
        Value::Date(d) => write_string(out, &d.to_string()),
        Value::DateTime(d) => write_string(out, &d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::List(list) => {
            out.push('[');
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                break_line(out, indent, depth + 1);
                write_value(out, item, indent, depth + 1);
            }
            if !list.is_empty() {
                break_line(out, indent, depth);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                break_line(out, indent, depth + 1);
                write_string(out, key);
                out.push(':');
                if indent.is_some() {
                    out.push(' ');
                }
                write_value(out, item, indent, depth + 1);
            }
            if !map.is_empty() {
                break_line(out, indent, depth);
            }
            out.push('}');
        }
    }
}

fn break_line(out: &mut String, indent: Option<usize>, depth: usize) {
    if let Some(step) = indent {
        out.push('\n');
        for _ in 0..depth * step {
            out.push(' ');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    escape_into(out, s);
    out.push('"');
}

/// Appends `s` with JSON string escaping applied.
pub fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

// ------------- Objects -------------
/// Serializes a relatable's non-private, non-transient relations, in
/// insertion order, as a JSON object keyed by relation type name.
pub fn object_to_text(object: &impl Relatable) -> String {
    Value::Map(object_entries(object)).to_string()
}

/// [`object_to_text`] with indentation.
pub fn object_to_pretty(object: &impl Relatable) -> String {
    to_pretty(&Value::Map(object_entries(object)))
}

fn object_entries(object: &impl Relatable) -> ValueMap {
    let mut map = ValueMap::default();
    for relation in object.relations(Some(&|r: &std::sync::Arc<Relation>| {
        !r.rtype().is(Modifiers::TRANSIENT)
    })) {
        let rtype = relation.rtype();
        let name = rtype
            .name()
            .expect("relation cells always carry registered types")
            .to_owned();
        map.insert(name, relation.target());
    }
    map
}

/// Reconstructs an object from a JSON document whose keys are relation
/// type names resolvable in `registry`. Values pass through the target
/// kind's coercion, so dates, datetimes and decimals may arrive as
/// strings. Unknown names fail with
/// [`RelataError::UnresolvableRelation`].
pub fn object_from_text(text: &str, registry: &TypeRegistry) -> Result<RelatedObject> {
    let parsed = parse_text(text)?;
    let Value::Map(map) = parsed else {
        return Err(RelataError::Parse {
            message: "top-level JSON must be an object".to_owned(),
            line: None,
            col: None,
        });
    };
    let object = RelatedObject::new();
    for (name, value) in map {
        let rtype = registry
            .lookup(&name)
            .ok_or(RelataError::UnresolvableRelation(name))?;
        let adapted = rtype.kind().adapt(value)?;
        object.adopt(Relation::direct(rtype, adapted));
    }
    Ok(object)
}
