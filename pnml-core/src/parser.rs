//! Line-aware PNML-YAML parser (C1). Ported from the stack-based indentation
//! scanner in `enginepy/pnml_parser.py`: a single linear pass over lines,
//! tracking a stack of (section name, indent) frames.

use std::collections::BTreeMap;

use crate::error::ParseError;
use crate::registry::build_key;
use crate::types::{Arc, Inscription, InscriptionKind, Net, Place, PlaceIndex, Token, Transition};

const SECTION_NAMES: [&str; 6] = ["net", "place", "transition", "arc", "initialTokens", "inscriptions"];

struct Frame {
    name: String,
    indent: usize,
}

fn active_section(stack: &[Frame]) -> Option<&str> {
    stack
        .iter()
        .rev()
        .find(|f| SECTION_NAMES.contains(&f.name.as_str()))
        .map(|f| f.name.as_str())
}

fn stack_contains(stack: &[Frame], name: &str) -> bool {
    stack.iter().any(|f| f.name == name)
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Parses a `key:` or `key: value` line, returning `(key, value)` where
/// `value` is the untrimmed remainder (possibly empty).
fn match_key_line(stripped: &str) -> Option<(&str, &str)> {
    let colon = stripped.find(':')?;
    let key = stripped[..colon].trim_end();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let rest = stripped[colon + 1..].trim_start();
    Some((key, rest))
}

/// Parses `- id: <ident>`, ident = `[A-Za-z0-9_-]+`.
fn match_list_id(stripped: &str) -> Option<&str> {
    let rest = stripped.strip_prefix('-')?.trim_start();
    let rest = rest.strip_prefix("id:")?.trim_start();
    let rest = rest.trim_end();
    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        Some(rest)
    } else {
        None
    }
}

/// Parses `- value: <scalar>`.
fn match_list_value(stripped: &str) -> Option<&str> {
    let rest = stripped.strip_prefix('-')?.trim_start();
    let rest = rest.strip_prefix("value:")?;
    Some(rest.trim_start())
}

fn parse_scalar(value: &str) -> Token {
    let raw = value.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Token::String(raw[1..raw.len() - 1].to_string());
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Token::String(raw[1..raw.len() - 1].to_string());
    }
    let lower = raw.to_ascii_lowercase();
    if lower == "true" || lower == "false" {
        return Token::Bool(lower == "true");
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Token::Float(f);
        }
    } else if let Ok(n) = raw.parse::<i64>() {
        return Token::Int(n);
    }
    Token::String(raw.to_string())
}

/// Parses PNML-YAML text into a [`Net`] and a [`PlaceIndex`] table.
/// Deterministic: the same input always yields the same output. Unknown
/// keys are silently ignored.
pub fn parse(text: &str) -> Result<(Net, Vec<PlaceIndex>), ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut stack: Vec<Frame> = Vec::new();
    let mut net = Net::new();
    let mut place_index: Vec<PlaceIndex> = Vec::new();

    let mut current_place_id: Option<String> = None;
    let mut current_transition_id: Option<String> = None;
    let mut current_arc_idx: Option<usize> = None;
    let mut current_place_entry: Option<usize> = None;
    let mut current_inscription: Option<Inscription> = None;
    let mut current_inscription_owner: Option<String> = None;
    let mut code_indent: Option<usize> = None;
    let mut current_net_id: Option<String> = None;

    macro_rules! flush_inscription {
        () => {
            if let Some(ins) = current_inscription.take() {
                attach_inscription(&mut net, ins, &current_inscription_owner, &mut current_arc_idx);
            }
        };
    }

    for (i, raw) in lines.iter().enumerate() {
        if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
            continue;
        }
        let indent = leading_spaces(raw);

        if let Some(ci) = code_indent {
            if indent > ci {
                if let Some(ins) = current_inscription.as_mut() {
                    let slice: String = raw.chars().skip(ci + 1).collect();
                    let code = ins.code.get_or_insert_with(String::new);
                    code.push_str(&slice);
                    code.push('\n');
                }
                continue;
            }
            code_indent = None;
        }

        while let Some(top) = stack.last() {
            if indent <= top.indent {
                stack.pop();
            } else {
                break;
            }
        }
        let stripped = raw.trim_start();

        if let Some((key, value)) = match_key_line(stripped) {
            if key == "code" && value.trim() == "|" {
                code_indent = Some(indent);
                if let Some(ins) = current_inscription.as_mut() {
                    ins.code = Some(String::new());
                }
                continue;
            }
            if value.is_empty() {
                stack.push(Frame { name: key.to_string(), indent });
                continue;
            }
            if current_inscription.is_some() && active_section(&stack) == Some("inscriptions") {
                match key {
                    "language" => current_inscription.as_mut().unwrap().language = Some(value.trim().to_string()),
                    "kind" => {
                        let kind = match value.trim() {
                            "guard" => Some(InscriptionKind::Guard),
                            "expression" => Some(InscriptionKind::Expression),
                            _ => None,
                        };
                        current_inscription.as_mut().unwrap().kind = kind;
                    }
                    "source" => current_inscription.as_mut().unwrap().source = Some(value.trim().to_string()),
                    "id" => current_inscription.as_mut().unwrap().id = Some(value.trim().to_string()),
                    "execMode" => {
                        let mode = if value.trim() == "async" {
                            crate::types::ExecMode::Async
                        } else {
                            crate::types::ExecMode::Sync
                        };
                        current_inscription.as_mut().unwrap().exec_mode = mode;
                    }
                    "code" => {
                        current_inscription.as_mut().unwrap().code = Some(scalar_as_code(parse_scalar(value)));
                    }
                    _ => {}
                }
                if let Some(ins) = current_inscription.as_mut() {
                    resync_registry_key(ins, &current_net_id, &current_transition_id, &current_arc_idx, &net, &current_inscription_owner);
                }
            }
            if active_section(&stack) == Some("arc") {
                if let Some(idx) = current_arc_idx {
                    match key {
                        "source" => net.arcs[idx].source = Some(value.trim().to_string()),
                        "target" => net.arcs[idx].target = Some(value.trim().to_string()),
                        _ => {}
                    }
                }
            }
            continue;
        }

        if let Some(item_id) = match_list_id(stripped) {
            let section = active_section(&stack).map(|s| s.to_string());
            match section.as_deref() {
                Some("net")
                    if !["page", "place", "transition", "arc", "inscriptions"]
                        .iter()
                        .any(|s| stack_contains(&stack, s)) =>
                {
                    current_net_id = Some(item_id.to_string());
                    net.id = Some(item_id.to_string());
                    continue;
                }
                Some("place") => {
                    if let Some(idx) = current_place_entry {
                        place_index[idx].end_line = i.saturating_sub(1);
                    }
                    current_place_id = Some(item_id.to_string());
                    place_index.push(PlaceIndex {
                        id: Some(item_id.to_string()),
                        id_line: i,
                        start_line: i,
                        end_line: i,
                    });
                    current_place_entry = Some(place_index.len() - 1);
                    net.places.insert(item_id.to_string(), Place::new(item_id));
                    continue;
                }
                Some("transition") => {
                    current_transition_id = Some(item_id.to_string());
                    net.transitions.insert(item_id.to_string(), Transition::new(item_id));
                    continue;
                }
                Some("inscriptions") => {
                    flush_inscription!();
                    current_inscription = Some(Inscription::new(String::new(), String::new()));
                    current_inscription.as_mut().unwrap().id = Some(item_id.to_string());
                    current_inscription_owner = owner_section_below_top(&stack);
                    if let Some(ins) = current_inscription.as_mut() {
                        resync_registry_key(ins, &current_net_id, &current_transition_id, &current_arc_idx, &net, &current_inscription_owner);
                    }
                    continue;
                }
                Some("arc") => {
                    net.arcs.push(Arc::new(item_id));
                    current_arc_idx = Some(net.arcs.len() - 1);
                    continue;
                }
                _ => {}
            }
        }

        if let Some(value) = match_list_value(stripped) {
            if active_section(&stack) == Some("initialTokens") {
                if let Some(pid) = &current_place_id {
                    let token = parse_scalar(value);
                    if let Some(place) = net.places.get_mut(pid) {
                        place.initial_tokens.push(token);
                    }
                }
            }
        }

        if let Some(idx) = current_place_entry {
            place_index[idx].end_line = place_index[idx].end_line.max(i);
        }
    }

    flush_inscription!();
    if let Some(idx) = current_place_entry {
        place_index[idx].end_line = place_index[idx].end_line.max(lines.len().saturating_sub(1));
    }

    Ok((net, place_index))
}

fn scalar_as_code(value: Token) -> String {
    match value {
        Token::String(s) => s,
        Token::Int(n) => n.to_string(),
        Token::Float(f) => f.to_string(),
        Token::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Which owning section (`transition` or `arc`) encloses the `inscriptions`
/// frame currently on top of the stack.
fn owner_section_below_top(stack: &[Frame]) -> Option<String> {
    if stack.is_empty() {
        return None;
    }
    active_section(&stack[..stack.len() - 1]).map(|s| s.to_string())
}

fn resync_registry_key(
    ins: &mut Inscription,
    net_id: &Option<String>,
    transition_id: &Option<String>,
    arc_idx: &Option<usize>,
    net: &Net,
    owner_section: &Option<String>,
) {
    match owner_section.as_deref() {
        Some("transition") => {
            if let Some(t) = transition_id {
                ins.owner_id = t.clone();
                ins.registry_key = build_key(net_id.as_deref().unwrap_or("pnml"), t, ins.kind.map(|k| k.as_str()).unwrap_or("inscription"));
            }
        }
        Some("arc") => {
            if let Some(idx) = arc_idx {
                if let Some(arc) = net.arcs.get(*idx) {
                    ins.owner_id = arc.id.clone();
                    ins.registry_key = build_key(net_id.as_deref().unwrap_or("pnml"), &arc.id, ins.kind.map(|k| k.as_str()).unwrap_or("inscription"));
                }
            }
        }
        _ => {}
    }
}

fn attach_inscription(net: &mut Net, ins: Inscription, owner_section: &Option<String>, arc_idx: &mut Option<usize>) {
    match owner_section.as_deref() {
        Some("transition") => {
            if let Some(t) = net.transitions.get_mut(&ins.owner_id) {
                t.inscriptions.push(ins);
            }
        }
        Some("arc") => {
            if let Some(idx) = *arc_idx {
                if let Some(arc) = net.arcs.get_mut(idx) {
                    arc.inscriptions.push(ins);
                }
            }
        }
        _ => {}
    }
}

/// Finds the place whose `[start_line, end_line]` range contains `line`, or
/// failing that the earliest place starting after `line`.
pub fn find_place_for_line(places: &[PlaceIndex], line: usize) -> Option<PlaceIndex> {
    for place in places {
        if place.start_line <= line && line <= place.end_line {
            return Some(place.clone());
        }
    }
    places
        .iter()
        .filter(|p| p.start_line > line)
        .min_by_key(|p| p.start_line)
        .cloned()
}

/// Transforms plural section keys to singular and wraps a bare `page:` under
/// `net:` with a synthetic list item. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();

    for line in lines.iter_mut() {
        let indent = leading_spaces(line);
        let stripped = line.trim_start().to_string();
        for (plural, singular) in [("places:", "place:"), ("transitions:", "transition:"), ("arcs:", "arc:")] {
            if stripped == plural {
                *line = format!("{}{}", " ".repeat(indent), singular);
                break;
            }
        }
    }

    let mut result: Vec<String> = Vec::with_capacity(lines.len() + 1);
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        let indent = leading_spaces(line);
        let stripped = line.trim_start();
        result.push(line.clone());
        if stripped == "page:" {
            let has_list_item = lines
                .get(i + 1)
                .map(|next| {
                    let next_indent = leading_spaces(next);
                    next_indent > indent && next.trim_start().starts_with("- id:")
                })
                .unwrap_or(false);
            if !has_list_item {
                result.push(format!("{}- id: generated_net", " ".repeat(indent + 2)));
            }
        }
        i += 1;
    }

    for line in &result {
        out.push_str(line);
        out.push('\n');
    }
    if !text.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// `(net.places.is_empty(), net.transitions.is_empty())`-based structural
/// check. Returns `(true, "ok")` or `(false, reason)`.
pub fn validate(text: &str) -> (bool, String) {
    let (net, _) = match parse(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "validate: parse failed");
            return (false, format!("parse error: {e}"));
        }
    };
    if net.places.is_empty() {
        return (false, "no places found".to_string());
    }
    if net.transitions.is_empty() {
        return (false, "no transitions found".to_string());
    }
    (true, "ok".to_string())
}

/// Line-only variant of [`parse`], used by the debug driver to compute
/// breakpoint line mapping without re-deriving the full net.
pub fn extract_place_index(text: &str) -> Vec<PlaceIndex> {
    parse(text).map(|(_, idx)| idx).unwrap_or_default()
}
