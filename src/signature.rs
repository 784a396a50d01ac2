//! Extraction of typed `run(...)` overload signatures from node GLSL source.
//!
//! A node's code exposes one or more `void run(<params>)` functions. Params
//! default to `in`; `out` params become the node's outputs. A directive line
//! comment immediately before an overload (`// Label: Sum, Order: 2`)
//! attaches display metadata and an explicit ordering.

use serde::{Deserialize, Serialize};

use crate::types::GlslType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: GlslType,
    pub direction: ParamDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub order: Option<i32>,
    pub inputs: Vec<SignatureParam>,
    pub outputs: Vec<SignatureParam>,
    /// All params in declared order; call sites emitting a `run` invocation
    /// need this because `in` and `out` params may interleave.
    #[serde(default)]
    pub params: Vec<SignatureParam>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedSignatures {
    pub valid: bool,
    pub signatures: Vec<Signature>,
}

/// Parse every recognizable `run` overload out of `source`.
///
/// A source with no recognizable overload returns `valid = false`; callers
/// must keep the node's previous ports in that case so an in-progress edit
/// does not destroy existing wiring. Signatures carrying an explicit
/// `Order:` come first (ascending, stable), then the rest in declaration
/// order; overload selection uses this sequence as its tie-break.
pub fn parse_signatures(source: &str) -> ParsedSignatures {
    let cleaned = strip_block_comments(source);

    let mut signatures: Vec<Signature> = Vec::new();
    let mut pending_label: Option<String> = None;
    let mut pending_order: Option<i32> = None;
    let mut carry = String::new();
    let mut in_decl = false;

    for line in cleaned.lines() {
        let (code, comment) = split_line_comment(line);
        if let Some(comment) = comment {
            if let Some((label, order)) = parse_directive(comment) {
                if label.is_some() {
                    pending_label = label;
                }
                if order.is_some() {
                    pending_order = order;
                }
            }
        }

        let mut rest = code;
        loop {
            if in_decl {
                match rest.find(')') {
                    Some(close) => {
                        carry.push_str(&rest[..close]);
                        if let Some(sig) =
                            parse_param_list(&carry, pending_label.take(), pending_order.take())
                        {
                            signatures.push(sig);
                        } else {
                            // Unknown type token: skip this one overload only.
                            pending_label = None;
                            pending_order = None;
                        }
                        carry.clear();
                        in_decl = false;
                        rest = &rest[close + 1..];
                    }
                    None => {
                        carry.push_str(rest);
                        carry.push(' ');
                        break;
                    }
                }
            } else {
                match find_run_open(rest) {
                    Some(after_paren) => {
                        in_decl = true;
                        rest = &rest[after_paren..];
                    }
                    None => {
                        // Any other code line detaches a pending directive.
                        if !rest.trim().is_empty() {
                            pending_label = None;
                            pending_order = None;
                        }
                        break;
                    }
                }
            }
        }
    }

    sort_by_explicit_order(&mut signatures);

    ParsedSignatures {
        valid: !signatures.is_empty(),
        signatures,
    }
}

fn sort_by_explicit_order(signatures: &mut [Signature]) {
    // Stable: equal `Order:` values and the unordered tail keep declaration
    // order, which is what overload tie-breaking relies on.
    signatures.sort_by_key(|s| match s.order {
        Some(o) => (0, o),
        None => (1, 0),
    });
}

/// Replace `/* ... */` comments with spaces, preserving newlines so line
/// association of directives survives.
fn strip_block_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            i += 2;
            while i < bytes.len() {
                if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                    i += 2;
                    break;
                }
                if bytes[i] == b'\n' {
                    out.push('\n');
                }
                i += 1;
            }
            out.push(' ');
        } else {
            // Source is valid UTF-8; push char-wise to stay on boundaries.
            let c = source[i..].chars().next().unwrap_or(' ');
            out.push(c);
            i += c.len_utf8();
        }
    }
    out
}

fn split_line_comment(line: &str) -> (&str, Option<&str>) {
    match line.find("//") {
        Some(idx) => (&line[..idx], Some(line[idx + 2..].trim())),
        None => (line, None),
    }
}

/// Recognize `Label: <text>` / `Order: <int>` tags in a line comment.
/// Both may appear on one line separated by a comma; anything without either
/// tag is an ordinary comment.
fn parse_directive(comment: &str) -> Option<(Option<String>, Option<i32>)> {
    let order = comment.find("Order:").and_then(|idx| {
        let tail = comment[idx + "Order:".len()..].trim_start();
        let digits: String = tail
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        digits.parse::<i32>().ok()
    });

    let label = comment.find("Label:").map(|idx| {
        let tail = &comment[idx + "Label:".len()..];
        let end = tail.find("Order:").map(|o| {
            // Drop the separator comma before the Order tag, if present.
            tail[..o].trim_end().trim_end_matches(',').len()
        });
        match end {
            Some(e) => tail[..e].trim().to_string(),
            None => tail.trim().to_string(),
        }
    });

    if label.is_none() && order.is_none() {
        return None;
    }
    Some((label.filter(|l| !l.is_empty()), order))
}

/// Find `void run (` with identifier boundaries; returns the index just
/// past the opening paren.
fn find_run_open(code: &str) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut search_from = 0;
    while let Some(rel) = code[search_from..].find("void") {
        let start = search_from + rel;
        search_from = start + 4;

        let boundary_before = start == 0 || !is_ident_char(bytes[start - 1]);
        if !boundary_before {
            continue;
        }

        let mut i = start + 4;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if !code[i..].starts_with("run") {
            continue;
        }
        i += 3;
        if i < bytes.len() && is_ident_char(bytes[i]) {
            continue;
        }
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'(' {
            return Some(i + 1);
        }
    }
    None
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_param_list(
    params: &str,
    label: Option<String>,
    order: Option<i32>,
) -> Option<Signature> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut all = Vec::new();

    for raw in params.split(',') {
        if raw.trim().is_empty() {
            continue;
        }
        let param = parse_param(raw)?;
        match param.direction {
            ParamDirection::In => inputs.push(param.clone()),
            ParamDirection::Out => outputs.push(param.clone()),
        }
        all.push(param);
    }

    Some(Signature {
        label,
        order,
        inputs,
        outputs,
        params: all,
    })
}

fn parse_param(raw: &str) -> Option<SignatureParam> {
    // Array suffix may sit on the type (`float[4] w`) or the name
    // (`float w[4]`); either way it means the same fixed-size array type.
    let mut array_len: Option<u32> = None;
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('[') {
        cleaned.push_str(&rest[..open]);
        cleaned.push(' ');
        let close = rest[open..].find(']')? + open;
        array_len = rest[open + 1..close].trim().parse::<u32>().ok();
        rest = &rest[close + 1..];
    }
    cleaned.push_str(rest);

    let mut direction = ParamDirection::In;
    let mut ty: Option<GlslType> = None;
    let mut name: Option<&str> = None;

    for token in cleaned.split_whitespace() {
        match token {
            "in" | "inout" | "const" | "highp" | "mediump" | "lowp" | "flat" => {}
            "out" => direction = ParamDirection::Out,
            _ => {
                if ty.is_none() {
                    ty = Some(GlslType::from_token(token)?);
                } else if name.is_none() {
                    name = Some(token);
                }
            }
        }
    }

    let mut ty = ty?;
    let name = name?;
    if let Some(n) = array_len {
        ty = GlslType::Array(Box::new(ty), n);
    }

    Some(SignatureParam {
        name: name.to_string(),
        ty,
        direction,
    })
}
