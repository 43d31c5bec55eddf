//! Tolerant parsing of model output.
//!
//! The model is asked for three sections:
//!
//! ```text
//! SELECTED_PRIMITIVES:
//! <catalogue declarations, verbatim>
//!
//! PARTIAL_PARAMETERIZATIONS:
//! <ret> <name>(<args>) { <body> }
//!
//! DEPTH_LEVEL:
//! <integer>
//! ```
//!
//! Models often echo the instructions before answering, so the first two
//! markers are taken from their last occurrence. Everything inside the
//! sections is best-effort: unknown selections and malformed proposals are
//! dropped. Only missing markers and a missing depth are failures.

use ps_core::{Catalogue, Signature};

/// Marker opening the selected-primitives section.
pub const SELECTED_MARKER: &str = "SELECTED_PRIMITIVES:";
/// Marker opening the partial-parameterizations section.
pub const PARTIAL_MARKER: &str = "PARTIAL_PARAMETERIZATIONS:";
/// Prefix of the depth line.
pub const DEPTH_MARKER: &str = "DEPTH_LEVEL:";

/// A model-authored wrapper fixing some arguments of one primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedSpecialization {
    /// Signature of the wrapper itself
    pub signature: Signature,
    /// Statement text between the outermost braces
    pub body: String,
}

impl ProposedSpecialization {
    /// Name of the primitive this wrapper claims to specialize.
    ///
    /// Follows the `<baseName>_<suffix>` convention; `None` when the name
    /// has no non-empty base and suffix.
    pub fn base_name(&self) -> Option<&str> {
        let (base, suffix) = self.signature.name.split_once('_')?;
        if base.is_empty() || suffix.is_empty() {
            return None;
        }
        Some(base)
    }
}

/// Parsed result of one model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    /// Selected catalogue entries, in the order the model listed them
    pub selected: Vec<Signature>,
    /// Proposed specializations, in output order
    pub proposals: Vec<ProposedSpecialization>,
    /// Search depth bound
    pub depth: u32,
}

/// Parse raw model output against the catalogue.
pub fn parse_response(text: &str, catalogue: &Catalogue) -> Result<ModelResponse, ResponseError> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let selected_at = rposition(&lines, SELECTED_MARKER)
        .ok_or(ResponseError::MissingMarker(SELECTED_MARKER))?;
    let partial_at = rposition(&lines, PARTIAL_MARKER)
        .ok_or(ResponseError::MissingMarker(PARTIAL_MARKER))?;
    let (depth_at, depth) = parse_depth(&lines, partial_at + 1)?;

    let selected_lines: &[&str] = if partial_at > selected_at {
        &lines[selected_at + 1..partial_at]
    } else {
        &[]
    };

    let response = ModelResponse {
        selected: parse_selected(selected_lines, catalogue),
        proposals: parse_proposals(&lines[partial_at + 1..depth_at]),
        depth,
    };

    tracing::debug!(
        selected = response.selected.len(),
        proposals = response.proposals.len(),
        depth = response.depth,
        "parsed model response"
    );

    Ok(response)
}

fn rposition(lines: &[&str], marker: &str) -> Option<usize> {
    lines.iter().rposition(|l| *l == marker)
}

/// Locate the depth marker at or after `from` and read its value.
///
/// The value is the second token of the marker line, or else the next
/// non-empty line.
fn parse_depth(lines: &[&str], from: usize) -> Result<(usize, u32), ResponseError> {
    let at = lines
        .iter()
        .skip(from)
        .position(|l| l.starts_with(DEPTH_MARKER))
        .map(|i| i + from)
        .ok_or(ResponseError::MissingDepth)?;

    let value = match lines[at].split_whitespace().nth(1) {
        Some(token) => token,
        None => lines[at + 1..]
            .iter()
            .copied()
            .find(|l| !l.is_empty())
            .ok_or(ResponseError::MissingDepthValue)?,
    };

    let depth = value
        .parse::<u32>()
        .map_err(|_| ResponseError::InvalidDepth(value.to_string()))?;

    Ok((at, depth))
}

/// Match each line literally against the catalogue's canonical keys.
fn parse_selected(lines: &[&str], catalogue: &Catalogue) -> Vec<Signature> {
    let mut selected: Vec<Signature> = Vec::new();

    for line in lines.iter().filter(|l| !l.is_empty()) {
        match catalogue.get_by_key(line) {
            Some(signature) => {
                if !selected.contains(signature) {
                    selected.push(signature.clone());
                }
            }
            None => tracing::debug!(line = *line, "selected line matches no catalogue entry"),
        }
    }

    selected
}

/// Scan `<declaration> { <body> }` definitions, possibly spanning lines.
fn parse_proposals(lines: &[&str]) -> Vec<ProposedSpecialization> {
    let mut proposals = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if line.is_empty() {
            continue;
        }

        let Some(brace) = line.find('{') else {
            tracing::debug!(line, "proposal line without a body");
            continue;
        };

        let head = format!("{};", line[..brace].trim());
        let Some(signature) = Signature::parse(&head) else {
            tracing::debug!(line, "proposal head is not a declaration");
            continue;
        };

        let mut body = String::new();
        let mut current = line[brace + 1..].trim();
        let mut closed = false;

        loop {
            if let Some(last) = current.strip_suffix('}') {
                body.push_str(last);
                closed = true;
                break;
            }
            if !current.is_empty() {
                body.push_str(current);
                body.push('\n');
            }
            if i >= lines.len() {
                break;
            }
            current = lines[i];
            i += 1;
        }

        if closed {
            proposals.push(ProposedSpecialization {
                signature,
                body: body.trim_end().to_string(),
            });
        } else {
            tracing::debug!(name = %signature.name, "proposal body never closed");
        }
    }

    proposals
}

/// Structural response failures. Each one means "ask the model again".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("Missing section marker {0}")]
    MissingMarker(&'static str),

    #[error("Missing {DEPTH_MARKER} line after {PARTIAL_MARKER}")]
    MissingDepth,

    #[error("{DEPTH_MARKER} has no value")]
    MissingDepthValue,

    #[error("Depth is not a non-negative integer: {0}")]
    InvalidDepth(String),
}
