//! Condition evaluation for flight plan lines and actions.

use serde::{Deserialize, Serialize};

/// Comparison operator used by plan line actions against an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl ConditionOperator {
    /// Apply the operator to an exit status and a reference value.
    pub fn matches(&self, status: i32, value: i32) -> bool {
        match self {
            Self::Eq => status == value,
            Self::Ne => status != value,
            Self::Gt => status > value,
            Self::Ge => status >= value,
            Self::Lt => status < value,
            Self::Le => status <= value,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

// Two-character operators first so "==" is not split as "=" "=".
const OPERATORS: [(&str, ConditionOperator); 6] = [
    ("==", ConditionOperator::Eq),
    ("!=", ConditionOperator::Ne),
    (">=", ConditionOperator::Ge),
    ("<=", ConditionOperator::Le),
    (">", ConditionOperator::Gt),
    ("<", ConditionOperator::Lt),
];

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn compare(op: ConditionOperator, left: &str, right: &str) -> bool {
    let left = unquote(left);
    let right = unquote(right);
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match op {
            ConditionOperator::Eq => l == r,
            ConditionOperator::Ne => l != r,
            ConditionOperator::Gt => l > r,
            ConditionOperator::Ge => l >= r,
            ConditionOperator::Lt => l < r,
            ConditionOperator::Le => l <= r,
        };
    }
    match op {
        ConditionOperator::Eq => left == right,
        ConditionOperator::Ne => left != right,
        ConditionOperator::Gt => left > right,
        ConditionOperator::Ge => left >= right,
        ConditionOperator::Lt => left < right,
        ConditionOperator::Le => left <= right,
    }
}

/// Evaluate a rendered line condition.
///
/// Supports a single binary comparison with one of the six operators.
/// Operands compare numerically when both parse as numbers, otherwise as
/// strings. A condition without any operator is truthy when it is
/// non-empty and not a textual "false" or "0".
pub fn evaluate(rendered: &str) -> bool {
    let text = rendered.trim();
    if text.is_empty() {
        return false;
    }
    // Earliest operator occurrence wins, longest match at that position.
    let mut best: Option<(usize, &str, ConditionOperator)> = None;
    for (token, op) in OPERATORS {
        if let Some(pos) = text.find(token) {
            let better = match best {
                Some((best_pos, best_token, _)) => {
                    pos < best_pos || (pos == best_pos && token.len() > best_token.len())
                }
                None => true,
            };
            if better {
                best = Some((pos, token, op));
            }
        }
    }
    match best {
        Some((pos, token, op)) => {
            let left = &text[..pos];
            let right = &text[pos + token.len()..];
            compare(op, left, right)
        }
        None => {
            let value = unquote(text);
            !value.is_empty() && !value.eq_ignore_ascii_case("false") && value != "0"
        }
    }
}
