use tracing::debug;

use crate::process::Stage;
use ysh_types::{YshError, YshResult};

/// A scanned command line: the pipeline's stages in order plus the
/// background flag a trailing `&` produces.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedLine {
    pub stages: Vec<Stage>,
    pub background: bool,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Whitespace tokenization. Quoting and expansion are out of scope; a
/// token is whatever sits between blanks.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(|s| s.to_string()).collect()
}

/// Splits a token sequence into pipeline stages at each standalone `|`,
/// stripping a trailing `&` into the background flag first. Redirection
/// tokens stay embedded in each stage's argv; they are interpreted in the
/// child just before exec. An empty stage (leading/trailing/doubled `|`)
/// is a syntax error, never a degenerate fork.
pub fn parse_line(mut tokens: Vec<String>) -> YshResult<ParsedLine> {
    let background = match tokens.last() {
        Some(t) if t == "&" => {
            tokens.pop();
            true
        }
        _ => false,
    };

    let mut stages = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut saw_pipe = false;

    for token in tokens {
        if token == "|" {
            if current.is_empty() {
                return Err(YshError::Syntax);
            }
            stages.push(Stage::new(std::mem::take(&mut current)));
            saw_pipe = true;
        } else {
            current.push(token);
        }
    }

    if current.is_empty() {
        if saw_pipe {
            // `a |` with nothing after it
            return Err(YshError::Syntax);
        }
    } else {
        stages.push(Stage::new(current));
    }

    debug!(
        "parsed {} stage(s), background: {}",
        stages.len(),
        background
    );
    Ok(ParsedLine { stages, background })
}
