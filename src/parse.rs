use serde_json::Value;

// ─── Strategy chain ──────────────────────────────────────────────────────────

/// One attempt at recovering a JSON object from free-form connector output.
///
/// Strategies are pure: each either produces a value or declines, and the
/// chain tries them left to right. Both the plan analyzer and the specialist
/// router run the same chain, so a response that direct-parses is never
/// altered by the later, more forgiving layers.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_parse(&self, raw: &str) -> Option<Value>;
}

/// The default recovery chain: direct parse, then the first fenced block,
/// then the span between the first `{` and the last `}`.
pub fn default_strategies() -> Vec<Box<dyn ParseStrategy>> {
    vec![
        Box::new(DirectJson),
        Box::new(FencedBlock),
        Box::new(DelimiterSpan),
    ]
}

/// Run `raw` through the strategy chain, returning the first recovered
/// object together with the winning strategy's name.
pub fn recover_object(raw: &str, strategies: &[Box<dyn ParseStrategy>]) -> Option<(Value, &'static str)> {
    for strategy in strategies {
        if let Some(value) = strategy.try_parse(raw) {
            if value.is_object() {
                return Some((value, strategy.name()));
            }
        }
    }
    None
}

// ─── Strategies ──────────────────────────────────────────────────────────────

/// Layer 1: the whole response is already valid JSON.
pub struct DirectJson;

impl ParseStrategy for DirectJson {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn try_parse(&self, raw: &str) -> Option<Value> {
        serde_json::from_str(raw.trim()).ok()
    }
}

/// Layer 2: the response wraps JSON in a fenced code block, with or without
/// a language tag.
pub struct FencedBlock;

impl ParseStrategy for FencedBlock {
    fn name(&self) -> &'static str {
        "fenced_block"
    }

    fn try_parse(&self, raw: &str) -> Option<Value> {
        let inner = extract_fenced_block(raw)?;
        serde_json::from_str(inner.trim()).ok()
    }
}

/// Layer 3: take everything between the first `{` and the last `}`.
pub struct DelimiterSpan;

impl ParseStrategy for DelimiterSpan {
    fn name(&self) -> &'static str {
        "delimiter_span"
    }

    fn try_parse(&self, raw: &str) -> Option<Value> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&raw[start..=end]).ok()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// First fenced block in the text. Tolerates a language tag after the
/// opening fence and missing trailing newline before the closing fence.
fn extract_fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    // Skip an optional language tag up to the end of the line.
    let body_start = after_open.find('\n').map_or(0, |idx| idx + 1);
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}
