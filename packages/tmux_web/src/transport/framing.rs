use serde_json::Value;
use tmux_bridge::Geometry;

/// What an inbound text frame asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Zero means "keep the current value" for that dimension
    Resize { cols: u16, rows: u16 },
    /// Keystrokes, written to the PTY verbatim
    Input(String),
}

impl InboundFrame {
    /// A frame is a resize only when it is a JSON object with
    /// `"type": "resize"` and numeric `cols` and `rows`. Everything else,
    /// malformed JSON included, is input.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) if map.get("type").and_then(Value::as_str) == Some("resize") => {
                let cols = map.get("cols").and_then(Value::as_f64);
                let rows = map.get("rows").and_then(Value::as_f64);
                match (cols, rows) {
                    (Some(cols), Some(rows)) => InboundFrame::Resize {
                        cols: Geometry::dimension(cols),
                        rows: Geometry::dimension(rows),
                    },
                    _ => InboundFrame::Input(text.to_string()),
                }
            }
            _ => InboundFrame::Input(text.to_string()),
        }
    }
}

/// One `?resize=` part as a dimension; 0 unless the whole part is a
/// positive number.
fn query_dimension(part: &str) -> u16 {
    part.trim()
        .parse::<f64>()
        .map(Geometry::dimension)
        .unwrap_or(0)
}

/// Parse `?resize=<cols>,<rows>`. Each missing or unusable part falls back
/// to `fallback`.
pub fn parse_resize_query(raw: Option<&str>, fallback: Geometry) -> Geometry {
    let Some(raw) = raw else {
        return fallback;
    };
    let mut parts = raw.split(',');
    let cols = parts.next().map(query_dimension).unwrap_or(0);
    let rows = parts.next().map(query_dimension).unwrap_or(0);
    fallback.merge(cols, rows)
}
