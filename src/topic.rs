/// Topic dot-compression template
///
/// Tracks the last *fully resolved* (absolute) topic seen by this side of
/// the conversation, and is updated unconditionally after every
/// decompression, dotted or not. A real multi-record batch needs this:
/// without it, a `S:../name2/set` followed by `G:.../value` for `name2`
/// would resolve against the wrong (stale) template.
///
/// A topic beginning with `N` consecutive dots inherits the first `N`
/// path segments of the template, then appends whatever follows the dots
/// (including the separating `/`) verbatim.
#[derive(Debug, Clone, Default)]
pub struct TopicTemplate {
    template: String,
}

impl TopicTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a (possibly dot-compressed) topic against the running
    /// template, then update the template to the resolved result.
    pub fn decompress(&mut self, topic: &str) -> String {
        let resolved = if let Some(dotless) = topic.strip_prefix(leading_dots(topic)) {
            let dot_count = topic.len() - dotless.len();
            if dot_count == 0 {
                topic.to_string()
            } else {
                let prefix = first_n_segments(&self.template, dot_count);
                format!("{prefix}{dotless}")
            }
        } else {
            topic.to_string()
        };

        self.template = resolved.clone();
        resolved
    }

    /// Compute the maximal dot-compressed form of `topic` relative to the
    /// running template, then update the template to `topic` (the absolute
    /// form, exactly what a receiver's `decompress` would reconstruct).
    pub fn compress(&mut self, topic: &str) -> String {
        let common = common_segment_count(&self.template, topic);
        let compressed = if common == 0 {
            topic.to_string()
        } else {
            let suffix = after_n_segments(topic, common);
            format!("{}{}", ".".repeat(common), suffix)
        };

        self.template = topic.to_string();
        compressed
    }

    /// Reset the template, e.g. at the start of a fresh outbound frame.
    pub fn reset(&mut self) {
        self.template.clear();
    }
}

fn leading_dots(s: &str) -> &str {
    let count = s.chars().take_while(|&c| c == '.').count();
    &s[..count]
}

/// The template string truncated to its first `n` path segments (everything
/// before the `n`-th `/`). If the template has fewer than `n` segments, the
/// whole template is kept — a deliberately safe fallback for an
/// out-of-range request.
fn first_n_segments(template: &str, n: usize) -> &str {
    let mut seen = 0;
    for (i, ch) in template.char_indices() {
        if ch == '/' {
            seen += 1;
            if seen == n {
                return &template[..i];
            }
        }
    }
    template
}

/// Number of leading path segments `a` and `b` share exactly.
fn common_segment_count(a: &str, b: &str) -> usize {
    a.split('/').zip(b.split('/')).take_while(|(x, y)| x == y).count()
}

/// `topic` with its first `n` path segments removed (the returned slice
/// keeps the separating `/` before the remainder, matching the wire
/// convention `".."` + `"/name/set"`).
fn after_n_segments(topic: &str, n: usize) -> &str {
    let mut seen = 0;
    for (i, ch) in topic.char_indices() {
        if ch == '/' {
            seen += 1;
            if seen == n {
                return &topic[i..];
            }
        }
    }
    ""
}
