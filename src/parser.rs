/// Frame recognition, header/body parsing, and topic decompression
///
/// Recognizes frames by the `"MQTT"` prefix, splits the header into
/// `src_node/msgid` on the first `/`, walks newline-delimited body records,
/// and hands topic decompression off to `TopicTemplate` (see `topic.rs`).
/// The topic-length bound is enforced with `>=`, rejecting right at the
/// boundary rather than one byte past it.
use crate::topic::TopicTemplate;

/// Maximum topic length the parser accepts, matching the fixed-size
/// scratch buffer a constrained node would use to hold one.
pub const MAX_TOPIC_LEN: usize = 100;

/// The four protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Publish,
    Subscribe,
    Unsubscribe,
    Get,
}

impl Cmd {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'P' => Some(Cmd::Publish),
            'S' => Some(Cmd::Subscribe),
            'U' => Some(Cmd::Unsubscribe),
            'G' => Some(Cmd::Get),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Cmd::Publish => 'P',
            Cmd::Subscribe => 'S',
            Cmd::Unsubscribe => 'U',
            Cmd::Get => 'G',
        }
    }
}

/// One decoded body record, topic already decompressed to its absolute form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub cmd: Cmd,
    pub topic: String,
    pub value: Option<String>,
}

/// What a raw inbound buffer turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recognition {
    /// A full `MQTT …` frame.
    Protocol,
    /// The bare payload `ACK`.
    Ack,
    /// Anything else — a candidate for gateway-mode raw passthrough.
    Raw,
}

/// A fully parsed protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedFrame {
    pub src_node: String,
    pub msgid: [u8; 4],
    pub records: Vec<Record>,
}

/// Classify a raw inbound buffer.
pub fn recognize(bytes: &[u8]) -> Recognition {
    if bytes.starts_with(b"MQTT") && matches!(bytes.get(4), Some(b'\n') | Some(b' ')) {
        Recognition::Protocol
    } else if bytes == b"ACK" {
        Recognition::Ack
    } else {
        Recognition::Raw
    }
}

/// Parse a frame already recognized as [`Recognition::Protocol`]. `template`
/// is the engine's running topic-decompression state, threaded through so
/// dot-prefixes resolve against everything seen so far on this connection.
pub fn parse_frame(bytes: &[u8], template: &mut TopicTemplate) -> ParsedFrame {
    let header_end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
    let header_line = &bytes[..header_end];

    let (src_node, msgid) = match header_line.iter().position(|&b| b == b'/') {
        Some(slash) if header_line.len() > 5 => {
            let src_node = String::from_utf8_lossy(&header_line[5..slash]).into_owned();
            let msgid_start = slash + 1;
            let msgid_end = (msgid_start + 4).min(header_line.len());
            let mut msgid = [0u8; 4];
            for (dst, &b) in msgid.iter_mut().zip(&header_line[msgid_start..msgid_end]) {
                *dst = b;
            }
            (src_node, msgid)
        }
        _ => (String::new(), [0u8; 4]),
    };

    let body_start = if header_end < bytes.len() { header_end + 1 } else { bytes.len() };
    let body = String::from_utf8_lossy(&bytes[body_start..]);

    let records = body
        .split('\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_record(line, template))
        .collect();

    ParsedFrame { src_node, msgid, records }
}

fn parse_record(line: &str, template: &mut TopicTemplate) -> Option<Record> {
    let mut chars = line.chars();
    let cmd = Cmd::from_char(chars.next()?)?;
    if chars.next() != Some(':') {
        return None;
    }
    let rest = &line[2..];

    let (topic_raw, value) = match rest.find(' ') {
        Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
        None => (rest, None),
    };

    let topic = template.decompress(topic_raw);
    if topic.len() >= MAX_TOPIC_LEN {
        // A topic landing exactly on the buffer boundary is dropped, not
        // accepted.
        return None;
    }

    Some(Record { cmd, topic, value })
}

/// Does any record's topic begin with `<device_name>/`?
pub fn targets_self(records: &[Record], device_name: &str) -> bool {
    records.iter().any(|r| {
        r.topic.strip_prefix(device_name).and_then(|rest| rest.strip_prefix('/')).is_some()
    })
}
