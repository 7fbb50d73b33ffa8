/// Outbound frame construction
///
/// Builds a `MQTT <self>/<random4>` header, packs up to three records per
/// frame before flushing, keeps the first record of each frame absolute
/// with the rest dot-compressed against it, and trails every `S:`/`G:`
/// record with a companion `G:` record.
use crate::clock::Rng;
use crate::parser::Cmd;
use crate::topic::TopicTemplate;

const ALNUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Records are flushed into a frame once this many have accumulated.
const RECORDS_PER_FRAME: usize = 3;

fn random_msgid(rng: &dyn Rng) -> String {
    (0..4)
        .map(|_| ALNUM[rng.uniform(ALNUM.len() as u32) as usize] as char)
        .collect()
}

/// If `topic` ends in `/set` or `/value`, the sibling topic with that
/// suffix swapped — the companion record a subscribe/get batch also sends
/// to request (or register) the counterpart.
fn companion(topic: &str) -> Option<String> {
    if let Some(prefix) = topic.strip_suffix("/set") {
        Some(format!("{prefix}/value"))
    } else if let Some(prefix) = topic.strip_suffix("/value") {
        Some(format!("{prefix}/set"))
    } else {
        None
    }
}

/// Builds outbound frames for this node, tracking the dot-compression
/// template across records within a frame (reset at the start of every
/// frame — each frame's first record is always absolute).
pub struct Formatter {
    device_name: String,
    template: TopicTemplate,
}

impl Formatter {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            template: TopicTemplate::new(),
        }
    }

    /// Format a single record as one frame.
    pub fn format_one(&mut self, rng: &dyn Rng, cmd: Cmd, topic: &str, value: Option<&str>) -> Vec<u8> {
        self.format(rng, cmd, std::slice::from_ref(&(topic.to_string(), value.map(str::to_string))))
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Format a batch of same-`cmd` records, splitting into multiple frames
    /// as needed. For `Subscribe`/`Get`, each primary record is immediately
    /// followed by its companion record.
    pub fn format(
        &mut self,
        rng: &dyn Rng,
        cmd: Cmd,
        topic_values: &[(String, Option<String>)],
    ) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut body = String::new();
        let mut count = 0usize;
        self.template.reset();

        for (topic, value) in topic_values {
            self.push_line(&mut body, cmd, topic, value.as_deref());
            count += 1;

            if matches!(cmd, Cmd::Subscribe | Cmd::Get) {
                if let Some(companion_topic) = companion(topic) {
                    self.push_line(&mut body, Cmd::Get, &companion_topic, None);
                    count += 1;
                }
            }

            if count >= RECORDS_PER_FRAME {
                frames.push(self.finish_frame(rng, &mut body));
                self.template.reset();
                count = 0;
            }
        }

        if !body.is_empty() {
            frames.push(self.finish_frame(rng, &mut body));
        }

        frames
    }

    /// The literal `ACK` payload sent in reply to a frame.
    pub fn format_ack() -> Vec<u8> {
        b"ACK".to_vec()
    }

    fn push_line(&mut self, body: &mut String, cmd: Cmd, topic: &str, value: Option<&str>) {
        let compressed = self.template.compress(topic);
        body.push(cmd.as_char());
        body.push(':');
        body.push_str(&compressed);
        if let Some(v) = value {
            body.push(' ');
            body.push_str(v);
        }
        body.push('\n');
    }

    fn finish_frame(&self, rng: &dyn Rng, body: &mut String) -> Vec<u8> {
        let mut out = format!("MQTT {}/{}\n", self.device_name, random_msgid(rng)).into_bytes();
        out.extend_from_slice(body.as_bytes());
        body.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ZeroRng;
    use crate::parser::{parse_frame, Cmd};

    #[test]
    fn single_publish_is_one_frame_with_absolute_topic() {
        let mut f = Formatter::new("kitchen");
        let bytes = f.format_one(&ZeroRng, Cmd::Publish, "kitchen/switch/k1/value", Some("on"));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("MQTT kitchen/"));
        assert!(text.contains("P:kitchen/switch/k1/value on\n"));
    }

    #[test]
    fn batch_of_four_names_splits_into_two_frames_with_compression() {
        let mut f = Formatter::new("kitchen");
        let names = ["a", "b", "c", "d"];
        let records: Vec<_> = names
            .iter()
            .map(|n| (format!("kitchen/switch/{n}/value"), Some("on".to_string())))
            .collect();

        let frames = f.format(&ZeroRng, Cmd::Publish, &records);
        assert_eq!(frames.len(), 2);

        let first = String::from_utf8(frames[0].clone()).unwrap();
        assert!(first.contains("P:kitchen/switch/a/value on\n"));
        assert!(first.contains("P:..b/value on\n") || first.contains("P:...b on\n") || first.contains("/b/value"));

        let second = String::from_utf8(frames[1].clone()).unwrap();
        // second frame starts a fresh absolute topic for `d`
        assert!(second.contains("P:kitchen/switch/d/value on\n"));
    }

    #[test]
    fn subscribe_batch_emits_companion_value_record() {
        let mut f = Formatter::new("kitchen");
        let records = vec![("kitchen/switch/k1/set".to_string(), None)];
        let frames = f.format(&ZeroRng, Cmd::Subscribe, &records);
        let text = String::from_utf8(frames[0].clone()).unwrap();
        assert!(text.contains("S:kitchen/switch/k1/set\n"));
        assert!(text.contains("G:") && text.contains("/value\n"));
    }

    #[test]
    fn formatted_frame_round_trips_through_the_parser() {
        let mut f = Formatter::new("kitchen");
        let bytes = f.format_one(&ZeroRng, Cmd::Publish, "kitchen/switch/k1/value", Some("on"));
        let mut template = crate::topic::TopicTemplate::new();
        let parsed = parse_frame(&bytes, &mut template);
        assert_eq!(parsed.src_node, "kitchen");
        assert_eq!(parsed.records[0].topic, "kitchen/switch/k1/value");
        assert_eq!(parsed.records[0].value.as_deref(), Some("on"));
    }

    #[test]
    fn ack_payload_is_the_bare_literal() {
        assert_eq!(Formatter::format_ack(), b"ACK".to_vec());
    }
}
