/// Operational mode policy
///
/// Selects which inbound frames are dispatched to user callbacks and which
/// are acknowledged, across the four supported node roles.

/// The node's current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpMode {
    /// Only frames targeting this node are dispatched and ACKed. No raw
    /// passthrough.
    #[default]
    NodeStd,
    /// Every frame is dispatched, but only frames targeting this node are
    /// ACKed. No raw passthrough.
    NodeReceiveAll,
    /// Every frame is dispatched. Every frame carrying a nonzero reply
    /// token is ACKed, regardless of target. Non-protocol payloads reach
    /// the raw callback.
    GwAckAll,
    /// Every frame is dispatched, but only frames targeting this node are
    /// ACKed. Non-protocol payloads reach the raw callback.
    GwAckMy,
}

/// The decision the engine makes for one inbound frame under the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Whether the publish/subscribe/get callback should fire for this frame
    pub dispatch: bool,
    /// Whether an ACK should be sent back on this frame's reply token
    pub send_ack: bool,
    /// Whether a non-protocol payload should reach the raw callback
    pub raw_passthrough: bool,
}

impl OpMode {
    /// Decide dispatch/ack behavior for a protocol frame.
    ///
    /// `targets_self` is true iff any of the frame's decompressed topics
    /// begins with `<self>/`. `has_reply` is true iff the transport handed
    /// back a nonzero reply token for this frame.
    pub fn policy_for(self, targets_self: bool, has_reply: bool) -> Policy {
        let dispatch = match self {
            OpMode::NodeStd => targets_self,
            OpMode::NodeReceiveAll | OpMode::GwAckAll | OpMode::GwAckMy => true,
        };

        let send_ack = has_reply
            && match self {
                OpMode::NodeStd | OpMode::NodeReceiveAll | OpMode::GwAckMy => targets_self,
                OpMode::GwAckAll => true,
            };

        let raw_passthrough = matches!(self, OpMode::GwAckAll | OpMode::GwAckMy);

        Policy {
            dispatch,
            send_ack,
            raw_passthrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_std_only_acts_on_self() {
        let p = OpMode::NodeStd.policy_for(true, true);
        assert!(p.dispatch && p.send_ack && !p.raw_passthrough);

        let p = OpMode::NodeStd.policy_for(false, true);
        assert!(!p.dispatch && !p.send_ack);
    }

    #[test]
    fn node_receive_all_dispatches_everything_but_acks_only_self() {
        let p = OpMode::NodeReceiveAll.policy_for(false, true);
        assert!(p.dispatch && !p.send_ack && !p.raw_passthrough);

        let p = OpMode::NodeReceiveAll.policy_for(true, true);
        assert!(p.dispatch && p.send_ack);
    }

    #[test]
    fn gw_ack_all_acks_everything_with_a_reply_token() {
        let p = OpMode::GwAckAll.policy_for(false, true);
        assert!(p.dispatch && p.send_ack && p.raw_passthrough);

        let p = OpMode::GwAckAll.policy_for(false, false);
        assert!(!p.send_ack);
    }

    #[test]
    fn gw_ack_my_acks_only_self_but_has_raw_passthrough() {
        let p = OpMode::GwAckMy.policy_for(false, true);
        assert!(p.dispatch && !p.send_ack && p.raw_passthrough);

        let p = OpMode::GwAckMy.policy_for(true, true);
        assert!(p.send_ack);
    }

    #[test]
    fn no_ack_without_a_reply_token() {
        for mode in [
            OpMode::NodeStd,
            OpMode::NodeReceiveAll,
            OpMode::GwAckAll,
            OpMode::GwAckMy,
        ] {
            assert!(!mode.policy_for(true, false).send_ack);
        }
    }
}
