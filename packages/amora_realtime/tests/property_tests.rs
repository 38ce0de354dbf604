use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;

use amora_realtime::frame::PresenceStatus;
use amora_realtime::message::Message;
use amora_realtime::timeline::{Timeline, merge_messages};
use amora_realtime::{PresenceTracker, ReconnectPolicy, TypingTracker};

// --- Message lists ---

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_773_847_200 + secs, 0).unwrap()
}

/// Small id and time spaces so overlaps and equal timestamps are common.
fn arb_message() -> impl Strategy<Value = Message> {
    (0u8..12, 0i64..20, any::<bool>(), any::<bool>()).prop_map(|(id, secs, from_sam, is_read)| {
        let (sender, receiver) = if from_sam { ("sam", "me") } else { ("me", "sam") };
        Message {
            message_id: format!("m-{id}"),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            content: format!("#{id}"),
            sent_at: ts(secs),
            is_read,
            read_at: None,
        }
    })
}

/// A list of messages where each id maps to one fixed timestamp, as the
/// server guarantees.
fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(), 0..16).prop_map(|mut msgs| {
        for m in &mut msgs {
            let n: i64 = m.message_id[2..].parse().unwrap();
            m.sent_at = ts(n * 3 % 20);
        }
        msgs
    })
}

fn is_sorted(msgs: &[Message]) -> bool {
    msgs.windows(2).all(|w| w[0].sent_at <= w[1].sent_at)
}

proptest! {
    #[test]
    fn merge_has_each_id_once(base in arb_history(), pushed in arb_history()) {
        let merged = merge_messages(&base, &pushed);
        let ids: Vec<&str> = merged.iter().map(|m| m.message_id.as_str()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len());

        let expected: HashSet<&str> = base
            .iter()
            .chain(&pushed)
            .map(|m| m.message_id.as_str())
            .collect();
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn merge_is_sorted(base in arb_history(), pushed in arb_history()) {
        prop_assert!(is_sorted(&merge_messages(&base, &pushed)));
    }

    #[test]
    fn merge_is_idempotent(base in arb_history(), pushed in arb_history()) {
        let once = merge_messages(&base, &pushed);
        let twice = merge_messages(&once, &pushed);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn timeline_never_drops_unconfirmed_pushes(
        polls in prop::collection::vec(arb_history(), 1..5),
        pushes in arb_history(),
    ) {
        let mut tl = Timeline::new("sam");
        for m in pushes.clone() {
            tl.ingest_push(m);
        }
        for poll in &polls {
            tl.replace_base(poll.clone());
            prop_assert!(is_sorted(tl.messages()));
        }

        let ever_polled: HashSet<&str> = polls
            .iter()
            .flatten()
            .map(|m| m.message_id.as_str())
            .collect();
        let last_poll: HashSet<&str> = polls
            .last()
            .into_iter()
            .flatten()
            .map(|m| m.message_id.as_str())
            .collect();
        let present: HashSet<&str> = tl.messages().iter().map(|m| m.message_id.as_str()).collect();
        for m in &pushes {
            let id = m.message_id.as_str();
            // Only the server removing a confirmed message makes it disappear
            if !ever_polled.contains(id) || last_poll.contains(id) {
                prop_assert!(present.contains(id), "{} missing", id);
            }
        }
    }

    #[test]
    fn newly_observed_ids_are_reported_once(
        polls in prop::collection::vec(arb_history(), 1..5),
        pushes in arb_history(),
    ) {
        let mut tl = Timeline::new("sam");
        let mut reported: Vec<String> = Vec::new();
        for m in pushes {
            reported.extend(tl.ingest_push(m));
        }
        for poll in polls {
            reported.extend(tl.replace_base(poll));
        }
        let unique: HashSet<&String> = reported.iter().collect();
        prop_assert_eq!(unique.len(), reported.len());
    }
}

// --- Trackers ---

#[derive(Debug, Clone)]
enum PresenceOp {
    Online(u8),
    Offline(u8),
}

fn arb_presence_op() -> impl Strategy<Value = PresenceOp> {
    prop_oneof![
        (0u8..6).prop_map(PresenceOp::Online),
        (0u8..6).prop_map(PresenceOp::Offline),
    ]
}

fn apply_presence(p: &mut PresenceTracker, op: &PresenceOp) {
    match op {
        PresenceOp::Online(u) => p.apply(&format!("u-{u}"), PresenceStatus::Online),
        PresenceOp::Offline(u) => p.apply(&format!("u-{u}"), PresenceStatus::Offline),
    }
}

proptest! {
    #[test]
    fn presence_ops_are_idempotent(ops in prop::collection::vec(arb_presence_op(), 0..40)) {
        let mut once = PresenceTracker::new();
        let mut doubled = PresenceTracker::new();
        for op in &ops {
            apply_presence(&mut once, op);
            apply_presence(&mut doubled, op);
            apply_presence(&mut doubled, op);
        }
        let a: HashSet<&str> = once.online_users().collect();
        let b: HashSet<&str> = doubled.online_users().collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn presence_reflects_last_frame_per_user(ops in prop::collection::vec(arb_presence_op(), 0..40)) {
        let mut p = PresenceTracker::new();
        for op in &ops {
            apply_presence(&mut p, op);
        }
        for u in 0u8..6 {
            let last = ops.iter().rev().find_map(|op| match op {
                PresenceOp::Online(x) if *x == u => Some(true),
                PresenceOp::Offline(x) if *x == u => Some(false),
                _ => None,
            });
            prop_assert_eq!(p.is_online(&format!("u-{u}")), last.unwrap_or(false));
        }
    }

    #[test]
    fn typing_map_only_holds_true(ops in prop::collection::vec((0u8..6, any::<bool>()), 0..40)) {
        let mut t = TypingTracker::new();
        for (u, typing) in &ops {
            t.apply(&format!("u-{u}"), *typing);
        }
        for u in t.typing_users() {
            prop_assert!(t.is_typing(u));
        }
    }
}

// --- Backoff ---

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(base_ms in 1u64..5_000, cap_ms in 1u64..120_000, max in 0u32..12) {
        let policy = ReconnectPolicy {
            base: std::time::Duration::from_millis(base_ms),
            cap: std::time::Duration::from_millis(cap_ms),
            max_attempts: max,
        };
        let delays: Vec<_> = (1..=max).map(|a| policy.delay_for(a).unwrap()).collect();
        prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(delays.iter().all(|d| d.as_millis() as u64 <= cap_ms));
        prop_assert!(policy.delay_for(max + 1).is_none());
    }
}
