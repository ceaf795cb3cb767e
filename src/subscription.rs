//! Routing of pushed messages while a `SUBSCRIBE` or `PSUBSCRIBE` is active.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::debug;

use crate::client::Callback;
use crate::commands::CommandName;
use crate::frame::Frame;
use crate::session::{into_reply, Pending};
use crate::Error;

/// The kind of a pushed message, taken from the first element of the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// `subscribe` or `psubscribe` confirmation.
    Subscribe,
    /// `unsubscribe` or `punsubscribe` confirmation.
    Unsubscribe,
    /// `message` or `pmessage`.
    Message,
    /// Reply to `PING` while subscribed.
    Pong,
    Other,
}

impl PushKind {
    /// Classifies `frame`. Returns `None` if it is not an array starting with a string.
    pub fn of(frame: &Frame) -> Option<PushKind> {
        Push::parse(frame).map(|push| push.kind)
    }
}

/// A channel name, or a pattern. Channels and patterns are separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Target {
    pattern: bool,
    name: Bytes,
}

/// The parts of a pushed message used for routing.
struct Push {
    kind: PushKind,
    pattern: bool,
    /// Element 1: the channel, or the pattern for `p` kinds. `None` when nil.
    channel: Option<Bytes>,
}

impl Push {
    fn parse(frame: &Frame) -> Option<Push> {
        let Frame::Array(items) = frame else {
            return None;
        };
        let kind = items.first()?.as_str()?;
        let is = |name: &str| kind.eq_ignore_ascii_case(name);

        let (kind, pattern) = if is("subscribe") || is("psubscribe") {
            (PushKind::Subscribe, is("psubscribe"))
        } else if is("unsubscribe") || is("punsubscribe") {
            (PushKind::Unsubscribe, is("punsubscribe"))
        } else if is("message") || is("pmessage") {
            (PushKind::Message, is("pmessage"))
        } else if is("pong") {
            (PushKind::Pong, false)
        } else {
            (PushKind::Other, false)
        };

        let channel = match items.get(1) {
            Some(Frame::Bulk(name)) => Some(name.clone()),
            Some(Frame::Simple(name)) => Some(Bytes::from(name.clone())),
            _ => None,
        };

        Some(Push {
            kind,
            pattern,
            channel,
        })
    }

    fn target(&self) -> Option<Target> {
        self.channel.clone().map(|name| Target {
            pattern: self.pattern,
            name,
        })
    }
}

/// Whether the subscription keeps reading after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Done,
}

/// A `SUBSCRIBE` or `PSUBSCRIBE` call taking part in the subscription.
struct Subscriber {
    callback: Callback,
    /// Channels it asked for that have not been confirmed yet.
    requested: Vec<Target>,
}

impl Subscriber {
    fn new(pending: Pending) -> Subscriber {
        let requested = targets(&pending);
        Subscriber {
            callback: pending.callback,
            requested,
        }
    }
}

fn targets(pending: &Pending) -> Vec<Target> {
    pending
        .channels
        .iter()
        .map(|name| Target {
            pattern: pending.name.takes_patterns(),
            name: name.clone(),
        })
        .collect()
}

/// Removes one occurrence of `target`. Returns whether there was one.
fn take(requested: &mut Vec<Target>, target: &Target) -> bool {
    match requested.iter().position(|t| t == target) {
        Some(i) => {
            requested.remove(i);
            true
        }
        None => false,
    }
}

/// An active subscription: the subscribing calls, which of them owns each open channel, the
/// number of channels the server confirmed, and the other commands issued on the session since.
pub(crate) struct Subscription {
    /// Index 0 is the call that started the subscription.
    subscribers: Vec<Subscriber>,
    owners: HashMap<Target, usize>,
    open_channels: usize,
    adopted: VecDeque<Pending>,
}

impl Subscription {
    pub(crate) fn new(pending: Pending) -> Subscription {
        Subscription {
            subscribers: vec![Subscriber::new(pending)],
            owners: HashMap::new(),
            open_channels: 0,
            adopted: VecDeque::new(),
        }
    }

    pub(crate) fn open_channels(&self) -> usize {
        self.open_channels
    }

    /// Takes over a command written while the subscription is active. Its reply arrives among
    /// the pushed messages, so it is completed from here instead of by a decoder of its own.
    pub(crate) fn adopt(&mut self, pending: Pending) {
        debug!(command = %pending.name, "command issued while subscribed");
        self.adopted.push_back(pending);
    }

    /// Delivers one decoded frame and decides whether to keep reading.
    pub(crate) fn deliver(&mut self, frame: Frame) -> Flow {
        let Some(push) = Push::parse(&frame) else {
            return self.deliver_reply(frame);
        };
        let target = push.target();

        match push.kind {
            PushKind::Subscribe => {
                self.open_channels += 1;
                let owner = target.as_ref().and_then(|t| self.claim(t)).unwrap_or(0);
                if let Some(target) = target {
                    self.owners.insert(target, owner);
                }
                self.notify(owner, frame);
                Flow::Continue
            }
            PushKind::Unsubscribe => {
                self.open_channels = self.open_channels.saturating_sub(1);
                self.complete_adopted(&frame, |pending| {
                    pending.name.takes_channels()
                        && !pending.name.is_subscription()
                        && pending.name.takes_patterns() == push.pattern
                        && (pending.channels.is_empty()
                            || push
                                .channel
                                .as_ref()
                                .is_some_and(|c| pending.channels.contains(c)))
                });
                let owner = target.and_then(|t| self.owners.remove(&t)).unwrap_or(0);
                self.notify(owner, frame);

                if self.open_channels > 0 {
                    Flow::Continue
                } else {
                    Flow::Done
                }
            }
            PushKind::Pong => {
                if !self.complete_adopted(&frame, |pending| pending.name == CommandName::Ping) {
                    self.notify(0, frame);
                }
                Flow::Continue
            }
            PushKind::Message => {
                let owner = target
                    .and_then(|t| self.owners.get(&t).copied())
                    .unwrap_or(0);
                self.notify(owner, frame);
                Flow::Continue
            }
            PushKind::Other => {
                self.notify(0, frame);
                Flow::Continue
            }
        }
    }

    /// Delivers a fatal decode error. The subscription ends with the session.
    pub(crate) fn fail(mut self, error: Error) {
        (self.subscribers[0].callback)(Err(error));
    }

    /// Commands adopted but not answered by the time the subscription ended. They are decoded
    /// normally, in order.
    pub(crate) fn into_adopted(self) -> VecDeque<Pending> {
        self.adopted
    }

    /// A reply that is not a pushed message: an error, or a plain value.
    fn deliver_reply(&mut self, frame: Frame) -> Flow {
        // Nothing was confirmed, so the subscribing command itself failed. Commands written
        // behind it get their own replies once the stream is back to one reply per command.
        if self.open_channels == 0 {
            (self.subscribers[0].callback)(into_reply(frame));
            return Flow::Done;
        }

        match self.adopted.pop_front() {
            Some(mut pending) => (pending.callback)(into_reply(frame)),
            None => (self.subscribers[0].callback)(into_reply(frame)),
        }
        Flow::Continue
    }

    /// Finds the subscriber a confirmation for `target` belongs to, in issue order. An adopted
    /// `SUBSCRIBE` only joins once one of its own channels is confirmed.
    fn claim(&mut self, target: &Target) -> Option<usize> {
        if let Some(index) = self
            .subscribers
            .iter_mut()
            .position(|subscriber| take(&mut subscriber.requested, target))
        {
            return Some(index);
        }

        let position = self.adopted.iter().position(|pending| {
            pending.name.is_subscription()
                && pending.name.takes_patterns() == target.pattern
                && pending.channels.contains(&target.name)
        })?;
        let mut subscriber = Subscriber::new(self.adopted.remove(position)?);
        take(&mut subscriber.requested, target);

        self.subscribers.push(subscriber);
        Some(self.subscribers.len() - 1)
    }

    fn notify(&mut self, index: usize, frame: Frame) {
        if let Some(subscriber) = self.subscribers.get_mut(index) {
            (subscriber.callback)(Ok(frame));
        }
    }

    fn complete_adopted<P>(&mut self, frame: &Frame, answers: P) -> bool
    where
        P: Fn(&Pending) -> bool,
    {
        let position = self.adopted.iter().position(answers);

        match position.and_then(|i| self.adopted.remove(i)) {
            Some(mut pending) => {
                (pending.callback)(Ok(frame.clone()));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<crate::Result<Frame>>>>;

    fn push(kind: &str, channel: &str, last: Frame) -> Frame {
        Frame::Array(vec![
            Frame::Bulk(Bytes::from(kind.to_string())),
            Frame::Bulk(Bytes::from(channel.to_string())),
            last,
        ])
    }

    fn message(channel: &str, payload: &str) -> Frame {
        push("message", channel, Frame::Bulk(Bytes::from(payload.to_string())))
    }

    fn recorder() -> (Callback, Calls) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let callback: Callback = {
            let calls = calls.clone();
            Box::new(move |reply| calls.lock().unwrap().push(reply))
        };
        (callback, calls)
    }

    fn pending(name: CommandName, channels: &[&str], callback: Callback) -> Pending {
        Pending {
            name,
            channels: channels.iter().map(|c| Bytes::from(c.to_string())).collect(),
            callback,
        }
    }

    /// Element 1 of every recorded frame.
    fn channels(calls: &Calls) -> Vec<String> {
        calls
            .lock()
            .unwrap()
            .iter()
            .map(|reply| match reply {
                Ok(Frame::Array(items)) => items[1].as_str().unwrap_or_default().to_string(),
                other => panic!("unexpected delivery {:?}", other),
            })
            .collect()
    }

    #[test]
    fn classify_pushed_messages() {
        assert_eq!(
            PushKind::of(&push("subscribe", "foo", Frame::Integer(1))),
            Some(PushKind::Subscribe)
        );
        assert_eq!(
            PushKind::of(&push("punsubscribe", "f*", Frame::Integer(0))),
            Some(PushKind::Unsubscribe)
        );
        assert_eq!(PushKind::of(&message("foo", "hi")), Some(PushKind::Message));
        assert_eq!(PushKind::of(&Frame::Integer(1)), None);
        assert_eq!(PushKind::of(&Frame::Array(vec![])), None);
    }

    #[test]
    fn subscribe_message_unsubscribe() {
        let (callback, calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["foo"], callback));

        let flow = subscription.deliver(push("subscribe", "foo", Frame::Integer(1)));
        assert_eq!(flow, Flow::Continue);
        assert_eq!(subscription.open_channels(), 1);

        let flow = subscription.deliver(message("foo", "hi"));
        assert_eq!(flow, Flow::Continue);
        assert_eq!(subscription.open_channels(), 1);

        let flow = subscription.deliver(push("unsubscribe", "foo", Frame::Integer(0)));
        assert_eq!(flow, Flow::Done);
        assert_eq!(subscription.open_channels(), 0);

        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn keeps_reading_while_channels_remain() {
        let (callback, _calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["a"], callback));

        subscription.deliver(push("subscribe", "a", Frame::Integer(1)));
        subscription.deliver(push("psubscribe", "b*", Frame::Integer(2)));

        let flow = subscription.deliver(push("unsubscribe", "a", Frame::Integer(1)));
        assert_eq!(flow, Flow::Continue);

        let flow = subscription.deliver(push("punsubscribe", "b*", Frame::Integer(0)));
        assert_eq!(flow, Flow::Done);
    }

    #[test]
    fn failed_subscribe_leaves_later_commands_alone() {
        let (callback, calls) = recorder();
        let (get_callback, get_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &[], callback));
        subscription.adopt(pending(CommandName::Get, &[], get_callback));

        let flow = subscription.deliver(Frame::Error("ERR wrong number of arguments".to_string()));

        assert_eq!(flow, Flow::Done);
        assert!(matches!(
            calls.lock().unwrap()[0],
            Err(Error::Server(ref msg)) if msg.starts_with("ERR wrong")
        ));
        assert!(get_calls.lock().unwrap().is_empty());

        let adopted = subscription.into_adopted();
        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted[0].name, CommandName::Get);
    }

    #[test]
    fn error_while_open_answers_the_adopted_command() {
        let (callback, calls) = recorder();
        let (get_callback, get_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["foo"], callback));

        subscription.deliver(push("subscribe", "foo", Frame::Integer(1)));
        subscription.adopt(pending(CommandName::Get, &[], get_callback));

        let error = "ERR Can't execute 'get': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context";
        let flow = subscription.deliver(Frame::Error(error.to_string()));

        assert_eq!(flow, Flow::Continue);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(matches!(get_calls.lock().unwrap()[0], Err(Error::Server(_))));
    }

    #[test]
    fn adopted_unsubscribe_completes_with_its_confirmation() {
        let (callback, calls) = recorder();
        let (unsubscribe_callback, unsubscribe_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["foo"], callback));

        subscription.deliver(push("subscribe", "foo", Frame::Integer(1)));
        subscription.adopt(pending(CommandName::Unsubscribe, &[], unsubscribe_callback));

        let flow = subscription.deliver(push("unsubscribe", "foo", Frame::Integer(0)));

        assert_eq!(flow, Flow::Done);
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(unsubscribe_calls.lock().unwrap().len(), 1);
        assert!(subscription.into_adopted().is_empty());
    }

    #[test]
    fn adopted_unsubscribe_waits_for_its_own_channel() {
        let (callback, _calls) = recorder();
        let (unsubscribe_callback, unsubscribe_calls) = recorder();
        let mut subscription =
            Subscription::new(pending(CommandName::Subscribe, &["a", "b"], callback));

        subscription.deliver(push("subscribe", "a", Frame::Integer(1)));
        subscription.deliver(push("subscribe", "b", Frame::Integer(2)));
        subscription.adopt(pending(CommandName::Unsubscribe, &["b"], unsubscribe_callback));

        subscription.deliver(push("unsubscribe", "a", Frame::Integer(1)));
        assert!(unsubscribe_calls.lock().unwrap().is_empty());

        subscription.deliver(push("unsubscribe", "b", Frame::Integer(0)));
        assert_eq!(channels(&unsubscribe_calls), vec!["b"]);
    }

    #[test]
    fn adopted_subscribe_claims_only_its_channels() {
        let (callback, calls) = recorder();
        let (second_callback, second_calls) = recorder();
        let mut subscription =
            Subscription::new(pending(CommandName::Subscribe, &["a", "b"], callback));
        subscription.adopt(pending(CommandName::Subscribe, &["c"], second_callback));

        subscription.deliver(push("subscribe", "a", Frame::Integer(1)));
        subscription.deliver(push("subscribe", "b", Frame::Integer(2)));
        subscription.deliver(push("subscribe", "c", Frame::Integer(3)));
        subscription.deliver(message("c", "to second"));
        subscription.deliver(message("a", "to first"));

        assert_eq!(channels(&calls), vec!["a", "b", "a"]);
        assert_eq!(channels(&second_calls), vec!["c", "c"]);
        assert!(subscription.into_adopted().is_empty());
    }

    #[test]
    fn pattern_messages_go_to_the_pattern_subscriber() {
        let (callback, calls) = recorder();
        let (pattern_callback, pattern_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["news"], callback));

        subscription.deliver(push("subscribe", "news", Frame::Integer(1)));
        subscription.adopt(pending(CommandName::PSubscribe, &["news"], pattern_callback));
        subscription.deliver(push("psubscribe", "news", Frame::Integer(2)));

        subscription.deliver(Frame::Array(vec![
            Frame::Bulk(Bytes::from("pmessage")),
            Frame::Bulk(Bytes::from("news")),
            Frame::Bulk(Bytes::from("news")),
            Frame::Bulk(Bytes::from("hi")),
        ]));
        subscription.deliver(message("news", "hi"));

        assert_eq!(channels(&calls), vec!["news", "news"]);
        assert_eq!(channels(&pattern_calls), vec!["news", "news"]);
        assert!(matches!(
            &pattern_calls.lock().unwrap()[1],
            Ok(Frame::Array(items)) if items[0].as_str() == Some("pmessage")
        ));
    }

    #[test]
    fn adopted_ping_takes_the_pong() {
        let (callback, calls) = recorder();
        let (ping_callback, ping_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["foo"], callback));

        subscription.deliver(push("subscribe", "foo", Frame::Integer(1)));
        subscription.adopt(pending(CommandName::Ping, &[], ping_callback));

        let pong = Frame::Array(vec![Frame::Bulk(Bytes::from("pong")), Frame::Bulk(Bytes::new())]);
        assert_eq!(subscription.deliver(pong.clone()), Flow::Continue);

        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(ping_calls.lock().unwrap()[0].as_ref().unwrap(), &pong);
    }

    #[test]
    fn unanswered_adopted_commands_are_handed_back() {
        let (callback, _calls) = recorder();
        let (second_callback, _second_calls) = recorder();
        let mut subscription = Subscription::new(pending(CommandName::Subscribe, &["foo"], callback));

        subscription.deliver(push("subscribe", "foo", Frame::Integer(1)));
        subscription.adopt(pending(CommandName::Unsubscribe, &[], Box::new(|_| {})));
        subscription.adopt(pending(CommandName::Unsubscribe, &[], second_callback));
        subscription.deliver(push("unsubscribe", "foo", Frame::Integer(0)));

        let adopted = subscription.into_adopted();
        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted[0].name, CommandName::Unsubscribe);
    }
}
