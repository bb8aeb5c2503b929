//! User interaction events and one-shot listener sets.
//!
//! Autoplay policies only allow audio after the user interacts with the host.
//! The host forwards interactions through an [`InteractionSender`]; the audio
//! state machine arms a [`ListenerSet`] and the first interaction of an armed
//! kind disarms the whole set.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Kind of user interaction that can unlock audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Keydown,
    Touchstart,
    Scroll,
    Mousemove,
}

impl InteractionKind {
    pub const ALL: [Self; 5] = [
        Self::Click,
        Self::Keydown,
        Self::Touchstart,
        Self::Scroll,
        Self::Mousemove,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Keydown => "keydown",
            Self::Touchstart => "touchstart",
            Self::Scroll => "scroll",
            Self::Mousemove => "mousemove",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown interaction kind: {s}. Expected one of: click, keydown, touchstart, scroll, mousemove"
                )
            })
    }
}

/// Handle identifying one arming of a [`ListenerSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    generation: u64,
}

impl Subscription {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A set of interaction listeners armed and disarmed together.
#[derive(Debug, Clone)]
pub struct ListenerSet {
    kinds: BTreeSet<InteractionKind>,
    active: Option<Subscription>,
    generation: u64,
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new(InteractionKind::ALL)
    }
}

impl ListenerSet {
    #[must_use]
    pub fn new(kinds: impl IntoIterator<Item = InteractionKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            active: None,
            generation: 0,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = InteractionKind> + '_ {
        self.kinds.iter().copied()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.active.is_some()
    }

    /// Arm every listener. Arming an armed set returns the existing
    /// subscription, so listeners are never registered twice.
    pub fn arm(&mut self) -> Subscription {
        if let Some(active) = self.active {
            return active;
        }
        self.generation += 1;
        let subscription = Subscription {
            generation: self.generation,
        };
        self.active = Some(subscription);
        trace!(generation = self.generation, "Interaction listeners armed");
        subscription
    }

    /// Tear down the set if `subscription` is still the active one.
    pub fn cancel(&mut self, subscription: Subscription) -> bool {
        if self.active == Some(subscription) {
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Deliver an interaction. Returns the subscription that fired, after
    /// disarming the whole set, or `None` when the event is ignored.
    pub fn accept(&mut self, kind: InteractionKind) -> Option<Subscription> {
        let active = self.active?;
        if !self.kinds.contains(&kind) {
            return None;
        }
        self.active = None;
        trace!(interaction = %kind, generation = active.generation, "Interaction listener fired");
        Some(active)
    }
}

/// Sending half used by the host to forward interactions.
#[derive(Debug, Clone)]
pub struct InteractionSender {
    tx: mpsc::Sender<InteractionKind>,
}

impl InteractionSender {
    /// Forward an interaction without waiting. Dropped when the controller
    /// is gone or its queue is full.
    pub fn notify(&self, kind: InteractionKind) -> bool {
        self.tx.try_send(kind).is_ok()
    }

    /// Forward an interaction, waiting for queue capacity.
    pub async fn send(&self, kind: InteractionKind) -> bool {
        self.tx.send(kind).await.is_ok()
    }
}

pub type InteractionReceiver = mpsc::Receiver<InteractionKind>;

/// Create a bounded interaction channel.
#[must_use]
pub fn channel(capacity: usize) -> (InteractionSender, InteractionReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InteractionSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Click".parse::<InteractionKind>().unwrap(), InteractionKind::Click);
        assert_eq!(
            " keydown ".parse::<InteractionKind>().unwrap(),
            InteractionKind::Keydown
        );
        assert!("hover".parse::<InteractionKind>().is_err());
    }

    #[test]
    fn set_is_one_shot() {
        let mut set = ListenerSet::default();
        assert!(set.accept(InteractionKind::Click).is_none());

        let sub = set.arm();
        assert_eq!(set.accept(InteractionKind::Scroll), Some(sub));
        assert!(!set.is_armed());
        assert!(set.accept(InteractionKind::Click).is_none());
    }

    #[test]
    fn unarmed_kinds_are_ignored() {
        let mut set = ListenerSet::new([InteractionKind::Click]);
        set.arm();
        assert!(set.accept(InteractionKind::Mousemove).is_none());
        assert!(set.is_armed());
        assert!(set.accept(InteractionKind::Click).is_some());
    }

    #[test]
    fn arming_twice_keeps_one_subscription() {
        let mut set = ListenerSet::default();
        let a = set.arm();
        let b = set.arm();
        assert_eq!(a, b);
        assert!(set.cancel(a));
        let c = set.arm();
        assert!(c.generation() > a.generation());
    }

    #[test]
    fn stale_subscription_cannot_cancel() {
        let mut set = ListenerSet::default();
        let old = set.arm();
        assert!(set.cancel(old));
        let _new = set.arm();
        assert!(!set.cancel(old));
        assert!(set.is_armed());
    }

    #[tokio::test]
    async fn channel_forwards_interactions() {
        let (tx, mut rx) = channel(4);
        assert!(tx.notify(InteractionKind::Keydown));
        assert!(tx.send(InteractionKind::Click).await);
        assert_eq!(rx.recv().await, Some(InteractionKind::Keydown));
        assert_eq!(rx.recv().await, Some(InteractionKind::Click));
        drop(rx);
        assert!(!tx.notify(InteractionKind::Click));
    }
}
