// SPDX-License-Identifier: MIT
//
// Registry of live child terminals, polled round-robin on the UI thread.
//
// The host owns one registry and passes it where it is needed; there is no
// global list. `poll_each` snapshots the ids before it starts, so the
// callback may remove or destroy any terminal (itself included) and the
// iteration simply skips ids that are gone.
//
// While the registry holds at least one terminal it keeps a `ChildWatch`,
// which keeps the SIGCHLD handler installed. Removing the last terminal
// drops the watch and the previous handler comes back.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

#[cfg(unix)]
use crate::signals::{self, ChildWatch};
use crate::session::{Channel, PollStatus, Session};

/// What the registry needs from a terminal.
pub trait ChildTerminal {
    /// Wait up to `timeout` for output and apply it.
    fn poll(&mut self, timeout: Duration) -> PollStatus;
    /// Check, without blocking, whether the child exited.
    fn reap(&mut self);
    /// Terminate the child. Harmless if it already exited.
    fn kill(&mut self);
}

impl<C: Channel> ChildTerminal for Session<C> {
    fn poll(&mut self, timeout: Duration) -> PollStatus {
        Session::poll(self, timeout)
    }

    fn reap(&mut self) {
        Session::reap(self);
    }

    fn kill(&mut self) {
        Session::kill(self);
    }
}

/// Stable handle to a registered terminal. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerminalId(u64);

impl std::fmt::Display for TerminalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The set of active terminals.
pub struct TerminalRegistry<T> {
    terminals: BTreeMap<TerminalId, T>,
    next_id: u64,
    /// Rotates the starting terminal of each `poll_each`.
    turn: usize,
    #[cfg(unix)]
    watch: Option<ChildWatch>,
}

impl<T: ChildTerminal> TerminalRegistry<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            terminals: BTreeMap::new(),
            next_id: 0,
            turn: 0,
            #[cfg(unix)]
            watch: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: TerminalId) -> Option<&T> {
        self.terminals.get(&id)
    }

    pub fn get_mut(&mut self, id: TerminalId) -> Option<&mut T> {
        self.terminals.get_mut(&id)
    }

    /// Registered ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = TerminalId> + '_ {
        self.terminals.keys().copied()
    }

    /// Register a terminal.
    ///
    /// # Errors
    ///
    /// Fails if the child-exit handler cannot be installed for the first
    /// terminal. The terminal is not registered then.
    pub fn insert(&mut self, terminal: T) -> io::Result<TerminalId> {
        #[cfg(unix)]
        if self.watch.is_none() {
            self.watch = Some(ChildWatch::acquire()?);
        }
        let id = TerminalId(self.next_id);
        self.next_id += 1;
        self.terminals.insert(id, terminal);
        tracing::debug!(%id, live = self.terminals.len(), "terminal registered");
        Ok(id)
    }

    /// Unregister a terminal and hand it back without killing it.
    pub fn remove(&mut self, id: TerminalId) -> Option<T> {
        let terminal = self.terminals.remove(&id)?;
        tracing::debug!(%id, live = self.terminals.len(), "terminal unregistered");
        if self.terminals.is_empty() {
            #[cfg(unix)]
            {
                self.watch = None;
            }
        }
        Some(terminal)
    }

    /// Unregister a terminal and kill its child. Returns whether it existed.
    pub fn destroy(&mut self, id: TerminalId) -> bool {
        let Some(mut terminal) = self.remove(id) else {
            return false;
        };
        terminal.kill();
        true
    }

    /// Kill every child and empty the registry.
    pub fn destroy_all(&mut self) {
        let ids: Vec<TerminalId> = self.ids().collect();
        for id in ids {
            self.destroy(id);
        }
    }

    /// Poll every terminal once, starting one further along each call.
    ///
    /// `timeout` is shared evenly. After each poll `f` gets the registry
    /// back, so it may remove terminals; ones removed before their turn are
    /// skipped.
    pub fn poll_each(&mut self, timeout: Duration, mut f: impl FnMut(&mut Self, TerminalId, PollStatus)) {
        let mut ids: Vec<TerminalId> = self.ids().collect();
        if ids.is_empty() {
            return;
        }
        let start = self.turn % ids.len();
        ids.rotate_left(start);
        self.turn = self.turn.wrapping_add(1);

        if child_exited() {
            for terminal in self.terminals.values_mut() {
                terminal.reap();
            }
        }

        let share = timeout / u32::try_from(ids.len()).unwrap_or(u32::MAX);
        for id in ids {
            let Some(terminal) = self.terminals.get_mut(&id) else {
                continue;
            };
            let status = terminal.poll(share);
            f(self, id, status);
        }
    }
}

impl<T: ChildTerminal> Default for TerminalRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TerminalRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalRegistry")
            .field("ids", &self.terminals.keys().collect::<Vec<_>>())
            .field("turn", &self.turn)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn child_exited() -> bool {
    signals::take_child_exited()
}

// Without a child-exit signal, ask every child every time.
#[cfg(not(unix))]
const fn child_exited() -> bool {
    true
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Records what happened to it in a shared log.
    struct Fake {
        name: &'static str,
        script: VecDeque<PollStatus>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl ChildTerminal for Fake {
        fn poll(&mut self, _timeout: Duration) -> PollStatus {
            self.log.borrow_mut().push(format!("poll {}", self.name));
            self.script.pop_front().unwrap_or(PollStatus::Idle)
        }

        fn reap(&mut self) {}

        fn kill(&mut self) {
            self.log.borrow_mut().push(format!("kill {}", self.name));
        }
    }

    fn fake(name: &'static str, log: &Rc<RefCell<Vec<String>>>, script: &[PollStatus]) -> Fake {
        Fake {
            name,
            script: script.iter().copied().collect(),
            log: Rc::clone(log),
        }
    }

    fn polled(log: &Rc<RefCell<Vec<String>>>) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    // ── Membership ──────────────────────────────────────────────────────

    #[test]
    fn ids_are_unique_and_ordered() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        let a = reg.insert(fake("a", &log, &[])).unwrap();
        let b = reg.insert(fake("b", &log, &[])).unwrap();
        assert!(a < b);
        assert!(reg.remove(a).is_some());
        let c = reg.insert(fake("c", &log, &[])).unwrap();
        assert_ne!(a, c);
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn destroy_kills_remove_does_not() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        let a = reg.insert(fake("a", &log, &[])).unwrap();
        let b = reg.insert(fake("b", &log, &[])).unwrap();
        assert!(reg.remove(a).is_some());
        assert!(reg.destroy(b));
        assert!(!reg.destroy(b));
        assert_eq!(polled(&log), vec!["kill b"]);
        assert!(reg.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn watch_is_held_while_terminals_live() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        assert!(reg.watch.is_none());
        let a = reg.insert(fake("a", &log, &[])).unwrap();
        assert!(reg.watch.is_some());
        assert!(signals::is_installed());
        reg.destroy(a);
        assert!(reg.watch.is_none());
    }

    // ── Round-robin ─────────────────────────────────────────────────────

    #[test]
    fn start_rotates_each_round() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        for name in ["a", "b", "c"] {
            reg.insert(fake(name, &log, &[])).unwrap();
        }
        reg.poll_each(Duration::ZERO, |_, _, _| {});
        assert_eq!(polled(&log), vec!["poll a", "poll b", "poll c"]);
        reg.poll_each(Duration::ZERO, |_, _, _| {});
        assert_eq!(polled(&log), vec!["poll b", "poll c", "poll a"]);
    }

    #[test]
    fn callback_sees_each_status() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        let a = reg.insert(fake("a", &log, &[PollStatus::Updated])).unwrap();
        let b = reg.insert(fake("b", &log, &[PollStatus::Disconnected])).unwrap();
        let mut seen = Vec::new();
        reg.poll_each(Duration::ZERO, |_, id, status| seen.push((id, status)));
        assert_eq!(seen, vec![(a, PollStatus::Updated), (b, PollStatus::Disconnected)]);
    }

    // ── Removal during iteration ────────────────────────────────────────

    #[test]
    fn disconnected_terminals_can_destroy_themselves() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        reg.insert(fake("a", &log, &[PollStatus::Disconnected])).unwrap();
        let b = reg.insert(fake("b", &log, &[])).unwrap();
        reg.poll_each(Duration::ZERO, |reg, id, status| {
            if status == PollStatus::Disconnected {
                reg.destroy(id);
            }
        });
        assert_eq!(polled(&log), vec!["poll a", "kill a", "poll b"]);
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn removing_a_later_terminal_skips_it() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        reg.insert(fake("a", &log, &[])).unwrap();
        let b = reg.insert(fake("b", &log, &[])).unwrap();
        reg.poll_each(Duration::ZERO, |reg, _, _| {
            reg.remove(b);
        });
        assert_eq!(polled(&log), vec!["poll a"]);
    }

    #[test]
    fn destroy_all_empties() {
        let log = Rc::default();
        let mut reg = TerminalRegistry::new();
        reg.insert(fake("a", &log, &[])).unwrap();
        reg.insert(fake("b", &log, &[])).unwrap();
        reg.destroy_all();
        assert!(reg.is_empty());
        assert_eq!(polled(&log), vec!["kill a", "kill b"]);
    }
}
