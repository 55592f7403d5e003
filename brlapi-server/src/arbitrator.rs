//! C7: arbitrator (spec.md §3, §4.7).
//!
//! Decides, for a given tty, which one of the possibly several
//! attached connections actually drives the physical display: the
//! highest-priority connection at the tty the focus chain resolves to.
//! When nothing is attached there, the core's own cached window is
//! shown instead, so the display never goes blank just because no
//! BrlAPI client happens to be connected.
//!
//! Mutex ordering note (spec.md §5): the arbitrator's lock is always
//! taken after the connection registry's and before any per-connection
//! lock.

use brlapi_core::connection::ConnectionId;
use brlapi_core::tty::{TtyId, TtyTree, NOTTY, ROOT};
use brlapi_core::window::BrailleWindow;

#[derive(Debug)]
pub struct Arbitrator {
    tree: TtyTree,
    core_window: BrailleWindow,
    core_active: bool,
    offline: bool,
    driver_constructed: bool,
}

impl Arbitrator {
    pub fn new(display_size: usize) -> Self {
        Self {
            tree: TtyTree::new(),
            core_window: BrailleWindow::new(display_size),
            core_active: true,
            offline: false,
            driver_constructed: false,
        }
    }

    pub fn tree_mut(&mut self) -> &mut TtyTree {
        &mut self.tree
    }

    pub fn tree(&self) -> &TtyTree {
        &self.tree
    }

    pub fn core_window_mut(&mut self) -> &mut BrailleWindow {
        &mut self.core_window
    }

    pub fn core_active(&self) -> bool {
        self.core_active
    }

    pub fn set_core_active(&mut self, active: bool) {
        self.core_active = active;
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn driver_constructed(&self) -> bool {
        self.driver_constructed
    }

    pub fn set_driver_constructed(&mut self, constructed: bool) {
        self.driver_constructed = constructed;
    }

    /// Attaches `connection` at `tty` with `priority`, used for
    /// ordering when more than one connection competes for the same
    /// tty (spec.md §4.7).
    pub fn attach(&mut self, tty: TtyId, connection: ConnectionId, priority: u32) {
        if tty != NOTTY {
            self.tree.add_connection(tty, connection, priority);
        }
    }

    pub fn detach(&mut self, tty: TtyId, connection: ConnectionId) {
        if tty != NOTTY {
            self.tree.remove_connection(tty, connection);
        }
    }

    /// The connection that should own the driver for `tty`, following
    /// that tty's focus chain and picking the highest-priority
    /// connection at the resolved node. `None` means the core itself
    /// owns the display there.
    pub fn active_connection(&self, tty: TtyId) -> Option<ConnectionId> {
        let resolved = self.tree.resolve_focus(tty);
        self.tree.connections_at(resolved).into_iter().next()
    }

    /// Picks which window to render for `tty`: the active connection's
    /// own window, or the core's cached window if nobody is attached.
    pub fn render_target(&self, tty: TtyId) -> RenderTarget {
        match self.active_connection(tty) {
            Some(connection) => RenderTarget::Connection(connection),
            None => RenderTarget::Core,
        }
    }

    pub fn default_tty(&self) -> TtyId {
        ROOT
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderTarget {
    Connection(ConnectionId),
    Core,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    #[test]
    fn no_attachment_renders_core() {
        let arbitrator = Arbitrator::new(40);
        assert_eq!(arbitrator.render_target(ROOT), RenderTarget::Core);
    }

    #[test]
    fn highest_priority_connection_wins() {
        let mut arbitrator = Arbitrator::new(40);
        let tty = arbitrator.tree_mut().ensure_path(&[1]);
        arbitrator.attach(tty, conn(1), 10);
        arbitrator.attach(tty, conn(2), 90);
        assert_eq!(arbitrator.active_connection(tty), Some(conn(2)));
    }

    #[test]
    fn detach_falls_back_to_core() {
        let mut arbitrator = Arbitrator::new(40);
        let tty = arbitrator.tree_mut().ensure_path(&[1]);
        arbitrator.attach(tty, conn(1), 50);
        arbitrator.detach(tty, conn(1));
        assert_eq!(arbitrator.render_target(tty), RenderTarget::Core);
    }

    #[test]
    fn focus_forwards_rendering_to_child() {
        let mut arbitrator = Arbitrator::new(40);
        let parent = arbitrator.tree_mut().ensure_path(&[1]);
        let child = arbitrator.tree_mut().ensure_path(&[1, 2]);
        arbitrator.attach(child, conn(1), 50);
        arbitrator.tree_mut().set_focus(parent, Some(child));
        assert_eq!(arbitrator.active_connection(parent), Some(conn(1)));
    }
}
