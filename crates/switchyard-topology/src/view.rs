//! Immutable snapshots of the discovered topology.

use std::collections::BTreeMap;

/// An OpenFlow switch known to the topology service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Datapath identifier.
    pub dpid: u64,
    /// Whether the switch is currently connected.
    pub up: bool,
}

/// A physical or logical port on a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    /// Datapath identifier of the owning switch.
    pub dpid: u64,
    /// Port number within the switch.
    pub port_no: u16,
    /// Whether the port is administratively and physically up.
    pub up: bool,
}

/// A directed switch-to-switch link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Source switch.
    pub from_dpid: u64,
    /// Egress port on the source switch.
    pub from_port: u16,
    /// Destination switch.
    pub to_dpid: u64,
    /// Ingress port on the destination switch.
    pub to_port: u16,
    /// Whether the link is currently usable.
    pub up: bool,
}

/// One consistent view of the network, immutable once built.
///
/// Adjacency lists are sorted by `(to_dpid, from_port)` at construction
/// time so that equal-cost alternatives are always examined in the same
/// order, which is what makes path resolution deterministic.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    switches: BTreeMap<u64, Switch>,
    ports: BTreeMap<(u64, u16), Port>,
    adjacency: BTreeMap<u64, Vec<Link>>,
}

impl TopologySnapshot {
    /// Start building a snapshot.
    #[must_use]
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Look up a switch by datapath identifier.
    #[must_use]
    pub fn switch(&self, dpid: u64) -> Option<&Switch> {
        self.switches.get(&dpid)
    }

    /// Look up a port by switch and port number.
    #[must_use]
    pub fn port(&self, dpid: u64, port_no: u16) -> Option<&Port> {
        self.ports.get(&(dpid, port_no))
    }

    /// All switches, ordered by datapath identifier.
    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    /// All ports, ordered by `(dpid, port_no)`.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    /// Outgoing links of `dpid`, sorted by `(to_dpid, from_port)`.
    #[must_use]
    pub fn links_from(&self, dpid: u64) -> &[Link] {
        self.adjacency.get(&dpid).map_or(&[], Vec::as_slice)
    }

    /// Number of switches in the view.
    #[must_use]
    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    /// Number of directed links in the view.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }
}

/// Accumulates switches, ports, and links, then freezes them into a
/// [`TopologySnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    switches: Vec<Switch>,
    ports: Vec<Port>,
    links: Vec<Link>,
}

impl SnapshotBuilder {
    /// Record a connected switch.
    #[must_use]
    pub fn add_switch(self, dpid: u64) -> Self {
        self.add_switch_with_status(dpid, true)
    }

    /// Record a switch with an explicit liveness status.
    #[must_use]
    pub fn add_switch_with_status(mut self, dpid: u64, up: bool) -> Self {
        self.switches.push(Switch { dpid, up });
        self
    }

    /// Record a port.
    #[must_use]
    pub fn add_port(mut self, dpid: u64, port_no: u16, up: bool) -> Self {
        self.ports.push(Port { dpid, port_no, up });
        self
    }

    /// Record a usable directed link.
    #[must_use]
    pub fn add_link(self, from_dpid: u64, from_port: u16, to_dpid: u64, to_port: u16) -> Self {
        self.add_link_with_status(from_dpid, from_port, to_dpid, to_port, true)
    }

    /// Record a directed link with an explicit liveness status.
    #[must_use]
    pub fn add_link_with_status(
        mut self,
        from_dpid: u64,
        from_port: u16,
        to_dpid: u64,
        to_port: u16,
        up: bool,
    ) -> Self {
        self.links.push(Link { from_dpid, from_port, to_dpid, to_port, up });
        self
    }

    /// Freeze the accumulated elements into an immutable snapshot.
    ///
    /// Later entries win when the same switch or port is recorded twice.
    #[must_use]
    pub fn build(self) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::default();
        for switch in self.switches {
            snapshot.switches.insert(switch.dpid, switch);
        }
        for port in self.ports {
            snapshot.ports.insert((port.dpid, port.port_no), port);
        }
        for link in self.links {
            snapshot.adjacency.entry(link.from_dpid).or_default().push(link);
        }
        for links in snapshot.adjacency.values_mut() {
            links.sort_by_key(|link| (link.to_dpid, link.from_port));
        }
        snapshot
    }
}
