//! The connection system: sole owner of the pin arena, the net graph and
//! every pin's driven value.
//!
//! Writes are deferred. `write` only records an intended drive; nothing is
//! visible on other pins until `commit` resolves every touched net. A commit
//! is all-or-nothing: a fatal drive conflict discards the pending writes and
//! leaves the previously committed values in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

use crate::bus::{resolve_drivers, ConflictPolicy, Driver, Net, NetPolicy, Resolution};
use crate::error::{DriveConflict, GraphError};
use crate::pin::{Drive, Pin, PinSpec, PinValue, SignalClass};
use crate::types::{ComponentId, NetId, PinId, MAX_WIDTH};

/// An explicit connection. `narrow` sits at bit `offset` of `wide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub wide: PinId,
    pub narrow: PinId,
    #[serde(default)]
    pub offset: u8,
}

impl Edge {
    fn key(&self) -> (PinId, PinId) {
        edge_key(self.wide, self.narrow)
    }
}

fn edge_key(a: PinId, b: PinId) -> (PinId, PinId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Every drive-related field of the connection system, committed and pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveState {
    pub write_seq: u64,
    #[serde(default)]
    pub next_net: u32,
    pub drives: BTreeMap<PinId, Drive>,
    #[serde(default)]
    pub external: BTreeMap<PinId, Drive>,
    #[serde(default)]
    pub pending: BTreeMap<PinId, Drive>,
    #[serde(default)]
    pub pending_external: BTreeMap<PinId, Option<Drive>>,
    pub net_values: BTreeMap<NetId, PinValue>,
    #[serde(default)]
    pub dirty: BTreeSet<NetId>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Nets whose resolved value changed.
    pub changed: Vec<NetId>,
    /// Non-fatal conflicts, resolved with the last-writer fallback.
    pub warnings: Vec<DriveConflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub pins: usize,
    pub nets: usize,
    pub edges: usize,
    pub nets_by_class: BTreeMap<String, usize>,
    pub largest_net: usize,
}

/// Manages electrical connections between pins
#[derive(Debug, Default)]
pub struct ConnectionSystem {
    pins: Vec<Option<Pin>>,
    nets: BTreeMap<NetId, Net>,
    edges: BTreeMap<(PinId, PinId), Edge>,
    adjacency: BTreeMap<PinId, BTreeSet<PinId>>,
    next_net: u32,
    write_seq: u64,
    pending: BTreeMap<PinId, Drive>,
    pending_external: BTreeMap<PinId, Option<Drive>>,
    external: BTreeMap<PinId, Drive>,
    dirty: BTreeSet<NetId>,
}

impl ConnectionSystem {
    pub fn new() -> Self {
        ConnectionSystem::default()
    }

    // ---- pin arena -------------------------------------------------------

    pub fn register_pins(&mut self, component: ComponentId, specs: &[PinSpec]) -> Vec<PinId> {
        specs
            .iter()
            .map(|spec| {
                let id = PinId::new(self.pins.len() as u32);
                self.pins.push(Some(Pin::new(id, component, spec)));
                id
            })
            .collect()
    }

    /// Place a pin at a fixed arena slot. Used when reconstructing a saved board.
    pub(crate) fn insert_pin(&mut self, id: PinId, component: ComponentId, spec: &PinSpec) {
        if self.pins.len() <= id.index() {
            self.pins.resize(id.index() + 1, None);
        }
        self.pins[id.index()] = Some(Pin::new(id, component, spec));
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(id.index()).and_then(|slot| slot.as_ref())
    }

    fn pin_checked(&self, id: PinId) -> Result<&Pin, GraphError> {
        self.pin(id).ok_or(GraphError::UnknownPin(id))
    }

    fn pin_mut(&mut self, id: PinId) -> Option<&mut Pin> {
        self.pins.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn pins_of(&self, component: ComponentId) -> impl Iterator<Item = &Pin> {
        self.pins().filter(move |pin| pin.component == component)
    }

    pub fn find_pin(&self, component: ComponentId, name: &str) -> Option<PinId> {
        self.pins_of(component)
            .find(|pin| pin.name == name)
            .map(|pin| pin.id)
    }

    /// Remove every pin of a component together with the edges touching them.
    /// Pins still joined by other edges stay on a net.
    pub fn remove_component(&mut self, component: ComponentId) {
        let doomed: Vec<PinId> = self.pins_of(component).map(|pin| pin.id).collect();
        let mut affected = BTreeSet::new();

        for pin in &doomed {
            if let Some(net) = self.pin(*pin).and_then(|p| p.net) {
                affected.insert(net);
            }
            let neighbors: Vec<PinId> = self
                .adjacency
                .get(pin)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for other in neighbors {
                self.remove_edge(*pin, other);
            }
            self.adjacency.remove(pin);
            self.pending.remove(pin);
            self.pending_external.remove(pin);
            self.external.remove(pin);
            self.pins[pin.index()] = None;
        }

        for net in affected {
            self.repartition(net);
        }
        debug!(%component, pins = doomed.len(), "removed component pins");
    }

    // ---- topology --------------------------------------------------------

    /// Connect two pins of equal width into one net.
    pub fn connect(
        &mut self,
        a: PinId,
        b: PinId,
        policy: Option<NetPolicy>,
    ) -> Result<NetId, GraphError> {
        let (pa, pb) = (self.pin_checked(a)?, self.pin_checked(b)?);
        if pa.width != pb.width {
            return Err(GraphError::IncompatibleWidth {
                a,
                a_width: pa.width,
                b,
                b_width: pb.width,
            });
        }
        self.connect_edge(Edge { wide: a, narrow: b, offset: 0 }, policy)
    }

    /// Connect `narrow` onto bits `[offset, offset + width)` of `wide`.
    pub fn connect_mapped(
        &mut self,
        wide: PinId,
        narrow: PinId,
        offset: u8,
        policy: Option<NetPolicy>,
    ) -> Result<NetId, GraphError> {
        let (pw, pn) = (self.pin_checked(wide)?, self.pin_checked(narrow)?);
        if offset as u16 + pn.width as u16 > pw.width as u16 {
            return Err(GraphError::IncompatibleWidth {
                a: wide,
                a_width: pw.width,
                b: narrow,
                b_width: pn.width,
            });
        }
        self.connect_edge(Edge { wide, narrow, offset }, policy)
    }

    fn connect_edge(&mut self, edge: Edge, policy: Option<NetPolicy>) -> Result<NetId, GraphError> {
        let Edge { wide: a, narrow: b, offset } = edge;
        if a == b {
            return Err(GraphError::DirectionConflict {
                a,
                b,
                reason: "a pin cannot be connected to itself",
            });
        }

        let pa = self.pin_checked(a)?.clone();
        let pb = self.pin_checked(b)?.clone();

        if !pa.direction.can_drive() && !pb.direction.can_drive() {
            return Err(GraphError::DirectionConflict {
                a,
                b,
                reason: "both pins are input-only",
            });
        }

        let class_a = pa.net.and_then(|n| self.nets.get(&n)).map_or(pa.class, |n| n.class);
        let class_b = pb.net.and_then(|n| self.nets.get(&n)).map_or(pb.class, |n| n.class);
        if (class_a.is_rail() || class_b.is_rail()) && class_a != class_b {
            return Err(GraphError::ClassMismatch {
                a,
                a_class: class_a.to_str(),
                b,
                b_class: class_b.to_str(),
            });
        }

        if let Some(existing) = self.edges.get(&edge.key()) {
            let same = existing.offset == offset && (existing.wide == a || offset == 0);
            return if same {
                pa.net.ok_or(GraphError::UnknownPin(a))
            } else {
                Err(GraphError::IncompatibleWidth {
                    a,
                    a_width: pa.width,
                    b,
                    b_width: pb.width,
                })
            };
        }

        let net_policy = match (pa.net, pb.net) {
            (None, None) => policy.unwrap_or_else(|| NetPolicy::for_class(creating_class(&pa, &pb))),
            (Some(n), None) | (None, Some(n)) => {
                let net = self.nets.get(&n).ok_or(GraphError::UnknownNet(n))?;
                let member = if pa.net.is_some() { a } else { b };
                if policy.is_some_and(|p| p != net.policy) {
                    return Err(GraphError::AlreadyConnected { pin: member, net: n });
                }
                net.policy
            }
            (Some(na), Some(nb)) => {
                let net_a = self.nets.get(&na).ok_or(GraphError::UnknownNet(na))?;
                let net_b = self.nets.get(&nb).ok_or(GraphError::UnknownNet(nb))?;
                if net_a.policy != net_b.policy {
                    return Err(GraphError::AlreadyConnected { pin: b, net: nb });
                }
                if policy.is_some_and(|p| p != net_a.policy) {
                    return Err(GraphError::AlreadyConnected { pin: a, net: na });
                }
                net_a.policy
            }
        };

        // Tentatively add the edge and verify the merged net is consistent.
        self.insert_edge(edge);
        let taps = match self.explore(a) {
            Ok(taps) => taps,
            Err(err) => {
                self.remove_edge(a, b);
                return Err(err);
            }
        };

        let id = match (pa.net, pb.net) {
            (Some(na), Some(nb)) => {
                let keep = na.min(nb);
                let gone = na.max(nb);
                if keep != gone {
                    self.nets.remove(&gone);
                    self.dirty.remove(&gone);
                }
                keep
            }
            (Some(n), None) | (None, Some(n)) => n,
            (None, None) => {
                let id = NetId::new(self.next_net);
                self.next_net += 1;
                let class = creating_class(&pa, &pb);
                self.nets.insert(id, Net::new(id, 1, net_policy, class));
                id
            }
        };

        self.install_taps(id, taps);
        debug!(%a, %b, net = %id, offset, "connected pins");
        Ok(id)
    }

    /// Remove the explicit connection between two pins, splitting the net
    /// if no other path joins the two sides.
    pub fn disconnect(&mut self, a: PinId, b: PinId) -> Result<(), GraphError> {
        self.pin_checked(a)?;
        self.pin_checked(b)?;
        if !self.edges.contains_key(&edge_key(a, b)) {
            return Err(GraphError::NotConnected { a, b });
        }

        let net = self.pin(a).and_then(|p| p.net);
        self.remove_edge(a, b);
        if let Some(net) = net {
            self.repartition(net);
        }
        debug!(%a, %b, "disconnected pins");
        Ok(())
    }

    fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.key(), edge);
        self.adjacency.entry(edge.wide).or_default().insert(edge.narrow);
        self.adjacency.entry(edge.narrow).or_default().insert(edge.wide);
    }

    fn remove_edge(&mut self, a: PinId, b: PinId) {
        self.edges.remove(&edge_key(a, b));
        for (x, y) in [(a, b), (b, a)] {
            if let Some(set) = self.adjacency.get_mut(&x) {
                set.remove(&y);
                if set.is_empty() {
                    self.adjacency.remove(&x);
                }
            }
        }
    }

    /// Walk the edges reachable from `start`, placing every pin at a bit
    /// offset relative to its neighbours. Offsets are normalised so the
    /// lowest tap sits at bit 0.
    fn explore(&self, start: PinId) -> Result<BTreeMap<PinId, u8>, GraphError> {
        let mut offsets: BTreeMap<PinId, i32> = BTreeMap::new();
        let mut queue = VecDeque::new();
        offsets.insert(start, 0);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let here = offsets[&current];
            let neighbors = self.adjacency.get(&current).cloned().unwrap_or_default();
            for next in neighbors {
                let edge = self.edges[&edge_key(current, next)];
                let expected = if edge.wide == current {
                    here + edge.offset as i32
                } else {
                    here - edge.offset as i32
                };
                match offsets.get(&next) {
                    Some(&seen) if seen != expected => {
                        let (pc, pn) = (self.pin_checked(current)?, self.pin_checked(next)?);
                        return Err(GraphError::IncompatibleWidth {
                            a: current,
                            a_width: pc.width,
                            b: next,
                            b_width: pn.width,
                        });
                    }
                    Some(_) => {}
                    None => {
                        offsets.insert(next, expected);
                        queue.push_back(next);
                    }
                }
            }
        }

        let base = offsets.values().copied().min().unwrap_or(0);
        let mut taps = BTreeMap::new();
        for (pin, offset) in offsets {
            let p = self.pin_checked(pin)?;
            let placed = offset - base;
            if placed + p.width as i32 > MAX_WIDTH as i32 {
                return Err(GraphError::IncompatibleWidth {
                    a: start,
                    a_width: self.pin_checked(start)?.width,
                    b: pin,
                    b_width: p.width,
                });
            }
            taps.insert(pin, placed as u8);
        }
        Ok(taps)
    }

    fn install_taps(&mut self, id: NetId, taps: BTreeMap<PinId, u8>) {
        let width = taps
            .iter()
            .filter_map(|(pin, offset)| self.pin(*pin).map(|p| offset + p.width))
            .max()
            .unwrap_or(1);
        for pin in taps.keys() {
            if let Some(p) = self.pin_mut(*pin) {
                p.net = Some(id);
            }
        }
        if let Some(net) = self.nets.get_mut(&id) {
            net.taps = taps;
            net.width = width;
        }
        self.refresh_value(id);
        self.dirty.insert(id);
    }

    /// Rebuild a net after edges were removed: connected parts with two or
    /// more pins become nets (the first part in pin order keeps the id),
    /// isolated pins leave the net.
    fn repartition(&mut self, id: NetId) {
        let Some(old) = self.nets.remove(&id) else {
            return;
        };
        self.dirty.remove(&id);

        let mut visited = BTreeSet::new();
        let mut parts = Vec::new();
        for pin in old.taps.keys() {
            if self.pin(*pin).is_none() || visited.contains(pin) {
                continue;
            }
            // Offsets in a surviving part were consistent before the split.
            let taps = self.explore(*pin).unwrap_or_default();
            visited.extend(taps.keys().copied());
            parts.push(taps);
        }

        let mut reuse = Some(id);
        for taps in parts {
            if taps.len() < 2 {
                for pin in taps.keys() {
                    if let Some(p) = self.pin_mut(*pin) {
                        p.net = None;
                    }
                }
                continue;
            }
            let net_id = reuse.take().unwrap_or_else(|| {
                let fresh = NetId::new(self.next_net);
                self.next_net += 1;
                fresh
            });
            self.nets
                .insert(net_id, Net::new(net_id, 1, old.policy, old.class));
            self.install_taps(net_id, taps);
        }
    }

    // ---- queries ---------------------------------------------------------

    pub fn net(&self, id: NetId) -> Option<&Net> {
        self.nets.get(&id)
    }

    pub fn nets(&self) -> impl Iterator<Item = &Net> {
        self.nets.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn net_of(&self, pin: PinId) -> Option<NetId> {
        self.pin(pin).and_then(|p| p.net)
    }

    /// Nets touching any pin of the component, in id order.
    pub fn nets_of(&self, component: ComponentId) -> Vec<NetId> {
        self.pins_of(component)
            .filter_map(|pin| pin.net)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether two pins share a net.
    pub fn is_connected(&self, a: PinId, b: PinId) -> bool {
        match (self.net_of(a), self.net_of(b)) {
            (Some(na), Some(nb)) => na == nb,
            _ => false,
        }
    }

    pub fn has_edge(&self, a: PinId, b: PinId) -> bool {
        self.edges.contains_key(&edge_key(a, b))
    }

    /// Committed value visible at a pin.
    pub fn read_pin(&self, id: PinId) -> Result<PinValue, GraphError> {
        let pin = self.pin_checked(id)?;
        if let Some(net) = pin.net.and_then(|n| self.nets.get(&n)) {
            let offset = net.offset_of(id).unwrap_or(0);
            return Ok(net.value_at(offset, pin.width));
        }

        let drivers: Vec<Driver> = [pin.drive, self.external.get(&id).copied()]
            .into_iter()
            .flatten()
            .filter_map(|drive| driver_for(id, 0, pin.width, drive))
            .collect();
        Ok(match resolve_drivers(pin.width, ConflictPolicy::LastWriter, &drivers) {
            Resolution::Resolved(value) | Resolution::Conflict { fallback: value, .. } => value,
        })
    }

    /// Apply the net's conflict policy across its committed drivers.
    pub fn resolve(&self, id: NetId) -> Result<PinValue, DriveConflict> {
        let Some(net) = self.nets.get(&id) else {
            return Ok(PinValue::HighZ);
        };
        let drivers = self.collect_drivers(net, false, |pin| pin.drive);
        match resolve_drivers(net.width, net.policy.policy, &drivers) {
            Resolution::Resolved(value) => Ok(value),
            Resolution::Conflict { pins, .. } => Err(DriveConflict {
                net: id,
                pins,
                fatal: net.policy.fatal,
            }),
        }
    }

    fn collect_drivers<F>(&self, net: &Net, with_pending: bool, drive_of: F) -> Vec<Driver>
    where
        F: Fn(&Pin) -> Option<Drive>,
    {
        let mut drivers = Vec::new();
        for (pin_id, offset) in &net.taps {
            let Some(pin) = self.pin(*pin_id) else {
                continue;
            };
            if let Some(driver) = drive_of(pin).and_then(|d| driver_for(*pin_id, *offset, pin.width, d)) {
                drivers.push(driver);
            }
            let external = match self.pending_external.get(pin_id) {
                Some(pending) if with_pending => *pending,
                _ => self.external.get(pin_id).copied(),
            };
            if let Some(driver) = external.and_then(|d| driver_for(*pin_id, *offset, pin.width, d)) {
                drivers.push(driver);
            }
        }
        drivers
    }

    fn refresh_value(&mut self, id: NetId) {
        let value = match self.resolve(id) {
            Ok(value) => value,
            Err(_) => self.lenient_value(id),
        };
        if let Some(net) = self.nets.get_mut(&id) {
            net.value = value;
        }
    }

    fn lenient_value(&self, id: NetId) -> PinValue {
        let Some(net) = self.nets.get(&id) else {
            return PinValue::HighZ;
        };
        let drivers = self.collect_drivers(net, false, |pin| pin.drive);
        match resolve_drivers(net.width, net.policy.policy, &drivers) {
            Resolution::Resolved(value) | Resolution::Conflict { fallback: value, .. } => value,
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats {
            pins: self.pins().count(),
            nets: self.nets.len(),
            edges: self.edges.len(),
            ..ConnectionStats::default()
        };
        for net in self.nets.values() {
            *stats
                .nets_by_class
                .entry(net.class.to_str().to_string())
                .or_insert(0) += 1;
            stats.largest_net = stats.largest_net.max(net.len());
        }
        stats
    }

    // ---- deferred writes -------------------------------------------------

    /// Record a pin's intended drive for the next commit. `HighZ` releases the line.
    pub fn write(&mut self, id: PinId, value: PinValue) -> Result<(), GraphError> {
        let pin = self.pin_checked(id)?;
        if !pin.direction.can_drive() {
            return Err(GraphError::DirectionConflict {
                a: id,
                b: id,
                reason: "input pins never drive a net",
            });
        }
        let value = value.masked(pin.width);
        self.write_seq += 1;
        self.pending.insert(
            id,
            Drive {
                value,
                seq: self.write_seq,
            },
        );
        Ok(())
    }

    /// Attach an external driver to a pin's line, applied at the next commit.
    pub fn stimulate(&mut self, id: PinId, value: PinValue) -> Result<(), GraphError> {
        let pin = self.pin_checked(id)?;
        let value = value.masked(pin.width);
        self.write_seq += 1;
        self.pending_external.insert(
            id,
            Some(Drive {
                value,
                seq: self.write_seq,
            }),
        );
        Ok(())
    }

    /// Remove an external driver at the next commit.
    pub fn release(&mut self, id: PinId) -> Result<(), GraphError> {
        self.pin_checked(id)?;
        self.pending_external.insert(id, None);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.pending_external.is_empty() || !self.dirty.is_empty()
    }

    /// Resolve every net touched by pending writes (and every net whose
    /// topology changed) and make the result visible. On a fatal conflict
    /// nothing is applied and the pending writes are discarded.
    pub fn commit(&mut self) -> Result<CommitReport, Vec<DriveConflict>> {
        let mut touched: BTreeSet<NetId> = self.dirty.clone();
        for pin in self.pending.keys().chain(self.pending_external.keys()) {
            if let Some(net) = self.net_of(*pin) {
                touched.insert(net);
            }
        }

        let mut resolved = Vec::with_capacity(touched.len());
        let mut warnings = Vec::new();
        let mut fatal = Vec::new();
        for id in &touched {
            let Some(net) = self.nets.get(id) else {
                continue;
            };
            let pending = &self.pending;
            let drivers =
                self.collect_drivers(net, true, |pin| pending.get(&pin.id).copied().or(pin.drive));
            match resolve_drivers(net.width, net.policy.policy, &drivers) {
                Resolution::Resolved(value) => resolved.push((*id, value)),
                Resolution::Conflict { pins, fallback } => {
                    let conflict = DriveConflict {
                        net: *id,
                        pins,
                        fatal: net.policy.fatal,
                    };
                    if conflict.fatal {
                        fatal.push(conflict);
                    } else {
                        warn!(net = %id, pins = ?conflict.pins, "drive conflict resolved by last writer");
                        warnings.push(conflict);
                        resolved.push((*id, fallback));
                    }
                }
            }
        }

        if !fatal.is_empty() {
            self.pending.clear();
            self.pending_external.clear();
            return Err(fatal);
        }

        for (id, drive) in std::mem::take(&mut self.pending) {
            if let Some(pin) = self.pin_mut(id) {
                pin.drive = Some(drive);
            }
        }
        for (id, drive) in std::mem::take(&mut self.pending_external) {
            match drive {
                Some(drive) => {
                    self.external.insert(id, drive);
                }
                None => {
                    self.external.remove(&id);
                }
            }
        }

        let mut changed = Vec::new();
        for (id, value) in resolved {
            if let Some(net) = self.nets.get_mut(&id) {
                if net.value != value {
                    net.value = value;
                    changed.push(id);
                }
            }
        }
        self.dirty.clear();

        Ok(CommitReport { changed, warnings })
    }

    /// Drop every drive and external stimulus and float all nets.
    pub fn clear_drives(&mut self) {
        for pin in self.pins.iter_mut().flatten() {
            pin.drive = None;
        }
        self.pending.clear();
        self.pending_external.clear();
        self.external.clear();
        for net in self.nets.values_mut() {
            net.value = PinValue::HighZ;
        }
        self.dirty.clear();
    }

    /// Forget writes and stimuli that were never committed.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_external.clear();
    }

    // ---- state capture for persistence -----------------------------------

    pub(crate) fn drive_state(&self) -> DriveState {
        DriveState {
            write_seq: self.write_seq,
            next_net: self.next_net,
            drives: self
                .pins()
                .filter_map(|pin| pin.drive.map(|drive| (pin.id, drive)))
                .collect(),
            external: self.external.clone(),
            pending: self.pending.clone(),
            pending_external: self.pending_external.clone(),
            net_values: self.nets.values().map(|net| (net.id, net.value)).collect(),
            dirty: self.dirty.clone(),
        }
    }

    pub(crate) fn restore_drive_state(&mut self, saved: &DriveState) -> Result<(), GraphError> {
        let pins = saved
            .drives
            .keys()
            .chain(saved.external.keys())
            .chain(saved.pending.keys())
            .chain(saved.pending_external.keys());
        for id in pins {
            self.pin_checked(*id)?;
        }
        for id in saved.net_values.keys().chain(saved.dirty.iter()) {
            if !self.nets.contains_key(id) {
                return Err(GraphError::UnknownNet(*id));
            }
        }

        for pin in self.pins.iter_mut().flatten() {
            pin.drive = saved.drives.get(&pin.id).copied();
        }
        for (id, value) in &saved.net_values {
            if let Some(net) = self.nets.get_mut(id) {
                net.value = *value;
            }
        }
        self.write_seq = saved.write_seq;
        self.next_net = self.next_net.max(saved.next_net);
        self.external = saved.external.clone();
        self.pending = saved.pending.clone();
        self.pending_external = saved.pending_external.clone();
        self.dirty = saved.dirty.clone();
        Ok(())
    }

    /// Recreate a saved net under its original id from its explicit edges.
    pub(crate) fn restore_net(
        &mut self,
        id: NetId,
        policy: NetPolicy,
        class: SignalClass,
        edges: &[Edge],
    ) -> Result<(), GraphError> {
        let Some(first) = edges.first() else {
            return Err(GraphError::UnknownNet(id));
        };
        for edge in edges {
            self.pin_checked(edge.wide)?;
            self.pin_checked(edge.narrow)?;
            self.insert_edge(*edge);
        }
        let taps = self.explore(first.wide)?;
        self.nets.insert(id, Net::new(id, 1, policy, class));
        self.next_net = self.next_net.max(id.value() + 1);
        self.install_taps(id, taps);
        Ok(())
    }
}

fn creating_class(a: &Pin, b: &Pin) -> SignalClass {
    if a.class == SignalClass::Wire {
        b.class
    } else {
        a.class
    }
}

fn driver_for(pin: PinId, offset: u8, width: u8, drive: Drive) -> Option<Driver> {
    drive.value.bits().map(|value| Driver {
        pin,
        offset,
        width,
        value,
        seq: drive.seq,
    })
}
