//! Bridge and region coordinator.
//!
//! A [`Bridge`] owns the region identity, one [`InstanceEngine`] per spanning
//! tree instance, the physical port records and the timer service. Every
//! entry point is one serialized event: it mutates state, flushes pending
//! BPDU transmissions and leaves the resulting actions in an outbound queue
//! the owner drains with [`Bridge::drain_outbound`].

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument, warn};

use crate::bpdu::{Bpdu, BpduFlags, BpduTimers, CistInfo, FlagRole, MstBpdu, MstiRecord};
use crate::error::{MstpError, MstpResult};
use crate::instance::{EngineCtx, InstanceEngine, InstanceMessage};
use crate::outbound::{Effects, Outbound};
use crate::params::{defaults, BridgeParams, PortParams};
use crate::port::{PortFacts, PortStatus, Progress};
use crate::region::{format_vlan_list, RegionIdentity, VlanMap};
use crate::state::{BridgeCounters, InstanceState, RegionState};
use crate::timer::{TimerKey, TimerKind, TimerService};
use crate::types::{
    BridgeId, GuardKind, InstanceId, LinkType, MacAddress, PortId, PortRole, VlanId, MAX_PORT_NUMBER,
};
use crate::vector::PriorityVector;

/// Physical port record shared by all instances.
#[derive(Debug, Clone)]
struct BridgePort {
    /// Administrative (interface) state.
    enabled: bool,
    /// Physical settings plus the CIST cost and priority.
    params: PortParams,
    /// MSTI cost and priority: (priority, path cost).
    instance_params: BTreeMap<InstanceId, (u8, u32)>,
    oper_edge: bool,
    boundary: bool,
    /// BPDU guard fired; cleared only administratively.
    err_disabled: bool,
    new_info: bool,
    tx_count: u8,
}

impl BridgePort {
    fn new(enabled: bool) -> Self {
        let params = PortParams::default();
        BridgePort {
            enabled,
            oper_edge: params.admin_edge,
            params,
            instance_params: BTreeMap::new(),
            boundary: false,
            err_disabled: false,
            new_info: false,
            tx_count: 0,
        }
    }

    fn cost_priority(&self, instance: InstanceId) -> (u8, u32) {
        if instance.is_cist() {
            return (self.params.priority, self.params.path_cost);
        }
        self.instance_params
            .get(&instance)
            .copied()
            .unwrap_or((PortId::DEFAULT_PRIORITY, defaults::PATH_COST))
    }

    fn facts(&self) -> PortFacts {
        PortFacts {
            edge: self.oper_edge || self.params.guards.bpdu_filter,
            point_to_point: self.params.link_type == LinkType::PointToPoint,
            root_guard: self.params.guards.root_guard,
            loop_guard: self.params.guards.loop_guard,
            boundary: self.boundary,
        }
    }
}

/// One MSTP bridge.
#[derive(Debug)]
pub struct Bridge {
    mac: MacAddress,
    enabled: bool,
    params: BridgeParams,
    region: RegionIdentity,
    /// Configured bridge priority per instance.
    priorities: BTreeMap<InstanceId, u16>,
    ports: BTreeMap<u16, BridgePort>,
    instances: BTreeMap<InstanceId, InstanceEngine>,
    timers: TimerService,
    effects: Effects,
    facts: BTreeMap<u16, PortFacts>,
    counters: BridgeCounters,
    fault: Option<String>,
    ticks: u64,
}

impl Bridge {
    /// Creates an enabled bridge in its default region with only the CIST.
    pub fn new(mac: MacAddress, params: BridgeParams) -> MstpResult<Self> {
        params.validate()?;
        let mut instances = BTreeMap::new();
        instances.insert(
            InstanceId::CIST,
            InstanceEngine::new(
                InstanceId::CIST,
                BridgeId::new(BridgeId::DEFAULT_PRIORITY, InstanceId::CIST, mac),
            ),
        );
        info!(%mac, "bridge created");
        Ok(Bridge {
            mac,
            enabled: true,
            params,
            region: RegionIdentity::default_for(mac),
            priorities: BTreeMap::new(),
            ports: BTreeMap::new(),
            instances,
            timers: TimerService::new(),
            effects: Effects::default(),
            facts: BTreeMap::new(),
            counters: BridgeCounters::default(),
            fault: None,
            ticks: 0,
        })
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn params(&self) -> &BridgeParams {
        &self.params
    }

    pub fn region(&self) -> &RegionIdentity {
        &self.region
    }

    pub fn counters(&self) -> BridgeCounters {
        self.counters
    }

    /// The internal fault that halted this bridge, if any.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn port_numbers(&self) -> Vec<u16> {
        self.ports.keys().copied().collect()
    }

    pub fn instance(&self, instance: InstanceId) -> Option<&InstanceEngine> {
        self.instances.get(&instance)
    }

    /// Bridge identifier used on `instance`.
    pub fn bridge_id(&self, instance: InstanceId) -> BridgeId {
        let priority = self
            .priorities
            .get(&instance)
            .copied()
            .unwrap_or(BridgeId::DEFAULT_PRIORITY);
        BridgeId::new(priority, instance, self.mac)
    }

    /// Takes the actions produced since the last drain.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.effects.take_outbound()
    }

    fn ensure_healthy(&self) -> MstpResult<()> {
        match &self.fault {
            Some(message) => Err(MstpError::internal(message.clone())),
            None => Ok(()),
        }
    }

    fn refresh_facts(&mut self) {
        self.facts = self.ports.iter().map(|(n, p)| (*n, p.facts())).collect();
    }

    /// Splits the bridge into its instances and the context they run against.
    fn parts(&mut self) -> (&mut BTreeMap<InstanceId, InstanceEngine>, EngineCtx<'_>) {
        self.refresh_facts();
        (
            &mut self.instances,
            EngineCtx {
                params: &self.params,
                timers: &mut self.timers,
                facts: &self.facts,
                effects: &mut self.effects,
            },
        )
    }

    fn reselect_all(&mut self) {
        let (instances, mut ctx) = self.parts();
        for engine in instances.values_mut() {
            engine.reselect(&mut ctx);
        }
    }

    fn mark_all_dirty(&mut self) {
        for port in self.ports.values_mut() {
            port.new_info = true;
        }
    }

    // ---- administrative entry points ----

    /// Global enable. Disabling stops every port machine and timer and makes
    /// the bridge ignore BPDUs; port configuration is kept.
    #[instrument(skip(self))]
    pub fn set_enabled(&mut self, enabled: bool) -> MstpResult<()> {
        self.ensure_healthy()?;
        if self.enabled == enabled {
            return Ok(());
        }
        info!(enabled, "spanning tree admin state changed");
        self.enabled = enabled;
        let numbers = self.port_numbers();
        for number in numbers {
            self.apply_port_enable(number);
        }
        if !enabled {
            self.timers = TimerService::new();
        }
        self.reselect_all();
        self.after_event();
        Ok(())
    }

    /// Replaces the bridge timer parameters.
    #[instrument(skip(self))]
    pub fn set_bridge_params(&mut self, params: BridgeParams) -> MstpResult<bool> {
        self.ensure_healthy()?;
        params.validate()?;
        if params == self.params {
            return Ok(false);
        }
        info!(?params, "bridge parameters changed");
        self.params = params;
        self.mark_all_dirty();
        self.after_event();
        Ok(true)
    }

    /// Sets the bridge priority of one instance.
    #[instrument(skip(self))]
    pub fn set_bridge_priority(&mut self, instance: InstanceId, priority: u16) -> MstpResult<bool> {
        self.ensure_healthy()?;
        BridgeId::validate_priority(priority)?;
        self.priorities.insert(instance, priority);
        let bridge_id = self.bridge_id(instance);
        let changed = self
            .instances
            .get_mut(&instance)
            .map(|engine| engine.set_bridge_id(bridge_id))
            .unwrap_or(false);
        if changed {
            info!(%instance, %bridge_id, "bridge priority changed");
            let (instances, mut ctx) = self.parts();
            if let Some(engine) = instances.get_mut(&instance) {
                engine.reselect(&mut ctx);
            }
            self.mark_all_dirty();
            self.after_event();
        }
        Ok(changed)
    }

    /// Atomically replaces the region identity. Returns false when nothing
    /// changed. MSTIs are created and destroyed to follow the VLAN map, and
    /// every instance re-elects exactly once.
    #[instrument(skip(self, vlan_map))]
    pub fn set_region_identity(&mut self, name: &str, revision: u16, vlan_map: VlanMap) -> MstpResult<bool> {
        self.ensure_healthy()?;
        let identity = RegionIdentity::new(name, revision, vlan_map)?;
        if identity == self.region {
            debug!("region identity unchanged");
            return Ok(false);
        }
        self.apply_region(identity);
        Ok(true)
    }

    /// Maps VLANs to an MSTI, creating the instance if needed.
    pub fn map_vlans<V>(&mut self, instance: InstanceId, vlans: V) -> MstpResult<bool>
    where
        V: IntoIterator<Item = VlanId>,
    {
        let mut map = self.region.vlan_map().clone();
        map.map(instance, vlans)?;
        let name = self.region.name().to_string();
        self.set_region_identity(&name, self.region.revision(), map)
    }

    /// Returns VLANs to the CIST. The MSTI goes away with its last VLAN.
    pub fn unmap_vlans<V>(&mut self, instance: InstanceId, vlans: V) -> MstpResult<bool>
    where
        V: IntoIterator<Item = VlanId>,
    {
        if !self.region.vlan_map().contains_instance(instance) {
            return Err(MstpError::InstanceNotFound(instance.get()));
        }
        let mut map = self.region.vlan_map().clone();
        map.unmap(instance, vlans);
        let name = self.region.name().to_string();
        self.set_region_identity(&name, self.region.revision(), map)
    }

    pub fn remove_instance(&mut self, instance: InstanceId) -> MstpResult<bool> {
        let mut map = self.region.vlan_map().clone();
        if !map.remove_instance(instance) {
            return Err(MstpError::InstanceNotFound(instance.get()));
        }
        let name = self.region.name().to_string();
        self.set_region_identity(&name, self.region.revision(), map)
    }

    fn apply_region(&mut self, identity: RegionIdentity) {
        let old = std::mem::replace(&mut self.region, identity);
        info!(
            name = self.region.name(),
            revision = self.region.revision(),
            digest = %self.region.digest(),
            "region reconfigured"
        );

        let wanted: BTreeSet<InstanceId> = self.region.vlan_map().instances().collect();
        let existing: Vec<InstanceId> = self.instances.keys().copied().filter(|i| !i.is_cist()).collect();
        for instance in existing {
            if !wanted.contains(&instance) {
                self.destroy_instance(instance);
            }
        }
        for instance in &wanted {
            if !self.instances.contains_key(instance) {
                self.create_instance(*instance);
            }
            let vlans = self.region.vlan_map().vlans(*instance);
            if vlans != old.vlan_map().vlans(*instance) || !old.vlan_map().contains_instance(*instance) {
                self.effects.push(Outbound::InstanceVlans {
                    instance: *instance,
                    vlans: vlans.map(|v| v.iter().copied().collect()).unwrap_or_default(),
                });
            }
        }

        // information from the old region no longer applies
        let numbers = self.port_numbers();
        {
            let (instances, mut ctx) = self.parts();
            for engine in instances.values_mut().filter(|e| !e.id().is_cist()) {
                for number in &numbers {
                    engine.forget_received(*number, &mut ctx);
                }
            }
        }

        self.reselect_all();
        self.counters.reelections += 1;
        self.mark_all_dirty();
        self.after_event();
    }

    fn create_instance(&mut self, instance: InstanceId) {
        info!(%instance, "instance created");
        let mut engine = InstanceEngine::new(instance, self.bridge_id(instance));
        let members: Vec<(u16, u8, u32, bool)> = self
            .ports
            .iter()
            .map(|(n, p)| {
                let (priority, cost) = p.cost_priority(instance);
                (*n, priority, cost, self.enabled && p.enabled)
            })
            .collect();
        {
            let (_, mut ctx) = self.parts();
            for (number, priority, cost, enabled) in members {
                engine.add_port(number, priority, cost, enabled, &mut ctx);
            }
        }
        self.instances.insert(instance, engine);
    }

    fn destroy_instance(&mut self, instance: InstanceId) {
        info!(%instance, "instance removed");
        self.instances.remove(&instance);
        self.timers.cancel_instance(instance);
        self.effects.push(Outbound::InstanceRemoved { instance });
    }

    fn validate_port_number(port: u16) -> MstpResult<()> {
        if port == 0 || port > MAX_PORT_NUMBER {
            return Err(MstpError::invalid_config(
                "port",
                format!("port number {} out of range 1-{}", port, MAX_PORT_NUMBER),
            ));
        }
        Ok(())
    }

    fn create_port(&mut self, number: u16, enabled: bool) {
        debug!(port = number, enabled, "port created");
        self.ports.insert(number, BridgePort::new(enabled));
        let members: Vec<(InstanceId, u8, u32)> = self
            .instances
            .keys()
            .map(|i| {
                let (priority, cost) = self.ports[&number].cost_priority(*i);
                (*i, priority, cost)
            })
            .collect();
        let (instances, mut ctx) = self.parts();
        for (instance, priority, cost) in members {
            if let Some(engine) = instances.get_mut(&instance) {
                engine.add_port(number, priority, cost, false, &mut ctx);
            }
        }
    }

    /// Pushes the effective enable state of a port into every instance.
    fn apply_port_enable(&mut self, number: u16) {
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        let effective = self.enabled && port.enabled;
        port.oper_edge = port.params.admin_edge;
        port.boundary = false;
        port.new_info = effective;
        port.tx_count = 0;
        let auto_edge = port.params.auto_edge;

        self.timers.cancel_port(number);
        if effective {
            self.timers
                .start(TimerKey::port(number, TimerKind::Hello), u32::from(self.params.hello_time));
            if auto_edge {
                self.timers.start(TimerKey::port(number, TimerKind::EdgeDelay), defaults::EDGE_DELAY);
            }
        }
        let (instances, mut ctx) = self.parts();
        for engine in instances.values_mut() {
            engine.set_port_enabled(number, effective, &mut ctx);
        }
    }

    /// Interface up/down. An unknown port is created.
    #[instrument(skip(self))]
    pub fn set_port_admin_state(&mut self, port: u16, enabled: bool) -> MstpResult<()> {
        self.ensure_healthy()?;
        Self::validate_port_number(port)?;
        match self.ports.get_mut(&port) {
            Some(record) if record.enabled == enabled => return Ok(()),
            Some(record) => record.enabled = enabled,
            None => self.create_port(port, enabled),
        }
        info!(port, enabled, "port admin state changed");
        self.apply_port_enable(port);
        self.reselect_all();
        self.after_event();
        Ok(())
    }

    /// Applies port parameters. Cost and priority apply to `instance`; edge,
    /// link type and guard settings belong to the physical port.
    #[instrument(skip(self))]
    pub fn set_port_params(&mut self, port: u16, instance: InstanceId, params: PortParams) -> MstpResult<()> {
        self.ensure_healthy()?;
        Self::validate_port_number(port)?;
        params.validate()?;
        if !self.ports.contains_key(&port) {
            self.create_port(port, false);
        }
        let Some(record) = self.ports.get_mut(&port) else {
            return Err(MstpError::PortNotFound(port));
        };

        let edge_before = record.facts().edge;
        let admin_edge_changed = record.params.admin_edge != params.admin_edge;
        let (cist_priority, cist_cost) = (record.params.priority, record.params.path_cost);
        record.params = PortParams {
            priority: cist_priority,
            path_cost: cist_cost,
            ..params
        };
        if instance.is_cist() {
            record.params.priority = params.priority;
            record.params.path_cost = params.path_cost;
        } else {
            record.instance_params.insert(instance, (params.priority, params.path_cost));
        }
        if admin_edge_changed {
            record.oper_edge = params.admin_edge;
        }
        let edge_after = record.facts().edge;
        record.new_info = true;

        let (instances, mut ctx) = self.parts();
        if let Some(engine) = instances.get_mut(&instance) {
            engine.set_port_params(port, params.priority, params.path_cost);
        }
        if edge_before != edge_after {
            for engine in instances.values_mut() {
                if edge_after {
                    engine.edge_gained(port, &mut ctx);
                } else {
                    engine.edge_lost(port, &mut ctx);
                }
            }
        }
        debug!(port, %instance, "port parameters applied");
        self.reselect_all();
        self.after_event();
        Ok(())
    }

    /// Destroys a port with all its per-instance records and timers.
    #[instrument(skip(self))]
    pub fn remove_port(&mut self, port: u16) -> MstpResult<()> {
        self.ensure_healthy()?;
        if !self.ports.contains_key(&port) {
            return Err(MstpError::PortNotFound(port));
        }
        {
            let (instances, mut ctx) = self.parts();
            for engine in instances.values_mut() {
                engine.remove_port(port, &mut ctx);
            }
        }
        self.timers.cancel_port(port);
        self.ports.remove(&port);
        info!(port, "port removed");
        self.reselect_all();
        self.after_event();
        Ok(())
    }

    /// Administrative clear of a guard violation on a port.
    #[instrument(skip(self))]
    pub fn clear_guard_violation(&mut self, port: u16) -> MstpResult<bool> {
        self.ensure_healthy()?;
        let Some(record) = self.ports.get_mut(&port) else {
            return Err(MstpError::PortNotFound(port));
        };
        let err_disabled = std::mem::take(&mut record.err_disabled);
        let mut cleared = err_disabled;
        for engine in self.instances.values_mut() {
            cleared |= engine.clear_guard(port);
        }
        if err_disabled {
            // timers were cancelled when the port was err-disabled
            self.apply_port_enable(port);
        }
        if cleared {
            info!(port, "guard violation cleared");
            self.reselect_all();
            self.after_event();
        }
        Ok(cleared)
    }

    // ---- protocol events ----

    /// Processes one received BPDU payload.
    ///
    /// Errors are informational: the BPDU has already been dropped, counted or
    /// processed in boundary mode when one is returned.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn deliver_bpdu(&mut self, port: u16, bytes: &[u8]) -> MstpResult<()> {
        self.ensure_healthy()?;
        if !self.enabled {
            debug!(port, "spanning tree disabled, BPDU ignored");
            return Ok(());
        }
        let Some(record) = self.ports.get(&port) else {
            return Err(MstpError::PortNotFound(port));
        };
        if !record.enabled {
            debug!(port, "port down, BPDU ignored");
            return Ok(());
        }
        if record.params.guards.bpdu_filter {
            self.counters.filtered += 1;
            return Ok(());
        }
        if record.err_disabled {
            debug!(port, "port err-disabled, BPDU ignored");
            return Ok(());
        }

        let bpdu = match Bpdu::decode(bytes) {
            Ok(bpdu) => bpdu,
            Err(e) => {
                self.counters.decode_errors += 1;
                debug!(port, error = %e, "dropping malformed BPDU");
                return Err(e.into());
            }
        };
        self.counters.bpdus_rx += 1;

        if record.params.guards.bpdu_guard {
            return self.bpdu_guard_violation(port);
        }

        let boundary = match &bpdu {
            Bpdu::Mst(mst) => !self.region.matches(&mst.config_id),
            _ => true,
        };
        self.note_bpdu_received(port, boundary);

        match &bpdu {
            Bpdu::Tcn => {
                let (instances, mut ctx) = self.parts();
                if let Some(cist) = instances.get_mut(&InstanceId::CIST) {
                    cist.receive_tcn(port, &mut ctx);
                }
            }
            Bpdu::Config(info) | Bpdu::Rst(info) => {
                let legacy = matches!(bpdu, Bpdu::Config(_));
                let msg = self.cist_message(info, legacy, self.params.max_hops);
                let (instances, mut ctx) = self.parts();
                if let Some(cist) = instances.get_mut(&InstanceId::CIST) {
                    cist.receive(port, &msg, &mut ctx);
                }
            }
            Bpdu::Mst(mst) => {
                let msg = self.cist_message(&mst.cist, false, mst.remaining_hops);
                let (instances, mut ctx) = self.parts();
                if let Some(cist) = instances.get_mut(&InstanceId::CIST) {
                    cist.receive(port, &msg, &mut ctx);
                }
                if !boundary {
                    // same region, same instances; omitted records follow the CIST
                    for engine in instances.values_mut().filter(|e| !e.id().is_cist()) {
                        let record = mst.record(engine.id());
                        engine.receive(port, &Self::msti_message(mst, &record), &mut ctx);
                    }
                }
            }
        }

        self.after_event();
        if boundary {
            self.counters.region_mismatches += 1;
            debug!(port, kind = bpdu.kind(), "BPDU from outside the region");
            return Err(MstpError::RegionMismatch { port });
        }
        Ok(())
    }

    fn bpdu_guard_violation(&mut self, port: u16) -> MstpResult<()> {
        warn!(port, "bpdu-guard: BPDU received, port err-disabled");
        if let Some(record) = self.ports.get_mut(&port) {
            record.err_disabled = true;
            record.new_info = false;
        }
        self.timers.cancel_port(port);
        {
            let (instances, mut ctx) = self.parts();
            for engine in instances.values_mut() {
                engine.block(port, GuardKind::BpduGuard, &mut ctx);
            }
            ctx.effects.push(Outbound::GuardViolation {
                port,
                kind: GuardKind::BpduGuard,
            });
        }
        self.reselect_all();
        self.after_event();
        Err(MstpError::GuardViolation {
            port,
            kind: GuardKind::BpduGuard,
        })
    }

    /// Edge and boundary bookkeeping common to every received BPDU.
    fn note_bpdu_received(&mut self, port: u16, boundary: bool) {
        let Some(record) = self.ports.get_mut(&port) else {
            return;
        };
        if record.params.auto_edge {
            self.timers.start(TimerKey::port(port, TimerKind::EdgeDelay), defaults::EDGE_DELAY);
        }
        let lost_edge = std::mem::take(&mut record.oper_edge);
        let boundary_changed = record.boundary != boundary;
        record.boundary = boundary;

        if lost_edge {
            info!(port, "BPDU on edge port, edge status lost");
        }
        if boundary_changed {
            debug!(port, boundary, "region boundary changed");
        }
        if !lost_edge && !boundary_changed {
            return;
        }

        let (instances, mut ctx) = self.parts();
        for engine in instances.values_mut() {
            if lost_edge {
                engine.edge_lost(port, &mut ctx);
            }
            if boundary_changed && !engine.id().is_cist() {
                engine.forget_received(port, &mut ctx);
                engine.reselect(&mut ctx);
            }
        }
    }

    fn cist_message(&self, info: &CistInfo, legacy: bool, remaining_hops: u8) -> InstanceMessage {
        let (role, flags) = if legacy {
            let mut flags = BpduFlags::from_bits(
                info.flags.bits() & (BpduFlags::TOPOLOGY_CHANGE | BpduFlags::TOPOLOGY_CHANGE_ACK),
            );
            flags.set_role(FlagRole::Designated);
            (FlagRole::Designated, flags)
        } else {
            (info.flags.role(), info.flags)
        };
        let message_age = info.timers.message_age_secs();
        InstanceMessage {
            vector: PriorityVector::message(info.root_id, info.root_path_cost, info.bridge_id, info.port_id),
            role,
            flags,
            message_age,
            remaining_hops,
            expired: message_age >= info.timers.max_age_secs(),
        }
    }

    fn msti_message(mst: &MstBpdu, record: &MstiRecord) -> InstanceMessage {
        InstanceMessage {
            vector: PriorityVector::message(
                record.regional_root_id,
                record.internal_root_path_cost,
                record.designated_bridge_id(mst.cist.bridge_id),
                record.designated_port_id(mst.cist.port_id),
            ),
            role: record.flags.role(),
            flags: record.flags,
            message_age: 0,
            remaining_hops: record.remaining_hops,
            expired: record.remaining_hops == 0,
        }
    }

    /// Advances time by one tick (one second).
    pub fn tick(&mut self) -> MstpResult<()> {
        self.ensure_healthy()?;
        if !self.enabled {
            return Ok(());
        }
        self.ticks += 1;
        for port in self.ports.values_mut() {
            port.tx_count = 0;
        }
        for engine in self.instances.values_mut() {
            engine.tick();
        }
        for key in self.timers.tick() {
            self.on_timer(key);
        }
        self.after_event();
        Ok(())
    }

    fn on_timer(&mut self, key: TimerKey) {
        match key.kind {
            TimerKind::Hello => self.on_hello(key.port),
            TimerKind::EdgeDelay => self.on_edge_delay(key.port),
            kind => {
                let (instances, mut ctx) = self.parts();
                if let Some(engine) = instances.get_mut(&key.instance) {
                    engine.on_timer(key.port, kind, &mut ctx);
                }
            }
        }
    }

    fn on_hello(&mut self, port: u16) {
        let Some(record) = self.ports.get(&port) else {
            return;
        };
        if !record.enabled || record.err_disabled {
            return;
        }
        self.timers
            .start(TimerKey::port(port, TimerKind::Hello), u32::from(self.params.hello_time));
        let periodic = self.instances.values().any(|engine| {
            let designated = engine
                .port(port)
                .map(|pm| pm.status().role() == PortRole::Designated)
                .unwrap_or(false);
            designated || engine.topology().is_changing(engine.id(), port, &self.timers)
        });
        if periodic {
            if let Some(record) = self.ports.get_mut(&port) {
                record.new_info = true;
            }
        }
    }

    /// No BPDU during the edge delay: a proposing designated port becomes an
    /// operational edge port.
    fn on_edge_delay(&mut self, port: u16) {
        let Some(record) = self.ports.get(&port) else {
            return;
        };
        if !record.enabled || record.oper_edge || !record.params.auto_edge {
            return;
        }
        let proposing = self
            .instances
            .get(&InstanceId::CIST)
            .and_then(|cist| cist.port(port))
            .map(|pm| {
                pm.proposing && matches!(pm.status(), PortStatus::Designated(p) if p != Progress::Forwarding)
            })
            .unwrap_or(false);
        if !proposing {
            self.timers.start(TimerKey::port(port, TimerKind::EdgeDelay), defaults::EDGE_DELAY);
            return;
        }

        info!(port, "no BPDU received, port operating as edge");
        if let Some(record) = self.ports.get_mut(&port) {
            record.oper_edge = true;
        }
        let (instances, mut ctx) = self.parts();
        for engine in instances.values_mut() {
            engine.edge_gained(port, &mut ctx);
        }
    }

    /// Work common to the end of every event.
    fn after_event(&mut self) {
        self.mirror_boundaries();
        self.counters.guard_violations += self.effects.take_guard_violations();
        for number in self.effects.take_dirty() {
            if let Some(port) = self.ports.get_mut(&number) {
                port.new_info = true;
            }
        }
        self.transmit();
        if let Err(e) = self.check_invariants() {
            error!(error = %e, "bridge halted");
            self.fault = Some(e.to_string());
        }
    }

    /// MSTI status of boundary ports follows the CIST port.
    fn mirror_boundaries(&mut self) {
        let boundary: Vec<(u16, PortStatus)> = self
            .ports
            .iter()
            .filter(|(_, p)| p.boundary)
            .filter_map(|(n, _)| {
                let status = self.instances.get(&InstanceId::CIST)?.port(*n)?.status();
                Some((*n, status))
            })
            .collect();
        if boundary.is_empty() {
            return;
        }
        let (instances, mut ctx) = self.parts();
        for engine in instances.values_mut().filter(|e| !e.id().is_cist()) {
            for (number, status) in &boundary {
                engine.mirror(*number, *status, &mut ctx);
            }
        }
    }

    fn transmit(&mut self) {
        let hold = self.params.tx_hold_count;
        let ready: Vec<u16> = self
            .ports
            .iter()
            .filter(|(_, p)| {
                p.new_info && p.enabled && !p.err_disabled && !p.params.guards.bpdu_filter && p.tx_count < hold
            })
            .map(|(n, _)| *n)
            .collect();
        for number in ready {
            let bpdu = self.build_bpdu(number);
            let Some(port) = self.ports.get_mut(&number) else {
                continue;
            };
            port.new_info = false;
            if let Some(bpdu) = bpdu {
                port.tx_count += 1;
                self.counters.bpdus_tx += 1;
                self.effects.push(Outbound::TransmitBpdu {
                    port: number,
                    bytes: bpdu.encode(),
                });
            }
        }
    }

    /// Builds the MST BPDU a port sends now.
    fn build_bpdu(&mut self, number: u16) -> Option<Bpdu> {
        let boundary = self.ports.get(&number)?.boundary;
        let cist_bridge_id = self.bridge_id(InstanceId::CIST);
        let mut cist = self
            .instances
            .get_mut(&InstanceId::CIST)?
            .advert(number, &self.timers, &self.params)?;
        // a window open in any instance flags the whole BPDU
        let changing = self.instances.values().any(|e| e.tc_active(number, &self.timers));
        if changing {
            cist.flags.set(BpduFlags::TOPOLOGY_CHANGE, true);
        }

        let mut msti = Vec::new();
        if !boundary {
            for engine in self.instances.values_mut().filter(|e| !e.id().is_cist()) {
                let bridge_id = engine.bridge_id();
                let Some(mut advert) = engine.advert(number, &self.timers, &self.params) else {
                    continue;
                };
                if changing {
                    advert.flags.set(BpduFlags::TOPOLOGY_CHANGE, true);
                }
                msti.push(MstiRecord {
                    flags: advert.flags,
                    regional_root_id: advert.vector.root_id,
                    internal_root_path_cost: advert.vector.root_path_cost,
                    bridge_priority: ((bridge_id.priority() >> 8) & 0xF0) as u8,
                    port_priority: advert.port_id.priority(),
                    remaining_hops: advert.remaining_hops,
                });
            }
        }

        let info = CistInfo {
            flags: cist.flags,
            root_id: cist.vector.root_id,
            root_path_cost: cist.vector.root_path_cost,
            bridge_id: cist_bridge_id,
            port_id: cist.port_id,
            timers: BpduTimers::from_secs(
                cist.message_age,
                self.params.max_age,
                self.params.hello_time,
                self.params.forward_delay,
            ),
        };
        let mut mst = MstBpdu {
            cist: info,
            regional_root_id: cist.vector.root_id,
            config_id: self.region.config_id(),
            internal_root_path_cost: cist.vector.root_path_cost,
            remaining_hops: cist.remaining_hops,
            msti,
        };
        mst.pack();
        Some(Bpdu::Mst(mst))
    }

    /// Verifies the instance table and per-instance role invariants.
    pub fn check_invariants(&self) -> MstpResult<()> {
        if !self.instances.contains_key(&InstanceId::CIST) {
            return Err(MstpError::internal("CIST missing from instance table"));
        }
        for (id, engine) in &self.instances {
            if *id != engine.id() {
                return Err(MstpError::internal(format!("instance table entry {} holds {}", id, engine.id())));
            }
            if !id.is_cist() && !self.region.vlan_map().contains_instance(*id) {
                return Err(MstpError::internal(format!("{} has no VLANs in the region map", id)));
            }
            for number in self.ports.keys() {
                if engine.port(*number).is_none() {
                    return Err(MstpError::internal(format!("port {} missing from {}", number, id)));
                }
            }
            engine.check().map_err(MstpError::internal)?;
        }
        Ok(())
    }

    // ---- queries ----

    pub fn query_state(&self, instance: InstanceId) -> MstpResult<InstanceState> {
        let engine = self
            .instances
            .get(&instance)
            .ok_or(MstpError::InstanceNotFound(instance.get()))?;
        let facts: BTreeMap<u16, PortFacts> = self.ports.iter().map(|(n, p)| (*n, p.facts())).collect();
        Ok(engine.snapshot(&self.timers, &facts, &self.params, self.instance_vlans(instance)))
    }

    fn instance_vlans(&self, instance: InstanceId) -> String {
        let map = self.region.vlan_map();
        if instance.is_cist() {
            let vlans: Vec<VlanId> = (VlanId::MIN..=VlanId::MAX)
                .filter_map(|id| VlanId::new(id).ok())
                .filter(|vlan| map.instance_of(*vlan).is_cist())
                .collect();
            format_vlan_list(&vlans)
        } else {
            map.vlans(instance).map(|v| format_vlan_list(v)).unwrap_or_default()
        }
    }

    pub fn query_region(&self) -> RegionState {
        RegionState {
            name: self.region.name().to_string(),
            revision: self.region.revision(),
            digest: self.region.digest().to_string(),
            instances: self
                .region
                .vlan_map()
                .instances()
                .map(|i| (i.get(), self.instance_vlans(i)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortState;
    use pretty_assertions::assert_eq;

    fn mac(n: u8) -> MacAddress {
        MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, n])
    }

    fn bridge(n: u8, ports: &[u16]) -> Bridge {
        let mut bridge = Bridge::new(mac(n), BridgeParams::default()).unwrap();
        for p in ports {
            bridge.set_port_admin_state(*p, true).unwrap();
        }
        bridge
    }

    fn vlans(ids: &[u16]) -> Vec<VlanId> {
        ids.iter().map(|id| VlanId::new(*id).unwrap()).collect()
    }

    fn msti(id: u16) -> InstanceId {
        InstanceId::msti(id).unwrap()
    }

    fn transmitted(outbound: &[Outbound]) -> Vec<(u16, Bpdu)> {
        outbound
            .iter()
            .filter_map(|o| match o {
                Outbound::TransmitBpdu { port, bytes } => Some((*port, Bpdu::decode(bytes).unwrap())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_bridge_is_root_and_proposes() {
        let mut bridge = bridge(1, &[1, 2]);
        let state = bridge.query_state(InstanceId::CIST).unwrap();
        assert!(state.is_root);
        assert_eq!(state.root_bridge_id, bridge.bridge_id(InstanceId::CIST));
        assert_eq!(state.count_in_role(PortRole::Designated), 2);

        let sent = transmitted(&bridge.drain_outbound());
        assert_eq!(sent.len(), 2);
        let Bpdu::Mst(mst) = &sent[0].1 else {
            panic!("expected an MST BPDU");
        };
        assert!(mst.cist.flags.contains(BpduFlags::PROPOSAL));
        assert_eq!(mst.cist.flags.role(), FlagRole::Designated);
        assert_eq!(mst.remaining_hops, 20);
        assert!(bridge.region().matches(&mst.config_id));
    }

    #[test]
    fn test_malformed_bpdu_is_counted_and_dropped() {
        let mut bridge = bridge(1, &[1]);
        let err = bridge.deliver_bpdu(1, &[0x00, 0x00, 0x03]).unwrap_err();
        assert!(matches!(err, MstpError::Decode(_)));
        assert_eq!(bridge.counters().decode_errors, 1);
        assert!(bridge.fault().is_none());
    }

    #[test]
    fn test_unknown_port_is_rejected() {
        let mut bridge = bridge(1, &[1]);
        assert_eq!(bridge.deliver_bpdu(7, &[0; 4]), Err(MstpError::PortNotFound(7)));
        assert_eq!(bridge.remove_port(7), Err(MstpError::PortNotFound(7)));
    }

    #[test]
    fn test_region_reconfiguration_is_atomic() {
        let mut bridge = bridge(1, &[1]);
        let map = VlanMap::from_instances([(msti(1), vlans(&[10, 11])), (msti(2), vlans(&[20]))]).unwrap();
        assert!(bridge.set_region_identity("region-a", 3, map.clone()).unwrap());
        assert_eq!(bridge.counters().reelections, 1);
        assert_eq!(bridge.instance_ids(), vec![InstanceId::CIST, msti(1), msti(2)]);

        // identical identity: no re-election
        assert!(!bridge.set_region_identity("region-a", 3, map).unwrap());
        assert_eq!(bridge.counters().reelections, 1);

        let region = bridge.query_region();
        assert_eq!(region.name, "region-a");
        assert_eq!(region.revision, 3);
        assert_eq!(region.instances.get(&1).map(String::as_str), Some("10-11"));
    }

    #[test]
    fn test_conflicting_vlan_map_leaves_state_unchanged() {
        let mut bridge = bridge(1, &[1]);
        bridge.map_vlans(msti(1), vlans(&[10])).unwrap();
        let digest = bridge.region().digest();

        let err = bridge.map_vlans(msti(2), vlans(&[10])).unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(bridge.region().digest(), digest);
        assert_eq!(bridge.instance_ids(), vec![InstanceId::CIST, msti(1)]);
    }

    #[test]
    fn test_removing_last_vlan_destroys_instance() {
        let mut bridge = bridge(1, &[1]);
        bridge.map_vlans(msti(4), vlans(&[40])).unwrap();
        bridge.drain_outbound();

        bridge.unmap_vlans(msti(4), vlans(&[40])).unwrap();
        assert_eq!(bridge.instance_ids(), vec![InstanceId::CIST]);
        assert!(bridge
            .drain_outbound()
            .contains(&Outbound::InstanceRemoved { instance: msti(4) }));
        assert_eq!(bridge.query_state(msti(4)), Err(MstpError::InstanceNotFound(4)));
        assert_eq!(bridge.remove_instance(msti(4)), Err(MstpError::InstanceNotFound(4)));
    }

    #[test]
    fn test_msti_records_follow_instances() {
        let mut bridge = bridge(1, &[1]);
        bridge.map_vlans(msti(2), vlans(&[20])).unwrap();
        bridge.set_bridge_priority(msti(2), 4096).unwrap();
        let sent = transmitted(&bridge.drain_outbound());
        let Some((_, Bpdu::Mst(mst))) = sent.last() else {
            panic!("expected an MST BPDU");
        };
        assert_eq!(mst.msti.len(), 1);
        assert_eq!(mst.msti[0].instance(), 2);
        assert_eq!(mst.msti[0].bridge_priority, 0x10);
        assert_eq!(mst.msti[0].port_priority, 128);
    }

    #[test]
    fn test_msti_following_cist_sends_no_record() {
        let map = VlanMap::from_instances([(msti(3), vlans(&[30]))]).unwrap();
        let mut first = bridge(1, &[1]);
        first.set_region_identity("lab", 0, map.clone()).unwrap();
        let sent = transmitted(&first.drain_outbound());
        let Some((_, Bpdu::Mst(mst))) = sent.last() else {
            panic!("expected an MST BPDU");
        };
        assert!(mst.msti.is_empty());
        assert_eq!(mst.record(msti(3)).instance(), 3);

        // the receiver rebuilds MSTI 3 from the CIST part
        let mut peer = bridge(2, &[1]);
        peer.set_region_identity("lab", 0, map).unwrap();
        peer.deliver_bpdu(1, &Bpdu::Mst(mst.clone()).encode()).unwrap();
        let state = peer.query_state(msti(3)).unwrap();
        assert_eq!(state.root_port, Some(1));
        assert_eq!(state.root_bridge_id.mac(), mac(1));
    }

    #[test]
    fn test_msti_topology_change_flags_every_instance() {
        let map = VlanMap::from_instances([(msti(1), vlans(&[10]))]).unwrap();
        let mut first = bridge(1, &[1]);
        first.set_region_identity("lab", 0, map.clone()).unwrap();
        let Some((_, quiet)) = transmitted(&first.drain_outbound()).pop() else {
            panic!("expected a BPDU");
        };

        // a window open only in MSTI 1
        first
            .timers
            .start(TimerKey::new(1, msti(1), TimerKind::TopologyChange), 3);
        assert!(!first.instances[&InstanceId::CIST].tc_active(1, &first.timers));
        if let Some(port) = first.ports.get_mut(&1) {
            port.new_info = true;
        }
        first.transmit();
        let Some((_, Bpdu::Mst(changing))) = transmitted(&first.drain_outbound()).pop() else {
            panic!("expected an MST BPDU");
        };
        assert!(changing.cist.flags.contains(BpduFlags::TOPOLOGY_CHANGE));
        assert!(changing.record(msti(1)).flags.contains(BpduFlags::TOPOLOGY_CHANGE));

        // the neighbor flushes the CIST as well
        let mut peer = bridge(2, &[1, 2]);
        peer.set_region_identity("lab", 0, map).unwrap();
        peer.deliver_bpdu(1, &quiet.encode()).unwrap();
        for _ in 0..4 {
            peer.tick().unwrap();
        }
        peer.drain_outbound();
        let before = peer.query_state(InstanceId::CIST).unwrap().topology_change_count;

        peer.deliver_bpdu(1, &Bpdu::Mst(changing).encode()).unwrap();
        assert!(peer
            .drain_outbound()
            .contains(&Outbound::TopologyChange { instance: InstanceId::CIST }));
        assert!(peer.query_state(InstanceId::CIST).unwrap().topology_change_count > before);
    }

    #[test]
    fn test_tx_hold_count_limits_bursts() {
        let mut bridge = bridge(1, &[1]);
        bridge.drain_outbound();
        for priority in 1..=10u16 {
            bridge
                .set_bridge_priority(InstanceId::CIST, priority * BridgeId::PRIORITY_STEP)
                .unwrap();
        }
        // one transmission already happened when the port came up
        let sent = transmitted(&bridge.drain_outbound());
        assert_eq!(sent.len(), usize::from(defaults::TX_HOLD_COUNT) - 1);

        bridge.tick().unwrap();
        assert_eq!(transmitted(&bridge.drain_outbound()).len(), 1);
    }

    #[test]
    fn test_auto_edge_after_quiet_period() {
        let mut bridge = bridge(1, &[1]);
        for _ in 0..defaults::EDGE_DELAY {
            bridge.tick().unwrap();
        }
        let state = bridge.query_state(InstanceId::CIST).unwrap();
        let port = state.port(1).unwrap();
        assert!(port.edge);
        assert_eq!(port.state, PortState::Forwarding);
    }

    #[test]
    fn test_bpdu_filter_drops_and_does_not_send() {
        let mut bridge = bridge(1, &[1]);
        let mut params = PortParams::default();
        params.guards.bpdu_filter = true;
        bridge.set_port_params(1, InstanceId::CIST, params).unwrap();
        bridge.drain_outbound();

        let other = bridge_bytes(2);
        assert_eq!(bridge.deliver_bpdu(1, &other), Ok(()));
        assert_eq!(bridge.counters().filtered, 1);
        bridge.tick().unwrap();
        bridge.tick().unwrap();
        assert!(transmitted(&bridge.drain_outbound()).is_empty());
        assert_eq!(
            bridge.query_state(InstanceId::CIST).unwrap().port(1).unwrap().state,
            PortState::Forwarding
        );
    }

    #[test]
    fn test_bpdu_guard_err_disables_until_cleared() {
        let mut bridge = bridge(1, &[1]);
        let mut params = PortParams::default();
        params.guards.bpdu_guard = true;
        bridge.set_port_params(1, InstanceId::CIST, params).unwrap();

        let err = bridge.deliver_bpdu(1, &bridge_bytes(2)).unwrap_err();
        assert_eq!(err, MstpError::GuardViolation { port: 1, kind: GuardKind::BpduGuard });
        assert_eq!(bridge.counters().guard_violations, 1);
        let port = bridge.query_state(InstanceId::CIST).unwrap().port(1).unwrap().clone();
        assert_eq!(port.guard, Some(GuardKind::BpduGuard));

        for _ in 0..40 {
            bridge.tick().unwrap();
            let _ = bridge.deliver_bpdu(1, &bridge_bytes(2));
        }
        let port = bridge.query_state(InstanceId::CIST).unwrap().port(1).unwrap().clone();
        assert_eq!(port.state, PortState::Discarding);

        assert!(bridge.clear_guard_violation(1).unwrap());
        let port = bridge.query_state(InstanceId::CIST).unwrap().port(1).unwrap().clone();
        assert_eq!(port.guard, None);
        assert_eq!(port.role, PortRole::Designated);
    }

    #[test]
    fn test_foreign_region_is_boundary() {
        let mut bridge = bridge(1, &[1]);
        bridge.map_vlans(msti(1), vlans(&[10])).unwrap();
        let err = bridge.deliver_bpdu(1, &bridge_bytes(0)).unwrap_err();
        assert_eq!(err, MstpError::RegionMismatch { port: 1 });
        assert_eq!(bridge.counters().region_mismatches, 1);

        let cist = bridge.query_state(InstanceId::CIST).unwrap();
        assert_eq!(cist.port(1).unwrap().role, PortRole::Root);
        assert!(cist.port(1).unwrap().boundary);
        // MSTI mirrors the CIST port
        let inst = bridge.query_state(msti(1)).unwrap();
        assert_eq!(inst.port(1).unwrap().role, PortRole::Designated);
        assert_eq!(inst.port(1).unwrap().state, PortState::Forwarding);
    }

    #[test]
    fn test_disable_stops_everything() {
        let mut bridge = bridge(1, &[1, 2]);
        bridge.set_enabled(false).unwrap();
        let state = bridge.query_state(InstanceId::CIST).unwrap();
        assert_eq!(state.count_in_role(PortRole::Disabled), 2);
        assert_eq!(bridge.deliver_bpdu(1, &bridge_bytes(0)), Ok(()));
        assert_eq!(bridge.counters().bpdus_rx, 0);

        bridge.set_enabled(true).unwrap();
        let state = bridge.query_state(InstanceId::CIST).unwrap();
        assert_eq!(state.count_in_role(PortRole::Designated), 2);
    }

    #[test]
    fn test_remove_port_cleans_up() {
        let mut bridge = bridge(1, &[1, 2]);
        bridge.remove_port(2).unwrap();
        assert_eq!(bridge.port_numbers(), vec![1]);
        assert!(bridge.query_state(InstanceId::CIST).unwrap().port(2).is_none());
        assert!(bridge.check_invariants().is_ok());
    }

    /// The first BPDU a fresh bridge `n` sends.
    fn bridge_bytes(n: u8) -> Vec<u8> {
        let mut other = bridge(n, &[1]);
        other
            .drain_outbound()
            .into_iter()
            .find_map(|o| match o {
                Outbound::TransmitBpdu { bytes, .. } => Some(bytes),
                _ => None,
            })
            .unwrap()
    }
}
