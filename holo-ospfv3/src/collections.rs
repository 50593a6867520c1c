//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::configuration::{AreaCfg, InterfaceCfg};
use crate::error::{ConfigError, Error};
use crate::interface::Interface;
use crate::lsdb::{LsaDelayedOrig, LsaEntry};
use crate::neighbor::Neighbor;
use crate::packet::lsa::{Lsa, LsaKey, LsaType};

pub type ObjectId = u32;

pub type AreaId = ObjectId;
pub type AreaIndex = Index;
pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type NeighborId = ObjectId;
pub type NeighborIndex = Index;
pub type LsaEntryId = ObjectId;
pub type LsaEntryIndex = Index;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Areas {
    arena: Arena<Area>,
    id_tree: HashMap<AreaId, AreaIndex>,
    area_id_tree: BTreeMap<Ipv4Addr, AreaIndex>,
    next_id: AreaId,
}

#[derive(Debug, Default)]
pub struct Interfaces {
    next_id: InterfaceId,
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    ifindex_tree: HashMap<u32, InterfaceIndex>,
}

#[derive(Debug, Default)]
pub struct Neighbors {
    next_id: NeighborId,
    id_tree: HashMap<NeighborId, NeighborIndex>,
    router_id_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
}

#[derive(Debug, Default)]
pub struct Lsdb {
    id_tree: HashMap<LsaEntryId, LsaEntryIndex>,
    tree: BTreeMap<LsaType, LsdbSingleType>,
    // List of MaxAge LSAs.
    pub maxage_lsas: BTreeSet<LsaKey>,
    // List of LSAs whose origination was delayed due to the MinLSInterval
    // check.
    pub delayed_orig: BTreeMap<LsaKey, LsaDelayedOrig>,
    // List of LSAs whose sequence number is wrapping.
    pub seqno_wrapping: BTreeMap<LsaKey, Lsa>,
    next_id: LsaEntryId,
    lsa_count: u32,
    cksum_sum: u32,
}

#[derive(Debug)]
pub struct LsdbSingleType {
    lsa_type: LsaType,
    tree: BTreeMap<LsaKey, LsaEntryIndex>,
    lsa_count: u32,
    cksum_sum: u32,
}

// LSDB ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Link(AreaId, InterfaceId),
    Area(AreaId),
    As,
}

// LSDB Index.
#[derive(Clone, Copy, Debug, EnumAsInner, Eq, PartialEq)]
pub enum LsdbIndex {
    Link(AreaIndex, InterfaceIndex),
    Area(AreaIndex),
    As,
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn get(&self, index: Index) -> Option<&T> {
        self.0.get(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Areas =====

impl Areas {
    pub(crate) fn insert(
        &mut self,
        config: AreaCfg,
    ) -> Result<(AreaIndex, &mut Area), Error> {
        let area_id = config.area_id;
        if self.area_id_tree.contains_key(&area_id) {
            return Err(ConfigError::DuplicateArea(area_id).into());
        }

        // Create and insert area into the arena.
        self.next_id += 1;
        let area = Area::new(self.next_id, config);
        let area_idx = self.arena.0.insert(area);

        // Link area to different collections.
        let area = &mut self.arena[area_idx];
        self.id_tree.insert(area.id, area_idx);
        self.area_id_tree.insert(area.area_id, area_idx);

        Ok((area_idx, area))
    }

    // Returns a reference to the area corresponding to the given ID.
    pub(crate) fn get_by_id(
        &self,
        id: AreaId,
    ) -> Result<(AreaIndex, &Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    // Returns a mutable reference to the area corresponding to the given ID.
    pub(crate) fn get_mut_by_id(
        &mut self,
        id: AreaId,
    ) -> Result<(AreaIndex, &mut Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |area_idx| (area_idx, &mut self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    // Returns a reference to the area corresponding to the given area ID.
    pub(crate) fn get_by_area_id(
        &self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &Area)> {
        self.area_id_tree
            .get(&area_id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
    }

    // Returns a mutable reference to the area corresponding to the given area
    // ID.
    pub(crate) fn get_mut_by_area_id(
        &mut self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &mut Area)> {
        self.area_id_tree
            .get(&area_id)
            .copied()
            .map(move |area_idx| (area_idx, &mut self.arena[area_idx]))
    }

    // Returns an iterator visiting all areas.
    //
    // Areas are ordered by their area IDs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Area> {
        self.area_id_tree
            .values()
            .map(|area_idx| &self.arena[*area_idx])
    }

    // Returns an iterator over all area indexes.
    //
    // Areas are ordered by their area IDs.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = AreaIndex> + '_ {
        self.area_id_tree.values().copied()
    }

    // Returns whether we're an area border router.
    pub(crate) fn is_abr(&self, interfaces: &Arena<Interface>) -> bool {
        self.active_count(interfaces) > 1
    }

    // Returns the number of active areas.
    pub(crate) fn active_count(&self, interfaces: &Arena<Interface>) -> usize {
        self.iter()
            .filter(|area| area.is_active(interfaces))
            .count()
    }

    // Returns the backbone area, if configured.
    pub(crate) fn backbone(&self) -> Option<(AreaIndex, &Area)> {
        self.get_by_area_id(Ipv4Addr::UNSPECIFIED)
    }
}

impl std::ops::Index<AreaIndex> for Areas {
    type Output = Area;

    fn index(&self, index: AreaIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<AreaIndex> for Areas {
    fn index_mut(&mut self, index: AreaIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        ifname: &str,
        config: InterfaceCfg,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        if self.name_tree.contains_key(ifname) {
            return Err(Error::DuplicateInterface(ifname.to_owned()));
        }

        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface = Interface::new(self.next_id, ifname.to_owned(), config);
        let iface_idx = arena.0.insert(iface);

        // Link interface to different collections.
        let iface = &mut arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        self.name_tree.insert(iface.name.clone(), iface_idx);

        Ok((iface_idx, iface))
    }

    // Update interface ifindex.
    pub(crate) fn update_ifindex(
        &mut self,
        iface_idx: InterfaceIndex,
        iface: &mut Interface,
        ifindex: Option<u32>,
    ) {
        if let Some(ifindex) = iface.system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }
        iface.system.ifindex = ifindex;
        if let Some(ifindex) = ifindex {
            self.ifindex_tree.insert(ifindex, iface_idx);
        }
    }

    // Returns a reference to the interface corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a mutable reference to the interface corresponding to the given
    // ID.
    pub(crate) fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a reference to the interface corresponding to the given name.
    pub(crate) fn get_by_name<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns a reference to the interface corresponding to the given ifindex.
    pub(crate) fn get_by_ifindex<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Interface>,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.name_tree.values().map(|iface_idx| &arena[*iface_idx])
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().copied()
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
        src: Ipv6Addr,
    ) -> (NeighborIndex, &'a mut Neighbor) {
        // Create and insert neighbor into the arena.
        self.next_id += 1;
        let nbr = Neighbor::new(self.next_id, router_id, src);
        let nbr_idx = arena.0.insert(nbr);

        // Link neighbor to different collections.
        let nbr = &mut arena[nbr_idx];
        self.id_tree.insert(nbr.id, nbr_idx);
        self.router_id_tree.insert(nbr.router_id, nbr_idx);

        (nbr_idx, nbr)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<Neighbor>,
        nbr_idx: NeighborIndex,
    ) {
        let nbr = &mut arena[nbr_idx];

        // Unlink neighbor from different collections.
        self.id_tree.remove(&nbr.id);
        self.router_id_tree.remove(&nbr.router_id);

        // Remove neighbor from the arena.
        arena.0.remove(nbr_idx);
    }

    // Returns a reference to the neighbor corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // ID.
    pub(crate) fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a mut Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    // Returns a reference to the neighbor corresponding to the given Router ID.
    pub(crate) fn get_by_router_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // Router ID.
    pub(crate) fn get_mut_by_router_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
    }

    // Returns an iterator visiting all neighbors.
    //
    // Neighbors are ordered by their Router IDs.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.router_id_tree.values().map(|nbr_idx| &arena[*nbr_idx])
    }

    // Returns an iterator over all neighbor indexes.
    //
    // Neighbors are ordered by their Router IDs.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.router_id_tree.values().copied()
    }

    // Returns an iterator over the Router IDs of all neighbors.
    pub(crate) fn router_ids(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.router_id_tree.keys().copied()
    }

    // Returns the number of neighbors.
    pub(crate) fn count(&self) -> usize {
        self.router_id_tree.len()
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<LsaEntry>,
        lsa: Arc<Lsa>,
        installed_at: u64,
    ) -> (LsaEntryIndex, &'a mut LsaEntry) {
        let key = lsa.hdr.key();

        // Create and insert LSA into the arena.
        self.next_id += 1;
        let lse = LsaEntry::new(self.next_id, lsa, installed_at);
        let lse_idx = arena.0.insert(lse);

        // Link LSA to different collections.
        let lse = &mut arena[lse_idx];
        self.id_tree.insert(lse.id, lse_idx);
        let lsdb_type =
            self.tree
                .entry(key.lsa_type)
                .or_insert_with(|| LsdbSingleType {
                    lsa_type: key.lsa_type,
                    tree: Default::default(),
                    lsa_count: 0,
                    cksum_sum: 0,
                });
        let old = lsdb_type.tree.insert(key, lse_idx);
        debug_assert!(old.is_none(), "LSA key={key:?} already exists");

        // If the LSA's age is MaxAge, update the MaxAge list.
        if lse.data.hdr.is_maxage() {
            self.maxage_lsas.insert(key);
        }

        // Update statistics.
        lsdb_type.lsa_count += 1;
        lsdb_type.cksum_sum += lse.data.hdr.cksum as u32;
        self.lsa_count += 1;
        self.cksum_sum += lse.data.hdr.cksum as u32;

        (lse_idx, lse)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lse_idx: LsaEntryIndex,
    ) {
        let Some(lse) = arena.0.remove(lse_idx) else {
            return;
        };
        let key = lse.data.hdr.key();

        // Unlink LSA from different collections.
        self.id_tree.remove(&lse.id);
        if let Some(lsdb_type) = self.tree.get_mut(&key.lsa_type) {
            lsdb_type.tree.remove(&key);
            lsdb_type.lsa_count -= 1;
            lsdb_type.cksum_sum -= lse.data.hdr.cksum as u32;
            if lsdb_type.tree.is_empty() {
                self.tree.remove(&key.lsa_type);
            }
        }

        // Update statistics.
        self.lsa_count -= 1;
        self.cksum_sum -= lse.data.hdr.cksum as u32;

        // Remove LSA from MaxAge list.
        self.maxage_lsas.remove(&key);
    }

    // Updates the age of an LSA in place, keeping the MaxAge list in sync.
    pub(crate) fn set_age(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lse_idx: LsaEntryIndex,
        age: u16,
    ) {
        let lse = &mut arena[lse_idx];
        let mut lsa = (*lse.data).clone();
        lsa.set_age(age);
        if lsa.hdr.is_maxage() {
            self.maxage_lsas.insert(lsa.hdr.key());
        }
        lse.data = Arc::new(lsa);
    }

    pub(crate) fn clear(&mut self, arena: &mut Arena<LsaEntry>) {
        for lse_idx in self.id_tree.values() {
            arena.0.remove(*lse_idx);
        }
        self.id_tree.clear();
        self.tree.clear();
        self.maxage_lsas.clear();
        self.delayed_orig.clear();
        self.seqno_wrapping.clear();
        self.lsa_count = 0;
        self.cksum_sum = 0;
    }

    // Returns a reference to the LSA corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        id: LsaEntryId,
    ) -> Result<(LsaEntryIndex, &'a LsaEntry), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|lse_idx| (lse_idx, &arena[lse_idx]))
            .filter(|(_, lse)| lse.id == id)
            .ok_or(Error::LsaEntryIdNotFound(id))
    }

    // Returns a reference to the LSA corresponding to the given LSA key.
    pub(crate) fn get<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        key: &LsaKey,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.tree
            .get(&key.lsa_type)
            .and_then(|lsdb_type| lsdb_type.tree.get(key).copied())
            .map(move |lse_idx| (lse_idx, &arena[lse_idx]))
    }

    // Returns an iterator visiting all LSAs.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .values()
            .flat_map(|lsdb_type| lsdb_type.iter(arena))
    }

    // Returns an iterator visiting all LSA types.
    //
    // LSA types are ordered numerically.
    pub(crate) fn iter_types(&self) -> impl Iterator<Item = &LsdbSingleType> {
        self.tree.values()
    }

    // Returns an iterator visiting all LSAs of the given type.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter_by_type<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .get(&lsa_type)
            .into_iter()
            .flat_map(|lsdb_type| lsdb_type.iter(arena))
    }

    // Returns an iterator visiting all LSAs of the given type and advertising
    // router.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter_by_type_advrtr<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .get(&lsa_type)
            .into_iter()
            .flat_map(move |lsdb_type| {
                lsdb_type.iter_by_type_advrtr(arena, adv_rtr)
            })
    }

    // Returns an iterator over all LSA indexes.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = LsaEntryIndex> + '_ {
        self.tree
            .values()
            .flat_map(|lsdb_type| lsdb_type.tree.values().copied())
    }

    pub fn lsa_count(&self) -> u32 {
        self.lsa_count
    }

    pub fn cksum_sum(&self) -> u32 {
        self.cksum_sum
    }
}

// ===== impl LsdbSingleType =====

impl LsdbSingleType {
    pub fn lsa_type(&self) -> LsaType {
        self.lsa_type
    }

    // Returns an iterator visiting all LSAs.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .values()
            .map(|lse_idx| (*lse_idx, &arena[*lse_idx]))
    }

    // Returns an iterator visiting all LSAs of the given advertising router.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter_by_type_advrtr<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        let begin = LsaKey {
            lsa_type: self.lsa_type,
            adv_rtr,
            lsa_id: Ipv4Addr::new(0, 0, 0, 0),
        };
        let end = LsaKey {
            lsa_type: self.lsa_type,
            adv_rtr,
            lsa_id: Ipv4Addr::new(255, 255, 255, 255),
        };
        self.tree
            .range(begin..=end)
            .map(|(_, lse_idx)| (*lse_idx, &arena[*lse_idx]))
    }

    pub fn lsa_count(&self) -> u32 {
        self.lsa_count
    }

    pub fn cksum_sum(&self) -> u32 {
        self.cksum_sum
    }
}

// ===== global functions =====

pub(crate) fn lsdb_get<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    interfaces: &'a Arena<Interface>,
    lsdb_id: LsdbId,
) -> Result<(LsdbIndex, &'a Lsdb), Error> {
    match lsdb_id {
        LsdbId::Link(area_id, iface_id) => {
            let (area_idx, area) = areas.get_by_id(area_id)?;
            let (iface_idx, iface) =
                area.interfaces.get_by_id(interfaces, iface_id)?;

            let lsdb_idx = LsdbIndex::Link(area_idx, iface_idx);
            Ok((lsdb_idx, &iface.state.lsdb))
        }
        LsdbId::Area(area_id) => {
            let (area_idx, area) = areas.get_by_id(area_id)?;

            let lsdb_idx = LsdbIndex::Area(area_idx);
            Ok((lsdb_idx, &area.state.lsdb))
        }
        LsdbId::As => Ok((LsdbIndex::As, instance_lsdb)),
    }
}

pub(crate) fn lsdb_index<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    interfaces: &'a Arena<Interface>,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a Lsdb) {
    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            let area = &areas[area_idx];
            let iface = &interfaces[iface_idx];

            let lsdb_id = LsdbId::Link(area.id, iface.id);
            (lsdb_id, &iface.state.lsdb)
        }
        LsdbIndex::Area(area_idx) => {
            let area = &areas[area_idx];

            let lsdb_id = LsdbId::Area(area.id);
            (lsdb_id, &area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}

pub(crate) fn lsdb_index_mut<'a>(
    instance_lsdb: &'a mut Lsdb,
    areas: &'a mut Areas,
    interfaces: &'a mut Arena<Interface>,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a mut Lsdb) {
    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            let area = &areas[area_idx];
            let iface = &mut interfaces[iface_idx];

            let lsdb_id = LsdbId::Link(area.id, iface.id);
            (lsdb_id, &mut iface.state.lsdb)
        }
        LsdbIndex::Area(area_idx) => {
            let area = &mut areas[area_idx];

            let lsdb_id = LsdbId::Area(area.id);
            (lsdb_id, &mut area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}
