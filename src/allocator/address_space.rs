//! Pool registry for one address space
//!
//! Holds the ordered list of allocated prefixes, the per-prefix pool data,
//! the predefined candidate catalogs, and the randomized draw state. All
//! operations are serialized by a single mutex; allocation is cheap relative
//! to the interface and firewall work callers perform outside the lock.

use crate::allocator::cursor::DoubleCursor;
use crate::allocator::pool::PoolData;
use crate::allocator::shuffler::Shuffler;
use crate::bitmap::Bitmap;
use crate::config::NetworkToSplit;
use crate::error::{Error, Result};
use crate::{ipbits, netutil};
use ipnet::IpNet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;

/// Upper bound on shuffler draws per randomized allocation. Draws that
/// collide with user-allocated or reserved prefixes are given back; past the
/// bound the deterministic walk takes over so a heavily occupied catalog
/// still allocates whatever fits.
const MAX_RANDOM_DRAWS: usize = 64;

pub(crate) struct AddrSpace {
    name: String,
    state: Mutex<SpaceState>,
}

struct SpaceState {
    /// Ordered list of allocated subnets, used for linear overlap checks and
    /// as one input of the subnet picker.
    allocated: Vec<IpNet>,
    /// Allocated subnets indexed by prefix; values track address allocations.
    subnets: HashMap<IpNet, PoolData>,
    /// Predefined IPv4 candidates, sorted, non-nested.
    predefined: Vec<NetworkToSplit>,
    /// Predefined IPv6 candidates, sorted, non-nested.
    predefined_v6: Vec<NetworkToSplit>,
    /// Draw-without-replacement state for randomized IPv6 allocation.
    shuffler: Option<Shuffler>,
    /// Ordinals handed out by the shuffler, awaiting give-back on release.
    drawn: HashMap<IpNet, u64>,
}

impl AddrSpace {
    pub(crate) fn new(
        name: impl Into<String>,
        predefined: Vec<NetworkToSplit>,
        predefined_v6: Vec<NetworkToSplit>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let predefined = prepare_predefined(predefined)?;
        let predefined_v6 = prepare_predefined(predefined_v6)?;

        let shuffler = seed.and_then(|seed| {
            let total = predefined_v6
                .iter()
                .fold(0u64, |acc, p| acc.saturating_add(p.subnet_count()));
            (total > 0).then(|| Shuffler::new(total, seed))
        });

        Ok(Self {
            name: name.into(),
            state: Mutex::new(SpaceState {
                allocated: Vec::new(),
                subnets: HashMap::new(),
                predefined,
                predefined_v6,
                shuffler,
                drawn: HashMap::new(),
            }),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Record the subnet `nw` (and optionally the sub-range `sub`) as
    /// allocated.
    pub(crate) fn allocate_subnet(&self, nw: IpNet, sub: Option<IpNet>) -> Result<()> {
        let mut state = self.state.lock();

        // Refuse if the exact pool (or the exact parent + sub-range pair) is
        // already allocated.
        if let Some(pool) = state.subnets.get(&nw) {
            let child_exists = sub.is_some_and(|s| pool.children.contains(&s));
            if sub.is_none() || child_exists {
                return Err(Error::PoolOverlap);
            }
        }

        state.allocate_subnet_locked(nw, sub)?;
        tracing::info!(
            address_space = %self.name,
            subnet = %nw,
            sub_range = ?sub,
            "allocated subnet"
        );
        Ok(())
    }

    /// Carve the next free subnet out of the predefined candidates, treating
    /// `reserved` as off-limits for this call.
    pub(crate) fn allocate_predefined(&self, reserved: &[IpNet], v6: bool) -> Result<IpNet> {
        let mut reserved = reserved.to_vec();
        reserved.sort();

        let mut state = self.state.lock();

        let randomized = v6 && state.shuffler.is_some() && !state.predefined_v6.is_empty();
        let (nw, ordinal) = if randomized {
            match state.pick_random_v6(&reserved) {
                Ok((nw, ordinal)) => (nw, Some(ordinal)),
                // Capped out or fully drawn: the deterministic walk still
                // finds whatever fits.
                Err(_) => (
                    pick_subnet(&state.allocated, &reserved, &state.predefined_v6)?,
                    None,
                ),
            }
        } else {
            let candidates = if v6 {
                &state.predefined_v6
            } else {
                &state.predefined
            };
            (pick_subnet(&state.allocated, &reserved, candidates)?, None)
        };

        state.allocate_pool(nw);
        if let Some(ordinal) = ordinal {
            state.drawn.insert(nw, ordinal);
        }

        tracing::info!(
            address_space = %self.name,
            subnet = %nw,
            randomized,
            "allocated predefined subnet"
        );
        Ok(nw)
    }

    /// Release the pool `nw`, or remove the sub-range `sub` from it. A pool
    /// with no remaining sub-ranges is deallocated once flagged for release.
    pub(crate) fn release_subnet(&self, nw: IpNet, sub: Option<IpNet>) -> Result<()> {
        let mut state = self.state.lock();

        let pool = state.subnets.get_mut(&nw).ok_or(Error::BadPool)?;
        match sub {
            Some(sub) => {
                if !pool.children.remove(&sub) {
                    return Err(Error::BadPool);
                }
            }
            None => pool.auto_release = true,
        }

        if pool.children.is_empty() && pool.auto_release {
            state.deallocate(nw);
            tracing::info!(address_space = %self.name, subnet = %nw, "released subnet");
        }
        Ok(())
    }

    /// Pick or validate one host address within the pool `nw`.
    pub(crate) fn request_address(
        &self,
        nw: IpNet,
        sub: Option<IpNet>,
        preferred: Option<IpAddr>,
        serial: bool,
    ) -> Result<IpAddr> {
        let mut state = self.state.lock();

        let pool = state
            .subnets
            .get_mut(&nw)
            .ok_or_else(|| Error::NotFound(pool_key(nw, sub)))?;

        if let Some(preferred) = preferred {
            if !nw.contains(&preferred) {
                return Err(Error::IpOutOfRange);
            }
        }

        if let Some(sub) = sub {
            if !pool.children.contains(&sub) {
                return Err(Error::NotFound(pool_key(nw, Some(sub))));
            }
        }

        let addr = get_address(nw, &mut pool.addrs, preferred, sub, serial)?;
        tracing::debug!(
            address_space = %self.name,
            subnet = %nw,
            address = %addr,
            "allocated address"
        );
        Ok(addr)
    }

    /// Release one host address back to the pool `nw`.
    pub(crate) fn release_address(&self, nw: IpNet, sub: Option<IpNet>, address: IpAddr) -> Result<()> {
        let mut state = self.state.lock();

        let pool = state
            .subnets
            .get_mut(&nw)
            .ok_or_else(|| Error::NotFound(pool_key(nw, sub)))?;

        if let Some(sub) = sub {
            if !pool.children.contains(&sub) {
                return Err(Error::NotFound(pool_key(nw, Some(sub))));
            }
        }

        if !nw.contains(&address) {
            return Err(Error::IpOutOfRange);
        }

        let ordinal = netutil::host_id(address, nw.prefix_len());
        pool.addrs.unset(ordinal).map_err(|_| Error::IpOutOfRange)?;

        tracing::debug!(
            address_space = %self.name,
            subnet = %nw,
            address = %address,
            "released address"
        );
        Ok(())
    }
}

impl SpaceState {
    /// A parent-only request refuses any overlap with existing pools, but a
    /// request that names a sub-range skips the parent overlap check
    /// entirely. The asymmetry is long-standing contract: callers rely on
    /// registering overlapping parents as long as their sub-ranges differ,
    /// so it must not be tightened here.
    fn allocate_subnet_locked(&mut self, nw: IpNet, sub: Option<IpNet>) -> Result<()> {
        let Some(sub) = sub else {
            if self.overlaps_allocated(nw) {
                return Err(Error::PoolOverlap);
            }
            self.allocate_pool(nw);
            return Ok(());
        };

        if !self.subnets.contains_key(&nw) {
            self.allocate_pool(nw);
            self.subnets
                .get_mut(&nw)
                .expect("pool inserted above")
                .auto_release = true;
        }
        self.subnets
            .get_mut(&nw)
            .expect("pool exists or was inserted above")
            .children
            .insert(sub);
        Ok(())
    }

    /// Whether `nw` shares any address with an allocated subnet.
    fn overlaps_allocated(&self, nw: IpNet) -> bool {
        self.allocated.iter().any(|p| netutil::overlaps(*p, nw))
    }

    /// Insert `nw` into the ordered allocation list and create its pool data.
    fn allocate_pool(&mut self, nw: IpNet) {
        let pos = self
            .allocated
            .iter()
            .position(|p| nw.addr() < p.addr())
            .unwrap_or(self.allocated.len());
        self.allocated.insert(pos, nw);
        self.subnets.insert(nw, PoolData::new(nw));
    }

    /// Remove `nw` from the allocation list, dropping its bitmap. A subnet
    /// drawn by the shuffler has its ordinal returned to the pool.
    fn deallocate(&mut self, nw: IpNet) {
        if let Some(pos) = self.allocated.iter().position(|p| *p == nw) {
            self.allocated.remove(pos);
            self.subnets.remove(&nw);
        }
        if let Some(ordinal) = self.drawn.remove(&nw) {
            if let Some(shuffler) = self.shuffler.as_mut() {
                shuffler.give_back(ordinal);
            }
        }
    }

    /// Draw candidate subnets from the shuffler until one clears every
    /// allocated and reserved prefix. Conflicting ordinals are parked and
    /// given back afterwards so they become drawable again once the
    /// conflicting allocation is gone.
    fn pick_random_v6(&mut self, reserved: &[IpNet]) -> Result<(IpNet, u64)> {
        let SpaceState {
            allocated,
            predefined_v6,
            shuffler,
            ..
        } = self;
        let shuffler = shuffler.as_mut().expect("caller checked the shuffler");

        let mut parked = Vec::new();
        let mut found = None;
        for _ in 0..MAX_RANDOM_DRAWS {
            let Some(ordinal) = shuffler.pick_random() else {
                break;
            };
            let subnet = catalog_subnet_at(predefined_v6, ordinal);
            let free = allocated.iter().all(|p| !netutil::overlaps(*p, subnet))
                && reserved.iter().all(|p| !netutil::overlaps(*p, subnet));
            if free {
                found = Some((subnet, ordinal));
                break;
            }
            parked.push(ordinal);
        }
        for ordinal in parked {
            shuffler.give_back(ordinal);
        }
        found.ok_or(Error::NoMoreSubnets)
    }
}

/// The subnet at position `ordinal` across the concatenated candidate
/// catalog.
fn catalog_subnet_at(catalog: &[NetworkToSplit], ordinal: u64) -> IpNet {
    let mut rem = ordinal;
    for candidate in catalog {
        let count = candidate.subnet_count();
        if rem < count {
            return candidate.subnet_at(rem);
        }
        rem -= count;
    }
    unreachable!("shuffler range matches the catalog subnet count")
}

/// Mask, sort, and de-nest a predefined catalog. A longer prefix fully
/// contained in a shorter predecessor is discarded: the picker would treat
/// the inner candidate as fully overlapped as soon as the outer one is
/// subnetted, skip it, and then carve the same addresses twice.
fn prepare_predefined(predefined: Vec<NetworkToSplit>) -> Result<Vec<NetworkToSplit>> {
    let mut masked = predefined
        .into_iter()
        .map(|p| p.masked())
        .collect::<Result<Vec<_>>>()?;
    masked.sort_by(|a, b| a.base.cmp(&b.base));

    let mut kept: Vec<NetworkToSplit> = Vec::with_capacity(masked.len());
    for p in masked {
        match kept.last() {
            Some(last) if netutil::overlaps(last.base, p.base) => continue,
            _ => kept.push(p),
        }
    }
    Ok(kept)
}

/// Walk the union of `allocated` and `reserved` in address order and return
/// the first free subnet inside the predefined candidates. The caller
/// inserts the result into its allocation list.
fn pick_subnet(
    allocated: &[IpNet],
    reserved: &[IpNet],
    predefined: &[NetworkToSplit],
) -> Result<IpNet> {
    let mut pdf_id = 0usize;
    let mut partial_overlap = false;
    let mut prev_alloc: Option<IpNet> = None;

    let mut dc = DoubleCursor::new(allocated, reserved);

    while let Some(alloc) = dc.get() {
        if pdf_id >= predefined.len() {
            return Err(Error::NoMoreSubnets);
        }
        let pdf = predefined[pdf_id];

        if netutil::overlaps(alloc, pdf.base) {
            dc.inc();

            if alloc.prefix_len() <= pdf.base.prefix_len() {
                // The entry is at least as big as the candidate: the whole
                // block is overlapped.
                partial_overlap = false;
                prev_alloc = None;
                pdf_id += 1;
                continue;
            }

            // No earlier entry touched this candidate yet; check for room
            // between the start of the candidate and this entry.
            if !partial_overlap && ipbits::distance(pdf.first_prefix(), alloc, pdf.size) >= 1 {
                return Ok(pdf.first_prefix());
            }

            // The candidate is already partially overlapped; check for room
            // between the previous entry and this one.
            if partial_overlap {
                if let Some(after_prev) =
                    prev_alloc.and_then(|p| netutil::prefix_after(p, pdf.size))
                {
                    if ipbits::distance(after_prev, alloc, pdf.size) >= 1 {
                        return Ok(after_prev);
                    }
                }
            }

            if netutil::last_addr(alloc) == netutil::last_addr(pdf.base) {
                // The entry reaches the very end of the candidate: exhausted
                // from the top.
                partial_overlap = false;
                prev_alloc = None;
                pdf_id += 1;
                continue;
            }

            partial_overlap = true;
            prev_alloc = Some(alloc);
            continue;
        }

        // The previous entry overlapped the candidate and this one doesn't.
        // Is there room left between the previous entry and the end of the
        // candidate?
        if partial_overlap {
            partial_overlap = false;

            if let Some(next) = prev_alloc.and_then(|p| netutil::prefix_after(p, pdf.size)) {
                if netutil::overlaps(pdf.base, next) {
                    return Ok(next);
                }
            }

            // Not enough space left to subnet the candidate once more. The
            // cursor stays put: the same entry is re-tested against the next
            // candidate.
            pdf_id += 1;
            continue;
        }

        // The candidate sorts entirely before this entry, so its first
        // subnet is free.
        if pdf.base.addr() < alloc.addr() {
            return Ok(pdf.first_prefix());
        }

        dc.inc();
        prev_alloc = Some(alloc);
    }

    if pdf_id >= predefined.len() {
        return Err(Error::NoMoreSubnets);
    }

    // The cursor is exhausted but candidates remain. Try once after the
    // partial overlap, then fall back to the first untouched candidate.
    if partial_overlap {
        let pdf = predefined[pdf_id];
        if let Some(next) = prev_alloc.and_then(|p| netutil::prefix_after(p, pdf.size)) {
            if netutil::overlaps(pdf.base, next) {
                return Ok(next);
            }
        }
        pdf_id += 1;
    }

    if let Some(pdf) = predefined.get(pdf_id) {
        return Ok(pdf.first_prefix());
    }

    Err(Error::NoMoreSubnets)
}

/// Pick one host address out of the pool bitmap.
fn get_address(
    base: IpNet,
    bitmask: &mut Bitmap,
    preferred: Option<IpAddr>,
    range: Option<IpNet>,
    serial: bool,
) -> Result<IpAddr> {
    if bitmask.unselected() == 0 {
        return Err(Error::NoMoreAddresses);
    }

    let ordinal = match (preferred, range) {
        (None, None) => bitmask.set_any(serial),
        // A preferred address is validated against the parent pool only; the
        // sub-range does not constrain it. Callers picking both a sub-range
        // and explicit addresses get exactly what they asked for, even
        // outside the window.
        (Some(preferred), _) => {
            let ordinal = netutil::host_id(preferred, base.prefix_len());
            bitmask.set(ordinal).map(|()| ordinal)
        }
        (None, Some(range)) => {
            let (start, end) = netutil::subnet_range(base, range);
            bitmask.set_any_in_range(start, end, serial)
        }
    }
    .map_err(|_| Error::NoMoreAddresses)?;

    Ok(ipbits::add(base.network(), ordinal, 0))
}

fn pool_key(nw: IpNet, sub: Option<IpNet>) -> String {
    match sub {
        Some(sub) => format!("{nw}/{sub}"),
        None => nw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn net(s: &str) -> IpNet {
        IpNet::from_str(s).unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    fn split(s: &str, size: u8) -> NetworkToSplit {
        NetworkToSplit::new(net(s), size)
    }

    fn nets(list: &[&str]) -> Vec<IpNet> {
        list.iter().map(|s| net(s)).collect()
    }

    fn space_with_allocated(predefined: Vec<NetworkToSplit>, allocated: &[&str]) -> AddrSpace {
        let space = AddrSpace::new("test", predefined, Vec::new(), None).unwrap();
        {
            let mut state = space.state.lock();
            state.allocated = nets(allocated);
        }
        space
    }

    struct PickerCase {
        name: &'static str,
        predefined: Vec<NetworkToSplit>,
        allocated: &'static [&'static str],
        reserved: &'static [&'static str],
        expected: std::result::Result<&'static str, Error>,
    }

    #[test]
    fn test_dynamic_pool_allocation() {
        let cases = [
            PickerCase {
                name: "first allocated overlaps at the end of first pool",
                predefined: vec![split("192.168.0.0/16", 24)],
                allocated: &["192.168.255.0/24"],
                reserved: &[],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "first reserved bigger than first allocated",
                predefined: vec![split("10.0.0.0/8", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.0.0.0/8"],
                reserved: &["10.0.0.0/7"],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "first pool fully overlapped by bigger allocated, next overlapped in the middle",
                predefined: vec![split("10.20.0.0/16", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.0.0.0/8", "192.168.128.0/24"],
                reserved: &[],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "first pool fully overlapped, next overlapped at the beginning and in the middle",
                predefined: vec![split("10.20.0.0/16", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.0.0.0/8", "192.168.0.0/24", "192.168.128.0/24"],
                reserved: &[],
                expected: Ok("192.168.1.0/24"),
            },
            PickerCase {
                name: "first pool fully overlapped by smaller prefixes, next overlapped in the middle",
                predefined: vec![split("10.20.0.0/22", 24), split("192.168.0.0/16", 24)],
                allocated: &[
                    "10.20.0.0/24",
                    "10.20.1.0/24",
                    "10.20.2.0/24",
                    "192.168.128.0/24",
                ],
                reserved: &["10.20.3.0/24"],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "first pool fully overlapped by smaller prefix, next predefined before reserved",
                predefined: vec![split("10.20.0.0/16", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.20.0.0/17", "10.20.128.0/17"],
                reserved: &["200.1.2.0/24"],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "reserved is the same as the last allocated subnet",
                predefined: vec![split("10.10.0.0/22", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.10.0.0/24", "10.10.1.0/24", "10.10.2.0/24", "10.10.3.0/24"],
                reserved: &["10.10.3.0/24"],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "partial overlap by allocated of different sizes",
                predefined: vec![split("192.168.0.0/16", 24)],
                allocated: &[
                    "192.168.0.0/24",
                    "192.168.1.0/24",
                    "192.168.2.0/23",
                    "192.168.4.3/30",
                ],
                reserved: &[],
                expected: Ok("192.168.5.0/24"),
            },
            PickerCase {
                name: "partial overlap at the start, not enough space left",
                predefined: vec![split("10.0.0.0/31", 31), split("192.168.0.0/16", 24)],
                allocated: &["10.0.0.0/32", "100.0.0.0/32", "200.0.0.0/32"],
                reserved: &[],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "partial overlap by allocations and reserved of different sizes",
                predefined: vec![split("192.168.0.0/16", 24)],
                allocated: &["192.168.0.0/24", "192.168.1.0/24", "192.168.2.3/30"],
                reserved: &["192.168.2.4/30", "192.168.3.0/30", "192.168.4.0/23"],
                expected: Ok("192.168.6.0/24"),
            },
            PickerCase {
                name: "same prefix in allocated and reserved",
                predefined: vec![split("192.168.0.0/16", 24)],
                allocated: &["192.168.0.0/24"],
                reserved: &["192.168.0.0/24"],
                expected: Ok("192.168.1.0/24"),
            },
            PickerCase {
                name: "partial overlap, two predefined",
                predefined: vec![split("10.0.0.0/8", 24), split("192.168.0.0/16", 24)],
                allocated: &["10.0.0.0/24"],
                reserved: &["192.168.0.0/24"],
                expected: Ok("10.0.1.0/24"),
            },
            PickerCase {
                name: "predefined with nested prefixes, longer prefixes discarded",
                predefined: vec![
                    split("10.0.0.0/8", 24),
                    split("10.0.0.0/16", 24),
                    split("10.10.0.0/16", 24),
                    split("192.168.0.0/16", 24),
                ],
                allocated: &[],
                reserved: &["10.0.0.0/8"],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "partial overlap at the beginning, single predefined",
                predefined: vec![split("172.16.0.0/15", 16)],
                allocated: &["172.16.0.0/16"],
                reserved: &[],
                expected: Ok("172.17.0.0/16"),
            },
            PickerCase {
                name: "no space left at the end, next pool not subnetted yet",
                predefined: vec![split("172.16.0.0/15", 16), split("192.168.0.0/16", 24)],
                allocated: &["172.16.0.0/16", "172.17.0.0/17"],
                reserved: &[],
                expected: Ok("192.168.0.0/24"),
            },
            PickerCase {
                name: "no space left at the end, no more predefined",
                predefined: vec![split("172.16.0.0/15", 16)],
                allocated: &["172.16.0.0/16", "172.17.0.0/17"],
                reserved: &[],
                expected: Err(Error::NoMoreSubnets),
            },
            PickerCase {
                name: "extra allocated, no pool left",
                predefined: vec![split("172.16.0.0/15", 16)],
                allocated: &["172.16.0.0/16", "172.17.0.0/16", "192.168.0.0/24"],
                reserved: &[],
                expected: Err(Error::NoMoreSubnets),
            },
            PickerCase {
                name: "extra reserved, no pool left",
                predefined: vec![split("172.16.0.0/15", 16)],
                allocated: &["172.16.0.0/16", "172.17.0.0/16"],
                reserved: &["192.168.0.0/24"],
                expected: Err(Error::NoMoreSubnets),
            },
            PickerCase {
                name: "predefined fully allocated",
                predefined: vec![split("172.16.0.0/15", 16), split("192.168.0.0/23", 24)],
                allocated: &[
                    "172.16.0.0/16",
                    "172.17.0.0/16",
                    "192.168.0.0/24",
                    "192.168.1.0/24",
                ],
                reserved: &[],
                expected: Err(Error::NoMoreSubnets),
            },
            PickerCase {
                name: "partial overlap, not enough space left",
                predefined: vec![split("172.16.0.0/15", 16), split("192.168.0.0/23", 24)],
                allocated: &[
                    "172.16.0.0/16",
                    "172.17.128.0/17",
                    "192.168.0.1/32",
                    "192.168.1.0/24",
                ],
                reserved: &[],
                expected: Err(Error::NoMoreSubnets),
            },
        ];

        for case in cases {
            let space = space_with_allocated(case.predefined, case.allocated);
            let reserved = nets(case.reserved);
            let got = space.allocate_predefined(&reserved, false);
            match case.expected {
                Ok(prefix) => assert_eq!(got, Ok(net(prefix)), "{}", case.name),
                Err(ref e) => assert_eq!(got, Err(e.clone()), "{}", case.name),
            }
        }
    }

    #[test]
    fn test_allocation_list_stays_sorted() {
        let space = space_with_allocated(
            vec![split("192.168.0.0/16", 24)],
            &["192.168.1.0/24", "192.168.3.0/24"],
        );
        space.allocate_predefined(&[], false).unwrap();
        space.allocate_predefined(&[], false).unwrap();

        let state = space.state.lock();
        assert!(
            state.allocated.windows(2).all(|w| w[0].addr() < w[1].addr()),
            "allocation list out of order: {:?}",
            state.allocated
        );
        assert_eq!(
            state.allocated,
            nets(&[
                "192.168.0.0/24",
                "192.168.1.0/24",
                "192.168.2.0/24",
                "192.168.3.0/24",
            ])
        );
    }

    #[test]
    fn test_allocate_subnet_overlap_rules() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();

        space.allocate_subnet(net("10.0.0.0/16"), None).unwrap();

        // The exact pool is already allocated.
        assert_eq!(
            space.allocate_subnet(net("10.0.0.0/16"), None),
            Err(Error::PoolOverlap)
        );
        // A parent-only request refuses overlap.
        assert_eq!(
            space.allocate_subnet(net("10.0.0.0/8"), None),
            Err(Error::PoolOverlap)
        );
        assert_eq!(
            space.allocate_subnet(net("10.0.128.0/17"), None),
            Err(Error::PoolOverlap)
        );
        // Disjoint parent is fine.
        space.allocate_subnet(net("10.1.0.0/16"), None).unwrap();
    }

    #[test]
    fn test_allocate_subnet_child_skips_overlap_check() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();

        space.allocate_subnet(net("10.0.0.0/16"), None).unwrap();
        // Overlapping parent goes through when a sub-range is named.
        space
            .allocate_subnet(net("10.0.0.0/8"), Some(net("10.0.1.0/24")))
            .unwrap();
        // The same parent + sub-range pair is refused.
        assert_eq!(
            space.allocate_subnet(net("10.0.0.0/8"), Some(net("10.0.1.0/24"))),
            Err(Error::PoolOverlap)
        );
        // A different sub-range of the same parent is fine.
        space
            .allocate_subnet(net("10.0.0.0/8"), Some(net("10.0.2.0/24")))
            .unwrap();
    }

    #[test]
    fn test_release_unknown_pool_is_bad_pool() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        assert_eq!(
            space.release_subnet(net("10.0.0.0/16"), None),
            Err(Error::BadPool)
        );

        space.allocate_subnet(net("10.0.0.0/16"), None).unwrap();
        assert_eq!(
            space.release_subnet(net("10.0.0.0/16"), Some(net("10.0.1.0/24"))),
            Err(Error::BadPool)
        );
    }

    #[test]
    fn test_release_cascades_when_last_child_goes() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();

        // Parent created implicitly for the sub-range is auto-released.
        space
            .allocate_subnet(net("10.0.0.0/16"), Some(net("10.0.1.0/24")))
            .unwrap();
        space
            .allocate_subnet(net("10.0.0.0/16"), Some(net("10.0.2.0/24")))
            .unwrap();

        space
            .release_subnet(net("10.0.0.0/16"), Some(net("10.0.1.0/24")))
            .unwrap();
        // One child left: the parent is still there.
        assert!(space.state.lock().subnets.contains_key(&net("10.0.0.0/16")));

        space
            .release_subnet(net("10.0.0.0/16"), Some(net("10.0.2.0/24")))
            .unwrap();
        assert!(!space.state.lock().subnets.contains_key(&net("10.0.0.0/16")));
        assert!(space.state.lock().allocated.is_empty());
    }

    #[test]
    fn test_explicit_pool_released_only_without_children() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();

        space.allocate_subnet(net("10.0.0.0/16"), None).unwrap();
        space
            .allocate_subnet(net("10.0.0.0/16"), Some(net("10.0.1.0/24")))
            .unwrap();

        // Releasing the parent only flags it while a child remains.
        space.release_subnet(net("10.0.0.0/16"), None).unwrap();
        assert!(space.state.lock().subnets.contains_key(&net("10.0.0.0/16")));

        space
            .release_subnet(net("10.0.0.0/16"), Some(net("10.0.1.0/24")))
            .unwrap();
        assert!(!space.state.lock().subnets.contains_key(&net("10.0.0.0/16")));
    }

    #[test]
    fn test_request_address_basics() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        space.allocate_subnet(net("10.0.0.0/24"), None).unwrap();

        // Ordinal 0 is the network address and stays reserved.
        assert_eq!(
            space.request_address(net("10.0.0.0/24"), None, None, false),
            Ok(addr("10.0.0.1"))
        );
        assert_eq!(
            space.request_address(net("10.0.0.0/24"), None, None, false),
            Ok(addr("10.0.0.2"))
        );

        // Preferred address.
        assert_eq!(
            space.request_address(net("10.0.0.0/24"), None, Some(addr("10.0.0.100")), false),
            Ok(addr("10.0.0.100"))
        );
        // Taken preferred address.
        assert_eq!(
            space.request_address(net("10.0.0.0/24"), None, Some(addr("10.0.0.100")), false),
            Err(Error::NoMoreAddresses)
        );
        // Preferred address outside the pool.
        assert_eq!(
            space.request_address(net("10.0.0.0/24"), None, Some(addr("10.0.1.1")), false),
            Err(Error::IpOutOfRange)
        );
        // Unknown pool.
        assert!(matches!(
            space.request_address(net("10.9.0.0/24"), None, None, false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_request_address_within_sub_range() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        space
            .allocate_subnet(net("10.0.0.0/16"), Some(net("10.0.2.0/24")))
            .unwrap();

        let got = space
            .request_address(net("10.0.0.0/16"), Some(net("10.0.2.0/24")), None, false)
            .unwrap();
        assert_eq!(got, addr("10.0.2.0"));

        // Unknown sub-range.
        assert!(matches!(
            space.request_address(net("10.0.0.0/16"), Some(net("10.0.9.0/24")), None, false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_address_conservation() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        space.allocate_subnet(net("10.0.0.0/8"), None).unwrap();

        let first = space
            .request_address(net("10.0.0.0/8"), None, None, false)
            .unwrap();
        space
            .release_address(net("10.0.0.0/8"), None, first)
            .unwrap();
        let second = space
            .request_address(net("10.0.0.0/8"), None, None, true)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_release_address_errors() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        space.allocate_subnet(net("10.0.0.0/24"), None).unwrap();

        assert!(matches!(
            space.release_address(net("10.9.0.0/24"), None, addr("10.9.0.1")),
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            space.release_address(net("10.0.0.0/24"), None, addr("192.168.0.1")),
            Err(Error::IpOutOfRange)
        );
        assert_eq!(
            space.release_address(net("10.0.0.0/24"), None, addr("fd00::1")),
            Err(Error::IpOutOfRange)
        );
    }

    #[test]
    fn test_pool_exhaustion() {
        let space = AddrSpace::new("test", Vec::new(), Vec::new(), None).unwrap();
        space.allocate_subnet(net("10.0.0.0/30"), None).unwrap();

        // Four addresses, ordinal 0 reserved.
        for _ in 0..3 {
            space
                .request_address(net("10.0.0.0/30"), None, None, true)
                .unwrap();
        }
        assert_eq!(
            space.request_address(net("10.0.0.0/30"), None, None, true),
            Err(Error::NoMoreAddresses)
        );
    }

    #[test]
    fn test_predefined_nested_discard_at_construction() {
        let space = AddrSpace::new(
            "test",
            vec![
                split("10.0.0.0/8", 24),
                split("10.10.0.0/16", 24),
                split("192.168.0.0/16", 24),
            ],
            Vec::new(),
            None,
        )
        .unwrap();
        let state = space.state.lock();
        assert_eq!(state.predefined.len(), 2);
        assert_eq!(state.predefined[0].base, net("10.0.0.0/8"));
        assert_eq!(state.predefined[1].base, net("192.168.0.0/16"));
    }

    #[test]
    fn test_randomized_v6_draws_distinct_subnets() {
        let space = AddrSpace::new(
            "test",
            Vec::new(),
            vec![split("fd00::/8", 64)],
            Some(1),
        )
        .unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let nw = space.allocate_predefined(&[], true).unwrap();
            assert_eq!(nw.prefix_len(), 64);
            assert!(netutil::overlaps(net("fd00::/8"), nw), "outside ULA: {nw}");
            assert!(seen.insert(nw), "subnet {nw} allocated twice");
        }
    }

    #[test]
    fn test_randomized_v6_is_deterministic_per_seed() {
        let make = || {
            AddrSpace::new("test", Vec::new(), vec![split("fd00::/8", 64)], Some(7)).unwrap()
        };
        let a = make();
        let b = make();
        for _ in 0..16 {
            assert_eq!(
                a.allocate_predefined(&[], true).unwrap(),
                b.allocate_predefined(&[], true).unwrap()
            );
        }
    }

    #[test]
    fn test_randomized_v6_give_back_on_release() {
        let space = AddrSpace::new(
            "test",
            Vec::new(),
            vec![split("fd00::/8", 64)],
            Some(3),
        )
        .unwrap();

        let nw = space.allocate_predefined(&[], true).unwrap();
        space.release_subnet(nw, None).unwrap();
        assert!(space.state.lock().drawn.is_empty());

        // The freed subnet is drawable again; keep allocating and expect no
        // collision with live allocations.
        let mut live = std::collections::HashSet::new();
        for _ in 0..16 {
            let nw = space.allocate_predefined(&[], true).unwrap();
            assert!(live.insert(nw));
        }
    }

    #[test]
    fn test_randomized_v6_skips_reserved() {
        // A catalog of two /64 subnets with one reserved: every draw must
        // return the other one.
        let space = AddrSpace::new(
            "test",
            Vec::new(),
            vec![split("fd00::/63", 64)],
            Some(11),
        )
        .unwrap();

        let reserved = [net("fd00::/64")];
        let nw = space.allocate_predefined(&reserved, true).unwrap();
        assert_eq!(nw, net("fd00:0:0:1::/64"));
    }

    #[test]
    fn test_v6_dynamic_without_seed_is_deterministic_walk() {
        let space = AddrSpace::new(
            "test",
            Vec::new(),
            vec![split("fd00::/63", 64)],
            None,
        )
        .unwrap();
        assert_eq!(
            space.allocate_predefined(&[], true),
            Ok(net("fd00::/64"))
        );
        assert_eq!(
            space.allocate_predefined(&[], true),
            Ok(net("fd00:0:0:1::/64"))
        );
        assert_eq!(
            space.allocate_predefined(&[], true),
            Err(Error::NoMoreSubnets)
        );
    }

    #[test]
    fn test_dynamic_allocation_skips_mixed_family_entries() {
        // IPv6 allocations never block IPv4 picking and vice versa.
        let space = space_with_allocated(
            vec![split("192.168.0.0/16", 24)],
            &["192.168.0.0/24"],
        );
        {
            let mut state = space.state.lock();
            let v6 = net("fd00::/64");
            state.allocated.push(v6);
            state.subnets.insert(v6, PoolData::new(v6));
        }
        assert_eq!(
            space.allocate_predefined(&[], false),
            Ok(net("192.168.1.0/24"))
        );
    }
}
