//! Partial Allocator
//!
//! Owns the partial pool, the poly pool and the per-part poly lists, and
//! multiplexes the fixed pool onto the nine parts. Note-on reserves as many
//! partials as the patch cache needs, stealing from lower-priority parts
//! according to the reservation table. Stealing is asynchronous: a stolen
//! poly is aborted (fastest decay) and stays counted until its partials
//! deactivate, so the triggering note-on returns `Aborting` and the caller
//! retries once the abort has drained.

use crate::la32::{PartialPairOps, WaveSource};
use crate::params::{PART_COUNT, PARTIALS_PER_TIMBRE};
use crate::partial::{NoteOnContext, PatchCache, Partial};
use crate::poly::{Poly, PolyState};
use crate::render::DacStreams;
use crate::rng::Rng;
use crate::tables::Tables;

/// Default size of the partial pool.
pub const DEFAULT_PARTIAL_COUNT: usize = 32;

/// Part indices from lowest to highest allocation priority.
const PRIORITY_LOWEST_FIRST: [usize; PART_COUNT] = [7, 6, 5, 4, 3, 2, 1, 0, 8];

/// Outcome of a note-on allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOnResult {
    /// The poly started with all its partials.
    Started(usize),
    /// A steal is in flight; retry once the aborting poly drains.
    Aborting,
    /// Not enough free partials (or nothing playable): the note is dropped.
    NoPartials,
}

/// The allocator and both pools.
pub struct PartialManager<P: PartialPairOps> {
    partials: Vec<Partial<P>>,
    free_partials: Vec<usize>,
    polys: Vec<Poly>,
    free_polys: Vec<usize>,
    part_polys: [Vec<usize>; PART_COUNT],
    reserve: [u8; PART_COUNT],
    aborting_poly: Option<usize>,
}

impl<P: PartialPairOps> PartialManager<P> {
    pub fn new(partial_count: usize) -> Self {
        let partials = (0..partial_count).map(Partial::new).collect();
        let polys = (0..partial_count).map(Poly::new).collect();
        PartialManager {
            partials,
            free_partials: (0..partial_count).rev().collect(),
            polys,
            free_polys: (0..partial_count).rev().collect(),
            part_polys: core::array::from_fn(|_| Vec::with_capacity(partial_count)),
            reserve: [0; PART_COUNT],
            aborting_poly: None,
        }
    }

    /// Install the nine reservation counts, capping the running sum at the
    /// pool size.
    pub fn set_reserve(&mut self, settings: [u8; PART_COUNT]) {
        let mut remaining = self.partials.len();
        for (slot, &wanted) in self.reserve.iter_mut().zip(settings.iter()) {
            let granted = (wanted as usize).min(remaining);
            *slot = granted as u8;
            remaining -= granted;
        }
    }

    pub fn reserve(&self) -> &[u8; PART_COUNT] {
        &self.reserve
    }

    pub fn free_partial_count(&self) -> usize {
        self.free_partials.len()
    }

    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }

    /// Active partials owned by one part.
    pub fn part_partial_count(&self, part: usize) -> usize {
        self.partials
            .iter()
            .filter(|p| p.owner_part() == Some(part))
            .count()
    }

    pub fn poly(&self, index: usize) -> &Poly {
        &self.polys[index]
    }

    pub fn part_polys(&self, part: usize) -> &[usize] {
        &self.part_polys[part]
    }

    /// A stolen poly is still draining.
    pub fn is_aborting(&self) -> bool {
        self.aborting_poly.is_some()
    }

    /// First poly on the part playing `key`, walking from the list head.
    pub fn find_poly_on_key(&self, part: usize, key: u8) -> Option<usize> {
        self.part_polys[part]
            .iter()
            .copied()
            .find(|&i| self.polys[i].key() == key && self.polys[i].state() != PolyState::Inactive)
    }

    /// Abort a poly: fastest decay on all its partials. The poly stays in
    /// the part list until the partials drain.
    pub fn abort_poly(&mut self, tables: &Tables, poly_idx: usize) {
        self.polys[poly_idx].start_abort();
        for slot in 0..PARTIALS_PER_TIMBRE {
            if let Some(partial_idx) = self.polys[poly_idx].partials()[slot] {
                self.partials[partial_idx].start_abort(tables);
            }
        }
        self.aborting_poly = Some(poly_idx);
    }

    fn first_poly_in_state(&self, part: usize, state: PolyState) -> Option<usize> {
        self.part_polys[part]
            .iter()
            .copied()
            .find(|&i| self.polys[i].state() == state)
    }

    /// Held polys are preferred victims, then anything still sounding.
    fn first_abortable_poly(&self, part: usize) -> Option<usize> {
        self.first_poly_in_state(part, PolyState::Held)
            .or_else(|| self.first_poly_in_state(part, PolyState::Playing))
    }

    fn exceeds_reserve(&self, part: usize) -> bool {
        self.part_partial_count(part) > self.reserve[part] as usize
    }

    /// Pick one steal victim per the documented pass order. Returns true
    /// when an abort was started.
    fn steal_for(&mut self, tables: &Tables, target: usize, need: usize, priority_to_earliest: bool) -> bool {
        // Pass 1: releasing polys on over-reserve parts, lowest priority up.
        for &part in PRIORITY_LOWEST_FIRST.iter() {
            if self.exceeds_reserve(part) {
                if let Some(poly) = self.first_poly_in_state(part, PolyState::Releasing) {
                    self.abort_poly(tables, poly);
                    return true;
                }
            }
        }

        let target_over_after =
            self.part_partial_count(target) + need > self.reserve[target] as usize;
        if target_over_after && !priority_to_earliest {
            // Pass 2: over-reserve parts up to and including the target.
            for &part in PRIORITY_LOWEST_FIRST.iter() {
                if self.exceeds_reserve(part) {
                    if let Some(poly) = self.first_abortable_poly(part) {
                        self.abort_poly(tables, poly);
                        return true;
                    }
                }
                if part == target {
                    break;
                }
            }
        } else {
            // Pass 3: any over-reserve part, lowest priority first.
            for &part in PRIORITY_LOWEST_FIRST.iter() {
                if self.exceeds_reserve(part) {
                    if let Some(poly) = self.first_abortable_poly(part) {
                        self.abort_poly(tables, poly);
                        return true;
                    }
                }
            }
        }

        // Pass 4: the target part's own polys.
        if let Some(poly) = self.first_abortable_poly(target) {
            self.abort_poly(tables, poly);
            return true;
        }
        false
    }

    /// Try to start a note on `part`. `caches` are the part's four patch
    /// cache slots; playable slots each consume one partial.
    pub fn start_note(
        &mut self,
        part: usize,
        assign_mode: u8,
        caches: &[PatchCache; PARTIALS_PER_TIMBRE],
        ctx: &NoteOnContext<'_>,
        key: u8,
        velocity: u8,
    ) -> NoteOnResult {
        if self.is_aborting() {
            return NoteOnResult::Aborting;
        }

        // Single assign: a key already sounding is stopped first, even when
        // the new timbre is fully muted.
        if assign_mode & 2 == 0 {
            if let Some(existing) = self.find_poly_on_key(part, key) {
                self.abort_poly(ctx.tables, existing);
                return NoteOnResult::Aborting;
            }
        }

        let need = caches.iter().filter(|c| c.playable).count();
        if need == 0 {
            return NoteOnResult::NoPartials;
        }

        if self.free_partials.len() < need {
            let priority_to_earliest = assign_mode & 1 != 0;
            if self.steal_for(ctx.tables, part, need, priority_to_earliest) {
                return NoteOnResult::Aborting;
            }
            return NoteOnResult::NoPartials;
        }

        let Some(poly_idx) = self.free_polys.pop() else {
            return NoteOnResult::NoPartials;
        };
        self.polys[poly_idx].activate(part, key, velocity);

        // Masters (and unpaired slots) first, then ring slaves into their
        // master's pair.
        let mut slot_partial: [Option<usize>; PARTIALS_PER_TIMBRE] = [None; PARTIALS_PER_TIMBRE];
        for slot in 0..PARTIALS_PER_TIMBRE {
            if !caches[slot].playable {
                continue;
            }
            let partial_idx = self.free_partials.pop().expect("free count checked above");
            slot_partial[slot] = Some(partial_idx);
            self.polys[poly_idx].set_partial(slot, partial_idx);
        }
        for pass in 0..2 {
            for slot in 0..PARTIALS_PER_TIMBRE {
                let Some(partial_idx) = slot_partial[slot] else {
                    continue;
                };
                let cache = &caches[slot];
                let ring_slave = matches!(cache.structure_mix, 1 | 2) && cache.structure_position == 1;
                if (pass == 0) == ring_slave {
                    continue;
                }
                let master_idx = slot_partial
                    .get(cache.structure_peer)
                    .copied()
                    .flatten()
                    .filter(|_| ring_slave);
                match master_idx {
                    Some(master_idx) => {
                        let (partial, master) =
                            two_mut(&mut self.partials, partial_idx, master_idx);
                        partial.start(ctx, cache, part, poly_idx, Some(master.pair_mut()));
                    }
                    None => {
                        self.partials[partial_idx].start(ctx, cache, part, poly_idx, None);
                    }
                }
            }
        }

        // Wire the sibling back-references for both halves of each pair.
        for slot in 0..PARTIALS_PER_TIMBRE {
            let Some(partial_idx) = slot_partial[slot] else {
                continue;
            };
            let peer = slot_partial
                .get(caches[slot].structure_peer)
                .copied()
                .flatten();
            self.partials[partial_idx].set_pair_peer(peer);
        }

        match assign_mode & 1 {
            1 => self.part_polys[part].insert(0, poly_idx),
            _ => self.part_polys[part].push(poly_idx),
        }
        NoteOnResult::Started(poly_idx)
    }

    /// Key-up for every sounding poly on `key`.
    pub fn note_off(&mut self, tables: &Tables, part: usize, key: u8, hold_pedal: bool) {
        for i in 0..self.part_polys[part].len() {
            let poly_idx = self.part_polys[part][i];
            let poly = &mut self.polys[poly_idx];
            if poly.key() != key
                || !matches!(poly.state(), PolyState::Playing | PolyState::Held)
            {
                continue;
            }
            if poly.note_off(hold_pedal) == PolyState::Releasing {
                self.decay_poly_partials(tables, poly_idx);
            }
        }
    }

    /// Pedal-up: release every held poly on the part.
    pub fn release_held_polys(&mut self, tables: &Tables, part: usize) {
        for i in 0..self.part_polys[part].len() {
            let poly_idx = self.part_polys[part][i];
            if self.polys[poly_idx].release_held() {
                self.decay_poly_partials(tables, poly_idx);
            }
        }
    }

    /// All-notes-off for one part (held polys stay when the pedal is down).
    pub fn all_notes_off(&mut self, tables: &Tables, part: usize, hold_pedal: bool) {
        for i in 0..self.part_polys[part].len() {
            let poly_idx = self.part_polys[part][i];
            let poly = &mut self.polys[poly_idx];
            if matches!(poly.state(), PolyState::Playing | PolyState::Held)
                && poly.note_off(hold_pedal) == PolyState::Releasing
            {
                self.decay_poly_partials(tables, poly_idx);
            }
        }
    }

    fn decay_poly_partials(&mut self, tables: &Tables, poly_idx: usize) {
        for slot in 0..PARTIALS_PER_TIMBRE {
            if let Some(partial_idx) = self.polys[poly_idx].partials()[slot] {
                self.partials[partial_idx].start_decay_all(tables);
            }
        }
    }

    /// Apply a closure to every active partial of a part (controller
    /// updates).
    pub fn update_part_partials(&mut self, part: usize, mut f: impl FnMut(&mut Partial<P>)) {
        for partial in self.partials.iter_mut() {
            if partial.owner_part() == Some(part) {
                f(partial);
            }
        }
    }

    fn on_partial_freed(&mut self, partial_idx: usize, poly_idx: Option<usize>) {
        debug_assert!(!self.partials[partial_idx].is_active());
        self.free_partials.push(partial_idx);
        let Some(poly_idx) = poly_idx else {
            return;
        };
        if self.polys[poly_idx].partial_deactivated(partial_idx) {
            // The poly just went inactive: recycle it.
            for list in self.part_polys.iter_mut() {
                list.retain(|&i| i != poly_idx);
            }
            self.free_polys.push(poly_idx);
            if self.aborting_poly == Some(poly_idx) {
                self.aborting_poly = None;
            }
        }
    }

    /// Render every active partial in pool index order into the stream set,
    /// filling `streams[offset..offset + len]`.
    pub fn produce_output(
        &mut self,
        src: &WaveSource<'_>,
        rng: &mut Rng,
        streams: &mut DacStreams<P::Sample>,
        offset: usize,
        len: usize,
    ) {
        for i in 0..self.partials.len() {
            self.partials[i].clear_output_flag();
        }

        for i in 0..self.partials.len() {
            if !self.partials[i].is_active()
                || self.partials[i].is_ring_slave()
                || self.partials[i].already_output()
            {
                continue;
            }

            let poly_idx = self.partials[i].poly();
            let reverb = self.partials[i].cache().reverb;
            let slave_idx = self.partials[i].pair_peer().filter(|&peer| {
                self.partials[peer].is_active() && self.partials[peer].is_ring_slave()
            });
            let slave_poly = slave_idx.map(|s| self.partials[s].poly());

            let range = offset..offset + len;
            let (left, right) = if reverb {
                (
                    &mut streams.reverb_dry_left[range.clone()],
                    &mut streams.reverb_dry_right[range],
                )
            } else {
                (
                    &mut streams.non_reverb_left[range.clone()],
                    &mut streams.non_reverb_right[range],
                )
            };

            match slave_idx {
                Some(s) => {
                    let (master, slave) = two_mut(&mut self.partials, i, s);
                    master.produce_output(Some(slave), src, rng, left, right);
                }
                None => {
                    self.partials[i].produce_output(None, src, rng, left, right);
                }
            }

            if !self.partials[i].is_active() {
                self.on_partial_freed(i, poly_idx);
            }
            if let Some(s) = slave_idx {
                if !self.partials[s].is_active() {
                    self.on_partial_freed(s, slave_poly.flatten());
                }
            }
        }
    }

    /// Kill everything immediately (reset SysEx / close).
    pub fn deactivate_all(&mut self) {
        for i in 0..self.partials.len() {
            if self.partials[i].is_active() {
                let poly_idx = self.partials[i].poly();
                self.partials[i].deactivate();
                self.on_partial_freed(i, poly_idx);
            }
        }
        self.aborting_poly = None;
    }
}

/// Disjoint mutable borrows of two pool slots.
fn two_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::la32::IntPartialPair;
    use crate::params::PartialParam;
    use crate::rom::Machine;

    type Manager = PartialManager<IntPartialPair>;

    fn tables() -> Tables {
        Tables::new()
    }

    fn cache(playable: bool) -> PatchCache {
        let mut param = PartialParam::default();
        param.wg.pitch_coarse = 36;
        param.wg.pitch_fine = 50;
        param.wg.pitch_keyfollow = 11;
        param.tva.level = 100;
        param.tva.env_level = [100, 100, 100, 100];
        param.tva.env_time = [0, 50, 50, 50, 10];
        PatchCache {
            playable,
            param,
            structure_peer: 1,
            reverb: false,
            ..PatchCache::default()
        }
    }

    fn caches(count: usize) -> [PatchCache; 4] {
        core::array::from_fn(|i| cache(i < count))
    }

    fn ctx(tables: &Tables) -> NoteOnContext<'_> {
        NoteOnContext {
            tables,
            quirks: Machine::Cm32L.quirks(),
            key: 60,
            velocity: 100,
            pan_setting: 7,
            expression: 100,
            part_volume: 100,
            master_vol: 100,
            rhythm_level: None,
            master_tune_delta: 0,
            bend_offset: 0,
            modulation: 0,
            nice_amp_ramp: true,
            nice_panning: true,
            nice_partial_mixing: true,
            reversed_stereo: false,
            rhythm: false,
        }
    }

    fn drain(manager: &mut Manager, tables: &Tables) {
        // Render enough to let aborts and releases finish.
        let mut streams = DacStreams::new();
        let mut rng = Rng::from_seed(0);
        let src = WaveSource {
            tables,
            pcm: &[],
        };
        for _ in 0..64 {
            streams.clear(64);
            manager.produce_output(&src, &mut rng, &mut streams, 0, 64);
            if !manager.is_aborting() {
                break;
            }
        }
    }

    fn start_or_retry(
        manager: &mut Manager,
        tables: &Tables,
        part: usize,
        key: u8,
        count: usize,
    ) -> NoteOnResult {
        let c = caches(count);
        for _ in 0..16 {
            let result = manager.start_note(part, 0, &c, &ctx(tables), key, 100);
            if result != NoteOnResult::Aborting {
                return result;
            }
            drain(manager, tables);
        }
        panic!("allocation kept aborting");
    }

    #[test]
    fn test_basic_allocation_and_counts() {
        let t = tables();
        let mut manager = Manager::new(8);
        manager.set_reserve([1, 1, 1, 1, 1, 1, 1, 1, 0]);

        let result = start_or_retry(&mut manager, &t, 0, 60, 4);
        assert!(matches!(result, NoteOnResult::Started(_)));
        assert_eq!(manager.free_partial_count(), 4);
        assert_eq!(manager.part_partial_count(0), 4);

        // The free/active split always covers the pool.
        let active: usize = (0..PART_COUNT).map(|p| manager.part_partial_count(p)).sum();
        assert_eq!(active + manager.free_partial_count(), manager.partial_count());
    }

    #[test]
    fn test_exhaustion_does_not_sound_immediately() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([4, 0, 0, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(
            start_or_retry(&mut manager, &t, 0, 60, 4),
            NoteOnResult::Started(_)
        ));
        // The pool is exhausted: this call must return without sounding.
        let result = manager.start_note(0, 2, &caches(4), &ctx(&t), 62, 100);
        assert!(matches!(
            result,
            NoteOnResult::Aborting | NoteOnResult::NoPartials
        ));
        // The last pass steals the target part's own poly, so after the
        // abort drains the new note does sound.
        assert!(matches!(
            start_or_retry(&mut manager, &t, 0, 62, 4),
            NoteOnResult::Started(_)
        ));
        assert!(manager.find_poly_on_key(0, 60).is_none());
        assert!(manager.find_poly_on_key(0, 62).is_some());
    }

    #[test]
    fn test_steals_own_part_when_over_reserve() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([2, 2, 0, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(
            start_or_retry(&mut manager, &t, 0, 60, 4),
            NoteOnResult::Started(_)
        ));
        // Part 0 sits over its reservation of 2, so the new note steals it.
        let result = start_or_retry(&mut manager, &t, 0, 62, 2);
        assert!(matches!(result, NoteOnResult::Started(_)));
        assert_eq!(manager.find_poly_on_key(0, 62).is_some(), true);
        assert!(manager.find_poly_on_key(0, 60).is_none());
    }

    #[test]
    fn test_releasing_polys_stolen_first() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([0, 0, 0, 0, 0, 0, 0, 0, 0]);

        // Two notes on part 3; release the first.
        assert!(matches!(
            start_or_retry(&mut manager, &t, 3, 60, 2),
            NoteOnResult::Started(_)
        ));
        assert!(matches!(
            start_or_retry(&mut manager, &t, 3, 62, 2),
            NoteOnResult::Started(_)
        ));
        manager.note_off(&t, 3, 60, false);

        // Part 5 wants partials: the releasing poly goes first.
        let result = start_or_retry(&mut manager, &t, 5, 70, 2);
        assert!(matches!(result, NoteOnResult::Started(_)));
        assert!(manager.find_poly_on_key(3, 60).is_none());
        assert!(manager.find_poly_on_key(3, 62).is_some());
    }

    #[test]
    fn test_lowest_priority_part_loses() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([0; 9]);

        // Part 7 (lowest priority) and part 2 hold two partials each.
        assert!(matches!(
            start_or_retry(&mut manager, &t, 7, 60, 2),
            NoteOnResult::Started(_)
        ));
        assert!(matches!(
            start_or_retry(&mut manager, &t, 2, 64, 2),
            NoteOnResult::Started(_)
        ));

        // Part 0 needs the pool: part 7 is robbed, part 2 survives.
        assert!(matches!(
            start_or_retry(&mut manager, &t, 0, 72, 2),
            NoteOnResult::Started(_)
        ));
        assert!(manager.find_poly_on_key(7, 60).is_none());
        assert!(manager.find_poly_on_key(2, 64).is_some());
    }

    #[test]
    fn test_single_assign_aborts_same_key() {
        let t = tables();
        let mut manager = Manager::new(8);
        manager.set_reserve([8, 0, 0, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(
            start_or_retry(&mut manager, &t, 0, 60, 1),
            NoteOnResult::Started(_)
        ));
        let first_poly = manager.find_poly_on_key(0, 60).unwrap();

        // Same key again: the old poly must drain before the new one starts.
        let result = manager.start_note(0, 0, &caches(1), &ctx(&t), 60, 100);
        assert_eq!(result, NoteOnResult::Aborting);
        assert!(manager.is_aborting());
        drain(&mut manager, &t);

        let result = manager.start_note(0, 0, &caches(1), &ctx(&t), 60, 100);
        assert!(matches!(result, NoteOnResult::Started(_)));
        assert_ne!(manager.find_poly_on_key(0, 60), Some(first_poly));
    }

    #[test]
    fn test_multi_assign_allows_same_key_twice() {
        let t = tables();
        let mut manager = Manager::new(8);
        manager.set_reserve([8, 0, 0, 0, 0, 0, 0, 0, 0]);

        let c = caches(1);
        assert!(matches!(
            manager.start_note(0, 2, &c, &ctx(&t), 60, 100),
            NoteOnResult::Started(_)
        ));
        assert!(matches!(
            manager.start_note(0, 2, &c, &ctx(&t), 60, 100),
            NoteOnResult::Started(_)
        ));
        assert_eq!(manager.part_partial_count(0), 2);
    }

    #[test]
    fn test_note_off_releases_and_frees() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([4, 0, 0, 0, 0, 0, 0, 0, 0]);

        start_or_retry(&mut manager, &t, 0, 60, 2);
        manager.note_off(&t, 0, 60, false);
        assert!(manager.find_poly_on_key(0, 60).is_some());

        // Rendering drains the release (fast release time in the cache).
        let mut streams = DacStreams::new();
        let mut rng = Rng::from_seed(0);
        let src = WaveSource {
            tables: &t,
            pcm: &[],
        };
        for _ in 0..4000 {
            streams.clear(64);
            manager.produce_output(&src, &mut rng, &mut streams, 0, 64);
            if manager.free_partial_count() == 4 {
                break;
            }
        }
        assert_eq!(manager.free_partial_count(), 4);
        assert!(manager.find_poly_on_key(0, 60).is_none());
    }

    #[test]
    fn test_hold_pedal_keeps_poly_then_releases() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([4, 0, 0, 0, 0, 0, 0, 0, 0]);

        start_or_retry(&mut manager, &t, 0, 60, 1);
        manager.note_off(&t, 0, 60, true);
        let poly = manager.find_poly_on_key(0, 60).unwrap();
        assert_eq!(manager.poly(poly).state(), PolyState::Held);

        manager.release_held_polys(&t, 0);
        assert_eq!(manager.poly(poly).state(), PolyState::Releasing);
    }

    #[test]
    fn test_reserve_sum_capped_at_pool() {
        let mut manager = Manager::new(8);
        manager.set_reserve([6, 6, 6, 0, 0, 0, 0, 0, 0]);
        assert_eq!(manager.reserve()[0], 6);
        assert_eq!(manager.reserve()[1], 2);
        assert_eq!(manager.reserve()[2], 0);
    }

    #[test]
    fn test_render_mixes_audio() {
        let t = tables();
        let mut manager = Manager::new(4);
        manager.set_reserve([4, 0, 0, 0, 0, 0, 0, 0, 0]);
        start_or_retry(&mut manager, &t, 0, 60, 1);

        let mut streams = DacStreams::new();
        streams.clear(256);
        let mut rng = Rng::from_seed(0);
        let src = WaveSource {
            tables: &t,
            pcm: &[],
        };
        manager.produce_output(&src, &mut rng, &mut streams, 0, 256);
        assert!(streams.non_reverb_left[..256].iter().any(|&v| v != 0));
    }

    #[test]
    fn test_deactivate_all() {
        let t = tables();
        let mut manager = Manager::new(8);
        manager.set_reserve([8, 0, 0, 0, 0, 0, 0, 0, 0]);
        start_or_retry(&mut manager, &t, 0, 60, 4);
        start_or_retry(&mut manager, &t, 0, 64, 4);

        manager.deactivate_all();
        assert_eq!(manager.free_partial_count(), 8);
        assert!(manager.part_polys(0).is_empty());
        assert!(!manager.is_aborting());
    }
}
