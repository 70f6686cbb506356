//! Bucket bookkeeping over live files.
//!
//! Three bucket families index the live set at once: directory depth,
//! size class, and age class. Depth and size buckets are flat counters
//! with (for sizes) a per-class ring of files. Age buckets additionally
//! nest a size → depth map whose leaves carry a ring of the files in
//! that exact (age, size, depth) group; deletion victims are drawn from
//! those group rings. Every family keeps a signed gap between its ideal
//! and actual fraction, exposed as a [`GapKey`] for the ordered views
//! the engine walks.

use crate::arena::{FileArena, FileRef};
use crate::rng::DeterministicRng;
use agefs_types::GapKey;
use std::collections::HashMap;

/// `count / live`, safe when the live set is empty.
#[inline]
pub(crate) fn fraction(count: u64, live: u64) -> f64 {
    if live == 0 {
        0.0
    } else {
        count as f64 / live as f64
    }
}

// ── Group rings (files of one age/size/depth group) ─────────────────────────

fn group_ring_push_back(arena: &mut FileArena, head: &mut Option<FileRef>, file: FileRef) {
    match *head {
        None => {
            let record = arena.get_mut(file);
            record.group_next = Some(file);
            record.group_prev = Some(file);
            *head = Some(file);
        }
        Some(h) => {
            let tail = arena.get(h).group_prev.expect("ring is circular");
            {
                let record = arena.get_mut(file);
                record.group_next = Some(h);
                record.group_prev = Some(tail);
            }
            arena.get_mut(tail).group_next = Some(file);
            arena.get_mut(h).group_prev = Some(file);
        }
    }
}

fn group_ring_remove(
    arena: &mut FileArena,
    head: &mut Option<FileRef>,
    remaining: u64,
    file: FileRef,
) {
    if remaining == 0 {
        *head = None;
    } else if *head == Some(file) {
        *head = arena.get(file).group_next;
    }
    let (prev, next) = {
        let record = arena.get(file);
        (
            record.group_prev.expect("file is on a ring"),
            record.group_next.expect("file is on a ring"),
        )
    };
    arena.get_mut(prev).group_next = Some(next);
    arena.get_mut(next).group_prev = Some(prev);
    let record = arena.get_mut(file);
    record.group_prev = None;
    record.group_next = None;
}

// ── Size-class rings (all live files of one size) ───────────────────────────

fn size_ring_push_back(arena: &mut FileArena, head: &mut Option<FileRef>, file: FileRef) {
    match *head {
        None => {
            let record = arena.get_mut(file);
            record.size_next = Some(file);
            record.size_prev = Some(file);
            *head = Some(file);
        }
        Some(h) => {
            let tail = arena.get(h).size_prev.expect("ring is circular");
            {
                let record = arena.get_mut(file);
                record.size_next = Some(h);
                record.size_prev = Some(tail);
            }
            arena.get_mut(tail).size_next = Some(file);
            arena.get_mut(h).size_prev = Some(file);
        }
    }
}

fn size_ring_remove(
    arena: &mut FileArena,
    head: &mut Option<FileRef>,
    remaining: u64,
    file: FileRef,
) {
    if remaining == 0 {
        *head = None;
    } else if *head == Some(file) {
        *head = arena.get(file).size_next;
    }
    let (prev, next) = {
        let record = arena.get(file);
        (
            record.size_prev.expect("file is on a ring"),
            record.size_next.expect("file is on a ring"),
        )
    };
    arena.get_mut(prev).size_next = Some(next);
    arena.get_mut(next).size_prev = Some(prev);
    let record = arena.get_mut(file);
    record.size_prev = None;
    record.size_next = None;
}

// ── Directory-depth buckets ─────────────────────────────────────────────────

/// Live-file counter for one directory depth, plus the path prefix files
/// at this depth are created under.
#[derive(Debug)]
pub(crate) struct DirBucket {
    pub depth: u32,
    pub fanout: u32,
    pub count: u64,
    pub ideal: f64,
    pub actual: f64,
    /// Mount-relative directory prefix, empty at the root.
    pub prefix: String,
    pub key: GapKey,
}

impl DirBucket {
    pub(crate) fn new(depth: u32, fanout: u32, ideal: f64, prefix: String) -> Self {
        let mut bucket = Self {
            depth,
            fanout,
            count: 0,
            ideal,
            actual: 0.0,
            prefix,
            key: GapKey::new(0.0, 0),
        };
        bucket.key = bucket.gap_key();
        bucket
    }

    pub(crate) fn gap_key(&self) -> GapKey {
        GapKey::new(self.actual - self.ideal, u64::from(self.depth))
    }

    pub(crate) fn re_key(&mut self, live: u64) {
        self.actual = fraction(self.count, live);
        self.key = self.gap_key();
    }
}

// ── Size-class buckets ──────────────────────────────────────────────────────

/// Per-size-class bookkeeping over the whole live set.
#[derive(Debug)]
pub(crate) struct SizeBucket {
    pub bytes: u64,
    pub count: u64,
    pub ideal: f64,
    pub actual: f64,
    /// Oldest live file of this size; head of the size ring.
    pub oldest: Option<FileRef>,
    /// Live files of this size per directory depth.
    pub depth_counts: HashMap<u32, u64>,
    pub key: GapKey,
}

impl SizeBucket {
    pub(crate) fn new(bytes: u64, ideal: f64) -> Self {
        let mut bucket = Self {
            bytes,
            count: 0,
            ideal,
            actual: 0.0,
            oldest: None,
            depth_counts: HashMap::new(),
            key: GapKey::new(0.0, 0),
        };
        bucket.key = bucket.gap_key();
        bucket
    }

    pub(crate) fn gap_key(&self) -> GapKey {
        GapKey::new(self.ideal - self.actual, self.bytes)
    }

    pub(crate) fn re_key(&mut self, live: u64) {
        self.actual = fraction(self.count, live);
        self.key = self.gap_key();
    }

    pub(crate) fn add_file(&mut self, arena: &mut FileArena, file: FileRef, live: u64) {
        let depth = arena.get(file).depth;
        self.count += 1;
        *self.depth_counts.entry(depth).or_insert(0) += 1;
        self.actual = fraction(self.count, live);
        size_ring_push_back(arena, &mut self.oldest, file);
    }

    pub(crate) fn delete_file(&mut self, arena: &mut FileArena, file: FileRef, live: u64) {
        let depth = arena.get(file).depth;
        assert!(self.count > 0, "delete from empty size bucket");
        self.count -= 1;
        self.actual = fraction(self.count, live);
        let per_depth = self
            .depth_counts
            .get_mut(&depth)
            .expect("depth count for live file");
        assert!(*per_depth > 0);
        *per_depth -= 1;
        size_ring_remove(arena, &mut self.oldest, self.count, file);
    }
}

// ── Age buckets ─────────────────────────────────────────────────────────────

/// Leaf of the age bucket nest: files of one (age, size, depth) group.
#[derive(Debug, Default)]
pub(crate) struct GroupSlot {
    pub count: u64,
    /// Head of the group ring; the oldest arrival.
    pub head: Option<FileRef>,
}

/// Per-size slice of one age bucket.
#[derive(Debug, Default)]
pub(crate) struct AgeSizeSlot {
    pub count: u64,
    pub depths: HashMap<u32, GroupSlot>,
}

/// Bookkeeping for one age class.
///
/// `oldest` and `youngest` delimit this bucket's window of the global
/// insertion-order list; re-aging moves files across the boundary one at
/// a time, so the window stays contiguous.
#[derive(Debug)]
pub(crate) struct AgeBucket {
    pub id: usize,
    pub count: u64,
    pub ideal: f64,
    pub actual: f64,
    /// Birth-tick threshold: files born before it have aged out of this
    /// bucket.
    pub cutoff: u64,
    /// Share of the clock beyond this bucket's young edge; multiplied by
    /// the current clock to refresh `cutoff`.
    pub ratio: f64,
    pub oldest: Option<FileRef>,
    pub youngest: Option<FileRef>,
    pub sizes: HashMap<u64, AgeSizeSlot>,
    pub key: GapKey,
}

impl AgeBucket {
    pub(crate) fn new(id: usize, ideal: f64, ratio: f64) -> Self {
        let mut bucket = Self {
            id,
            count: 0,
            ideal,
            actual: 0.0,
            cutoff: 0,
            ratio,
            oldest: None,
            youngest: None,
            sizes: HashMap::new(),
            key: GapKey::new(0.0, 0),
        };
        bucket.key = bucket.gap_key();
        bucket
    }

    pub(crate) fn gap_key(&self) -> GapKey {
        GapKey::new(self.actual - self.ideal, self.id as u64)
    }

    /// Add `file` to this bucket. `at_front` places it at the old end of
    /// the window (unused by normal creates, which extend the young end).
    pub(crate) fn add_file(
        &mut self,
        arena: &mut FileArena,
        file: FileRef,
        live: u64,
        at_front: bool,
    ) {
        let (size, depth) = {
            let record = arena.get(file);
            (record.size, record.depth)
        };
        self.count += 1;
        let slot = self.sizes.entry(size).or_default();
        slot.count += 1;
        let group = slot.depths.entry(depth).or_default();
        group.count += 1;
        group_ring_push_back(arena, &mut group.head, file);
        self.actual = fraction(self.count, live);

        if self.oldest.is_none() {
            assert!(self.youngest.is_none());
            self.oldest = Some(file);
            self.youngest = Some(file);
        }
        if at_front {
            self.oldest = Some(file);
        } else {
            self.youngest = Some(file);
        }
    }

    /// Remove `file` from this bucket. The file must still be linked into
    /// the global list: the window boundaries follow its list neighbors.
    pub(crate) fn delete_file(&mut self, arena: &mut FileArena, file: FileRef, live: u64) {
        assert!(self.count > 0, "delete from empty age bucket");
        self.count -= 1;
        self.actual = fraction(self.count, live);

        let (size, depth) = {
            let record = arena.get(file);
            (record.size, record.depth)
        };
        let slot = self.sizes.get_mut(&size).expect("size slot for live file");
        assert!(slot.count > 0);
        slot.count -= 1;
        let group = slot
            .depths
            .get_mut(&depth)
            .expect("group slot for live file");
        assert!(group.count > 0);
        group.count -= 1;
        group_ring_remove(arena, &mut group.head, group.count, file);

        if self.count == 0 {
            self.oldest = None;
            self.youngest = None;
        } else {
            if self.oldest == Some(file) {
                self.oldest = arena.get(file).list_next;
            }
            if self.youngest == Some(file) {
                self.youngest = arena.get(file).list_prev;
            }
        }
    }

    /// Draw a victim from the (size, depth) group ring, or `None` when
    /// the group is empty.
    ///
    /// The draw seeds a fresh generator from the group's current count,
    /// so it is deterministic per state rather than independent across
    /// calls; that quirk is observable and kept.
    pub(crate) fn file_to_delete(
        &self,
        arena: &FileArena,
        size: u64,
        depth: u32,
    ) -> Option<FileRef> {
        let group = self.sizes.get(&size)?.depths.get(&depth)?;
        if group.count == 0 {
            return None;
        }
        let mut rng = DeterministicRng::new(group.count);
        let steps = rng.next_usize(usize::try_from(group.count).unwrap_or(usize::MAX));
        let mut file = group.head.expect("non-empty group has a head");
        for _ in 0..steps {
            file = arena.get(file).group_next.expect("ring is circular");
        }
        Some(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::FileRecord;
    use agefs_types::Tick;

    fn new_file(arena: &mut FileArena, birth: u64, size: u64, depth: u32) -> FileRef {
        arena.insert(FileRecord::new(format!("{birth}"), size, Tick(birth), depth))
    }

    #[test]
    fn size_bucket_ring_tracks_oldest() {
        let mut arena = FileArena::new();
        let mut bucket = SizeBucket::new(1024, 0.5);
        let a = new_file(&mut arena, 1, 1024, 0);
        let b = new_file(&mut arena, 2, 1024, 0);
        let c = new_file(&mut arena, 3, 1024, 0);

        bucket.add_file(&mut arena, a, 1);
        bucket.add_file(&mut arena, b, 2);
        bucket.add_file(&mut arena, c, 3);
        assert_eq!(bucket.count, 3);
        assert_eq!(bucket.oldest, Some(a));
        // Ring is circular: a -> b -> c -> a.
        assert_eq!(arena.get(a).size_next, Some(b));
        assert_eq!(arena.get(c).size_next, Some(a));

        // Deleting the head advances it.
        bucket.delete_file(&mut arena, a, 2);
        assert_eq!(bucket.oldest, Some(b));
        assert_eq!(arena.get(c).size_next, Some(b));

        bucket.delete_file(&mut arena, b, 1);
        bucket.delete_file(&mut arena, c, 0);
        assert_eq!(bucket.oldest, None);
        assert_eq!(bucket.count, 0);
    }

    #[test]
    fn size_bucket_fractions_follow_live_count() {
        let mut arena = FileArena::new();
        let mut bucket = SizeBucket::new(1024, 0.5);
        let a = new_file(&mut arena, 1, 1024, 0);
        bucket.add_file(&mut arena, a, 4);
        assert!((bucket.actual - 0.25).abs() < f64::EPSILON);
        bucket.re_key(2);
        assert!((bucket.actual - 0.5).abs() < f64::EPSILON);
        assert!((bucket.key.diff - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn age_bucket_nests_group_rings() {
        let mut arena = FileArena::new();
        let mut bucket = AgeBucket::new(0, 1.0, 0.5);
        let a = new_file(&mut arena, 1, 1024, 0);
        let b = new_file(&mut arena, 2, 1024, 0);
        let c = new_file(&mut arena, 3, 4096, 1);

        bucket.add_file(&mut arena, a, 1, false);
        bucket.add_file(&mut arena, b, 2, false);
        bucket.add_file(&mut arena, c, 3, false);

        assert_eq!(bucket.count, 3);
        assert_eq!(bucket.sizes[&1024].count, 2);
        assert_eq!(bucket.sizes[&1024].depths[&0].count, 2);
        assert_eq!(bucket.sizes[&4096].depths[&1].count, 1);

        // Victims come from the exact (size, depth) group.
        let victim = bucket.file_to_delete(&arena, 4096, 1).expect("victim");
        assert_eq!(victim, c);
        assert!(bucket.file_to_delete(&arena, 4096, 0).is_none());
        assert!(bucket.file_to_delete(&arena, 512, 0).is_none());
    }

    #[test]
    fn age_bucket_window_follows_list_neighbors() {
        let mut arena = FileArena::new();
        let mut list = crate::list::FileList::new();
        let mut bucket = AgeBucket::new(0, 1.0, 0.5);

        let files: Vec<FileRef> = (1..=3)
            .map(|birth| {
                let f = new_file(&mut arena, birth, 1024, 0);
                list.push_back(&mut arena, f);
                bucket.add_file(&mut arena, f, birth, false);
                f
            })
            .collect();
        assert_eq!(bucket.oldest, Some(files[0]));
        assert_eq!(bucket.youngest, Some(files[2]));

        // Deleting the window front moves it to the list successor.
        bucket.delete_file(&mut arena, files[0], 2);
        assert_eq!(bucket.oldest, Some(files[1]));

        // Deleting the window back moves it to the list predecessor.
        bucket.delete_file(&mut arena, files[2], 1);
        assert_eq!(bucket.youngest, Some(files[1]));

        bucket.delete_file(&mut arena, files[1], 0);
        assert_eq!(bucket.oldest, None);
        assert_eq!(bucket.youngest, None);
    }

    #[test]
    fn victim_draw_is_deterministic_per_state() {
        let mut arena = FileArena::new();
        let mut bucket = AgeBucket::new(0, 1.0, 0.5);
        for birth in 1..=5 {
            let f = new_file(&mut arena, birth, 1024, 0);
            bucket.add_file(&mut arena, f, birth, false);
        }
        let first = bucket.file_to_delete(&arena, 1024, 0);
        let second = bucket.file_to_delete(&arena, 1024, 0);
        assert_eq!(first, second);
    }
}
