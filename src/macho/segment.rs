//! The Mach-O segment/section graph (spec C3): a `Segment` owns an ordered
//! list of `Section`s and a relocation set, with `add_section` reconciling
//! file-offset/size/virtual-address bookkeeping on every insert.
//!
//! No corpus file implements this mutation API directly (the pack's Mach-O
//! readers are decode-only); the struct shape is carried over from
//! `decode.rs`'s `SegmentCommandRecord`/`SectionRecord`, generalized with the
//! owning-graph operations spec.md §4.3 requires.

use super::decode::{Protection, SectionAttributes, SegmentCommandRecord, SegmentFlags};
use super::relocation::Relocation;
use super::CommandKind;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity token a Section uses to refer back to its owning
/// Segment -- a non-owning, non-pointer back-reference (spec §9: "store
/// either a stable index... or a weak handle, never a strong cyclic
/// owner").
fn next_segment_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A section inside a Mach-O segment. Exists only inside exactly one
/// Segment's `sections` list.
#[derive(Debug, Clone)]
pub struct Section {
    pub sectname: String,
    /// Cached copy of the owning segment's name, refreshed by
    /// `add_section`/`Clone`.
    pub segname: String,
    pub virtual_address: u64,
    pub size: u64,
    /// Absolute file offset (not relative to the segment).
    pub offset: u64,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub sectype: u8,
    pub attributes: SectionAttributes,
    pub reserved1: u32,
    pub reserved2: u32,
    /// The section's payload bytes. Kept as its own copy (rather than a
    /// borrow into the segment's `data`) so a `Section` can be compared,
    /// cloned, or inspected independent of its segment.
    pub content: Vec<u8>,
    /// Non-owning back-reference to the owning segment (spec §9).
    segment_id: u64,
}

impl Section {
    /// Builds a section ready for `Segment::add_section`: offset, size,
    /// segname, and the segment back-reference are all filled in by the
    /// insertion, not here.
    pub fn new(name: impl Into<String>, content: Vec<u8>, virtual_address: u64) -> Self {
        Section {
            sectname: name.into(),
            segname: String::new(),
            virtual_address,
            size: 0,
            offset: 0,
            align: 0,
            reloff: 0,
            nreloc: 0,
            sectype: 0,
            attributes: SectionAttributes::empty(),
            reserved1: 0,
            reserved2: 0,
            content,
            segment_id: 0,
        }
    }

    /// The stable identity of the segment this section was last bound to,
    /// or `None` if it has never been inserted into one.
    pub fn segment_id(&self) -> Option<u64> {
        if self.segment_id == 0 {
            None
        } else {
            Some(self.segment_id)
        }
    }
}

impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        self.sectname == other.sectname
            && self.segname == other.segname
            && self.virtual_address == other.virtual_address
            && self.size == other.size
            && self.offset == other.offset
            && self.align == other.align
            && self.reloff == other.reloff
            && self.nreloc == other.nreloc
            && self.sectype == other.sectype
            && self.attributes == other.attributes
            && self.reserved1 == other.reserved1
            && self.reserved2 == other.reserved2
            && self.content == other.content
            && self.segment_id == other.segment_id
    }
}
impl Eq for Section {}

impl Hash for Section {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sectname.hash(state);
        self.segname.hash(state);
        self.virtual_address.hash(state);
        self.size.hash(state);
        self.offset.hash(state);
        self.align.hash(state);
        self.reloff.hash(state);
        self.nreloc.hash(state);
        self.sectype.hash(state);
        self.attributes.hash(state);
        self.reserved1.hash(state);
        self.reserved2.hash(state);
        self.content.hash(state);
        self.segment_id.hash(state);
    }
}

/// A Mach-O segment load command, generalized into an editable graph of
/// sections plus a relocation set.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    pub command: CommandKind,
    pub cmdsize: u32,
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub max_protection: Protection,
    pub init_protection: Protection,
    pub flags: SegmentFlags,
    pub nb_sections_declared: u32,
    pub data: Vec<u8>,
    pub sections: Vec<Section>,
    pub relocations: Vec<Relocation>,
}

impl Segment {
    /// Constructs an empty, user-defined segment (no on-disk record).
    pub fn new(name: impl Into<String>) -> Self {
        Segment {
            id: next_segment_id(),
            command: CommandKind::Segment64,
            cmdsize: 0,
            name: name.into(),
            virtual_address: 0,
            virtual_size: 0,
            file_offset: 0,
            file_size: 0,
            max_protection: Protection::empty(),
            init_protection: Protection::empty(),
            flags: SegmentFlags::empty(),
            nb_sections_declared: 0,
            data: Vec::new(),
            sections: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Builds a Segment from a decoded `segment_command_32`/`_64` record.
    /// Section list starts empty; `data` starts empty -- both are filled in
    /// afterward by the surrounding binary parser (spec lifecycle).
    pub fn from_record(record: SegmentCommandRecord) -> Self {
        Segment {
            id: next_segment_id(),
            command: if record.is_64 {
                CommandKind::Segment64
            } else {
                CommandKind::Segment
            },
            cmdsize: record.cmdsize,
            name: record.name,
            virtual_address: record.virtual_address,
            virtual_size: record.virtual_size,
            file_offset: record.file_offset,
            file_size: record.file_size,
            max_protection: record.max_protection,
            init_protection: record.init_protection,
            flags: record.flags,
            nb_sections_declared: record.nb_sections_declared,
            data: Vec::new(),
            sections: Vec::new(),
            relocations: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Inserts a copy of `s`, reconciling offset/size/virtual-address
    /// bookkeeping so the invariant of spec §3 holds at return. Total: this
    /// never fails, it always succeeds by resizing `data`.
    pub fn add_section(&mut self, s: Section) -> &mut Section {
        let mut new = s;

        // 1. bind back-reference + cached segment name.
        new.segment_id = self.id;
        new.segname = self.name.clone();

        // 2. size comes from the content being inserted.
        new.size = new.content.len() as u64;

        // 3. append at the end of the current payload window (pre-step-7
        //    file_size, per the note in spec §4.3).
        new.offset = self.file_offset + self.file_size;

        // 4. virtual address defaults to segment-relative placement unless
        //    the caller already assigned one.
        if new.virtual_address == 0 {
            new.virtual_address = self.virtual_address + new.offset;
        }

        // 5/6. grow data and copy the payload in at the relative position.
        let relative = (new.offset - self.file_offset) as usize;
        let needed = relative + new.size as usize;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.data[relative..relative + new.size as usize].copy_from_slice(&new.content);

        // 7. file_size tracks the actual buffer length, overriding step 3's
        //    pre-increment offset basis for the *next* insertion.
        self.file_size = self.data.len() as u64;

        // 8. append and return.
        self.sections.push(new);
        self.sections.last_mut().expect("just pushed")
    }

    /// Clears the section list and resets the on-disk declared count; does
    /// not touch `data`.
    pub fn remove_all_sections(&mut self) {
        self.nb_sections_declared = 0;
        self.sections.clear();
    }

    /// True iff some section in this segment equals `section`.
    pub fn has(&self, section: &Section) -> bool {
        self.sections.iter().any(|s| s == section)
    }

    /// True iff this segment contains a section with the given name.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.sectname == name)
    }

    fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.virtual_address.hash(&mut hasher);
        self.virtual_size.hash(&mut hasher);
        self.file_offset.hash(&mut hasher);
        self.file_size.hash(&mut hasher);
        self.max_protection.hash(&mut hasher);
        self.init_protection.hash(&mut hasher);
        self.flags.hash(&mut hasher);
        self.nb_sections_declared.hash(&mut hasher);
        self.data.hash(&mut hasher);
        self.sections.hash(&mut hasher);
        self.relocations.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Segment {
    /// Two segments are equal iff their structural hash -- derived from all
    /// semantic fields including section list content -- matches.
    /// Reflexive by construction (`self.structural_hash() ==
    /// self.structural_hash()`).
    fn eq(&self, other: &Self) -> bool {
        self.structural_hash() == other.structural_hash()
    }
}
impl Eq for Segment {}

impl Clone for Segment {
    /// A deep copy: every owned Section is duplicated with its back-reference
    /// pointed at the new Segment and its cached segment-name refreshed;
    /// relocations are cloned alongside (spec §9's open question, resolved).
    fn clone(&self) -> Self {
        let new_id = next_segment_id();
        let mut cloned = Segment {
            id: new_id,
            command: self.command,
            cmdsize: self.cmdsize,
            name: self.name.clone(),
            virtual_address: self.virtual_address,
            virtual_size: self.virtual_size,
            file_offset: self.file_offset,
            file_size: self.file_size,
            max_protection: self.max_protection,
            init_protection: self.init_protection,
            flags: self.flags,
            nb_sections_declared: self.nb_sections_declared,
            data: self.data.clone(),
            sections: Vec::with_capacity(self.sections.len()),
            relocations: self.relocations.clone(),
        };
        for s in &self.sections {
            let mut copy = s.clone();
            copy.segment_id = new_id;
            copy.segname = cloned.name.clone();
            cloned.sections.push(copy);
        }
        cloned
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "{:<16} vmaddr={:#x} vmsize={:#x} fileoff={:#x} filesize={:#x} maxprot={:#x} initprot={:#x} flags={:#x} nsects={:#x}",
            self.name,
            self.virtual_address,
            self.virtual_size,
            self.file_offset,
            self.file_size,
            self.max_protection.bits(),
            self.init_protection.bits(),
            self.flags.bits(),
            self.nb_sections_declared,
        )?;
        for s in &self.sections {
            writeln!(f, "  {:<16} addr={:#x} size={:#x}", s.sectname, s.virtual_address, s.size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_segment() -> Segment {
        let mut seg = Segment::new("__TEXT");
        seg.virtual_address = 0x1000;
        seg
    }

    /// S1: Mach-O happy path.
    #[test]
    fn add_section_happy_path() {
        let mut seg = base_segment();
        let sec = Section::new("__text", vec![0xAAu8; 16], 0);
        let inserted = seg.add_section(sec);
        assert_eq!(inserted.offset, 0);
        assert_eq!(inserted.virtual_address, 0x1000);
        assert_eq!(seg.file_size, 16);
        assert_eq!(seg.data[0..16], [0xAAu8; 16]);
        assert_eq!(seg.sections.len(), 1);
    }

    /// S2: two inserts in sequence.
    #[test]
    fn add_section_twice_appends_after_first() {
        let mut seg = base_segment();
        seg.add_section(Section::new("__text", vec![0xAAu8; 16], 0));
        let sec2 = seg.add_section(Section::new("__cstring", vec![0xBBu8; 8], 0));
        assert_eq!(sec2.offset, 16);
        assert_eq!(sec2.virtual_address, 0x1010);
        assert_eq!(seg.file_size, 24);
    }

    /// S3: clone equality and independence.
    #[test]
    fn clone_equals_and_is_independent() {
        let mut seg = base_segment();
        seg.add_section(Section::new("__text", vec![0xAAu8; 4], 0));
        let mut clone = seg.clone();
        assert_eq!(clone, seg);
        clone.name = "__DATA".to_string();
        assert_ne!(clone, seg);
        assert_eq!(seg.name, "__TEXT");
    }

    #[test]
    fn clone_refreshes_section_back_reference() {
        let mut seg = base_segment();
        seg.add_section(Section::new("__text", vec![1, 2, 3], 0));
        let clone = seg.clone();
        assert_ne!(seg.id(), clone.id());
        assert_eq!(clone.sections[0].segment_id(), Some(clone.id()));
        assert_eq!(clone.sections[0].segname, "__TEXT");
    }

    #[test]
    fn clone_replicates_relocations() {
        let mut seg = base_segment();
        seg.relocations.push(Relocation {
            address: 4,
            symbolnum: 1,
            pcrel: false,
            length: 2,
            is_extern: true,
            rtype: 0,
        });
        let clone = seg.clone();
        assert_eq!(clone.relocations, seg.relocations);
    }

    /// Invariant 1/2 hold after a sequence of inserts.
    #[test]
    fn invariant_holds_after_inserts() {
        let mut seg = base_segment();
        seg.add_section(Section::new("a", vec![1; 10], 0));
        seg.add_section(Section::new("b", vec![2; 6], 0));
        for s in &seg.sections {
            assert!(seg.file_offset <= s.offset);
            assert!(s.offset + s.size <= seg.file_offset + seg.file_size);
            let rel = (s.offset - seg.file_offset) as usize;
            assert_eq!(&seg.data[rel..rel + s.size as usize], &s.content[..]);
        }
        assert_eq!(seg.file_size, seg.data.len() as u64);
    }

    #[test]
    fn has_and_has_section_after_insert() {
        let mut seg = base_segment();
        let inserted = seg.add_section(Section::new("__text", vec![9; 2], 0)).clone();
        assert!(seg.has(&inserted));
        assert!(seg.has_section("__text"));
        assert!(!seg.has_section("__data"));
    }

    /// Invariant 5: remove_all_sections clears sections + declared count,
    /// leaves data untouched.
    #[test]
    fn remove_all_sections_keeps_data() {
        let mut seg = base_segment();
        seg.add_section(Section::new("a", vec![1; 4], 0));
        let data_before = seg.data.clone();
        seg.remove_all_sections();
        assert!(seg.sections.is_empty());
        assert_eq!(seg.nb_sections_declared, 0);
        assert_eq!(seg.data, data_before);
    }

    /// add_section never updates nb_sections_declared (spec §9).
    #[test]
    fn add_section_does_not_touch_declared_count() {
        let mut seg = base_segment();
        seg.nb_sections_declared = 3;
        seg.add_section(Section::new("a", vec![1; 1], 0));
        assert_eq!(seg.nb_sections_declared, 3);
    }

    /// An explicit virtual address is preserved rather than auto-derived.
    #[test]
    fn explicit_virtual_address_is_preserved() {
        let mut seg = base_segment();
        let s = seg.add_section(Section::new("a", vec![1; 4], 0x9999));
        assert_eq!(s.virtual_address, 0x9999);
    }

    #[test]
    fn section_equality_is_symmetric_and_transitive() {
        let a = Section::new("x", vec![1, 2, 3], 0);
        let b = Section::new("x", vec![1, 2, 3], 0);
        let c = Section::new("x", vec![1, 2, 3], 0);
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_eq!(b, c);
        assert_eq!(a, c);
    }
}
