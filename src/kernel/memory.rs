use std::collections::{HashMap, HashSet, VecDeque};

pub const WORD_SIZE_BYTES: u64 = 4;

/// Identifies one page across the memory manager and the virtual store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

/// A simulated word: the physical address it was fetched from, plus the
/// start of the second frame when the word straddles a page break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word {
    pub address: u64,
    pub spill: Option<u64>,
}

impl Word {
    fn contiguous(address: u64) -> Word {
        Word { address, spill: None }
    }
}

#[derive(Debug)]
struct Page {
    frame_number: Option<usize>,
}

#[derive(Debug)]
struct Frame {
    start_address: u64,
    page: Option<PageId>,
}

/// Demand-paged physical memory: a fixed pool of frames, a used-frame queue
/// ordered by allocation time (the FIFO victim order), and a virtual store
/// holding swapped-out pages. Only addresses and occupancy are modeled; no
/// data moves.
pub struct MemoryManager {
    page_size_bytes: u64,
    frames: Vec<Frame>,
    free_frames: VecDeque<usize>,
    used_frames: VecDeque<usize>,
    pages: HashMap<PageId, Page>,
    virtual_store: HashSet<PageId>,
    next_page_id: u64,
}

impl MemoryManager {
    pub fn new(capacity_mb: u64, page_size_mb: u64) -> MemoryManager {
        let num_frames = (capacity_mb / page_size_mb) as usize;
        let page_size_bytes = page_size_mb * 1024 * 1024;

        let mut frames = Vec::with_capacity(num_frames);
        let mut free_frames = VecDeque::with_capacity(num_frames);
        for i in 0..num_frames {
            frames.push(Frame {
                start_address: i as u64 * page_size_bytes,
                page: None,
            });
            free_frames.push_back(i);
        }

        MemoryManager {
            page_size_bytes,
            frames,
            free_frames,
            used_frames: VecDeque::new(),
            pages: HashMap::new(),
            virtual_store: HashSet::new(),
            next_page_id: 0,
        }
    }

    pub fn page_size_bytes(&self) -> u64 {
        self.page_size_bytes
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_frames.len()
    }

    /// Allocates a page table for `request_size_mb` of address space. Frames
    /// are bound while the free pool lasts; the shortfall becomes pages with
    /// no frame yet. The caller always receives the full table.
    pub fn request_memory(&mut self, request_size_mb: u64) -> Vec<PageId> {
        let page_size_mb = self.page_size_bytes / (1024 * 1024);
        let pages_required = request_size_mb.div_ceil(page_size_mb) as usize;

        let mut page_table = Vec::with_capacity(pages_required);
        for _ in 0..pages_required {
            let id = PageId(self.next_page_id);
            self.next_page_id += 1;

            let frame_number = self.free_frames.pop_front();
            match frame_number {
                Some(frame_number) => {
                    self.frames[frame_number].page = Some(id);
                    self.used_frames.push_back(frame_number);
                }
                None => {
                    self.virtual_store.insert(id);
                }
            }
            self.pages.insert(id, Page { frame_number });
            page_table.push(id);
        }
        page_table
    }

    /// Translates `(page, offset)` to a physical address, faulting the page
    /// in first when it is not resident.
    pub fn read(&mut self, page: PageId, offset: u64) -> Word {
        let frame_number = self.ensure_resident(page);
        let start_address = self.frames[frame_number].start_address;
        Word::contiguous(start_address + offset)
    }

    /// Reads a word whose bytes straddle two consecutive pages. Both pages
    /// are faulted in independently; the result concatenates the tail of the
    /// first frame with the head of the second.
    pub fn read_across_page_break(&mut self, page1: PageId, offset: u64, page2: PageId) -> Word {
        let frame1 = self.ensure_resident(page1);
        let address1 = self.frames[frame1].start_address + offset;
        let frame2 = self.ensure_resident(page2);
        let address2 = self.frames[frame2].start_address;
        Word {
            address: address1,
            spill: Some(address2),
        }
    }

    /// Releases a page table at process exit: resident pages hand their
    /// frames back to the free pool, swapped-out pages leave the store.
    pub fn release_memory(&mut self, page_table: &[PageId]) {
        for &id in page_table {
            let page = match self.pages.remove(&id) {
                Some(page) => page,
                None => panic!("releasing unknown page {:?}", id),
            };
            match page.frame_number {
                Some(frame_number) => {
                    self.frames[frame_number].page = None;
                    self.used_frames.retain(|&f| f != frame_number);
                    self.free_frames.push_back(frame_number);
                }
                None => {
                    self.virtual_store.remove(&id);
                }
            }
        }
    }

    fn ensure_resident(&mut self, page: PageId) -> usize {
        match self.pages.get(&page) {
            Some(entry) => {
                if let Some(frame_number) = entry.frame_number {
                    return frame_number;
                }
            }
            None => panic!("read from unknown page {:?}", page),
        }

        // Page fault: make room if the free pool is empty.
        if self.free_frames.is_empty() {
            self.swap_out_victim();
        }

        let frame_number = self
            .free_frames
            .pop_front()
            .unwrap_or_else(|| panic!("no frame available after eviction"));
        self.frames[frame_number].page = Some(page);
        self.used_frames.push_back(frame_number);
        self.virtual_store.remove(&page);
        if let Some(entry) = self.pages.get_mut(&page) {
            entry.frame_number = Some(frame_number);
        }
        frame_number
    }

    // FIFO replacement: the victim is the oldest allocation, regardless of
    // how recently it was touched.
    fn swap_out_victim(&mut self) {
        let frame_number = self
            .used_frames
            .pop_front()
            .unwrap_or_else(|| panic!("no used frame to evict"));
        let victim = self.frames[frame_number]
            .page
            .take()
            .unwrap_or_else(|| panic!("used frame {} owns no page", frame_number));
        if let Some(entry) = self.pages.get_mut(&victim) {
            entry.frame_number = None;
        }
        self.virtual_store.insert(victim);
        self.free_frames.push_back(frame_number);
    }

    #[cfg(test)]
    fn frame_of(&self, page: PageId) -> Option<usize> {
        self.pages.get(&page).and_then(|p| p.frame_number)
    }

    #[cfg(test)]
    fn is_resident(&self, page: PageId) -> bool {
        self.frame_of(page).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    // 8 MB of memory and 2 MB pages gives 4 frames.
    fn small_memory() -> MemoryManager {
        MemoryManager::new(8, 2)
    }

    #[test]
    fn test_request_memory_rounds_up() {
        let mut memory = small_memory();
        let pages = memory.request_memory(3);
        assert_eq!(pages.len(), 2);
        assert_eq!(memory.free_frame_count(), 2);
    }

    #[test]
    fn test_shortfall_pages_are_not_resident() {
        let mut memory = small_memory();
        let pages = memory.request_memory(12); // 6 pages, only 4 frames
        assert_eq!(pages.len(), 6);
        assert_eq!(memory.free_frame_count(), 0);
        assert!(memory.is_resident(pages[3]));
        assert!(!memory.is_resident(pages[4]));
        assert!(!memory.is_resident(pages[5]));
    }

    #[test]
    fn test_read_returns_frame_relative_address() {
        let mut memory = small_memory();
        let pages = memory.request_memory(2);
        let frame = memory.frame_of(pages[0]).unwrap();
        let word = memory.read(pages[0], 16);
        assert_eq!(word.address, frame as u64 * memory.page_size_bytes() + 16);
        assert_eq!(word.spill, None);
    }

    #[test]
    fn test_fifo_eviction_picks_oldest_allocation() {
        let mut memory = small_memory();
        let pages = memory.request_memory(10); // 5 pages, 4 frames

        // Touch the resident pages in order, then re-touch the first; FIFO
        // must still evict pages[0] (oldest allocation), not pages[1].
        for &page in &pages[..4] {
            memory.read(page, 0);
        }
        memory.read(pages[0], 0);

        memory.read(pages[4], 0); // faults, forcing an eviction
        assert!(!memory.is_resident(pages[0]));
        assert!(memory.is_resident(pages[1]));
        assert!(memory.is_resident(pages[4]));
    }

    #[test]
    fn test_page_residency_round_trip() {
        let mut memory = small_memory();
        let pages = memory.request_memory(10); // 5 pages, 4 frames
        assert!(memory.is_resident(pages[0]));

        memory.read(pages[4], 0); // evicts pages[0]
        assert!(!memory.is_resident(pages[0]));

        memory.read(pages[0], 0); // faults pages[0] back in
        assert!(memory.is_resident(pages[0]));

        // No frame may be owned by two pages at once.
        let mut owners = HashSet::new();
        for &page in &pages {
            if let Some(frame) = memory.frame_of(page) {
                assert!(owners.insert(frame), "frame {} bound twice", frame);
            }
        }
    }

    #[test]
    fn test_read_across_page_break_faults_both_pages() {
        let mut memory = small_memory();
        let pages = memory.request_memory(12); // pages 4 and 5 start swapped out
        let offset = memory.page_size_bytes() - 2;
        let word = memory.read_across_page_break(pages[4], offset, pages[5]);

        let frame1 = memory.frame_of(pages[4]).unwrap();
        let frame2 = memory.frame_of(pages[5]).unwrap();
        assert_eq!(word.address, frame1 as u64 * memory.page_size_bytes() + offset);
        assert_eq!(word.spill, Some(frame2 as u64 * memory.page_size_bytes()));
    }

    #[test]
    fn test_release_memory_returns_frames() {
        let mut memory = small_memory();
        let pages = memory.request_memory(10);
        memory.release_memory(&pages);
        assert_eq!(memory.free_frame_count(), 4);
    }

    #[test]
    #[should_panic(expected = "unknown page")]
    fn test_read_from_released_page_panics() {
        let mut memory = small_memory();
        let pages = memory.request_memory(2);
        memory.release_memory(&pages);
        memory.read(pages[0], 0);
    }
}
