#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use aero_guest_access::{
    AccessFlags, GuestAccess, GuestAccessConfig, HandlerMode, PhysAccess, PhysStatus,
    Translate, TranslateFault,
};

pub const PAGE: usize = 4096;
const PAGE_MASK: u64 = PAGE as u64 - 1;

/// A physical access as seen by the fake, including ones the script made fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysOp {
    pub gpa: u64,
    pub len: usize,
    pub mode: HandlerMode,
    pub status: PhysStatus,
}

/// In-memory guest: dense RAM at `[0, ram_size)`, open bus above it, identity paging unless
/// overridden, and per-page scripted statuses standing in for access handlers.
pub struct FakeGuest {
    ram: Vec<u8>,
    pages: HashMap<u64, u64>,
    faulting: HashSet<u64>,
    read_script: HashMap<u64, VecDeque<PhysStatus>>,
    write_script: HashMap<u64, VecDeque<PhysStatus>>,
    breakpoints: Vec<(u64, u64, u32)>,
    pub reads: Vec<PhysOp>,
    pub writes: Vec<PhysOp>,
    pub translations: Vec<(u64, usize)>,
    pub released_locks: Vec<u32>,
}

impl FakeGuest {
    pub fn new(ram_size: usize) -> Self {
        Self {
            ram: vec![0; ram_size],
            pages: HashMap::new(),
            faulting: HashSet::new(),
            read_script: HashMap::new(),
            write_script: HashMap::new(),
            breakpoints: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            translations: Vec::new(),
            released_locks: Vec::new(),
        }
    }

    /// Map the guest virtual page containing `gva` onto the physical page containing `gpa`.
    pub fn map_page(&mut self, gva: u64, gpa: u64) {
        self.pages.insert(gva & !PAGE_MASK, gpa & !PAGE_MASK);
    }

    pub fn fault_page(&mut self, gva: u64) {
        self.faulting.insert(gva & !PAGE_MASK);
    }

    pub fn add_breakpoint(&mut self, gva: u64, len: u64, mask: u32) {
        self.breakpoints.push((gva, len, mask));
    }

    /// Queue the status of the next read starting in the page containing `gpa`.
    pub fn script_read(&mut self, gpa: u64, status: PhysStatus) {
        self.read_script
            .entry(gpa & !PAGE_MASK)
            .or_default()
            .push_back(status);
    }

    /// Queue the status of the next write starting in the page containing `gpa`.
    pub fn script_write(&mut self, gpa: u64, status: PhysStatus) {
        self.write_script
            .entry(gpa & !PAGE_MASK)
            .or_default()
            .push_back(status);
    }

    pub fn poke(&mut self, gpa: u64, bytes: &[u8]) {
        let start = gpa as usize;
        self.ram[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek(&self, gpa: u64, len: usize) -> Vec<u8> {
        let start = gpa as usize;
        self.ram[start..start + len].to_vec()
    }

    fn in_ram(&self, gpa: u64, len: usize) -> bool {
        gpa.checked_add(len as u64)
            .is_some_and(|end| end <= self.ram.len() as u64)
    }

    fn next_status(script: &mut HashMap<u64, VecDeque<PhysStatus>>, gpa: u64) -> PhysStatus {
        script
            .get_mut(&(gpa & !PAGE_MASK))
            .and_then(VecDeque::pop_front)
            .unwrap_or(PhysStatus::Ok)
    }
}

impl Translate for FakeGuest {
    fn translate_and_check(
        &mut self,
        gva: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<u64, TranslateFault> {
        self.translations.push((gva, len));
        let page = gva & !PAGE_MASK;
        if self.faulting.contains(&page) {
            // Not-present #PF; only the write bit of the error code is modelled.
            return Err(TranslateFault::PageFault {
                addr: gva,
                error_code: if access.is_write() { 1 << 1 } else { 0 },
            });
        }
        let phys_page = self.pages.get(&page).copied().unwrap_or(page);
        Ok(phys_page | (gva & PAGE_MASK))
    }

    fn check_data_breakpoints(&mut self, gva: u64, len: usize, _access: AccessFlags) -> u32 {
        let end = gva + len as u64;
        self.breakpoints
            .iter()
            .filter(|&&(bp, bp_len, _)| bp < end && gva < bp + bp_len)
            .fold(0, |hits, &(_, _, mask)| hits | mask)
    }
}

impl PhysAccess for FakeGuest {
    type PageLock = u32;

    fn read_phys(&mut self, gpa: u64, dst: &mut [u8], mode: HandlerMode) -> PhysStatus {
        let status = Self::next_status(&mut self.read_script, gpa);
        self.reads.push(PhysOp {
            gpa,
            len: dst.len(),
            mode,
            status,
        });
        if status.is_success() {
            if self.in_ram(gpa, dst.len()) {
                let start = gpa as usize;
                dst.copy_from_slice(&self.ram[start..start + dst.len()]);
            } else {
                dst.fill(0xFF);
            }
        }
        status
    }

    fn write_phys(&mut self, gpa: u64, src: &[u8], mode: HandlerMode) -> PhysStatus {
        let status = Self::next_status(&mut self.write_script, gpa);
        self.writes.push(PhysOp {
            gpa,
            len: src.len(),
            mode,
            status,
        });
        if status.is_success() && self.in_ram(gpa, src.len()) {
            let start = gpa as usize;
            self.ram[start..start + src.len()].copy_from_slice(src);
        }
        status
    }

    fn release_page_lock(&mut self, lock: u32) {
        self.released_locks.push(lock);
    }
}

pub fn new_access() -> GuestAccess<u32> {
    GuestAccess::new(GuestAccessConfig::default()).expect("default config is valid")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
