#![allow(dead_code)]

use swapvm::{Pid, Vm, VmConfig};
use swapvm_kernel::{
    addressing::{PAGE_SIZE, Pa, Va},
    dev::MemoryDisk,
    fs::{File, MemoryFile, RegularFile},
    mm::PhysicalMemory,
};

pub fn va(addr: usize) -> Va {
    Va::new(addr).unwrap()
}

/// A subsystem with `frames` frames and room for `swap_pages` pages in swap.
pub fn vm(frames: usize, swap_pages: usize) -> Vm {
    Vm::new(
        PhysicalMemory::new(frames),
        MemoryDisk::new(swap_pages * PAGE_SIZE / 512),
        VmConfig::default(),
    )
}

/// An open file holding `contents`, with a handle to inspect it.
pub fn file(contents: &[u8]) -> (MemoryFile, File) {
    let backing = MemoryFile::new(contents);
    let file = File::open(&RegularFile::new(backing.clone()));
    (backing, file)
}

/// `len` bytes of a pattern that differs from page to page.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Frames of every resident page of `pid`.
pub fn resident_frames(vm: &Vm, pid: Pid) -> Vec<Pa> {
    vm.mm(pid)
        .unwrap()
        .spt
        .iter()
        .filter_map(|page| page.frame().map(|frame| frame.pa()))
        .collect()
}

pub fn read_page(vm: &mut Vm, pid: Pid, addr: Va) -> Vec<u8> {
    let mut buf = vec![0; PAGE_SIZE];
    vm.read_user(pid, addr, &mut buf).unwrap();
    buf
}
