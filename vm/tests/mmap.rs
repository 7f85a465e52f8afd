mod common;

use common::{file, pattern, read_page, va, vm};
use swapvm_kernel::{
    KernelError,
    addressing::PAGE_SIZE,
    fs::{File, RegularFile, traits},
};

/// A file of zeroes whose writes, and optionally reads, stop halfway.
struct ShortIo {
    size: usize,
    short_reads: bool,
}

impl traits::RegularFile for ShortIo {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let len = buf.len().min(self.size.saturating_sub(position));
        let len = if self.short_reads { len / 2 } else { len };
        buf[..len].fill(0);
        Ok(len)
    }

    fn write(&self, _position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        Ok(buf.len() / 2)
    }
}

fn short_io(short_reads: bool) -> File {
    File::open(&RegularFile::new(ShortIo {
        size: PAGE_SIZE,
        short_reads,
    }))
}

#[test]
fn mapping_spans_the_file_in_whole_pages() {
    let contents = pattern(10000);
    let (backing, file) = file(&contents);
    let mut vm = vm(4, 4);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    assert_eq!(vm.mmap(pid, addr, 10000, true, &file, 0), Ok(addr));
    assert_eq!(vm.mm(pid).unwrap().spt.len(), 3);

    let layout = [
        (0, PAGE_SIZE, 0, true, 2),
        (PAGE_SIZE, PAGE_SIZE, 0, false, 1),
        (2 * PAGE_SIZE, 1808, 2288, false, 0),
    ];
    for (i, (offset, read_bytes, zero_bytes, first, remaining)) in layout.into_iter().enumerate() {
        let page = vm.find_page(pid, addr + i * PAGE_SIZE).unwrap();
        assert!(page.is_uninit());
        let payload = page.file_page().unwrap();
        assert_eq!(payload.offset(), offset);
        assert_eq!(payload.read_bytes(), read_bytes);
        assert_eq!(payload.zero_bytes(), zero_bytes);
        assert_eq!(payload.is_first_page(), first);
        assert_eq!(payload.pages_remaining(), remaining);
        assert_eq!(payload.group().start(), addr);
        assert_eq!(payload.group().page_count(), 3);
    }

    let last = read_page(&mut vm, pid, addr + 2 * PAGE_SIZE);
    assert_eq!(last[..1808], contents[2 * PAGE_SIZE..]);
    assert!(last[1808..].iter().all(|b| *b == 0));
    assert_eq!(backing.write_count(), 0);
}

#[test]
fn munmap_from_any_page_tears_down_the_group() {
    let contents = pattern(10000);
    let (backing, file) = file(&contents);
    let mut vm = vm(4, 4);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, 10000, true, &file, 0).unwrap();
    assert_eq!(file.inode().open_handles(), 2);

    vm.write_user(pid, addr + 10, b"first").unwrap();
    read_page(&mut vm, pid, addr + PAGE_SIZE);
    vm.write_user(pid, addr + 2 * PAGE_SIZE + 100, b"third").unwrap();

    vm.munmap(pid, addr + PAGE_SIZE + 123).unwrap();
    assert!(vm.mm(pid).unwrap().spt.is_empty());
    assert!(vm.mm(pid).unwrap().page_table.is_empty());
    assert_eq!(vm.resident_pages(), 0);
    assert_eq!(vm.free_frames(), 4);

    let mut expected = contents.clone();
    expected[10..15].copy_from_slice(b"first");
    expected[2 * PAGE_SIZE + 100..2 * PAGE_SIZE + 105].copy_from_slice(b"third");
    assert_eq!(backing.contents(), expected);
    // Only the two dirty pages were written.
    assert_eq!(backing.write_count(), 2);
    assert_eq!(file.inode().open_handles(), 1);
}

#[test]
fn eviction_writes_dirty_pages_back() {
    let (backing, file) = file(&[0; PAGE_SIZE]);
    let mut vm = vm(1, 4);
    let pid = vm.create_mm();
    let (addr, other) = (va(0x1000_0000), va(0x2000_0000));
    vm.mmap(pid, addr, PAGE_SIZE, true, &file, 0).unwrap();
    vm.alloc_page(pid, other, true).unwrap();

    vm.write_user(pid, addr + 8, b"YYYY").unwrap();
    vm.write_user(pid, other, &[1]).unwrap();
    assert!(!vm.find_page(pid, addr).unwrap().is_resident());
    assert_eq!(&backing.contents()[8..12], b"YYYY");
    assert_eq!(backing.write_count(), 1);
    // File pages never go to swap.
    assert_eq!(vm.used_swap_slots(), 0);

    assert_eq!(&read_page(&mut vm, pid, addr)[8..12], b"YYYY");
    // Evicting the clean page again does no I/O.
    vm.write_user(pid, other, &[2]).unwrap();
    assert!(!vm.find_page(pid, addr).unwrap().is_resident());
    assert_eq!(backing.write_count(), 1);
}

#[test]
fn clean_pages_are_not_written_back() {
    let (backing, file) = file(&pattern(3 * PAGE_SIZE));
    let mut vm = vm(4, 4);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, 3 * PAGE_SIZE, true, &file, 0).unwrap();
    read_page(&mut vm, pid, addr);
    read_page(&mut vm, pid, addr + PAGE_SIZE);
    vm.munmap(pid, addr).unwrap();
    assert_eq!(backing.write_count(), 0);
    assert_eq!(backing.contents(), pattern(3 * PAGE_SIZE));
}

#[test]
fn munmap_closes_the_group_file_once() {
    let (_, file) = file(&pattern(10000));
    let mut vm = vm(2, 4);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    for length in [1, 4095, 4096, 4097, 10000, 50000] {
        vm.mmap(pid, addr, length, true, &file, 0).unwrap();
        let pages = length.min(10000).div_ceil(PAGE_SIZE);
        assert_eq!(vm.mm(pid).unwrap().spt.len(), pages);
        assert_eq!(file.inode().open_handles(), 2);
        read_page(&mut vm, pid, addr);

        vm.munmap(pid, addr).unwrap();
        assert!(vm.mm(pid).unwrap().spt.is_empty());
        assert_eq!(file.inode().open_handles(), 1);
    }
}

#[test]
fn mapping_outlives_the_callers_handle() {
    let contents = pattern(PAGE_SIZE);
    let (_, file) = file(&contents);
    let inode = file.inode().clone();
    let mut vm = vm(1, 1);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, PAGE_SIZE, false, &file, 0).unwrap();
    file.close();
    assert_eq!(inode.open_handles(), 1);
    assert_eq!(read_page(&mut vm, pid, addr), contents);
    vm.exit_mm(pid);
    assert_eq!(inode.open_handles(), 0);
}

#[test]
fn mapping_with_offset() {
    let contents = pattern(10000);
    let (_, file) = file(&contents);
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, 10000, false, &file, PAGE_SIZE).unwrap();
    assert_eq!(vm.mm(pid).unwrap().spt.len(), 2);
    let second = vm.find_page(pid, addr + PAGE_SIZE).unwrap();
    assert_eq!(second.file_page().unwrap().offset(), 2 * PAGE_SIZE);
    assert_eq!(second.file_page().unwrap().read_bytes(), 1808);
    assert_eq!(read_page(&mut vm, pid, addr), contents[PAGE_SIZE..2 * PAGE_SIZE]);
    assert_eq!(
        vm.write_user(pid, addr, b"no"),
        Err(KernelError::InvalidAccess)
    );
}

#[test]
fn overlapping_mapping_leaves_nothing_behind() {
    let (_, file) = file(&pattern(3 * PAGE_SIZE));
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.alloc_page(pid, addr + 2 * PAGE_SIZE, true).unwrap();
    assert_eq!(
        vm.mmap(pid, addr, 3 * PAGE_SIZE, true, &file, 0),
        Err(KernelError::FileExist)
    );
    assert_eq!(vm.mm(pid).unwrap().spt.len(), 1);
    assert!(vm.find_page(pid, addr).is_none());
    assert_eq!(file.inode().open_handles(), 1);
}

#[test]
fn munmap_requires_a_file_mapping() {
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    vm.alloc_page(pid, va(0x1000_0000), true).unwrap();
    assert_eq!(
        vm.munmap(pid, va(0x1000_0000)),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        vm.munmap(pid, va(0x2000_0000)),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(vm.mm(pid).unwrap().spt.len(), 1);
}

#[test]
fn exit_writes_mappings_back() {
    let (backing, file) = file(&[0; 100]);
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, 100, true, &file, 0).unwrap();
    vm.write_user(pid, addr + 99, &[9]).unwrap();
    vm.exit_mm(pid);
    assert_eq!(backing.contents()[99], 9);
    assert_eq!(backing.contents().len(), 100);
    assert_eq!(file.inode().open_handles(), 1);
}

#[test]
fn fork_maps_the_file_again() {
    let contents = pattern(2 * PAGE_SIZE);
    let (_, file) = file(&contents);
    let mut vm = vm(4, 4);
    let parent = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(parent, addr, 2 * PAGE_SIZE, true, &file, 0).unwrap();
    vm.claim_page(parent, addr).unwrap();

    let child = vm.fork_mm(parent).unwrap();
    assert_eq!(file.inode().open_handles(), 3);
    let page = vm.find_page(child, addr).unwrap();
    assert!(page.is_uninit());
    assert_eq!(page.mmap_group().unwrap().page_count(), 2);
    assert_eq!(read_page(&mut vm, child, addr + PAGE_SIZE), contents[PAGE_SIZE..]);

    vm.munmap(child, addr + PAGE_SIZE).unwrap();
    assert_eq!(file.inode().open_handles(), 2);
    assert_eq!(vm.mm(parent).unwrap().spt.len(), 2);
    vm.exit_mm(parent);
    assert_eq!(file.inode().open_handles(), 1);
}

#[test]
fn mmap_syscall_validates_arguments() {
    let (_, empty) = file(&[]);
    let (_, file) = file(&pattern(100));
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let invalid = KernelError::InvalidArgument.into_usize();

    assert_eq!(vm.sys_mmap(pid, 0, 100, true, Some(&file), 0), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x1000_0010, 100, true, Some(&file), 0), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x80_0400_0000, 100, true, Some(&file), 0), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x80_0400_0000 - PAGE_SIZE, 2 * PAGE_SIZE, true, Some(&file), 0), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x1000_0000, 0, true, Some(&file), 0), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x1000_0000, 100, true, Some(&file), 0x10), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x1000_0000, 100, true, Some(&file), PAGE_SIZE), invalid);
    assert_eq!(vm.sys_mmap(pid, 0x1000_0000, 100, true, Some(&empty), 0), invalid);
    assert_eq!(
        vm.sys_mmap(pid, 0x1000_0000, 100, true, None, 0),
        KernelError::BadFileDescriptor.into_usize()
    );
    assert!(vm.mm(pid).unwrap().spt.is_empty());

    assert_eq!(vm.sys_mmap(pid, 0x1000_0000, 100, true, Some(&file), 0), 0x1000_0000);
    assert_eq!(
        vm.sys_mmap(pid, 0x1000_0000, 100, true, Some(&file), 0),
        KernelError::FileExist.into_usize()
    );
    assert_eq!(vm.sys_munmap(pid, 0x1000_0000), 0);
    assert_eq!(vm.sys_munmap(pid, 0x1000_0000), invalid);
    assert_eq!(vm.sys_munmap(pid, 0), invalid);
}

#[test]
#[should_panic(expected = "truncated")]
fn short_read_of_a_mapped_page_is_fatal() {
    let file = short_io(true);
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, PAGE_SIZE, false, &file, 0).unwrap();
    read_page(&mut vm, pid, addr);
}

#[test]
#[should_panic(expected = "short write back")]
fn short_write_back_is_fatal() {
    let file = short_io(false);
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, PAGE_SIZE, true, &file, 0).unwrap();
    vm.write_user(pid, addr, b"lost").unwrap();
    let _ = vm.munmap(pid, addr);
}

#[test]
fn unmapped_frames_are_scrubbed() {
    let (_, file) = file(&pattern(PAGE_SIZE));
    let mut vm = vm(2, 2);
    let pid = vm.create_mm();
    let addr = va(0x1000_0000);
    vm.mmap(pid, addr, PAGE_SIZE, true, &file, 0).unwrap();
    vm.write_user(pid, addr, b"secret").unwrap();
    let pa = vm
        .find_page(pid, addr)
        .and_then(|page| page.frame())
        .map(|frame| frame.pa())
        .unwrap();

    vm.munmap(pid, addr).unwrap();
    assert!(vm.frames().memory().frame(pa).iter().all(|b| *b == 0));
    assert_eq!(vm.free_frames(), 2);
}
