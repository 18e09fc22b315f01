//! The application memory pool and the captured-blob store behind it.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use dashmap::DashMap;
use rtrace_protocol::observation::ResourceId;

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Longest string `read_cstr` will scan for a terminator.
pub const MAX_CSTR_LEN: usize = 4096;

/// Sparse 64-bit address space, zero-filled on first touch.
#[derive(Default)]
pub struct SparseMemory {
    pages: HashMap<u64, Box<[u8]>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, address: u64, out: &mut [u8]) {
        let mut done = 0usize;
        while done < out.len() {
            let addr = address.wrapping_add(done as u64);
            let page = addr >> PAGE_SHIFT;
            let offset = (addr & (PAGE_SIZE - 1)) as usize;
            let chunk = (PAGE_SIZE as usize - offset).min(out.len() - done);
            match self.pages.get(&page) {
                Some(bytes) => out[done..done + chunk].copy_from_slice(&bytes[offset..offset + chunk]),
                None => out[done..done + chunk].fill(0),
            }
            done += chunk;
        }
    }

    pub fn read_vec(&self, address: u64, size: u64) -> Vec<u8> {
        let mut out = vec![0u8; size as usize];
        self.read(address, &mut out);
        out
    }

    pub fn write(&mut self, address: u64, data: &[u8]) {
        let mut done = 0usize;
        while done < data.len() {
            let addr = address.wrapping_add(done as u64);
            let page = addr >> PAGE_SHIFT;
            let offset = (addr & (PAGE_SIZE - 1)) as usize;
            let chunk = (PAGE_SIZE as usize - offset).min(data.len() - done);
            let bytes = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
            bytes[offset..offset + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
    }

    pub fn read_pod<T: Pod>(&self, address: u64) -> T {
        let mut value = T::zeroed();
        self.read(address, bytemuck::bytes_of_mut(&mut value));
        value
    }

    pub fn read_slice<T: Pod>(&self, address: u64, count: usize) -> Vec<T> {
        let mut values = vec![T::zeroed(); count];
        self.read(address, bytemuck::cast_slice_mut(&mut values));
        values
    }

    pub fn write_pod<T: Pod>(&mut self, address: u64, value: &T) {
        self.write(address, bytemuck::bytes_of(value));
    }

    pub fn write_slice<T: Pod>(&mut self, address: u64, values: &[T]) {
        self.write(address, bytemuck::cast_slice(values));
    }

    pub fn read_u64(&self, address: u64) -> u64 {
        self.read_pod(address)
    }

    /// NUL-terminated string at `address`, lossily decoded.
    pub fn read_cstr(&self, address: u64) -> String {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64];
        while bytes.len() < MAX_CSTR_LEN {
            self.read(address.wrapping_add(bytes.len() as u64), &mut chunk);
            match chunk.iter().position(|&b| b == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&chunk[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&chunk),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of pages touched so far.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
}

/// Content-addressed blobs referenced by observations.
#[derive(Default)]
pub struct ResourceStore {
    blobs: DashMap<ResourceId, Arc<[u8]>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data`, returning its id. Storing identical bytes twice is free.
    pub fn store(&self, data: &[u8]) -> ResourceId {
        let id = ResourceId::of(data);
        self.blobs.entry(id).or_insert_with(|| Arc::from(data));
        id
    }

    /// Insert a blob whose id was computed elsewhere (e.g. read from a capture).
    pub fn insert(&self, id: ResourceId, data: Vec<u8>) {
        self.blobs.insert(id, Arc::from(data));
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<[u8]>> {
        self.blobs.get(id).map(|v| Arc::clone(&v))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.blobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.blobs.iter().map(|e| e.value().len() as u64).sum()
    }
}
