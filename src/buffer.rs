//! Code buffer: a region of memory that is written as data and later
//! executed as code.
//!
//! The state machine is encoded in the type system rather than a runtime
//! flag: [`Buffer`] is writable and offers [`Buffer::at_put`]; calling
//! [`Buffer::make_executable`] consumes it and returns an [`ExecutableCode`]
//! which offers no write path at all. Out-of-bounds writes are a
//! precondition violation rather than a recoverable error (every write
//! site knows its own length up front), so those are caught by `assert!`
//! in [`BufferWriter::emit_u8`]/[`BufferWriter::emit_bytes`] instead of
//! threading a `Result` through every single-byte emit. `memmap2` handles
//! the writable→executable transition via `MmapMut::make_exec`, which is
//! the only part of this that can fail at the OS level.

use memmap2::{Mmap, MmapMut};
use thiserror::Error;

/// Errors raised by the code buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to map executable memory: {0}")]
    Map(#[from] std::io::Error),
}

/// A writable code buffer of fixed size.
pub struct Buffer {
    map: MmapMut,
}

impl Buffer {
    /// Allocate a fresh anonymous read/write mapping of `len` bytes.
    ///
    /// Mapping failure here means the host refused *any* anonymous
    /// mapping, which no caller can meaningfully recover from, so this
    /// aborts via `.expect(...)` rather than threading the error through
    /// every caller.
    pub fn new(len: usize) -> Self {
        let map = MmapMut::map_anon(len).expect("failed to allocate code buffer");
        Buffer { map }
    }

    /// Capacity in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Random-access byte write. Only valid while the buffer is writable.
    pub fn at_put(&mut self, pos: usize, byte: u8) {
        assert!(pos < self.map.len(), "at_put past end of code buffer");
        self.map[pos] = byte;
    }

    /// Flip write permission off and execute permission on, consuming the
    /// writable buffer. One-way for the lifetime of this mapping.
    pub fn make_executable(self) -> Result<ExecutableCode, BufferError> {
        let exec = self.map.make_exec()?;
        Ok(ExecutableCode { map: exec })
    }
}

/// A buffer that has been finalized and may be executed but not written.
pub struct ExecutableCode {
    map: Mmap,
}

impl ExecutableCode {
    /// Pointer to the start of the mapped code, for casting to a function
    /// pointer with the appropriate ABI.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Raw bytes, for tests that compare against a literal byte sequence.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Invoke the compiled code with the System V AMD64 `fn(u64) -> u64`
    /// calling convention this crate targets: one heap-base argument in
    /// `rdi`, tagged result in `rax`.
    ///
    /// # Safety
    /// The caller must ensure this buffer actually contains a valid,
    /// complete `extern "C" fn(u64) -> u64` starting at offset 0, and that
    /// `heap_base` points to a region at least as large as the program can
    /// allocate pairs into.
    pub unsafe fn call(&self, heap_base: u64) -> u64 {
        let f: extern "C" fn(u64) -> u64 = std::mem::transmute(self.as_ptr());
        f(heap_base)
    }
}

/// A monotonically-advancing cursor into a writable [`Buffer`].
///
/// Backpatching requires random-access writes at positions already crossed;
/// `pos` itself only ever grows (or is temporarily "rewound" conceptually by
/// writing behind it), while the underlying `at_put` stays fully
/// random-access.
pub struct BufferWriter {
    buf: Buffer,
    pos: usize,
}

impl BufferWriter {
    pub fn new(buf: Buffer) -> Self {
        BufferWriter { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Append a single byte at the cursor and advance it.
    pub fn emit_u8(&mut self, byte: u8) {
        assert!(
            self.pos + 1 <= self.buf.len(),
            "code buffer overrun: pos {} cap {}",
            self.pos,
            self.buf.len()
        );
        self.buf.at_put(self.pos, byte);
        self.pos += 1;
    }

    /// Append raw bytes at the cursor and advance it.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        assert!(
            self.pos + bytes.len() <= self.buf.len(),
            "code buffer overrun: pos {} + {} > cap {}",
            self.pos,
            bytes.len(),
            self.buf.len()
        );
        for &b in bytes {
            self.buf.at_put(self.pos, b);
            self.pos += 1;
        }
    }

    /// Append a little-endian `i32`.
    pub fn emit_i32(&mut self, v: i32) {
        self.emit_bytes(&v.to_le_bytes());
    }

    /// Random-access overwrite of 4 bytes ending exactly at `end_of_site`
    /// (i.e. covering `[end_of_site - 4, end_of_site)`) with the signed
    /// little-endian displacement from `end_of_site` to the writer's current
    /// position. Used to turn a placeholder jump/call rel32 into a real
    /// branch once the target is known.
    pub fn backpatch_displacement_imm32(&mut self, end_of_site: usize) {
        assert!(end_of_site >= 4, "backpatch site before start of buffer");
        let disp = (self.pos as i64 - end_of_site as i64) as i32;
        let bytes = disp.to_le_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            self.buf.at_put(end_of_site - 4 + i, b);
        }
    }

    /// Finalize and consume the writer, returning executable code.
    pub fn into_executable(self) -> Result<ExecutableCode, BufferError> {
        self.buf.make_executable()
    }

    /// Borrow the raw bytes written so far (writable-state inspection, used
    /// by `lispjit emit` and by byte-exact tests that want to check the
    /// buffer before finalizing it).
    pub fn written(&self) -> Vec<u8> {
        // `Buffer` doesn't expose a read slice (mmap-mut derefs to `[u8]`
        // but we keep the field private); reconstruct via at_put mirror
        // would be wasteful, so instead we read through MmapMut's Deref.
        self.buf.map[..self.pos].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_finalize() {
        let buf = Buffer::new(4096);
        let mut w = BufferWriter::new(buf);
        // mov eax, 42 ; ret
        w.emit_u8(0xb8);
        w.emit_i32(42);
        w.emit_u8(0xc3);
        assert_eq!(w.pos(), 6);
        let code = w.into_executable().unwrap();
        assert_eq!(code.as_slice(), &[0xb8, 42, 0, 0, 0, 0xc3]);
        let result = unsafe { code.call(0) };
        assert_eq!(result, 42);
    }

    #[test]
    fn backpatch_rewrites_displacement() {
        let buf = Buffer::new(4096);
        let mut w = BufferWriter::new(buf);
        // jmp rel32 (placeholder), then 3 nops, then the jump lands here.
        w.emit_u8(0xe9);
        w.emit_i32(0); // placeholder
        let site = w.pos();
        w.emit_u8(0x90);
        w.emit_u8(0x90);
        w.emit_u8(0x90);
        let target = w.pos();
        w.backpatch_displacement_imm32(site);
        let code = w.into_executable().unwrap();
        let disp = i32::from_le_bytes(code.as_slice()[1..5].try_into().unwrap());
        assert_eq!(disp as usize, target - site);
    }

    #[test]
    fn overrun_panics() {
        let buf = Buffer::new(2);
        let mut w = BufferWriter::new(buf);
        w.emit_u8(1);
        w.emit_u8(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            w.emit_u8(3);
        }));
        assert!(result.is_err());
    }
}
