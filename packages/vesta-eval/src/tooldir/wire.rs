//! Opaque directory handles handed to the sandboxed tool.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ToolDirectoryServer.H`,
//! whose handles pack a call id and a per-call sequence number into one
//! machine word so a tool from call N can never present a handle that
//! resolves inside call M's directory table.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirHandle(u64);

const LOCAL_SEQ_BITS: u32 = 20;
const LOCAL_SEQ_MASK: u64 = (1 << LOCAL_SEQ_BITS) - 1;

impl DirHandle {
    pub fn encode(call_id: u32, local_seq: u32) -> Self {
        debug_assert!((local_seq as u64) <= LOCAL_SEQ_MASK, "local_seq overflow");
        DirHandle(((call_id as u64) << LOCAL_SEQ_BITS) | (local_seq as u64 & LOCAL_SEQ_MASK))
    }

    pub fn call_id(self) -> u32 {
        (self.0 >> LOCAL_SEQ_BITS) as u32
    }

    pub fn local_seq(self) -> u32 {
        (self.0 & LOCAL_SEQ_MASK) as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        DirHandle(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_call_id_and_seq() {
        let handle = DirHandle::encode(7, 42);
        assert_eq!(handle.call_id(), 7);
        assert_eq!(handle.local_seq(), 42);
    }

    #[test]
    fn different_calls_never_collide_for_same_seq() {
        let a = DirHandle::encode(1, 0);
        let b = DirHandle::encode(2, 0);
        assert_ne!(a, b);
    }
}
