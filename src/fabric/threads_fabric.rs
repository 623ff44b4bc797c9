use crate::error::XbrtimeResult;
use crate::fabric::{segment::Segment, Backend, CommCounters, CommInfo, CommRemote};

use std::sync::Arc;

/// The segments of every PE in the group, shared by all PE threads.
#[derive(Debug)]
pub(crate) struct ThreadFabric {
    segments: Vec<Segment>,
}

impl ThreadFabric {
    pub(crate) fn new(num_pes: usize, segment_size: usize) -> XbrtimeResult<Arc<ThreadFabric>> {
        let segments = (0..num_pes)
            .map(|_| Segment::new(segment_size))
            .collect::<XbrtimeResult<Vec<_>>>()?;
        Ok(Arc::new(ThreadFabric { segments }))
    }

    pub(crate) fn num_pes(&self) -> usize {
        self.segments.len()
    }
}

/// One PE's handle onto a [ThreadFabric]
#[derive(Debug)]
pub(crate) struct ThreadComm {
    my_pe: usize,
    fabric: Arc<ThreadFabric>,
    counters: CommCounters,
}

impl ThreadComm {
    pub(crate) fn new(my_pe: usize, fabric: Arc<ThreadFabric>) -> ThreadComm {
        ThreadComm {
            my_pe,
            fabric,
            counters: CommCounters::default(),
        }
    }
}

impl CommInfo for ThreadComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.fabric.num_pes()
    }
    fn backend(&self) -> Backend {
        Backend::Threads
    }
    fn segment_size(&self) -> usize {
        self.fabric.segments[self.my_pe].len()
    }
}

impl CommRemote for ThreadComm {
    fn segment(&self, pe: usize) -> XbrtimeResult<&Segment> {
        self.check_pe(pe)?;
        Ok(&self.fabric.segments[pe])
    }
    fn counters(&self) -> &CommCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XbrtimeError;
    use crate::fabric::{Comm, SymAddr};

    #[test]
    fn writes_land_in_target_segment() {
        let fabric = ThreadFabric::new(3, 512).unwrap();
        let pe0: Comm = ThreadComm::new(0, fabric.clone()).into();
        let pe2: Comm = ThreadComm::new(2, fabric.clone()).into();
        pe0.remote_write(SymAddr(64), 2, 42u32).unwrap();
        assert_eq!(pe2.remote_read::<u32>(SymAddr(64), 2).unwrap(), 42);
        assert_eq!(pe2.remote_read::<u32>(SymAddr(64), 0).unwrap(), 0);
        assert_eq!(pe0.remote_atomic_swap(SymAddr(64), 2, 7u32).unwrap(), 42);
        assert_eq!(pe0.stats().bytes_put, 4);
    }

    #[test]
    fn out_of_range_pe_is_rejected() {
        let fabric = ThreadFabric::new(2, 512).unwrap();
        let pe0: Comm = ThreadComm::new(0, fabric).into();
        assert_eq!(
            pe0.remote_write(SymAddr(0), 2, 1u8),
            Err(XbrtimeError::InvalidPe { pe: 2, num_pes: 2 })
        );
    }
}
