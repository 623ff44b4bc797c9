use crate::error::XbrtimeResult;
use crate::fabric::{segment::Segment, Backend, CommCounters, CommInfo, CommRemote};

#[derive(Debug)]
pub(crate) struct LocalComm {
    segment: Segment,
    counters: CommCounters,
}

impl LocalComm {
    pub(crate) fn new(segment_size: usize) -> XbrtimeResult<LocalComm> {
        Ok(LocalComm {
            segment: Segment::new(segment_size)?,
            counters: CommCounters::default(),
        })
    }
}

impl CommInfo for LocalComm {
    fn my_pe(&self) -> usize {
        0
    }
    fn num_pes(&self) -> usize {
        1
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn segment_size(&self) -> usize {
        self.segment.len()
    }
}

impl CommRemote for LocalComm {
    fn segment(&self, pe: usize) -> XbrtimeResult<&Segment> {
        self.check_pe(pe)?;
        Ok(&self.segment)
    }
    fn counters(&self) -> &CommCounters {
        &self.counters
    }
}
