use crate::config;
use crate::error::XbrtimeResult;
use crate::fabric::{Comm, CommInfo, SymAddr, BARRIER_BANKS, MAX_BARRIER_ROUNDS};
use crate::xbrtime_arch::{ArchEnum, PeArch};

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Value a slot holds when no signal is pending; never a valid stride
pub(crate) const BARRIER_RESET: u64 = u64::MAX;

const STRIDE_MASK: u64 = 0xffff_ffff;

// a signal carries the stride in the low half and the sender's logical pe in the high half
fn encode_signal(stride: usize, sender: usize) -> u64 {
    ((sender as u64) << 32) | stride as u64
}

/// One round of a traced barrier, in logical pe ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierRound {
    /// the peer this pe signalled
    pub signalled: usize,
    /// the peer whose signal this pe consumed
    pub heard_from: usize,
}

/// ceil(log2(num_pes)), 0 for a single PE
pub(crate) fn barrier_rounds(num_pes: usize) -> usize {
    if num_pes <= 1 {
        0
    } else {
        (usize::BITS - (num_pes - 1).leading_zeros()) as usize
    }
}

fn slot_addr(sense: usize, round: usize) -> SymAddr {
    BARRIER_BANKS.elem::<u64>(sense * MAX_BARRIER_ROUNDS + round)
}

/// Dissemination barrier over the `BARRIER[sense][round]` slot banks at the
/// start of every segment.
///
/// Waiting is a local spin (with backoff) on this PE's own slot, which burns
/// CPU until the peer `2^round` behind signals. There is no timeout: a PE that
/// never arrives stalls everyone.
pub(crate) struct Barrier {
    my_pe: usize, // logical pe id
    num_pes: usize,
    rounds: usize,
    arch: ArchEnum,
    comm: Arc<Comm>,
    sense: AtomicUsize,
    barrier_cnt: AtomicUsize,
    spin_limit: usize,
}

impl Barrier {
    pub(crate) fn new(my_pe: usize, arch: ArchEnum, comm: Arc<Comm>) -> Barrier {
        let num_pes = comm.num_pes();
        Barrier {
            my_pe,
            num_pes,
            rounds: barrier_rounds(num_pes),
            arch,
            comm,
            sense: AtomicUsize::new(0),
            barrier_cnt: AtomicUsize::new(0),
            spin_limit: config().barrier_spin,
        }
    }

    /// Put both slot banks of physical `pe` into the reset state.
    /// Must happen for every PE before any of them enters a barrier.
    pub(crate) fn reset_slots(comm: &Comm, pe: usize) -> XbrtimeResult<()> {
        for sense in 0..2 {
            for round in 0..MAX_BARRIER_ROUNDS {
                comm.remote_write(slot_addr(sense, round), pe, BARRIER_RESET)?;
            }
        }
        Ok(())
    }

    pub(crate) fn barrier(&self) -> XbrtimeResult<()> {
        self.disseminate(|_| {})
    }

    /// A barrier that also reports who was signalled and who was heard from in each round
    pub(crate) fn barrier_traced(&self) -> XbrtimeResult<Vec<BarrierRound>> {
        let mut rounds = Vec::with_capacity(self.rounds);
        self.disseminate(|round| rounds.push(round))?;
        Ok(rounds)
    }

    fn disseminate(&self, mut on_round: impl FnMut(BarrierRound)) -> XbrtimeResult<()> {
        if self.num_pes == 1 {
            return Ok(());
        }
        let sense = self.sense.load(Ordering::SeqCst);
        let barrier_id = self.barrier_cnt.fetch_add(1, Ordering::SeqCst);
        let home = self.comm.my_pe();

        // everything written before the barrier is visible before any signal
        self.comm.fence();
        trace!(pe = self.my_pe, barrier_id, sense, "enters barrier");

        let mut stride = 1;
        for round in 0..self.rounds {
            let slot = slot_addr(sense, round);
            let target = (self.my_pe + stride) % self.num_pes;
            self.comm.remote_write(
                slot,
                self.arch.decode_pe(target),
                encode_signal(stride, self.my_pe),
            )?;
            trace!(pe = self.my_pe, barrier_id, round, target, "signalled");

            let backoff = Backoff::new();
            let mut spins = 0;
            let signal = loop {
                let signal = self.comm.remote_read::<u64>(slot, home)?;
                if signal & STRIDE_MASK == stride as u64 {
                    break signal;
                }
                if spins < self.spin_limit {
                    backoff.spin();
                    spins += 1;
                } else {
                    backoff.snooze();
                }
            };
            on_round(BarrierRound {
                signalled: target,
                heard_from: (signal >> 32) as usize,
            });
            stride *= 2;
        }

        for round in 0..self.rounds {
            self.comm
                .remote_write(slot_addr(sense, round), home, BARRIER_RESET)?;
        }
        self.sense.store(1 - sense, Ordering::SeqCst);
        trace!(pe = self.my_pe, barrier_id, "exits barrier");
        Ok(())
    }
}
