use crate::error::{invalid_arg, XbrtimeResult};
use crate::fabric::{Reducible, Remote, SymAddr};
use crate::World;

use tracing::debug;

/// Element-wise combining operation of a reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// wrapping for integers
    Sum,
    /// wrapping for integers
    Product,
    Min,
    Max,
}

impl ReduceOp {
    fn apply<T: Reducible>(&self, acc: T, val: T) -> T {
        match self {
            ReduceOp::Sum => acc.reduce_add(val),
            ReduceOp::Product => acc.reduce_mul(val),
            ReduceOp::Min => {
                if val < acc {
                    val
                } else {
                    acc
                }
            }
            ReduceOp::Max => {
                if val > acc {
                    val
                } else {
                    acc
                }
            }
        }
    }
}

// Every collective is bracketed by barriers: the entry barrier makes the
// sources ready everywhere, the exit barrier keeps any PE from reusing a
// buffer that is still being read or written. Pushed sources are copied out
// before the entry barrier so `src` and `dest` may alias.
//
// Arguments every PE passes identically are checked before the entry barrier
// and fail on every PE alike. Anything that can fail on one PE alone is
// carried through both barriers and reported afterwards.
impl World {
    fn bracketed<S>(
        &self,
        staged: XbrtimeResult<S>,
        exchange: impl FnOnce(S) -> XbrtimeResult<()>,
    ) -> XbrtimeResult<()> {
        self.barrier()?;
        let res = staged.and_then(exchange);
        self.barrier()?;
        if let Err(e) = &res {
            debug!(pe = self.my_pe, "collective failed locally: {e}");
        }
        res
    }

    fn check_count_stride(count: usize, stride: usize) -> XbrtimeResult<()> {
        if count == 0 {
            return Err(invalid_arg("collective count must be non-zero"));
        }
        if stride == 0 {
            return Err(invalid_arg("collective stride must be non-zero"));
        }
        Ok(())
    }

    fn check_tables(
        &self,
        pe_msg_sizes: &[usize],
        pe_displacements: &[usize],
        total_count: usize,
    ) -> XbrtimeResult<()> {
        if pe_msg_sizes.len() != self.num_pes || pe_displacements.len() != self.num_pes {
            return Err(invalid_arg(format!(
                "message size and displacement tables need {} entries, got {} and {}",
                self.num_pes,
                pe_msg_sizes.len(),
                pe_displacements.len()
            )));
        }
        for (pe, (size, disp)) in pe_msg_sizes.iter().zip(pe_displacements).enumerate() {
            match disp.checked_add(*size) {
                Some(end) if end <= total_count => {}
                _ => {
                    return Err(invalid_arg(format!(
                        "pe {pe}: displacement {disp} + size {size} exceeds total count {total_count}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn read_strided<T: Remote>(
        &self,
        addr: SymAddr,
        count: usize,
        stride: usize,
    ) -> XbrtimeResult<Vec<T>> {
        self.check_local_extent::<T>(addr, count, stride)?;
        (0..count)
            .map(|i| self.read_local(addr.elem::<T>(i * stride)))
            .collect()
    }

    fn write_strided<T: Remote>(
        &self,
        addr: SymAddr,
        vals: &[T],
        stride: usize,
    ) -> XbrtimeResult<()> {
        self.check_local_extent::<T>(addr, vals.len(), stride)?;
        for (i, val) in vals.iter().enumerate() {
            self.write_local(addr.elem::<T>(i * stride), *val)?;
        }
        Ok(())
    }

    /// Copy `count` contiguous elements of `src` on `root` into `dest` on every PE
    pub fn broadcast<T: Remote>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        root: usize,
    ) -> XbrtimeResult<()> {
        self.broadcast_strided::<T>(dest, src, count, 1, root)
    }

    /// Broadcast of `count` elements spaced `stride` elements apart in both
    /// `src` and `dest`. The root pushes to every PE, itself included.
    #[tracing::instrument(skip_all)]
    pub fn broadcast_strided<T: Remote>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        stride: usize,
        root: usize,
    ) -> XbrtimeResult<()> {
        Self::check_count_stride(count, stride)?;
        self.check_pe(root)?;
        let staged = if self.my_pe == root {
            self.read_strided::<T>(src, count, stride)
        } else {
            Ok(Vec::new())
        };
        self.bracketed(staged, |vals| {
            if self.my_pe == root {
                debug!(pe = self.my_pe, count, "broadcasting");
                for pe in 0..self.num_pes {
                    self.put_slice(pe, dest, &vals, stride)?;
                }
            }
            Ok(())
        })
    }

    /// Every PE sends `count` elements to every PE (itself included).
    ///
    /// The block for peer `k` starts at element `k * count * src_stride` of
    /// `src`; sender `i`'s block lands at element `i * count * dest_stride` of
    /// `dest`. Within a block elements step by the respective stride.
    #[tracing::instrument(skip_all)]
    pub fn alltoall<T: Remote>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        dest_stride: usize,
        src_stride: usize,
    ) -> XbrtimeResult<()> {
        Self::check_count_stride(count, dest_stride)?;
        Self::check_count_stride(count, src_stride)?;
        let total = count
            .checked_mul(self.num_pes)
            .ok_or_else(|| invalid_arg("alltoall count overflows"))?;
        // both buffers span every pe's block; the segments are the same size everywhere
        self.check_local_extent::<T>(dest, total, dest_stride)?;
        self.check_local_extent::<T>(src, total, src_stride)?;
        let staged = (0..self.num_pes)
            .map(|pe| {
                self.read_strided::<T>(src.elem::<T>(pe * count * src_stride), count, src_stride)
            })
            .collect::<XbrtimeResult<Vec<_>>>();
        self.bracketed(staged, |blocks| {
            let slot = dest.elem::<T>(self.my_pe * count * dest_stride);
            // walk forward from this pe so the peers are not all hit in the same order
            for offset in 0..self.num_pes {
                let pe = (self.my_pe + offset) % self.num_pes;
                self.put_slice(pe, slot, &blocks[pe], dest_stride)?;
            }
            Ok(())
        })
    }

    /// The root hands PE `k` the `pe_msg_sizes[k]` elements of its `src` starting at
    /// element `pe_displacements[k]`; they land at the start of PE `k`'s `dest`.
    ///
    /// A zero size is allowed and leaves that PE's `dest` untouched.
    #[tracing::instrument(skip_all)]
    pub fn scatter<T: Remote>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        pe_msg_sizes: &[usize],
        pe_displacements: &[usize],
        total_count: usize,
        root: usize,
    ) -> XbrtimeResult<()> {
        self.check_pe(root)?;
        self.check_tables(pe_msg_sizes, pe_displacements, total_count)?;
        let staged = if self.my_pe == root {
            self.read_local_slice::<T>(src, total_count)
        } else {
            Ok(Vec::new())
        };
        self.bracketed(staged, |vals| {
            if self.my_pe == root {
                for (pe, (&size, &disp)) in pe_msg_sizes.iter().zip(pe_displacements).enumerate() {
                    if size > 0 {
                        self.put_slice(pe, dest, &vals[disp..disp + size], 1)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Inverse of [scatter][World::scatter]: the root collects `pe_msg_sizes[k]`
    /// elements from the start of PE `k`'s `src` into its `dest` at element
    /// `pe_displacements[k]`.
    #[tracing::instrument(skip_all)]
    pub fn gather<T: Remote>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        pe_msg_sizes: &[usize],
        pe_displacements: &[usize],
        total_count: usize,
        root: usize,
    ) -> XbrtimeResult<()> {
        self.check_pe(root)?;
        self.check_tables(pe_msg_sizes, pe_displacements, total_count)?;
        let staged = if self.my_pe == root {
            self.check_local_extent::<T>(dest, total_count, 1)
        } else {
            Ok(())
        };
        self.bracketed(staged, |()| {
            if self.my_pe == root {
                let mut pieces = Vec::with_capacity(self.num_pes);
                for (pe, &size) in pe_msg_sizes.iter().enumerate() {
                    let mut piece = vec![T::default(); size];
                    if size > 0 {
                        self.get_slice(&mut piece, pe, src, 1)?;
                    }
                    pieces.push(piece);
                }
                for (piece, &disp) in pieces.iter().zip(pe_displacements) {
                    self.write_local_slice(dest.elem::<T>(disp), piece)?;
                }
            }
            Ok(())
        })
    }

    /// Combine `count` elements (spaced `stride` apart) of `src` across all PEs
    /// with `op`; the result lands in `dest` on `root` only.
    ///
    /// The root pulls every contribution and folds them in PE order
    /// `0, 1, .., num_pes - 1`, so floating point results are reproducible.
    #[tracing::instrument(skip_all)]
    pub fn reduce<T: Reducible>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        stride: usize,
        root: usize,
        op: ReduceOp,
    ) -> XbrtimeResult<()> {
        Self::check_count_stride(count, stride)?;
        self.check_pe(root)?;
        let staged = if self.my_pe == root {
            self.check_local_extent::<T>(dest, count, stride)
        } else {
            Ok(())
        };
        self.bracketed(staged, |()| {
            if self.my_pe == root {
                let mut acc = vec![T::default(); count];
                let mut contribution = vec![T::default(); count];
                for pe in 0..self.num_pes {
                    let buf = if pe == 0 { &mut acc } else { &mut contribution };
                    self.get_slice(buf, pe, src, stride)?;
                    if pe > 0 {
                        for (a, v) in acc.iter_mut().zip(&contribution) {
                            *a = op.apply(*a, *v);
                        }
                    }
                }
                debug!(pe = self.my_pe, count, ?op, "reduced");
                self.write_strided(dest, &acc, stride)?;
            }
            Ok(())
        })
    }

    /// [reduce][World::reduce] with [ReduceOp::Sum]
    pub fn reduce_sum<T: Reducible>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        stride: usize,
        root: usize,
    ) -> XbrtimeResult<()> {
        self.reduce::<T>(dest, src, count, stride, root, ReduceOp::Sum)
    }

    /// A reduction whose result ends up in `dest` on every PE
    #[tracing::instrument(skip_all)]
    pub fn all_reduce<T: Reducible>(
        &self,
        dest: SymAddr,
        src: SymAddr,
        count: usize,
        stride: usize,
        op: ReduceOp,
    ) -> XbrtimeResult<()> {
        // pe 0 takes part in the broadcast even if its reduction failed
        let reduced = self.reduce::<T>(dest, src, count, stride, 0, op);
        let shared = self.broadcast_strided::<T>(dest, dest, count, stride, 0);
        reduced.and(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_fold() {
        assert_eq!(ReduceOp::Sum.apply(250u8, 10), 4);
        assert_eq!(ReduceOp::Product.apply(-3i32, 4), -12);
        assert_eq!(ReduceOp::Min.apply(2.5f64, -1.0), -1.0);
        assert_eq!(ReduceOp::Max.apply(7u16, 3), 7);
    }

    #[test]
    fn single_pe_collectives() {
        let world = crate::WorldBuilder::new()
            .with_num_pes(1)
            .with_heap_size(4096)
            .build()
            .unwrap();
        let src = world.malloc(4 * 8).unwrap();
        let dest = world.malloc(4 * 8).unwrap();
        world.write_local_slice(src, &[1u64, 2, 3, 4]).unwrap();

        world.broadcast::<u64>(dest, src, 4, 0).unwrap();
        assert_eq!(
            world.read_local_slice::<u64>(dest, 4).unwrap(),
            vec![1, 2, 3, 4]
        );

        world.reduce::<u64>(dest, src, 2, 2, 0, ReduceOp::Max).unwrap();
        assert_eq!(world.read_local_slice::<u64>(dest, 4).unwrap(), vec![1, 2, 3, 4]);

        world.write_local_slice(dest, &[0u64; 4]).unwrap();
        world.reduce_sum::<u64>(dest, src, 3, 1, 0).unwrap();
        assert_eq!(world.read_local_slice::<u64>(dest, 4).unwrap(), vec![1, 2, 3, 0]);

        assert!(matches!(
            world.broadcast::<u64>(dest, src, 4, 1),
            Err(crate::XbrtimeError::InvalidPe { pe: 1, num_pes: 1 })
        ));
        assert!(matches!(
            world.scatter::<u64>(dest, src, &[2, 2], &[0, 2], 4, 0),
            Err(crate::XbrtimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            world.scatter::<u64>(dest, src, &[3], &[2], 4, 0),
            Err(crate::XbrtimeError::InvalidArgument(_))
        ));
        world.close().unwrap();
    }
}
